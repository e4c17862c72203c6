#![allow(dead_code)]

use alloy::primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;
use chain_radar::error::RpcError;
use chain_radar::rpc::client::{
    BlockData, ChainClient, ClientFactory, ReceiptData, RpcResult, TxData,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const BLOCK_TIME_SECS: u64 = 12;
pub const GENESIS_TIMESTAMP: u64 = 1_700_000_000;

#[derive(Default)]
struct ChainState {
    head: u64,
    blocks: HashMap<u64, BlockData>,
    receipts: HashMap<B256, ReceiptData>,
    code: HashMap<Address, Bytes>,
    balances: HashMap<Address, U256>,
    calls: HashMap<(Address, [u8; 4]), Bytes>,
    broken_blocks: HashSet<u64>,
    broken_receipts: HashSet<B256>,
}

/// Scripted in-memory chain. Every trait call counts as one RPC.
pub struct MockChain {
    url: String,
    state: Mutex<ChainState>,
    rpc_calls: AtomicUsize,
    down: AtomicBool,
}

pub fn addr(byte: u8) -> Address {
    Address::repeat_byte(byte)
}

pub fn hash(byte: u8) -> B256 {
    B256::repeat_byte(byte)
}

pub fn ether(amount: u64) -> U256 {
    U256::from(amount) * U256::from(1_000_000_000_000_000_000u128)
}

pub fn plain_tx(hash_byte: u8, from: Address, to: Address) -> TxData {
    TxData {
        hash: hash(hash_byte),
        from,
        to: Some(to),
    }
}

pub fn creation_tx(hash_byte: u8, from: Address) -> TxData {
    TxData {
        hash: hash(hash_byte),
        from,
        to: None,
    }
}

pub fn code_from_hex(hex_code: &str) -> Bytes {
    Bytes::from(hex::decode(hex_code).expect("valid hex"))
}

/// Runtime code large enough to avoid the proxy heuristic, with `fragments` spliced in.
pub fn padded_code(fragments: &[&str], len_bytes: usize) -> Bytes {
    let mut body: String = fragments.concat();
    while body.len() < len_bytes * 2 {
        body.push_str("00");
    }
    code_from_hex(&body)
}

impl MockChain {
    pub fn new(url: &str) -> Arc<Self> {
        Arc::new(Self {
            url: url.to_string(),
            state: Mutex::new(ChainState::default()),
            rpc_calls: AtomicUsize::new(0),
            down: AtomicBool::new(false),
        })
    }

    fn state(&self) -> std::sync::MutexGuard<'_, ChainState> {
        self.state.lock().expect("mock state")
    }

    pub fn rpc_calls(&self) -> usize {
        self.rpc_calls.load(Ordering::SeqCst)
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    pub fn set_head(&self, head: u64) {
        self.state().head = head;
    }

    /// Add block `number` with `transactions`; the head follows the highest block added.
    pub fn push_block(&self, number: u64, transactions: Vec<TxData>) {
        let mut state = self.state();
        let tx_hashes = transactions.iter().map(|tx| tx.hash).collect();
        state.blocks.insert(
            number,
            BlockData {
                number,
                timestamp: GENESIS_TIMESTAMP + number * BLOCK_TIME_SECS,
                transactions,
                tx_hashes,
            },
        );
        state.head = state.head.max(number);
    }

    pub fn empty_blocks(&self, range: std::ops::RangeInclusive<u64>) {
        for number in range {
            self.push_block(number, Vec::new());
        }
    }

    pub fn set_receipt(&self, tx_hash: B256, contract_address: Option<Address>) {
        self.state().receipts.insert(
            tx_hash,
            ReceiptData {
                tx_hash,
                contract_address,
                status: true,
            },
        );
    }

    /// Receipt of a creation that ran out of gas or reverted.
    pub fn revert_receipt(&self, tx_hash: B256, contract_address: Address) {
        self.state().receipts.insert(
            tx_hash,
            ReceiptData {
                tx_hash,
                contract_address: Some(contract_address),
                status: false,
            },
        );
    }

    pub fn set_code(&self, address: Address, code: Bytes) {
        self.state().code.insert(address, code);
    }

    pub fn set_balance(&self, address: Address, balance: U256) {
        self.state().balances.insert(address, balance);
    }

    pub fn set_call(&self, to: Address, selector: [u8; 4], output: Vec<u8>) {
        self.state().calls.insert((to, selector), Bytes::from(output));
    }

    pub fn break_block(&self, number: u64) {
        self.state().broken_blocks.insert(number);
    }

    pub fn repair_block(&self, number: u64) {
        self.state().broken_blocks.remove(&number);
    }

    pub fn break_receipt(&self, tx_hash: B256) {
        self.state().broken_receipts.insert(tx_hash);
    }

    /// A deployment of `contract` with `code` in block `number` by `deployer`. The block is
    /// published last so a watcher never sees it without its receipt.
    pub fn deploy(
        &self,
        number: u64,
        tx_byte: u8,
        deployer: Address,
        contract: Address,
        code: Bytes,
    ) {
        self.set_receipt(hash(tx_byte), Some(contract));
        self.set_code(contract, code);
        self.push_block(number, vec![creation_tx(tx_byte, deployer)]);
    }

    fn begin(&self) -> RpcResult<()> {
        self.rpc_calls.fetch_add(1, Ordering::SeqCst);
        if self.down.load(Ordering::SeqCst) {
            return Err(RpcError::transport(self.url.clone(), "connection refused"));
        }
        Ok(())
    }
}

#[async_trait]
impl ChainClient for MockChain {
    fn endpoint(&self) -> &str {
        &self.url
    }

    async fn block_number(&self) -> RpcResult<u64> {
        self.begin()?;
        Ok(self.state().head)
    }

    async fn block(&self, number: u64, full: bool) -> RpcResult<Option<BlockData>> {
        self.begin()?;
        let state = self.state();
        if state.broken_blocks.contains(&number) {
            return Err(RpcError::transport(self.url.clone(), "502 Bad Gateway"));
        }
        Ok(state.blocks.get(&number).cloned().map(|mut block| {
            if !full {
                block.transactions.clear();
            }
            block
        }))
    }

    async fn receipt(&self, tx_hash: B256) -> RpcResult<Option<ReceiptData>> {
        self.begin()?;
        let state = self.state();
        if state.broken_receipts.contains(&tx_hash) {
            return Err(RpcError::transport(self.url.clone(), "receipt lookup timed out"));
        }
        Ok(state.receipts.get(&tx_hash).cloned())
    }

    async fn code(&self, address: Address) -> RpcResult<Bytes> {
        self.begin()?;
        Ok(self.state().code.get(&address).cloned().unwrap_or_default())
    }

    async fn balance(&self, address: Address) -> RpcResult<U256> {
        self.begin()?;
        Ok(self
            .state()
            .balances
            .get(&address)
            .copied()
            .unwrap_or(U256::ZERO))
    }

    async fn call(&self, to: Address, data: Bytes) -> RpcResult<Bytes> {
        self.begin()?;
        let mut selector = [0u8; 4];
        if data.len() >= 4 {
            selector.copy_from_slice(&data[..4]);
        }
        self.state()
            .calls
            .get(&(to, selector))
            .cloned()
            .ok_or_else(|| RpcError::transport(self.url.clone(), "execution reverted"))
    }
}

/// Hands out pre-built mock chains by URL.
#[derive(Default)]
pub struct MockFactory {
    chains: Mutex<HashMap<String, Arc<MockChain>>>,
    pub connects: AtomicUsize,
}

impl MockFactory {
    pub fn with(chains: &[Arc<MockChain>]) -> Arc<Self> {
        let factory = Self::default();
        {
            let mut map = factory.chains.lock().expect("factory map");
            for chain in chains {
                map.insert(chain.endpoint().to_string(), Arc::clone(chain));
            }
        }
        Arc::new(factory)
    }
}

impl ClientFactory for MockFactory {
    fn connect(&self, url: &str) -> RpcResult<Arc<dyn ChainClient>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let chains = self.chains.lock().expect("factory map");
        chains
            .get(url)
            .cloned()
            .map(|chain| chain as Arc<dyn ChainClient>)
            .ok_or_else(|| RpcError::InvalidUrl {
                url: url.to_string(),
                reason: "no mock registered".to_string(),
            })
    }
}

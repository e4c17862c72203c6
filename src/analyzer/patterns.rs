//! Literal hex patterns the analyzer looks for in deployed bytecode.
//!
//! Matching is plain substring search over the lowercase hex encoding, so a pattern can also hit
//! across an instruction boundary or inside PUSH data. That imprecision is accepted; thresholds and
//! weights in `scoring` are calibrated against it.

/// EIP-1167 minimal proxy runtime prefix (up to the PUSH20 of the implementation address).
pub const EIP1167_PREFIX: &str = "363d3d373d3d3d363d73";

pub const SEL_TRANSFER: &str = "a9059cbb";
pub const SEL_TOTAL_SUPPLY: &str = "18160ddd";
pub const SEL_NAME: &str = "06fdde03";
pub const SEL_SYMBOL: &str = "95d89b41";
pub const SEL_OWNER: &str = "8da5cb5b";
pub const SEL_MINT: &str = "40c10f19";
pub const SEL_BURN: &str = "42966c68";
pub const SEL_GET_PAIR: &str = "e6a43905";
pub const SEL_GET_RESERVES: &str = "0902f1ac";
pub const SEL_TOKEN0: &str = "0dfe1681";
/// `Error(string)`: present when the contract builds revert reasons itself.
pub const SEL_ERROR_STRING: &str = "08c379a0";
/// Gnosis Safe `execTransaction`.
pub const SEL_SAFE_EXEC_TRANSACTION: &str = "6a761202";

/// `addLiquidityETH`, `addLiquidity`, `createPair`.
pub const LP_ROUTER_SELECTORS: [&str; 3] = ["f305d719", "e8e33700", "c9c65396"];

/// `PUSH1 0x64 SWAP1 DIV`: dividing by 100, the usual shape of a percentage fee.
pub const TAX_ARITHMETIC: &str = "60649004";

/// Runtime code shorter than this is treated as a forwarding proxy.
pub const PROXY_CODE_LEN_THRESHOLD: usize = 100;
/// Reverting contracts smaller than this rarely carry legitimate business logic.
pub const HONEYPOT_CODE_LEN_THRESHOLD: usize = 2_500;

const EXCERPT_BYTES: usize = 64;

/// Lowercase hex view of a contract's runtime code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeFingerprint {
    hex: String,
    byte_len: usize,
}

impl CodeFingerprint {
    pub fn new(code: &[u8]) -> Self {
        Self {
            hex: hex::encode(code),
            byte_len: code.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.byte_len == 0
    }

    pub fn byte_len(&self) -> usize {
        self.byte_len
    }

    pub fn contains(&self, pattern: &str) -> bool {
        self.hex.contains(pattern)
    }

    pub fn contains_any(&self, patterns: &[&str]) -> bool {
        patterns.iter().any(|p| self.contains(p))
    }

    pub fn looks_like_proxy(&self) -> bool {
        !self.is_empty()
            && (self.contains(EIP1167_PREFIX) || self.byte_len < PROXY_CODE_LEN_THRESHOLD)
    }

    pub fn has_transfer(&self) -> bool {
        self.contains(SEL_TRANSFER)
    }

    pub fn looks_like_token(&self) -> bool {
        self.has_transfer() && self.contains(SEL_TOTAL_SUPPLY)
    }

    pub fn has_tax_logic(&self) -> bool {
        self.has_transfer() && self.contains(TAX_ARITHMETIC)
    }

    pub fn honeypot_shape(&self) -> bool {
        self.contains(SEL_ERROR_STRING) && self.byte_len < HONEYPOT_CODE_LEN_THRESHOLD
    }

    pub fn excerpt(&self) -> String {
        let end = self.hex.len().min(EXCERPT_BYTES * 2);
        format!("0x{}", &self.hex[..end])
    }
}

pub fn is_safe_multisig(code: &[u8]) -> bool {
    CodeFingerprint::new(code).contains(SEL_SAFE_EXEC_TRANSACTION)
}

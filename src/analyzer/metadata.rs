use crate::rpc::client::ChainClient;
use alloy::primitives::{Address, Bytes};
use alloy::sol_types::SolCall;
use std::time::Duration;
use tokio::time::timeout;

alloy::sol! {
    interface IErc20Metadata {
        function name() external view returns (string);
        function symbol() external view returns (string);
    }
}

pub const METADATA_TIMEOUT: Duration = Duration::from_secs(5);
pub const UNKNOWN_NAME: &str = "Unknown Token";
pub const UNKNOWN_SYMBOL: &str = "???";
const MAX_LABEL_CHARS: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenMetadata {
    pub name: String,
    pub symbol: String,
}

/// `name()` and `symbol()` with placeholders on revert, garbage, or timeout. Never fails.
pub async fn fetch_token_metadata(
    client: &dyn ChainClient,
    token: Address,
    limit: Duration,
) -> TokenMetadata {
    let name_call = Bytes::from(IErc20Metadata::nameCall {}.abi_encode());
    let symbol_call = Bytes::from(IErc20Metadata::symbolCall {}.abi_encode());
    let (name, symbol) = tokio::join!(
        probe_label(client, token, name_call, limit, "name"),
        probe_label(client, token, symbol_call, limit, "symbol"),
    );
    TokenMetadata {
        name: name.unwrap_or_else(|| UNKNOWN_NAME.to_string()),
        symbol: symbol.unwrap_or_else(|| UNKNOWN_SYMBOL.to_string()),
    }
}

async fn probe_label(
    client: &dyn ChainClient,
    token: Address,
    calldata: Bytes,
    limit: Duration,
    what: &str,
) -> Option<String> {
    match timeout(limit, client.call(token, calldata)).await {
        Ok(Ok(raw)) => decode_abi_string(&raw),
        Ok(Err(err)) => {
            tracing::debug!("[ANALYZE] {}() on {:#x} failed: {}", what, token, err);
            None
        }
        Err(_) => {
            tracing::debug!(
                "[ANALYZE] {}() on {:#x} timed out after {}ms",
                what,
                token,
                limit.as_millis()
            );
            None
        }
    }
}

/// Decode an ABI `string` return, falling back to the legacy `bytes32` layout some early tokens
/// use.
pub fn decode_abi_string(raw: &[u8]) -> Option<String> {
    if let Ok(decoded) = IErc20Metadata::nameCall::abi_decode_returns(raw, true) {
        return sanitize_label(&decoded._0);
    }
    if raw.len() == 32 {
        let end = raw.iter().position(|b| *b == 0).unwrap_or(raw.len());
        return std::str::from_utf8(&raw[..end]).ok().and_then(sanitize_label);
    }
    None
}

fn sanitize_label(raw: &str) -> Option<String> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !c.is_control())
        .take(MAX_LABEL_CHARS)
        .collect();
    let trimmed = cleaned.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

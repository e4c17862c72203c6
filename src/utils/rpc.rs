//! Classification helpers for JSON-RPC failures and the backoff arithmetic shared by the
//! endpoint pool and its circuit breakers.

/// Failures that say something about the *request* rather than the endpoint. These are surfaced to
/// the caller but never count against the endpoint that produced them.
pub fn is_endpoint_failure(message: &str) -> bool {
    let msg = message.to_ascii_lowercase();
    let request_level = [
        "execution reverted",
        "revert",
        "invalid opcode",
        "out of gas",
        "invalid params",
        "-32602",
    ];
    !request_level.iter().any(|needle| msg.contains(needle))
}

pub fn is_rate_limited_rpc_error(message: &str) -> bool {
    let msg = message.to_ascii_lowercase();
    msg.contains("429")
        || msg.contains("rate limit")
        || msg.contains("too many requests")
        || msg.contains("compute units per second")
        || msg.contains("throughput")
}

pub fn bounded_exponential_backoff_ms(base_ms: u64, streak: u32, cap_ms: u64) -> u64 {
    if base_ms == 0 {
        return 0;
    }
    let clamped = streak.min(16);
    base_ms
        .saturating_mul(1u64 << clamped)
        .min(cap_ms.max(base_ms))
}

/// Best-effort `Retry-After` extraction from provider error text. Seconds unless a unit says
/// otherwise.
pub fn parse_retry_after_ms(message: &str) -> Option<u64> {
    let msg = message.to_ascii_lowercase();
    let start = msg
        .find("retry-after")
        .or_else(|| msg.find("retry after"))?;
    let tail = &msg[start..];

    let digits: String = tail
        .chars()
        .skip_while(|ch| !ch.is_ascii_digit())
        .take_while(|ch| ch.is_ascii_digit())
        .collect();
    let value: u64 = digits.parse().ok()?;

    let unit_hint = tail
        .split_once(&digits)
        .map(|(_, suffix)| suffix.trim_start())
        .unwrap_or("");
    if unit_hint.starts_with("ms") || unit_hint.starts_with("millis") {
        return Some(value);
    }
    Some(value.saturating_mul(1_000))
}

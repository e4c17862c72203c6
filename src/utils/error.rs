/// Collapse an error string into a single bounded line suitable for logs and persisted rows.
///
/// Response bodies (`text: ...`), backtraces and long hex blobs such as echoed bytecode are
/// elided before truncation so the useful prefix survives.
pub fn compact_error_message(message: &str, max_len: usize) -> String {
    let mut raw = message.to_string();
    if let Some((prefix, _)) = raw.split_once(" text: ") {
        raw = format!("{prefix} text=<omitted>");
    }
    if let Some((prefix, _)) = raw.split_once("Stack backtrace:") {
        raw = prefix.to_string();
    }

    let mut compact = String::with_capacity(raw.len().min(max_len.saturating_add(16)));
    for token in raw.split_whitespace() {
        if !compact.is_empty() {
            compact.push(' ');
        }
        compact.push_str(&elide_hex_blob(token));
        if compact.len() > max_len {
            break;
        }
    }
    if compact.len() <= max_len {
        compact
    } else {
        let mut cut = max_len;
        while !compact.is_char_boundary(cut) {
            cut -= 1;
        }
        compact.truncate(cut);
        compact.push_str("...(truncated)");
        compact
    }
}

const HEX_BLOB_KEEP: usize = 18;

fn elide_hex_blob(token: &str) -> String {
    let trimmed = token.trim_matches(|c: char| c == '"' || c == ',' || c == '\'');
    let Some(body) = trimmed.strip_prefix("0x") else {
        return token.to_string();
    };
    if body.len() <= 128 || !body.bytes().all(|b| b.is_ascii_hexdigit()) {
        return token.to_string();
    }
    format!("0x{}..<{} hex chars>", &body[..HEX_BLOB_KEEP], body.len())
}

#[cfg(test)]
mod tests {
    use super::compact_error_message;

    #[test]
    fn test_compact_error_message_elides_payload_and_backtrace() {
        let raw = "DeserError { err: unknown variant `0x7e`, text: \"{...huge...}\" }\nStack backtrace:\n 0: frame";
        let compact = compact_error_message(raw, 260);
        assert!(compact.contains("text=<omitted>"));
        assert!(!compact.contains("Stack backtrace"));
        assert!(!compact.contains('\n'));
    }

    #[test]
    fn test_compact_error_message_elides_long_bytecode() {
        let code = format!("0x{}", "60".repeat(400));
        let raw = format!("execution reverted with data {code}");
        let compact = compact_error_message(&raw, 260);
        assert!(compact.starts_with("execution reverted with data 0x6060"));
        assert!(compact.contains("<800 hex chars>"));
    }

    #[test]
    fn test_compact_error_message_truncates_long_text() {
        let raw = "word ".repeat(200);
        let compact = compact_error_message(&raw, 40);
        assert!(compact.ends_with("...(truncated)"));
        assert!(compact.len() <= 40 + "...(truncated)".len());
    }
}

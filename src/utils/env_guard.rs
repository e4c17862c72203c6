use std::fs;
use std::path::Path;

/// Parse one `KEY=value` line of a dotenv file. Comments, blank lines and malformed lines yield
/// `None`; surrounding quotes are stripped.
fn parse_env_line(line: &str) -> Option<(&str, &str)> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return None;
    }
    let trimmed = trimmed.strip_prefix("export ").unwrap_or(trimmed);
    let (key, value) = trimmed.split_once('=')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }

    let value = value.trim();
    let quoted = value.len() >= 2
        && ((value.starts_with('"') && value.ends_with('"'))
            || (value.starts_with('\'') && value.ends_with('\'')));
    let parsed = if quoted {
        &value[1..value.len() - 1]
    } else {
        value.split(" #").next().unwrap_or("").trim()
    };
    Some((key, parsed))
}

/// Load `path` into the process environment without overriding variables that are already set.
/// Returns the number of variables applied.
pub fn load_env_file(path: &Path) -> usize {
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(err) => {
            if path.exists() {
                tracing::warn!("[ENV] Failed to read {}: {}", path.display(), err);
            }
            return 0;
        }
    };

    let mut applied = 0usize;
    for (key, value) in content.lines().filter_map(parse_env_line) {
        if std::env::var_os(key).is_some() {
            continue;
        }
        std::env::set_var(key, value);
        applied += 1;
    }
    applied
}

pub fn load_dot_env() -> usize {
    load_env_file(Path::new(".env"))
}

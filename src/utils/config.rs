use crate::config::chains::NetworkConfig;
use crate::error::{ConfigError, Result};
use crate::rpc::pool::PoolSettings;
use std::env;

pub const DEFAULT_DB_PATH: &str = "radar.db";
pub const DEFAULT_BATCH_SIZE: usize = 5;
pub const DEFAULT_WALLET_SAMPLE_SIZE: usize = 15;
pub const DEFAULT_WALLET_MIN_USD: f64 = 1_000.0;
pub const DEFAULT_PRICE_TTL_SECS: u64 = 60;

#[derive(Debug, Clone)]
pub struct RadarConfig {
    pub networks: Vec<NetworkConfig>,
    pub db_path: String,
    /// Look-back depth for the startup backfill. `None` disables it.
    pub backfill_blocks: Option<u64>,
    pub batch_size: usize,
    pub wallet_scan_enabled: bool,
    pub wallet_sample_size: usize,
    pub wallet_min_usd: f64,
    pub price_ttl_secs: u64,
    pub pool: PoolSettings,
}

fn validate_http_url(name: &str, raw: &str) -> std::result::Result<(), ConfigError> {
    let parsed = raw
        .parse::<reqwest::Url>()
        .map_err(|e| {
            ConfigError::Invalid(format!("{name} must be a valid URL, got `{raw}`: {e}"))
        })?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(ConfigError::Invalid(format!(
            "{name} must use http(s), got scheme `{other}` in `{raw}`"
        ))),
    }
}

fn parse_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn parse_number<T: std::str::FromStr>(
    name: &str,
    raw: Option<String>,
) -> std::result::Result<Option<T>, ConfigError> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    trimmed
        .parse::<T>()
        .map(Some)
        .map_err(|_| ConfigError::Invalid(format!("{name} must be numeric, got `{trimmed}`")))
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

impl RadarConfig {
    pub fn load() -> Result<Self> {
        Self::load_from(|key| env::var(key).ok())
    }

    /// Same as [`RadarConfig::load`] but reads variables through `lookup`, so callers can feed a
    /// fixed map instead of the process environment.
    pub fn load_from<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let requested = lookup("RADAR_NETWORKS")
            .map(|raw| split_list(&raw))
            .filter(|list| !list.is_empty())
            .unwrap_or_else(|| vec!["ethereum".to_string()]);

        let mut networks: Vec<NetworkConfig> = Vec::with_capacity(requested.len());
        for name in &requested {
            let mut network = NetworkConfig::get(name).ok_or_else(|| {
                ConfigError::Invalid(format!(
                    "RADAR_NETWORKS entry `{name}` is not a known network (expected one of {})",
                    NetworkConfig::KEYS.join(", ")
                ))
            })?;
            if networks.iter().any(|n| n.key == network.key) {
                continue;
            }
            let env_key = network.rpc_env_key();
            if let Some(raw) = lookup(&env_key) {
                let urls = split_list(&raw);
                if urls.is_empty() {
                    return Err(ConfigError::Missing(format!(
                        "{env_key} is set but contains no URLs"
                    ))
                    .into());
                }
                network = network.with_rpc_urls(urls);
            }
            for url in &network.rpc_urls {
                validate_http_url(&env_key, url)?;
            }
            networks.push(network);
        }

        let db_path = lookup("RADAR_DB_PATH")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_DB_PATH.to_string());

        let backfill_blocks =
            parse_number::<u64>("RADAR_BACKFILL_BLOCKS", lookup("RADAR_BACKFILL_BLOCKS"))?
                .filter(|n| *n > 0);

        let batch_size = parse_number::<usize>("RADAR_BATCH_SIZE", lookup("RADAR_BATCH_SIZE"))?
            .unwrap_or(DEFAULT_BATCH_SIZE);
        if batch_size == 0 {
            return Err(
                ConfigError::Invalid("RADAR_BATCH_SIZE must be at least 1".to_string()).into(),
            );
        }

        let wallet_scan_enabled = lookup("RADAR_WALLET_SCAN_ENABLED")
            .map(|v| parse_flag(&v))
            .unwrap_or(false);
        let wallet_sample_size = parse_number::<usize>(
            "RADAR_WALLET_SAMPLE_SIZE",
            lookup("RADAR_WALLET_SAMPLE_SIZE"),
        )?
        .unwrap_or(DEFAULT_WALLET_SAMPLE_SIZE);
        let wallet_min_usd =
            parse_number::<f64>("RADAR_WALLET_MIN_USD", lookup("RADAR_WALLET_MIN_USD"))?
                .unwrap_or(DEFAULT_WALLET_MIN_USD);
        if !wallet_min_usd.is_finite() || wallet_min_usd < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "RADAR_WALLET_MIN_USD must be a non-negative amount, got {wallet_min_usd}"
            ))
            .into());
        }
        let price_ttl_secs =
            parse_number::<u64>("RADAR_PRICE_TTL_SECS", lookup("RADAR_PRICE_TTL_SECS"))?
                .unwrap_or(DEFAULT_PRICE_TTL_SECS);

        let defaults = PoolSettings::default();
        let pool = PoolSettings {
            breaker_threshold: parse_number::<u32>(
                "RADAR_BREAKER_THRESHOLD",
                lookup("RADAR_BREAKER_THRESHOLD"),
            )?
            .unwrap_or(defaults.breaker_threshold)
            .max(1),
            breaker_base_ms: parse_number::<u64>(
                "RADAR_BREAKER_BASE_MS",
                lookup("RADAR_BREAKER_BASE_MS"),
            )?
            .unwrap_or(defaults.breaker_base_ms),
            breaker_cap_ms: parse_number::<u64>(
                "RADAR_BREAKER_CAP_MS",
                lookup("RADAR_BREAKER_CAP_MS"),
            )?
            .unwrap_or(defaults.breaker_cap_ms),
            retry_base_ms: parse_number::<u64>(
                "RADAR_RETRY_BASE_MS",
                lookup("RADAR_RETRY_BASE_MS"),
            )?
            .unwrap_or(defaults.retry_base_ms),
            retry_cap_ms: parse_number::<u64>("RADAR_RETRY_CAP_MS", lookup("RADAR_RETRY_CAP_MS"))?
                .unwrap_or(defaults.retry_cap_ms),
        };

        Ok(Self {
            networks,
            db_path,
            backfill_blocks,
            batch_size,
            wallet_scan_enabled,
            wallet_sample_size,
            wallet_min_usd,
            price_ttl_secs,
            pool,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RadarError;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<RadarConfig> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        RadarConfig::load_from(move |key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults_when_environment_is_empty() {
        let cfg = load(&[]).expect("defaults load");
        assert_eq!(cfg.networks.len(), 1);
        assert_eq!(cfg.networks[0].key, "ethereum");
        assert_eq!(cfg.db_path, DEFAULT_DB_PATH);
        assert_eq!(cfg.batch_size, 5);
        assert_eq!(cfg.wallet_sample_size, 15);
        assert_eq!(cfg.price_ttl_secs, 60);
        assert!(cfg.backfill_blocks.is_none());
        assert!(!cfg.wallet_scan_enabled);
    }

    #[test]
    fn test_network_list_and_rpc_override() {
        let cfg = load(&[
            ("RADAR_NETWORKS", "bsc, polygon ,bsc"),
            ("BSC_RPC_URLS", "http://a.local:8545,https://b.local"),
            ("RADAR_WALLET_SCAN_ENABLED", "yes"),
            ("RADAR_BACKFILL_BLOCKS", "25"),
        ])
        .expect("config load");
        let keys: Vec<&str> = cfg.networks.iter().map(|n| n.key.as_str()).collect();
        assert_eq!(keys, vec!["bsc", "polygon"]);
        assert_eq!(
            cfg.networks[0].rpc_urls,
            vec!["http://a.local:8545".to_string(), "https://b.local".to_string()]
        );
        assert!(cfg.wallet_scan_enabled);
        assert_eq!(cfg.backfill_blocks, Some(25));
    }

    #[test]
    fn test_rejects_unknown_network_and_bad_urls() {
        let err = load(&[("RADAR_NETWORKS", "solana")]).expect_err("unknown network");
        assert!(matches!(err, RadarError::Config(ConfigError::Invalid(_))));

        let err = load(&[("ETHEREUM_RPC_URLS", "ws://node.local")]).expect_err("ws scheme");
        assert!(err.to_string().contains("http(s)"));

        let err = load(&[("ETHEREUM_RPC_URLS", " , ")]).expect_err("empty list");
        assert!(matches!(err, RadarError::Config(ConfigError::Missing(_))));
    }

    #[test]
    fn test_rejects_malformed_numbers() {
        assert!(load(&[("RADAR_BATCH_SIZE", "five")]).is_err());
        assert!(load(&[("RADAR_BATCH_SIZE", "0")]).is_err());
        assert!(load(&[("RADAR_WALLET_MIN_USD", "-1")]).is_err());
    }
}

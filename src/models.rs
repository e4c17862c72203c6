use alloy::primitives::{Address, B256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Record id shared by contracts and wallets: `lowercase(network + "-" + address)`.
pub fn record_id(network: &str, address: Address) -> String {
    format!("{network}-{address:#x}").to_lowercase()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    Info,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskTag {
    Safe,
    Medium,
    High,
    Critical,
}

impl RiskTag {
    /// Total over any score; callers clamp first.
    pub fn from_score(score: u8) -> Self {
        match score {
            75.. => Self::Critical,
            45..=74 => Self::High,
            20..=44 => Self::Medium,
            _ => Self::Safe,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Safe => "SAFE",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "SAFE" => Some(Self::Safe),
            "MEDIUM" => Some(Self::Medium),
            "HIGH" => Some(Self::High),
            "CRITICAL" => Some(Self::Critical),
            _ => None,
        }
    }

    pub fn is_vulnerable(&self) -> bool {
        matches!(self, Self::High | Self::Critical)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Finding {
    #[serde(rename = "type")]
    pub kind: String,
    pub severity: Severity,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<String>,
}

impl Finding {
    pub fn new(
        kind: impl Into<String>,
        severity: Severity,
        description: impl Into<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            severity,
            description: description.into(),
            evidence: None,
        }
    }

    pub fn with_evidence(mut self, evidence: impl Into<String>) -> Self {
        self.evidence = Some(evidence.into());
        self
    }
}

/// Output of the bytecode analyzer before it is bound to a deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskProfile {
    pub risk_score: u8,
    pub tag: RiskTag,
    #[serde(rename = "type")]
    pub kind: String,
    pub name: Option<String>,
    pub symbol: Option<String>,
    pub features: BTreeSet<String>,
    pub findings: Vec<Finding>,
    pub has_liquidity: bool,
    pub is_mintable: bool,
    pub is_burnable: bool,
    pub is_scam: bool,
    pub is_vulnerable: bool,
    pub bytecode_excerpt: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractRecord {
    pub id: String,
    pub address: Address,
    pub deployer: Address,
    pub network: String,
    pub block_number: u64,
    pub tx_hash: B256,
    pub timestamp: DateTime<Utc>,
    pub risk_score: u8,
    pub tag: RiskTag,
    #[serde(rename = "type")]
    pub kind: String,
    pub name: Option<String>,
    pub symbol: Option<String>,
    pub features: BTreeSet<String>,
    pub findings: Vec<Finding>,
    pub has_liquidity: bool,
    pub is_mintable: bool,
    pub is_burnable: bool,
    pub is_scam: bool,
    pub is_vulnerable: bool,
    pub bytecode_excerpt: String,
}

/// Where and when a contract was created, as seen by the deployment detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deployment {
    pub address: Address,
    pub deployer: Address,
    pub block_number: u64,
    pub tx_hash: B256,
    /// Block timestamp, seconds since epoch.
    pub timestamp: u64,
}

impl ContractRecord {
    pub fn from_profile(network: &str, deployment: &Deployment, profile: RiskProfile) -> Self {
        let timestamp = DateTime::<Utc>::from_timestamp(to_i64_secs(deployment.timestamp), 0)
            .unwrap_or_default();
        Self {
            id: record_id(network, deployment.address),
            address: deployment.address,
            deployer: deployment.deployer,
            network: network.to_string(),
            block_number: deployment.block_number,
            tx_hash: deployment.tx_hash,
            timestamp,
            risk_score: profile.risk_score,
            tag: profile.tag,
            kind: profile.kind,
            name: profile.name,
            symbol: profile.symbol,
            features: profile.features,
            findings: profile.findings,
            has_liquidity: profile.has_liquidity,
            is_mintable: profile.is_mintable,
            is_burnable: profile.is_burnable,
            is_scam: profile.is_scam,
            is_vulnerable: profile.is_vulnerable,
            bytecode_excerpt: profile.bytecode_excerpt,
        }
    }
}

fn to_i64_secs(secs: u64) -> i64 {
    i64::try_from(secs).unwrap_or(i64::MAX / 1_000)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletRecord {
    pub id: String,
    pub address: Address,
    pub network: String,
    pub balance_native: f64,
    pub balance_usd: f64,
    pub last_seen: DateTime<Utc>,
    pub is_multisig: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::address;

    #[test]
    fn test_record_id_is_lowercase_network_dash_address() {
        let addr = address!("C02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2");
        assert_eq!(
            record_id("BSC", addr),
            "bsc-0xc02aaa39b223fe8d0a0e5c4f27ead9083c756cc2"
        );
    }

    #[test]
    fn test_tag_boundaries() {
        assert_eq!(RiskTag::from_score(0), RiskTag::Safe);
        assert_eq!(RiskTag::from_score(19), RiskTag::Safe);
        assert_eq!(RiskTag::from_score(20), RiskTag::Medium);
        assert_eq!(RiskTag::from_score(44), RiskTag::Medium);
        assert_eq!(RiskTag::from_score(45), RiskTag::High);
        assert_eq!(RiskTag::from_score(74), RiskTag::High);
        assert_eq!(RiskTag::from_score(75), RiskTag::Critical);
        assert_eq!(RiskTag::from_score(100), RiskTag::Critical);
    }

    #[test]
    fn test_wire_shape_is_camel_case_with_uppercase_enums() {
        let deployment = Deployment {
            address: Address::repeat_byte(0x11),
            deployer: Address::repeat_byte(0x22),
            block_number: 7,
            tx_hash: B256::repeat_byte(0x33),
            timestamp: 1_700_000_000,
        };
        let profile = RiskProfile {
            risk_score: 80,
            tag: RiskTag::Critical,
            kind: "Token".to_string(),
            name: Some("Demo".to_string()),
            symbol: Some("DMO".to_string()),
            features: BTreeSet::from(["Mintable".to_string()]),
            findings: vec![Finding::new("Honeypot Risk", Severity::Critical, "revert strings")],
            has_liquidity: false,
            is_mintable: true,
            is_burnable: false,
            is_scam: true,
            is_vulnerable: true,
            bytecode_excerpt: "0x6080".to_string(),
        };
        let record = ContractRecord::from_profile("ethereum", &deployment, profile);
        let json = serde_json::to_value(&record).expect("serialize");

        assert_eq!(json["blockNumber"], 7);
        assert_eq!(json["riskScore"], 80);
        assert_eq!(json["tag"], "CRITICAL");
        assert_eq!(json["type"], "Token");
        assert_eq!(json["isScam"], true);
        assert_eq!(json["findings"][0]["severity"], "CRITICAL");
        assert_eq!(json["findings"][0]["type"], "Honeypot Risk");
        assert!(json["findings"][0].get("evidence").is_none());
        assert_eq!(json["timestamp"], "2023-11-14T22:13:20Z");

        let back: ContractRecord = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back, record);
    }
}

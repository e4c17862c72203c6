//! Bytecode risk analyzer: fetches a contract's runtime code and scores it through a fixed
//! sequence of pattern stages.
//!
//! Stage order matters only for the running score, which every stage may raise and the liquidity
//! stage may lower once. The final score is clamped to `[0, 100]` and the tag derived from it.
//! Probe failures (metadata, liquidity) never surface; any other failure ends the pipeline early
//! and the profile built so far is returned with an `Analysis Incomplete` finding.

pub mod liquidity;
pub mod metadata;
pub mod patterns;
pub mod scoring;

use crate::config::chains::NetworkConfig;
use crate::error::RpcError;
use crate::models::{Finding, RiskProfile, Severity};
use crate::rpc::client::ChainClient;
use alloy::primitives::{Address, U256};
use patterns::{CodeFingerprint, LP_ROUTER_SELECTORS, SEL_BURN, SEL_MINT, SEL_OWNER};
use scoring::{
    ScoreCard, CENTRALIZED_MINT_WEIGHT, HONEYPOT_WEIGHT, PROXY_WEIGHT, RISKY_DEPLOYER_WEIGHT,
};
use std::collections::BTreeSet;
use std::time::Duration;

pub const KIND_DESTRUCTED: &str = "Destructed/EOA";
pub const KIND_PROXY: &str = "Proxy";
pub const KIND_TOKEN: &str = "Token";
pub const KIND_CONTRACT: &str = "Contract";

/// 0.01 native unit.
pub const MIN_DEPLOYER_BALANCE_WEI: u128 = 10_000_000_000_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnalyzerSettings {
    pub metadata_timeout: Duration,
    pub min_deployer_balance_wei: U256,
}

impl Default for AnalyzerSettings {
    fn default() -> Self {
        Self {
            metadata_timeout: metadata::METADATA_TIMEOUT,
            min_deployer_balance_wei: U256::from(MIN_DEPLOYER_BALANCE_WEI),
        }
    }
}

#[derive(Debug, Default)]
struct ProfileDraft {
    score: ScoreCard,
    kind: Option<String>,
    name: Option<String>,
    symbol: Option<String>,
    features: BTreeSet<String>,
    findings: Vec<Finding>,
    has_liquidity: bool,
    is_mintable: bool,
    is_burnable: bool,
    bytecode_excerpt: Option<String>,
}

impl ProfileDraft {
    fn finding(
        &mut self,
        kind: &str,
        severity: Severity,
        description: &str,
        evidence: Option<String>,
    ) {
        let finding = Finding::new(kind, severity, description);
        self.findings.push(match evidence {
            Some(evidence) => finding.with_evidence(evidence),
            None => finding,
        });
    }

    fn finish(self) -> RiskProfile {
        let (risk_score, tag) = self.score.finalize();
        RiskProfile {
            risk_score,
            tag,
            kind: self.kind.unwrap_or_else(|| KIND_CONTRACT.to_string()),
            name: self.name,
            symbol: self.symbol,
            features: self.features,
            findings: self.findings,
            has_liquidity: self.has_liquidity,
            is_mintable: self.is_mintable,
            is_burnable: self.is_burnable,
            is_scam: tag == crate::models::RiskTag::Critical,
            is_vulnerable: tag.is_vulnerable(),
            bytecode_excerpt: self.bytecode_excerpt.unwrap_or_else(|| "0x".to_string()),
        }
    }
}

pub struct RiskAnalyzer {
    settings: AnalyzerSettings,
}

impl Default for RiskAnalyzer {
    fn default() -> Self {
        Self::new(AnalyzerSettings::default())
    }
}

impl RiskAnalyzer {
    pub fn new(settings: AnalyzerSettings) -> Self {
        Self { settings }
    }

    /// Score `address` as deployed by `deployer` on `network`. Always returns a profile.
    pub async fn analyze(
        &self,
        client: &dyn ChainClient,
        network: &NetworkConfig,
        address: Address,
        deployer: Address,
    ) -> RiskProfile {
        let mut draft = ProfileDraft::default();
        if let Err(err) = self
            .run_stages(&mut draft, client, network, address, deployer)
            .await
        {
            tracing::warn!(
                "[ANALYZE] {} {:#x} analysis incomplete: {}",
                network.key,
                address,
                err
            );
            draft.finding(
                "Analysis Incomplete",
                Severity::Info,
                "Analysis stopped early; the profile reflects completed stages only",
                Some(err.to_string()),
            );
        }
        draft.finish()
    }

    async fn run_stages(
        &self,
        draft: &mut ProfileDraft,
        client: &dyn ChainClient,
        network: &NetworkConfig,
        address: Address,
        deployer: Address,
    ) -> Result<(), RpcError> {
        let code = client.code(address).await?;
        let fp = CodeFingerprint::new(code.as_ref());
        draft.bytecode_excerpt = Some(fp.excerpt());

        if fp.is_empty() {
            draft.kind = Some(KIND_DESTRUCTED.to_string());
            return Ok(());
        }

        if fp.looks_like_proxy() {
            draft.kind = Some(KIND_PROXY.to_string());
            draft.features.insert("Proxy".to_string());
            draft.finding(
                "Proxy Contract",
                Severity::Medium,
                "Minimal proxy or forwarding stub; behaviour lives in the implementation contract",
                Some(format!("{} bytes of runtime code", fp.byte_len())),
            );
            draft.score.add(PROXY_WEIGHT);
        }

        let is_token = fp.looks_like_token();
        if is_token {
            draft.kind = Some(KIND_TOKEN.to_string());
            let meta =
                metadata::fetch_token_metadata(client, address, self.settings.metadata_timeout)
                    .await;
            draft.name = Some(meta.name);
            draft.symbol = Some(meta.symbol);
        }

        if is_token || fp.has_transfer() {
            self.liquidity_stage(draft, client, network, address).await;
        }
        if !draft.has_liquidity && fp.contains_any(&LP_ROUTER_SELECTORS) {
            draft.has_liquidity = true;
        }

        let ownable = fp.contains(SEL_OWNER);
        if ownable {
            draft.features.insert("Ownable".to_string());
        }
        if fp.contains(SEL_MINT) {
            draft.is_mintable = true;
            draft.features.insert("Mintable".to_string());
            if ownable {
                draft.finding(
                    "Centralized Minting",
                    Severity::High,
                    "Owner-controlled mint function can inflate supply at will",
                    Some(SEL_MINT.to_string()),
                );
                draft.score.add(CENTRALIZED_MINT_WEIGHT);
            }
        }
        if fp.contains(SEL_BURN) {
            draft.is_burnable = true;
            draft.features.insert("Burnable".to_string());
        }

        if fp.has_tax_logic() {
            draft.features.insert("Tax Logic".to_string());
            draft.finding(
                "Tax Logic",
                Severity::Low,
                "Percentage arithmetic next to transfer suggests a transfer fee",
                Some(patterns::TAX_ARITHMETIC.to_string()),
            );
        }

        if fp.honeypot_shape() {
            draft.finding(
                "Honeypot Risk",
                Severity::Critical,
                "Small contract that emits custom revert reasons; sells may be blocked",
                Some(format!("{} bytes", fp.byte_len())),
            );
            draft.score.add(HONEYPOT_WEIGHT);
        }

        let balance = client.balance(deployer).await?;
        if balance < self.settings.min_deployer_balance_wei {
            draft.finding(
                "High Risk Deployer",
                Severity::High,
                "Deployer holds almost no native balance (fresh or drained wallet)",
                Some(format!("{balance} wei")),
            );
            draft.score.add(RISKY_DEPLOYER_WEIGHT);
        }

        Ok(())
    }

    async fn liquidity_stage(
        &self,
        draft: &mut ProfileDraft,
        client: &dyn ChainClient,
        network: &NetworkConfig,
        token: Address,
    ) {
        let Some((factory, wrapped)) = network.liquidity_probe() else {
            return;
        };
        match liquidity::probe_pair_liquidity(client, factory, wrapped, token).await {
            Ok(Some(pair)) if pair.native_reserve > U256::ZERO => {
                draft.has_liquidity = true;
                draft.features.insert(format!(
                    "Liquidity: {} {}",
                    liquidity::format_native_amount(pair.native_reserve),
                    network.wrapped_native_symbol
                ));
                if pair.native_reserve > U256::from(liquidity::ONE_NATIVE_WEI) {
                    draft.score.apply_liquidity_discount();
                }
            }
            Ok(_) => {}
            Err(err) => {
                tracing::debug!(
                    "[ANALYZE] {} liquidity probe for {:#x} failed: {}",
                    network.key,
                    token,
                    err
                );
            }
        }
    }
}

use crate::models::RiskTag;

pub const BASE_SCORE: i32 = 10;
pub const PROXY_WEIGHT: i32 = 25;
pub const CENTRALIZED_MINT_WEIGHT: i32 = 30;
pub const HONEYPOT_WEIGHT: i32 = 50;
pub const RISKY_DEPLOYER_WEIGHT: i32 = 30;
/// Deep liquidity against the wrapped native token lowers the score once.
pub const LIQUIDITY_DISCOUNT: i32 = 20;

pub fn clamp_score(raw: i32) -> u8 {
    raw.clamp(0, 100) as u8
}

pub fn tag_for(score: u8) -> RiskTag {
    RiskTag::from_score(score)
}

/// Running score for one analysis. Stages only add, except the single liquidity discount, which
/// floors at zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoreCard {
    raw: i32,
    discounted: bool,
}

impl Default for ScoreCard {
    fn default() -> Self {
        Self {
            raw: BASE_SCORE,
            discounted: false,
        }
    }
}

impl ScoreCard {
    pub fn add(&mut self, weight: i32) {
        self.raw = self.raw.saturating_add(weight.max(0));
    }

    pub fn apply_liquidity_discount(&mut self) {
        if self.discounted {
            return;
        }
        self.raw = (self.raw - LIQUIDITY_DISCOUNT).max(0);
        self.discounted = true;
    }

    pub fn raw(&self) -> i32 {
        self.raw
    }

    pub fn finalize(&self) -> (u8, RiskTag) {
        let score = clamp_score(self.raw);
        (score, tag_for(score))
    }
}

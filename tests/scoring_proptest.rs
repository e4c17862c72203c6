use chain_radar::analyzer::scoring::{
    clamp_score, tag_for, ScoreCard, CENTRALIZED_MINT_WEIGHT, HONEYPOT_WEIGHT, PROXY_WEIGHT,
    RISKY_DEPLOYER_WEIGHT,
};
use chain_radar::models::RiskTag;
use proptest::prelude::*;
use proptest::test_runner::{Config as ProptestConfig, TestCaseError, TestRunner};

const WEIGHTS: [i32; 4] = [
    PROXY_WEIGHT,
    CENTRALIZED_MINT_WEIGHT,
    HONEYPOT_WEIGHT,
    RISKY_DEPLOYER_WEIGHT,
];

fn expected_tag(score: u8) -> RiskTag {
    if score >= 75 {
        RiskTag::Critical
    } else if score >= 45 {
        RiskTag::High
    } else if score >= 20 {
        RiskTag::Medium
    } else {
        RiskTag::Safe
    }
}

#[test]
fn test_tag_mapping_is_total_over_score_range() {
    for score in 0..=100u8 {
        let tag = tag_for(score);
        assert_eq!(tag, expected_tag(score), "score {score}");
        assert_eq!(tag_for(score), tag);
        assert_eq!(RiskTag::parse(tag.as_str()), Some(tag));
    }
}

#[test]
fn test_scorecard_stays_clamped_proptest() {
    let mut runner = TestRunner::new(ProptestConfig {
        cases: 2_000,
        ..ProptestConfig::default()
    });

    let stages = prop::collection::vec(prop::sample::select(WEIGHTS.to_vec()), 0..8);
    let strategy = (stages, any::<bool>(), 0usize..8);

    let result = runner.run(&strategy, |(weights, discount, discount_at)| {
        let mut card = ScoreCard::default();
        for (i, weight) in weights.iter().enumerate() {
            if discount && i == discount_at {
                card.apply_liquidity_discount();
            }
            card.add(*weight);
        }
        let (score, tag) = card.finalize();
        if score > 100 {
            return Err(TestCaseError::fail(format!("score {score} out of range")));
        }
        if tag != expected_tag(score) {
            return Err(TestCaseError::fail(format!("score {score} mapped to {tag:?}")));
        }
        if !discount && score < 10 {
            return Err(TestCaseError::fail(format!(
                "score {score} below base without a discount: {weights:?}"
            )));
        }
        Ok(())
    });

    if let Err(err) = result {
        panic!("scorecard proptest failed: {err}");
    }
}

#[test]
fn test_clamp_score_proptest() {
    let mut runner = TestRunner::new(ProptestConfig::default());
    let result = runner.run(&any::<i32>(), |raw| {
        let clamped = clamp_score(raw);
        let expected = raw.clamp(0, 100) as u8;
        if clamped != expected {
            return Err(TestCaseError::fail(format!("{raw} clamped to {clamped}")));
        }
        Ok(())
    });
    if let Err(err) = result {
        panic!("clamp proptest failed: {err}");
    }
}

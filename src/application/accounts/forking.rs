//! Forking opportunity assessment. The decision itself still goes through
//! the Rules Engine; this module only measures the opportunity and scores
//! its confidence.

use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal_macros::dec;
use serde::Serialize;

use crate::domain::accounts::Account;
use crate::domain::constitution::SleevePolicy;
use crate::domain::types::{AccountId, Sleeve, SystemPosture};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ForkingUrgency {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize)]
pub struct ForkingOpportunity {
    pub account_id: AccountId,
    pub sleeve: Sleeve,
    pub threshold: Decimal,
    pub excess_capital: Decimal,
    pub recommended_amount: Decimal,
    pub confidence: Decimal,
    pub urgency: ForkingUrgency,
}

/// Assess whether the account presents a forking opportunity. None when the
/// sleeve does not fork or the balance is under threshold.
pub fn assess(
    account: &Account,
    policy: &SleevePolicy,
    posture: SystemPosture,
    win_rate: Option<f64>,
) -> Option<ForkingOpportunity> {
    let threshold = policy.fork_threshold?;
    if account.current_value < threshold {
        return None;
    }
    let excess = account.current_value - threshold;
    let excess_ratio = excess / threshold;

    // Confidence is the mean of three factors: excess depth, realized
    // performance, and system posture.
    let excess_factor = (dec!(0.5) + excess_ratio).min(Decimal::ONE);
    let performance_factor = win_rate
        .and_then(Decimal::from_f64)
        .unwrap_or(dec!(0.60))
        .clamp(Decimal::ZERO, Decimal::ONE);
    let posture_factor = match posture {
        SystemPosture::Active => dec!(0.90),
        SystemPosture::HedgedWeek => dec!(0.50),
        SystemPosture::Safe | SystemPosture::KillSwitch => dec!(0.20),
    };
    let confidence =
        ((excess_factor + performance_factor + posture_factor) / dec!(3)).clamp(Decimal::ZERO, Decimal::ONE);

    // The base fork amount is the threshold itself; a deep excess adds a
    // bounded bump so the child is not born undercapitalized.
    let mut recommended = threshold;
    if excess > threshold * dec!(0.5) {
        recommended += (excess * dec!(0.3)).min(threshold * dec!(0.2));
    }
    recommended = recommended.min(account.current_value);

    let urgency = if excess_ratio >= dec!(0.5) {
        ForkingUrgency::High
    } else if excess_ratio >= dec!(0.2) {
        ForkingUrgency::Medium
    } else {
        ForkingUrgency::Low
    };

    Some(ForkingOpportunity {
        account_id: account.id,
        sleeve: account.sleeve,
        threshold,
        excess_capital: excess,
        recommended_amount: recommended,
        confidence,
        urgency,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::constitution::Constitution;
    use chrono::Utc;

    fn account_with(value: Decimal) -> Account {
        let mut account = Account::new(Sleeve::Gen, value, Utc::now());
        account.state = crate::domain::accounts::AccountState::Active;
        account
    }

    #[test]
    fn below_threshold_is_no_opportunity() {
        let constitution = Constitution::builtin();
        let account = account_with(dec!(99999));
        assert!(
            assess(
                &account,
                constitution.sleeve(Sleeve::Gen),
                SystemPosture::Active,
                None,
            )
            .is_none()
        );
    }

    #[test]
    fn modest_excess_clears_the_confidence_floor_when_active() {
        let constitution = Constitution::builtin();
        let account = account_with(dec!(120000));
        let opportunity = assess(
            &account,
            constitution.sleeve(Sleeve::Gen),
            SystemPosture::Active,
            Some(0.8),
        )
        .unwrap();
        assert_eq!(opportunity.threshold, dec!(100000));
        assert_eq!(opportunity.excess_capital, dec!(20000));
        assert_eq!(opportunity.recommended_amount, dec!(100000));
        assert!(opportunity.confidence >= constitution.capital().min_fork_confidence);
        assert_eq!(opportunity.urgency, ForkingUrgency::Medium);
    }

    #[test]
    fn safe_mode_suppresses_confidence() {
        let constitution = Constitution::builtin();
        let account = account_with(dec!(120000));
        let opportunity = assess(
            &account,
            constitution.sleeve(Sleeve::Gen),
            SystemPosture::Safe,
            Some(0.8),
        )
        .unwrap();
        assert!(opportunity.confidence < constitution.capital().min_fork_confidence);
    }

    #[test]
    fn deep_excess_bumps_the_recommended_amount() {
        let constitution = Constitution::builtin();
        let account = account_with(dec!(180000));
        let opportunity = assess(
            &account,
            constitution.sleeve(Sleeve::Gen),
            SystemPosture::Active,
            None,
        )
        .unwrap();
        // Excess 80k > 50k: bump is min(80k * 0.3, 100k * 0.2) = 20k.
        assert_eq!(opportunity.recommended_amount, dec!(120000));
        assert_eq!(opportunity.urgency, ForkingUrgency::High);
    }

    #[test]
    fn com_sleeve_never_presents_an_opportunity() {
        let constitution = Constitution::builtin();
        let mut account = account_with(dec!(10000000));
        account.sleeve = Sleeve::Com;
        assert!(
            assess(
                &account,
                constitution.sleeve(Sleeve::Com),
                SystemPosture::Active,
                None,
            )
            .is_none()
        );
    }
}

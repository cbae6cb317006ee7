//! Roll economics: whether rolling a breached short option is still cheaper
//! than taking the exit.

use rust_decimal::Decimal;

/// Inputs are whole-position dollar amounts.
#[derive(Debug, Clone, PartialEq)]
pub struct RollEconomics {
    /// Opening premium minus the current cost to close.
    pub remaining_credit: Decimal,
    /// Net debit of the roll: close the current leg, open the new one.
    pub roll_cost: Decimal,
    /// `roll_cost / remaining_credit`; None when there is no credit left.
    pub ratio: Option<Decimal>,
    /// True when the roll is forbidden and the position must exit via L3.
    pub forces_exit: bool,
}

pub fn assess_roll(
    opening_premium: Decimal,
    cost_to_close: Decimal,
    new_open_credit: Decimal,
    threshold: Decimal,
) -> RollEconomics {
    let remaining_credit = opening_premium - cost_to_close;
    let roll_cost = cost_to_close - new_open_credit;

    if remaining_credit <= Decimal::ZERO {
        return RollEconomics {
            remaining_credit,
            roll_cost,
            ratio: None,
            forces_exit: true,
        };
    }

    let ratio = roll_cost / remaining_credit;
    RollEconomics {
        remaining_credit,
        roll_cost,
        ratio: Some(ratio),
        // Exactly the threshold is still a permitted roll.
        forces_exit: ratio > threshold,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn cheap_roll_is_permitted() {
        let econ = assess_roll(dec!(2500), dec!(1500), dec!(1200), dec!(0.50));
        assert_eq!(econ.remaining_credit, dec!(1000));
        assert_eq!(econ.roll_cost, dec!(300));
        assert_eq!(econ.ratio, Some(dec!(0.3)));
        assert!(!econ.forces_exit);
    }

    #[test]
    fn ratio_exactly_at_threshold_is_permitted() {
        let econ = assess_roll(dec!(2000), dec!(1000), dec!(500), dec!(0.50));
        assert_eq!(econ.ratio, Some(dec!(0.5)));
        assert!(!econ.forces_exit);
    }

    #[test]
    fn expensive_roll_forces_exit() {
        // Remaining credit $1.00/contract, roll cost $0.55.
        let econ = assess_roll(dec!(2.00), dec!(1.00), dec!(0.45), dec!(0.50));
        assert_eq!(econ.remaining_credit, dec!(1.00));
        assert_eq!(econ.roll_cost, dec!(0.55));
        assert!(econ.forces_exit);
    }

    #[test]
    fn exhausted_credit_forces_exit() {
        let econ = assess_roll(dec!(2500), dec!(2600), dec!(1000), dec!(0.50));
        assert!(econ.remaining_credit < Decimal::ZERO);
        assert_eq!(econ.ratio, None);
        assert!(econ.forces_exit);
    }

    #[test]
    fn credit_roll_has_negative_cost() {
        let econ = assess_roll(dec!(2500), dec!(1500), dec!(1800), dec!(0.50));
        assert_eq!(econ.roll_cost, dec!(-300));
        assert!(!econ.forces_exit);
    }
}

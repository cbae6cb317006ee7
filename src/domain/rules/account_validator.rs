use crate::domain::accounts::AccountState;
use crate::domain::constitution::{Constitution, sleeves};
use crate::domain::rules::action::ProposedAction;
use crate::domain::rules::decision::Decision;
use crate::domain::rules::validator::RuleValidator;

/// Sleeve-level admission: the account must be ACTIVE, the instrument must be
/// on the sleeve's permitted list, and the strategy must be the one the
/// sleeve writes.
pub struct AccountValidator;

impl RuleValidator for AccountValidator {
    fn name(&self) -> &'static str {
        "account"
    }

    fn applies_to(&self, action: &ProposedAction) -> bool {
        matches!(action, ProposedAction::OpenPosition(_))
    }

    fn evaluate(&self, action: &ProposedAction, constitution: &Constitution) -> Decision {
        let ProposedAction::OpenPosition(open) = action else {
            return Decision::approved();
        };
        let policy = constitution.sleeve(open.sleeve);
        let mut decision = Decision::approved();

        if open.account_state != AccountState::Active {
            decision = decision.merge(Decision::reject(
                "§9.States.OpenGate",
                format!(
                    "account {} is {}; new opens require ACTIVE",
                    open.account_id, open.account_state
                ),
            ));
        }

        if policy.permits_instrument(&open.symbol) {
            decision = decision.merge(Decision::approve(
                sleeves::instruments_clause(open.sleeve),
                format!("{} is a permitted {} instrument", open.symbol, open.sleeve),
            ));
        } else {
            decision = decision.merge(Decision::reject(
                sleeves::instruments_clause(open.sleeve),
                format!("{} is not permitted for the {} sleeve", open.symbol, open.sleeve),
            ));
        }

        if open.strategy == policy.strategy {
            decision = decision.merge(Decision::approve(
                sleeves::strategy_clause(open.sleeve),
                format!("{} matches the sleeve strategy", open.strategy),
            ));
        } else {
            decision = decision.merge(Decision::reject(
                sleeves::strategy_clause(open.sleeve),
                format!(
                    "{} sleeve writes {}, proposed {}",
                    open.sleeve, policy.strategy, open.strategy
                ),
            ));
        }

        decision
    }

    fn priority(&self) -> u8 {
        10
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::rules::action::test_fixtures::gen_open;
    use crate::domain::types::StrategyKind;

    #[test]
    fn approves_permitted_open() {
        let constitution = Constitution::builtin();
        let action = ProposedAction::OpenPosition(gen_open());
        let decision = AccountValidator.evaluate(&action, &constitution);
        assert!(decision.is_approved());
        assert!(decision
            .clause_refs()
            .contains(&"§2.GenAcc.Instruments".to_string()));
    }

    #[test]
    fn rejects_unknown_instrument() {
        let constitution = Constitution::builtin();
        let mut open = gen_open();
        open.symbol = "GME".to_string();
        let decision =
            AccountValidator.evaluate(&ProposedAction::OpenPosition(open), &constitution);
        assert!(decision.is_rejected());
    }

    #[test]
    fn rejects_wrong_strategy_for_sleeve() {
        let constitution = Constitution::builtin();
        let mut open = gen_open();
        open.strategy = StrategyKind::Cc;
        let decision =
            AccountValidator.evaluate(&ProposedAction::OpenPosition(open), &constitution);
        assert!(decision.is_rejected());
    }

    #[test]
    fn rejects_open_while_safe() {
        let constitution = Constitution::builtin();
        let mut open = gen_open();
        open.account_state = AccountState::Safe;
        let decision =
            AccountValidator.evaluate(&ProposedAction::OpenPosition(open), &constitution);
        assert!(decision.is_rejected());
    }
}

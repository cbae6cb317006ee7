//! Consolidation: the inverse of a fork. The child's open positions are
//! re-parented, its capital folds back into the parent, and the child ends
//! SUSPENDED (absorbing in-process).

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;

use crate::domain::accounts::{AccountLedger, AccountState};
use crate::domain::errors::AccountError;
use crate::domain::positions::Position;
use crate::domain::types::{AccountId, PositionId};

#[derive(Debug, Clone, Serialize)]
pub struct ConsolidationOutcome {
    pub parent_id: AccountId,
    pub child_id: AccountId,
    pub transferred: Decimal,
    pub repointed_positions: Vec<PositionId>,
}

/// Merge a child back into its parent. The caller drives the parent's
/// MERGING transitions and writes the audit seal.
pub fn consolidate(
    ledger: &mut AccountLedger,
    positions: &mut HashMap<PositionId, Position>,
    child_id: AccountId,
    now: DateTime<Utc>,
) -> Result<ConsolidationOutcome, AccountError> {
    let child = ledger.get(child_id)?.clone();
    let Some(parent_id) = child.parent_id else {
        return Err(AccountError::InvariantViolation {
            id: child_id,
            detail: "consolidation target has no parent".to_string(),
        });
    };
    if child.reserved_capital > Decimal::ZERO {
        return Err(AccountError::InvariantViolation {
            id: child_id,
            detail: format!(
                "child still holds ${} reserved; close or release before merging",
                child.reserved_capital
            ),
        });
    }

    let repointed: Vec<PositionId> = child.position_ids.clone();
    for position_id in &repointed {
        if let Some(position) = positions.get_mut(position_id) {
            position.account_id = parent_id;
        }
    }

    let transferred = child.current_value;
    {
        let parent = ledger.get_mut(parent_id)?;
        parent.current_value += transferred;
        parent.position_ids.extend(repointed.iter().copied());
        parent.last_activity = now;
    }
    {
        let child = ledger.get_mut(child_id)?;
        child.current_value = Decimal::ZERO;
        child.position_ids.clear();
        child.transition(AccountState::Suspended, now)?;
    }

    Ok(ConsolidationOutcome {
        parent_id,
        child_id,
        transferred,
        repointed_positions: repointed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::accounts::Account;
    use crate::domain::types::Sleeve;
    use rust_decimal_macros::dec;

    #[test]
    fn merge_folds_capital_and_suspends_the_child() {
        let now = Utc::now();
        let mut ledger = AccountLedger::new();
        let parent = Account::new(Sleeve::Gen, dec!(50000), now);
        let parent_id = ledger.insert(parent).unwrap();
        let child = Account::child_of(ledger.get(parent_id).unwrap(), dec!(110000), now);
        let child_id = ledger.insert(child).unwrap();

        let mut positions = HashMap::new();
        let outcome = consolidate(&mut ledger, &mut positions, child_id, now).unwrap();

        assert_eq!(outcome.parent_id, parent_id);
        assert_eq!(outcome.transferred, dec!(110000));
        assert_eq!(ledger.get(parent_id).unwrap().current_value, dec!(160000));
        let child = ledger.get(child_id).unwrap();
        assert_eq!(child.state, AccountState::Suspended);
        assert_eq!(child.current_value, Decimal::ZERO);
    }

    #[test]
    fn reserved_capital_blocks_the_merge() {
        let now = Utc::now();
        let mut ledger = AccountLedger::new();
        let parent = Account::new(Sleeve::Gen, dec!(50000), now);
        let parent_id = ledger.insert(parent).unwrap();
        let mut child = Account::child_of(ledger.get(parent_id).unwrap(), dec!(110000), now);
        child.reserve(dec!(10000), now).unwrap();
        let child_id = ledger.insert(child).unwrap();

        let mut positions = HashMap::new();
        let err = consolidate(&mut ledger, &mut positions, child_id, now).unwrap_err();
        assert!(matches!(err, AccountError::InvariantViolation { .. }));
    }

    #[test]
    fn rootless_account_cannot_merge() {
        let now = Utc::now();
        let mut ledger = AccountLedger::new();
        let root = Account::new(Sleeve::Gen, dec!(50000), now);
        let root_id = ledger.insert(root).unwrap();
        let mut positions = HashMap::new();
        assert!(consolidate(&mut ledger, &mut positions, root_id, now).is_err());
    }
}

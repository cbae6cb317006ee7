//! Account entities and the in-memory ledger. Accounts form a forest via
//! parent ids; the ledger is the single arena every lookup goes through.
//! Available capital is always derived (`current − reserved`), never stored.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::domain::errors::AccountError;
use crate::domain::types::{AccountId, PositionId, Sleeve};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountState {
    Safe,
    Active,
    Forking,
    Merging,
    Suspended,
}

impl AccountState {
    /// The transition table. SUSPENDED is absorbing in-process; SAFE is
    /// reachable from every live state.
    pub fn transition_allowed(from: AccountState, to: AccountState) -> bool {
        use AccountState::*;
        if from == Suspended {
            return false;
        }
        match to {
            Safe | Suspended => true,
            Active => matches!(from, Safe | Forking | Merging),
            Forking => from == Active,
            Merging => from == Active,
        }
    }
}

impl fmt::Display for AccountState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AccountState::Safe => "SAFE",
            AccountState::Active => "ACTIVE",
            AccountState::Forking => "FORKING",
            AccountState::Merging => "MERGING",
            AccountState::Suspended => "SUSPENDED",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub sleeve: Sleeve,
    pub parent_id: Option<AccountId>,
    pub state: AccountState,
    pub initial_capital: Decimal,
    pub current_value: Decimal,
    pub reserved_capital: Decimal,
    pub position_ids: Vec<PositionId>,
    pub fork_count: u32,
    /// Premium realized this quarter, tracked for reinvestment reporting.
    pub realized_premium: Decimal,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl Account {
    pub fn new(sleeve: Sleeve, initial_capital: Decimal, now: DateTime<Utc>) -> Self {
        Self {
            id: AccountId::generate(),
            sleeve,
            parent_id: None,
            state: AccountState::Safe,
            initial_capital,
            current_value: initial_capital,
            reserved_capital: Decimal::ZERO,
            position_ids: Vec::new(),
            fork_count: 0,
            realized_premium: Decimal::ZERO,
            created_at: now,
            last_activity: now,
        }
    }

    pub fn child_of(parent: &Account, capital: Decimal, now: DateTime<Utc>) -> Self {
        let mut child = Self::new(parent.sleeve, capital, now);
        child.parent_id = Some(parent.id);
        child
    }

    /// Derived, never stored: `available + reserved == current` holds at every
    /// observable point by construction.
    pub fn available_capital(&self) -> Decimal {
        self.current_value - self.reserved_capital
    }

    pub fn reserve(&mut self, amount: Decimal, now: DateTime<Utc>) -> Result<(), AccountError> {
        if amount <= Decimal::ZERO {
            return Err(AccountError::InvariantViolation {
                id: self.id,
                detail: format!("reservation of non-positive amount {amount}"),
            });
        }
        if amount > self.available_capital() {
            return Err(AccountError::InsufficientCapital {
                id: self.id,
                need: amount,
                available: self.available_capital(),
            });
        }
        self.reserved_capital += amount;
        self.last_activity = now;
        Ok(())
    }

    pub fn release(&mut self, amount: Decimal, now: DateTime<Utc>) -> Result<(), AccountError> {
        if amount > self.reserved_capital {
            return Err(AccountError::InvariantViolation {
                id: self.id,
                detail: format!(
                    "release of {amount} exceeds reserved {}",
                    self.reserved_capital
                ),
            });
        }
        self.reserved_capital -= amount;
        self.last_activity = now;
        Ok(())
    }

    pub fn transition(&mut self, to: AccountState, now: DateTime<Utc>) -> Result<(), AccountError> {
        if !AccountState::transition_allowed(self.state, to) {
            return Err(AccountError::InvalidTransition {
                id: self.id,
                from: self.state.to_string(),
                to: to.to_string(),
            });
        }
        self.state = to;
        self.last_activity = now;
        Ok(())
    }

    /// Reserved must never exceed current value.
    pub fn check_invariants(&self) -> Result<(), AccountError> {
        if self.reserved_capital > self.current_value {
            return Err(AccountError::InvariantViolation {
                id: self.id,
                detail: format!(
                    "reserved {} exceeds current value {}",
                    self.reserved_capital, self.current_value
                ),
            });
        }
        if self.reserved_capital < Decimal::ZERO {
            return Err(AccountError::InvariantViolation {
                id: self.id,
                detail: format!("negative reserved capital {}", self.reserved_capital),
            });
        }
        Ok(())
    }
}

/// Arena of accounts addressed by stable id. Parent links are values; all
/// traversal is by lookup, so the tree cannot hold dangling references.
#[derive(Debug, Default, Clone)]
pub struct AccountLedger {
    accounts: HashMap<AccountId, Account>,
}

impl AccountLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, account: Account) -> Result<AccountId, AccountError> {
        if let Some(parent_id) = account.parent_id {
            if !self.accounts.contains_key(&parent_id) {
                return Err(AccountError::Unknown { id: parent_id });
            }
            if self.would_cycle(account.id, parent_id) {
                return Err(AccountError::CyclicParent { id: account.id });
            }
        }
        let id = account.id;
        self.accounts.insert(id, account);
        Ok(id)
    }

    fn would_cycle(&self, new_id: AccountId, parent_id: AccountId) -> bool {
        let mut cursor = Some(parent_id);
        while let Some(id) = cursor {
            if id == new_id {
                return true;
            }
            cursor = self.accounts.get(&id).and_then(|a| a.parent_id);
        }
        false
    }

    pub fn get(&self, id: AccountId) -> Result<&Account, AccountError> {
        self.accounts.get(&id).ok_or(AccountError::Unknown { id })
    }

    pub fn get_mut(&mut self, id: AccountId) -> Result<&mut Account, AccountError> {
        self.accounts
            .get_mut(&id)
            .ok_or(AccountError::Unknown { id })
    }

    pub fn children_of(&self, id: AccountId) -> Vec<&Account> {
        self.accounts
            .values()
            .filter(|a| a.parent_id == Some(id))
            .collect()
    }

    pub fn root_of(&self, id: AccountId) -> Result<AccountId, AccountError> {
        let mut cursor = self.get(id)?;
        while let Some(parent_id) = cursor.parent_id {
            cursor = self.get(parent_id)?;
        }
        Ok(cursor.id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Account> {
        self.accounts.values()
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    /// Consistent point-in-time copy for query callers.
    pub fn snapshot(&self) -> Vec<Account> {
        let mut accounts: Vec<Account> = self.accounts.values().cloned().collect();
        accounts.sort_by_key(|a| a.created_at);
        accounts
    }
}

//! Typed action contexts. Each proposed action carries every fact its
//! validators need, constructed at the boundary; there are no open-ended
//! key/value bags in the evaluation path.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::accounts::AccountState;
use crate::domain::constitution::LadderRung;
use crate::domain::positions::CONTRACT_MULTIPLIER;
use crate::domain::types::{AccountId, PositionId, Sleeve, StrategyKind};

/// Liquidity facts for the instrument being traded, sampled at proposal time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiquiditySnapshot {
    pub open_interest: i64,
    pub daily_volume: i64,
    pub bid: Decimal,
    pub ask: Decimal,
    pub avg_daily_volume: i64,
}

impl LiquiditySnapshot {
    pub fn mid(&self) -> Decimal {
        (self.bid + self.ask) / Decimal::TWO
    }

    pub fn spread_pct(&self) -> Decimal {
        let mid = self.mid();
        if mid <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        (self.ask - self.bid) / mid
    }
}

/// Capital facts for the proposing sleeve account, sampled at proposal time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapitalSnapshot {
    /// Total sleeve capital (account current value).
    pub sleeve_capital: Decimal,
    /// Notional already deployed or reserved.
    pub deployed_notional: Decimal,
    /// Existing notional in the proposed symbol.
    pub symbol_notional: Decimal,
    pub margin_used: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenPositionAction {
    pub account_id: AccountId,
    pub account_state: AccountState,
    pub sleeve: Sleeve,
    pub symbol: String,
    pub strategy: StrategyKind,
    pub delta: Decimal,
    pub dte: u32,
    /// Gen sleeve stress-test mode widens the admitted DTE band.
    pub stress_mode: bool,
    pub contracts: i64,
    pub strike: Decimal,
    pub option_mid: Decimal,
    pub proposed_at: DateTime<Utc>,
    pub liquidity: LiquiditySnapshot,
    pub capital: CapitalSnapshot,
}

impl OpenPositionAction {
    /// Collateral the open would add: strike notional for short options.
    pub fn added_notional(&self) -> Decimal {
        self.strike * Decimal::from(self.contracts) * CONTRACT_MULTIPLIER
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    ProtocolExit,
    Expiry,
    ProfitTarget,
    Assignment,
    Operator,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosePositionAction {
    pub account_id: AccountId,
    pub position_id: PositionId,
    pub sleeve: Sleeve,
    pub symbol: String,
    pub strategy: StrategyKind,
    pub reason: CloseReason,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollPositionAction {
    pub account_id: AccountId,
    pub position_id: PositionId,
    pub sleeve: Sleeve,
    pub symbol: String,
    pub strategy: StrategyKind,
    pub new_delta: Decimal,
    pub new_dte: u32,
    /// Opening premium minus current cost to close, per the whole position.
    pub remaining_credit: Decimal,
    /// Cost to close current plus cost to open the target.
    pub roll_cost: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForkAccountAction {
    pub account_id: AccountId,
    pub sleeve: Sleeve,
    pub account_state: AccountState,
    pub current_value: Decimal,
    pub fork_in_progress: bool,
    pub fork_count: u32,
    /// Opportunity confidence from the forking decision engine, in [0,1].
    pub confidence: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HedgeInstrumentKind {
    SpxPut,
    VixCall,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeployHedgeAction {
    pub vix: Decimal,
    pub instrument: HedgeInstrumentKind,
    pub symbol: String,
    pub delta: Decimal,
    pub dte: u32,
    pub cost: Decimal,
    pub hedge_book_notional: Decimal,
    pub total_capital: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountTransitionAction {
    pub account_id: AccountId,
    pub from: AccountState,
    pub to: AccountState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LadderEntryAction {
    pub account_id: AccountId,
    pub rung: LadderRung,
    pub symbol: String,
    pub delta: Decimal,
    pub months_to_expiry: u32,
}

/// The closed set of actions the Rules Engine evaluates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ProposedAction {
    OpenPosition(OpenPositionAction),
    ClosePosition(ClosePositionAction),
    RollPosition(RollPositionAction),
    ForkAccount(ForkAccountAction),
    DeployHedge(DeployHedgeAction),
    AccountTransition(AccountTransitionAction),
    LadderEntry(LadderEntryAction),
}

impl ProposedAction {
    pub fn kind(&self) -> &'static str {
        match self {
            ProposedAction::OpenPosition(_) => "open_position",
            ProposedAction::ClosePosition(_) => "close_position",
            ProposedAction::RollPosition(_) => "roll_position",
            ProposedAction::ForkAccount(_) => "fork_account",
            ProposedAction::DeployHedge(_) => "deploy_hedge",
            ProposedAction::AccountTransition(_) => "account_transition",
            ProposedAction::LadderEntry(_) => "ladder_entry",
        }
    }

    /// Entity ids this action concerns, recorded on the audit trail.
    pub fn subject_ids(&self) -> Vec<String> {
        match self {
            ProposedAction::OpenPosition(a) => {
                vec![a.account_id.to_string(), a.symbol.clone()]
            }
            ProposedAction::ClosePosition(a) => {
                vec![a.account_id.to_string(), a.position_id.to_string()]
            }
            ProposedAction::RollPosition(a) => {
                vec![a.account_id.to_string(), a.position_id.to_string()]
            }
            ProposedAction::ForkAccount(a) => vec![a.account_id.to_string()],
            ProposedAction::DeployHedge(a) => vec![a.symbol.clone()],
            ProposedAction::AccountTransition(a) => vec![a.account_id.to_string()],
            ProposedAction::LadderEntry(a) => {
                vec![a.account_id.to_string(), a.symbol.clone()]
            }
        }
    }
}

/// Canonical action fixtures shared by validator tests. The open fixture is
/// a Thursday-morning Gen CSP that clears every guard in the builtin
/// document: post-trade deployment lands at 0.975, symbol exposure at 0.225.
#[cfg(test)]
pub mod test_fixtures {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    pub fn gen_open() -> OpenPositionAction {
        OpenPositionAction {
            account_id: AccountId::generate(),
            account_state: AccountState::Active,
            sleeve: Sleeve::Gen,
            symbol: "SPY".to_string(),
            strategy: StrategyKind::Csp,
            delta: dec!(0.42),
            dte: 1,
            stress_mode: false,
            contracts: 5,
            strike: dec!(450),
            option_mid: dec!(2.50),
            // A Thursday inside the Gen 09:45-11:00 window.
            proposed_at: Utc.with_ymd_and_hms(2025, 6, 5, 10, 0, 0).unwrap(),
            liquidity: LiquiditySnapshot {
                open_interest: 5000,
                daily_volume: 1000,
                bid: dec!(2.485),
                ask: dec!(2.515),
                avg_daily_volume: 20000,
            },
            capital: CapitalSnapshot {
                sleeve_capital: dec!(1000000),
                deployed_notional: dec!(750000),
                symbol_notional: dec!(0),
                margin_used: dec!(0),
            },
        }
    }

    pub fn gen_roll() -> RollPositionAction {
        RollPositionAction {
            account_id: AccountId::generate(),
            position_id: PositionId::generate(),
            sleeve: Sleeve::Gen,
            symbol: "SPY".to_string(),
            strategy: StrategyKind::Csp,
            new_delta: dec!(0.42),
            new_dte: 1,
            remaining_credit: dec!(1.00),
            roll_cost: dec!(0.40),
        }
    }

    pub fn gen_fork() -> ForkAccountAction {
        ForkAccountAction {
            account_id: AccountId::generate(),
            sleeve: Sleeve::Gen,
            account_state: AccountState::Active,
            current_value: dec!(120000),
            fork_in_progress: false,
            fork_count: 0,
            confidence: dec!(0.85),
        }
    }

    pub fn spx_hedge() -> DeployHedgeAction {
        DeployHedgeAction {
            vix: dec!(55),
            instrument: HedgeInstrumentKind::SpxPut,
            symbol: "SPX".to_string(),
            delta: dec!(0.10),
            dte: 60,
            cost: dec!(30000),
            hedge_book_notional: dec!(20000),
            total_capital: dec!(1000000),
        }
    }
}

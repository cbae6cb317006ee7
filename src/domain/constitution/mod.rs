//! The Constitution: a typed, immutable parameter document versioned as a
//! whole. Every comparison the Rules Engine makes goes through the accessors
//! here; nothing else in the crate carries policy numbers.
//!
//! The document is loaded once at startup from TOML and validated before the
//! orchestrator constructs anything else. Changing it requires a restart.

pub mod capital;
pub mod hedging;
pub mod liquidity;
pub mod llms;
pub mod protocol;
pub mod sleeves;

use chrono::{NaiveTime, Weekday};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::domain::errors::ConstitutionError;
use crate::domain::types::{Sleeve, StrategyKind};

pub use capital::CapitalPolicy;
pub use hedging::HedgePolicy;
pub use liquidity::LiquidityPolicy;
pub use llms::{LadderPolicy, LadderRung};
pub use protocol::ProtocolPolicy;
pub use sleeves::{Band, DteBand, ReinvestmentPolicy, SleevePolicy, SleeveSet, WeeklySchedule};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constitution {
    version: String,
    sleeves: SleeveSet,
    capital: CapitalPolicy,
    protocol: ProtocolPolicy,
    liquidity: LiquidityPolicy,
    hedging: HedgePolicy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    llms: Option<LadderPolicy>,
}

impl Constitution {
    /// Load and validate a constitution document from disk.
    pub fn load(path: &Path) -> Result<Self, ConstitutionError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConstitutionError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConstitutionError> {
        let parsed: Constitution =
            toml::from_str(raw).map_err(|e| ConstitutionError::Parse(e.to_string()))?;
        parsed.validate()?;
        Ok(parsed)
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn sleeves(&self) -> &SleeveSet {
        &self.sleeves
    }

    pub fn sleeve(&self, sleeve: Sleeve) -> &SleevePolicy {
        self.sleeves.policy(sleeve)
    }

    pub fn capital(&self) -> &CapitalPolicy {
        &self.capital
    }

    pub fn protocol(&self) -> &ProtocolPolicy {
        &self.protocol
    }

    pub fn liquidity(&self) -> &LiquidityPolicy {
        &self.liquidity
    }

    pub fn hedging(&self) -> &HedgePolicy {
        &self.hedging
    }

    pub fn llms(&self) -> Option<&LadderPolicy> {
        self.llms.as_ref()
    }

    fn validate(&self) -> Result<(), ConstitutionError> {
        let ratio_sum = self.sleeves.gen_ratio + self.sleeves.rev_ratio + self.sleeves.com_ratio;
        if ratio_sum != Decimal::ONE {
            return Err(ConstitutionError::RatioSum { sum: ratio_sum });
        }

        for sleeve in Sleeve::ALL {
            let policy = self.sleeves.policy(sleeve);
            if policy.delta.min >= policy.delta.max {
                return Err(ConstitutionError::InvertedBand {
                    clause: sleeves::delta_clause(sleeve),
                    min: policy.delta.min,
                    max: policy.delta.max,
                });
            }
            if policy.dte.min > policy.dte.max {
                return Err(ConstitutionError::InvalidParameter {
                    clause: sleeves::dte_clause(sleeve),
                    reason: format!("DTE band {}..{} inverted", policy.dte.min, policy.dte.max),
                });
            }
            if !policy.strategy.is_short_option() {
                return Err(ConstitutionError::InvalidParameter {
                    clause: sleeves::strategy_clause(sleeve),
                    reason: format!("sleeve strategy must be CSP or CC, got {}", policy.strategy),
                });
            }
            if policy.instruments.is_empty() {
                return Err(ConstitutionError::InvalidParameter {
                    clause: sleeves::instruments_clause(sleeve),
                    reason: "empty instrument set".to_string(),
                });
            }
            if policy.schedule.open >= policy.schedule.close {
                return Err(ConstitutionError::InvalidParameter {
                    clause: sleeves::schedule_clause(sleeve),
                    reason: "schedule window inverted".to_string(),
                });
            }
            let reinvest_sum =
                policy.reinvestment.contracts_share + policy.reinvestment.leaps_share;
            if reinvest_sum != Decimal::ONE {
                return Err(ConstitutionError::InvalidParameter {
                    clause: "§10.Reinvestment",
                    reason: format!("reinvestment shares sum to {reinvest_sum}, expected 1.0"),
                });
            }
        }

        if self.capital.deployment_min > self.capital.deployment_max
            || self.capital.deployment_min <= Decimal::ZERO
            || self.capital.deployment_max > Decimal::ONE
        {
            return Err(ConstitutionError::InvertedBand {
                clause: capital::DEPLOYMENT_CLAUSE,
                min: self.capital.deployment_min,
                max: self.capital.deployment_max,
            });
        }
        if self.capital.min_fork_confidence < Decimal::ZERO
            || self.capital.min_fork_confidence > Decimal::ONE
        {
            return Err(ConstitutionError::InvalidParameter {
                clause: "§3.Forking.Confidence",
                reason: format!(
                    "fork confidence floor {} outside [0,1]",
                    self.capital.min_fork_confidence
                ),
            });
        }
        if self.capital.slice_threshold < 1 {
            return Err(ConstitutionError::InvalidParameter {
                clause: capital::SLICE_CLAUSE,
                reason: format!("slice threshold {} below 1", self.capital.slice_threshold),
            });
        }

        if self.protocol.atr_period < 2 {
            return Err(ConstitutionError::AtrPeriod {
                period: self.protocol.atr_period,
            });
        }
        if !(self.protocol.level1_multiple < self.protocol.level2_multiple
            && self.protocol.level2_multiple < self.protocol.level3_multiple)
        {
            return Err(ConstitutionError::InvalidParameter {
                clause: protocol::ESCALATION_CLAUSE,
                reason: "breach multiples must be strictly increasing".to_string(),
            });
        }

        if !(self.hedging.vix_hedged_week < self.hedging.vix_safe_mode
            && self.hedging.vix_safe_mode < self.hedging.vix_kill_switch)
        {
            return Err(ConstitutionError::VixOrdering {
                hedged: self.hedging.vix_hedged_week,
                safe: self.hedging.vix_safe_mode,
                kill: self.hedging.vix_kill_switch,
            });
        }
        if self.hedging.budget_min_pct > self.hedging.budget_max_pct {
            return Err(ConstitutionError::InvertedBand {
                clause: hedging::BUDGET_CLAUSE,
                min: self.hedging.budget_min_pct,
                max: self.hedging.budget_max_pct,
            });
        }

        if self.liquidity.max_spread_pct <= Decimal::ZERO
            || self.liquidity.max_spread_pct >= Decimal::ONE
        {
            return Err(ConstitutionError::InvalidParameter {
                clause: liquidity::SPREAD_CLAUSE,
                reason: format!("max spread {} outside (0,1)", self.liquidity.max_spread_pct),
            });
        }
        if self.liquidity.max_adv_fraction <= Decimal::ZERO
            || self.liquidity.max_adv_fraction > Decimal::ONE
        {
            return Err(ConstitutionError::InvalidParameter {
                clause: liquidity::ADV_CLAUSE,
                reason: format!(
                    "max ADV fraction {} outside (0,1]",
                    self.liquidity.max_adv_fraction
                ),
            });
        }

        if let Some(llms) = &self.llms {
            if llms.growth_delta.min >= llms.growth_delta.max {
                return Err(ConstitutionError::InvertedBand {
                    clause: llms::DELTA_CLAUSE,
                    min: llms.growth_delta.min,
                    max: llms.growth_delta.max,
                });
            }
            if llms.hedge_delta.min >= llms.hedge_delta.max {
                return Err(ConstitutionError::InvertedBand {
                    clause: llms::DELTA_CLAUSE,
                    min: llms.hedge_delta.min,
                    max: llms.hedge_delta.max,
                });
            }
            if llms.stop_loss_threshold >= Decimal::ZERO {
                return Err(ConstitutionError::InvalidParameter {
                    clause: llms::STOP_LOSS_CLAUSE,
                    reason: "stop-loss threshold must be negative".to_string(),
                });
            }
        }

        Ok(())
    }

    /// The canonical v1.3 document, used by mock mode and tests.
    pub fn builtin() -> Self {
        let reinvestment = ReinvestmentPolicy {
            contracts_share: dec!(0.75),
            leaps_share: dec!(0.25),
        };
        Self {
            version: "1.3.0".to_string(),
            sleeves: SleeveSet {
                gen_ratio: dec!(0.40),
                rev_ratio: dec!(0.30),
                com_ratio: dec!(0.30),
                r#gen: SleevePolicy {
                    instruments: ["AAPL", "MSFT", "AMZN", "GOOG", "SPY", "QQQ", "IWM"]
                        .map(String::from)
                        .to_vec(),
                    strategy: StrategyKind::Csp,
                    delta: Band::new(dec!(0.40), dec!(0.45)),
                    dte: DteBand { min: 0, max: 1 },
                    stress_dte: Some(DteBand { min: 1, max: 3 }),
                    schedule: WeeklySchedule {
                        weekday: Weekday::Thu,
                        open: NaiveTime::from_hms_opt(9, 45, 0).unwrap(),
                        close: NaiveTime::from_hms_opt(11, 0, 0).unwrap(),
                    },
                    fork_threshold: Some(dec!(100000)),
                    reinvestment: reinvestment.clone(),
                },
                rev: SleevePolicy {
                    instruments: ["NVDA", "TSLA"].map(String::from).to_vec(),
                    strategy: StrategyKind::Csp,
                    delta: Band::new(dec!(0.30), dec!(0.35)),
                    dte: DteBand { min: 3, max: 5 },
                    stress_dte: None,
                    schedule: WeeklySchedule {
                        weekday: Weekday::Wed,
                        open: NaiveTime::from_hms_opt(9, 45, 0).unwrap(),
                        close: NaiveTime::from_hms_opt(11, 0, 0).unwrap(),
                    },
                    fork_threshold: Some(dec!(500000)),
                    reinvestment: reinvestment.clone(),
                },
                com: SleevePolicy {
                    instruments: ["AAPL", "MSFT", "AMZN", "GOOGL", "NVDA", "TSLA", "META"]
                        .map(String::from)
                        .to_vec(),
                    strategy: StrategyKind::Cc,
                    delta: Band::new(dec!(0.20), dec!(0.25)),
                    dte: DteBand { min: 5, max: 5 },
                    stress_dte: None,
                    schedule: WeeklySchedule {
                        weekday: Weekday::Mon,
                        open: NaiveTime::from_hms_opt(9, 45, 0).unwrap(),
                        close: NaiveTime::from_hms_opt(11, 0, 0).unwrap(),
                    },
                    fork_threshold: None,
                    reinvestment,
                },
            },
            capital: CapitalPolicy {
                deployment_min: dec!(0.95),
                deployment_max: dec!(1.00),
                per_symbol_cap: dec!(0.25),
                margin_cap: dec!(0.50),
                slice_threshold: 50,
                daily_contract_cap: 500,
                max_forks_per_account: 10,
                min_fork_confidence: dec!(0.75),
            },
            protocol: ProtocolPolicy {
                atr_period: 5,
                level1_multiple: dec!(1.0),
                level2_multiple: dec!(2.0),
                level3_multiple: dec!(3.0),
                cadence_l0_secs: 300,
                cadence_l1_secs: 60,
                cadence_l2_secs: 30,
                cadence_l3_secs: 1,
                stop_loss_multiple: dec!(3.0),
                max_loss_fraction: dec!(0.05),
                roll_cost_threshold: dec!(0.50),
            },
            liquidity: LiquidityPolicy {
                min_open_interest: 500,
                min_daily_volume: 100,
                max_spread_pct: dec!(0.05),
                max_adv_fraction: dec!(0.10),
                warning_fraction: dec!(0.80),
            },
            hedging: HedgePolicy {
                budget_min_pct: dec!(0.05),
                budget_max_pct: dec!(0.10),
                vix_hedged_week: dec!(50),
                vix_safe_mode: dec!(65),
                vix_kill_switch: dec!(80),
                spx_put_delta: dec!(0.10),
                spx_put_delta_tolerance: dec!(0.02),
                vix_call_strike_buffer: dec!(5),
                dte: DteBand { min: 30, max: 90 },
                rebalance_threshold: dec!(0.20),
            },
            llms: Some(LadderPolicy {
                growth_delta: Band::new(dec!(0.60), dec!(0.80)),
                hedge_delta: Band::new(dec!(0.20), dec!(0.40)),
                growth_months_min: 12,
                growth_months_max: 18,
                hedge_months_min: 6,
                hedge_months_max: 12,
                profit_take_threshold: dec!(2.00),
                partial_profit_threshold: dec!(1.00),
                partial_profit_fraction: dec!(0.50),
                stop_loss_threshold: dec!(-0.50),
                reinvestment_share: dec!(0.25),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_document_validates() {
        let constitution = Constitution::builtin();
        assert!(constitution.validate().is_ok());
        assert_eq!(constitution.version(), "1.3.0");
    }

    #[test]
    fn shipped_document_matches_builtin() {
        let raw = include_str!("../../../constitution.toml");
        let loaded = Constitution::from_toml_str(raw).unwrap();
        assert_eq!(loaded, Constitution::builtin());
    }

    #[test]
    fn builtin_round_trips_through_toml() {
        let constitution = Constitution::builtin();
        let raw = toml::to_string(&constitution).unwrap();
        let reloaded = Constitution::from_toml_str(&raw).unwrap();
        assert_eq!(reloaded, constitution);
    }

    #[test]
    fn ratio_mismatch_is_rejected() {
        let mut doc = Constitution::builtin();
        doc.sleeves.gen_ratio = dec!(0.50);
        let raw = toml::to_string(&doc).unwrap();
        let err = Constitution::from_toml_str(&raw).unwrap_err();
        assert!(matches!(err, ConstitutionError::RatioSum { .. }));
    }

    #[test]
    fn inverted_delta_band_is_rejected() {
        let mut doc = Constitution::builtin();
        doc.sleeves.r#gen.delta = Band::new(dec!(0.45), dec!(0.40));
        let raw = toml::to_string(&doc).unwrap();
        let err = Constitution::from_toml_str(&raw).unwrap_err();
        assert!(matches!(err, ConstitutionError::InvertedBand { .. }));
    }

    #[test]
    fn vix_ordering_is_enforced() {
        let mut doc = Constitution::builtin();
        doc.hedging.vix_safe_mode = dec!(90);
        let raw = toml::to_string(&doc).unwrap();
        let err = Constitution::from_toml_str(&raw).unwrap_err();
        assert!(matches!(err, ConstitutionError::VixOrdering { .. }));
    }

    #[test]
    fn atr_period_minimum() {
        let mut doc = Constitution::builtin();
        doc.protocol.atr_period = 1;
        let raw = toml::to_string(&doc).unwrap();
        let err = Constitution::from_toml_str(&raw).unwrap_err();
        assert!(matches!(err, ConstitutionError::AtrPeriod { period: 1 }));
    }

    #[test]
    fn llms_section_is_optional() {
        let mut doc = Constitution::builtin();
        doc.llms = None;
        let raw = toml::to_string(&doc).unwrap();
        let reloaded = Constitution::from_toml_str(&raw).unwrap();
        assert!(reloaded.llms().is_none());
    }

    #[test]
    fn gen_sleeve_matches_canonical_document() {
        let constitution = Constitution::builtin();
        let r#gen = constitution.sleeve(Sleeve::Gen);
        assert_eq!(r#gen.delta, Band::new(dec!(0.40), dec!(0.45)));
        assert_eq!(r#gen.fork_threshold, Some(dec!(100000)));
        assert!(r#gen.permits_instrument("SPY"));
        assert!(!r#gen.permits_instrument("GME"));
    }
}

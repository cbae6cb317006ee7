use chrono::{NaiveTime, Weekday};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::types::{Sleeve, StrategyKind};

/// Inclusive numeric band. Boundary values belong to the band.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Band {
    pub min: Decimal,
    pub max: Decimal,
}

impl Band {
    pub fn new(min: Decimal, max: Decimal) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: Decimal) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Inclusive days-to-expiry band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DteBand {
    pub min: u32,
    pub max: u32,
}

impl DteBand {
    pub fn contains(&self, dte: u32) -> bool {
        dte >= self.min && dte <= self.max
    }
}

/// Weekly entry window for a sleeve: one weekday, one intraday window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeeklySchedule {
    #[serde(with = "weekday_format")]
    pub weekday: Weekday,
    pub open: NaiveTime,
    pub close: NaiveTime,
}

impl WeeklySchedule {
    pub fn admits(&self, weekday: Weekday, time: NaiveTime) -> bool {
        weekday == self.weekday && time >= self.open && time <= self.close
    }
}

/// Quarterly reinvestment split for realized premium.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReinvestmentPolicy {
    pub contracts_share: Decimal,
    pub leaps_share: Decimal,
}

/// Everything the Constitution prescribes for a single sleeve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SleevePolicy {
    pub instruments: Vec<String>,
    pub strategy: StrategyKind,
    pub delta: Band,
    pub dte: DteBand,
    /// Gen-only wider DTE band admitted under explicit stress-test mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stress_dte: Option<DteBand>,
    pub schedule: WeeklySchedule,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fork_threshold: Option<Decimal>,
    pub reinvestment: ReinvestmentPolicy,
}

impl SleevePolicy {
    pub fn permits_instrument(&self, symbol: &str) -> bool {
        self.instruments.iter().any(|s| s == symbol)
    }
}

/// Split ratios and per-sleeve policies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SleeveSet {
    pub gen_ratio: Decimal,
    pub rev_ratio: Decimal,
    pub com_ratio: Decimal,
    pub r#gen: SleevePolicy,
    pub rev: SleevePolicy,
    pub com: SleevePolicy,
}

impl SleeveSet {
    pub fn policy(&self, sleeve: Sleeve) -> &SleevePolicy {
        match sleeve {
            Sleeve::Gen => &self.r#gen,
            Sleeve::Rev => &self.rev,
            Sleeve::Com => &self.com,
        }
    }

    pub fn ratio(&self, sleeve: Sleeve) -> Decimal {
        match sleeve {
            Sleeve::Gen => self.gen_ratio,
            Sleeve::Rev => self.rev_ratio,
            Sleeve::Com => self.com_ratio,
        }
    }
}

pub fn instruments_clause(sleeve: Sleeve) -> &'static str {
    match sleeve {
        Sleeve::Gen => "§2.GenAcc.Instruments",
        Sleeve::Rev => "§2.RevAcc.Instruments",
        Sleeve::Com => "§2.ComAcc.Instruments",
    }
}

pub fn strategy_clause(sleeve: Sleeve) -> &'static str {
    match sleeve {
        Sleeve::Gen => "§2.GenAcc.Strategy",
        Sleeve::Rev => "§2.RevAcc.Strategy",
        Sleeve::Com => "§2.ComAcc.Strategy",
    }
}

pub fn delta_clause(sleeve: Sleeve) -> &'static str {
    match sleeve {
        Sleeve::Gen => "§2.GenAcc.Delta",
        Sleeve::Rev => "§2.RevAcc.Delta",
        Sleeve::Com => "§2.ComAcc.Delta",
    }
}

pub fn dte_clause(sleeve: Sleeve) -> &'static str {
    match sleeve {
        Sleeve::Gen => "§2.GenAcc.Dte",
        Sleeve::Rev => "§2.RevAcc.Dte",
        Sleeve::Com => "§2.ComAcc.Dte",
    }
}

pub fn schedule_clause(sleeve: Sleeve) -> &'static str {
    match sleeve {
        Sleeve::Gen => "§1.Schedule.GenAcc",
        Sleeve::Rev => "§1.Schedule.RevAcc",
        Sleeve::Com => "§1.Schedule.ComAcc",
    }
}

pub fn fork_clause(sleeve: Sleeve) -> &'static str {
    match sleeve {
        Sleeve::Gen => "§3.Forking.GenAcc",
        Sleeve::Rev => "§3.Forking.RevAcc",
        Sleeve::Com => "§3.Forking.ComAcc",
    }
}

mod weekday_format {
    use chrono::Weekday;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(day: &Weekday, ser: S) -> Result<S::Ok, S::Error> {
        let name = match day {
            Weekday::Mon => "monday",
            Weekday::Tue => "tuesday",
            Weekday::Wed => "wednesday",
            Weekday::Thu => "thursday",
            Weekday::Fri => "friday",
            Weekday::Sat => "saturday",
            Weekday::Sun => "sunday",
        };
        ser.serialize_str(name)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Weekday, D::Error> {
        let raw = String::deserialize(de)?;
        raw.parse()
            .map_err(|_| serde::de::Error::custom(format!("invalid weekday: {raw}")))
    }
}

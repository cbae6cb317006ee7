use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// One of the three capital sleeves the Constitution allocates across.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sleeve {
    Gen,
    Rev,
    Com,
}

impl Sleeve {
    pub const ALL: [Sleeve; 3] = [Sleeve::Gen, Sleeve::Rev, Sleeve::Com];
}

impl fmt::Display for Sleeve {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sleeve::Gen => write!(f, "gen"),
            Sleeve::Rev => write!(f, "rev"),
            Sleeve::Com => write!(f, "com"),
        }
    }
}

impl FromStr for Sleeve {
    type Err = crate::domain::errors::RulesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "gen" | "gen_acc" => Ok(Sleeve::Gen),
            "rev" | "rev_acc" => Ok(Sleeve::Rev),
            "com" | "com_acc" => Ok(Sleeve::Com),
            other => Err(crate::domain::errors::RulesError::UnknownSleeve {
                name: other.to_string(),
            }),
        }
    }
}

/// Strategy a position was opened under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Cash-secured put
    Csp,
    /// Covered call
    Cc,
    LeapCall,
    LeapPut,
    Stock,
}

impl StrategyKind {
    /// Short-option strategies are monitored by the Protocol Engine.
    pub fn is_short_option(&self) -> bool {
        matches!(self, StrategyKind::Csp | StrategyKind::Cc)
    }

    pub fn is_leap(&self) -> bool {
        matches!(self, StrategyKind::LeapCall | StrategyKind::LeapPut)
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyKind::Csp => write!(f, "CSP"),
            StrategyKind::Cc => write!(f, "CC"),
            StrategyKind::LeapCall => write!(f, "LEAP_CALL"),
            StrategyKind::LeapPut => write!(f, "LEAP_PUT"),
            StrategyKind::Stock => write!(f, "STOCK"),
        }
    }
}

impl FromStr for StrategyKind {
    type Err = crate::domain::errors::RulesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "csp" => Ok(StrategyKind::Csp),
            "cc" => Ok(StrategyKind::Cc),
            "leap_call" => Ok(StrategyKind::LeapCall),
            "leap_put" => Ok(StrategyKind::LeapPut),
            "stock" => Ok(StrategyKind::Stock),
            other => Err(crate::domain::errors::RulesError::UnknownAction {
                kind: format!("strategy:{other}"),
            }),
        }
    }
}

/// System-wide trading posture. SAFE blocks new opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemPosture {
    Safe,
    Active,
    HedgedWeek,
    KillSwitch,
}

impl SystemPosture {
    pub fn allows_new_opens(&self) -> bool {
        matches!(self, SystemPosture::Active | SystemPosture::HedgedWeek)
    }
}

impl fmt::Display for SystemPosture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SystemPosture::Safe => write!(f, "SAFE"),
            SystemPosture::Active => write!(f, "ACTIVE"),
            SystemPosture::HedgedWeek => write!(f, "HEDGED_WEEK"),
            SystemPosture::KillSwitch => write!(f, "KILL_SWITCH"),
        }
    }
}

/// Overall component/system health as reported by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Error,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(pub Uuid);

impl AccountId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PositionId(pub Uuid);

impl PositionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for PositionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One daily OHLC bar as delivered by a `BarSource`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OhlcBar {
    pub symbol: String,
    pub date: chrono::NaiveDate,
    pub open: rust_decimal::Decimal,
    pub high: rust_decimal::Decimal,
    pub low: rust_decimal::Decimal,
    pub close: rust_decimal::Decimal,
    pub volume: i64,
}

//! Component health probes. A component is healthy only when its last beat
//! is recent for its cadence and it carries no sticky error; nothing here
//! reports HEALTHY optimistically.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use crate::domain::types::HealthStatus;

#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: HealthStatus,
    pub detail: Option<String>,
    pub last_beat: DateTime<Utc>,
}

struct Entry {
    cadence: Duration,
    last_beat: DateTime<Utc>,
    sticky_error: Option<String>,
}

/// Shared registry each component beats into from its own task.
#[derive(Default)]
pub struct HealthRegistry {
    entries: RwLock<HashMap<String, Entry>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a component and the cadence its beats are expected at.
    pub fn register(&self, name: &str, cadence: Duration) {
        let mut entries = self.entries.write().expect("health registry poisoned");
        entries.insert(
            name.to_string(),
            Entry {
                cadence,
                last_beat: Utc::now(),
                sticky_error: None,
            },
        );
    }

    pub fn beat(&self, name: &str) {
        let mut entries = self.entries.write().expect("health registry poisoned");
        if let Some(entry) = entries.get_mut(name) {
            entry.last_beat = Utc::now();
        }
    }

    /// Record an unrecoverable component failure. Sticky until cleared.
    pub fn set_error(&self, name: &str, detail: impl Into<String>) {
        let mut entries = self.entries.write().expect("health registry poisoned");
        if let Some(entry) = entries.get_mut(name) {
            entry.sticky_error = Some(detail.into());
        }
    }

    pub fn clear_error(&self, name: &str) {
        let mut entries = self.entries.write().expect("health registry poisoned");
        if let Some(entry) = entries.get_mut(name) {
            entry.sticky_error = None;
        }
    }

    /// Probe every registered component: a beat older than twice its cadence
    /// is DEGRADED, a sticky error is ERROR.
    pub fn probe(&self, now: DateTime<Utc>) -> Vec<ComponentHealth> {
        let entries = self.entries.read().expect("health registry poisoned");
        let mut out: Vec<ComponentHealth> = entries
            .iter()
            .map(|(name, entry)| {
                let status = if entry.sticky_error.is_some() {
                    HealthStatus::Error
                } else {
                    let allowed = chrono::Duration::from_std(entry.cadence * 2)
                        .unwrap_or(chrono::Duration::MAX);
                    if now - entry.last_beat > allowed {
                        HealthStatus::Degraded
                    } else {
                        HealthStatus::Healthy
                    }
                };
                ComponentHealth {
                    name: name.clone(),
                    status,
                    detail: entry.sticky_error.clone(),
                    last_beat: entry.last_beat,
                }
            })
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    /// Worst component status wins overall.
    pub fn overall(&self, now: DateTime<Utc>) -> HealthStatus {
        self.probe(now)
            .into_iter()
            .map(|c| c.status)
            .max_by_key(|s| match s {
                HealthStatus::Healthy => 0,
                HealthStatus::Degraded => 1,
                HealthStatus::Error => 2,
            })
            .unwrap_or(HealthStatus::Healthy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_beat_is_healthy() {
        let registry = HealthRegistry::new();
        registry.register("execution", Duration::from_secs(30));
        registry.beat("execution");
        assert_eq!(registry.overall(Utc::now()), HealthStatus::Healthy);
    }

    #[test]
    fn stale_beat_degrades() {
        let registry = HealthRegistry::new();
        registry.register("market_data", Duration::from_secs(5));
        let later = Utc::now() + chrono::Duration::seconds(30);
        assert_eq!(registry.overall(later), HealthStatus::Degraded);
    }

    #[test]
    fn sticky_error_dominates() {
        let registry = HealthRegistry::new();
        registry.register("accounts", Duration::from_secs(30));
        registry.register("execution", Duration::from_secs(30));
        registry.set_error("accounts", "reserved exceeds current");
        assert_eq!(registry.overall(Utc::now()), HealthStatus::Error);

        registry.clear_error("accounts");
        assert_eq!(registry.overall(Utc::now()), HealthStatus::Healthy);
    }
}

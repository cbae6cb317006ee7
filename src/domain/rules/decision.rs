use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome of a rule evaluation. Ordering is severity: REJECTED beats
/// WARNING beats APPROVED when merging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Approved,
    Warning,
    Rejected,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Approved => write!(f, "APPROVED"),
            Verdict::Warning => write!(f, "WARNING"),
            Verdict::Rejected => write!(f, "REJECTED"),
        }
    }
}

/// One clause consulted during evaluation, with what it concluded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub clause: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub verdict: Verdict,
    pub citations: Vec<Citation>,
}

impl Decision {
    pub fn approved() -> Self {
        Self {
            verdict: Verdict::Approved,
            citations: Vec::new(),
        }
    }

    pub fn approve(clause: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with(Verdict::Approved, clause, message)
    }

    pub fn warn(clause: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with(Verdict::Warning, clause, message)
    }

    pub fn reject(clause: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with(Verdict::Rejected, clause, message)
    }

    fn with(verdict: Verdict, clause: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            verdict,
            citations: vec![Citation {
                clause: clause.into(),
                message: message.into(),
            }],
        }
    }

    /// Fold another decision in: the worse verdict wins, citations accumulate.
    pub fn merge(mut self, other: Decision) -> Self {
        self.verdict = self.verdict.max(other.verdict);
        self.citations.extend(other.citations);
        self
    }

    pub fn is_approved(&self) -> bool {
        self.verdict != Verdict::Rejected
    }

    pub fn is_rejected(&self) -> bool {
        self.verdict == Verdict::Rejected
    }

    pub fn clause_refs(&self) -> Vec<String> {
        self.citations.iter().map(|c| c.clause.clone()).collect()
    }

    /// Citations attached to rejections only, for operator display.
    pub fn rejection_reasons(&self) -> Vec<&Citation> {
        if self.is_rejected() {
            self.citations.iter().collect()
        } else {
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejected_dominates_merge() {
        let merged = Decision::approve("§A", "fine")
            .merge(Decision::reject("§B", "bad"))
            .merge(Decision::warn("§C", "careful"));
        assert_eq!(merged.verdict, Verdict::Rejected);
        assert_eq!(merged.citations.len(), 3);
        assert!(merged.is_rejected());
    }

    #[test]
    fn warning_dominates_approved() {
        let merged = Decision::approve("§A", "fine").merge(Decision::warn("§B", "careful"));
        assert_eq!(merged.verdict, Verdict::Warning);
        assert!(merged.is_approved());
    }

    #[test]
    fn clause_refs_collects_all_consulted_clauses() {
        let merged = Decision::approve("§A", "fine").merge(Decision::approve("§B", "fine"));
        assert_eq!(merged.clause_refs(), vec!["§A", "§B"]);
    }
}

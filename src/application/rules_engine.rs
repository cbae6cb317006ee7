//! The constitutional validator. Evaluation itself is pure and synchronous;
//! the async surface exists only because every call commits exactly one audit
//! record before returning.

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::domain::audit::{AuditEvent, AuditKind};
use crate::domain::constitution::Constitution;
use crate::domain::errors::AuditError;
use crate::domain::positions::CONTRACT_MULTIPLIER;
use crate::domain::rules::{Decision, ProposedAction, RuleValidator, standard_validators};
use crate::infrastructure::persistence::audit_log::AuditLog;

pub struct RulesEngine {
    constitution: Arc<Constitution>,
    validators: Vec<Box<dyn RuleValidator>>,
    audit: AuditLog,
}

/// Advisory contract-count recommendation; never gates an action.
#[derive(Debug, Clone, PartialEq)]
pub struct SizingRecommendation {
    pub contracts: i64,
    pub estimated_collateral: Decimal,
    pub meets_deployment_floor: bool,
    pub requires_slicing: bool,
}

impl RulesEngine {
    pub fn new(constitution: Arc<Constitution>, audit: AuditLog) -> Self {
        Self {
            constitution,
            validators: standard_validators(),
            audit,
        }
    }

    pub fn constitution(&self) -> &Constitution {
        &self.constitution
    }

    /// Evaluate a proposed action. Exactly one audit record is written before
    /// the decision is returned.
    pub async fn evaluate(&self, action: &ProposedAction) -> Result<Decision, AuditError> {
        self.evaluate_with_subject(action, None).await
    }

    /// Like `evaluate`, with an extra subject id (the client-order-id of the
    /// order the decision gates) recorded on the audit trail.
    pub async fn evaluate_with_subject(
        &self,
        action: &ProposedAction,
        extra_subject: Option<&str>,
    ) -> Result<Decision, AuditError> {
        let decision = self.evaluate_sync(action);

        let mut event = AuditEvent::new(AuditKind::RuleEvaluation, "rules_engine").with_payload(
            json!({
                "action": action.kind(),
                "verdict": decision.verdict.to_string(),
                "citations": decision.citations,
            }),
        );
        for subject in action.subject_ids() {
            event = event.with_subject(subject);
        }
        if let Some(subject) = extra_subject {
            event = event.with_subject(subject);
        }
        for clause in decision.clause_refs() {
            event = event.with_clause(clause);
        }
        self.audit.append(event).await?;

        if decision.is_rejected() {
            warn!(
                "RulesEngine: {} REJECTED ({})",
                action.kind(),
                decision
                    .rejection_reasons()
                    .iter()
                    .map(|c| c.clause.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        } else {
            debug!("RulesEngine: {} {}", action.kind(), decision.verdict);
        }

        Ok(decision)
    }

    /// Pure evaluation: fold every applicable validator, worst verdict wins.
    /// CPU-only; never suspends.
    fn evaluate_sync(&self, action: &ProposedAction) -> Decision {
        let mut decision = Decision::approved();
        for validator in &self.validators {
            if validator.applies_to(action) {
                decision = decision.merge(validator.evaluate(action, &self.constitution));
            }
        }
        decision
    }

    /// Recommend a contract count that lands deployment inside the band and
    /// under the per-symbol cap.
    pub fn position_sizing(
        &self,
        sleeve_capital: Decimal,
        deployed_notional: Decimal,
        symbol_notional: Decimal,
        strike: Decimal,
    ) -> SizingRecommendation {
        let capital = self.constitution.capital();
        let per_contract = strike * CONTRACT_MULTIPLIER;
        if per_contract <= Decimal::ZERO || sleeve_capital <= Decimal::ZERO {
            return SizingRecommendation {
                contracts: 0,
                estimated_collateral: Decimal::ZERO,
                meets_deployment_floor: false,
                requires_slicing: false,
            };
        }

        let deploy_headroom = (sleeve_capital * capital.deployment_max - deployed_notional)
            .max(Decimal::ZERO);
        let symbol_headroom = (sleeve_capital * capital.per_symbol_cap - symbol_notional)
            .max(Decimal::ZERO);
        let headroom = deploy_headroom.min(symbol_headroom);
        let contracts = (headroom / per_contract).to_i64().unwrap_or(0);

        let estimated_collateral = per_contract * Decimal::from(contracts);
        let deployment_after = (deployed_notional + estimated_collateral) / sleeve_capital;

        SizingRecommendation {
            contracts,
            estimated_collateral,
            meets_deployment_floor: deployment_after >= capital.deployment_min,
            requires_slicing: contracts > capital.slice_threshold,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::audit::AuditFilter;
    use crate::domain::rules::Verdict;
    use crate::domain::rules::action::test_fixtures::{gen_fork, gen_open};
    use crate::infrastructure::persistence::database::Database;
    use rust_decimal_macros::dec;

    async fn engine() -> RulesEngine {
        let db = Database::in_memory().await.unwrap();
        let constitution = Arc::new(Constitution::builtin());
        let audit = AuditLog::open(&db, constitution.version(), 64).await.unwrap();
        RulesEngine::new(constitution, audit)
    }

    #[tokio::test]
    async fn every_evaluation_writes_exactly_one_audit_record() {
        let engine = engine().await;
        let action = ProposedAction::OpenPosition(gen_open());
        engine.evaluate(&action).await.unwrap();
        engine.evaluate(&action).await.unwrap();

        let records = engine
            .audit
            .query(&AuditFilter::for_kind(AuditKind::RuleEvaluation), 100)
            .await
            .unwrap();
        assert_eq!(records.len(), 2);
    }

    #[tokio::test]
    async fn approved_open_cites_consulted_clauses() {
        let engine = engine().await;
        let decision = engine
            .evaluate(&ProposedAction::OpenPosition(gen_open()))
            .await
            .unwrap();
        assert_eq!(decision.verdict, Verdict::Approved);
        let clauses = decision.clause_refs();
        for expected in [
            "§2.GenAcc.Instruments",
            "§2.GenAcc.Delta",
            "§2.GenAcc.Dte",
            "§8.Liquidity.OpenInterest",
        ] {
            assert!(clauses.contains(&expected.to_string()), "missing {expected}");
        }
    }

    #[tokio::test]
    async fn delta_rejection_names_the_clause() {
        let engine = engine().await;
        let mut open = gen_open();
        open.delta = dec!(0.60);
        let decision = engine
            .evaluate(&ProposedAction::OpenPosition(open))
            .await
            .unwrap();
        assert!(decision.is_rejected());
        assert!(
            decision
                .rejection_reasons()
                .iter()
                .any(|c| c.clause == "§2.GenAcc.Delta")
        );
    }

    #[tokio::test]
    async fn order_subject_is_recorded_for_traceability() {
        let engine = engine().await;
        let action = ProposedAction::ForkAccount(gen_fork());
        engine
            .evaluate_with_subject(&action, Some("ord-42"))
            .await
            .unwrap();
        let records = engine
            .audit
            .query(&AuditFilter::for_subject("ord-42"), 10)
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].event.kind, AuditKind::RuleEvaluation);
    }

    #[tokio::test]
    async fn sizing_recommendation_respects_caps() {
        let engine = engine().await;
        let rec = engine.position_sizing(dec!(1000000), dec!(700000), dec!(0), dec!(450));
        // Deployment headroom 300k; symbol headroom 250k; 250k / 45k = 5.
        assert_eq!(rec.contracts, 5);
        assert_eq!(rec.estimated_collateral, dec!(225000));
        assert!(!rec.requires_slicing);
        assert!(!rec.meets_deployment_floor);

        let big = engine.position_sizing(dec!(10000000), dec!(7300000), dec!(0), dec!(450));
        // Headroom 2.5M / 45k = 55 contracts: above the slice threshold.
        assert!(big.requires_slicing);
        assert!(big.meets_deployment_floor);
    }
}

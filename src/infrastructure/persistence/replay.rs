//! State rebuild from the audit tail. Position open/close events carry the
//! full entity, so a restarted process can reconstruct the open-position
//! set with a range scan and hand it to reconciliation.

use std::collections::HashMap;

use crate::domain::audit::{AuditFilter, AuditKind};
use crate::domain::errors::AuditError;
use crate::domain::positions::Position;
use crate::infrastructure::persistence::audit_log::AuditLog;

const SCAN_CHUNK: i64 = 1000;

/// Positions opened on the log and never closed, in sequence order.
pub async fn rebuild_open_positions(audit: &AuditLog) -> Result<Vec<Position>, AuditError> {
    let mut open: HashMap<String, Position> = HashMap::new();
    let mut cursor = 0i64;

    loop {
        let filter = AuditFilter {
            kind: Some(AuditKind::PositionEvent),
            since_seq: Some(cursor + 1),
            ..AuditFilter::default()
        };
        let records = audit.query(&filter, SCAN_CHUNK).await?;
        if records.is_empty() {
            break;
        }
        for record in &records {
            cursor = cursor.max(record.seq);
            let note = record.event.payload.get("note").and_then(|v| v.as_str());
            match note {
                Some("opened") => {
                    if let Some(value) = record.event.payload.get("position")
                        && let Ok(position) = serde_json::from_value::<Position>(value.clone())
                    {
                        open.insert(position.id.to_string(), position);
                    }
                }
                Some("closed") => {
                    for subject in &record.event.subject_ids {
                        open.remove(subject);
                    }
                }
                _ => {}
            }
        }
    }

    let mut positions: Vec<Position> = open.into_values().collect();
    positions.sort_by_key(|p| p.opened_at);
    Ok(positions)
}

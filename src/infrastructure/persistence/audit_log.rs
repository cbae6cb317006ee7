//! Append-only audit log over SQLite. A single writer task assigns strictly
//! monotonic, gap-free sequence numbers and commits each record before the
//! caller's `append` resolves; readers query consistent snapshots through the
//! pool without touching the writer.

use chrono::{DateTime, Utc};
use sqlx::Row;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info};

use crate::domain::audit::{AuditEvent, AuditFilter, AuditKind, AuditRecord};
use crate::domain::errors::AuditError;
use crate::infrastructure::persistence::database::Database;

struct AppendMsg {
    event: AuditEvent,
    reply: oneshot::Sender<Result<AuditRecord, AuditError>>,
}

/// Cloneable handle to the audit log. All appends funnel through the writer
/// task; `flushed_through` is the durability watermark.
#[derive(Clone)]
pub struct AuditLog {
    tx: mpsc::Sender<AppendMsg>,
    pool: sqlx::SqlitePool,
    flushed: Arc<AtomicI64>,
    constitution_version: String,
}

impl AuditLog {
    /// Open the log, resume the sequence from storage, and start the writer.
    pub async fn open(
        db: &Database,
        constitution_version: &str,
        queue_depth: usize,
    ) -> Result<Self, AuditError> {
        let last_seq: i64 = sqlx::query("SELECT COALESCE(MAX(seq), 0) AS seq FROM audit_records")
            .fetch_one(&db.pool)
            .await?
            .try_get("seq")?;

        let (tx, rx) = mpsc::channel(queue_depth);
        let flushed = Arc::new(AtomicI64::new(last_seq));

        let writer = Writer {
            rx,
            pool: db.pool.clone(),
            next_seq: last_seq + 1,
            flushed: flushed.clone(),
            constitution_version: constitution_version.to_string(),
        };
        tokio::spawn(writer.run());

        info!("AuditLog: writer started (resuming at seq {})", last_seq + 1);

        Ok(Self {
            tx,
            pool: db.pool.clone(),
            flushed,
            constitution_version: constitution_version.to_string(),
        })
    }

    /// Durable on return: the record is committed before the reply resolves.
    pub async fn append(&self, event: AuditEvent) -> Result<AuditRecord, AuditError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(AppendMsg {
                event,
                reply: reply_tx,
            })
            .await
            .map_err(|_| AuditError::WriterClosed)?;
        reply_rx.await.map_err(|_| AuditError::WriterClosed)?
    }

    /// Highest sequence number known to be durable.
    pub fn flushed_through(&self) -> i64 {
        self.flushed.load(Ordering::Acquire)
    }

    pub fn constitution_version(&self) -> &str {
        &self.constitution_version
    }

    /// Range-scan read over committed records, ascending by sequence.
    pub async fn query(
        &self,
        filter: &AuditFilter,
        limit: i64,
    ) -> Result<Vec<AuditRecord>, AuditError> {
        let mut builder = sqlx::QueryBuilder::new(
            "SELECT seq, ts, kind, actor, clause_refs, subject_ids, payload, constitution_version \
             FROM audit_records WHERE 1=1",
        );
        if let Some(kind) = filter.kind {
            builder.push(" AND kind = ").push_bind(kind.as_str());
        }
        if let Some(actor) = &filter.actor {
            builder.push(" AND actor = ").push_bind(actor.clone());
        }
        if let Some(subject) = &filter.subject_id {
            builder
                .push(" AND subject_ids LIKE ")
                .push_bind(format!("%\"{subject}\"%"));
        }
        if let Some(since) = filter.since_seq {
            builder.push(" AND seq >= ").push_bind(since);
        }
        if let Some(until) = filter.until_seq {
            builder.push(" AND seq <= ").push_bind(until);
        }
        builder.push(" ORDER BY seq ASC LIMIT ").push_bind(limit);

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(row_to_record).collect()
    }
}

fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> Result<AuditRecord, AuditError> {
    let kind_raw: String = row.try_get("kind")?;
    let kind = AuditKind::from_str(&kind_raw).map_err(|_| sqlx::Error::Decode(
        format!("unknown audit kind {kind_raw}").into(),
    ))?;
    let clause_refs: Vec<String> =
        serde_json::from_str(row.try_get::<String, _>("clause_refs")?.as_str())
            .unwrap_or_default();
    let subject_ids: Vec<String> =
        serde_json::from_str(row.try_get::<String, _>("subject_ids")?.as_str())
            .unwrap_or_default();
    let payload: serde_json::Value =
        serde_json::from_str(row.try_get::<String, _>("payload")?.as_str())
            .unwrap_or(serde_json::Value::Null);
    let ts: DateTime<Utc> = row.try_get("ts")?;

    Ok(AuditRecord {
        seq: row.try_get("seq")?,
        ts,
        event: AuditEvent {
            kind,
            actor: row.try_get("actor")?,
            clause_refs,
            subject_ids,
            payload,
            constitution_version: row.try_get("constitution_version")?,
        },
    })
}

struct Writer {
    rx: mpsc::Receiver<AppendMsg>,
    pool: sqlx::SqlitePool,
    next_seq: i64,
    flushed: Arc<AtomicI64>,
    constitution_version: String,
}

impl Writer {
    async fn run(mut self) {
        while let Some(msg) = self.rx.recv().await {
            let seq = self.next_seq;
            let mut event = msg.event;
            // Every record citing a clause is stamped with the document
            // version it was evaluated under.
            if !event.clause_refs.is_empty() && event.constitution_version.is_none() {
                event.constitution_version = Some(self.constitution_version.clone());
            }
            let record = AuditRecord {
                seq,
                ts: Utc::now(),
                event,
            };

            match self.insert(&record).await {
                Ok(()) => {
                    self.next_seq += 1;
                    self.flushed.store(seq, Ordering::Release);
                    let _ = msg.reply.send(Ok(record));
                }
                Err(e) => {
                    error!("AuditLog: append failed at seq {}: {}", seq, e);
                    let _ = msg.reply.send(Err(e));
                }
            }
        }
        info!("AuditLog: writer stopped at seq {}", self.next_seq - 1);
    }

    async fn insert(&self, record: &AuditRecord) -> Result<(), AuditError> {
        sqlx::query(
            "INSERT INTO audit_records \
             (seq, ts, kind, actor, clause_refs, subject_ids, payload, constitution_version) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(record.seq)
        .bind(record.ts)
        .bind(record.event.kind.as_str())
        .bind(&record.event.actor)
        .bind(serde_json::to_string(&record.event.clause_refs).unwrap_or_default())
        .bind(serde_json::to_string(&record.event.subject_ids).unwrap_or_default())
        .bind(record.event.payload.to_string())
        .bind(&record.event.constitution_version)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn open_log() -> AuditLog {
        let db = Database::in_memory().await.unwrap();
        AuditLog::open(&db, "1.3.0", 64).await.unwrap()
    }

    #[tokio::test]
    async fn sequences_are_gap_free_and_monotonic() {
        let log = open_log().await;
        let mut last = 0;
        for i in 0..20 {
            let record = log
                .append(AuditEvent::new(AuditKind::OrderEvent, "test").with_subject(format!("ord-{i}")))
                .await
                .unwrap();
            assert_eq!(record.seq, last + 1);
            last = record.seq;
        }
        assert_eq!(log.flushed_through(), 20);
    }

    #[tokio::test]
    async fn clause_citing_records_are_version_stamped() {
        let log = open_log().await;
        let record = log
            .append(
                AuditEvent::new(AuditKind::RuleEvaluation, "rules_engine")
                    .with_clause("§2.GenAcc.Delta"),
            )
            .await
            .unwrap();
        assert_eq!(record.event.constitution_version.as_deref(), Some("1.3.0"));

        let plain = log
            .append(AuditEvent::new(AuditKind::HealthCheck, "orchestrator"))
            .await
            .unwrap();
        assert_eq!(plain.event.constitution_version, None);
    }

    #[tokio::test]
    async fn query_filters_by_kind_and_subject() {
        let log = open_log().await;
        log.append(AuditEvent::new(AuditKind::OrderEvent, "execution").with_subject("ord-1"))
            .await
            .unwrap();
        log.append(AuditEvent::new(AuditKind::RuleEvaluation, "rules_engine").with_subject("ord-1"))
            .await
            .unwrap();
        log.append(AuditEvent::new(AuditKind::OrderEvent, "execution").with_subject("ord-2"))
            .await
            .unwrap();

        let orders = log
            .query(&AuditFilter::for_kind(AuditKind::OrderEvent), 100)
            .await
            .unwrap();
        assert_eq!(orders.len(), 2);

        let ord1 = log.query(&AuditFilter::for_subject("ord-1"), 100).await.unwrap();
        assert_eq!(ord1.len(), 2);
        assert!(ord1.windows(2).all(|w| w[0].seq < w[1].seq));
    }

    #[tokio::test]
    async fn seq_range_scan_supports_replay() {
        let log = open_log().await;
        for _ in 0..10 {
            log.append(AuditEvent::new(AuditKind::OrderEvent, "execution"))
                .await
                .unwrap();
        }
        let tail = log
            .query(
                &AuditFilter {
                    since_seq: Some(6),
                    ..AuditFilter::default()
                },
                100,
            )
            .await
            .unwrap();
        assert_eq!(tail.len(), 5);
        assert_eq!(tail[0].seq, 6);
    }
}

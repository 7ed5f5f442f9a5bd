//! Payment webhook ingestion.
//!
//! Verify, parse, then record the event in the idempotency ledger and enqueue
//! its job in one IMMEDIATE transaction. Nothing else happens before the
//! sender gets its answer; the work itself is done by the job workers.

use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
};
use rusqlite::{Connection, TransactionBehavior};
use serde::Serialize;

use crate::db::{self, AppState, queries};
use crate::error::{AppError, Result};
use crate::extractors::Json;
use crate::models::{ExternalEvent, LicenseJobPayload, NewJob};
use crate::payments::{SIGNATURE_HEADER, WebhookEvent};
use crate::queue::JobQueue;
use crate::util::{correlation_id_from_headers, header_str};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStatus {
    Enqueued,
    AlreadyProcessed,
    /// Recorded, but the event type maps to no job.
    Ignored,
}

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub status: IngestStatus,
    pub event_id: String,
    pub correlation_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
}

pub async fn receive_event(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>> {
    state
        .signatures
        .verify(&body, header_str(&headers, SIGNATURE_HEADER))?;
    let event = WebhookEvent::parse(&body)?;

    let raw_payload = std::str::from_utf8(&body)
        .map_err(|_| AppError::BadRequest(crate::error::msg::INVALID_PAYLOAD.into()))?
        .to_string();
    let correlation_id = event
        .correlation_id
        .clone()
        .filter(|id| !id.trim().is_empty())
        .or_else(|| correlation_id_from_headers(&headers))
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let queue = state.queue.clone();
    let work = db::blocking(&state.db, move |conn| {
        ingest(conn, &queue, &event, raw_payload, correlation_id, queries::now())
    });

    // The ledger makes a retry after a timeout safe, even if this write commits late.
    match tokio::time::timeout(state.webhook_budget, work).await {
        Ok(result) => Ok(Json(result?)),
        Err(_) => Err(AppError::Timeout),
    }
}

fn ingest(
    conn: &mut Connection,
    queue: &JobQueue,
    event: &WebhookEvent,
    raw_payload: String,
    correlation_id: String,
    now: i64,
) -> Result<WebhookAck> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let recorded = queries::try_record_external_event(
        &tx,
        &ExternalEvent {
            external_event_id: event.id.clone(),
            event_type: event.event_type.clone(),
            received_at: now,
            correlation_id: correlation_id.clone(),
            raw_payload,
        },
    )?;

    let mut ack = WebhookAck {
        status: IngestStatus::AlreadyProcessed,
        event_id: event.id.clone(),
        correlation_id,
        job_id: None,
    };

    if !recorded {
        tracing::info!(
            event_id = %event.id,
            event_type = %event.event_type,
            correlation_id = %ack.correlation_id,
            "Duplicate webhook delivery acknowledged"
        );
        return Ok(ack);
    }

    match event.job_type() {
        Some(job_type) => {
            let payload = LicenseJobPayload {
                external_event_id: event.id.clone(),
                tenant_id: event.data.tenant_id.clone(),
                occurred_at: event.created,
            };
            let job = queue.enqueue(
                &tx,
                &NewJob {
                    job_type,
                    correlation_id: ack.correlation_id.clone(),
                    external_event_id: Some(event.id.clone()),
                    payload: serde_json::to_value(&payload)?,
                },
                now,
            )?;
            ack.status = IngestStatus::Enqueued;
            ack.job_id = Some(job.id);
        }
        None => {
            tracing::info!(
                event_id = %event.id,
                event_type = %event.event_type,
                "Event type has no job mapping, recorded only"
            );
            ack.status = IngestStatus::Ignored;
        }
    }

    tx.commit()?;

    tracing::info!(
        event_id = %event.id,
        event_type = %event.event_type,
        tenant_id = %event.data.tenant_id,
        correlation_id = %ack.correlation_id,
        status = ?ack.status,
        "Webhook accepted"
    );
    Ok(ack)
}

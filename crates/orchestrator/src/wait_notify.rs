//! Wait-notify correlator.
//!
//! A generic, persistence-backed future/promise registry: register interest
//! in a set of correlation ids with a durable callback descriptor; deliver
//! results exactly once when every id has a published result, even when the
//! publish precedes the registration or the process restarts in between.
//!
//! Callbacks are tagged descriptors, never closures: they are rehydrated
//! from their serialized form on recovery and routed by kind in the engine
//! driver.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};
use uuid::Uuid;

use db::models::WaiterRow;
use db::WaiterRepository;

use crate::error::Result;

/// Durable continuation descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NotifyCallback {
    /// Resume a suspended node with the collected responses.
    ResumeNode { node_execution_id: Uuid },
    /// A child of a bounded-concurrency fan-out finished.
    ChildCompleted {
        parent_node_execution_id: Uuid,
        child_execution_id: Uuid,
    },
    /// A remote worker acknowledged (or the grace period expired for) a
    /// task cancellation.
    AbortAck {
        node_execution_id: Uuid,
        interrupt_id: Uuid,
    },
    /// A barrier this node was parked on resolved.
    BarrierReleased { node_execution_id: Uuid },
    /// Facilitate a queued node when the deadline fires (delayed retries).
    KickNode { node_execution_id: Uuid },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadKind {
    Success,
    Timeout,
    Error,
}

/// Result published against one correlation id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyPayload {
    pub kind: PayloadKind,
    pub data: serde_json::Value,
}

impl NotifyPayload {
    pub fn success(data: serde_json::Value) -> Self {
        Self {
            kind: PayloadKind::Success,
            data,
        }
    }

    pub fn timeout() -> Self {
        Self {
            kind: PayloadKind::Timeout,
            data: serde_json::Value::Null,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: PayloadKind::Error,
            data: serde_json::Value::String(message.into()),
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.kind == PayloadKind::Timeout
    }
}

/// A claimed waiter ready for dispatch, with one payload per correlation id.
#[derive(Debug, Clone)]
pub struct ReadyCallback {
    pub waiter_id: Uuid,
    pub callback: NotifyCallback,
    pub results: HashMap<String, NotifyPayload>,
}

#[derive(Clone)]
pub struct WaitNotify {
    waiters: WaiterRepository,
}

impl WaitNotify {
    pub fn new(waiters: WaiterRepository) -> Self {
        Self { waiters }
    }

    /// Register a waiter. If every correlation id already has a buffered
    /// result, the waiter is claimed immediately and returned for dispatch.
    pub async fn wait_for(
        &self,
        correlation_ids: Vec<String>,
        callback: NotifyCallback,
        deadline: Option<DateTime<Utc>>,
    ) -> Result<Option<ReadyCallback>> {
        let waiter_id = Uuid::new_v4();
        let callback_json = serde_json::to_string(&callback)?;
        self.waiters
            .register(waiter_id, &correlation_ids, &callback_json, deadline)
            .await?;

        debug!(
            waiter_id = %waiter_id,
            correlation_ids = ?correlation_ids,
            "Waiter registered"
        );

        // Publish may have raced ahead of us; deliver buffered results now.
        let buffered = self.waiters.collect_results(&correlation_ids).await?;
        if buffered.len() == correlation_ids.len() && self.waiters.claim(waiter_id).await? {
            return Ok(Some(ReadyCallback {
                waiter_id,
                callback,
                results: parse_results(buffered)?,
            }));
        }
        Ok(None)
    }

    /// Publish a result for one correlation id. The first publish per id
    /// wins; duplicates are dropped. Returns every waiter this publish
    /// completed, claimed for exactly-once dispatch.
    pub async fn publish(
        &self,
        correlation_id: &str,
        payload: NotifyPayload,
    ) -> Result<Vec<ReadyCallback>> {
        let payload_json = serde_json::to_string(&payload)?;
        if !self
            .waiters
            .publish_result(correlation_id, &payload_json)
            .await?
        {
            warn!(correlation_id, "Duplicate publish dropped");
            return Ok(Vec::new());
        }

        let mut ready = Vec::new();
        for row in self
            .waiters
            .find_waiting_by_correlation(correlation_id)
            .await?
        {
            if let Some(callback) = self.try_complete(&row, None).await? {
                ready.push(callback);
            }
        }
        Ok(ready)
    }

    /// Claim waiters whose deadline has passed, filling missing correlation
    /// ids with timeout payloads.
    pub async fn expire_due(&self, now: DateTime<Utc>) -> Result<Vec<ReadyCallback>> {
        let mut ready = Vec::new();
        for row in self.waiters.find_expired(now).await? {
            if let Some(callback) = self.try_complete(&row, Some(NotifyPayload::timeout())).await? {
                ready.push(callback);
            }
        }
        Ok(ready)
    }

    /// Record the outcome of a dispatched callback.
    pub async fn complete(&self, waiter_id: Uuid, timed_out: bool) -> Result<()> {
        if timed_out {
            self.waiters.mark_timed_out(waiter_id).await?;
        } else {
            self.waiters.mark_done(waiter_id).await?;
        }
        Ok(())
    }

    async fn try_complete(
        &self,
        row: &WaiterRow,
        filler: Option<NotifyPayload>,
    ) -> Result<Option<ReadyCallback>> {
        let waiter_id = Uuid::parse_str(&row.uuid).unwrap_or_default();
        let correlation_ids = row.correlation_ids()?;
        let buffered = self.waiters.collect_results(&correlation_ids).await?;

        let complete = buffered.len() == correlation_ids.len();
        if !complete && filler.is_none() {
            return Ok(None);
        }

        // The claim is the exactly-once gate: losing it means another
        // publisher or the sweep already took this waiter.
        if !self.waiters.claim(waiter_id).await? {
            return Ok(None);
        }

        let mut results = parse_results(buffered)?;
        if let Some(filler) = filler {
            for correlation_id in &correlation_ids {
                results
                    .entry(correlation_id.clone())
                    .or_insert_with(|| filler.clone());
            }
        }

        let callback: NotifyCallback = serde_json::from_str(&row.callback)?;
        Ok(Some(ReadyCallback {
            waiter_id,
            callback,
            results,
        }))
    }
}

fn parse_results(raw: HashMap<String, String>) -> Result<HashMap<String, NotifyPayload>> {
    raw.into_iter()
        .map(|(id, json)| Ok((id, serde_json::from_str(&json)?)))
        .collect()
}

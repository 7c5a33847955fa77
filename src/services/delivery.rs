// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! At-least-once delivery of report records to Traccar.
//!
//! A record that cannot be delivered for a transient reason is parked in
//! a bounded in-memory [`DeliveryQueue`] and retried with exponential
//! backoff. The queue sheds its oldest entry when full; nothing survives
//! a restart.

use crate::error::{AppError, Result};
use crate::models::ReportRecord;
use crate::time_utils::Clock;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

/// Timeout for one delivery POST.
pub const DELIVERY_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(3);

/// Default queue bound.
pub const DEFAULT_QUEUE_CAPACITY: usize = 2000;

/// Ceiling for the retry delay, in seconds.
const MAX_BACKOFF_SECS: i64 = 600;

/// HTTP statuses worth retrying.
const RETRYABLE_STATUSES: [u16; 6] = [408, 429, 500, 502, 503, 504];

/// Retry delay in seconds after `attempts` failed deliveries.
///
/// Doubles per attempt and stops growing at [`MAX_BACKOFF_SECS`]; the
/// exponent is clamped so large attempt counts cannot overflow.
pub fn backoff_secs(attempts: u32) -> i64 {
    (1i64 << attempts.min(10)).min(MAX_BACKOFF_SECS)
}

/// Result of one delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// 2xx from the ingestion endpoint.
    Delivered,
    /// Transient failure; the record is now in the queue.
    Deferred,
    /// Permanent rejection; the record is discarded.
    Dropped,
}

/// Reply from the ingestion endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    pub status: u16,
    /// Leading part of the body, for diagnostics.
    pub body: String,
}

/// Outbound transport for report records.
#[async_trait]
pub trait ReportTransport: Send + Sync {
    /// POST the record. `Err` means the request never got an HTTP
    /// response (timeout, connection failure).
    async fn send(&self, record: &ReportRecord) -> Result<HttpReply>;
}

/// Form-encoded POST to a Traccar OsmAnd endpoint.
#[derive(Clone)]
pub struct TraccarTransport {
    http: reqwest::Client,
    url: String,
}

impl TraccarTransport {
    pub fn new(url: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(DELIVERY_TIMEOUT)
            .build()
            .map_err(|e| AppError::Internal(anyhow::anyhow!("HTTP client error: {}", e)))?;

        Ok(Self {
            http,
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl ReportTransport for TraccarTransport {
    async fn send(&self, record: &ReportRecord) -> Result<HttpReply> {
        let response = self
            .http
            .post(&self.url)
            .form(&record.to_form())
            .send()
            .await
            .map_err(|e| AppError::Delivery(e.to_string()))?;

        let status = response.status().as_u16();
        let body = if response.status().is_success() {
            String::new()
        } else {
            let text = response.text().await.unwrap_or_default();
            text.trim().chars().take(200).collect()
        };

        Ok(HttpReply { status, body })
    }
}

/// A record waiting for another delivery attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryQueueItem {
    pub record: ReportRecord,
    /// Failed attempts so far
    pub attempts: u32,
    pub next_attempt_at: DateTime<Utc>,
}

/// Bounded FIFO of deferred records, shared by every report loop.
pub struct DeliveryQueue {
    items: Mutex<VecDeque<DeliveryQueueItem>>,
    capacity: usize,
}

impl Default for DeliveryQueue {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

impl DeliveryQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity.min(DEFAULT_QUEUE_CAPACITY))),
            capacity,
        }
    }

    /// Append an item, evicting and returning the oldest one if full.
    pub fn push(&self, item: DeliveryQueueItem) -> Option<DeliveryQueueItem> {
        let mut items = self.lock();
        let evicted = if items.len() >= self.capacity {
            items.pop_front()
        } else {
            None
        };
        items.push_back(item);
        evicted
    }

    /// Remove the oldest item if its retry time has come.
    ///
    /// Only the head is inspected, so at most one item leaves per call.
    pub fn pop_due(&self, now: DateTime<Utc>) -> Option<DeliveryQueueItem> {
        let mut items = self.lock();
        match items.front() {
            Some(head) if head.next_attempt_at <= now => items.pop_front(),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<DeliveryQueueItem>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Delivers records and manages their retries.
#[derive(Clone)]
pub struct DeliveryService {
    transport: Arc<dyn ReportTransport>,
    queue: Arc<DeliveryQueue>,
    clock: Arc<dyn Clock>,
}

impl DeliveryService {
    pub fn new(
        transport: Arc<dyn ReportTransport>,
        queue: Arc<DeliveryQueue>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            transport,
            queue,
            clock,
        }
    }

    pub fn queue(&self) -> &Arc<DeliveryQueue> {
        &self.queue
    }

    /// First delivery attempt for a freshly built record.
    pub async fn try_deliver(&self, record: ReportRecord) -> DeliveryOutcome {
        self.attempt(record, 0, false).await
    }

    /// Make one attempt for the queue head if it is due.
    ///
    /// Returns `None` when nothing was due.
    pub async fn retry_due(&self) -> Option<DeliveryOutcome> {
        let item = self.queue.pop_due(self.clock.now())?;
        Some(self.attempt(item.record, item.attempts, true).await)
    }

    async fn attempt(
        &self,
        record: ReportRecord,
        attempts: u32,
        is_retry: bool,
    ) -> DeliveryOutcome {
        let kind = if is_retry { "retry" } else { "report" };

        match self.transport.send(&record).await {
            Ok(reply) if (200..300).contains(&reply.status) => {
                tracing::info!(
                    vehicle_id = %record.vehicle_id,
                    lat = record.latitude,
                    lon = record.longitude,
                    status = reply.status,
                    attempts,
                    kind,
                    "Traccar report delivered"
                );
                DeliveryOutcome::Delivered
            }
            Ok(reply) if RETRYABLE_STATUSES.contains(&reply.status) => {
                self.defer(record, attempts, kind, &format!("HTTP {}", reply.status));
                DeliveryOutcome::Deferred
            }
            Ok(reply) => {
                tracing::warn!(
                    vehicle_id = %record.vehicle_id,
                    status = reply.status,
                    body = %reply.body,
                    attempts,
                    kind,
                    "Traccar report dropped"
                );
                DeliveryOutcome::Dropped
            }
            Err(e) => {
                self.defer(record, attempts, kind, &e.to_string());
                DeliveryOutcome::Deferred
            }
        }
    }

    fn defer(&self, record: ReportRecord, attempts: u32, kind: &str, reason: &str) {
        let delay = backoff_secs(attempts);
        let vehicle_id = record.vehicle_id.clone();

        let evicted = self.queue.push(DeliveryQueueItem {
            record,
            attempts: attempts.saturating_add(1),
            next_attempt_at: self.clock.now() + Duration::seconds(delay),
        });

        if let Some(old) = evicted {
            tracing::warn!(
                vehicle_id = %old.record.vehicle_id,
                attempts = old.attempts,
                "Retry queue full, oldest report discarded"
            );
        }

        tracing::warn!(
            vehicle_id = %vehicle_id,
            reason,
            attempts = attempts + 1,
            next_retry_secs = delay,
            queue_len = self.queue.len(),
            kind,
            "Traccar report deferred"
        );
    }
}

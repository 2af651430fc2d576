// Copyright (c) Anza Technology, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Periodic removal of invalid workload records.

use std::sync::Arc;

use log::{info, warn};
use time::OffsetDateTime;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::{WorkloadDb, WorkloadError, WorkloadRecord, WorkloadRow, WorkloadStatus};
use crate::config::SweepConfig;

/// Counters of one sweep.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub pages: usize,
    pub scanned: usize,
    pub removed: usize,
}

/// Scans all workload records page by page and removes the invalid ones.
///
/// A record is invalid if it cannot be decoded, has status
/// [`WorkloadStatus::Invalid`], is settled without client statistics,
/// or is still open past its expiration plus the grace period without
/// client statistics.
pub struct WorkloadSweeper {
    db: Arc<dyn WorkloadDb>,
    page_size: usize,
    grace: time::Duration,
}

impl WorkloadSweeper {
    pub fn new(db: Arc<dyn WorkloadDb>, config: &SweepConfig) -> Self {
        Self {
            db,
            page_size: config.page_size.max(1),
            grace: time::Duration::try_from(config.grace()).unwrap_or(time::Duration::MAX),
        }
    }

    /// Runs one full sweep, treating `now` as the current time.
    ///
    /// Every page's offset is advanced by the number of rows it kept,
    /// so removing rows never makes the scan skip any.
    /// The sweep ends with the first page shorter than the page size.
    pub async fn sweep(&self, now: OffsetDateTime) -> Result<SweepReport, WorkloadError> {
        let mut report = SweepReport::default();
        let mut offset = 0;
        loop {
            let rows = self.db.load_page(self.page_size, offset).await?;
            let invalid: Vec<String> = rows
                .iter()
                .filter_map(|row| {
                    let reason = invalid_reason(row, now, self.grace)?;
                    warn!("removing workload record {}: {reason}", row.id);
                    Some(row.id.clone())
                })
                .collect();
            let removed = if invalid.is_empty() {
                0
            } else {
                self.db.remove_records(&invalid).await?
            };

            report.pages += 1;
            report.scanned += rows.len();
            report.removed += removed;
            if rows.len() < self.page_size {
                break;
            }
            offset += rows.len().saturating_sub(removed);
        }
        info!(
            "workload sweep removed {} of {} records in {} pages",
            report.removed, report.scanned, report.pages
        );
        Ok(report)
    }

    /// Sweeps every `interval` until `cancel` fires.
    ///
    /// A failed sweep is logged and retried on the next tick.
    /// A zero `interval` sweeps once and returns.
    pub async fn run(&self, interval: std::time::Duration, cancel: CancellationToken) {
        if interval.is_zero() {
            warn!("zero workload sweep interval, sweeping once");
            if let Err(err) = self.sweep(OffsetDateTime::now_utc()).await {
                warn!("workload sweep failed: {err}");
            }
            return;
        }
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = cancel.cancelled() => return,
                _ = ticker.tick() => {}
            }
            if let Err(err) = self.sweep(OffsetDateTime::now_utc()).await {
                warn!("workload sweep failed: {err}");
            }
        }
    }
}

fn invalid_reason(
    row: &WorkloadRow,
    now: OffsetDateTime,
    grace: time::Duration,
) -> Option<&'static str> {
    let record = match WorkloadRecord::from_row(row) {
        Ok(record) => record,
        Err(_) => return Some("undecodable"),
    };
    match record.status {
        WorkloadStatus::Invalid => Some("marked invalid"),
        WorkloadStatus::Settled if record.client_workload.is_none() => {
            Some("settled without client workload")
        }
        WorkloadStatus::Settled => None,
        WorkloadStatus::Created => {
            let deadline = record.payload.expiration.checked_add(grace)?;
            (now > deadline && record.client_workload.is_none()).then_some("expired")
        }
    }
}

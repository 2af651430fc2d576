// Copyright (c) Anza Technology, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Accounting records of delivery sessions.
//!
//! A [`WorkloadRecord`] is created when a delivery session opens and settled
//! once, when both the node and the client have reported their [`Workload`].
//! Records that never get a client report are removed by the
//! [`WorkloadSweeper`].
//!
//! Records are persisted through a [`WorkloadDb`] as [`WorkloadRow`]s,
//! with the token payload and workloads as `bincode` blobs.

mod db;
mod sweep;

use std::sync::Arc;

use log::debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;

pub use self::db::{MemoryWorkloadDb, WorkloadDb};
pub use self::sweep::{SweepReport, WorkloadSweeper};

/// Errors that may occur when storing or loading workload records.
#[derive(Debug, Error)]
pub enum WorkloadError {
    #[error("workload record {0} not found")]
    NotFound(String),
    #[error("workload record {0} already exists")]
    AlreadyExists(String),
    #[error("workload record {id} has status {status}, expected it to be created")]
    NotCreated { id: String, status: u8 },
    #[error("unknown workload status {0}")]
    UnknownStatus(u8),
    #[error("row {row} holds the payload of record {payload}")]
    IdMismatch { row: String, payload: String },
    #[error("cannot encode workload record")]
    Encode(#[from] bincode::error::EncodeError),
    #[error("cannot decode workload record")]
    Decode(#[from] bincode::error::DecodeError),
}

/// Token issued for one delivery session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPayload {
    pub id: String,
    pub node_id: String,
    pub asset_cid: String,
    pub client_id: String,
    pub created_at: OffsetDateTime,
    pub expiration: OffsetDateTime,
}

/// Transfer statistics reported by one side of a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workload {
    /// Bytes per second.
    pub download_speed: u64,
    pub download_size: u64,
    pub start_time: OffsetDateTime,
    pub end_time: OffsetDateTime,
}

#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WorkloadStatus {
    Created = 1,
    Settled = 2,
    Invalid = 3,
}

impl TryFrom<u8> for WorkloadStatus {
    type Error = WorkloadError;

    fn try_from(status: u8) -> Result<Self, Self::Error> {
        match status {
            1 => Ok(Self::Created),
            2 => Ok(Self::Settled),
            3 => Ok(Self::Invalid),
            other => Err(WorkloadError::UnknownStatus(other)),
        }
    }
}

/// Decoded workload record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkloadRecord {
    pub payload: TokenPayload,
    pub status: WorkloadStatus,
    pub node_workload: Option<Workload>,
    pub client_workload: Option<Workload>,
}

/// Workload record in its persisted form.
///
/// Empty workload blobs mean the side has not reported yet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkloadRow {
    pub id: String,
    pub status: u8,
    pub payload: Vec<u8>,
    pub node_workload: Vec<u8>,
    pub client_workload: Vec<u8>,
}

impl WorkloadRecord {
    /// Creates the record of a freshly opened session.
    pub fn new(payload: TokenPayload) -> Self {
        Self {
            payload,
            status: WorkloadStatus::Created,
            node_workload: None,
            client_workload: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.payload.id
    }

    pub fn to_row(&self) -> Result<WorkloadRow, WorkloadError> {
        Ok(WorkloadRow {
            id: self.payload.id.clone(),
            status: self.status as u8,
            payload: encode(&self.payload)?,
            node_workload: encode_workload(self.node_workload.as_ref())?,
            client_workload: encode_workload(self.client_workload.as_ref())?,
        })
    }

    pub fn from_row(row: &WorkloadRow) -> Result<Self, WorkloadError> {
        let payload: TokenPayload = decode(&row.payload)?;
        if payload.id != row.id {
            return Err(WorkloadError::IdMismatch {
                row: row.id.clone(),
                payload: payload.id,
            });
        }
        Ok(Self {
            payload,
            status: WorkloadStatus::try_from(row.status)?,
            node_workload: decode_workload(&row.node_workload)?,
            client_workload: decode_workload(&row.client_workload)?,
        })
    }
}

/// Opens and settles delivery sessions.
pub struct WorkloadRecorder {
    db: Arc<dyn WorkloadDb>,
}

impl WorkloadRecorder {
    pub fn new(db: Arc<dyn WorkloadDb>) -> Self {
        Self { db }
    }

    pub fn db(&self) -> &Arc<dyn WorkloadDb> {
        &self.db
    }

    /// Stores a [`WorkloadStatus::Created`] record for a new session.
    pub async fn open_session(&self, payload: TokenPayload) -> Result<(), WorkloadError> {
        let record = WorkloadRecord::new(payload);
        self.db.save_records(vec![record.to_row()?]).await?;
        debug!("opened workload session {}", record.id());
        Ok(())
    }

    /// Records both sides' workloads and settles the session.
    ///
    /// # Errors
    ///
    /// Returns [`WorkloadError::NotCreated`] if the session was settled or
    /// invalidated before, including by a concurrent call.
    pub async fn settle(
        &self,
        id: &str,
        node: Workload,
        client: Workload,
    ) -> Result<WorkloadRecord, WorkloadError> {
        let mut record = self.load(id).await?;
        if record.status != WorkloadStatus::Created {
            return Err(WorkloadError::NotCreated {
                id: id.to_owned(),
                status: record.status as u8,
            });
        }
        record.status = WorkloadStatus::Settled;
        record.node_workload = Some(node);
        record.client_workload = Some(client);
        self.db
            .update_record(record.to_row()?, WorkloadStatus::Created)
            .await?;
        debug!(
            "settled workload session {id}: node {} bytes, client {} bytes",
            node.download_size, client.download_size
        );
        Ok(record)
    }

    pub async fn load(&self, id: &str) -> Result<WorkloadRecord, WorkloadError> {
        WorkloadRecord::from_row(&self.db.load_record(id).await?)
    }
}

fn bincode_config() -> impl bincode::config::Config {
    bincode::config::standard()
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, WorkloadError> {
    Ok(bincode::serde::encode_to_vec(value, bincode_config())?)
}

fn decode<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T, WorkloadError> {
    let (value, _) = bincode::serde::decode_from_slice(bytes, bincode_config())?;
    Ok(value)
}

fn encode_workload(workload: Option<&Workload>) -> Result<Vec<u8>, WorkloadError> {
    workload.map_or(Ok(Vec::new()), encode)
}

fn decode_workload(bytes: &[u8]) -> Result<Option<Workload>, WorkloadError> {
    if bytes.is_empty() {
        return Ok(None);
    }
    decode(bytes).map(Some)
}

#[cfg(test)]
pub(crate) mod tests {
    use time::Duration;

    use super::*;

    pub(crate) fn payload(id: &str, expiration: OffsetDateTime) -> TokenPayload {
        TokenPayload {
            id: id.to_owned(),
            node_id: "node-1".to_owned(),
            asset_cid: "asset".to_owned(),
            client_id: "client-1".to_owned(),
            created_at: expiration - Duration::hours(1),
            expiration,
        }
    }

    pub(crate) fn workload(size: u64) -> Workload {
        let start_time = OffsetDateTime::UNIX_EPOCH + Duration::days(20_000);
        Workload {
            download_speed: size / 10,
            download_size: size,
            start_time,
            end_time: start_time + Duration::seconds(10),
        }
    }

    fn recorder() -> WorkloadRecorder {
        WorkloadRecorder::new(Arc::new(MemoryWorkloadDb::default()))
    }

    #[test]
    fn row_conversion() {
        let mut record = WorkloadRecord::new(payload("a", OffsetDateTime::UNIX_EPOCH));
        let row = record.to_row().unwrap();
        assert_eq!(row.status, 1);
        assert!(row.node_workload.is_empty() && row.client_workload.is_empty());
        assert_eq!(WorkloadRecord::from_row(&row).unwrap(), record);

        record.client_workload = Some(workload(100));
        let row = record.to_row().unwrap();
        assert_eq!(WorkloadRecord::from_row(&row).unwrap(), record);
    }

    #[test]
    fn bad_rows() {
        let row = WorkloadRecord::new(payload("a", OffsetDateTime::UNIX_EPOCH))
            .to_row()
            .unwrap();

        let mut bad = row.clone();
        bad.status = 9;
        assert!(matches!(
            WorkloadRecord::from_row(&bad),
            Err(WorkloadError::UnknownStatus(9))
        ));

        let mut bad = row.clone();
        bad.id = "b".to_owned();
        assert!(matches!(
            WorkloadRecord::from_row(&bad),
            Err(WorkloadError::IdMismatch { .. })
        ));

        let mut bad = row;
        bad.client_workload = vec![0xff];
        assert!(matches!(
            WorkloadRecord::from_row(&bad),
            Err(WorkloadError::Decode(_))
        ));
    }

    #[tokio::test]
    async fn session_lifecycle() {
        let recorder = recorder();
        let expiration = OffsetDateTime::UNIX_EPOCH + Duration::days(20_001);
        recorder.open_session(payload("s1", expiration)).await.unwrap();
        assert!(matches!(
            recorder.open_session(payload("s1", expiration)).await,
            Err(WorkloadError::AlreadyExists(_))
        ));

        let open = recorder.load("s1").await.unwrap();
        assert_eq!(open.status, WorkloadStatus::Created);
        assert_eq!(open.client_workload, None);

        let settled = recorder.settle("s1", workload(10), workload(12)).await.unwrap();
        assert_eq!(settled.status, WorkloadStatus::Settled);
        assert_eq!(recorder.load("s1").await.unwrap(), settled);

        // settles exactly once
        assert!(matches!(
            recorder.settle("s1", workload(1), workload(1)).await,
            Err(WorkloadError::NotCreated { status: 2, .. })
        ));
        assert!(matches!(
            recorder.settle("missing", workload(1), workload(1)).await,
            Err(WorkloadError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn concurrent_settles_succeed_once() {
        let recorder = Arc::new(recorder());
        recorder
            .open_session(payload("s", OffsetDateTime::UNIX_EPOCH))
            .await
            .unwrap();
        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let recorder = recorder.clone();
                tokio::spawn(async move { recorder.settle("s", workload(i), workload(i)).await })
            })
            .collect();
        let mut settled = 0;
        for task in tasks {
            if task.await.unwrap().is_ok() {
                settled += 1;
            }
        }
        assert_eq!(settled, 1);
    }
}

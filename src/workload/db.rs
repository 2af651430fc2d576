// Copyright (c) Anza Technology, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{WorkloadError, WorkloadRow, WorkloadStatus};

/// Persistence of [`WorkloadRow`]s.
#[async_trait]
pub trait WorkloadDb: Send + Sync {
    /// Inserts new rows, failing without inserting any if an ID already exists.
    async fn save_records(&self, rows: Vec<WorkloadRow>) -> Result<(), WorkloadError>;

    /// Replaces an existing row iff its stored status still is `expected`.
    async fn update_record(
        &self,
        row: WorkloadRow,
        expected: WorkloadStatus,
    ) -> Result<(), WorkloadError>;

    async fn load_record(&self, id: &str) -> Result<WorkloadRow, WorkloadError>;

    /// Returns up to `limit` rows ordered by ID, skipping the first `offset`.
    async fn load_page(&self, limit: usize, offset: usize)
    -> Result<Vec<WorkloadRow>, WorkloadError>;

    /// Removes the rows with the given IDs, returns how many existed.
    async fn remove_records(&self, ids: &[String]) -> Result<usize, WorkloadError>;
}

/// In-memory [`WorkloadDb`].
#[derive(Debug, Default)]
pub struct MemoryWorkloadDb {
    rows: RwLock<BTreeMap<String, WorkloadRow>>,
}

impl MemoryWorkloadDb {
    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }

    /// Returns the IDs of all stored rows, in order.
    pub async fn ids(&self) -> Vec<String> {
        self.rows.read().await.keys().cloned().collect()
    }
}

#[async_trait]
impl WorkloadDb for MemoryWorkloadDb {
    async fn save_records(&self, rows: Vec<WorkloadRow>) -> Result<(), WorkloadError> {
        let mut stored = self.rows.write().await;
        if let Some(row) = rows.iter().find(|row| stored.contains_key(&row.id)) {
            return Err(WorkloadError::AlreadyExists(row.id.clone()));
        }
        stored.extend(rows.into_iter().map(|row| (row.id.clone(), row)));
        Ok(())
    }

    async fn update_record(
        &self,
        row: WorkloadRow,
        expected: WorkloadStatus,
    ) -> Result<(), WorkloadError> {
        let mut stored = self.rows.write().await;
        let current = stored
            .get_mut(&row.id)
            .ok_or_else(|| WorkloadError::NotFound(row.id.clone()))?;
        if current.status != expected as u8 {
            return Err(WorkloadError::NotCreated {
                id: row.id,
                status: current.status,
            });
        }
        *current = row;
        Ok(())
    }

    async fn load_record(&self, id: &str) -> Result<WorkloadRow, WorkloadError> {
        self.rows
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| WorkloadError::NotFound(id.to_owned()))
    }

    async fn load_page(
        &self,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<WorkloadRow>, WorkloadError> {
        let rows = self.rows.read().await;
        Ok(rows.values().skip(offset).take(limit).cloned().collect())
    }

    async fn remove_records(&self, ids: &[String]) -> Result<usize, WorkloadError> {
        let mut rows = self.rows.write().await;
        Ok(ids.iter().filter(|id| rows.remove(*id).is_some()).count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: &str) -> WorkloadRow {
        WorkloadRow {
            id: id.to_owned(),
            status: WorkloadStatus::Created as u8,
            payload: Vec::new(),
            node_workload: Vec::new(),
            client_workload: Vec::new(),
        }
    }

    #[tokio::test]
    async fn pages_in_id_order() {
        let db = MemoryWorkloadDb::default();
        db.save_records(["c", "a", "d", "b"].map(row).to_vec())
            .await
            .unwrap();
        let ids = |rows: Vec<WorkloadRow>| rows.into_iter().map(|r| r.id).collect::<Vec<_>>();
        assert_eq!(ids(db.load_page(2, 0).await.unwrap()), ["a", "b"]);
        assert_eq!(ids(db.load_page(2, 3).await.unwrap()), ["d"]);
        assert!(db.load_page(2, 4).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn save_is_all_or_nothing() {
        let db = MemoryWorkloadDb::default();
        db.save_records(vec![row("a")]).await.unwrap();
        assert!(matches!(
            db.save_records(vec![row("b"), row("a")]).await,
            Err(WorkloadError::AlreadyExists(id)) if id == "a"
        ));
        assert_eq!(db.ids().await, ["a"]);
    }

    #[tokio::test]
    async fn conditional_update_and_remove() {
        let db = MemoryWorkloadDb::default();
        db.save_records(vec![row("a"), row("b")]).await.unwrap();

        let mut settled = row("a");
        settled.status = WorkloadStatus::Settled as u8;
        db.update_record(settled.clone(), WorkloadStatus::Created)
            .await
            .unwrap();
        assert_eq!(db.load_record("a").await.unwrap(), settled);
        assert!(matches!(
            db.update_record(settled, WorkloadStatus::Created).await,
            Err(WorkloadError::NotCreated { status: 2, .. })
        ));
        assert!(matches!(
            db.update_record(row("x"), WorkloadStatus::Created).await,
            Err(WorkloadError::NotFound(_))
        ));

        let removed = db
            .remove_records(&["a".to_owned(), "x".to_owned()])
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(db.len().await, 1);
        assert!(!db.is_empty().await);
    }
}

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use shared::DiagnosisRecord;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::db::dynamodb_repository::RepositoryError;

/// In-memory record store: the dev fallback when no DynamoDB table is
/// configured, and the injectable store for tests. Same contract as the
/// DynamoDB repository, minus durability.
#[derive(Clone, Default)]
pub struct MemoryRepository {
    records: Arc<RwLock<HashMap<Uuid, Vec<DiagnosisRecord>>>>,
    fail_appends: Arc<AtomicUsize>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `n` appends fail with a storage error. Lets tests walk
    /// the transient-retry and not-persisted paths without a real backend.
    pub fn fail_next_appends(&self, n: usize) {
        self.fail_appends.store(n, Ordering::SeqCst);
    }

    pub async fn put_record(&self, record: &DiagnosisRecord) -> Result<(), RepositoryError> {
        let remaining = self.fail_appends.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_appends.store(remaining - 1, Ordering::SeqCst);
            return Err(RepositoryError::DynamoDb(
                "injected append failure".to_string(),
            ));
        }
        self.records
            .write()
            .await
            .entry(record.user_id)
            .or_default()
            .push(record.clone());
        Ok(())
    }

    pub async fn get_user_records(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<DiagnosisRecord>, RepositoryError> {
        Ok(self
            .records
            .read()
            .await
            .get(&user_id)
            .cloned()
            .unwrap_or_default())
    }

    pub async fn delete_user_records(&self, user_id: Uuid) -> Result<u64, RepositoryError> {
        Ok(self
            .records
            .write()
            .await
            .remove(&user_id)
            .map(|records| records.len() as u64)
            .unwrap_or(0))
    }
}

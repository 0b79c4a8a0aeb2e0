use std::time::Duration;

use aws_sdk_dynamodb::Client;
use shared::{DiagnosisRecord, HistoryPage, UserStats};
use uuid::Uuid;

use crate::db::dynamodb_repository::{DynamoDbRepository, RepositoryError};
use crate::db::memory_repository::MemoryRepository;

pub const DEFAULT_PER_PAGE: u32 = 10;

/// Pause before the single retry on a failed append.
const APPEND_RETRY_BACKOFF: Duration = Duration::from_millis(100);

/// Front of the History & Stats Store: persistence behind it, ordering,
/// pagination, and aggregation in front. Stats are recomputed from the
/// record set on every call, so they cannot drift from it.
#[derive(Clone)]
pub enum HistoryStore {
    Dynamo(DynamoDbRepository),
    Memory(MemoryRepository),
}

impl HistoryStore {
    pub fn dynamo(client: Client, detections_table: String) -> Self {
        Self::Dynamo(DynamoDbRepository::new(client, detections_table))
    }

    pub fn memory() -> Self {
        Self::Memory(MemoryRepository::new())
    }

    pub async fn append(&self, record: &DiagnosisRecord) -> Result<(), RepositoryError> {
        match self {
            Self::Dynamo(repo) => repo.put_record(record).await,
            Self::Memory(repo) => repo.put_record(record).await,
        }
    }

    /// Append with a single backed-off retry for transient failures. Returns
    /// whether the record ended up persisted; a definitive failure is logged
    /// and reported, never escalated — the diagnosis itself already stands.
    pub async fn append_with_retry(&self, record: &DiagnosisRecord) -> bool {
        match self.append(record).await {
            Ok(()) => true,
            Err(first) => {
                log::warn!("Append failed for record {}, retrying: {first}", record.id);
                tokio::time::sleep(APPEND_RETRY_BACKOFF).await;
                match self.append(record).await {
                    Ok(()) => true,
                    Err(second) => {
                        log::error!(
                            "Record {} not persisted after retry: {second}",
                            record.id
                        );
                        false
                    }
                }
            }
        }
    }

    pub async fn list_page(
        &self,
        user_id: Uuid,
        page: u32,
        per_page: u32,
    ) -> Result<HistoryPage, RepositoryError> {
        let records = self.fetch_sorted(user_id).await?;
        Ok(paginate(records, page, per_page))
    }

    pub async fn stats(&self, user_id: Uuid) -> Result<UserStats, RepositoryError> {
        let records = self.fetch_all(user_id).await?;
        let diseased = records.iter().filter(|r| r.disease_detected).count() as u64;
        Ok(UserStats::from_counts(records.len() as u64, diseased))
    }

    /// Bulk account deletion hook; the only way records leave the store.
    pub async fn purge_user(&self, user_id: Uuid) -> Result<u64, RepositoryError> {
        match self {
            Self::Dynamo(repo) => repo.delete_user_records(user_id).await,
            Self::Memory(repo) => repo.delete_user_records(user_id).await,
        }
    }

    async fn fetch_all(&self, user_id: Uuid) -> Result<Vec<DiagnosisRecord>, RepositoryError> {
        match self {
            Self::Dynamo(repo) => repo.get_user_records(user_id).await,
            Self::Memory(repo) => repo.get_user_records(user_id).await,
        }
    }

    async fn fetch_sorted(&self, user_id: Uuid) -> Result<Vec<DiagnosisRecord>, RepositoryError> {
        let mut records = self.fetch_all(user_id).await?;
        // newest first; id as the tiebreak keeps the order total
        records.sort_by(|a, b| {
            b.timestamp
                .cmp(&a.timestamp)
                .then_with(|| b.id.cmp(&a.id))
        });
        Ok(records)
    }
}

/// Windows an already-sorted record list. `page` is 1-indexed; any page
/// outside the range yields an empty window with the correct totals rather
/// than an error.
pub fn paginate(records: Vec<DiagnosisRecord>, page: u32, per_page: u32) -> HistoryPage {
    let per_page = per_page.max(1);
    let total = records.len() as u64;
    let pages = total.div_ceil(per_page as u64);

    let history = if page < 1 {
        Vec::new()
    } else {
        records
            .into_iter()
            .skip((page as usize - 1) * per_page as usize)
            .take(per_page as usize)
            .collect()
    };

    HistoryPage {
        history,
        total,
        pages,
        current_page: page,
        per_page,
    }
}

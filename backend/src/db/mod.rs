pub mod dynamodb_repository;
pub mod history_store;
pub mod memory_repository;

pub use dynamodb_repository::{DynamoDbRepository, RepositoryError};
pub use history_store::{HistoryStore, DEFAULT_PER_PAGE};
pub use memory_repository::MemoryRepository;

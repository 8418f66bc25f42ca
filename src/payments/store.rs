//! Payment record storage
//!
//! Uses redb to store payment attempts, with secondary indexes by external
//! intent id and by owning user. Every mutation runs inside one write
//! transaction, and redb serializes writers, so each read-modify-write is atomic.

use async_trait::async_trait;
use redb::{
    Database, MultimapTableDefinition, ReadableMultimapTable, ReadableTable, TableDefinition,
};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use super::model::PaymentAttempt;

/// Key: payment id. Value: serialized PaymentAttempt JSON
const PAYMENTS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("payments");

/// Key: external intent id. Value: payment id
const PAYMENTS_BY_INTENT_TABLE: TableDefinition<&str, &str> =
    TableDefinition::new("payments_by_intent");

/// Key: user id. Values: payment ids
const PAYMENTS_BY_USER_TABLE: MultimapTableDefinition<&str, &str> =
    MultimapTableDefinition::new("payments_by_user");

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("payment for intent {0} already exists")]
    DuplicateIntent(String),
    #[error("payment {0} already exists")]
    DuplicateId(Uuid),
    #[error("payment {0} does not exist")]
    Missing(Uuid),
    #[error("payment {id} was modified concurrently (expected version {expected}, found {found})")]
    Conflict { id: Uuid, expected: u64, found: u64 },
    #[error("payment {0} kept conflicting with concurrent updates")]
    Contended(Uuid),
    #[error("record encoding error: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("storage error: {0}")]
    Backend(String),
}

macro_rules! backend_error {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for StoreError {
                fn from(e: $ty) -> Self {
                    StoreError::Backend(e.to_string())
                }
            }
        )*
    };
}

backend_error!(
    redb::DatabaseError,
    redb::TransactionError,
    redb::TableError,
    redb::StorageError,
    redb::CommitError,
    std::io::Error,
);

#[async_trait]
pub trait PaymentStore: Send + Sync {
    /// Fails with `DuplicateIntent` when a record already owns the external intent id.
    async fn insert(&self, record: PaymentAttempt) -> Result<PaymentAttempt, StoreError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<PaymentAttempt>, StoreError>;

    async fn find_by_external_intent_id(
        &self,
        intent_id: &str,
    ) -> Result<Option<PaymentAttempt>, StoreError>;

    /// Newest `created_at` first.
    async fn find_all_by_user(&self, user_id: &str) -> Result<Vec<PaymentAttempt>, StoreError>;

    /// Compare-and-set keyed by id: succeeds only when the stored version equals
    /// `record.version`, and returns the record with its version incremented.
    async fn update(&self, record: PaymentAttempt) -> Result<PaymentAttempt, StoreError>;
}

/// redb-backed payment store
#[derive(Clone)]
pub struct RedbPaymentStore {
    db: Arc<Database>,
}

impl RedbPaymentStore {
    /// Create a new database instance or open an existing one, creating missing
    /// parent directories.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        if let Some(parent) = path.as_ref().parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path)?;
        Self::init(db)
    }

    /// Volatile store for tests and local experiments.
    pub fn in_memory() -> Result<Self, StoreError> {
        let db = Database::builder().create_with_backend(redb::backends::InMemoryBackend::new())?;
        Self::init(db)
    }

    fn init(db: Database) -> Result<Self, StoreError> {
        let write_txn = db.begin_write()?;
        {
            let _payments = write_txn.open_table(PAYMENTS_TABLE)?;
            let _by_intent = write_txn.open_table(PAYMENTS_BY_INTENT_TABLE)?;
            let _by_user = write_txn.open_multimap_table(PAYMENTS_BY_USER_TABLE)?;
        }
        write_txn.commit()?;

        tracing::info!("Payment store initialized");

        Ok(Self { db: Arc::new(db) })
    }

    fn load(&self, id: &str) -> Result<Option<PaymentAttempt>, StoreError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(PAYMENTS_TABLE)?;
        let record = match table.get(id)? {
            Some(bytes) => Some(serde_json::from_slice(bytes.value())?),
            None => None,
        };
        Ok(record)
    }
}

#[async_trait]
impl PaymentStore for RedbPaymentStore {
    async fn insert(&self, record: PaymentAttempt) -> Result<PaymentAttempt, StoreError> {
        let id = record.id.to_string();
        let value = serde_json::to_vec(&record)?;

        let write_txn = self.db.begin_write()?;
        {
            let mut by_intent = write_txn.open_table(PAYMENTS_BY_INTENT_TABLE)?;
            if by_intent.get(record.external_intent_id.as_str())?.is_some() {
                return Err(StoreError::DuplicateIntent(record.external_intent_id.clone()));
            }
            let mut payments = write_txn.open_table(PAYMENTS_TABLE)?;
            if payments.get(id.as_str())?.is_some() {
                return Err(StoreError::DuplicateId(record.id));
            }
            payments.insert(id.as_str(), value.as_slice())?;
            by_intent.insert(record.external_intent_id.as_str(), id.as_str())?;
            let mut by_user = write_txn.open_multimap_table(PAYMENTS_BY_USER_TABLE)?;
            by_user.insert(record.user_id.as_str(), id.as_str())?;
        }
        write_txn.commit()?;

        tracing::debug!(
            payment_id = %record.id,
            payment_intent_id = %record.external_intent_id,
            "Inserted payment record"
        );
        Ok(record)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<PaymentAttempt>, StoreError> {
        self.load(&id.to_string())
    }

    async fn find_by_external_intent_id(
        &self,
        intent_id: &str,
    ) -> Result<Option<PaymentAttempt>, StoreError> {
        let id = {
            let read_txn = self.db.begin_read()?;
            let by_intent = read_txn.open_table(PAYMENTS_BY_INTENT_TABLE)?;
            let found = by_intent.get(intent_id)?.map(|id| id.value().to_string());
            found
        };
        match id {
            Some(id) => self.load(&id),
            None => Ok(None),
        }
    }

    async fn find_all_by_user(&self, user_id: &str) -> Result<Vec<PaymentAttempt>, StoreError> {
        let read_txn = self.db.begin_read()?;
        let by_user = read_txn.open_multimap_table(PAYMENTS_BY_USER_TABLE)?;
        let payments = read_txn.open_table(PAYMENTS_TABLE)?;

        let mut records = Vec::new();
        for id in by_user.get(user_id)? {
            let id = id?;
            if let Some(bytes) = payments.get(id.value())? {
                records.push(serde_json::from_slice::<PaymentAttempt>(bytes.value())?);
            }
        }
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }

    async fn update(&self, record: PaymentAttempt) -> Result<PaymentAttempt, StoreError> {
        let id = record.id.to_string();

        let write_txn = self.db.begin_write()?;
        let saved = {
            let mut payments = write_txn.open_table(PAYMENTS_TABLE)?;
            let current: PaymentAttempt = match payments.get(id.as_str())? {
                Some(bytes) => serde_json::from_slice(bytes.value())?,
                None => return Err(StoreError::Missing(record.id)),
            };
            if current.version != record.version {
                return Err(StoreError::Conflict {
                    id: record.id,
                    expected: record.version,
                    found: current.version,
                });
            }

            let mut saved = record;
            // Identity fields are fixed at creation.
            saved.user_id = current.user_id;
            saved.amount = current.amount;
            saved.currency = current.currency;
            saved.external_intent_id = current.external_intent_id;
            saved.created_at = current.created_at;
            saved.version = current.version + 1;

            let value = serde_json::to_vec(&saved)?;
            payments.insert(id.as_str(), value.as_slice())?;
            saved
        };
        write_txn.commit()?;

        tracing::debug!(
            payment_id = %saved.id,
            status = %saved.status,
            version = saved.version,
            "Updated payment record"
        );
        Ok(saved)
    }
}

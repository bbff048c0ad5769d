use chrono::{DateTime, NaiveDate, Utc};
use dashmap::DashMap;
use metrics::counter;
use sea_orm::{
    ActiveModelTrait, ConnectionTrait, DatabaseConnection, DatabaseTransaction, DbBackend,
    EntityTrait, QuerySelect, Set,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, instrument, warn};

use crate::config::AppConfig;
use crate::db;
use crate::entities::request_sequence::{self, Entity as RequestSequence};
use crate::errors::ServiceError;

/// Formats an identifier as `PREFIX-YYYYMMDD-NNN`.
pub fn format_identifier(prefix: &str, day: NaiveDate, value: i32) -> String {
    format!("{}-{}-{:03}", prefix, day.format("%Y%m%d"), value)
}

fn validate_prefix(prefix: &str) -> Result<(), ServiceError> {
    if prefix.is_empty()
        || prefix.len() > 8
        || !prefix.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
    {
        return Err(ServiceError::ValidationError(format!(
            "Identifier prefix must be 1-8 uppercase letters or digits, got '{}'",
            prefix
        )));
    }
    Ok(())
}

/// An identifier reserved inside an open transaction.
///
/// The per-(prefix, day) lock stays held until the reservation is committed or
/// dropped. Dropping without committing rolls the transaction back, which also
/// returns the counter value, so aborted creations leave no gap.
pub struct IdReservation {
    id: String,
    started: Instant,
    txn: DatabaseTransaction,
    // Declared after `txn` so the rollback is issued before the lock is released.
    _guard: OwnedMutexGuard<()>,
}

impl IdReservation {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The transaction the reserved record must be written in.
    pub fn txn(&self) -> &DatabaseTransaction {
        &self.txn
    }

    /// Commits the reservation and everything written through [`Self::txn`].
    pub async fn commit(self) -> Result<String, ServiceError> {
        let IdReservation {
            id,
            started,
            txn,
            _guard,
        } = self;
        db::commit(txn, started).await?;
        counter!("warehouse_ops.id.allocated", 1);
        Ok(id)
    }
}

impl std::fmt::Debug for IdReservation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdReservation").field("id", &self.id).finish()
    }
}

/// Issues day-scoped sequential identifiers backed by the `request_sequences` counter table.
pub struct SequentialIdAllocator {
    db: Arc<DatabaseConnection>,
    locks: DashMap<(String, NaiveDate), Arc<Mutex<()>>>,
    lock_timeout: Duration,
    max_retries: u32,
}

impl SequentialIdAllocator {
    pub fn new(db: Arc<DatabaseConnection>, lock_timeout: Duration, max_retries: u32) -> Self {
        Self {
            db,
            locks: DashMap::new(),
            lock_timeout,
            max_retries: max_retries.max(1),
        }
    }

    pub fn from_config(db: Arc<DatabaseConnection>, config: &AppConfig) -> Self {
        Self::new(db, config.id_lock_timeout(), config.id_lock_max_retries)
    }

    /// Allocates and immediately commits the next identifier for `(prefix, day)`.
    #[instrument(skip(self))]
    pub async fn allocate_id(&self, prefix: &str, day: NaiveDate) -> Result<String, ServiceError> {
        self.reserve(prefix, day, Utc::now()).await?.commit().await
    }

    /// Reserves the next identifier and keeps its transaction open so the caller
    /// can persist the record under the same lock.
    pub async fn reserve(
        &self,
        prefix: &str,
        day: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<IdReservation, ServiceError> {
        validate_prefix(prefix)?;

        let guard = self.acquire(prefix, day).await?;
        let started = Instant::now();
        let txn = db::begin(&self.db).await?;
        let value = next_counter_value(&txn, prefix, day, now).await?;
        let id = format_identifier(prefix, day, value);
        debug!(prefix, %day, id = %id, "Reserved identifier");

        Ok(IdReservation {
            id,
            started,
            txn,
            _guard: guard,
        })
    }

    async fn acquire(&self, prefix: &str, day: NaiveDate) -> Result<OwnedMutexGuard<()>, ServiceError> {
        self.prune_idle_locks();
        let lock = self
            .locks
            .entry((prefix.to_string(), day))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        for attempt in 1..=self.max_retries {
            match tokio::time::timeout(self.lock_timeout, lock.clone().lock_owned()).await {
                Ok(guard) => return Ok(guard),
                Err(_) => {
                    counter!("warehouse_ops.id.lock_timeout", 1);
                    warn!(
                        prefix,
                        %day,
                        attempt,
                        max_retries = self.max_retries,
                        "Timed out waiting for identifier lock"
                    );
                    if attempt < self.max_retries {
                        tokio::time::sleep(Duration::from_millis(20 * u64::from(attempt))).await;
                    }
                }
            }
        }

        Err(ServiceError::AllocationConflict {
            prefix: prefix.to_string(),
            day,
        })
    }

    /// Drops lock entries nobody is holding or waiting on.
    fn prune_idle_locks(&self) {
        if self.locks.len() > 64 {
            self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        }
    }
}

impl std::fmt::Debug for SequentialIdAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SequentialIdAllocator")
            .field("lock_timeout", &self.lock_timeout)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

/// Read-then-increment of the day counter. Must run inside the transaction that
/// persists the new record.
async fn next_counter_value(
    txn: &DatabaseTransaction,
    prefix: &str,
    day: NaiveDate,
    now: DateTime<Utc>,
) -> Result<i32, ServiceError> {
    let mut query = RequestSequence::find_by_id((prefix.to_string(), day));
    if txn.get_database_backend() == DbBackend::Postgres {
        query = query.lock_exclusive();
    }

    let current = query.one(txn).await.map_err(ServiceError::db_error)?;
    match current {
        Some(row) => {
            let next = row.last_value + 1;
            let mut active: request_sequence::ActiveModel = row.into();
            active.last_value = Set(next);
            active.updated_at = Set(now);
            active.update(txn).await.map_err(ServiceError::db_error)?;
            Ok(next)
        }
        None => {
            request_sequence::ActiveModel {
                prefix: Set(prefix.to_string()),
                day: Set(day),
                last_value: Set(1),
                updated_at: Set(now),
            }
            .insert(txn)
            .await
            .map_err(ServiceError::db_error)?;
            Ok(1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_are_zero_padded_per_day() {
        let day = NaiveDate::from_ymd_opt(2024, 2, 9).unwrap();
        assert_eq!(format_identifier("PK", day, 1), "PK-20240209-001");
        assert_eq!(format_identifier("PX", day, 42), "PX-20240209-042");
        assert_eq!(format_identifier("PN", day, 1234), "PN-20240209-1234");
    }

    #[test]
    fn prefixes_must_be_short_uppercase_tokens() {
        assert!(validate_prefix("PK").is_ok());
        assert!(validate_prefix("").is_err());
        assert!(validate_prefix("pk").is_err());
        assert!(validate_prefix("P-K").is_err());
    }

    #[tokio::test]
    async fn held_lock_times_out_into_allocation_conflict() {
        let db = Arc::new(
            sea_orm::Database::connect("sqlite::memory:")
                .await
                .unwrap(),
        );
        let allocator = SequentialIdAllocator::new(db, Duration::from_millis(10), 2);
        let day = NaiveDate::from_ymd_opt(2024, 2, 1).unwrap();

        let _held = allocator.acquire("PK", day).await.unwrap();
        let err = allocator.acquire("PK", day).await.unwrap_err();
        assert!(matches!(err, ServiceError::AllocationConflict { ref prefix, .. } if prefix == "PK"));

        // Other prefixes and days are not blocked.
        assert!(allocator.acquire("PX", day).await.is_ok());
        assert!(allocator.acquire("PK", day.succ_opt().unwrap()).await.is_ok());
    }
}

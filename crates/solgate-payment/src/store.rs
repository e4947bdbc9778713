//! Durable payment storage
//!
//! [`PaymentStore`] is the contract the coordinator relies on: intent rows
//! keyed by reference, the per-wallet subscription ledger, and the combined
//! [`PaymentStore::settle`] step that completes an intent and extends the
//! subscription in one transaction.
//!
//! Correctness under concurrency comes from the database, not from
//! application locks. Every status change is a conditional `UPDATE ...
//! WHERE status = 'pending'`, and read-modify-write sequences run inside
//! `BEGIN IMMEDIATE` transactions, which also serialize writers in other
//! processes sharing the file.
//!
//! [`SqliteStore`] performs blocking `SQLite` I/O on the tokio blocking pool.
//! The connection mutex is never held across an `.await`.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, TransactionBehavior};
use tracing::{debug, info};

use crate::error::{PaymentError, PaymentResult};
use crate::intent::{IntentStatus, PaymentIntent, Subscription};
use crate::settings::{validate_setting, SettingsProvider, SiteSettings};

/// Result of settling a verified payment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    /// This call completed the intent and extended the subscription
    Credited { new_expiry: DateTime<Utc> },
    /// The intent was already completed with the same signature
    Replayed { new_expiry: DateTime<Utc> },
}

impl Settlement {
    pub fn new_expiry(&self) -> DateTime<Utc> {
        match self {
            Settlement::Credited { new_expiry } | Settlement::Replayed { new_expiry } => *new_expiry,
        }
    }
}

/// Intent store and subscription ledger
#[async_trait]
pub trait PaymentStore: Send + Sync {
    /// Insert a new intent. A reference collision is `DuplicateReference`.
    async fn insert_intent(&self, intent: &PaymentIntent) -> PaymentResult<()>;

    async fn get_intent(&self, reference: &str) -> PaymentResult<Option<PaymentIntent>>;

    /// All intents of a wallet, newest first
    async fn intents_for_wallet(&self, wallet: &str) -> PaymentResult<Vec<PaymentIntent>>;

    /// `pending -> completed`. Exactly one caller wins; the rest get the
    /// error matching the row's current status.
    async fn mark_completed(
        &self,
        reference: &str,
        tx_signature: &str,
        now: DateTime<Utc>,
    ) -> PaymentResult<()>;

    /// `pending -> failed`
    async fn mark_failed(&self, reference: &str, reason: &str) -> PaymentResult<()>;

    /// `pending | failed -> expired`. Returns whether the row changed.
    async fn mark_expired(&self, reference: &str) -> PaymentResult<bool>;

    /// Count a rejected attempt without changing status
    async fn record_attempt(&self, reference: &str, reason: &str) -> PaymentResult<()>;

    /// Expire every open intent whose window closed before `now`
    async fn expire_stale(&self, now: DateTime<Utc>) -> PaymentResult<usize>;

    async fn subscription(&self, wallet: &str) -> PaymentResult<Option<Subscription>>;

    /// Extend from `max(now, current expiry)` by `days`
    async fn extend_subscription(
        &self,
        wallet: &str,
        days: u32,
        now: DateTime<Utc>,
    ) -> PaymentResult<DateTime<Utc>>;

    /// Complete the intent and extend its wallet's subscription atomically
    async fn settle(
        &self,
        reference: &str,
        tx_signature: &str,
        days: u32,
        now: DateTime<Utc>,
    ) -> PaymentResult<Settlement>;
}

const SCHEMA_SQL: &str = "
    CREATE TABLE IF NOT EXISTS payment_intents (
        reference        TEXT PRIMARY KEY,
        wallet           TEXT NOT NULL,
        amount_lamports  INTEGER NOT NULL,
        status           TEXT NOT NULL,
        tx_signature     TEXT NULL,
        granted_until    INTEGER NULL,
        attempts         INTEGER NOT NULL DEFAULT 0,
        last_error       TEXT NULL,
        created_at       INTEGER NOT NULL,
        expires_at       INTEGER NOT NULL,
        completed_at     INTEGER NULL
    );
    CREATE UNIQUE INDEX IF NOT EXISTS idx_intents_tx_signature
        ON payment_intents(tx_signature) WHERE tx_signature IS NOT NULL;
    CREATE INDEX IF NOT EXISTS idx_intents_wallet
        ON payment_intents(wallet);
    CREATE INDEX IF NOT EXISTS idx_intents_status_expiry
        ON payment_intents(status, expires_at);

    CREATE TABLE IF NOT EXISTS subscriptions (
        wallet      TEXT PRIMARY KEY,
        expires_at  INTEGER NOT NULL,
        created_at  INTEGER NOT NULL,
        updated_at  INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS settings (
        key         TEXT PRIMARY KEY,
        value       TEXT NOT NULL,
        updated_at  INTEGER NOT NULL
    );
";

const INTENT_COLUMNS: &str = "reference, wallet, amount_lamports, status, tx_signature, \
     granted_until, attempts, last_error, created_at, expires_at, completed_at";

/// `SQLite` backed [`PaymentStore`] and [`SettingsProvider`]
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) a database file
    pub fn open(path: &Path) -> PaymentResult<Self> {
        let conn = Connection::open(path).map_err(db("open database"))?;
        conn.busy_timeout(StdDuration::from_secs(5))
            .map_err(db("set busy timeout"))?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))
            .map_err(db("enable WAL"))?;

        info!("Opened payment database at {:?}", path);
        Self::with_connection(conn)
    }

    /// Private in-memory database
    pub fn in_memory() -> PaymentResult<Self> {
        let conn = Connection::open_in_memory().map_err(db("open in-memory database"))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> PaymentResult<Self> {
        conn.execute_batch(SCHEMA_SQL).map_err(db("schema init"))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Store a setting after validating it
    pub async fn put_setting(&self, key: &str, value: &str, now: DateTime<Utc>) -> PaymentResult<()> {
        validate_setting(key, value)?;

        let (key, value) = (key.to_string(), value.to_string());
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO settings (key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                params![key, value, now.timestamp_millis()],
            )
            .map_err(db("put setting"))?;
            Ok(())
        })
        .await
    }

    /// Run blocking database work off the async executor
    async fn run<T, F>(&self, f: F) -> PaymentResult<T>
    where
        F: FnOnce(&mut Connection) -> PaymentResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|e| PaymentError::Storage(format!("connection mutex poisoned: {}", e)))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| PaymentError::Internal(format!("storage task failed: {}", e)))?
    }
}

#[async_trait]
impl PaymentStore for SqliteStore {
    async fn insert_intent(&self, intent: &PaymentIntent) -> PaymentResult<()> {
        let intent = intent.clone();
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO payment_intents
                 (reference, wallet, amount_lamports, status, tx_signature, granted_until,
                  attempts, last_error, created_at, expires_at, completed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    intent.reference,
                    intent.wallet,
                    intent.amount_lamports as i64,
                    intent.status.as_str(),
                    intent.tx_signature,
                    intent.granted_until.map(|t| t.timestamp_millis()),
                    intent.attempts,
                    intent.last_error,
                    intent.created_at.timestamp_millis(),
                    intent.expires_at.timestamp_millis(),
                    intent.completed_at.map(|t| t.timestamp_millis()),
                ],
            )
            .map_err(|e| {
                if is_constraint_violation(&e) {
                    PaymentError::DuplicateReference(intent.reference.clone())
                } else {
                    db("insert intent")(e)
                }
            })?;
            Ok(())
        })
        .await
    }

    async fn get_intent(&self, reference: &str) -> PaymentResult<Option<PaymentIntent>> {
        let reference = reference.to_string();
        self.run(move |conn| load_intent(conn, &reference)).await
    }

    async fn intents_for_wallet(&self, wallet: &str) -> PaymentResult<Vec<PaymentIntent>> {
        let wallet = wallet.to_string();
        self.run(move |conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {INTENT_COLUMNS} FROM payment_intents
                     WHERE wallet = ?1 ORDER BY created_at DESC, rowid DESC"
                ))
                .map_err(db("prepare wallet history"))?;

            let rows = stmt
                .query_map(params![wallet], row_to_intent)
                .map_err(db("query wallet history"))?;

            rows.collect::<Result<Vec<_>, _>>()
                .map_err(db("read wallet history"))
        })
        .await
    }

    async fn mark_completed(
        &self,
        reference: &str,
        tx_signature: &str,
        now: DateTime<Utc>,
    ) -> PaymentResult<()> {
        let (reference, tx_signature) = (reference.to_string(), tx_signature.to_string());
        self.run(move |conn| {
            let rows = conn
                .execute(
                    "UPDATE payment_intents
                     SET status = 'completed', tx_signature = ?2, completed_at = ?3
                     WHERE reference = ?1 AND status = 'pending'",
                    params![reference, tx_signature, now.timestamp_millis()],
                )
                .map_err(|e| signature_conflict(e, &tx_signature, "mark completed"))?;

            if rows == 0 {
                return Err(transition_error(conn, &reference)?);
            }
            Ok(())
        })
        .await
    }

    async fn mark_failed(&self, reference: &str, reason: &str) -> PaymentResult<()> {
        let (reference, reason) = (reference.to_string(), reason.to_string());
        self.run(move |conn| {
            let rows = conn
                .execute(
                    "UPDATE payment_intents
                     SET status = 'failed', last_error = ?2, attempts = attempts + 1
                     WHERE reference = ?1 AND status = 'pending'",
                    params![reference, reason],
                )
                .map_err(db("mark failed"))?;

            if rows == 0 {
                return Err(transition_error(conn, &reference)?);
            }
            Ok(())
        })
        .await
    }

    async fn mark_expired(&self, reference: &str) -> PaymentResult<bool> {
        let reference = reference.to_string();
        self.run(move |conn| {
            let rows = conn
                .execute(
                    "UPDATE payment_intents SET status = 'expired'
                     WHERE reference = ?1 AND status IN ('pending', 'failed')",
                    params![reference],
                )
                .map_err(db("mark expired"))?;
            Ok(rows > 0)
        })
        .await
    }

    async fn record_attempt(&self, reference: &str, reason: &str) -> PaymentResult<()> {
        let (reference, reason) = (reference.to_string(), reason.to_string());
        self.run(move |conn| {
            conn.execute(
                "UPDATE payment_intents
                 SET attempts = attempts + 1, last_error = ?2
                 WHERE reference = ?1 AND status = 'pending'",
                params![reference, reason],
            )
            .map_err(db("record attempt"))?;
            Ok(())
        })
        .await
    }

    async fn expire_stale(&self, now: DateTime<Utc>) -> PaymentResult<usize> {
        self.run(move |conn| {
            let rows = conn
                .execute(
                    "UPDATE payment_intents SET status = 'expired'
                     WHERE status IN ('pending', 'failed') AND expires_at < ?1",
                    params![now.timestamp_millis()],
                )
                .map_err(db("expire stale intents"))?;
            if rows > 0 {
                debug!("Expired {} stale payment intents", rows);
            }
            Ok(rows)
        })
        .await
    }

    async fn subscription(&self, wallet: &str) -> PaymentResult<Option<Subscription>> {
        let wallet = wallet.to_string();
        self.run(move |conn| {
            conn.query_row(
                "SELECT wallet, expires_at, created_at, updated_at
                 FROM subscriptions WHERE wallet = ?1",
                params![wallet],
                |row| {
                    Ok(Subscription {
                        wallet: row.get(0)?,
                        expires_at: millis_column(row, 1)?,
                        created_at: millis_column(row, 2)?,
                        updated_at: millis_column(row, 3)?,
                    })
                },
            )
            .optional()
            .map_err(db("read subscription"))
        })
        .await
    }

    async fn extend_subscription(
        &self,
        wallet: &str,
        days: u32,
        now: DateTime<Utc>,
    ) -> PaymentResult<DateTime<Utc>> {
        let wallet = wallet.to_string();
        self.run(move |conn| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(db("begin extension"))?;
            let new_expiry = extend_in_tx(&tx, &wallet, days, now)?;
            tx.commit().map_err(db("commit extension"))?;
            Ok(new_expiry)
        })
        .await
    }

    async fn settle(
        &self,
        reference: &str,
        tx_signature: &str,
        days: u32,
        now: DateTime<Utc>,
    ) -> PaymentResult<Settlement> {
        let (reference, tx_signature) = (reference.to_string(), tx_signature.to_string());
        self.run(move |conn| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(db("begin settlement"))?;

            let intent = load_intent(&tx, &reference)?
                .ok_or_else(|| PaymentError::IntentNotFound(reference.clone()))?;

            match intent.status {
                IntentStatus::Pending => {}
                IntentStatus::Completed => {
                    return match (&intent.tx_signature, intent.granted_until) {
                        (Some(sig), Some(new_expiry)) if *sig == tx_signature => {
                            Ok(Settlement::Replayed { new_expiry })
                        }
                        _ => Err(PaymentError::AlreadyProcessed(reference)),
                    };
                }
                _ => return Err(status_error(&intent)),
            }

            let credited_elsewhere: Option<String> = tx
                .query_row(
                    "SELECT reference FROM payment_intents WHERE tx_signature = ?1",
                    params![tx_signature],
                    |row| row.get(0),
                )
                .optional()
                .map_err(db("check signature reuse"))?;
            if let Some(other) = credited_elsewhere {
                return Err(PaymentError::AlreadyProcessed(format!(
                    "signature {} already credited to {}",
                    tx_signature, other
                )));
            }

            let new_expiry = extend_in_tx(&tx, &intent.wallet, days, now)?;

            let rows = tx
                .execute(
                    "UPDATE payment_intents
                     SET status = 'completed', tx_signature = ?2, completed_at = ?3,
                         granted_until = ?4, attempts = attempts + 1, last_error = NULL
                     WHERE reference = ?1 AND status = 'pending'",
                    params![
                        reference,
                        tx_signature,
                        now.timestamp_millis(),
                        new_expiry.timestamp_millis()
                    ],
                )
                .map_err(|e| signature_conflict(e, &tx_signature, "complete intent"))?;
            if rows != 1 {
                return Err(PaymentError::Internal(format!(
                    "intent {} changed inside its settlement",
                    reference
                )));
            }

            tx.commit().map_err(db("commit settlement"))?;

            debug!(
                "Settled {} for {} with {}; subscription until {}",
                reference, intent.wallet, tx_signature, new_expiry
            );
            Ok(Settlement::Credited { new_expiry })
        })
        .await
    }
}

#[async_trait]
impl SettingsProvider for SqliteStore {
    async fn current(&self) -> PaymentResult<SiteSettings> {
        let pairs = self
            .run(|conn| {
                let mut stmt = conn
                    .prepare("SELECT key, value FROM settings")
                    .map_err(db("prepare settings"))?;
                let rows = stmt
                    .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
                    .map_err(db("query settings"))?;
                rows.collect::<Result<Vec<_>, _>>().map_err(db("read settings"))
            })
            .await?;

        SiteSettings::from_pairs(pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
    }
}

/// Extend inside an open transaction; the caller commits
fn extend_in_tx(
    conn: &Connection,
    wallet: &str,
    days: u32,
    now: DateTime<Utc>,
) -> PaymentResult<DateTime<Utc>> {
    let current: Option<i64> = conn
        .query_row(
            "SELECT expires_at FROM subscriptions WHERE wallet = ?1",
            params![wallet],
            |row| row.get(0),
        )
        .optional()
        .map_err(db("read subscription expiry"))?;

    let base = match current {
        Some(ms) => from_millis(ms)?.max(now),
        None => now,
    };
    let new_expiry = Duration::try_days(i64::from(days))
        .and_then(|period| base.checked_add_signed(period))
        .ok_or_else(|| PaymentError::InvalidSetting {
            key: "subscription_days".into(),
            value: days.to_string(),
        })?;

    conn.execute(
        "INSERT INTO subscriptions (wallet, expires_at, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?3)
         ON CONFLICT(wallet) DO UPDATE
         SET expires_at = excluded.expires_at, updated_at = excluded.updated_at",
        params![wallet, new_expiry.timestamp_millis(), now.timestamp_millis()],
    )
    .map_err(db("write subscription"))?;

    debug!("Extended {} by {} days to {}", wallet, days, new_expiry);
    Ok(new_expiry)
}

fn load_intent(conn: &Connection, reference: &str) -> PaymentResult<Option<PaymentIntent>> {
    conn.query_row(
        &format!("SELECT {INTENT_COLUMNS} FROM payment_intents WHERE reference = ?1"),
        params![reference],
        row_to_intent,
    )
    .optional()
    .map_err(db("read intent"))
}

/// Why a conditional update matched no row
fn transition_error(conn: &Connection, reference: &str) -> PaymentResult<PaymentError> {
    Ok(match load_intent(conn, reference)? {
        None => PaymentError::IntentNotFound(reference.to_string()),
        Some(intent) => status_error(&intent),
    })
}

fn status_error(intent: &PaymentIntent) -> PaymentError {
    match intent.status {
        IntentStatus::Completed => PaymentError::AlreadyProcessed(intent.reference.clone()),
        IntentStatus::Expired => PaymentError::IntentExpired(intent.reference.clone()),
        IntentStatus::Failed => PaymentError::IntentFailed {
            reference: intent.reference.clone(),
            reason: intent.last_error.clone().unwrap_or_default(),
        },
        IntentStatus::Pending => {
            PaymentError::Internal(format!("intent {} is still pending", intent.reference))
        }
    }
}

fn row_to_intent(row: &rusqlite::Row<'_>) -> rusqlite::Result<PaymentIntent> {
    let status: String = row.get(3)?;
    let status = IntentStatus::from_str_checked(&status).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Text,
            format!("unknown intent status {:?}", status).into(),
        )
    })?;
    let amount: i64 = row.get(2)?;

    Ok(PaymentIntent {
        reference: row.get(0)?,
        wallet: row.get(1)?,
        amount_lamports: amount as u64,
        status,
        tx_signature: row.get(4)?,
        granted_until: optional_millis_column(row, 5)?,
        attempts: row.get(6)?,
        last_error: row.get(7)?,
        created_at: millis_column(row, 8)?,
        expires_at: millis_column(row, 9)?,
        completed_at: optional_millis_column(row, 10)?,
    })
}

fn millis_column(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let ms: i64 = row.get(idx)?;
    DateTime::from_timestamp_millis(ms).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Integer,
            format!("timestamp out of range: {}", ms).into(),
        )
    })
}

fn optional_millis_column(
    row: &rusqlite::Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<i64>>(idx)? {
        Some(_) => millis_column(row, idx).map(Some),
        None => Ok(None),
    }
}

fn from_millis(ms: i64) -> PaymentResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| PaymentError::Storage(format!("timestamp out of range: {}", ms)))
}

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(e, rusqlite::Error::SqliteFailure(err, _) if err.code == ErrorCode::ConstraintViolation)
}

/// The unique signature index fired: the transaction is credited elsewhere
fn signature_conflict(e: rusqlite::Error, tx_signature: &str, context: &str) -> PaymentError {
    if is_constraint_violation(&e) {
        PaymentError::AlreadyProcessed(format!("signature {} already credited", tx_signature))
    } else {
        db(context)(e)
    }
}

fn db(context: &str) -> impl Fn(rusqlite::Error) -> PaymentError + '_ {
    move |e| PaymentError::Storage(format!("{} failed: {}", context, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{signature, wallet};

    /// Stored timestamps keep millisecond precision
    fn now_ms() -> DateTime<Utc> {
        DateTime::from_timestamp_millis(Utc::now().timestamp_millis()).unwrap()
    }

    fn store() -> SqliteStore {
        SqliteStore::in_memory().expect("in-memory store")
    }

    fn intent(reference: &str, wallet: &str, now: DateTime<Utc>) -> PaymentIntent {
        PaymentIntent::new(
            reference.to_string(),
            wallet.to_string(),
            500_000_000,
            now,
            Duration::minutes(15),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_insert_and_get_intent() {
        let store = store();
        let now = now_ms();
        let original = intent("ref-1", &wallet(1), now);

        store.insert_intent(&original).await.unwrap();
        let loaded = store.get_intent("ref-1").await.unwrap().unwrap();

        assert_eq!(loaded.reference, "ref-1");
        assert_eq!(loaded.status, IntentStatus::Pending);
        assert_eq!(loaded.amount_lamports, 500_000_000);
        assert_eq!(loaded.expires_at.timestamp_millis(), original.expires_at.timestamp_millis());
        assert!(store.get_intent("ref-2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_reference_rejected() {
        let store = store();
        let now = now_ms();
        store.insert_intent(&intent("ref-1", &wallet(1), now)).await.unwrap();

        let result = store.insert_intent(&intent("ref-1", &wallet(2), now)).await;
        assert!(matches!(result, Err(PaymentError::DuplicateReference(_))));
    }

    #[tokio::test]
    async fn test_mark_completed_has_one_winner() {
        let store = store();
        let now = now_ms();
        store.insert_intent(&intent("ref-1", &wallet(1), now)).await.unwrap();

        store.mark_completed("ref-1", &signature(1), now).await.unwrap();
        let second = store.mark_completed("ref-1", &signature(2), now).await;
        assert!(matches!(second, Err(PaymentError::AlreadyProcessed(_))));

        let loaded = store.get_intent("ref-1").await.unwrap().unwrap();
        assert_eq!(loaded.status, IntentStatus::Completed);
        assert_eq!(loaded.tx_signature, Some(signature(1)));
        assert!(loaded.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_mark_completed_unknown_reference() {
        let store = store();
        let result = store.mark_completed("nope", &signature(1), now_ms()).await;
        assert!(matches!(result, Err(PaymentError::IntentNotFound(_))));
    }

    #[tokio::test]
    async fn test_mark_failed_only_from_pending() {
        let store = store();
        let now = now_ms();
        store.insert_intent(&intent("ref-1", &wallet(1), now)).await.unwrap();

        store.mark_failed("ref-1", "Invalid recipient").await.unwrap();
        let loaded = store.get_intent("ref-1").await.unwrap().unwrap();
        assert_eq!(loaded.status, IntentStatus::Failed);
        assert_eq!(loaded.last_error.as_deref(), Some("Invalid recipient"));
        assert_eq!(loaded.attempts, 1);

        // Failed is terminal for completion
        let result = store.mark_completed("ref-1", &signature(1), now).await;
        assert!(matches!(result, Err(PaymentError::IntentFailed { .. })));
    }

    #[tokio::test]
    async fn test_record_attempt_keeps_status() {
        let store = store();
        let now = now_ms();
        store.insert_intent(&intent("ref-1", &wallet(1), now)).await.unwrap();

        store.record_attempt("ref-1", "Transaction not found").await.unwrap();
        store.record_attempt("ref-1", "Reference not found in transaction").await.unwrap();

        let loaded = store.get_intent("ref-1").await.unwrap().unwrap();
        assert_eq!(loaded.status, IntentStatus::Pending);
        assert_eq!(loaded.attempts, 2);
        assert_eq!(loaded.last_error.as_deref(), Some("Reference not found in transaction"));
    }

    #[tokio::test]
    async fn test_expire_stale_leaves_completed_and_fresh_intents() {
        let store = store();
        let t0 = now_ms();
        store.insert_intent(&intent("old", &wallet(1), t0)).await.unwrap();
        store.insert_intent(&intent("done", &wallet(1), t0)).await.unwrap();
        store
            .insert_intent(&intent("fresh", &wallet(1), t0 + Duration::minutes(10)))
            .await
            .unwrap();
        store.mark_completed("done", &signature(1), t0).await.unwrap();

        let expired = store.expire_stale(t0 + Duration::minutes(20)).await.unwrap();
        assert_eq!(expired, 1);

        let status = |r: &'static str| {
            let store = store.clone();
            async move { store.get_intent(r).await.unwrap().unwrap().status }
        };
        assert_eq!(status("old").await, IntentStatus::Expired);
        assert_eq!(status("done").await, IntentStatus::Completed);
        assert_eq!(status("fresh").await, IntentStatus::Pending);

        // Nothing left to expire
        assert!(!store.mark_expired("done").await.unwrap());
    }

    #[tokio::test]
    async fn test_extension_accumulates() {
        let store = store();
        let now = now_ms();
        let w = wallet(1);

        let first = store.extend_subscription(&w, 10, now).await.unwrap();
        let second = store.extend_subscription(&w, 20, now).await.unwrap();
        assert_eq!(first, now + Duration::days(10));
        assert_eq!(second, now + Duration::days(30));

        let other = wallet(2);
        let once = store.extend_subscription(&other, 30, now).await.unwrap();
        assert_eq!(once.timestamp_millis(), second.timestamp_millis());
    }

    #[tokio::test]
    async fn test_extension_after_lapse_starts_from_now() {
        let store = store();
        let t0 = now_ms();
        let w = wallet(1);

        store.extend_subscription(&w, 30, t0).await.unwrap();
        let later = t0 + Duration::days(45);
        let renewed = store.extend_subscription(&w, 30, later).await.unwrap();
        assert_eq!(renewed, later + Duration::days(30));

        let sub = store.subscription(&w).await.unwrap().unwrap();
        assert_eq!(sub.expires_at.timestamp_millis(), renewed.timestamp_millis());
        assert_eq!(sub.created_at.timestamp_millis(), t0.timestamp_millis());
    }

    #[tokio::test]
    async fn test_extension_past_calendar_range_leaves_store_usable() {
        let store = store();
        let now = now_ms();
        let w = wallet(1);

        let result = store.extend_subscription(&w, u32::MAX, now).await;
        assert!(matches!(result, Err(PaymentError::InvalidSetting { .. })));
        assert!(store.subscription(&w).await.unwrap().is_none());

        // The connection is still healthy afterwards
        assert!(store.get_intent("x").await.unwrap().is_none());
        store.insert_intent(&intent("ref-1", &w, now)).await.unwrap();
        let settled = store.settle("ref-1", &signature(1), 30, now).await.unwrap();
        assert_eq!(settled.new_expiry(), now + Duration::days(30));
    }

    #[tokio::test]
    async fn test_settle_credits_once() {
        let store = store();
        let now = now_ms();
        let w = wallet(1);
        store.insert_intent(&intent("ref-1", &w, now)).await.unwrap();

        let first = store.settle("ref-1", &signature(1), 30, now).await.unwrap();
        assert_eq!(first, Settlement::Credited { new_expiry: now + Duration::days(30) });

        // Same signature again: replay, no second extension
        let again = store.settle("ref-1", &signature(1), 30, now).await.unwrap();
        assert!(matches!(again, Settlement::Replayed { .. }));
        assert_eq!(again.new_expiry().timestamp_millis(), first.new_expiry().timestamp_millis());

        let sub = store.subscription(&w).await.unwrap().unwrap();
        assert_eq!(sub.expires_at.timestamp_millis(), first.new_expiry().timestamp_millis());

        // Different signature against a completed intent
        let other = store.settle("ref-1", &signature(2), 30, now).await;
        assert!(matches!(other, Err(PaymentError::AlreadyProcessed(_))));

        let loaded = store.get_intent("ref-1").await.unwrap().unwrap();
        assert_eq!(loaded.status, IntentStatus::Completed);
        assert_eq!(
            loaded.granted_until.map(|t| t.timestamp_millis()),
            Some(first.new_expiry().timestamp_millis())
        );
    }

    #[tokio::test]
    async fn test_signature_cannot_credit_two_intents() {
        let store = store();
        let now = now_ms();
        let w = wallet(1);
        store.insert_intent(&intent("ref-1", &w, now)).await.unwrap();
        store.insert_intent(&intent("ref-2", &w, now)).await.unwrap();

        store.settle("ref-1", &signature(1), 30, now).await.unwrap();
        let reused = store.settle("ref-2", &signature(1), 30, now).await;
        assert!(matches!(reused, Err(PaymentError::AlreadyProcessed(_))));

        // Rolled back: ref-2 untouched, subscription extended once
        let loaded = store.get_intent("ref-2").await.unwrap().unwrap();
        assert_eq!(loaded.status, IntentStatus::Pending);
        let sub = store.subscription(&w).await.unwrap().unwrap();
        assert_eq!(sub.expires_at.timestamp_millis(), (now + Duration::days(30)).timestamp_millis());
    }

    #[tokio::test]
    async fn test_settle_rejects_expired_intent() {
        let store = store();
        let now = now_ms();
        store.insert_intent(&intent("ref-1", &wallet(1), now)).await.unwrap();
        store.mark_expired("ref-1").await.unwrap();

        let result = store.settle("ref-1", &signature(1), 30, now).await;
        assert!(matches!(result, Err(PaymentError::IntentExpired(_))));
        assert!(store.subscription(&wallet(1)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_wallet_history_newest_first() {
        let store = store();
        let t0 = now_ms();
        let w = wallet(1);
        store.insert_intent(&intent("a", &w, t0)).await.unwrap();
        store.insert_intent(&intent("b", &w, t0 + Duration::minutes(1))).await.unwrap();
        store.insert_intent(&intent("c", &wallet(2), t0)).await.unwrap();

        let history = store.intents_for_wallet(&w).await.unwrap();
        let refs: Vec<_> = history.iter().map(|i| i.reference.as_str()).collect();
        assert_eq!(refs, vec!["b", "a"]);
    }

    #[tokio::test]
    async fn test_settings_roundtrip() {
        let store = store();
        let now = now_ms();

        assert_eq!(store.current().await.unwrap(), SiteSettings::default());

        store.put_setting("is_paused", "true", now).await.unwrap();
        store.put_setting("price_sol", "1.25", now).await.unwrap();
        store.put_setting("price_sol", "0.75", now).await.unwrap();

        let settings = store.current().await.unwrap();
        assert!(settings.is_paused);
        assert_eq!(settings.price_lamports, 750_000_000);

        assert!(store.put_setting("price_sol", "cheap", now).await.is_err());
    }
}

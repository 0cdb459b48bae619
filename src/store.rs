// 🗄️ Notification Store - remembers what was already pushed (SQLite + WAL)

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

use crate::transaction::Transaction;

pub struct SeenStore {
    conn: Connection,
}

impl SeenStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open state database: {}", path.display()))?;
        // Enable WAL mode for crash recovery
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS notified (
                idempotency_hash TEXT PRIMARY KEY,
                date TEXT NOT NULL,
                amount TEXT NOT NULL,
                currency TEXT NOT NULL,
                applicant_name TEXT,
                notified_at TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_notified_date ON notified(date)",
            [],
        )?;
        Ok(SeenStore { conn })
    }

    pub fn contains(&self, hash: &str) -> Result<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM notified WHERE idempotency_hash = ?1",
                params![hash],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Record `tx` as notified under `hash`; recording twice is a no-op
    pub fn mark(&self, hash: &str, tx: &Transaction) -> Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO notified
                (idempotency_hash, date, amount, currency, applicant_name, notified_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                hash,
                tx.date.to_string(),
                tx.amount.to_string(),
                tx.currency,
                tx.applicant_name,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn count(&self) -> Result<i64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM notified", [], |row| row.get(0))?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::{Amount, TransactionStatus};
    use chrono::NaiveDate;

    fn tx(cents: i64) -> Transaction {
        Transaction::new(
            NaiveDate::from_ymd_opt(2024, 3, 20).unwrap(),
            TransactionStatus::Credit,
            Amount(cents),
            "EUR",
        )
        .with_applicant("ARBEITGEBER GMBH", None)
    }

    #[test]
    fn test_mark_and_contains() {
        let store = SeenStore::open_in_memory().unwrap();
        let a = tx(100);
        let b = tx(200);

        assert!(!store.contains(&a.idempotency_hash()).unwrap());
        store.mark(&a.idempotency_hash(), &a).unwrap();
        assert!(store.contains(&a.idempotency_hash()).unwrap());
        assert!(!store.contains(&b.idempotency_hash()).unwrap());
    }

    #[test]
    fn test_mark_twice_is_idempotent() {
        let store = SeenStore::open_in_memory().unwrap();
        let a = tx(100);
        store.mark(&a.idempotency_hash(), &a).unwrap();
        store.mark(&a.idempotency_hash(), &a).unwrap();
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.db");

        {
            let store = SeenStore::open(&path).unwrap();
            let a = tx(100);
            store.mark(&a.idempotency_hash(), &a).unwrap();
        }

        let store = SeenStore::open(&path).unwrap();
        assert!(store.contains(&tx(100).idempotency_hash()).unwrap());
    }
}

//! SQLite working copy of a downloaded budget.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rusqlite::{params, Connection};
use tokio::sync::Mutex;

use super::{BudgetError, Categorization, Category, Transaction};

const SCHEMA: &str = r#"
PRAGMA journal_mode = WAL;

CREATE TABLE IF NOT EXISTS category_groups (
    id TEXT PRIMARY KEY NOT NULL,
    name TEXT NOT NULL,
    is_income INTEGER NOT NULL DEFAULT 0,
    position INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS categories (
    id TEXT PRIMARY KEY NOT NULL,
    name TEXT NOT NULL,
    group_id TEXT,
    is_income INTEGER NOT NULL DEFAULT 0,
    position INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS payees (
    id TEXT PRIMARY KEY NOT NULL,
    name TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS transactions (
    id TEXT PRIMARY KEY NOT NULL,
    account_id TEXT NOT NULL,
    date TEXT NOT NULL,
    payee_id TEXT,
    imported_payee TEXT,
    notes TEXT,
    amount INTEGER NOT NULL,
    category_id TEXT,
    is_parent INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_transactions_uncategorized
    ON transactions(date DESC, id) WHERE category_id IS NULL AND is_parent = 0;

CREATE TABLE IF NOT EXISTS sync_state (
    key TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL
);
"#;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedCategoryGroup {
    pub id: String,
    pub name: String,
    pub is_income: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedCategory {
    pub id: String,
    pub name: String,
    pub group_id: Option<String>,
    pub is_income: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedPayee {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedTransaction {
    pub id: String,
    pub account_id: String,
    pub date: String,
    pub payee_id: Option<String>,
    pub imported_payee: Option<String>,
    pub notes: Option<String>,
    pub amount: i64,
    pub category_id: Option<String>,
    /// Split parents only hold their children and are never listed
    pub is_parent: bool,
}

/// Everything pulled from the remote budget in one pass.
///
/// Groups and categories keep the order in which they were pulled.
#[derive(Debug, Clone, Default)]
pub struct BudgetSnapshot {
    pub groups: Vec<CachedCategoryGroup>,
    pub categories: Vec<CachedCategory>,
    pub payees: Vec<CachedPayee>,
    pub transactions: Vec<CachedTransaction>,
}

pub struct BudgetCache {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
}

impl BudgetCache {
    /// Open (or create) the working copy at `path`.
    pub async fn open(path: PathBuf) -> Result<Self, BudgetError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let db_path = path.clone();
        let conn = tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&db_path)?;
            conn.execute_batch(SCHEMA)?;
            Ok::<_, BudgetError>(conn)
        })
        .await
        .map_err(|e| BudgetError::Cache(format!("Task join error: {}", e)))??;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the whole working copy with `snapshot` in one transaction.
    pub async fn replace_snapshot(&self, snapshot: BudgetSnapshot) -> Result<(), BudgetError> {
        let conn = self.conn.clone();
        let synced_at = chrono::Utc::now().to_rfc3339();
        tokio::task::spawn_blocking(move || -> Result<(), BudgetError> {
            let mut conn = conn.blocking_lock();
            let tx = conn.transaction()?;

            tx.execute_batch(
                "DELETE FROM category_groups;
                 DELETE FROM categories;
                 DELETE FROM payees;
                 DELETE FROM transactions;",
            )?;

            {
                let mut stmt = tx.prepare(
                    "INSERT OR REPLACE INTO category_groups (id, name, is_income, position)
                     VALUES (?1, ?2, ?3, ?4)",
                )?;
                for (position, group) in snapshot.groups.iter().enumerate() {
                    stmt.execute(params![
                        group.id,
                        group.name,
                        group.is_income,
                        position as i64
                    ])?;
                }
            }

            {
                let mut stmt = tx.prepare(
                    "INSERT OR REPLACE INTO categories (id, name, group_id, is_income, position)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                )?;
                for (position, category) in snapshot.categories.iter().enumerate() {
                    stmt.execute(params![
                        category.id,
                        category.name,
                        category.group_id,
                        category.is_income,
                        position as i64
                    ])?;
                }
            }

            {
                let mut stmt =
                    tx.prepare("INSERT OR REPLACE INTO payees (id, name) VALUES (?1, ?2)")?;
                for payee in &snapshot.payees {
                    stmt.execute(params![payee.id, payee.name])?;
                }
            }

            {
                let mut stmt = tx.prepare(
                    "INSERT OR REPLACE INTO transactions
                        (id, account_id, date, payee_id, imported_payee, notes, amount, category_id, is_parent)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                )?;
                for t in &snapshot.transactions {
                    stmt.execute(params![
                        t.id,
                        t.account_id,
                        t.date,
                        t.payee_id,
                        t.imported_payee,
                        t.notes,
                        t.amount,
                        t.category_id,
                        t.is_parent
                    ])?;
                }
            }

            tx.execute(
                "INSERT OR REPLACE INTO sync_state (key, value) VALUES ('last_synced_at', ?1)",
                params![synced_at],
            )?;

            tx.commit()?;
            Ok(())
        })
        .await
        .map_err(|e| BudgetError::Cache(format!("Task join error: {}", e)))?
    }

    pub async fn categories(&self) -> Result<Vec<Category>, BudgetError> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<Category>, BudgetError> {
            let conn = conn.blocking_lock();
            let mut stmt = conn.prepare(
                "SELECT c.id, c.name, COALESCE(g.name, ''), c.is_income
                 FROM categories c
                 LEFT JOIN category_groups g ON g.id = c.group_id
                 ORDER BY COALESCE(g.position, 9223372036854775807), c.position",
            )?;

            let categories = stmt
                .query_map([], |row| {
                    Ok(Category {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        group_name: row.get(2)?,
                        is_income: row.get(3)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;

            Ok(categories)
        })
        .await
        .map_err(|e| BudgetError::Cache(format!("Task join error: {}", e)))?
    }

    pub async fn count_uncategorized(&self) -> Result<u64, BudgetError> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || -> Result<u64, BudgetError> {
            let conn = conn.blocking_lock();
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM transactions WHERE category_id IS NULL AND is_parent = 0",
                [],
                |row| row.get(0),
            )?;
            Ok(count.max(0) as u64)
        })
        .await
        .map_err(|e| BudgetError::Cache(format!("Task join error: {}", e)))?
    }

    pub async fn uncategorized(
        &self,
        limit: u32,
        offset: u64,
    ) -> Result<Vec<Transaction>, BudgetError> {
        let conn = self.conn.clone();
        let offset = i64::try_from(offset).unwrap_or(i64::MAX);
        tokio::task::spawn_blocking(move || -> Result<Vec<Transaction>, BudgetError> {
            let conn = conn.blocking_lock();
            let mut stmt = conn.prepare(
                "SELECT t.id, t.date,
                        COALESCE(NULLIF(p.name, ''), NULLIF(t.imported_payee, ''), ''),
                        COALESCE(t.notes, ''),
                        t.amount
                 FROM transactions t
                 LEFT JOIN payees p ON p.id = t.payee_id
                 WHERE t.category_id IS NULL AND t.is_parent = 0
                 ORDER BY t.date DESC, t.id ASC
                 LIMIT ?1 OFFSET ?2",
            )?;

            let transactions = stmt
                .query_map(params![limit as i64, offset], |row| {
                    Ok(Transaction {
                        id: row.get(0)?,
                        date: row.get(1)?,
                        payee_name: row.get(2)?,
                        notes: row.get(3)?,
                        amount_cents: row.get(4)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;

            Ok(transactions)
        })
        .await
        .map_err(|e| BudgetError::Cache(format!("Task join error: {}", e)))?
    }

    /// Record category assignments the remote service already accepted.
    pub async fn apply_categorizations(
        &self,
        writes: Vec<Categorization>,
    ) -> Result<(), BudgetError> {
        if writes.is_empty() {
            return Ok(());
        }
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || -> Result<(), BudgetError> {
            let mut conn = conn.blocking_lock();
            let tx = conn.transaction()?;
            {
                let mut stmt =
                    tx.prepare("UPDATE transactions SET category_id = ?1 WHERE id = ?2")?;
                for write in &writes {
                    stmt.execute(params![write.category_id, write.transaction_id])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await
        .map_err(|e| BudgetError::Cache(format!("Task join error: {}", e)))?
    }

    #[cfg(test)]
    pub async fn last_synced_at(&self) -> Result<Option<String>, BudgetError> {
        use rusqlite::OptionalExtension;

        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || -> Result<Option<String>, BudgetError> {
            let conn = conn.blocking_lock();
            let value = conn
                .query_row(
                    "SELECT value FROM sync_state WHERE key = 'last_synced_at'",
                    [],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(value)
        })
        .await
        .map_err(|e| BudgetError::Cache(format!("Task join error: {}", e)))?
    }
}

//! Budget data access.
//!
//! The [`BudgetAccessor`] owns the local cache directory of one remote budget
//! and drives a [`BudgetBackend`] through it. Backends:
//! - `actual`: remote Actual Budget HTTP API with a SQLite working copy
//! - `memory`: in-memory fixture (tests only)

mod accessor;
mod actual;
mod cache;
#[cfg(test)]
pub(crate) mod memory;

pub use accessor::{BudgetAccessor, DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT};
pub use actual::ActualBackend;
pub use cache::BudgetCache;

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ConfigError;

/// A budget category as seen by tool callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub id: String,
    pub name: String,
    pub group_name: String,
    /// Whether transactions in this category count as income rather than expenses
    pub is_income: bool,
}

/// A transaction without a category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: String,
    /// Booking date, `YYYY-MM-DD`
    pub date: String,
    pub payee_name: String,
    pub notes: String,
    /// Negative for expenses, positive for deposits
    pub amount_cents: i64,
}

/// A requested assignment of one transaction to one category.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Categorization {
    pub transaction_id: String,
    pub category_id: String,
}

impl Categorization {
    pub fn new(transaction_id: impl Into<String>, category_id: impl Into<String>) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            category_id: category_id.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub limit: u32,
    pub offset: u64,
    pub total: u64,
    pub has_more: bool,
}

/// One page of uncategorized transactions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UncategorizedPage {
    pub transactions: Vec<Transaction>,
    pub pagination: Pagination,
}

/// Result of a bulk categorization. Anything not listed succeeded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategorizeOutcome {
    pub failed_categorizations: Vec<Categorization>,
}

#[derive(Debug, Error)]
pub enum BudgetError {
    #[error("Budget configuration error: {0}")]
    Config(String),

    #[error("Remote budget server unreachable: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Remote budget server returned {status}: {message}")]
    Remote { status: u16, message: String },

    #[error("Budget backend is not connected")]
    NotConnected,

    #[error("Local budget cache error: {0}")]
    Cache(String),

    #[error("Budget cache directory error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ConfigError> for BudgetError {
    fn from(err: ConfigError) -> Self {
        BudgetError::Config(err.to_string())
    }
}

impl From<rusqlite::Error> for BudgetError {
    fn from(err: rusqlite::Error) -> Self {
        BudgetError::Cache(err.to_string())
    }
}

/// The remote budgeting client capability set used by [`BudgetAccessor`].
///
/// Implementations own whatever they store inside the data directory handed
/// to [`connect`](BudgetBackend::connect); the accessor only creates and
/// removes the directory itself.
#[async_trait]
pub trait BudgetBackend: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Validate configuration and open a session with the remote service,
    /// using `data_dir` as the local storage root.
    async fn connect(&self, data_dir: &Path) -> Result<(), BudgetError>;

    /// Download the configured budget into the data directory.
    async fn download_budget(&self) -> Result<(), BudgetError>;

    /// Pull remote changes into the local working copy.
    async fn sync(&self) -> Result<(), BudgetError>;

    /// All categories, in remote order.
    async fn categories(&self) -> Result<Vec<Category>, BudgetError>;

    /// Number of transactions whose category is null.
    async fn count_uncategorized(&self) -> Result<u64, BudgetError>;

    /// One window of uncategorized transactions in a stable order.
    async fn uncategorized_transactions(
        &self,
        limit: u32,
        offset: u64,
    ) -> Result<Vec<Transaction>, BudgetError>;

    /// Open a batch scope. Writes issued until the matching
    /// [`commit_batch`](BudgetBackend::commit_batch) are flushed together.
    /// Items still succeed or fail independently.
    async fn begin_batch(&self) -> Result<(), BudgetError>;

    /// Assign `category_id` to `transaction_id` on the remote service.
    async fn set_transaction_category(
        &self,
        transaction_id: &str,
        category_id: &str,
    ) -> Result<(), BudgetError>;

    /// Close a batch scope opened by [`begin_batch`](BudgetBackend::begin_batch).
    async fn commit_batch(&self) -> Result<(), BudgetError>;

    /// Release local handles into the data directory. Idempotent.
    async fn disconnect(&self);
}

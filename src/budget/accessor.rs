//! Cache-aware access to one remote budget.
//!
//! Every data operation first checks that the cache directory is present and
//! re-initializes it if it was evicted. The check is not serialized: two
//! callers that both see a missing directory both re-download. Initialization
//! is idempotent, so they converge; the cost is an extra download.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::join_all;

use super::{
    BudgetBackend, BudgetError, Categorization, CategorizeOutcome, Category, Pagination,
    UncategorizedPage,
};

pub const DEFAULT_PAGE_LIMIT: u32 = 100;
pub const MAX_PAGE_LIMIT: u32 = 1000;

pub struct BudgetAccessor {
    cache_dir: PathBuf,
    backend: Arc<dyn BudgetBackend>,
    /// Best-effort; the directory check is authoritative.
    initialized: AtomicBool,
}

impl BudgetAccessor {
    pub fn new(cache_dir: impl Into<PathBuf>, backend: Arc<dyn BudgetBackend>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            backend,
            initialized: AtomicBool::new(false),
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Whether the cache directory exists right now.
    pub async fn cache_available(&self) -> bool {
        tokio::fs::try_exists(&self.cache_dir).await.unwrap_or(false)
    }

    /// Create the cache directory, connect to the remote service and
    /// download the budget into it.
    pub async fn initialize(&self) -> Result<(), BudgetError> {
        tokio::fs::create_dir_all(&self.cache_dir).await?;
        self.backend.connect(&self.cache_dir).await?;
        self.backend.download_budget().await?;
        self.initialized.store(true, Ordering::SeqCst);
        tracing::info!(
            "Budget cache ready at {} (backend: {})",
            self.cache_dir.display(),
            self.backend.name()
        );
        Ok(())
    }

    async fn ensure_cache_exists(&self) -> Result<(), BudgetError> {
        if self.cache_available().await && self.is_initialized() {
            return Ok(());
        }
        self.initialized.store(false, Ordering::SeqCst);
        tracing::warn!(
            "Budget cache at {} is missing or uninitialized, re-initializing",
            self.cache_dir.display()
        );
        self.initialize().await
    }

    pub async fn get_categories(&self) -> Result<Vec<Category>, BudgetError> {
        self.ensure_cache_exists().await?;
        self.backend.sync().await?;
        self.backend.categories().await
    }

    /// One page of uncategorized transactions.
    ///
    /// `limit` must already be within `1..=MAX_PAGE_LIMIT`; it is not clamped here.
    pub async fn get_uncategorized_transactions(
        &self,
        limit: u32,
        offset: u64,
    ) -> Result<UncategorizedPage, BudgetError> {
        self.ensure_cache_exists().await?;
        self.backend.sync().await?;

        let total = self.backend.count_uncategorized().await?;
        let transactions = self
            .backend
            .uncategorized_transactions(limit, offset)
            .await?;

        Ok(UncategorizedPage {
            transactions,
            pagination: Pagination {
                limit,
                offset,
                total,
                has_more: offset.saturating_add(u64::from(limit)) < total,
            },
        })
    }

    /// Apply every categorization independently and report the ones the
    /// remote service rejected, in input order.
    pub async fn categorize_transactions(
        &self,
        categorizations: Vec<Categorization>,
    ) -> Result<CategorizeOutcome, BudgetError> {
        if categorizations.is_empty() {
            return Ok(CategorizeOutcome::default());
        }
        self.ensure_cache_exists().await?;

        let backend = &self.backend;
        backend.begin_batch().await?;
        let results = join_all(categorizations.iter().map(|c| {
            backend.set_transaction_category(&c.transaction_id, &c.category_id)
        }))
        .await;
        if let Err(e) = backend.commit_batch().await {
            tracing::warn!("Failed to flush categorized transactions to the local cache: {}", e);
        }

        let total = categorizations.len();
        let mut failed = Vec::new();
        for (categorization, result) in categorizations.into_iter().zip(results) {
            if let Err(e) = result {
                tracing::debug!(
                    "Categorizing {} as {} failed: {}",
                    categorization.transaction_id,
                    categorization.category_id,
                    e
                );
                failed.push(categorization);
            }
        }

        tracing::info!(
            "Categorized {} transactions ({} failed)",
            total - failed.len(),
            failed.len()
        );

        Ok(CategorizeOutcome {
            failed_categorizations: failed,
        })
    }

    /// Remove the cache directory. Removing an absent cache is a no-op.
    pub async fn reset(&self) -> Result<(), BudgetError> {
        self.backend.disconnect().await;
        self.initialized.store(false, Ordering::SeqCst);
        match tokio::fs::remove_dir_all(&self.cache_dir).await {
            Ok(()) => {
                tracing::info!("Removed budget cache at {}", self.cache_dir.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

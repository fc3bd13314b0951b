//! In-memory budget backend (non-persistent, tests only).
//!
//! Plays the remote authority: updates naming an unknown transaction or
//! category are rejected the way the remote service would reject them.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{BudgetBackend, BudgetError, Category, Transaction};

struct StoredTransaction {
    transaction: Transaction,
    category_id: Option<String>,
}

pub(crate) struct InMemoryBudget {
    categories: Vec<Category>,
    transactions: RwLock<Vec<StoredTransaction>>,
    data_dir: RwLock<Option<PathBuf>>,
    connect_error: Option<String>,
    update_delay: Duration,
    downloaded: AtomicBool,
    connects: AtomicUsize,
    downloads: AtomicUsize,
    syncs: AtomicUsize,
    updates: AtomicUsize,
    batches: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl InMemoryBudget {
    pub fn new(categories: Vec<Category>, transactions: Vec<Transaction>) -> Self {
        Self {
            categories,
            transactions: RwLock::new(
                transactions
                    .into_iter()
                    .map(|transaction| StoredTransaction {
                        transaction,
                        category_id: None,
                    })
                    .collect(),
            ),
            data_dir: RwLock::new(None),
            connect_error: None,
            update_delay: Duration::ZERO,
            downloaded: AtomicBool::new(false),
            connects: AtomicUsize::new(0),
            downloads: AtomicUsize::new(0),
            syncs: AtomicUsize::new(0),
            updates: AtomicUsize::new(0),
            batches: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Make every `connect` fail with a configuration error.
    pub fn failing_connect(mut self, message: impl Into<String>) -> Self {
        self.connect_error = Some(message.into());
        self
    }

    /// Hold each update for `delay` so overlapping calls become observable.
    pub fn with_update_delay(mut self, delay: Duration) -> Self {
        self.update_delay = delay;
        self
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn download_count(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }

    pub fn sync_count(&self) -> usize {
        self.syncs.load(Ordering::SeqCst)
    }

    pub fn update_count(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }

    pub fn batch_count(&self) -> usize {
        self.batches.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub async fn category_of(&self, transaction_id: &str) -> Option<String> {
        self.transactions
            .read()
            .await
            .iter()
            .find(|t| t.transaction.id == transaction_id)
            .and_then(|t| t.category_id.clone())
    }

    fn require_download(&self) -> Result<(), BudgetError> {
        if self.downloaded.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BudgetError::NotConnected)
        }
    }
}

#[async_trait]
impl BudgetBackend for InMemoryBudget {
    fn name(&self) -> &str {
        "memory"
    }

    async fn connect(&self, data_dir: &Path) -> Result<(), BudgetError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.connect_error {
            return Err(BudgetError::Config(message.clone()));
        }
        *self.data_dir.write().await = Some(data_dir.to_path_buf());
        Ok(())
    }

    async fn download_budget(&self) -> Result<(), BudgetError> {
        let data_dir = self
            .data_dir
            .read()
            .await
            .clone()
            .ok_or(BudgetError::NotConnected)?;
        self.downloads.fetch_add(1, Ordering::SeqCst);
        tokio::fs::write(data_dir.join("budget.json"), b"{}").await?;
        self.downloaded.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn sync(&self) -> Result<(), BudgetError> {
        self.require_download()?;
        self.syncs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn categories(&self) -> Result<Vec<Category>, BudgetError> {
        self.require_download()?;
        Ok(self.categories.clone())
    }

    async fn count_uncategorized(&self) -> Result<u64, BudgetError> {
        self.require_download()?;
        let count = self
            .transactions
            .read()
            .await
            .iter()
            .filter(|t| t.category_id.is_none())
            .count();
        Ok(count as u64)
    }

    async fn uncategorized_transactions(
        &self,
        limit: u32,
        offset: u64,
    ) -> Result<Vec<Transaction>, BudgetError> {
        self.require_download()?;
        Ok(self
            .transactions
            .read()
            .await
            .iter()
            .filter(|t| t.category_id.is_none())
            .skip(offset as usize)
            .take(limit as usize)
            .map(|t| t.transaction.clone())
            .collect())
    }

    async fn begin_batch(&self) -> Result<(), BudgetError> {
        self.batches.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn set_transaction_category(
        &self,
        transaction_id: &str,
        category_id: &str,
    ) -> Result<(), BudgetError> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.update_delay.is_zero() {
            tokio::time::sleep(self.update_delay).await;
        }
        let result = self.apply(transaction_id, category_id).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn commit_batch(&self) -> Result<(), BudgetError> {
        Ok(())
    }

    async fn disconnect(&self) {
        *self.data_dir.write().await = None;
        self.downloaded.store(false, Ordering::SeqCst);
    }
}

impl InMemoryBudget {
    async fn apply(&self, transaction_id: &str, category_id: &str) -> Result<(), BudgetError> {
        if !self.categories.iter().any(|c| c.id == category_id) {
            return Err(BudgetError::Remote {
                status: 400,
                message: format!("Category {} not found", category_id),
            });
        }
        let mut transactions = self.transactions.write().await;
        let Some(stored) = transactions
            .iter_mut()
            .find(|t| t.transaction.id == transaction_id)
        else {
            return Err(BudgetError::Remote {
                status: 404,
                message: format!("Transaction {} not found", transaction_id),
            });
        };
        stored.category_id = Some(category_id.to_string());
        Ok(())
    }
}

/// Small fixture: two categories and `count` uncategorized transactions `t1..=tN`.
pub(crate) fn sample_budget(count: usize) -> InMemoryBudget {
    let categories = vec![
        Category {
            id: "c1".to_string(),
            name: "Groceries".to_string(),
            group_name: "Spending".to_string(),
            is_income: false,
        },
        Category {
            id: "c2".to_string(),
            name: "Salary".to_string(),
            group_name: "Income".to_string(),
            is_income: true,
        },
    ];
    let transactions = (1..=count)
        .map(|i| Transaction {
            id: format!("t{}", i),
            date: format!("2024-01-{:02}", (i % 28) + 1),
            payee_name: format!("Payee {}", i),
            notes: String::new(),
            amount_cents: -(i as i64) * 100,
        })
        .collect();
    InMemoryBudget::new(categories, transactions)
}

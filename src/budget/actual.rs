//! Actual Budget HTTP API backend.
//!
//! Talks to the `/v1` REST routes of an Actual Budget HTTP API deployment and
//! keeps a SQLite working copy of the budget in the cache directory:
//!
//! ```text
//! <cache_dir>/
//! └── <budget id>/
//!     └── budget.sqlite
//! ```
//!
//! `download_budget` and `sync` both pull a full snapshot (category groups,
//! payees, accounts, transactions) and swap it into the working copy.
//! Category writes go straight to the remote service; accepted writes are
//! folded into the working copy when the outermost batch commits.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::{Mutex, RwLock};
use url::Url;

use super::cache::{
    BudgetCache, BudgetSnapshot, CachedCategory, CachedCategoryGroup, CachedPayee,
    CachedTransaction,
};
use super::{BudgetBackend, BudgetError, Categorization, Category, Transaction};
use crate::config::RemoteConfig;
use crate::util::sanitize_filename;

const CACHE_FILE_NAME: &str = "budget.sqlite";

// =============================================================================
// API Response Models
// =============================================================================

#[derive(Debug, Deserialize)]
struct DataEnvelope<T> {
    data: T,
}

#[derive(Debug, Clone, Deserialize)]
struct RemoteCategoryGroup {
    id: String,
    name: String,
    #[serde(default)]
    is_income: bool,
    #[serde(default)]
    categories: Vec<RemoteCategory>,
}

#[derive(Debug, Clone, Deserialize)]
struct RemoteCategory {
    id: String,
    name: String,
    #[serde(default)]
    group_id: Option<String>,
    #[serde(default)]
    is_income: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct RemotePayee {
    id: String,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct RemoteAccount {
    id: String,
}

#[derive(Debug, Clone, Deserialize)]
struct RemoteTransaction {
    id: String,
    #[serde(default)]
    account: Option<String>,
    #[serde(default)]
    date: String,
    amount: i64,
    #[serde(default)]
    payee: Option<String>,
    #[serde(default)]
    imported_payee: Option<String>,
    #[serde(default)]
    notes: Option<String>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    is_parent: bool,
    #[serde(default)]
    subtransactions: Vec<RemoteTransaction>,
}

// =============================================================================
// Backend
// =============================================================================

/// Connection established by `connect`.
struct Session {
    base_url: Url,
    password: String,
    budget_id: String,
    budget_password: String,
    data_dir: PathBuf,
}

#[derive(Default)]
struct BatchState {
    depth: usize,
    pending: Vec<Categorization>,
}

pub struct ActualBackend {
    config: RemoteConfig,
    client: reqwest::Client,
    session: RwLock<Option<Arc<Session>>>,
    cache: RwLock<Option<Arc<BudgetCache>>>,
    batch: Mutex<BatchState>,
}

impl ActualBackend {
    pub fn new(config: RemoteConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .context("Failed to build HTTP client for the budget server")?;
        Ok(Self {
            config,
            client,
            session: RwLock::new(None),
            cache: RwLock::new(None),
            batch: Mutex::new(BatchState::default()),
        })
    }

    async fn session(&self) -> Result<Arc<Session>, BudgetError> {
        self.session
            .read()
            .await
            .clone()
            .ok_or(BudgetError::NotConnected)
    }

    async fn working_copy(&self) -> Result<Arc<BudgetCache>, BudgetError> {
        self.cache
            .read()
            .await
            .clone()
            .ok_or(BudgetError::NotConnected)
    }

    fn request(&self, session: &Session, method: Method, url: Url) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .header("x-api-key", &session.password)
            .header("budget-encryption-password", &session.budget_password)
    }

    async fn get_data<T: DeserializeOwned>(
        &self,
        session: &Session,
        segments: &[&str],
        query: &[(&str, String)],
    ) -> Result<T, BudgetError> {
        let url = endpoint(&session.base_url, segments)?;
        let response = self
            .request(session, Method::GET, url)
            .query(query)
            .send()
            .await?;
        let response = check_status(response).await?;
        let envelope: DataEnvelope<T> = response.json().await?;
        Ok(envelope.data)
    }

    /// Pull everything the working copy needs from the remote budget.
    async fn pull_snapshot(&self, session: &Session) -> Result<BudgetSnapshot, BudgetError> {
        let budget = session.budget_id.as_str();

        let groups: Vec<RemoteCategoryGroup> = self
            .get_data(session, &["v1", "budgets", budget, "categorygroups"], &[])
            .await?;
        let payees: Vec<RemotePayee> = self
            .get_data(session, &["v1", "budgets", budget, "payees"], &[])
            .await?;
        let accounts: Vec<RemoteAccount> = self
            .get_data(session, &["v1", "budgets", budget, "accounts"], &[])
            .await?;

        let since_date = self.config.since_date.format("%Y-%m-%d").to_string();
        let per_account = futures::future::try_join_all(accounts.iter().map(|account| {
            let query = [("since_date", since_date.clone())];
            async move {
                let transactions: Vec<RemoteTransaction> = self
                    .get_data(
                        session,
                        &["v1", "budgets", budget, "accounts", account.id.as_str(), "transactions"],
                        &query,
                    )
                    .await?;
                Ok::<_, BudgetError>((account.id.clone(), transactions))
            }
        }))
        .await?;

        let mut snapshot = BudgetSnapshot::default();
        for group in groups {
            for category in &group.categories {
                snapshot.categories.push(CachedCategory {
                    id: category.id.clone(),
                    name: category.name.clone(),
                    group_id: category.group_id.clone().or_else(|| Some(group.id.clone())),
                    is_income: category.is_income,
                });
            }
            snapshot.groups.push(CachedCategoryGroup {
                id: group.id,
                name: group.name,
                is_income: group.is_income,
            });
        }

        snapshot.payees = payees
            .into_iter()
            .map(|p| CachedPayee {
                id: p.id,
                name: p.name.unwrap_or_default(),
            })
            .collect();

        for (account_id, transactions) in per_account {
            for transaction in transactions {
                flatten_transaction(&account_id, transaction, &mut snapshot.transactions);
            }
        }

        Ok(snapshot)
    }

    async fn refresh_working_copy(&self) -> Result<(), BudgetError> {
        let session = self.session().await?;
        let cache = self.working_copy().await?;
        let snapshot = self.pull_snapshot(&session).await?;
        cache.replace_snapshot(snapshot).await?;
        tracing::debug!("Synced budget {} from {}", session.budget_id, session.base_url);
        Ok(())
    }
}

/// Append `transaction` and its split children as working-copy rows.
fn flatten_transaction(account_id: &str, transaction: RemoteTransaction, out: &mut Vec<CachedTransaction>) {
    let account = transaction
        .account
        .clone()
        .unwrap_or_else(|| account_id.to_string());
    let is_parent = transaction.is_parent || !transaction.subtransactions.is_empty();

    out.push(CachedTransaction {
        id: transaction.id,
        account_id: account.clone(),
        date: transaction.date.clone(),
        payee_id: transaction.payee.clone(),
        imported_payee: transaction.imported_payee,
        notes: transaction.notes,
        amount: transaction.amount,
        category_id: transaction.category,
        is_parent,
    });

    for child in transaction.subtransactions {
        out.push(CachedTransaction {
            id: child.id,
            account_id: child.account.unwrap_or_else(|| account.clone()),
            date: if child.date.is_empty() {
                transaction.date.clone()
            } else {
                child.date
            },
            payee_id: child.payee.or_else(|| transaction.payee.clone()),
            imported_payee: child.imported_payee,
            notes: child.notes,
            amount: child.amount,
            category_id: child.category,
            is_parent: false,
        });
    }
}

fn endpoint(base: &Url, segments: &[&str]) -> Result<Url, BudgetError> {
    let mut url = base.clone();
    {
        let mut path = url
            .path_segments_mut()
            .map_err(|_| BudgetError::Config(format!("ACTUAL_URL is not a base URL: {}", base)))?;
        path.pop_if_empty().extend(segments);
    }
    Ok(url)
}

/// Turn a non-2xx response into `BudgetError::Remote`.
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, BudgetError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    Err(BudgetError::Remote {
        status: status.as_u16(),
        message: error_message(&text, status.canonical_reason().unwrap_or("request failed")),
    })
}

fn error_message(body: &str, fallback: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        for key in ["error", "message"] {
            if let Some(message) = value.get(key).and_then(|v| v.as_str()) {
                return message.to_string();
            }
        }
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        fallback.to_string()
    } else {
        trimmed.to_string()
    }
}

#[async_trait]
impl BudgetBackend for ActualBackend {
    fn name(&self) -> &str {
        "actual"
    }

    async fn connect(&self, data_dir: &Path) -> Result<(), BudgetError> {
        let server_url = RemoteConfig::require(&self.config.server_url, "ACTUAL_URL")?;
        let password = RemoteConfig::require(&self.config.password, "ACTUAL_PASSWORD")?;
        let budget_id = RemoteConfig::require(&self.config.budget_id, "BUDGET_ID")?;
        let budget_password =
            RemoteConfig::require(&self.config.budget_password, "BUDGET_PASSWORD")?;

        let base_url = Url::parse(server_url)
            .map_err(|e| BudgetError::Config(format!("Invalid ACTUAL_URL '{}': {}", server_url, e)))?;

        let session = Session {
            base_url,
            password: password.to_string(),
            budget_id: budget_id.to_string(),
            budget_password: budget_password.to_string(),
            data_dir: data_dir.to_path_buf(),
        };

        // Credential check.
        let url = endpoint(&session.base_url, &["v1", "budgets"])?;
        let response = self.request(&session, Method::GET, url).send().await?;
        check_status(response).await?;

        tracing::info!("Connected to budget server {}", session.base_url);
        *self.session.write().await = Some(Arc::new(session));
        Ok(())
    }

    async fn download_budget(&self) -> Result<(), BudgetError> {
        let session = self.session().await?;
        let path = session
            .data_dir
            .join(sanitize_filename(&session.budget_id))
            .join(CACHE_FILE_NAME);

        let cache = Arc::new(BudgetCache::open(path).await?);
        let snapshot = self.pull_snapshot(&session).await?;
        let (categories, transactions) = (snapshot.categories.len(), snapshot.transactions.len());
        cache.replace_snapshot(snapshot).await?;

        tracing::info!(
            "Downloaded budget {} into {} ({} categories, {} transactions)",
            session.budget_id,
            cache.path().display(),
            categories,
            transactions
        );
        *self.cache.write().await = Some(cache);
        Ok(())
    }

    async fn sync(&self) -> Result<(), BudgetError> {
        self.refresh_working_copy().await
    }

    async fn categories(&self) -> Result<Vec<Category>, BudgetError> {
        self.working_copy().await?.categories().await
    }

    async fn count_uncategorized(&self) -> Result<u64, BudgetError> {
        self.working_copy().await?.count_uncategorized().await
    }

    async fn uncategorized_transactions(
        &self,
        limit: u32,
        offset: u64,
    ) -> Result<Vec<Transaction>, BudgetError> {
        self.working_copy()
            .await?
            .uncategorized(limit, offset)
            .await
    }

    async fn begin_batch(&self) -> Result<(), BudgetError> {
        self.batch.lock().await.depth += 1;
        Ok(())
    }

    async fn set_transaction_category(
        &self,
        transaction_id: &str,
        category_id: &str,
    ) -> Result<(), BudgetError> {
        let session = self.session().await?;
        let url = endpoint(
            &session.base_url,
            &["v1", "budgets", session.budget_id.as_str(), "transactions", transaction_id],
        )?;
        let response = self
            .request(&session, Method::PATCH, url)
            .json(&json!({ "transaction": { "category": category_id } }))
            .send()
            .await?;
        check_status(response).await?;

        let write = Categorization::new(transaction_id, category_id);
        {
            let mut batch = self.batch.lock().await;
            if batch.depth > 0 {
                batch.pending.push(write);
                return Ok(());
            }
        }
        self.working_copy()
            .await?
            .apply_categorizations(vec![write])
            .await
    }

    async fn commit_batch(&self) -> Result<(), BudgetError> {
        let pending = {
            let mut batch = self.batch.lock().await;
            batch.depth = batch.depth.saturating_sub(1);
            if batch.depth > 0 {
                return Ok(());
            }
            std::mem::take(&mut batch.pending)
        };
        if pending.is_empty() {
            return Ok(());
        }
        self.working_copy()
            .await?
            .apply_categorizations(pending)
            .await
    }

    async fn disconnect(&self) {
        *self.cache.write().await = None;
        *self.session.write().await = None;
        *self.batch.lock().await = BatchState::default();
    }
}

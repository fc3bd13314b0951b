//! Budget tools: list categories, page through uncategorized transactions
//! and bulk-categorize them.
//!
//! Argument ranges are enforced here; the accessor trusts its inputs.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};

use super::Tool;
use crate::budget::{BudgetAccessor, Categorization, DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT};

fn to_pretty_json<T: Serialize>(value: &T) -> anyhow::Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}

/// Read an optional non-negative integer argument.
///
/// Absent or `null` yields `None`; anything other than a whole number fails.
fn optional_u64(args: &Value, key: &str) -> anyhow::Result<Option<u64>> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => {
            if let Some(n) = value.as_u64() {
                Ok(Some(n))
            } else if value.as_i64().is_some() {
                Err(anyhow::anyhow!("'{}' must not be negative", key))
            } else {
                Err(anyhow::anyhow!("'{}' must be an integer", key))
            }
        }
    }
}

/// List every category with its group.
pub struct GetCategories {
    accessor: Arc<BudgetAccessor>,
}

impl GetCategories {
    pub fn new(accessor: Arc<BudgetAccessor>) -> Self {
        Self { accessor }
    }
}

#[async_trait]
impl Tool for GetCategories {
    fn name(&self) -> &str {
        "get_categories"
    }

    fn title(&self) -> &str {
        "Get Budget Categories"
    }

    fn description(&self) -> &str {
        "List all budget categories with their id, name, group name and whether \
         they are income categories. Use the ids with categorize_transactions."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {}
        })
    }

    async fn execute(&self, _args: Value) -> anyhow::Result<String> {
        let categories = self.accessor.get_categories().await?;
        to_pretty_json(&categories)
    }
}

/// Page through transactions that have no category yet.
pub struct GetUncategorizedTransactions {
    accessor: Arc<BudgetAccessor>,
}

impl GetUncategorizedTransactions {
    pub fn new(accessor: Arc<BudgetAccessor>) -> Self {
        Self { accessor }
    }
}

#[async_trait]
impl Tool for GetUncategorizedTransactions {
    fn name(&self) -> &str {
        "get_uncategorized_transactions"
    }

    fn title(&self) -> &str {
        "Get Uncategorized Transactions"
    }

    fn description(&self) -> &str {
        "List transactions without a category, newest first. Amounts are in cents \
         (negative for expenses). The pagination block reports the total count and \
         whether more pages follow."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "limit": {
                    "type": "integer",
                    "minimum": 1,
                    "maximum": MAX_PAGE_LIMIT,
                    "default": DEFAULT_PAGE_LIMIT,
                    "description": "Maximum number of transactions to return"
                },
                "offset": {
                    "type": "integer",
                    "minimum": 0,
                    "default": 0,
                    "description": "Number of transactions to skip"
                }
            }
        })
    }

    async fn execute(&self, args: Value) -> anyhow::Result<String> {
        let limit = optional_u64(&args, "limit")?.unwrap_or(u64::from(DEFAULT_PAGE_LIMIT));
        if limit < 1 || limit > u64::from(MAX_PAGE_LIMIT) {
            anyhow::bail!("'limit' must be between 1 and {}", MAX_PAGE_LIMIT);
        }
        let offset = optional_u64(&args, "offset")?.unwrap_or(0);

        let page = self
            .accessor
            .get_uncategorized_transactions(limit as u32, offset)
            .await?;
        to_pretty_json(&page)
    }
}

/// Assign categories to many transactions in one call.
pub struct CategorizeTransactions {
    accessor: Arc<BudgetAccessor>,
}

impl CategorizeTransactions {
    pub fn new(accessor: Arc<BudgetAccessor>) -> Self {
        Self { accessor }
    }
}

#[async_trait]
impl Tool for CategorizeTransactions {
    fn name(&self) -> &str {
        "categorize_transactions"
    }

    fn title(&self) -> &str {
        "Categorize Transactions"
    }

    fn description(&self) -> &str {
        "Assign a category to each listed transaction. Every item is applied \
         independently; the result lists the items the budget server rejected."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "categorizations": {
                    "type": "array",
                    "description": "Transaction to category assignments",
                    "items": {
                        "type": "object",
                        "properties": {
                            "transactionId": {
                                "type": "string",
                                "description": "Id of the transaction to categorize"
                            },
                            "categoryId": {
                                "type": "string",
                                "description": "Id of the category to assign"
                            }
                        },
                        "required": ["transactionId", "categoryId"]
                    }
                }
            },
            "required": ["categorizations"]
        })
    }

    async fn execute(&self, args: Value) -> anyhow::Result<String> {
        let raw = args
            .get("categorizations")
            .filter(|v| !v.is_null())
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("Missing 'categorizations' argument"))?;
        let categorizations: Vec<Categorization> = serde_json::from_value(raw)
            .map_err(|e| anyhow::anyhow!("Invalid 'categorizations' argument: {}", e))?;

        let outcome = self
            .accessor
            .categorize_transactions(categorizations)
            .await?;
        to_pretty_json(&outcome)
    }
}

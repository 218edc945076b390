//! Market data seam consumed by the data collection stage.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

/// Fetch failure. Treated as transient and retried by the caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DataSourceError {
    #[error("no data available for '{0}'")]
    NotFound(String),
    #[error("data source unavailable: {0}")]
    Unavailable(String),
}

/// Supplies raw market data (prices, indicators, news, fundamentals) for a
/// symbol as one JSON document.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    async fn fetch(&self, symbol: &str) -> Result<Value, DataSourceError>;
}

pub type SharedDataSource = Arc<dyn MarketDataSource>;

/// Serves the same document for every symbol.
#[derive(Debug, Clone)]
pub struct StaticDataSource {
    data: Value,
}

impl StaticDataSource {
    pub fn new(data: Value) -> Self {
        Self { data }
    }
}

#[async_trait]
impl MarketDataSource for StaticDataSource {
    async fn fetch(&self, symbol: &str) -> Result<Value, DataSourceError> {
        if self.data.is_null() {
            return Err(DataSourceError::NotFound(symbol.to_string()));
        }
        Ok(self.data.clone())
    }
}

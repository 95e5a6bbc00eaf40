use chrono::Utc;
use tokio::sync::RwLock;

use crate::errors::Result;
use crate::token::{CachedTokens, TokenKey, TokenRecord, TokenState};

/// Trait for storing and retrieving chain tokens
#[async_trait::async_trait]
pub trait TokenStore: Send + Sync {
    /// Stored record for `key`, expired or not
    async fn peek(&self, key: &TokenKey) -> Option<TokenRecord>;

    /// Overwrite every given record in one write.
    ///
    /// Either all records are persisted or none are.
    async fn set_all(&self, records: Vec<(TokenKey, TokenRecord)>) -> Result<()>;

    /// Remove every record
    async fn clear(&self) -> Result<()>;

    /// Record for `key` if present and not yet expired
    async fn get(&self, key: &TokenKey) -> Option<TokenRecord> {
        self.peek(key)
            .await
            .filter(|record| record.is_valid_for(key, Utc::now()))
    }

    async fn set(&self, key: TokenKey, record: TokenRecord) -> Result<()> {
        self.set_all(vec![(key, record)]).await
    }

    async fn state(&self, key: &TokenKey) -> TokenState {
        match self.peek(key).await {
            Some(record) => record.state_for(key, Utc::now()),
            None => TokenState::Absent,
        }
    }
}

/// In-memory token store for testing and embedding
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    tokens: RwLock<CachedTokens>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing document
    pub fn with_tokens(tokens: CachedTokens) -> Self {
        Self {
            tokens: RwLock::new(tokens),
        }
    }

    pub async fn snapshot(&self) -> CachedTokens {
        self.tokens.read().await.clone()
    }
}

#[async_trait::async_trait]
impl TokenStore for MemoryTokenStore {
    async fn peek(&self, key: &TokenKey) -> Option<TokenRecord> {
        self.tokens.read().await.record(key).cloned()
    }

    async fn set_all(&self, records: Vec<(TokenKey, TokenRecord)>) -> Result<()> {
        let mut tokens = self.tokens.write().await;
        for (key, record) in records {
            tokens.insert(key, record);
        }
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        *self.tokens.write().await = CachedTokens::default();
        Ok(())
    }
}

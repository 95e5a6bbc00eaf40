use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::RwLock;
use tracing::{debug, instrument};

use crate::errors::{AuthError, Result};
use crate::store::TokenStore;
use crate::token::{CachedTokens, TokenKey, TokenRecord};

/// File-based token store
///
/// Keeps the whole chain in a single JSON document readable only by the owner.
///
/// # Directory Structure
/// ```text
/// ~/.config/xblive/
/// └── tokens.json            # Every token record, one block per kind
/// ```
///
/// The document is loaded once by [`FileTokenStore::open`]. Every write replaces
/// the file atomically on the blocking pool and only then updates the in-memory
/// copy, so a failed write leaves both unchanged. Two processes sharing a file
/// are not coordinated: the last writer wins.
#[derive(Debug)]
pub struct FileTokenStore {
    path: PathBuf,
    tokens: Arc<RwLock<CachedTokens>>,
}

impl FileTokenStore {
    /// Open the store at `path`. A missing file is an empty store.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let tokens = match tokio::fs::read(&path).await {
            Ok(content) => serde_json::from_slice(&content)
                .context("Failed to parse token cache")
                .map_err(|e| AuthError::storage(&path, e))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No token cache yet, starting cold");
                CachedTokens::default()
            }
            Err(e) => {
                return Err(AuthError::storage(
                    &path,
                    anyhow::Error::new(e).context("Failed to read token cache"),
                ));
            }
        };

        Ok(Self {
            path,
            tokens: Arc::new(RwLock::new(tokens)),
        })
    }

    /// Get default cache file location for the current platform
    pub fn default_path() -> Result<PathBuf> {
        let project_dirs = directories::ProjectDirs::from("", "", "xblive").ok_or_else(|| {
            AuthError::storage(
                "tokens.json",
                anyhow::anyhow!("Could not determine config directory"),
            )
        })?;

        Ok(project_dirs.config_dir().join("tokens.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    #[cfg(test)]
    fn temp_path(&self) -> PathBuf {
        temp_path_for(&self.path)
    }
}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "tokens.json".into());
    name.push(".tmp");
    path.with_file_name(name)
}

/// Serialize and atomically replace the cache file. Blocking.
fn write_document(path: &Path, tokens: &CachedTokens) -> Result<()> {
    let content = serde_json::to_vec_pretty(tokens)
        .context("Failed to serialize token cache")
        .map_err(|e| AuthError::storage(path, e))?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        create_private_dir(parent)
            .context("Failed to create token cache directory")
            .map_err(|e| AuthError::storage(parent, e))?;
    }

    let temp_path = temp_path_for(path);
    let written = write_private_file(&temp_path, &content)
        .context("Failed to write temporary token cache")
        .and_then(|_| std::fs::rename(&temp_path, path).context("Failed to replace token cache"));

    if let Err(e) = written {
        let _ = std::fs::remove_file(&temp_path);
        return Err(AuthError::storage(path, e));
    }

    Ok(())
}

fn remove_document(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            debug!("Removed token cache {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(AuthError::storage(
            path,
            anyhow::Error::new(e).context("Failed to remove token cache"),
        )),
    }
}

fn create_private_dir(dir: &Path) -> std::io::Result<()> {
    let mut builder = std::fs::DirBuilder::new();
    builder.recursive(true);

    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }

    builder.create(dir)
}

fn write_private_file(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let mut options = std::fs::OpenOptions::new();
    options.create(true).write(true).truncate(true);

    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path)?;
    file.write_all(content)?;
    file.sync_all()
}

#[async_trait::async_trait]
impl TokenStore for FileTokenStore {
    async fn peek(&self, key: &TokenKey) -> Option<TokenRecord> {
        self.tokens.read().await.record(key).cloned()
    }

    async fn set_all(&self, records: Vec<(TokenKey, TokenRecord)>) -> Result<()> {
        let mut tokens = self.tokens.clone().write_owned().await;

        let mut next = tokens.clone();
        for (key, record) in records {
            debug!(%key, "Persisting token record");
            next.insert(key, record);
        }

        // The guard moves along with the write, so the file and the in-memory
        // copy stay in step even if this future is dropped while waiting.
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            write_document(&path, &next)?;
            *tokens = next;
            Ok(())
        })
        .await
        .map_err(|e| AuthError::storage(&self.path, e))?
    }

    async fn clear(&self) -> Result<()> {
        let mut tokens = self.tokens.clone().write_owned().await;

        let path = self.path.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            remove_document(&path)?;
            *tokens = CachedTokens::default();
            Ok(())
        })
        .await
        .map_err(|e| AuthError::storage(&self.path, e))?
    }
}

//! Token slot persisted as `token.json`

use chrono::{DateTime, Utc};
use std::fs;
use std::path::{Path, PathBuf};

use super::write_private;
use crate::auth::error::StoreError;
use crate::auth::tokens::{MemoryTokenStore, Token, TokenStatus, TokenStore};

/// File-backed slot. The whole file is rewritten after every mutation.
#[derive(Debug)]
pub struct FileTokenStore {
    path: PathBuf,
    inner: MemoryTokenStore,
}

impl FileTokenStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let mut inner = Self::load(&path)?;
        inner.normalize();
        if let Some(token) = inner.get()? {
            tracing::debug!("Loaded token ({:?}) from {}", token.status, path.display());
        }
        Ok(Self { path, inner })
    }

    fn load(path: &Path) -> Result<MemoryTokenStore, StoreError> {
        if !path.exists() {
            return Ok(MemoryTokenStore::new());
        }
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    fn save(&self, store: &MemoryTokenStore) -> Result<(), StoreError> {
        let content = serde_json::to_string_pretty(store)?;
        write_private(&self.path, &content)?;
        Ok(())
    }

    /// Apply `change` to a copy of the slot and keep the copy only once it
    /// is on disk. `change` reports whether anything needs writing.
    fn update<T>(
        &mut self,
        change: impl FnOnce(&mut MemoryTokenStore) -> Result<(T, bool), StoreError>,
    ) -> Result<T, StoreError> {
        let mut next = self.inner.clone();
        let (result, dirty) = change(&mut next)?;
        if dirty {
            self.save(&next)?;
            self.inner = next;
        }
        Ok(result)
    }
}

impl TokenStore for FileTokenStore {
    fn get(&self) -> Result<Option<Token>, StoreError> {
        self.inner.get()
    }

    fn replace(&mut self, token: Token, retire_as: Option<TokenStatus>) -> Result<(), StoreError> {
        self.update(|store| Ok((store.replace(token, retire_as)?, true)))
    }

    fn set_status(&mut self, status: TokenStatus) -> Result<bool, StoreError> {
        self.update(|store| {
            let changed = store.set_status(status)?;
            Ok((changed, changed))
        })
    }

    fn mark_used(&mut self, at: DateTime<Utc>) -> Result<bool, StoreError> {
        self.update(|store| {
            let changed = store.mark_used(at)?;
            Ok((changed, changed))
        })
    }

    fn retired(&self) -> Result<Vec<Token>, StoreError> {
        self.inner.retired()
    }
}

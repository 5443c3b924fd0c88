//! File-backed user registry — device id → push token + ordered watchlist.
//! One JSON file, human-readable, written on every mutation.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use mangapulse_core::error::{MangaPulseError, Result};
use mangapulse_core::traits::WatchlistRegistry;
use mangapulse_core::types::WatchAccount;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredUser {
    token: String,
    #[serde(default)]
    watchlist: Vec<String>,
    created_at: DateTime<Utc>,
}

/// JSON-file implementation of [`WatchlistRegistry`].
pub struct FileRegistry {
    path: PathBuf,
    users: Mutex<HashMap<String, StoredUser>>,
}

impl FileRegistry {
    /// Open (or initialize) the registry at the given file path.
    pub fn open(path: &Path) -> Self {
        let users = if path.exists() {
            match std::fs::read_to_string(path) {
                Ok(json) => serde_json::from_str(&json).unwrap_or_else(|e| {
                    tracing::warn!("⚠️ Failed to parse registry {}: {e}", path.display());
                    HashMap::new()
                }),
                Err(e) => {
                    tracing::warn!("⚠️ Failed to read registry {}: {e}", path.display());
                    HashMap::new()
                }
            }
        } else {
            HashMap::new()
        };
        Self {
            path: path.to_path_buf(),
            users: Mutex::new(users),
        }
    }

    /// Register a device or refresh its token. When `watchlist` is `None`
    /// an existing watchlist is kept as-is.
    pub fn add_or_update_user(
        &self,
        device_id: &str,
        token: &str,
        watchlist: Option<Vec<String>>,
    ) -> Result<()> {
        {
            let mut users = self.users.lock().unwrap();
            match users.get_mut(device_id) {
                Some(user) => {
                    user.token = token.to_string();
                    if let Some(list) = watchlist {
                        user.watchlist = list;
                    }
                }
                None => {
                    users.insert(
                        device_id.to_string(),
                        StoredUser {
                            token: token.to_string(),
                            watchlist: watchlist.unwrap_or_default(),
                            created_at: Utc::now(),
                        },
                    );
                }
            }
        }
        self.save()
    }

    /// Replace a device's watchlist. Order matters — it selects the
    /// rotation slot each title occupies.
    pub fn set_watchlist(&self, device_id: &str, watchlist: Vec<String>) -> Result<()> {
        {
            let mut users = self.users.lock().unwrap();
            let user = users.get_mut(device_id).ok_or_else(|| {
                MangaPulseError::Registry(format!("unknown device: {device_id}"))
            })?;
            user.watchlist = watchlist;
        }
        self.save()
    }

    /// Remove a device. Returns false when it was not registered.
    pub fn remove_user(&self, device_id: &str) -> Result<bool> {
        let removed = self.users.lock().unwrap().remove(device_id).is_some();
        if removed {
            self.save()?;
        }
        Ok(removed)
    }

    pub fn user_count(&self) -> usize {
        self.users.lock().unwrap().len()
    }

    fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| MangaPulseError::Persistence(format!("create dir: {e}")))?;
        }
        let users = self.users.lock().unwrap();
        let json = serde_json::to_string_pretty(&*users)
            .map_err(|e| MangaPulseError::Persistence(format!("serialize registry: {e}")))?;
        std::fs::write(&self.path, &json)
            .map_err(|e| MangaPulseError::Persistence(format!("write registry: {e}")))?;
        tracing::debug!(
            "💾 Saved {} user(s) to {}",
            users.len(),
            self.path.display()
        );
        Ok(())
    }
}

#[async_trait]
impl WatchlistRegistry for FileRegistry {
    /// All accounts, sorted by device id so batch discovery order is
    /// stable across cycles.
    async fn accounts(&self) -> Result<Vec<WatchAccount>> {
        let users = self.users.lock().unwrap();
        let mut accounts: Vec<WatchAccount> = users
            .iter()
            .map(|(device_id, user)| WatchAccount {
                device_id: device_id.clone(),
                token: user.token.clone(),
                watchlist: user.watchlist.clone(),
                created_at: user.created_at,
            })
            .collect();
        accounts.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        Ok(accounts)
    }
}

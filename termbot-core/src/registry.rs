// ABOUTME: Durable tab_id <-> session_name <-> display_name registry with startup reconciliation
// ABOUTME: Single-writer atomic-rewrite store; mirrors the SessionStore validation discipline

use crate::error::{RegistryError, StoreError};
use crate::model::{Tab, SESSION_PREFIX};
use crate::store::AtomicJsonStore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryFile {
    #[serde(default = "schema_version")]
    pub schema_version: u32,
    #[serde(default)]
    pub tabs: BTreeMap<String, Tab>,
}

fn schema_version() -> u32 {
    SCHEMA_VERSION
}

/// Result of reconciling the registry against the live session list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Tabs whose session was missing and has been recreated.
    pub recreated: Vec<String>,
    /// Tabs whose session was missing and `create_missing` was false.
    pub broken: Vec<String>,
    /// Live `tgbot_*` sessions with no registry entry. Reported, not deleted.
    pub orphans: Vec<String>,
}

/// Anything the registry needs to ask of the Terminal Driver during reconciliation.
pub trait SessionLister {
    fn list_sessions(&self) -> anyhow::Result<Vec<String>>;
    fn create_session(&self, tab_id: &str) -> anyhow::Result<()>;
}

pub struct TagSessionRegistry {
    store: AtomicJsonStore<RegistryFile>,
}

impl TagSessionRegistry {
    pub fn load<P: AsRef<std::path::Path>>(path: P) -> Result<Self, StoreError> {
        Ok(Self {
            store: AtomicJsonStore::load(path)?,
        })
    }

    pub fn create_tag(&self, user_id: &str, display_name: &str) -> Result<Tab, RegistryError> {
        let tab_id = uuid::Uuid::new_v4().to_string();
        let now = chrono::Utc::now().to_rfc3339();
        let tab = Tab {
            tab_id: tab_id.clone(),
            user_id: user_id.to_string(),
            display_name: display_name.to_string(),
            created_at: now.clone(),
            last_used_at: now,
        };

        let duplicate = self.store.snapshot().tabs.values().any(|t| {
            t.user_id == user_id && t.display_name.eq_ignore_ascii_case(display_name)
        });
        if duplicate {
            return Err(RegistryError::DuplicateName {
                user_id: user_id.to_string(),
                display_name: display_name.to_string(),
            });
        }

        self.store.mutate(|f| {
            f.tabs.insert(tab_id.clone(), tab.clone());
        })?;
        Ok(tab)
    }

    pub fn rename_tag(&self, tab_id: &str, new_name: &str) -> Result<(), RegistryError> {
        let existed = self.store.mutate(|f| {
            if let Some(t) = f.tabs.get_mut(tab_id) {
                t.display_name = new_name.to_string();
                true
            } else {
                false
            }
        })?;
        if existed {
            Ok(())
        } else {
            Err(RegistryError::NotFound {
                tab_id: tab_id.to_string(),
            })
        }
    }

    pub fn close_tag(&self, tab_id: &str) -> Result<(), RegistryError> {
        let removed = self.store.mutate(|f| f.tabs.remove(tab_id).is_some())?;
        if removed {
            Ok(())
        } else {
            Err(RegistryError::NotFound {
                tab_id: tab_id.to_string(),
            })
        }
    }

    pub fn list_tags(&self, user_id: &str) -> Vec<Tab> {
        self.store
            .snapshot()
            .tabs
            .into_values()
            .filter(|t| t.user_id == user_id)
            .collect()
    }

    pub fn get(&self, tab_id: &str) -> Option<Tab> {
        self.store.snapshot().tabs.get(tab_id).cloned()
    }

    pub fn all_tab_ids(&self) -> Vec<String> {
        self.store.snapshot().tabs.keys().cloned().collect()
    }

    pub fn touch(&self, tab_id: &str) -> Result<(), RegistryError> {
        let existed = self.store.mutate(|f| {
            if let Some(t) = f.tabs.get_mut(tab_id) {
                t.last_used_at = chrono::Utc::now().to_rfc3339();
                true
            } else {
                false
            }
        })?;
        if existed {
            Ok(())
        } else {
            Err(RegistryError::NotFound {
                tab_id: tab_id.to_string(),
            })
        }
    }

    /// Align persisted tab records with live multiplexer sessions. Idempotent:
    /// calling this twice in a row produces the same report (invariant 3).
    pub fn reconcile(
        &self,
        driver: &impl SessionLister,
        create_missing: bool,
    ) -> anyhow::Result<ReconcileReport> {
        let live = driver.list_sessions()?;
        let live: std::collections::HashSet<String> = live.into_iter().collect();
        let tabs = self.store.snapshot().tabs;

        let mut report = ReconcileReport::default();
        for tab in tabs.values() {
            let session_name = tab.session_name();
            if !live.contains(&session_name) {
                if create_missing {
                    driver.create_session(&tab.tab_id)?;
                    report.recreated.push(tab.tab_id.clone());
                } else {
                    report.broken.push(tab.tab_id.clone());
                }
            }
        }

        let known_sessions: std::collections::HashSet<String> =
            tabs.values().map(|t| t.session_name()).collect();
        for session_name in &live {
            if session_name.starts_with(SESSION_PREFIX) && !known_sessions.contains(session_name) {
                report.orphans.push(session_name.clone());
            }
        }

        Ok(report)
    }
}

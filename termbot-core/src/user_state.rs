// ABOUTME: Durable per-user preference store (active tab, interval, mode, auth flag)
// ABOUTME: Atomic rewrite on every change; get() returns defaults on miss

use crate::error::StoreError;
use crate::model::{Interval, Mode, UserState};
use crate::store::AtomicJsonStore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserStateFile {
    #[serde(default)]
    pub users: BTreeMap<String, UserState>,
}

pub struct UserStateStore {
    store: AtomicJsonStore<UserStateFile>,
}

impl UserStateStore {
    pub fn load<P: AsRef<std::path::Path>>(path: P) -> Result<Self, StoreError> {
        Ok(Self {
            store: AtomicJsonStore::load(path)?,
        })
    }

    pub fn get(&self, user_id: &str) -> UserState {
        self.store
            .snapshot()
            .users
            .get(user_id)
            .cloned()
            .unwrap_or_else(|| UserState::new(user_id))
    }

    fn with_mut<R>(
        &self,
        user_id: &str,
        f: impl FnOnce(&mut UserState) -> R,
    ) -> Result<R, StoreError> {
        self.store.mutate(|file| {
            let entry = file
                .users
                .entry(user_id.to_string())
                .or_insert_with(|| UserState::new(user_id));
            f(entry)
        })
    }

    pub fn set_active_tab(
        &self,
        user_id: &str,
        tab_id: Option<String>,
    ) -> Result<(), StoreError> {
        self.with_mut(user_id, |s| s.active_tab_id = tab_id)
    }

    pub fn set_interval(&self, user_id: &str, interval: Interval) -> Result<(), StoreError> {
        self.with_mut(user_id, |s| s.interval = interval)
    }

    pub fn set_mode(&self, user_id: &str, mode: Mode) -> Result<(), StoreError> {
        self.with_mut(user_id, |s| s.mode = mode)
    }

    pub fn mark_authorized(&self, user_id: &str, server_ip: &str) -> Result<(), StoreError> {
        self.with_mut(user_id, |s| {
            s.authorized = true;
            s.server_ip = Some(server_ip.to_string());
        })
    }

    pub fn revoke(&self, user_id: &str) -> Result<(), StoreError> {
        self.with_mut(user_id, |s| {
            s.authorized = false;
            s.server_ip = None;
        })
    }

    /// Clears `active_tab_id` for any user whose active tab no longer exists.
    /// Called once at startup alongside registry reconciliation.
    pub fn clear_dangling_active_tabs(
        &self,
        live_tab_ids: &std::collections::HashSet<String>,
    ) -> Result<(), StoreError> {
        self.store.mutate(|file| {
            for state in file.users.values_mut() {
                if let Some(tab_id) = &state.active_tab_id {
                    if !live_tab_ids.contains(tab_id) {
                        state.active_tab_id = None;
                    }
                }
            }
        })
    }
}

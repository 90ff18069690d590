// ABOUTME: Per-user mutex map shared by the Dispatcher and Output Scheduler
// ABOUTME: Guarantees at-most-one in-flight command per user while allowing full cross-user parallelism

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Default)]
pub struct PerUserLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl PerUserLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, user_id: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap();
        locks
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Block until the user's lock is free, then hold it for the guard's lifetime.
    /// Used by the Dispatcher: every event for a user is serialized.
    pub async fn lock(&self, user_id: &str) -> OwnedMutexGuard<()> {
        self.entry(user_id).lock_owned().await
    }

    /// Non-blocking: the scheduler skips a tick rather than queueing behind
    /// a slow in-flight command.
    pub fn try_lock(&self, user_id: &str) -> Option<OwnedMutexGuard<()>> {
        self.entry(user_id).try_lock_owned().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn try_lock_fails_while_held() {
        let locks = PerUserLocks::new();
        let guard = locks.lock("u1").await;
        assert!(locks.try_lock("u1").is_none());
        drop(guard);
        assert!(locks.try_lock("u1").is_some());
    }

    #[tokio::test]
    async fn different_users_do_not_contend() {
        let locks = PerUserLocks::new();
        let _g1 = locks.lock("u1").await;
        assert!(locks.try_lock("u2").is_some());
    }
}

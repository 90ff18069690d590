// ABOUTME: Whitelist lookup, key/IP/expiry validation, and per-IP lockout on repeated failures
// ABOUTME: Key comparison is constant-time; the whitelist itself is held behind a single mutex

use crate::error::AuthDenyReason;
use crate::model::WhitelistEntry;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    Granted,
    Denied(AuthDenyReason),
    LockedOut { until_unix: i64 },
}

#[derive(Debug, Clone, Copy)]
pub struct LockoutConfig {
    pub max_failures: usize,
    pub failure_window_seconds: i64,
    pub lockout_seconds: i64,
}

impl Default for LockoutConfig {
    fn default() -> Self {
        Self {
            max_failures: 5,
            failure_window_seconds: 300,
            lockout_seconds: 900,
        }
    }
}

/// A per-IP timestamp ring used to detect repeated failures within a
/// sliding window.
#[derive(Default)]
struct FailureLog {
    /// Recent failure timestamps (unix seconds), oldest first.
    failures: HashMap<String, VecDeque<i64>>,
    locked_until: HashMap<String, i64>,
}

pub struct AuthManager {
    whitelist: Mutex<HashMap<String, WhitelistEntry>>,
    failures: Mutex<FailureLog>,
    config: LockoutConfig,
}

impl AuthManager {
    pub fn new(entries: Vec<WhitelistEntry>, config: LockoutConfig) -> Self {
        let whitelist = entries
            .into_iter()
            .map(|e| (e.user_id.clone(), e))
            .collect();
        Self {
            whitelist: Mutex::new(whitelist),
            failures: Mutex::new(FailureLog::default()),
            config,
        }
    }

    /// Attempt to authenticate `user_id` from `claimed_ip` with `key`, at `now_unix`.
    pub fn login(
        &self,
        user_id: &str,
        claimed_ip: &str,
        key: &str,
        now_unix: i64,
    ) -> AuthOutcome {
        if let Some(until) = self.check_locked_out(claimed_ip, now_unix) {
            return AuthOutcome::LockedOut { until_unix: until };
        }

        let outcome = self.evaluate(user_id, claimed_ip, key, now_unix);
        match &outcome {
            AuthOutcome::Denied(_) => {
                if let Some(until) = self.record_failure(claimed_ip, now_unix) {
                    return AuthOutcome::LockedOut { until_unix: until };
                }
            }
            AuthOutcome::Granted => {
                self.failures.lock().unwrap().failures.remove(claimed_ip);
            }
            AuthOutcome::LockedOut { .. } => {}
        }
        outcome
    }

    fn evaluate(&self, user_id: &str, claimed_ip: &str, key: &str, now_unix: i64) -> AuthOutcome {
        let whitelist = self.whitelist.lock().unwrap();
        let Some(entry) = whitelist.get(user_id) else {
            return AuthOutcome::Denied(AuthDenyReason::NotWhitelisted);
        };

        if let Some(pinned_ip) = &entry.server_ip {
            if pinned_ip != claimed_ip {
                return AuthOutcome::Denied(AuthDenyReason::IpMismatch);
            }
        }

        if let Some(expires_at) = entry.expires_at {
            if expires_at <= now_unix {
                return AuthOutcome::Denied(AuthDenyReason::Expired);
            }
        }

        if !constant_time_eq(key.as_bytes(), entry.access_key.as_bytes()) {
            return AuthOutcome::Denied(AuthDenyReason::BadKey);
        }

        AuthOutcome::Granted
    }

    fn check_locked_out(&self, claimed_ip: &str, now_unix: i64) -> Option<i64> {
        let mut log = self.failures.lock().unwrap();
        if let Some(&until) = log.locked_until.get(claimed_ip) {
            if until > now_unix {
                return Some(until);
            }
            log.locked_until.remove(claimed_ip);
            log.failures.remove(claimed_ip);
        }
        None
    }

    /// Returns `Some(until_unix)` if this failure tipped the IP into lockout.
    fn record_failure(&self, claimed_ip: &str, now_unix: i64) -> Option<i64> {
        let mut log = self.failures.lock().unwrap();
        let window_start = now_unix - self.config.failure_window_seconds;
        let entry = log.failures.entry(claimed_ip.to_string()).or_default();
        entry.push_back(now_unix);
        while matches!(entry.front(), Some(&t) if t < window_start) {
            entry.pop_front();
        }

        if entry.len() >= self.config.max_failures {
            let until = now_unix + self.config.lockout_seconds;
            log.locked_until.insert(claimed_ip.to_string(), until);
            Some(until)
        } else {
            None
        }
    }

    pub fn update_key(&self, user_id: &str, new_key: &str, expires_at: Option<i64>) {
        let mut whitelist = self.whitelist.lock().unwrap();
        if let Some(entry) = whitelist.get_mut(user_id) {
            entry.access_key = new_key.to_string();
            entry.expires_at = expires_at;
        }
    }

    pub fn revoke_key(&self, user_id: &str) {
        self.whitelist.lock().unwrap().remove(user_id);
    }

    /// Replace `user_id`'s access key in place, keeping its IP pin and
    /// expiry. Returns `false` if `user_id` has no whitelist entry.
    pub fn rotate_token(&self, user_id: &str, new_key: &str) -> bool {
        let mut whitelist = self.whitelist.lock().unwrap();
        match whitelist.get_mut(user_id) {
            Some(entry) => {
                entry.access_key = new_key.to_string();
                true
            }
            None => false,
        }
    }

    pub fn is_admin(&self, user_id: &str) -> bool {
        self.whitelist
            .lock()
            .unwrap()
            .get(user_id)
            .map(|e| e.admin)
            .unwrap_or(false)
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(user_id: &str, key: &str) -> WhitelistEntry {
        WhitelistEntry {
            user_id: user_id.to_string(),
            access_key: key.to_string(),
            server_ip: None,
            expires_at: None,
            admin: false,
        }
    }

    #[test]
    fn constant_time_eq_matches_stdlib_eq() {
        assert!(constant_time_eq(b"hello", b"hello"));
        assert!(!constant_time_eq(b"hello", b"world"));
        assert!(!constant_time_eq(b"hello", b"hell"));
        assert!(!constant_time_eq(b"", b"x"));
        assert!(constant_time_eq(b"", b""));
    }

    #[test]
    fn s1_login_happy_path() {
        let mgr = AuthManager::new(vec![entry("42", "k")], LockoutConfig::default());
        let outcome = mgr.login("42", "1.2.3.4", "k", 1_000);
        assert_eq!(outcome, AuthOutcome::Granted);
    }

    #[test]
    fn s2_login_ip_mismatch_records_one_failure() {
        let mut e = entry("42", "k");
        e.server_ip = Some("1.2.3.4".to_string());
        let mgr = AuthManager::new(vec![e], LockoutConfig::default());
        let outcome = mgr.login("42", "9.9.9.9", "k", 1_000);
        assert_eq!(outcome, AuthOutcome::Denied(AuthDenyReason::IpMismatch));
        assert_eq!(mgr.failures.lock().unwrap().failures["9.9.9.9"].len(), 1);
    }

    #[test]
    fn unknown_user_denied_not_whitelisted() {
        let mgr = AuthManager::new(vec![], LockoutConfig::default());
        let outcome = mgr.login("ghost", "1.2.3.4", "k", 1_000);
        assert_eq!(
            outcome,
            AuthOutcome::Denied(AuthDenyReason::NotWhitelisted)
        );
    }

    #[test]
    fn expired_key_denied() {
        let mut e = entry("42", "k");
        e.expires_at = Some(500);
        let mgr = AuthManager::new(vec![e], LockoutConfig::default());
        let outcome = mgr.login("42", "1.2.3.4", "k", 1_000);
        assert_eq!(outcome, AuthOutcome::Denied(AuthDenyReason::Expired));
    }

    #[test]
    fn invariant_7_lockout_after_max_failures() {
        let cfg = LockoutConfig {
            max_failures: 3,
            failure_window_seconds: 60,
            lockout_seconds: 120,
        };
        let mgr = AuthManager::new(vec![entry("42", "k")], cfg);
        let mut last = AuthOutcome::Granted;
        for t in [1000, 1001, 1002] {
            last = mgr.login("42", "1.2.3.4", "wrong", t);
        }
        assert!(matches!(last, AuthOutcome::LockedOut { .. }));

        // Locked out IP short-circuits before the whitelist lookup even with
        // the right key.
        let still_locked = mgr.login("42", "1.2.3.4", "k", 1050);
        assert!(matches!(still_locked, AuthOutcome::LockedOut { .. }));
    }

    #[test]
    fn lockout_expires_after_window() {
        let cfg = LockoutConfig {
            max_failures: 2,
            failure_window_seconds: 60,
            lockout_seconds: 100,
        };
        let mgr = AuthManager::new(vec![entry("42", "k")], cfg);
        mgr.login("42", "1.2.3.4", "wrong", 1000);
        let locked = mgr.login("42", "1.2.3.4", "wrong", 1001);
        assert!(matches!(locked, AuthOutcome::LockedOut { until_unix } if until_unix == 1101));

        let granted = mgr.login("42", "1.2.3.4", "k", 1200);
        assert_eq!(granted, AuthOutcome::Granted);
    }

    #[test]
    fn rotate_token_replaces_key_and_keeps_logging_in() {
        let mgr = AuthManager::new(vec![entry("42", "old")], LockoutConfig::default());
        assert!(mgr.rotate_token("42", "new"));
        assert_eq!(
            mgr.login("42", "1.2.3.4", "old", 1_000),
            AuthOutcome::Denied(AuthDenyReason::BadKey)
        );
        assert_eq!(mgr.login("42", "1.2.3.4", "new", 1_000), AuthOutcome::Granted);
    }

    #[test]
    fn rotate_token_on_unknown_user_reports_failure() {
        let mgr = AuthManager::new(vec![], LockoutConfig::default());
        assert!(!mgr.rotate_token("ghost", "new"));
    }

    #[test]
    fn old_failures_outside_window_do_not_count() {
        let cfg = LockoutConfig {
            max_failures: 2,
            failure_window_seconds: 10,
            lockout_seconds: 100,
        };
        let mgr = AuthManager::new(vec![entry("42", "k")], cfg);
        mgr.login("42", "1.2.3.4", "wrong", 1000);
        let outcome = mgr.login("42", "1.2.3.4", "wrong", 1050);
        assert_eq!(outcome, AuthOutcome::Denied(AuthDenyReason::BadKey));
    }
}

// ABOUTME: Pure length/blocklist/allowlist predicate over outgoing shell commands
// ABOUTME: Regexes are pre-compiled at construction; check() is deterministic and side-effect-free

use crate::error::PolicyRejectReason;
use regex::Regex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyDecision {
    Allow,
    Reject(PolicyRejectReason),
}

pub struct CommandPolicy {
    max_length: usize,
    blocked_patterns: Vec<Regex>,
    allowed_patterns: Vec<Regex>,
    require_allowlist: bool,
}

impl CommandPolicy {
    pub fn new(
        max_length: usize,
        blocked_patterns: &[String],
        allowed_patterns: &[String],
        require_allowlist: bool,
    ) -> anyhow::Result<Self> {
        let compile = |patterns: &[String]| -> anyhow::Result<Vec<Regex>> {
            patterns
                .iter()
                .map(|p| Regex::new(p).map_err(anyhow::Error::from))
                .collect()
        };
        Ok(Self {
            max_length,
            blocked_patterns: compile(blocked_patterns)?,
            allowed_patterns: compile(allowed_patterns)?,
            require_allowlist,
        })
    }

    /// `allowed_patterns` is inert unless `require_allowlist` is true — an
    /// explicit resolution of the spec's open question on the matter.
    pub fn check(&self, cmd: &str) -> PolicyDecision {
        if cmd.len() > self.max_length {
            return PolicyDecision::Reject(PolicyRejectReason::TooLong);
        }

        if self.blocked_patterns.iter().any(|r| r.is_match(cmd)) {
            return PolicyDecision::Reject(PolicyRejectReason::Blocked);
        }

        if self.require_allowlist && !self.allowed_patterns.iter().any(|r| r.is_match(cmd)) {
            return PolicyDecision::Reject(PolicyRejectReason::NotAllowlisted);
        }

        PolicyDecision::Allow
    }
}

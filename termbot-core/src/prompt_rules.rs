// ABOUTME: Ordered matcher list over captured pane text producing incremental/button signals
// ABOUTME: Regexes and keyword sets are normalized once at load; the rule list is immutable after

use crate::model::{PromptRule, RuleButton, RuleKind};
use regex::Regex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signal {
    pub incremental: bool,
    pub buttons: Vec<RuleButton>,
}

enum CompiledMatcher {
    Regex(Regex),
    Keywords {
        keywords: Vec<String>,
        case_sensitive: bool,
    },
}

struct CompiledRule {
    matcher: CompiledMatcher,
    incremental_output: bool,
    buttons: Vec<RuleButton>,
}

/// Per-user overrides layered on top of the global rule set.
#[derive(Debug, Clone, Copy, Default)]
pub struct UserOverride {
    pub enabled: Option<bool>,
    pub force_incremental: bool,
}

pub struct PromptRuleEngine {
    enabled: bool,
    default_silence: bool,
    rules: Vec<CompiledRule>,
}

impl PromptRuleEngine {
    pub fn compile(
        rules: &[PromptRule],
        enabled: bool,
        default_silence: bool,
    ) -> anyhow::Result<Self> {
        let compiled = rules
            .iter()
            .map(|r| {
                let matcher = match r.kind {
                    RuleKind::Regex => {
                        let pattern = if r.case_sensitive {
                            r.pattern.clone()
                        } else {
                            format!("(?i){}", r.pattern)
                        };
                        CompiledMatcher::Regex(Regex::new(&pattern)?)
                    }
                    RuleKind::Keyword => {
                        let keywords = r
                            .pattern
                            .split(',')
                            .map(|k| {
                                let k = k.trim();
                                if r.case_sensitive {
                                    k.to_string()
                                } else {
                                    k.to_lowercase()
                                }
                            })
                            .filter(|k| !k.is_empty())
                            .collect();
                        CompiledMatcher::Keywords {
                            keywords,
                            case_sensitive: r.case_sensitive,
                        }
                    }
                };
                Ok(CompiledRule {
                    matcher,
                    incremental_output: r.incremental_output,
                    buttons: r.buttons.clone(),
                })
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        Ok(Self {
            enabled,
            default_silence,
            rules: compiled,
        })
    }

    /// `enabled=false` (global or per-user override) short-circuits to
    /// silence before any matcher runs, regardless of `force_incremental`.
    pub fn evaluate(&self, text: &str, user_override: UserOverride) -> Option<Signal> {
        let enabled = user_override.enabled.unwrap_or(self.enabled);
        if !enabled {
            return None;
        }

        for rule in &self.rules {
            let hit = match &rule.matcher {
                CompiledMatcher::Regex(re) => re.is_match(text),
                CompiledMatcher::Keywords {
                    keywords,
                    case_sensitive,
                } => {
                    let haystack = if *case_sensitive {
                        text.to_string()
                    } else {
                        text.to_lowercase()
                    };
                    keywords.iter().any(|k| haystack.contains(k.as_str()))
                }
            };

            if hit {
                let incremental = rule.incremental_output || user_override.force_incremental;
                return Some(Signal {
                    incremental,
                    buttons: rule.buttons.clone(),
                });
            }
        }

        if self.default_silence {
            None
        } else {
            Some(Signal {
                incremental: true,
                buttons: vec![],
            })
        }
    }
}

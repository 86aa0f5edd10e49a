use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::security::rules::{Rule, RuleKind, RuleSet, RuleSetError};

const EMPTY_COMMAND_REASON: &str = "empty command";
const NOT_WHITELISTED_REASON: &str = "not in whitelist";

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Command blocked by rule '{pattern}': {reason}")]
    Blocked { pattern: String, reason: String },

    #[error("Command not in whitelist")]
    NotWhitelisted,

    #[error("Empty command")]
    EmptyCommand,
}

impl ValidationError {
    /// Pattern of the rule that produced the denial, if any
    pub fn rule(&self) -> Option<&str> {
        match self {
            ValidationError::Blocked { pattern, .. } => Some(pattern),
            _ => None,
        }
    }
}

/// The rule that decided a command
#[derive(Debug, Clone, PartialEq)]
pub struct MatchedRule {
    pub priority: u32,
    pub pattern: String,
    pub kind: RuleKind,
}

/// Outcome of checking one command against the rule set. Pure data; holding
/// one does not permit anything until [`ValidationDecision::into_allowed`]
/// succeeds.
#[derive(Debug, Clone)]
pub struct ValidationDecision {
    pub allowed: bool,
    pub reason: String,
    pub matched_rule: Option<MatchedRule>,
    pub timeout: Option<Duration>,
    pub max_output_size: Option<usize>,
    pub normalized_command: String,
}

impl ValidationDecision {
    /// Convert into the only token the executor accepts
    pub fn into_allowed(self) -> Result<AllowedCommand, ValidationError> {
        if self.normalized_command.is_empty() {
            return Err(ValidationError::EmptyCommand);
        }

        match (self.allowed, self.matched_rule, self.timeout, self.max_output_size) {
            (true, Some(rule), Some(timeout), Some(max_output_size)) => Ok(AllowedCommand {
                command: self.normalized_command,
                timeout,
                max_output_size,
                rule_pattern: rule.pattern,
                rule_reason: self.reason,
            }),
            (_, Some(rule), _, _) if rule.kind == RuleKind::Deny => Err(ValidationError::Blocked {
                pattern: rule.pattern,
                reason: self.reason,
            }),
            _ => Err(ValidationError::NotWhitelisted),
        }
    }
}

/// A command that passed validation, with the limits of its allow rule.
/// Only the validator can construct one.
#[derive(Debug, Clone)]
pub struct AllowedCommand {
    command: String,
    timeout: Duration,
    max_output_size: usize,
    rule_pattern: String,
    rule_reason: String,
}

impl AllowedCommand {
    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn max_output_size(&self) -> usize {
        self.max_output_size
    }

    pub fn rule_pattern(&self) -> &str {
        &self.rule_pattern
    }

    pub fn rule_reason(&self) -> &str {
        &self.rule_reason
    }

    /// Tighten the timeout to the caller's request and the global ceiling.
    /// The rule's own timeout is never exceeded.
    pub fn clamp_timeout(mut self, requested: Option<Duration>, ceiling: Duration) -> Self {
        let mut timeout = self.timeout.min(ceiling);
        if let Some(requested) = requested.filter(|d| !d.is_zero()) {
            timeout = timeout.min(requested);
        }
        self.timeout = timeout;
        self
    }

    /// Tighten the output cap to a global ceiling
    pub fn clamp_output(mut self, ceiling: usize) -> Self {
        self.max_output_size = self.max_output_size.min(ceiling);
        self
    }
}

pub struct CommandValidator {
    rules: RuleSet,
}

impl CommandValidator {
    pub fn new(rules: RuleSet) -> Self {
        Self { rules }
    }

    pub fn builtin() -> Result<Self, RuleSetError> {
        Ok(Self::new(RuleSet::builtin()?))
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// Collapse every whitespace run (including newlines) to one space
    pub fn normalize(command: &str) -> String {
        command.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    /// Check a command against the rule set. Never fails; the decision
    /// carries the denial reason.
    pub fn validate(&self, command: &str) -> ValidationDecision {
        let normalized = Self::normalize(command);

        if normalized.is_empty() {
            warn!("command blocked: empty input");
            return ValidationDecision {
                allowed: false,
                reason: EMPTY_COMMAND_REASON.to_string(),
                matched_rule: None,
                timeout: None,
                max_output_size: None,
                normalized_command: normalized,
            };
        }

        let Some(hit) = self.rules.first_match(&normalized) else {
            warn!(command = %normalized, "command blocked: not in whitelist");
            return ValidationDecision {
                allowed: false,
                reason: NOT_WHITELISTED_REASON.to_string(),
                matched_rule: None,
                timeout: None,
                max_output_size: None,
                normalized_command: normalized,
            };
        };

        let matched_rule = Some(MatchedRule {
            priority: hit.priority(),
            pattern: hit.rule().pattern().to_string(),
            kind: hit.rule().kind(),
        });

        match hit.rule() {
            Rule::Allow(allow) => {
                info!(command = %normalized, rule = %allow.pattern, "command allowed");
                ValidationDecision {
                    allowed: true,
                    reason: allow.reason.clone(),
                    matched_rule,
                    timeout: Some(allow.timeout),
                    max_output_size: Some(allow.max_output_size),
                    normalized_command: normalized,
                }
            }
            Rule::Deny(deny) => {
                warn!(command = %normalized, rule = %deny.pattern, reason = %deny.reason, "command blocked");
                ValidationDecision {
                    allowed: false,
                    reason: deny.reason.clone(),
                    matched_rule,
                    timeout: None,
                    max_output_size: None,
                    normalized_command: normalized,
                }
            }
        }
    }
}

use regex::{Regex, RegexBuilder};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Output cap applied to allow rules that do not set their own
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 1024 * 1024;

/// Spacing between priorities assigned by [`RuleSet::from_ordered`]
const PRIORITY_STEP: u32 = 10;

#[derive(Debug, Error)]
pub enum RuleSetError {
    #[error("Invalid rule pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("Rules '{first}' and '{second}' share priority {priority}")]
    AmbiguousPriority {
        priority: u32,
        first: String,
        second: String,
    },

    #[error("Allow rule '{0}' has a zero timeout")]
    ZeroTimeout(String),
}

/// A rule that lets a matching command run under the given limits
#[derive(Debug, Clone, PartialEq)]
pub struct AllowRule {
    pub pattern: String,
    pub reason: String,
    pub timeout: Duration,
    pub max_output_size: usize,
}

/// A rule that stops a matching command before anything is spawned
#[derive(Debug, Clone, PartialEq)]
pub struct DenyRule {
    pub pattern: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Rule {
    Allow(AllowRule),
    Deny(DenyRule),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleKind {
    Allow,
    Deny,
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleKind::Allow => write!(f, "allow"),
            RuleKind::Deny => write!(f, "deny"),
        }
    }
}

impl Rule {
    pub fn allow(pattern: &str, reason: &str, timeout_secs: u64) -> Self {
        Rule::Allow(AllowRule {
            pattern: pattern.to_string(),
            reason: reason.to_string(),
            timeout: Duration::from_secs(timeout_secs),
            max_output_size: DEFAULT_MAX_OUTPUT_BYTES,
        })
    }

    pub fn deny(pattern: &str, reason: &str) -> Self {
        Rule::Deny(DenyRule {
            pattern: pattern.to_string(),
            reason: reason.to_string(),
        })
    }

    /// Override the output cap. No effect on deny rules.
    pub fn with_max_output(mut self, bytes: usize) -> Self {
        if let Rule::Allow(ref mut allow) = self {
            allow.max_output_size = bytes;
        }
        self
    }

    pub fn pattern(&self) -> &str {
        match self {
            Rule::Allow(rule) => &rule.pattern,
            Rule::Deny(rule) => &rule.pattern,
        }
    }

    pub fn reason(&self) -> &str {
        match self {
            Rule::Allow(rule) => &rule.reason,
            Rule::Deny(rule) => &rule.reason,
        }
    }

    pub fn kind(&self) -> RuleKind {
        match self {
            Rule::Allow(_) => RuleKind::Allow,
            Rule::Deny(_) => RuleKind::Deny,
        }
    }
}

/// A rule with its compiled pattern and explicit priority (lower runs first)
#[derive(Debug)]
pub struct CompiledRule {
    priority: u32,
    rule: Rule,
    regex: Regex,
}

impl CompiledRule {
    fn compile(priority: u32, rule: Rule) -> Result<Self, RuleSetError> {
        if let Rule::Allow(allow) = &rule {
            if allow.timeout.is_zero() {
                return Err(RuleSetError::ZeroTimeout(allow.pattern.clone()));
            }
        }

        let regex = RegexBuilder::new(rule.pattern())
            .case_insensitive(true)
            .build()
            .map_err(|source| RuleSetError::InvalidPattern {
                pattern: rule.pattern().to_string(),
                source,
            })?;

        Ok(Self {
            priority,
            rule,
            regex,
        })
    }

    pub fn priority(&self) -> u32 {
        self.priority
    }

    pub fn rule(&self) -> &Rule {
        &self.rule
    }

    /// Search the whole command, not a token
    pub fn matches(&self, command: &str) -> bool {
        self.regex.is_match(command)
    }
}

/// Ordered, immutable command policy
#[derive(Debug)]
pub struct RuleSet {
    rules: Vec<CompiledRule>,
}

impl RuleSet {
    /// Build from explicitly prioritized rules. Two rules sharing a priority
    /// would have no defined order, so that is rejected.
    pub fn new(entries: Vec<(u32, Rule)>) -> Result<Self, RuleSetError> {
        let mut rules = entries
            .into_iter()
            .map(|(priority, rule)| CompiledRule::compile(priority, rule))
            .collect::<Result<Vec<_>, _>>()?;

        rules.sort_by_key(|rule| rule.priority);

        for pair in rules.windows(2) {
            if pair[0].priority == pair[1].priority {
                return Err(RuleSetError::AmbiguousPriority {
                    priority: pair[0].priority,
                    first: pair[0].rule.pattern().to_string(),
                    second: pair[1].rule.pattern().to_string(),
                });
            }
        }

        Ok(Self { rules })
    }

    /// Build from a list whose order is the policy
    pub fn from_ordered(rules: Vec<Rule>) -> Result<Self, RuleSetError> {
        let entries = rules
            .into_iter()
            .enumerate()
            .map(|(idx, rule)| ((idx as u32 + 1) * PRIORITY_STEP, rule))
            .collect();
        Self::new(entries)
    }

    /// The built-in workstation policy
    pub fn builtin() -> Result<Self, RuleSetError> {
        Self::from_ordered(default_rules())
    }

    /// First rule (by priority) whose pattern occurs anywhere in the command
    pub fn first_match(&self, command: &str) -> Option<&CompiledRule> {
        self.rules.iter().find(|rule| rule.matches(command))
    }

    /// Every rule matching the command, in priority order
    pub fn matching<'a>(&'a self, command: &'a str) -> impl Iterator<Item = &'a CompiledRule> + 'a {
        self.rules.iter().filter(move |rule| rule.matches(command))
    }

    pub fn iter(&self) -> impl Iterator<Item = &CompiledRule> {
        self.rules.iter()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Built-in rules. Denials come first: every deny pattern must win over any
/// allow pattern that could also match the same command.
pub fn default_rules() -> Vec<Rule> {
    vec![
        // Interpreter injection
        Rule::deny(r"python3?\s.*-c.*os\.system", "Python os.system injection"),
        Rule::deny(r"python3?\s.*-c.*subprocess", "Python subprocess injection"),
        Rule::deny(r"python3?\s.*-c.*\b(exec|eval)\b", "Python exec/eval injection"),
        // Destructive operations
        Rule::deny(r"\brm\s+(.*\s)?-[a-z]*r", "recursive delete is not allowed"),
        Rule::deny(r"\bsudo\b|\bsu\s", "privilege escalation is not allowed"),
        Rule::deny(
            r"\b(curl|wget)\b.*\|\s*(ba|z|da)?sh\b",
            "piping remote content into a shell is not allowed",
        ),
        Rule::deny(r"\b(ssh|scp|sftp|rsync)\s", "remote access is not allowed"),
        Rule::deny(r"(^|\s)dd\s", "raw block copies are not allowed"),
        Rule::deny(r"\bmkfs(\.\w+)?\s", "filesystem creation is not allowed"),
        Rule::deny(r"\bu?mount\s", "mounting is not allowed"),
        Rule::deny(r"\bchmod\s+(-\w+\s+)*0?777\b", "world-writable permissions are not allowed"),
        Rule::deny(r"\bchown\s", "ownership changes are not allowed"),
        // Network tooling
        Rule::deny(r"\b(nc|ncat|netcat|nmap|telnet|ftp)\s", "network tools are not allowed"),
        // System reconnaissance
        Rule::deny(r"\bps\s+aux\b", "listing every process is not allowed"),
        Rule::deny(r"\bnetstat\b|\bifconfig\b", "network inspection is not allowed"),
        Rule::deny(r"/proc/", "process information access is not allowed"),
        // Secrets
        Rule::deny(r"(^|\s)env\s*$", "dumping the environment is not allowed"),
        Rule::deny(r"\bprintenv\b", "printing the environment is not allowed"),
        Rule::deny(r"\becho\s+.*\$", "printing environment variables is not allowed"),
        Rule::deny(r"file://", "file:// URLs are not allowed"),
        // Workspace confinement
        Rule::deny(r"\.\./|(^|\s)\.\.$|(^|\s)~", "path escape outside the workspace is not allowed"),
        Rule::deny(
            r#"(^|[\s'"=]|\s-[A-Za-z]+)/"#,
            "absolute paths are not allowed",
        ),
        Rule::deny(r"(^|\s)--output\b", "writing tool output to a file is not allowed"),
        // Compound commands
        Rule::deny(r"[;&|<>`$]", "shell operators and expansions are not allowed"),
        // Python tooling
        Rule::allow(r"^python3?\s+-m\s+(pip|pytest|unittest)\b", "Python module run", 120),
        Rule::allow(r"^python3?\s+[\w./-]+\.py\b", "Python script run", 60),
        Rule::allow(r"^python3?\s+-c\s", "Python inline code", 30),
        Rule::allow(r"^pytest(\s|$)", "test run", 60),
        Rule::allow(r"^uv\s", "uv package manager", 60),
        Rule::allow(r"^pipenv\s", "pipenv command", 60),
        // Rust tooling
        Rule::allow(r"^cargo\s+(check|build|test|fmt|clippy|tree)\b", "cargo command", 300)
            .with_max_output(4 * DEFAULT_MAX_OUTPUT_BYTES),
        // Read-only file system commands
        Rule::allow(r"^echo\s", "echo", 5),
        Rule::allow(r"^ls(\s+[^./]*)?$", "directory listing (no paths)", 10),
        Rule::allow(r"^ls\s+\.$", "current directory listing", 10),
        Rule::allow(r"^cat\s+[^|;&]+$", "file read", 10),
        Rule::allow(r"^head\s", "file head", 10),
        Rule::allow(r"^tail\s", "file tail", 10),
        Rule::allow(r"^wc\s", "word/line count", 10),
        Rule::allow(r"^grep\s", "text search", 15),
        Rule::allow(r"^find\s+\.(\s|$)", "file search inside the workspace", 15),
        // Development tools
        Rule::allow(r"^git\s+(status|log|diff|show)\b", "git read-only command", 15),
        Rule::allow(r"^make\s+(help|clean|build|test)\b", "make target", 60),
        Rule::allow(r"^npm\s+(install|test|run)\b", "npm command", 120),
        Rule::allow(r"^node\s+\S+\.js$", "Node.js script", 30),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_rules_compile() {
        let rules = RuleSet::builtin().unwrap();
        assert_eq!(rules.len(), default_rules().len());
    }

    #[test]
    fn test_from_ordered_assigns_increasing_priorities() {
        let rules = RuleSet::from_ordered(vec![
            Rule::deny("a", "first"),
            Rule::allow("b", "second", 5),
        ])
        .unwrap();

        let priorities: Vec<u32> = rules.iter().map(|r| r.priority()).collect();
        assert_eq!(priorities, vec![10, 20]);
    }

    #[test]
    fn test_new_sorts_by_priority() {
        let rules = RuleSet::new(vec![
            (50, Rule::allow("^ls", "list", 5)),
            (5, Rule::deny("ls -R", "recursive listing")),
        ])
        .unwrap();

        let first = rules.first_match("ls -R").unwrap();
        assert_eq!(first.rule().kind(), RuleKind::Deny);
    }

    #[test]
    fn test_duplicate_priority_rejected() {
        let result = RuleSet::new(vec![
            (10, Rule::allow("^ls", "list", 5)),
            (10, Rule::deny("rm", "delete")),
        ]);
        assert!(matches!(
            result,
            Err(RuleSetError::AmbiguousPriority { priority: 10, .. })
        ));
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        let result = RuleSet::from_ordered(vec![Rule::deny("(unclosed", "bad")]);
        assert!(matches!(result, Err(RuleSetError::InvalidPattern { .. })));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let result = RuleSet::from_ordered(vec![Rule::allow("^ls", "list", 0)]);
        assert!(matches!(result, Err(RuleSetError::ZeroTimeout(_))));
    }

    #[test]
    fn test_matching_is_case_insensitive() {
        let rules = RuleSet::builtin().unwrap();
        let hit = rules.first_match("SUDO ls").unwrap();
        assert_eq!(hit.rule().kind(), RuleKind::Deny);
    }

    #[test]
    fn test_with_max_output_ignored_for_deny() {
        let rule = Rule::deny("x", "y").with_max_output(1);
        assert_eq!(rule, Rule::deny("x", "y"));
    }

    #[test]
    fn test_all_denials_precede_all_allowances() {
        let rules = RuleSet::builtin().unwrap();
        let last_deny = rules
            .iter()
            .filter(|r| r.rule().kind() == RuleKind::Deny)
            .map(|r| r.priority())
            .max()
            .unwrap();
        let first_allow = rules
            .iter()
            .filter(|r| r.rule().kind() == RuleKind::Allow)
            .map(|r| r.priority())
            .min()
            .unwrap();
        assert!(last_deny < first_allow);
    }
}

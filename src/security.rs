//! Syntactic security validation applied before tool dispatch.
//!
//! An ordered list of deny rules; the first match rejects. Literal
//! indicators are matched with Aho-Corasick, pattern rules with
//! anchored-enough regexes. This layer never executes anything and is
//! not a substitute for sandboxing; it is biased toward rejecting
//! borderline input.

use aho_corasick::AhoCorasick;
use regex::Regex;
use serde_json::Value;

/// A blocked input, surfaced immediately and never retried.
#[derive(Debug, Clone, thiserror::Error)]
#[error("Security violation ({rule}): input blocked")]
pub struct SecurityViolation {
    /// Name of the rule that matched.
    pub rule: String,
    /// Truncated preview of the offending input.
    pub input_preview: String,
}

/// Literal substrings that reject outright, checked first.
const DENY_LITERALS: [(&str, &str); 4] = [
    ("passwd-file", "/etc/passwd"),
    ("shadow-file", "/etc/shadow"),
    ("device-write", "of=/dev/"),
    ("fork-bomb", ":(){ :|:& };:"),
];

/// Regex deny rules, evaluated in order after the literals.
const DENY_PATTERNS: [(&str, &str); 14] = [
    ("recursive-root-delete", r"rm\s+(-[a-zA-Z]*[rf][a-zA-Z]*\s+)+(/|~|\$HOME|\*)"),
    ("filesystem-format", r"mkfs(\.|\s)"),
    ("raw-device-dd", r"dd\s+if=.*of=/dev/"),
    ("device-redirect", r">\s*/dev/(sd|nvme|hd)"),
    ("world-writable-root", r"chmod\s+(-R\s+)?777\s+/"),
    ("root-chown", r"chown\s+(-R\s+)?\S+\s+/\s*$"),
    ("pipe-to-shell", r"\|\s*(sh|bash|zsh)\s*$"),
    ("fetch-pipe-shell", r"(curl|wget)[^|]*\|\s*(sh|bash)"),
    ("eval-injection", r"(^|[;&|]\s*)eval\s"),
    ("command-substitution", r"`[^`]*`|\$\([^)]*\)"),
    ("privilege-escalation", r"(^|[;&|]\s*)(sudo|doas)\s"),
    ("switch-user", r"(^|[;&|]\s*)su\s+-"),
    ("firewall-flush", r"iptables\s+(-F|--flush)"),
    ("stop-critical-service", r"systemctl\s+(stop|disable|mask)\s+(ssh|sshd|firewalld|ufw)"),
];

/// Ordered deny-rule validator.
pub struct SecurityValidator {
    literals: AhoCorasick,
    literal_names: Vec<&'static str>,
    rules: Vec<(String, Regex)>,
}

impl SecurityValidator {
    /// Build the validator with the built-in rule set.
    pub fn new() -> Self {
        Self::with_extra_patterns(&[]).expect("built-in deny rules must compile")
    }

    /// Build the validator with extra configured deny patterns
    /// appended after the built-in rules.
    pub fn with_extra_patterns(extra: &[String]) -> Result<Self, regex::Error> {
        let literals = AhoCorasick::new(DENY_LITERALS.iter().map(|(_, lit)| lit))
            .expect("literal deny set must compile");
        let literal_names = DENY_LITERALS.iter().map(|(name, _)| *name).collect();

        let mut rules = Vec::with_capacity(DENY_PATTERNS.len() + extra.len());
        for (name, pattern) in DENY_PATTERNS {
            let regex = Regex::new(pattern).expect("built-in deny rules must compile");
            rules.push((name.to_string(), regex));
        }
        for (index, pattern) in extra.iter().enumerate() {
            let regex = Regex::new(pattern)?;
            rules.push((format!("config-rule-{index}"), regex));
        }

        Ok(Self {
            literals,
            literal_names,
            rules,
        })
    }

    /// Whether the input passes every deny rule.
    pub fn validate(&self, raw_input: &str) -> bool {
        self.first_match(raw_input).is_none()
    }

    /// Screen tool arguments by checking every string value they carry,
    /// however deeply nested.
    ///
    /// Rules anchored to a command boundary (`^`, `$`, `;`, `|`) only
    /// make sense against the bare string a tool will interpret, not
    /// against a serialized JSON object wrapping it, so each string
    /// leaf is validated on its own.
    pub fn check_arguments(&self, arguments: &Value) -> Result<(), SecurityViolation> {
        match arguments {
            Value::String(s) => self.check(s),
            Value::Array(items) => items.iter().try_for_each(|v| self.check_arguments(v)),
            Value::Object(map) => map.values().try_for_each(|v| self.check_arguments(v)),
            _ => Ok(()),
        }
    }

    /// Validate, returning the violation on rejection.
    pub fn check(&self, raw_input: &str) -> Result<(), SecurityViolation> {
        match self.first_match(raw_input) {
            None => Ok(()),
            Some(rule) => {
                let input_preview: String = raw_input.chars().take(100).collect();
                tracing::warn!(rule = %rule, "Blocked input by security rule");
                Err(SecurityViolation {
                    rule: rule.to_string(),
                    input_preview,
                })
            }
        }
    }

    fn first_match(&self, raw_input: &str) -> Option<&str> {
        if raw_input.is_empty() {
            return None;
        }

        if let Some(hit) = self.literals.find(raw_input) {
            return Some(self.literal_names[hit.pattern().as_usize()]);
        }

        self.rules
            .iter()
            .find(|(_, regex)| regex.is_match(raw_input))
            .map(|(name, _)| name.as_str())
    }
}

impl Default for SecurityValidator {
    fn default() -> Self {
        Self::new()
    }
}

//! Command execution gating against the danger pattern table.
//!
//! `SafetyGate::evaluate` is the single decision point every requested
//! command passes through before the execution engine may see it. The gate
//! only decides; prompting and logging belong to the caller.

use super::patterns::DangerPatternSet;

/// Outcome of evaluating a command against the pattern table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// No rule matched.
    Permitted,
    /// A rule matched and destructive commands are allowed; the caller must
    /// obtain a literal "YES" (or pre-granted non-interactive consent).
    RequiresConfirmation { pattern: String, reason: String },
    /// A rule matched and destructive commands are not allowed.
    Blocked { pattern: String, reason: String },
}

impl Decision {
    pub fn is_blocked(&self) -> bool {
        matches!(self, Decision::Blocked { .. })
    }
}

/// The literal token an operator must type to confirm a destructive command.
pub const CONFIRMATION_TOKEN: &str = "YES";

/// Whether an operator response grants confirmation. Only the exact token
/// counts, after trimming surrounding whitespace.
pub fn is_affirmative(response: &str) -> bool {
    response.trim() == CONFIRMATION_TOKEN
}

#[derive(Debug, Clone)]
pub struct SafetyGate {
    patterns: DangerPatternSet,
}

impl SafetyGate {
    pub fn new(patterns: DangerPatternSet) -> Self {
        Self { patterns }
    }

    pub fn patterns(&self) -> &DangerPatternSet {
        &self.patterns
    }

    /// Classify `command` under the given destructive-command policy.
    ///
    /// # Examples
    /// ```
    /// use sec_agent::security::{Decision, DangerPatternSet, SafetyGate};
    ///
    /// let gate = SafetyGate::new(DangerPatternSet::builtin().unwrap());
    /// assert_eq!(gate.evaluate("ls -la", false), Decision::Permitted);
    /// assert!(gate.evaluate("rm -rf /", false).is_blocked());
    /// assert!(matches!(
    ///     gate.evaluate("rm -rf /", true),
    ///     Decision::RequiresConfirmation { .. }
    /// ));
    /// ```
    pub fn evaluate(&self, command: &str, allow_destructive: bool) -> Decision {
        match self.patterns.find_match(command) {
            None => Decision::Permitted,
            Some(rule) if allow_destructive => Decision::RequiresConfirmation {
                pattern: rule.name().to_string(),
                reason: rule.description().to_string(),
            },
            Some(rule) => Decision::Blocked {
                pattern: rule.name().to_string(),
                reason: rule.description().to_string(),
            },
        }
    }
}

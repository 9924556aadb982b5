//! Security module for destructive-command detection and gating.
//!
//! This module holds the static danger pattern table and the gate that turns
//! a pattern match into a block or a confirmation requirement.

mod gate;
mod patterns;

pub use gate::{is_affirmative, Decision, SafetyGate, CONFIRMATION_TOKEN};
pub use patterns::{DangerPattern, DangerPatternSet};

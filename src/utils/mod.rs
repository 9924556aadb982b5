//! Utility modules for common functionality.
//!
//! This module contains helpers used by the binary, currently the logging
//! setup.

pub mod logger;

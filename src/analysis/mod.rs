//! Log analysis for half-duplex link-adaptation sessions.
//!
//! This module turns an interleaved two-peer session log into typed events,
//! groups them into configuration-change transitions, and scans for silent
//! process death.

pub mod cache;
pub mod crash;
pub mod parser;
pub mod report;
pub mod transitions;
pub mod types;

pub use crash::detect_crashes;
pub use parser::{parse_log_file, PATTERNS};
pub use transitions::build_transitions;
pub use types::*;

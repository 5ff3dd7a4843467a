//! # Shiftscope - Transition analysis for half-duplex link-adaptation logs
//!
//! This library reconstructs what happened during a link-adaptation session
//! from the interleaved text log of its two peers: a commander that requests
//! configuration changes and a responder that decodes and acknowledges them.
//!
//! ## Overview
//!
//! Each configuration change is a multi-second exchange over a half-duplex
//! radio link: the commander keys up and transmits a SET_CONFIG frame, the
//! responder fills its capture buffer, searches for the preamble, decodes,
//! and answers with an acknowledgment pattern the commander polls for. The
//! log of such a session interleaves both peers line by line. Shiftscope
//! turns that text back into structured transitions with per-attempt decode
//! detail, and flags processes that died silently along the way.
//!
//! ## Architecture
//!
//! The library is organized into two modules:
//!
//! - `config`: modem configuration table and analysis tunables, with YAML
//!   profile overrides
//! - `analysis`: the pipeline itself
//!   - `analysis::parser`: line classification and timestamp resolution
//!   - `analysis::transitions`: grouping events into transitions
//!   - `analysis::crash`: silent process-death detection
//!   - `analysis::report`: text and JSON rendering
//!   - `analysis::cache`: compressed snapshot of a parsed log
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use std::path::Path;
//!
//! use shiftscope::analysis::{build_transitions, detect_crashes, parse_log_file};
//! use shiftscope::config::ModemProfile;
//!
//! let profile = ModemProfile::default();
//! let step = profile.tunables.line_time_step.as_secs_f64();
//!
//! let scan = parse_log_file(Path::new("session.log"), step)?;
//! let transitions = build_transitions(&scan.events, &profile);
//! let crashes = detect_crashes(&scan.events, &profile.tunables);
//!
//! println!("{} transitions, {} crashes", transitions.len(), crashes.len());
//! # Ok::<(), color_eyre::eyre::Error>(())
//! ```
//!
//! ## Log Format
//!
//! Lines are expected in the harness format, a timestamp prefix followed by a
//! role tag and the modem's own bracket-tagged output:
//!
//! ```text
//! [T+0082.133] [CMD] [TURBO] UP: config 0 -> 7 (FORWARD)
//! [T+0082.971] [CMD] PTT ON
//! [T+0084.210] [RSP] [BUF-ENERGY] nUnder=0 | 0.000 0.412 0.498
//! [T+0084.800] [RSP] [RX-TIMING] OK: delay_symb=3 nUnder=0 ftr=-1 proc=410ms
//! ```
//!
//! Untimestamped logs are accepted; times are then fabricated from line
//! numbers and every report carries an "approximate" caveat.
//!
//! ## Error Handling
//!
//! The library uses `color_eyre` for error reporting with context. Fallible
//! public functions return `Result<T, color_eyre::eyre::Error>`.

pub mod analysis;
pub mod config;

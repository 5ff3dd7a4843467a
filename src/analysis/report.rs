//! Report rendering for transition and crash analysis.
//!
//! Every renderer builds plain text from the model alone and returns it as a
//! `String`; the CLI decides where the text goes. JSON export mirrors the
//! model types directly.

use std::fs;
use std::path::Path;

use color_eyre::eyre::{Context, Result};

use crate::config::ModemProfile;

use super::types::*;

/// Continuation indent aligning with the role column of timeline rows
const CONT: &str = "                            ";

/// Format a delta between two stamps as +XXXms
fn fmt_delta(from: LogTime, to: LogTime) -> String {
    format!("+{:.0}ms", (to - from) * 1000.0)
}

fn fmt_time(t: LogTime) -> String {
    format!("T+{:.3}", t)
}

fn dir_abbrev(direction: Direction) -> &'static str {
    match direction {
        Direction::Forward => "FOR",
        Direction::Reverse => "REV",
    }
}

/// One-line-per-transition summary table with a totals footer
pub fn render_summary(
    transitions: &[Transition],
    profile: &ModemProfile,
    has_timestamps: bool,
) -> String {
    let mut lines: Vec<String> = Vec::new();
    let ts_note = if has_timestamps {
        ""
    } else {
        "  (timestamps approximate)"
    };

    lines.push(String::new());
    lines.push("=".repeat(110));
    lines.push(format!("  TRANSITION SUMMARY{}", ts_note));
    lines.push("=".repeat(110));
    lines.push(format!(
        "  {:>3} {:>4} {:>10} {:>10} {:>6} {:>8} {:>8} {:>7} {:>8} {:>8} {}",
        "#", "Dir", "From", "To", "Result", "Attempts", "Coarse", "Search%", "TX>Buf", "Total", "Notes"
    ));
    lines.push(format!("  {}", "-".repeat(107)));

    for tr in transitions {
        let from_name = profile.config_name(tr.from_config);
        let to_name = profile.config_name(tr.to_config);
        let result = if tr.succeeded {
            "OK"
        } else if tr.nacked {
            "NAck"
        } else {
            "???"
        };

        let best_coarse = tr.best_coarse_metric().unwrap_or(0.0);

        let coverage = if tr.search_window_symbols > 0 && tr.buffer_symbols > 0 {
            let pct = tr.search_window_symbols as f64 / tr.buffer_symbols as f64 * 100.0;
            format!("{:.0}%", pct)
        } else {
            String::new()
        };

        let tx_to_buf = match (tr.tx_start, tr.attempts.first()) {
            (Some(tx), Some(att)) => format!("{:.0}ms", (att.time - tx) * 1000.0),
            _ => String::new(),
        };

        let total = match (tr.succeeded, tr.ack_detected) {
            (true, Some(ack)) => format!("{:.0}ms", (ack - tr.up_time) * 1000.0),
            _ => String::new(),
        };

        // Deduplicated, first-seen order
        let mut notes: Vec<&str> = Vec::new();
        for att in &tr.attempts {
            if let Some(ref rec) = att.recovery {
                if !notes.contains(&rec.label()) {
                    notes.push(rec.label());
                }
            }
            if att.coarse.map_or(false, |c| c.metric == 0.0) && !notes.contains(&"metric=0!") {
                notes.push("metric=0!");
            }
        }

        let marker = if tr.nacked { " <<<" } else { "" };
        lines.push(format!(
            "  {:>3} {:>4} {:>10} {:>10} {:>6} {:>8} {:>8.3} {:>7} {:>8} {:>8} {}{}",
            tr.index,
            dir_abbrev(tr.direction),
            from_name,
            to_name,
            result,
            tr.attempts.len(),
            best_coarse,
            coverage,
            tx_to_buf,
            total,
            notes.join(", "),
            marker
        ));
    }

    let n_ok = transitions.iter().filter(|t| t.succeeded).count();
    let n_nack = transitions.iter().filter(|t| t.nacked).count();
    lines.push(format!("  {}", "-".repeat(107)));
    lines.push(format!(
        "  Total: {} transitions, {} OK, {} NAck",
        transitions.len(),
        n_ok,
        n_nack
    ));

    lines.join("\n")
}

/// Full chronological timeline for one transition, deltas relative to the
/// config-up request
pub fn render_transition(tr: &Transition, profile: &ModemProfile, has_timestamps: bool) -> String {
    let mut lines: Vec<String> = Vec::new();
    let ts_note = if has_timestamps {
        ""
    } else {
        " (timestamps approximate, line-number proxy)"
    };

    let from_name = profile.config_name(tr.from_config);
    let to_name = profile.config_name(tr.to_config);
    let result = if tr.succeeded {
        "OK"
    } else if tr.nacked {
        "NAck <<<"
    } else {
        "PENDING"
    };

    let (modulation, nsymb_s, pream_s, tx_s) = match profile.props(tr.from_config) {
        Some(p) => (
            p.modulation.clone(),
            p.nsymb.map_or_else(|| "?".to_string(), |v| v.to_string()),
            p.preamble.to_string(),
            p.tx_ms.map_or_else(|| "?".to_string(), |v| v.to_string()),
        ),
        None => (
            "?".to_string(),
            "?".to_string(),
            "?".to_string(),
            "?".to_string(),
        ),
    };

    lines.push(String::new());
    lines.push("=".repeat(80));
    lines.push(format!(
        "  Transition #{}: {} -> {}  [{}]  {}",
        tr.index, from_name, to_name, tr.direction, result
    ));
    lines.push(format!(
        "  TX config: {} ({}, Nsymb={}, pream={}, tx={}ms)",
        from_name, modulation, nsymb_s, pream_s, tx_s
    ));
    if tr.search_window_symbols > 0 {
        let coverage = if tr.buffer_symbols > 0 {
            tr.search_window_symbols as f64 / tr.buffer_symbols as f64 * 100.0
        } else {
            0.0
        };
        lines.push(format!(
            "  Coarse search: {} of {} symbols ({:.0}% of buffer)",
            tr.search_window_symbols, tr.buffer_symbols, coverage
        ));
    }
    lines.push(format!("{}{}", "=".repeat(80), ts_note));

    let delta = |t: LogTime| fmt_delta(tr.up_time, t);

    lines.push(format!(
        "  {:>14}  {:>8}  CMD  TURBO UP {}->{}",
        fmt_time(tr.up_time),
        delta(tr.up_time),
        from_name,
        to_name
    ));
    if let Some(t) = tr.tx_start {
        lines.push(format!(
            "  {:>14}  {:>8}  CMD  PTT ON (TX start)",
            fmt_time(t),
            delta(t)
        ));
    }
    if let Some(t) = tr.tx_end {
        let tx_dur = tr.tx_start.map_or(0.0, |s| (t - s) * 1000.0);
        lines.push(format!(
            "  {:>14}  {:>8}  CMD  PTT OFF (TX done, {:.0}ms frame)",
            fmt_time(t),
            delta(t),
            tx_dur
        ));
    }
    if let Some(t) = tr.rx_enter {
        lines.push(format!(
            "  {:>14}  {:>8}  CMD  Entering RX (timeout={}ms)",
            fmt_time(t),
            delta(t),
            tr.recv_timeout_ms
        ));
    }

    for (i, att) in tr.attempts.iter().enumerate() {
        lines.push(format!(
            "  {:>14}  {:>8}  RSP  Buffer fill #{} (nUnder={})",
            fmt_time(att.time),
            delta(att.time),
            i,
            att.underruns
        ));
        lines.push(format!("{}RSP    energy: {}", CONT, att.energy_profile));

        if let Some(c) = att.coarse {
            // Verdict recomputed from the bounds rather than echoed
            let in_bounds = c.pream_symb > c.lo && c.pream_symb < c.hi;
            lines.push(format!(
                "{}RSP    coarse: pream={} metric={:.3} bounds=[{},{}] {}",
                CONT,
                c.pream_symb,
                c.metric,
                c.lo,
                c.hi,
                if in_bounds { "PASS" } else { "SKIP" }
            ));
        }

        if let Some(ref rec) = att.recovery {
            let detail = match rec {
                RecoveryAction::BoundsSkip {
                    retry,
                    metric,
                    energy,
                    ..
                }
                | RecoveryAction::SilenceSkip {
                    retry,
                    metric,
                    energy,
                    ..
                } => {
                    format!("symb={} metric={:.3} energy={:.2e}", retry, metric, energy)
                }
                RecoveryAction::EnergyFix {
                    delay_from,
                    delay_to,
                } => {
                    format!("delay {}->{}", delay_from, delay_to)
                }
                RecoveryAction::WeakMetric { metric } => format!("metric={:.3}", metric),
            };
            lines.push(format!("{}RSP    recovery: {} {}", CONT, rec.label(), detail));
        }

        if let Some(g) = att.mean_channel_gain {
            let h_status = if g > 0.3 { "OK" } else { "SKIP-H" };
            lines.push(format!(
                "{}RSP    chan_est: mean_H={:.4} ({})",
                CONT, g, h_status
            ));
        }

        for trial in &att.trials {
            lines.push(format!(
                "{}RSP    trial {}: {} delay={} iter={}",
                CONT, trial.trial, trial.outcome, trial.delay, trial.iterations
            ));
        }

        match att.result {
            AttemptResult::Ok {
                delay_symbols,
                processing_ms,
                ftr,
            } => {
                lines.push(format!(
                    "{}RSP    >> DECODE OK: delay_symb={} ftr={} proc={}ms",
                    CONT, delay_symbols, ftr, processing_ms
                ));
            }
            AttemptResult::Fail { processing_ms } => {
                lines.push(format!(
                    "{}RSP    >> DECODE FAIL (proc={}ms)",
                    CONT, processing_ms
                ));
            }
            AttemptResult::Pending => {}
        }
    }

    if let Some(t) = tr.ack_tx_start {
        lines.push(format!(
            "  {:>14}  {:>8}  RSP  TX ACK pattern ({})",
            fmt_time(t),
            delta(t),
            tr.ack_tx_config.as_deref().unwrap_or("?")
        ));
    }
    if let Some(t) = tr.ack_tx_done {
        let ack_dur = tr.ack_tx_start.map_or(0.0, |s| (t - s) * 1000.0);
        lines.push(format!(
            "  {:>14}  {:>8}  RSP  ACK done + flush ({:.0}ms)",
            fmt_time(t),
            delta(t),
            ack_dur
        ));
    }

    if let (Some(first), Some(last)) = (tr.ack_polls.first(), tr.ack_polls.last()) {
        lines.push(format!(
            "  {:>14}  {:>8}  CMD  ACK poll start (matched={}/16)",
            fmt_time(first.time),
            delta(first.time),
            first.matched
        ));
        if tr.ack_polls.len() > 2 {
            let peak = tr.ack_polls.iter().map(|p| p.matched).max().unwrap_or(0);
            lines.push(format!(
                "{}CMD    ... {} polls, peak matched={}/16",
                CONT,
                tr.ack_polls.len(),
                peak
            ));
        }
        lines.push(format!(
            "  {:>14}  {:>8}  CMD  ACK poll end (matched={}/16)",
            fmt_time(last.time),
            delta(last.time),
            last.matched
        ));
    }

    if let Some(t) = tr.ack_detected {
        lines.push(format!(
            "  {:>14}  {:>8}  CMD  ACK DETECTED",
            fmt_time(t),
            delta(t)
        ));
    }

    lines.push(format!("  {}", "-".repeat(70)));
    if let (Some(tx), Some(att)) = (tr.tx_start, tr.attempts.first()) {
        lines.push(format!(
            "  CMD TX start -> RSP first buffer:  {}",
            fmt_delta(tx, att.time)
        ));
    }
    if let (Some(tx), Some(att)) = (tr.tx_end, tr.attempts.first()) {
        lines.push(format!(
            "  CMD TX end   -> RSP first buffer:  {}",
            fmt_delta(tx, att.time)
        ));
    }
    if let (Some(done), Some(det)) = (tr.ack_tx_done, tr.ack_detected) {
        lines.push(format!(
            "  RSP ACK done -> CMD ACK detected:  {}",
            fmt_delta(done, det)
        ));
    }
    if let Some(det) = tr.ack_detected {
        lines.push(format!(
            "  Total transition time:            {}",
            fmt_delta(tr.up_time, det)
        ));
    }

    lines.join("\n")
}

/// Crash report, one block per detected crash
pub fn render_crashes(crashes: &[CrashInfo], events: &[Event], profile: &ModemProfile) -> String {
    let mut lines: Vec<String> = Vec::new();

    if crashes.is_empty() {
        lines.push(String::new());
        lines.push(format!("  {}", "=".repeat(70)));
        lines.push("  CRASH DETECTION: No crashes detected".to_string());
        lines.push(format!("  {}", "=".repeat(70)));
        return lines.join("\n");
    }

    // The harness prints one exit status for the session
    let exit_code = events.iter().rev().find_map(|e| match e.kind {
        EventKind::ProcessExited { code } => Some(code),
        _ => None,
    });

    for crash in crashes {
        let other = crash.role.opposite();

        lines.push(String::new());
        lines.push(format!("  {}", "=".repeat(70)));
        lines.push(format!("  CRASH DETECTED: {} process died!", crash.role));
        lines.push(format!("  {}", "=".repeat(70)));
        if let Some(ctx) = crash.reinit_context {
            lines.push(format!(
                "  During: deinit() in config transition {} -> {}",
                profile.config_name(ctx.from),
                profile.config_name(ctx.to)
            ));
        }
        lines.push(format!(
            "  Last {} line: L{} at T+{:.3}s",
            crash.role, crash.last.line, crash.last.time
        ));
        lines.push(format!("    {}", crash.last.raw.trim()));
        if let Some(ref peer) = crash.peer_last {
            lines.push(format!(
                "  {} continued until: L{} at T+{:.3}s",
                other, peer.line, peer.time
            ));
        }
        lines.push(format!(
            "  {} silent for: {:.1}s (while {} continued)",
            crash.role, crash.silence, other
        ));
        if let Some(code) = exit_code {
            lines.push(format!("  Exit code: {} (0x{:08X})", code, code));
        }

        let role_events: Vec<&Event> = events
            .iter()
            .filter(|e| e.role == crash.role && e.time <= crash.last.time + 0.001)
            .collect();
        let tail = &role_events[role_events.len().saturating_sub(8)..];
        lines.push(String::new());
        lines.push(format!(
            "  Last {} {} events before crash:",
            tail.len(),
            crash.role
        ));
        for evt in tail {
            lines.push(format!(
                "    L{:>6} T+{:.3} {:<16} {}",
                evt.line,
                evt.time,
                evt.kind.name(),
                evt.raw.trim()
            ));
        }

        lines.push(String::new());
        lines.push("  Signature: deinit entered with no matching 'deinit complete'".to_string());
        lines.push(format!("  {}", "=".repeat(70)));
    }

    lines.join("\n")
}

/// Static coarse-search coverage table, computed from the profile alone
pub fn render_coverage(profile: &ModemProfile) -> String {
    let mut lines: Vec<String> = Vec::new();
    let t = &profile.tunables;

    lines.push(String::new());
    lines.push("=".repeat(80));
    lines.push("  COARSE SEARCH WINDOW ANALYSIS".to_string());
    lines.push("  (search window = 2*preamble + Nsymb, should cover the full buffer)".to_string());
    lines.push("=".repeat(80));
    lines.push(format!(
        "  {:>10} {:>6} {:>5} {:>5} {:>6} {:>6} {:>6} {}",
        "Config", "Mod", "pream", "Nsymb", "Window", "Buffer", "Cover%", "Status"
    ));
    lines.push(format!("  {}", "-".repeat(60)));

    for props in profile.configs.values() {
        let Some(nsymb) = props.nsymb else {
            continue;
        };
        if nsymb == 0 {
            continue;
        }
        let window = 2 * props.preamble + nsymb;
        let frame = props.preamble + nsymb;
        let buffer = (frame * 2).max(frame + t.turnaround_symbols);
        let coverage = window as f64 / buffer as f64 * 100.0;
        let status = if coverage > t.coverage_ok_pct {
            "OK"
        } else if coverage > t.coverage_narrow_pct {
            "NARROW"
        } else {
            "CRITICAL!"
        };
        lines.push(format!(
            "  {:>10} {:>6} {:>5} {:>5} {:>6} {:>6} {:>5.0}% {}",
            props.name, props.modulation, props.preamble, nsymb, window, buffer, coverage, status
        ));
    }

    lines.push(String::new());
    lines.push(format!(
        "  Configs covering under {:.0}% of the buffer miss preambles arriving in its",
        t.coverage_narrow_pct
    ));
    lines.push("  second half, which shows up as metric=0.000 rows at high configs.".to_string());

    lines.join("\n")
}

/// Classified-event dump, one line per event
pub fn render_events(events: &[Event]) -> String {
    let mut lines: Vec<String> = Vec::with_capacity(events.len());
    for evt in events {
        lines.push(format!(
            "  {} L{:>6} [{}] {}",
            fmt_time(evt.time),
            evt.line,
            evt.role,
            evt.kind.name()
        ));
    }
    lines.join("\n")
}

/// Assemble the JSON-exportable report with generation metadata
pub fn build_report(analysis: &Analysis, source: &str) -> AnalysisReport {
    AnalysisReport {
        metadata: ReportMetadata {
            generated_at: chrono::Utc::now().to_rfc3339(),
            source: source.to_string(),
            event_count: analysis.events.len(),
            transition_count: analysis.transitions.len(),
            crash_count: analysis.crashes.len(),
            has_timestamps: analysis.has_timestamps,
        },
        transitions: analysis.transitions.clone(),
        crashes: analysis.crashes.clone(),
    }
}

/// Write the report as pretty-printed JSON
pub fn write_json_report(report: &AnalysisReport, output_path: &Path) -> Result<()> {
    let json =
        serde_json::to_string_pretty(report).context("Failed to serialize report to JSON")?;

    fs::write(output_path, json)
        .with_context(|| format!("Failed to write JSON report to {}", output_path.display()))?;

    log::info!("JSON report written to {}", output_path.display());
    Ok(())
}

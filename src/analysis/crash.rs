//! Silent crash detection.
//!
//! The signature of a reinit death is a "Mutex zeroed, calling deinit" line
//! with no matching "deinit complete"; the process stops logging while the
//! other side keeps going. A secondary scan catches processes that go silent
//! without ever reaching deinit.

use std::collections::HashMap;

use log::debug;

use crate::config::Tunables;

use super::types::*;

/// Deinit entered and not yet seen to complete
struct PendingDeinit {
    time: LogTime,
    line: u32,
    raw: String,
    reinit: Option<ConfigChange>,
}

/// Scan the ordered events for processes that died mid-session. Pure
/// function of its inputs; safe to run concurrently with other scans over
/// the same slice. Reported crashes are ordered CMD before RSP.
pub fn detect_crashes(events: &[Event], tunables: &Tunables) -> Vec<CrashInfo> {
    let mut last_event: HashMap<Peer, LastSeen> = HashMap::new();
    let mut last_reinit: HashMap<Peer, ConfigChange> = HashMap::new();
    let mut pending: HashMap<Peer, PendingDeinit> = HashMap::new();

    for evt in events {
        if matches!(evt.role, Peer::Cmd | Peer::Rsp) {
            last_event.insert(
                evt.role,
                LastSeen {
                    time: evt.time,
                    line: evt.line,
                    raw: evt.raw.clone(),
                },
            );
        }

        match evt.kind {
            // Reinit announcements carry the config pair a later deinit
            // death should be attributed to
            EventKind::ReinitRequested { from, to } => {
                last_reinit.insert(evt.role, ConfigChange { from, to });
            }
            EventKind::DeinitStart => {
                pending.insert(
                    evt.role,
                    PendingDeinit {
                        time: evt.time,
                        line: evt.line,
                        raw: evt.raw.clone(),
                        reinit: last_reinit.get(&evt.role).copied(),
                    },
                );
            }
            EventKind::DeinitDone => {
                pending.remove(&evt.role);
            }
            _ => {}
        }
    }

    let mut crashes = Vec::new();

    // A deinit that never completed means the process died inside it
    for role in [Peer::Cmd, Peer::Rsp] {
        let Some(info) = pending.get(&role) else {
            continue;
        };
        let peer_last = last_event.get(&role.opposite()).cloned();
        let silence = peer_last
            .as_ref()
            .map(|p| p.time - info.time)
            .unwrap_or(0.0);
        debug!(
            "{} entered deinit at T+{:.3} and never completed it",
            role, info.time
        );
        crashes.push(CrashInfo {
            role,
            last: LastSeen {
                time: info.time,
                line: info.line,
                raw: info.raw.clone(),
            },
            reinit_context: info.reinit,
            peer_last,
            silence,
        });
    }

    // A peer that stops logging while the other keeps going died without
    // reaching deinit
    let threshold = tunables.silence_threshold.as_secs_f64();
    for role in [Peer::Cmd, Peer::Rsp] {
        if pending.contains_key(&role) {
            continue;
        }
        let (Some(mine), Some(other)) =
            (last_event.get(&role), last_event.get(&role.opposite()))
        else {
            continue;
        };
        let gap = other.time - mine.time;
        if gap > threshold {
            debug!(
                "{} silent for {:.1}s while {} continued",
                role,
                gap,
                role.opposite()
            );
            crashes.push(CrashInfo {
                role,
                last: mine.clone(),
                reinit_context: None,
                peer_last: Some(other.clone()),
                silence: gap,
            });
        }
    }

    crashes
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn evt(time: LogTime, role: Peer, kind: EventKind) -> Event {
        Event {
            time,
            line: (time * 1000.0) as u32,
            role,
            raw: format!("[{}] {}", role, kind.name()),
            kind,
        }
    }

    fn tunables() -> Tunables {
        Tunables::default()
    }

    #[test]
    fn test_deinit_without_done_is_crash() {
        let events = vec![
            evt(9.0, Peer::Cmd, EventKind::PttOn),
            evt(10.0, Peer::Cmd, EventKind::DeinitStart),
            evt(25.0, Peer::Rsp, EventKind::PttOff),
        ];
        let crashes = detect_crashes(&events, &tunables());
        assert_eq!(crashes.len(), 1);
        let c = &crashes[0];
        assert_eq!(c.role, Peer::Cmd);
        assert_eq!(c.last.time, 10.0);
        assert!((c.silence - 15.0).abs() < 1e-9);
        assert_eq!(c.peer_last.as_ref().map(|p| p.time), Some(25.0));
    }

    #[test]
    fn test_completed_deinit_is_clean() {
        let events = vec![
            evt(10.0, Peer::Cmd, EventKind::DeinitStart),
            evt(10.4, Peer::Cmd, EventKind::DeinitDone),
            evt(11.0, Peer::Rsp, EventKind::PttOn),
        ];
        assert!(detect_crashes(&events, &tunables()).is_empty());
    }

    #[test]
    fn test_reinit_context_attached() {
        let events = vec![
            evt(9.5, Peer::Rsp, EventKind::ReinitRequested { from: 0, to: 7 }),
            evt(10.0, Peer::Rsp, EventKind::DeinitStart),
            evt(12.0, Peer::Cmd, EventKind::PttOn),
        ];
        let crashes = detect_crashes(&events, &tunables());
        assert_eq!(crashes.len(), 1);
        assert_eq!(
            crashes[0].reinit_context,
            Some(ConfigChange { from: 0, to: 7 })
        );
    }

    #[test]
    fn test_deinit_crash_without_reinit_context() {
        let events = vec![
            evt(10.0, Peer::Rsp, EventKind::DeinitStart),
            evt(12.0, Peer::Cmd, EventKind::PttOn),
        ];
        let crashes = detect_crashes(&events, &tunables());
        assert_eq!(crashes.len(), 1);
        assert_eq!(crashes[0].reinit_context, None);
    }

    #[test]
    fn test_silent_death_over_threshold() {
        let events = vec![
            evt(5.0, Peer::Cmd, EventKind::PttOn),
            evt(6.0, Peer::Rsp, EventKind::PttOn),
            evt(20.0, Peer::Rsp, EventKind::PttOff),
        ];
        let crashes = detect_crashes(&events, &tunables());
        assert_eq!(crashes.len(), 1);
        let c = &crashes[0];
        assert_eq!(c.role, Peer::Cmd);
        assert_eq!(c.reinit_context, None);
        assert_eq!(c.last.time, 5.0);
        assert!((c.silence - 15.0).abs() < 1e-9);
    }

    #[test]
    fn test_gap_under_threshold_is_clean() {
        let events = vec![
            evt(5.0, Peer::Cmd, EventKind::PttOn),
            evt(14.9, Peer::Rsp, EventKind::PttOff),
        ];
        assert!(detect_crashes(&events, &tunables()).is_empty());
    }

    #[test]
    fn test_gap_exactly_at_threshold_is_clean() {
        let events = vec![
            evt(5.0, Peer::Cmd, EventKind::PttOn),
            evt(15.0, Peer::Rsp, EventKind::PttOff),
        ];
        assert!(detect_crashes(&events, &tunables()).is_empty());
    }

    #[test]
    fn test_lone_role_is_clean() {
        let events = vec![
            evt(1.0, Peer::Cmd, EventKind::PttOn),
            evt(60.0, Peer::Cmd, EventKind::PttOff),
        ];
        assert!(detect_crashes(&events, &tunables()).is_empty());
    }

    #[test]
    fn test_pending_deinit_not_double_counted() {
        // Crashed in deinit AND silent past the threshold; only the deinit
        // entry is reported
        let events = vec![
            evt(10.0, Peer::Cmd, EventKind::DeinitStart),
            evt(40.0, Peer::Rsp, EventKind::PttOn),
        ];
        let crashes = detect_crashes(&events, &tunables());
        assert_eq!(crashes.len(), 1);
        assert_eq!(crashes[0].last.time, 10.0);
    }

    #[test]
    fn test_both_pending_ordered_cmd_first() {
        let events = vec![
            evt(10.0, Peer::Rsp, EventKind::DeinitStart),
            evt(11.0, Peer::Cmd, EventKind::DeinitStart),
        ];
        let crashes = detect_crashes(&events, &tunables());
        assert_eq!(crashes.len(), 2);
        assert_eq!(crashes[0].role, Peer::Cmd);
        assert_eq!(crashes[1].role, Peer::Rsp);
    }

    #[test]
    fn test_unknown_role_does_not_mask_gap() {
        let events = vec![
            evt(5.0, Peer::Cmd, EventKind::PttOn),
            evt(19.0, Peer::Unknown, EventKind::InitDone),
            evt(20.0, Peer::Rsp, EventKind::PttOff),
        ];
        let crashes = detect_crashes(&events, &tunables());
        assert_eq!(crashes.len(), 1);
        assert_eq!(crashes[0].role, Peer::Cmd);
    }

    #[test]
    fn test_custom_silence_threshold() {
        let tunables = Tunables {
            silence_threshold: Duration::from_secs(2),
            ..Default::default()
        };
        let events = vec![
            evt(5.0, Peer::Cmd, EventKind::PttOn),
            evt(8.0, Peer::Rsp, EventKind::PttOff),
        ];
        let crashes = detect_crashes(&events, &tunables);
        assert_eq!(crashes.len(), 1);
        assert!((crashes[0].silence - 3.0).abs() < 1e-9);
    }
}

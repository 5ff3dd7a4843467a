//! Transition assembly from the ordered event sequence.
//!
//! A single fold over the events groups them into configuration-change
//! episodes. The builder tracks which process label currently acts as
//! commander; every config-up event reassigns the roles, which is how
//! runtime role swaps are followed without any explicit swap marker.

use log::debug;

use crate::config::ModemProfile;

use super::parser::PATTERNS;
use super::types::*;

/// Accumulator threaded over the event sequence
struct TransitionBuilder<'a> {
    profile: &'a ModemProfile,
    transitions: Vec<Transition>,
    /// True while the newest attempt of the newest transition accepts events
    attempt_open: bool,
    direction: Direction,
    commander: Peer,
    responder: Peer,
}

impl<'a> TransitionBuilder<'a> {
    fn new(profile: &'a ModemProfile) -> Self {
        Self {
            profile,
            transitions: Vec::new(),
            attempt_open: false,
            direction: Direction::Forward,
            commander: Peer::Cmd,
            responder: Peer::Rsp,
        }
    }

    fn observe(&mut self, evt: &Event) {
        // Direction markers ride on the raw line, not on a dedicated shape
        if matches!(evt.kind, EventKind::ConfigUp { .. })
            && PATTERNS.turbo_forward.is_match(&evt.raw)
        {
            self.direction = Direction::Forward;
        } else if PATTERNS.turbo_reverse.is_match(&evt.raw) {
            self.direction = Direction::Reverse;
        }

        if let EventKind::ConfigUp { from, to } = evt.kind {
            // Whoever prints the config-up currently holds the commander role
            self.commander = evt.role;
            self.responder = evt.role.opposite();
            self.open_transition(from, to, evt.time);
            return;
        }

        // Events before the first config-up belong to no transition
        let Some(tr) = self.transitions.last_mut() else {
            return;
        };

        if evt.role == self.commander {
            match &evt.kind {
                EventKind::PttOn if tr.tx_start.is_none() => {
                    tr.tx_start = Some(evt.time);
                }
                EventKind::PttOff | EventKind::TxEnd { .. } if tr.tx_end.is_none() => {
                    tr.tx_end = Some(evt.time);
                }
                EventKind::CmdRxEnter {
                    recv_timeout_ms,
                    msg_tx_ms,
                    ..
                } => {
                    tr.rx_enter = Some(evt.time);
                    tr.recv_timeout_ms = *recv_timeout_ms;
                    tr.msg_tx_ms = *msg_tx_ms;
                }
                EventKind::AckPollSample { matched } => {
                    tr.ack_polls.push(AckPoll {
                        time: evt.time,
                        matched: *matched,
                    });
                }
                EventKind::AckPatternDetected if tr.ack_detected.is_none() => {
                    tr.ack_detected = Some(evt.time);
                }
                EventKind::SetConfigAcked { .. } => {
                    tr.succeeded = true;
                }
                EventKind::Ceiling { .. } => {
                    tr.nacked = true;
                }
                _ => {}
            }
        }

        if evt.role == self.responder {
            match &evt.kind {
                EventKind::BufferFilled { underruns, energy } => {
                    tr.attempts
                        .push(DecodeAttempt::new(evt.time, *underruns, energy.clone()));
                    self.attempt_open = true;
                }
                EventKind::CoarseSync {
                    pream_symb,
                    delay,
                    lo,
                    hi,
                    metric,
                    verdict,
                } if self.attempt_open => {
                    if let Some(att) = tr.attempts.last_mut() {
                        att.coarse = Some(CoarseSync {
                            pream_symb: *pream_symb,
                            delay: *delay,
                            lo: *lo,
                            hi: *hi,
                            metric: *metric,
                            verdict: *verdict,
                        });
                    }
                    // Coverage needs the TX-side frame geometry, keyed by
                    // the config the frame was sent on
                    if let Some(props) = self.profile.props(tr.from_config) {
                        if let Some(nsymb) = props.nsymb {
                            if nsymb > 0 && props.preamble > 0 {
                                tr.search_window_symbols = 2 * props.preamble + nsymb;
                                tr.buffer_symbols = hi + nsymb + props.preamble;
                            }
                        }
                    }
                }
                EventKind::BoundsSkip {
                    signal,
                    retry,
                    metric,
                    energy,
                } if self.attempt_open => {
                    if let Some(att) = tr.attempts.last_mut() {
                        if att.recovery.is_none() {
                            att.recovery = Some(RecoveryAction::BoundsSkip {
                                signal: *signal,
                                retry: *retry,
                                metric: *metric,
                                energy: *energy,
                            });
                        }
                    }
                }
                EventKind::SilenceSkip {
                    orig,
                    signal,
                    retry,
                    metric,
                    energy,
                } if self.attempt_open => {
                    if let Some(att) = tr.attempts.last_mut() {
                        if att.recovery.is_none() {
                            att.recovery = Some(RecoveryAction::SilenceSkip {
                                orig: *orig,
                                signal: *signal,
                                retry: *retry,
                                metric: *metric,
                                energy: *energy,
                            });
                        }
                    }
                }
                EventKind::EnergyFix {
                    delay_from,
                    delay_to,
                } if self.attempt_open => {
                    if let Some(att) = tr.attempts.last_mut() {
                        if att.recovery.is_none() {
                            att.recovery = Some(RecoveryAction::EnergyFix {
                                delay_from: *delay_from,
                                delay_to: *delay_to,
                            });
                        }
                    }
                }
                EventKind::MetricWeak { metric } if self.attempt_open => {
                    if let Some(att) = tr.attempts.last_mut() {
                        if att.recovery.is_none() {
                            att.recovery = Some(RecoveryAction::WeakMetric { metric: *metric });
                        }
                        att.weak_metric = Some(*metric);
                    }
                }
                EventKind::ChannelEstimate { mean_gain } if self.attempt_open => {
                    if let Some(att) = tr.attempts.last_mut() {
                        att.mean_channel_gain = Some(*mean_gain);
                    }
                }
                EventKind::TrialResult {
                    trial,
                    outcome,
                    delay,
                    iterations,
                } if self.attempt_open => {
                    if let Some(att) = tr.attempts.last_mut() {
                        att.trials.push(TrialResult {
                            trial: *trial,
                            outcome: *outcome,
                            delay: *delay,
                            iterations: *iterations,
                        });
                    }
                }
                EventKind::TimingOk {
                    delay_symb,
                    ftr,
                    proc_ms,
                    ..
                } if self.attempt_open => {
                    if let Some(att) = tr.attempts.last_mut() {
                        att.result = AttemptResult::Ok {
                            delay_symbols: *delay_symb,
                            processing_ms: *proc_ms,
                            ftr: *ftr,
                        };
                    }
                    tr.decode_time = Some(evt.time);
                }
                EventKind::TimingFail { proc_ms, .. } if self.attempt_open => {
                    if let Some(att) = tr.attempts.last_mut() {
                        att.result = AttemptResult::Fail {
                            processing_ms: *proc_ms,
                        };
                    }
                }
                EventKind::AckTxStart { config } => {
                    tr.ack_tx_start = Some(evt.time);
                    tr.ack_tx_config = Some(config.clone());
                }
                EventKind::AckTxDone => {
                    tr.ack_tx_done = Some(evt.time);
                }
                EventKind::ReinitRequested { .. } => {
                    tr.reinit_requested = Some(evt.time);
                }
                EventKind::InitDone => {
                    tr.reinit_done = Some(evt.time);
                }
                _ => {}
            }
        }
    }

    fn open_transition(&mut self, from: u32, to: u32, time: LogTime) {
        if let Some(prev) = self.transitions.last_mut() {
            if !prev.succeeded && !prev.nacked {
                debug!("Transition {} left unresolved, marking NAck", prev.index);
                prev.nacked = true;
            }
        }

        let index = self.transitions.len();
        debug!(
            "Transition {}: config {} -> {} ({})",
            index, from, to, self.direction
        );
        self.transitions
            .push(Transition::new(index, from, to, self.direction, time));
        self.attempt_open = false;
    }

    fn finish(mut self) -> Vec<Transition> {
        // The log ending counts as closure for the trailing episode
        if let Some(last) = self.transitions.last_mut() {
            if !last.succeeded && !last.nacked {
                debug!(
                    "Transition {} unresolved at end of log, marking NAck",
                    last.index
                );
                last.nacked = true;
            }
        }
        self.transitions
    }
}

/// Group the ordered event sequence into transitions. Pure function of its
/// inputs; safe to run concurrently with other scans over the same slice.
pub fn build_transitions(events: &[Event], profile: &ModemProfile) -> Vec<Transition> {
    let mut builder = TransitionBuilder::new(profile);
    for evt in events {
        builder.observe(evt);
    }
    builder.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn evt(time: LogTime, role: Peer, kind: EventKind) -> Event {
        Event {
            time,
            line: (time * 1000.0) as u32,
            role,
            kind,
            raw: String::new(),
        }
    }

    fn up(time: LogTime, role: Peer, from: u32, to: u32) -> Event {
        Event {
            time,
            line: (time * 1000.0) as u32,
            role,
            kind: EventKind::ConfigUp { from, to },
            raw: format!("[{}] [TURBO] UP: config {} -> {}", role, from, to),
        }
    }

    fn coarse_kind(hi: u32, metric: f64) -> EventKind {
        EventKind::CoarseSync {
            pream_symb: 12,
            delay: 3,
            lo: 4,
            hi,
            metric,
            verdict: CoarseVerdict::Pass,
        }
    }

    fn profile() -> ModemProfile {
        ModemProfile::default()
    }

    #[test]
    fn test_success_flow() {
        let events = vec![
            up(10.0, Peer::Cmd, 0, 7),
            evt(10.5, Peer::Cmd, EventKind::PttOn),
            evt(11.7, Peer::Cmd, EventKind::TxEnd { frames_to_read: 18 }),
            evt(
                12.0,
                Peer::Rsp,
                EventKind::BufferFilled {
                    underruns: 2,
                    energy: "0.000 0.497".to_string(),
                },
            ),
            evt(12.2, Peer::Rsp, coarse_kind(40, 0.81)),
            evt(
                12.4,
                Peer::Rsp,
                EventKind::TimingOk {
                    delay_symb: 3,
                    underruns: 2,
                    ftr: -1,
                    proc_ms: 150,
                },
            ),
            evt(
                12.6,
                Peer::Rsp,
                EventKind::AckTxStart {
                    config: "CONFIG_7".to_string(),
                },
            ),
            evt(13.1, Peer::Rsp, EventKind::AckTxDone),
            evt(13.3, Peer::Cmd, EventKind::AckPollSample { matched: 14 }),
            evt(13.4, Peer::Cmd, EventKind::AckPatternDetected),
            evt(13.6, Peer::Cmd, EventKind::SetConfigAcked { config: 7 }),
            evt(
                13.8,
                Peer::Rsp,
                EventKind::ReinitRequested { from: 0, to: 7 },
            ),
            evt(14.2, Peer::Rsp, EventKind::InitDone),
        ];

        let transitions = build_transitions(&events, &profile());
        assert_eq!(transitions.len(), 1);

        let tr = &transitions[0];
        assert!(tr.succeeded);
        assert!(!tr.nacked);
        assert_eq!(tr.from_config, 0);
        assert_eq!(tr.to_config, 7);
        assert_eq!(tr.tx_start, Some(10.5));
        assert_eq!(tr.tx_end, Some(11.7));
        assert_eq!(tr.attempts.len(), 1);
        assert_eq!(tr.decode_time, Some(12.4));
        assert_eq!(tr.ack_detected, Some(13.4));
        assert_eq!(tr.ack_tx_config.as_deref(), Some("CONFIG_7"));
        // Reinit stamps attach even after the success marker
        assert_eq!(tr.reinit_requested, Some(13.8));
        assert_eq!(tr.reinit_done, Some(14.2));
        // from_config 0: nsymb=48, preamble=4, hi=40
        assert_eq!(tr.search_window_symbols, 56);
        assert_eq!(tr.buffer_symbols, 92);
        assert!(matches!(tr.attempts[0].result, AttemptResult::Ok { .. }));
    }

    #[test]
    fn test_unresolved_previous_marked_nack() {
        let events = vec![
            up(10.0, Peer::Cmd, 0, 7),
            up(20.0, Peer::Cmd, 0, 7),
            evt(21.0, Peer::Cmd, EventKind::SetConfigAcked { config: 7 }),
        ];
        let transitions = build_transitions(&events, &profile());
        assert_eq!(transitions.len(), 2);
        assert!(transitions[0].nacked);
        assert!(!transitions[0].succeeded);
        assert!(transitions[1].succeeded);
        assert!(!transitions[1].nacked);
    }

    #[test]
    fn test_trailing_pending_nacked_at_end() {
        let events = vec![up(10.0, Peer::Cmd, 7, 8)];
        let transitions = build_transitions(&events, &profile());
        assert_eq!(transitions.len(), 1);
        assert!(transitions[0].nacked);
        assert!(!transitions[0].succeeded);
    }

    #[test]
    fn test_every_transition_resolves_exactly_one_way() {
        let events = vec![
            up(10.0, Peer::Cmd, 0, 7),
            evt(11.0, Peer::Cmd, EventKind::SetConfigAcked { config: 7 }),
            up(20.0, Peer::Cmd, 7, 8),
            up(30.0, Peer::Cmd, 7, 8),
            evt(
                31.0,
                Peer::Cmd,
                EventKind::Ceiling { at: 8, settled: 7 },
            ),
        ];
        let transitions = build_transitions(&events, &profile());
        assert_eq!(transitions.len(), 3);
        for tr in &transitions {
            assert!(
                tr.succeeded != tr.nacked,
                "transition {} must resolve exactly one way",
                tr.index
            );
        }
    }

    #[test]
    fn test_ceiling_marks_nack() {
        let events = vec![
            up(10.0, Peer::Cmd, 14, 16),
            evt(12.0, Peer::Cmd, EventKind::Ceiling { at: 16, settled: 14 }),
        ];
        let transitions = build_transitions(&events, &profile());
        assert!(transitions[0].nacked);
        assert!(!transitions[0].succeeded);
    }

    #[test]
    fn test_role_swap_flips_attribution() {
        let events = vec![
            // RSP drives this episode, so CMD is the responder
            up(10.0, Peer::Rsp, 7, 8),
            evt(10.5, Peer::Rsp, EventKind::PttOn),
            evt(
                11.0,
                Peer::Cmd,
                EventKind::BufferFilled {
                    underruns: 0,
                    energy: "0.1".to_string(),
                },
            ),
            evt(
                11.2,
                Peer::Cmd,
                EventKind::TimingOk {
                    delay_symb: 2,
                    underruns: 0,
                    ftr: 0,
                    proc_ms: 90,
                },
            ),
            evt(11.5, Peer::Rsp, EventKind::SetConfigAcked { config: 8 }),
        ];
        let transitions = build_transitions(&events, &profile());
        let tr = &transitions[0];
        assert_eq!(tr.tx_start, Some(10.5));
        assert_eq!(tr.attempts.len(), 1);
        assert_eq!(tr.decode_time, Some(11.2));
        assert!(tr.succeeded);
    }

    #[test]
    fn test_events_before_first_config_up_ignored() {
        let events = vec![
            evt(1.0, Peer::Cmd, EventKind::PttOn),
            evt(
                2.0,
                Peer::Rsp,
                EventKind::BufferFilled {
                    underruns: 0,
                    energy: String::new(),
                },
            ),
            up(10.0, Peer::Cmd, 0, 7),
        ];
        let transitions = build_transitions(&events, &profile());
        assert_eq!(transitions.len(), 1);
        assert!(transitions[0].tx_start.is_none());
        assert!(transitions[0].attempts.is_empty());
    }

    #[test]
    fn test_orphan_responder_events_are_noops() {
        let events = vec![
            up(10.0, Peer::Cmd, 0, 7),
            // No buffer-fill preceded these
            evt(11.0, Peer::Rsp, coarse_kind(40, 0.9)),
            evt(
                11.5,
                Peer::Rsp,
                EventKind::TimingOk {
                    delay_symb: 1,
                    underruns: 0,
                    ftr: 0,
                    proc_ms: 10,
                },
            ),
        ];
        let transitions = build_transitions(&events, &profile());
        let tr = &transitions[0];
        assert!(tr.attempts.is_empty());
        assert!(tr.decode_time.is_none());
        assert_eq!(tr.search_window_symbols, 0);
    }

    #[test]
    fn test_attempt_does_not_leak_across_transitions() {
        let events = vec![
            up(10.0, Peer::Cmd, 0, 7),
            evt(
                11.0,
                Peer::Rsp,
                EventKind::BufferFilled {
                    underruns: 0,
                    energy: String::new(),
                },
            ),
            up(20.0, Peer::Cmd, 0, 7),
            // Arrives before any buffer-fill in the new episode
            evt(21.0, Peer::Rsp, coarse_kind(40, 0.5)),
        ];
        let transitions = build_transitions(&events, &profile());
        assert_eq!(transitions[1].attempts.len(), 0);
        assert!(transitions[0].attempts[0].coarse.is_none());
    }

    #[test]
    fn test_first_ptt_wins() {
        let events = vec![
            up(10.0, Peer::Cmd, 0, 7),
            evt(10.5, Peer::Cmd, EventKind::PttOn),
            evt(11.5, Peer::Cmd, EventKind::PttOn),
            evt(12.0, Peer::Cmd, EventKind::PttOff),
            evt(12.5, Peer::Cmd, EventKind::TxEnd { frames_to_read: 1 }),
        ];
        let transitions = build_transitions(&events, &profile());
        assert_eq!(transitions[0].tx_start, Some(10.5));
        assert_eq!(transitions[0].tx_end, Some(12.0));
    }

    #[test]
    fn test_recovery_slot_first_wins() {
        let events = vec![
            up(10.0, Peer::Cmd, 0, 7),
            evt(
                11.0,
                Peer::Rsp,
                EventKind::BufferFilled {
                    underruns: 0,
                    energy: String::new(),
                },
            ),
            evt(
                11.1,
                Peer::Rsp,
                EventKind::BoundsSkip {
                    signal: 30,
                    retry: 31,
                    metric: 0.4,
                    energy: 3.2e-5,
                },
            ),
            evt(
                11.2,
                Peer::Rsp,
                EventKind::SilenceSkip {
                    orig: 10,
                    signal: 30,
                    retry: 31,
                    metric: 0.3,
                    energy: 1.0e-6,
                },
            ),
            evt(11.3, Peer::Rsp, EventKind::MetricWeak { metric: 0.22 }),
        ];
        let transitions = build_transitions(&events, &profile());
        let att = &transitions[0].attempts[0];
        assert!(matches!(
            att.recovery,
            Some(RecoveryAction::BoundsSkip { .. })
        ));
        // The weak metric is still recorded alongside the taken slot
        assert_eq!(att.weak_metric, Some(0.22));
    }

    #[test]
    fn test_weak_metric_claims_empty_slot() {
        let events = vec![
            up(10.0, Peer::Cmd, 0, 7),
            evt(
                11.0,
                Peer::Rsp,
                EventKind::BufferFilled {
                    underruns: 0,
                    energy: String::new(),
                },
            ),
            evt(11.3, Peer::Rsp, EventKind::MetricWeak { metric: 0.22 }),
        ];
        let transitions = build_transitions(&events, &profile());
        let att = &transitions[0].attempts[0];
        assert_eq!(
            att.recovery,
            Some(RecoveryAction::WeakMetric { metric: 0.22 })
        );
    }

    #[test]
    fn test_ack_detected_first_wins() {
        let events = vec![
            up(10.0, Peer::Cmd, 0, 7),
            evt(11.0, Peer::Cmd, EventKind::AckPatternDetected),
            evt(12.0, Peer::Cmd, EventKind::AckPatternDetected),
        ];
        let transitions = build_transitions(&events, &profile());
        assert_eq!(transitions[0].ack_detected, Some(11.0));
    }

    #[test]
    fn test_reverse_direction_sticks() {
        let mut settle = evt(
            9.0,
            Peer::Cmd,
            EventKind::Ceiling { at: 16, settled: 14 },
        );
        settle.raw = "[CMD] [TURBO] CEILING reached, REVERSE to config 16, settling on 14".into();
        let events = vec![
            up(5.0, Peer::Cmd, 0, 7),
            settle,
            up(10.0, Peer::Cmd, 16, 14),
        ];
        let transitions = build_transitions(&events, &profile());
        assert_eq!(transitions[0].direction, Direction::Forward);
        assert_eq!(transitions[1].direction, Direction::Reverse);
    }

    #[test]
    fn test_coverage_skipped_without_frame_geometry() {
        // Config 100 is MFSK with no symbol count
        let events = vec![
            up(10.0, Peer::Cmd, 100, 0),
            evt(
                11.0,
                Peer::Rsp,
                EventKind::BufferFilled {
                    underruns: 0,
                    energy: String::new(),
                },
            ),
            evt(11.2, Peer::Rsp, coarse_kind(40, 0.8)),
        ];
        let transitions = build_transitions(&events, &profile());
        assert_eq!(transitions[0].search_window_symbols, 0);
        assert_eq!(transitions[0].buffer_symbols, 0);
    }

    #[test]
    fn test_last_coarse_wins() {
        let events = vec![
            up(10.0, Peer::Cmd, 0, 7),
            evt(
                11.0,
                Peer::Rsp,
                EventKind::BufferFilled {
                    underruns: 0,
                    energy: String::new(),
                },
            ),
            evt(11.2, Peer::Rsp, coarse_kind(40, 0.5)),
            evt(11.4, Peer::Rsp, coarse_kind(44, 0.7)),
        ];
        let transitions = build_transitions(&events, &profile());
        let coarse = transitions[0].attempts[0].coarse.unwrap();
        assert_eq!(coarse.hi, 44);
        assert!((coarse.metric - 0.7).abs() < 1e-9);
        assert_eq!(transitions[0].buffer_symbols, 44 + 48 + 4);
    }
}

//! Core data types for transition reconstruction.

use serde::{Deserialize, Serialize};

/// Log timestamp in seconds relative to the session's start
pub type LogTime = f64;

/// Process label printed on a log line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Peer {
    /// [CMD] process
    Cmd,
    /// [RSP] process
    Rsp,
    /// Line carried no label
    Unknown,
}

impl Peer {
    /// The other label. `Unknown` pairs with `Cmd`.
    pub fn opposite(self) -> Peer {
        match self {
            Peer::Cmd => Peer::Rsp,
            _ => Peer::Cmd,
        }
    }
}

impl std::fmt::Display for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Peer::Cmd => write!(f, "CMD"),
            Peer::Rsp => write!(f, "RSP"),
            Peer::Unknown => write!(f, "???"),
        }
    }
}

/// Direction of the configuration sweep
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// Stepping the data config upward
    Forward,
    /// Stepping back down
    Reverse,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Forward => write!(f, "FORWARD"),
            Direction::Reverse => write!(f, "REVERSE"),
        }
    }
}

/// Coarse synchronization verdict printed by the receiver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoarseVerdict {
    Pass,
    Skip,
}

impl std::fmt::Display for CoarseVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CoarseVerdict::Pass => write!(f, "PASS"),
            CoarseVerdict::Skip => write!(f, "SKIP"),
        }
    }
}

/// Outcome of a fine-sync decode trial
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrialOutcome {
    Ok,
    Fail,
}

impl std::fmt::Display for TrialOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrialOutcome::Ok => write!(f, "OK"),
            TrialOutcome::Fail => write!(f, "FAIL"),
        }
    }
}

/// What a classified log line says. The variant carries every field its
/// wire shape exposes; anything else about the line survives only in
/// [`Event::raw`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EventKind {
    /// "[TURBO] UP: config A -> B", the commander requesting a change
    ConfigUp { from: u32, to: u32 },
    /// Probing hit its ceiling; the sweep settles on an earlier config
    Ceiling { at: u32, settled: u32 },
    /// SET_CONFIG control frame sent
    SetConfigSend { forward: u32, reverse: u32 },
    /// Control frame acknowledged and the new config loaded
    SetConfigAcked { config: u32 },
    /// Commander entered its receive-wait window
    CmdRxEnter {
        recv_timeout_ms: u32,
        msg_tx_ms: u32,
        ftr: u32,
    },
    /// One acknowledgment poll sample (matched symbols out of 16)
    AckPollSample { matched: u32 },
    /// Definitive ACK pattern detection on the commander
    AckPatternDetected,
    /// Commander finished transmitting
    TxEnd { frames_to_read: u32 },
    /// Responder capture buffer filled; starts a decode attempt
    BufferFilled { underruns: u32, energy: String },
    /// Coarse preamble search outcome
    CoarseSync {
        pream_symb: u32,
        delay: u32,
        lo: u32,
        hi: u32,
        metric: f64,
        verdict: CoarseVerdict,
    },
    /// Out-of-bounds peak discarded, retrying on the signal position
    BoundsSkip {
        signal: u32,
        retry: u32,
        metric: f64,
        energy: f64,
    },
    /// All bounds retries exhausted
    BoundsFailed,
    /// Peak landed in silence, retrying on the signal position
    SilenceSkip {
        orig: u32,
        signal: u32,
        retry: u32,
        metric: f64,
        energy: f64,
    },
    /// Fine sync moved the delay estimate onto the energy envelope
    EnergyFix { delay_from: u32, delay_to: u32 },
    /// Correlation peak accepted despite a weak metric
    MetricWeak { metric: f64 },
    /// Frame timing recovered; the decode succeeded
    TimingOk {
        delay_symb: u32,
        underruns: u32,
        ftr: i32,
        proc_ms: u32,
    },
    /// Frame timing was not recovered
    TimingFail { underruns: u32, proc_ms: u32 },
    /// Responder started transmitting its ACK pattern
    AckTxStart { config: String },
    /// ACK pattern fully flushed to the device
    AckTxDone,
    /// PHY teardown announced for a config change
    ReinitRequested { from: u32, to: u32 },
    /// PHY came up on a config
    ConfigActive { config: u32, m: u32, nsymb: u32 },
    /// One decode trial inside an attempt
    TrialResult {
        trial: u32,
        outcome: TrialOutcome,
        delay: u32,
        iterations: u32,
    },
    /// Channel estimate summary
    ChannelEstimate { mean_gain: f64 },
    /// PHY mutex zeroed, deinit call entered
    DeinitStart,
    DeinitDone,
    InitStart,
    InitDone,
    /// Harness reported the process exit status
    ProcessExited { code: u32 },
    /// ACK controller switched its data config
    AckConfigLoad { to: u32, from: u32 },
    PttOn,
    PttOff,
}

impl EventKind {
    /// Short name for event dumps and traces
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::ConfigUp { .. } => "CONFIG_UP",
            EventKind::Ceiling { .. } => "CEILING",
            EventKind::SetConfigSend { .. } => "SET_CONFIG_SEND",
            EventKind::SetConfigAcked { .. } => "SET_CONFIG_ACKED",
            EventKind::CmdRxEnter { .. } => "CMD_RX_ENTER",
            EventKind::AckPollSample { .. } => "ACK_POLL",
            EventKind::AckPatternDetected => "ACK_DETECTED",
            EventKind::TxEnd { .. } => "TX_END",
            EventKind::BufferFilled { .. } => "BUF_FILLED",
            EventKind::CoarseSync { .. } => "COARSE_SYNC",
            EventKind::BoundsSkip { .. } => "BOUNDS_SKIP",
            EventKind::BoundsFailed => "BOUNDS_FAILED",
            EventKind::SilenceSkip { .. } => "SILENCE_SKIP",
            EventKind::EnergyFix { .. } => "ENERGY_FIX",
            EventKind::MetricWeak { .. } => "METRIC_WEAK",
            EventKind::TimingOk { .. } => "TIMING_OK",
            EventKind::TimingFail { .. } => "TIMING_FAIL",
            EventKind::AckTxStart { .. } => "ACK_TX_START",
            EventKind::AckTxDone => "ACK_TX_DONE",
            EventKind::ReinitRequested { .. } => "REINIT_REQUESTED",
            EventKind::ConfigActive { .. } => "CONFIG_ACTIVE",
            EventKind::TrialResult { .. } => "TRIAL_RESULT",
            EventKind::ChannelEstimate { .. } => "CHAN_ESTIMATE",
            EventKind::DeinitStart => "DEINIT_START",
            EventKind::DeinitDone => "DEINIT_DONE",
            EventKind::InitStart => "INIT_START",
            EventKind::InitDone => "INIT_DONE",
            EventKind::ProcessExited { .. } => "PROCESS_EXITED",
            EventKind::AckConfigLoad { .. } => "ACK_CONFIG_LOAD",
            EventKind::PttOn => "PTT_ON",
            EventKind::PttOff => "PTT_OFF",
        }
    }
}

/// One classified log line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub time: LogTime,
    /// 1-based line number in the source file
    pub line: u32,
    pub role: Peer,
    pub kind: EventKind,
    /// Original line, timestamp prefix included
    pub raw: String,
}

/// One acknowledgment poll sample on the commander side
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AckPoll {
    pub time: LogTime,
    pub matched: u32,
}

/// Coarse search outcome attached to a decode attempt
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CoarseSync {
    /// Symbol index where the preamble peak was found
    pub pream_symb: u32,
    pub delay: u32,
    pub lo: u32,
    pub hi: u32,
    pub metric: f64,
    pub verdict: CoarseVerdict,
}

/// Recovery action taken inside a decode attempt. At most one claims the
/// slot; a later weak-metric event still records its metric separately.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RecoveryAction {
    BoundsSkip {
        signal: u32,
        retry: u32,
        metric: f64,
        energy: f64,
    },
    SilenceSkip {
        orig: u32,
        signal: u32,
        retry: u32,
        metric: f64,
        energy: f64,
    },
    EnergyFix {
        delay_from: u32,
        delay_to: u32,
    },
    WeakMetric {
        metric: f64,
    },
}

impl RecoveryAction {
    /// Short label for summary notes
    pub fn label(&self) -> &'static str {
        match self {
            RecoveryAction::BoundsSkip { .. } => "bounds-skip",
            RecoveryAction::SilenceSkip { .. } => "silence-skip",
            RecoveryAction::EnergyFix { .. } => "energy-fix",
            RecoveryAction::WeakMetric { .. } => "weak-metric",
        }
    }
}

/// One fine-sync decode trial
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrialResult {
    pub trial: u32,
    pub outcome: TrialOutcome,
    pub delay: u32,
    pub iterations: u32,
}

/// Final state of a decode attempt
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum AttemptResult {
    /// No timing verdict was seen for this attempt
    Pending,
    Ok {
        delay_symbols: u32,
        processing_ms: u32,
        ftr: i32,
    },
    Fail {
        processing_ms: u32,
    },
}

/// One responder decode attempt, opened by a buffer-fill event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodeAttempt {
    pub time: LogTime,
    pub underruns: u32,
    /// Per-chunk energy readings, verbatim from the buffer-fill line
    pub energy_profile: String,
    pub coarse: Option<CoarseSync>,
    pub recovery: Option<RecoveryAction>,
    /// Weak-peak metric, kept even when the recovery slot is already taken
    pub weak_metric: Option<f64>,
    pub mean_channel_gain: Option<f64>,
    pub trials: Vec<TrialResult>,
    pub result: AttemptResult,
}

impl DecodeAttempt {
    pub fn new(time: LogTime, underruns: u32, energy_profile: String) -> Self {
        Self {
            time,
            underruns,
            energy_profile,
            coarse: None,
            recovery: None,
            weak_metric: None,
            mean_channel_gain: None,
            trials: Vec::new(),
            result: AttemptResult::Pending,
        }
    }
}

/// One configuration-change episode, assembled from both peers' events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub index: usize,
    pub from_config: u32,
    pub to_config: u32,
    pub direction: Direction,

    // Commander side
    /// Time of the change request; the episode's reference time
    pub up_time: LogTime,
    pub tx_start: Option<LogTime>,
    pub tx_end: Option<LogTime>,
    pub rx_enter: Option<LogTime>,
    pub recv_timeout_ms: u32,
    pub msg_tx_ms: u32,
    pub ack_polls: Vec<AckPoll>,
    /// First definitive ACK detection
    pub ack_detected: Option<LogTime>,

    // Responder side
    pub attempts: Vec<DecodeAttempt>,
    pub decode_time: Option<LogTime>,
    pub ack_tx_start: Option<LogTime>,
    pub ack_tx_done: Option<LogTime>,
    pub ack_tx_config: Option<String>,
    pub reinit_requested: Option<LogTime>,
    pub reinit_done: Option<LogTime>,

    // Outcome
    pub succeeded: bool,
    pub nacked: bool,

    // Coarse search coverage, zero until a coarse event arrives with
    // known config properties
    pub search_window_symbols: u32,
    pub buffer_symbols: u32,
}

impl Transition {
    pub fn new(
        index: usize,
        from_config: u32,
        to_config: u32,
        direction: Direction,
        up_time: LogTime,
    ) -> Self {
        Self {
            index,
            from_config,
            to_config,
            direction,
            up_time,
            tx_start: None,
            tx_end: None,
            rx_enter: None,
            recv_timeout_ms: 0,
            msg_tx_ms: 0,
            ack_polls: Vec::new(),
            ack_detected: None,
            attempts: Vec::new(),
            decode_time: None,
            ack_tx_start: None,
            ack_tx_done: None,
            ack_tx_config: None,
            reinit_requested: None,
            reinit_done: None,
            succeeded: false,
            nacked: false,
            search_window_symbols: 0,
            buffer_symbols: 0,
        }
    }

    /// Best (highest) coarse metric across all attempts
    pub fn best_coarse_metric(&self) -> Option<f64> {
        self.attempts
            .iter()
            .filter_map(|a| a.coarse.map(|c| c.metric))
            .fold(None, |best, m| match best {
                Some(b) if b >= m => Some(b),
                _ => Some(m),
            })
    }
}

/// Last classified activity seen from one peer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastSeen {
    pub time: LogTime,
    pub line: u32,
    pub raw: String,
}

/// A config change in flight when a peer died
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigChange {
    pub from: u32,
    pub to: u32,
}

/// A peer that stopped logging where follow-up was expected
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrashInfo {
    pub role: Peer,
    /// Deinit-start line for reinit deaths, otherwise the last activity
    pub last: LastSeen,
    /// Present when the peer died inside a PHY re-initialization
    pub reinit_context: Option<ConfigChange>,
    pub peer_last: Option<LastSeen>,
    /// Surviving peer's last time minus this peer's last time
    pub silence: f64,
}

/// Parsed log: ordered events plus the file-level timestamp flag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanResult {
    pub events: Vec<Event>,
    /// True when at least one line carried an explicit timestamp prefix.
    /// When false, every time in `events` is fabricated from line numbers.
    pub has_timestamps: bool,
}

/// Complete output of one analysis run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    pub events: Vec<Event>,
    pub transitions: Vec<Transition>,
    pub crashes: Vec<CrashInfo>,
    pub has_timestamps: bool,
}

/// Report metadata for JSON export
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportMetadata {
    pub generated_at: String,
    pub source: String,
    pub event_count: usize,
    pub transition_count: usize,
    pub crash_count: usize,
    pub has_timestamps: bool,
}

/// Full analysis report for JSON export
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub metadata: ReportMetadata,
    pub transitions: Vec<Transition>,
    pub crashes: Vec<CrashInfo>,
}

//! Per-pid state.

use std::collections::VecDeque;

use recut_pipeline::{CodecKind, Packet, PidInput, PidOutput, StreamKind};

/// Where a pid stands while the machine locates the common start cut.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) enum StartState {
    /// No admissible cut seen yet.
    #[default]
    Pending,
    /// A start SAP has been selected (`sap_ts`).
    Found,
    /// The pid hit end of stream before the range start; it does not vote.
    EosBeforeStart,
    /// Single-packet pid whose packet is reinserted at each chunk start.
    ReinsertSingle,
}

/// One pid flowing through the filter, with its queue and cut state.
pub(crate) struct Stream {
    pub input: Box<dyn PidInput>,
    pub output: Box<dyn PidOutput>,

    // pid configuration, cached at attach time
    pub timescale: u32,
    pub kind: StreamKind,
    pub codec: CodecKind,
    pub sample_rate: u32,
    pub channels: u32,
    /// Bytes per sample frame across all channels (raw audio).
    pub abps: u32,
    pub planar: bool,
    /// Positive declared delay, added to every timestamp read.
    pub tk_delay: u64,
    /// Sub-packet slicing allowed (text by duration, raw audio by samples).
    pub can_split: bool,

    /// True until the first non-SAP packet is seen.
    pub all_saps: bool,
    /// This pid governs SAP-aligned end adjustment.
    pub needs_adjust: bool,
    /// Upstream hands out blocking references on this pid.
    pub uses_blocking_refs: bool,

    // counters
    /// Packets consumed from the input (emitted or dropped).
    pub nb_frames: u64,
    /// Packets fetched since extraction began; frame ranges index into this.
    pub nb_frames_range: u64,

    // queue and per-range state
    pub queue: VecDeque<Packet>,
    pub start_state: StartState,
    /// Timestamp of the first packet past the end cut, once reached.
    pub range_end_reached: Option<u64>,
    pub prev_sap_ts: u64,
    pub prev_sap_frame_idx: u64,
    /// Selected start cut for the current range.
    pub sap_ts: Option<u64>,
    /// Media timestamp mapping to the output chunk's start.
    pub ts_at_range_start: Option<u64>,
    /// Media time consumed by previous chunks; keeps the output timeline
    /// continuous.
    pub ts_at_range_end: u64,
    pub first_pck_sent: bool,
    pub in_eos: bool,
    /// Residual offset into a split packet, in native units.
    pub split_start: u32,
    /// Forced duration of the last packet of a split chunk.
    pub split_end: u32,
    /// Packet straddling the end cut, carried into the next range.
    pub split_pck: Option<Packet>,
    /// First packet of a single-packet pid, reinserted at each chunk start.
    pub reinsert_single_pck: Option<Packet>,
    pub is_playing: bool,
    /// Samples trimmed at a raw-audio cut.
    pub audio_samples_to_keep: u32,

    // real-time anchors
    pub cts_us_at_init: u64,
    pub sys_clock_at_init: u64,
}

impl Stream {
    pub(crate) fn new(input: Box<dyn PidInput>, output: Box<dyn PidOutput>) -> Self {
        let info = input.info().clone();
        let timescale = if info.timescale == 0 {
            1000
        } else {
            info.timescale
        };
        let kind = info.kind;
        let codec = info.codec;
        let can_split = kind == StreamKind::Text;

        let (mut abps, mut sample_rate, mut channels, mut planar) = (0, 0, 0, false);
        if codec == CodecKind::Raw && kind == StreamKind::Audio {
            channels = info.channels;
            abps = info.bytes_per_sample * info.channels;
            sample_rate = if info.sample_rate == 0 {
                timescale
            } else {
                info.sample_rate
            };
            planar = info.planar;
        }

        // negative delays are decoder-side CTS offsets and stay in the stream
        let tk_delay = u64::try_from(info.delay).unwrap_or(0);

        Self {
            input,
            output,
            timescale,
            kind,
            codec,
            sample_rate,
            channels,
            abps,
            planar,
            tk_delay,
            can_split,
            all_saps: true,
            needs_adjust: false,
            uses_blocking_refs: false,
            nb_frames: 0,
            nb_frames_range: 0,
            queue: VecDeque::new(),
            start_state: StartState::Pending,
            range_end_reached: None,
            prev_sap_ts: 0,
            prev_sap_frame_idx: 0,
            sap_ts: None,
            ts_at_range_start: None,
            ts_at_range_end: 0,
            first_pck_sent: false,
            in_eos: false,
            split_start: 0,
            split_end: 0,
            split_pck: None,
            reinsert_single_pck: None,
            is_playing: false,
            audio_samples_to_keep: 0,
            cts_us_at_init: 0,
            sys_clock_at_init: 0,
        }
    }

    /// Decision timestamp of a packet on this pid, delay applied.
    pub(crate) fn pck_ts(&self, pck: &Packet) -> u64 {
        pck.decision_ts().unwrap_or(0) + self.tk_delay
    }

    /// True when a raw-audio cut can slice this pid's packets.
    pub(crate) fn is_raw_audio(&self) -> bool {
        self.abps > 0
    }
}

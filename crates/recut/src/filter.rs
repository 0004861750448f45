//! Filter context, range loading and the process tick.

use std::cmp::Ordering;
use std::time::Duration;

use recut_pipeline::{MediaTime, PidEvent, PidInput, PidOutput, PlaybackMode};
use tracing::{error, warn};

use crate::config::{RecutConfig, RtMode};
use crate::error::{RecutError, RecutResult};
use crate::extract::IntakeOutcome;
use crate::pacer::{Clock, SystemClock, RT_PRECISION_US};
use crate::range::{parse_endpoint, Endpoint, ExtractMode, RangeType};
use crate::stream::{StartState, Stream};

/// Result of one cooperative [`Recut::process`] tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tick {
    /// More work may be possible; re-enter when pids have data or capacity.
    Active,
    /// Real-time pacing is holding packets back; re-enter after this delay.
    Sleep(Duration),
    /// All ranges done and all pids drained.
    Eos,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) enum EosState {
    #[default]
    None,
    Graceful,
    Fatal {
        pid: usize,
    },
}

/// The media reframer.
///
/// Attach pids with [`add_stream`](Self::add_stream), deliver downstream
/// PLAY/STOP through [`handle_event`](Self::handle_event), and drive with
/// [`process`](Self::process).
pub struct Recut {
    pub(crate) cfg: RecutConfig,
    pub(crate) clock: Box<dyn Clock>,
    pub(crate) streams: Vec<Stream>,

    // emission filter flags derived from cfg.saps
    pub(crate) filter_sap1: bool,
    pub(crate) filter_sap2: bool,
    pub(crate) filter_sap3: bool,
    pub(crate) filter_sap4: bool,
    pub(crate) filter_sap_none: bool,

    // real-time state
    pub(crate) reschedule_in: u64,
    pub(crate) clock_val: u64,
    /// Shared anchor for `RtMode::Sync`: (cts_us, sys_clock_us).
    pub(crate) sync_anchor: (u64, u64),

    // range state
    pub(crate) range_type: RangeType,
    pub(crate) cur_range_idx: u32,
    pub(crate) cur_start: MediaTime,
    pub(crate) cur_end: MediaTime,
    pub(crate) start_frame_idx_plus_one: u64,
    pub(crate) end_frame_idx_plus_one: u64,
    pub(crate) in_range: bool,
    pub(crate) seekable: bool,

    pub(crate) extract_dur: MediaTime,
    pub(crate) extract_mode: ExtractMode,
    pub(crate) is_range_extraction: bool,
    pub(crate) file_idx: u32,

    // split-mode planning
    pub(crate) min_ts_computed: u64,
    pub(crate) min_ts_scale: u32,
    pub(crate) split_size: u64,
    pub(crate) est_file_size: u64,
    pub(crate) prev_min_ts_computed: u64,
    pub(crate) prev_min_ts_scale: u32,
    pub(crate) gop_depth: u32,

    pub(crate) wait_video_range_adjust: bool,
    pub(crate) has_seen_eos: bool,
    pub(crate) eos_state: EosState,
    pub(crate) nb_non_saps: u32,

    pub(crate) video_frames_at_range_start: u64,
    pub(crate) video_frames_since_start: u64,

    // effective flags: split modes force them on
    pub(crate) splitrange: bool,
    pub(crate) adjust_end: bool,
}

impl Recut {
    #[must_use]
    pub fn new(cfg: RecutConfig) -> Self {
        let mut filter_sap1 = false;
        let mut filter_sap2 = false;
        let mut filter_sap3 = false;
        let mut filter_sap4 = false;
        let mut filter_sap_none = false;
        for sap in &cfg.saps {
            match sap {
                1 => filter_sap1 = true,
                2 => filter_sap2 = true,
                3 => filter_sap3 = true,
                4 => filter_sap4 = true,
                _ => filter_sap_none = true,
            }
        }

        let splitrange = cfg.splitrange;
        let adjust_end = cfg.adjust_end;
        let mut filter = Self {
            cfg,
            clock: Box::new(SystemClock::new()),
            streams: Vec::new(),
            filter_sap1,
            filter_sap2,
            filter_sap3,
            filter_sap4,
            filter_sap_none,
            reschedule_in: 0,
            clock_val: 0,
            sync_anchor: (0, 0),
            range_type: RangeType::None,
            cur_range_idx: 0,
            cur_start: MediaTime::INVALID,
            cur_end: MediaTime::INVALID,
            start_frame_idx_plus_one: 0,
            end_frame_idx_plus_one: 0,
            in_range: false,
            seekable: true,
            extract_dur: MediaTime::INVALID,
            extract_mode: ExtractMode::None,
            is_range_extraction: false,
            file_idx: 0,
            min_ts_computed: 0,
            min_ts_scale: 0,
            split_size: 0,
            est_file_size: 0,
            prev_min_ts_computed: 0,
            prev_min_ts_scale: 0,
            gop_depth: 0,
            wait_video_range_adjust: false,
            has_seen_eos: false,
            eos_state: EosState::None,
            nb_non_saps: 0,
            video_frames_at_range_start: 0,
            video_frames_since_start: 0,
            splitrange,
            adjust_end,
        };
        filter.load_range();
        filter
    }

    /// Swap the pacing clock (tests drive a manual clock).
    #[must_use]
    pub fn with_clock(mut self, clock: Box<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Attach an input/output pid pair. Returns the pid index used by
    /// [`handle_event`](Self::handle_event).
    pub fn add_stream(
        &mut self,
        input: Box<dyn PidInput>,
        output: Box<dyn PidOutput>,
    ) -> usize {
        let mut st = Stream::new(input, output);

        if st.input.info().playback < PlaybackMode::FastForward {
            self.seekable = false;
        }
        if self.filter_sap1 || self.filter_sap2 {
            st.output.set_has_sync(false);
        }
        // frames outside the playback range are dropped, so a positive
        // declared delay must not survive into the output
        if self.range_type != RangeType::None && st.tk_delay > 0 {
            st.output.set_delay(None);
        }
        if self.cur_range_idx >= 1
            && (self.cur_range_idx as usize) <= self.cfg.range_props.len()
        {
            let props = self.cfg.range_props[self.cur_range_idx as usize - 1].clone();
            st.output.push_properties(&props);
        }

        self.streams.push(st);
        self.streams.len() - 1
    }

    /// Downstream PLAY/STOP arriving on the output pid `pid`; forwarded
    /// upstream, with the start range rewritten for time-based extraction.
    pub fn handle_event(&mut self, pid: usize, event: PidEvent) {
        let Some(st) = self.streams.get_mut(pid) else {
            return;
        };
        match event {
            PidEvent::Play { start_range, speed } => {
                let mut start_range = start_range;
                if self.range_type != RangeType::None && self.start_frame_idx_plus_one == 0 {
                    start_range = (self.cur_start.seconds() - self.cfg.seeksafe).max(0.0);
                }
                st.in_eos = false;
                st.is_playing = true;
                if self.eos_state == EosState::Graceful {
                    self.eos_state = EosState::None;
                }
                st.input.send_event(PidEvent::Play { start_range, speed });
            }
            PidEvent::Stop => {
                st.is_playing = false;
                st.input.send_event(PidEvent::Stop);
            }
            _ => {}
        }
    }

    /// One cooperative tick: pull input, decide cuts, emit what pacing and
    /// the current range allow.
    pub fn process(&mut self) -> RecutResult<Tick> {
        match self.eos_state {
            EosState::Fatal { pid } => return Err(RecutError::BlockingReferences { pid }),
            EosState::Graceful => return Ok(Tick::Eos),
            EosState::None => {}
        }
        if self.cfg.rt != RtMode::Off {
            self.reschedule_in = 0;
            self.clock_val = self.clock.now_us();
        }

        if matches!(self.range_type, RangeType::Closed | RangeType::Open) {
            match self.range_intake()? {
                IntakeOutcome::NotReady => return Ok(Tick::Active),
                IntakeOutcome::AllEosBeforeStart => {
                    let (_pending, nb_eos) = self.advance_range();
                    if !self.streams.is_empty() && nb_eos as usize == self.streams.len() {
                        return Ok(Tick::Eos);
                    }
                    return Ok(Tick::Active);
                }
                IntakeOutcome::AllEosDone => return Ok(Tick::Eos),
                IntakeOutcome::InRange => {}
            }
        }

        let (mut nb_eos, nb_end_of_range) = self.emit_tick();

        if matches!(self.range_type, RangeType::Closed | RangeType::Open)
            && !self.streams.is_empty()
            && (nb_end_of_range + nb_eos) as usize == self.streams.len()
        {
            let (_pending, nb_eos_after) = self.advance_range();
            nb_eos = nb_eos_after;
        }

        if !self.streams.is_empty() && nb_eos as usize == self.streams.len() {
            return Ok(Tick::Eos);
        }
        if self.cfg.rt != RtMode::Off && self.reschedule_in > 0 {
            return Ok(Tick::Sleep(Duration::from_micros(RT_PRECISION_US)));
        }
        Ok(Tick::Active)
    }

    /// Close the finished chunk on every pid: fold the consumed span into
    /// `ts_at_range_end`, reset transient cut state, then load the next
    /// range. Returns pids still holding work and pids fully done.
    pub(crate) fn advance_range(&mut self) -> (u32, u32) {
        let mut nb_end_of_range = 0;
        let mut nb_eos = 0;
        for st in &mut self.streams {
            if st.reinsert_single_pck.is_some() && self.cur_start.is_valid() {
                // the same packet re-enters each chunk at its own cts, so the
                // consumed span is the range bounds themselves
                if self.cur_end.is_valid() && self.cur_end.value() != 0 {
                    let start = self.cur_start.rescale(st.timescale);
                    let end = self.cur_end.rescale(st.timescale);
                    st.ts_at_range_end += u64::try_from(end - start).unwrap_or(0);
                }
            } else if let (Some(end), Some(start)) = (st.range_end_reached, st.ts_at_range_start)
            {
                st.ts_at_range_end += end - start;
            }
            st.ts_at_range_start = None;
            st.range_end_reached = None;
            st.start_state = StartState::Pending;
            st.sap_ts = None;
            if st.in_eos
                || (self.has_seen_eos
                    && st.split_pck.is_none()
                    && st.queue.is_empty()
                    && st.input.is_eos())
            {
                if st.queue.is_empty() {
                    st.output.set_eos();
                    nb_eos += 1;
                } else {
                    nb_end_of_range += 1;
                }
            } else if st.split_pck.is_some() {
                nb_end_of_range += 1;
            }
        }
        self.in_range = false;
        self.load_range();
        (nb_end_of_range, nb_eos)
    }

    /// Advance to the next extraction range (or the next split chunk).
    pub(crate) fn load_range(&mut self) {
        self.video_frames_at_range_start = self.video_frames_since_start;

        match self.extract_mode {
            ExtractMode::Dur => {
                self.cur_start = self.cur_start.advanced_by(self.extract_dur);
                self.cur_end = self.cur_end.advanced_by(self.extract_dur);
                self.file_idx += 1;
                return;
            }
            ExtractMode::Sap | ExtractMode::Size => {
                self.cur_start = self.cur_end;
                self.min_ts_computed = 0;
                self.min_ts_scale = 0;
                self.file_idx += 1;
                return;
            }
            _ => {}
        }

        let prev_frame = self.start_frame_idx_plus_one;
        let prev_end = self.cur_end;
        self.start_frame_idx_plus_one = 0;
        self.end_frame_idx_plus_one = 0;
        self.cur_start = MediaTime::INVALID;
        self.cur_end = MediaTime::INVALID;

        if self.cfg.starts.is_empty() {
            if self.range_type != RangeType::None {
                self.range_done();
            }
            return;
        }
        let idx = self.cur_range_idx as usize;
        if idx >= self.cfg.starts.len() {
            self.range_done();
            return;
        }
        let start_date = self.cfg.starts[idx].clone();
        let end_date = self
            .cfg
            .ends
            .get(idx)
            .or_else(|| self.cfg.starts.get(idx + 1))
            .cloned();

        self.cur_range_idx += 1;
        self.range_type = if end_date.is_some() {
            RangeType::Closed
        } else {
            RangeType::Open
        };

        let mut parsed_size = 0u64;
        match parse_endpoint(&start_date) {
            Some(Endpoint::Time(t)) => {
                self.extract_mode = ExtractMode::Range;
                self.cur_start = t;
            }
            Some(Endpoint::Frame(n)) => {
                self.extract_mode = ExtractMode::Range;
                self.start_frame_idx_plus_one = n + 1;
            }
            Some(Endpoint::SapSplit) => {
                self.extract_mode = ExtractMode::Sap;
                self.cur_start = MediaTime::millis(0);
            }
            Some(Endpoint::DurSplit(d)) => {
                self.extract_mode = ExtractMode::Dur;
                self.cur_start = d;
            }
            Some(Endpoint::SizeSplit(bytes)) => {
                self.extract_mode = ExtractMode::Size;
                parsed_size = bytes;
            }
            None => {
                warn!("cannot parse start endpoint, assuming end of ranges");
                self.extract_mode = ExtractMode::None;
                self.range_type = RangeType::Done;
                return;
            }
        }

        // seek decision
        let mut do_seek = false;
        if self.start_frame_idx_plus_one > 0 {
            if self.start_frame_idx_plus_one > prev_frame {
                do_seek = true;
            }
        } else if !prev_end.is_valid() {
            // previous range was frame-based, position is unknown
            do_seek = prev_frame > 0;
        } else if self.cur_start.is_valid() {
            // rewind only when the new start precedes the previous end by
            // more than the seek safety margin
            let safety_ticks = (self.cfg.seeksafe * f64::from(prev_end.timescale())) as i64;
            let rewind_limit = MediaTime::new(prev_end.value() - safety_ticks, prev_end.timescale());
            if self.cur_start < rewind_limit {
                do_seek = true;
            }
        }
        if self.cur_range_idx == 1 {
            do_seek = false;
        }
        if !self.seekable && do_seek {
            error!("ranges not in order and input not seekable, aborting extraction");
            self.range_done();
            return;
        }

        self.is_range_extraction = matches!(
            self.extract_mode,
            ExtractMode::Range | ExtractMode::Dur
        );

        let mut end_date = end_date;
        if self.extract_mode != ExtractMode::Range {
            end_date = None;
            match self.extract_mode {
                ExtractMode::Dur => {
                    self.extract_dur = self.cur_start;
                    self.cur_start = MediaTime::new(0, self.extract_dur.timescale());
                    self.cur_end = self.extract_dur;
                    self.range_type = RangeType::Closed;
                    self.file_idx = 1;
                    self.splitrange = true;
                    self.adjust_end = true;
                }
                ExtractMode::Size => {
                    self.splitrange = true;
                    self.split_size = parsed_size;
                    if self.split_size == 0 {
                        warn!("invalid zero split size");
                        self.range_done();
                        return;
                    }
                    self.file_idx = 1;
                }
                ExtractMode::Sap => {
                    self.splitrange = true;
                }
                _ => {}
            }
        }

        if let Some(end) = end_date {
            match parse_endpoint(&end) {
                Some(Endpoint::Time(t)) => self.cur_end = t,
                Some(Endpoint::Frame(n)) => self.end_frame_idx_plus_one = n + 1,
                _ => {
                    warn!("cannot parse end endpoint, assuming open range");
                    self.range_type = RangeType::Open;
                }
            }
        }

        // contiguous ranges keep a pending raw-audio sample split alive;
        // compare by instant so the endpoint forms may differ in timescale
        let reset_asplit =
            !(prev_end.is_valid() && prev_end.cmp(&self.cur_start) == Ordering::Equal);

        if self.cfg.rt != RtMode::Off || do_seek || reset_asplit {
            let mut start_range = 0.0;
            if do_seek {
                start_range = (self.cur_start.seconds() - self.cfg.seeksafe).max(0.0);
                self.has_seen_eos = false;
            }
            for st in &mut self.streams {
                if self.cfg.rt != RtMode::Off {
                    st.cts_us_at_init = 0;
                    st.sys_clock_at_init = 0;
                }
                if do_seek {
                    st.input.send_event(PidEvent::Stop);
                    st.input.send_event(PidEvent::Play {
                        start_range,
                        speed: 1.0,
                    });
                }
                if reset_asplit {
                    st.audio_samples_to_keep = 0;
                }
            }
            if self.cfg.rt != RtMode::Off {
                self.sync_anchor = (0, 0);
            }
        }

        if self.cur_range_idx >= 1
            && (self.cur_range_idx as usize) <= self.cfg.range_props.len()
        {
            let props = self.cfg.range_props[self.cur_range_idx as usize - 1].clone();
            let clear_delay = self.range_type != RangeType::None;
            let has_sync = self.filter_sap1 || self.filter_sap2;
            for st in &mut self.streams {
                if clear_delay && st.tk_delay > 0 {
                    st.output.set_delay(None);
                }
                if has_sync {
                    st.output.set_has_sync(false);
                }
                st.output.push_properties(&props);
                st.output.mark_period_resume();
            }
        }
    }

    /// Mark extraction finished: discard and stop all inputs, end all
    /// outputs.
    pub(crate) fn range_done(&mut self) {
        self.range_type = RangeType::Done;
        for st in &mut self.streams {
            st.input.set_discard(true);
            st.input.send_event(PidEvent::Stop);
            st.output.set_eos();
        }
    }

    /// Total visual frames emitted so far (feeds timecode rewriting).
    #[must_use]
    pub fn video_frames_emitted(&self) -> u64 {
        self.video_frames_since_start
    }
}

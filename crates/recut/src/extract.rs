//! The extraction state machine: per-tick packet intake, cut-point
//! classification, and resolution of the common start cut across pids.

use recut_pipeline::{MediaTime, Sap};
use tracing::warn;

use crate::config::StartRounding;
use crate::error::{RecutError, RecutResult};
use crate::filter::{EosState, Recut};
use crate::range::{ExtractMode, RangeType};
use crate::stream::{StartState, Stream};

/// Where a packet sits relative to the current range.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PckPos {
    Before,
    Inside,
    After,
}

/// What the intake pass concluded for this tick.
pub(crate) enum IntakeOutcome {
    /// The machine is still locating a cut; nothing to emit yet.
    NotReady,
    /// Chunk boundaries are decided; emission may proceed.
    InRange,
    /// Range mode: every pid hit EOS before the start cut.
    AllEosBeforeStart,
    /// Split mode: every pid hit EOS before the start cut; outputs ended.
    AllEosDone,
}

enum Resolution {
    Ready,
    /// A pid's queue does not reach the common cut; fetch more first.
    NeedMore,
    /// No pid could vote: end of stream everywhere before the start.
    AllEos,
}

impl Recut {
    /// Fetch up to one packet per pid and run all cut decisions.
    pub(crate) fn range_intake(&mut self) -> RecutResult<IntakeOutcome> {
        let count = self.streams.len();
        let mut nb_start_range_reached = 0usize;
        let mut nb_not_playing = 0usize;
        let mut check_split = false;

        'streams: for i in 0..count {
            // copies of range state; the borrow below shadows `self`
            let cur_start = self.cur_start;
            let cur_end = self.cur_end;
            let range_type = self.range_type;
            let start_frame = self.start_frame_idx_plus_one;
            let end_frame = self.end_frame_idx_plus_one;

            let fetched = {
                let st = &mut self.streams[i];

                if !st.is_playing {
                    nb_start_range_reached += 1;
                    nb_not_playing += 1;
                    continue;
                }
                if st.start_state != StartState::Pending && !self.wait_video_range_adjust {
                    nb_start_range_reached += 1;
                    continue;
                }
                // when flushing at EOS the end cut no longer gates intake
                if !self.has_seen_eos && st.range_end_reached.is_some() {
                    continue;
                }

                if let Some(p) = st.split_pck.clone() {
                    Some((p, true))
                } else if let Some(p) = st.input.peek() {
                    Some((p, false))
                } else {
                    if st.input.is_eos() {
                        // single-packet pids re-enter each range at its start
                        if let Some(reinsert) = st.reinsert_single_pck.clone() {
                            if !self.in_range && st.start_state == StartState::Pending {
                                st.start_state = StartState::ReinsertSingle;
                                if st.queue.is_empty() {
                                    st.queue.push_back(reinsert);
                                    if !self.is_range_extraction {
                                        check_split = true;
                                    }
                                }
                            }
                            if st.start_state != StartState::Pending {
                                nb_start_range_reached += 1;
                            }
                            if !self.is_range_extraction {
                                st.in_eos = true;
                            }
                            continue;
                        }

                        if !self.is_range_extraction {
                            check_split = true;
                            st.in_eos = true;
                        } else {
                            st.start_state = StartState::EosBeforeStart;
                            if self.wait_video_range_adjust && self.adjust_end && st.needs_adjust
                            {
                                self.wait_video_range_adjust = false;
                            }
                        }
                        // duration split: flush the partial chunk instead of
                        // ending with a near-empty file on one track
                        if st.is_playing && self.extract_mode == ExtractMode::Dur {
                            self.has_seen_eos = true;
                            self.in_range = true;
                        }
                    }
                    None
                }
            };
            let Some((pck, from_split)) = fetched else {
                continue;
            };

            let (ts, is_sap, frame_idx, purge_before, pos, samples_to_keep) = {
                let st = &mut self.streams[i];
                st.nb_frames_range += 1;
                let ts = st.pck_ts(&pck);
                let is_sap = self.cfg.nosap || self.cfg.raw || pck.sap != Sap::None;

                if !is_sap && st.all_saps {
                    st.all_saps = false;
                    self.nb_non_saps += 1;
                    if self.nb_non_saps > 1 {
                        warn!(
                            streams = self.nb_non_saps,
                            "multiple streams use predictive coding, SAP-aligned cuts may be inconsistent"
                        );
                    }
                    if self.adjust_end {
                        st.needs_adjust = true;
                        if st.start_state == StartState::Found && self.is_range_extraction {
                            self.wait_video_range_adjust = true;
                        }
                    }
                }

                // SAP and size split modes only queue packets; the chunk
                // planner owns all cut decisions
                if !self.is_range_extraction {
                    if pck.blocking_ref {
                        tracing::error!(
                            pid = i,
                            "cannot split by size/duration with blocking input references"
                        );
                        self.eos_state = EosState::Fatal { pid: i };
                        return Err(RecutError::BlockingReferences { pid: i });
                    }
                    st.queue.push_back(pck.clone());
                    st.input.advance();
                    check_split = true;
                    if st.nb_frames_range == 1 {
                        st.reinsert_single_pck = Some(pck);
                    } else if st.reinsert_single_pck.is_some() {
                        st.reinsert_single_pck = None;
                    }
                    continue;
                }

                let dur = pck.duration;
                // the end-adjust governor is locating the end cut; hold every
                // other pid back
                if self.wait_video_range_adjust && !st.needs_adjust {
                    continue;
                }

                let mut samples_to_keep = 0u32;
                let mut pos = classify_packet(
                    range_type,
                    cur_start,
                    cur_end,
                    start_frame,
                    end_frame,
                    st,
                    ts,
                    dur,
                    st.nb_frames_range,
                    &mut samples_to_keep,
                );
                if self.extract_mode == ExtractMode::Dur && self.has_seen_eos && pos == PckPos::After
                {
                    pos = PckPos::Inside;
                }

                // a SAP before the start obsoletes every queued packet ending
                // earlier, across all pids
                let purge_before =
                    is_sap && pos == PckPos::Before && (count == 1 || !st.all_saps);

                (ts, is_sap, st.nb_frames_range, purge_before, pos, samples_to_keep)
            };

            if purge_before {
                let timescale = self.streams[i].timescale;
                self.purge_queues(ts, timescale);
            }

            let st = &mut self.streams[i];
            if is_sap {
                if !self.in_range && pos == PckPos::Inside && st.start_state == StartState::Pending
                {
                    let mut ts_adj = u64::from(samples_to_keep);
                    if ts_adj > 0 && st.sample_rate != st.timescale {
                        ts_adj = ts_adj * u64::from(st.timescale) / u64::from(st.sample_rate);
                    }
                    let selected = match self.cfg.round {
                        StartRounding::Closest => {
                            let cur_closer = if start_frame > 0 {
                                let target = start_frame as i64 - 1;
                                let diff_prev = target - st.prev_sap_frame_idx as i64;
                                let diff_cur = target - frame_idx as i64;
                                diff_cur.abs() < diff_prev.abs()
                            } else {
                                let start_ts = cur_start.rescale(st.timescale);
                                let diff_prev = start_ts - st.prev_sap_ts as i64;
                                let diff_cur = start_ts - (ts + ts_adj) as i64;
                                diff_cur.abs() < diff_prev.abs()
                            };
                            if cur_closer {
                                ts + ts_adj
                            } else {
                                st.prev_sap_ts
                            }
                        }
                        StartRounding::Before => {
                            let mut selected = st.prev_sap_ts;
                            if self.extract_mode == ExtractMode::Range && start_frame == 0 {
                                let start_ts = cur_start.rescale(st.timescale);
                                if (ts + ts_adj) as i64 == start_ts {
                                    selected = ts + ts_adj;
                                }
                            }
                            selected
                        }
                        StartRounding::After => ts + ts_adj,
                    };
                    st.sap_ts = Some(selected);
                    st.start_state = StartState::Found;
                    nb_start_range_reached += 1;
                    if samples_to_keep > 0 {
                        st.audio_samples_to_keep = samples_to_keep;
                    }
                }
                if pos != PckPos::After {
                    st.prev_sap_ts = ts;
                    st.prev_sap_frame_idx = frame_idx;
                }
                if !self.wait_video_range_adjust && self.adjust_end && st.needs_adjust {
                    self.wait_video_range_adjust = true;
                }
            }

            if pos == PckPos::After && (!self.adjust_end || is_sap) {
                let mut enqueue = false;
                let mut end_cut = ts;
                st.split_end = 0;
                if st.start_state == StartState::Pending {
                    // no SAP inside the range: cut from the last SAP before it
                    st.sap_ts = Some(st.prev_sap_ts);
                    st.start_state = StartState::Found;
                    nb_start_range_reached += 1;
                    if st.prev_sap_ts == ts {
                        enqueue = true;
                    }
                }

                if st.can_split && start_frame == 0 {
                    // the end cut falls inside this packet: emit the head in
                    // this chunk, carry the packet into the next
                    if MediaTime::new(ts as i64, st.timescale) < self.cur_end {
                        enqueue = true;
                        let end_ticks = self.cur_end.rescale(st.timescale);
                        st.split_end = u32::try_from(end_ticks - ts as i64).unwrap_or(0);
                        end_cut = ts + u64::from(st.split_end);
                        st.split_pck = Some(pck.clone());
                    }
                } else if samples_to_keep > 0 && start_frame == 0 {
                    enqueue = true;
                    st.split_pck = Some(pck.clone());
                    st.audio_samples_to_keep = samples_to_keep;
                }
                st.range_end_reached = Some(end_cut);

                if self.wait_video_range_adjust && self.adjust_end && st.needs_adjust {
                    self.cur_end = MediaTime::new(end_cut as i64, st.timescale);
                    self.wait_video_range_adjust = false;
                }

                if !enqueue {
                    break 'streams;
                }
            }

            // out-of-range blocking references are dropped, not retained
            if pck.blocking_ref && pos == PckPos::Before {
                st.uses_blocking_refs = true;
                if !from_split {
                    st.input.advance();
                }
                continue;
            }

            st.queue.push_back(pck.clone());
            if from_split {
                st.split_pck = None;
            } else {
                st.input.advance();
                if !pck.blocking_ref && st.nb_frames_range == 1 {
                    st.reinsert_single_pck = Some(pck);
                } else if st.reinsert_single_pck.is_some() {
                    st.reinsert_single_pck = None;
                }
            }
        }

        if check_split {
            self.check_gop_split();
        }

        if !self.in_range
            && nb_start_range_reached == count
            && nb_not_playing < count
            && self.is_range_extraction
        {
            match self.resolve_range_start() {
                Resolution::NeedMore => return Ok(IntakeOutcome::NotReady),
                Resolution::AllEos => {
                    if self.extract_mode != ExtractMode::Range {
                        for st in &mut self.streams {
                            st.output.set_eos();
                        }
                        return Ok(IntakeOutcome::AllEosDone);
                    }
                    return Ok(IntakeOutcome::AllEosBeforeStart);
                }
                Resolution::Ready => self.in_range = true,
            }
        }

        if self.in_range {
            Ok(IntakeOutcome::InRange)
        } else {
            Ok(IntakeOutcome::NotReady)
        }
    }

    /// Every playing pid voted: pick the common start cut, purge queues up
    /// to it, and anchor each pid's output timeline.
    fn resolve_range_start(&mut self) -> Resolution {
        let mut min_ts: Option<MediaTime> = None;
        let mut min_ts_a: Option<MediaTime> = None;
        let mut min_ts_split: Option<MediaTime> = None;

        for st in &self.streams {
            if !st.is_playing {
                continue;
            }
            match st.start_state {
                StartState::EosBeforeStart | StartState::ReinsertSingle => continue,
                StartState::Found => {}
                StartState::Pending => {
                    debug_assert!(false, "unresolved stream in start resolution");
                    continue;
                }
            }
            let cand = MediaTime::new(st.sap_ts.unwrap_or(0) as i64, st.timescale);
            let slot = if st.can_split {
                &mut min_ts_split
            } else if st.all_saps {
                &mut min_ts_a
            } else {
                &mut min_ts
            };
            if slot.map_or(true, |m| cand < m) {
                *slot = Some(cand);
            }
        }

        // non-all-SAP pids dictate the cut, all-SAP pids otherwise; with
        // only splittable pids the requested start itself is the cut
        let mut min = min_ts.or(min_ts_a);
        if min.is_none() {
            if let Some(ms) = min_ts_split {
                min = if self.start_frame_idx_plus_one > 0 {
                    Some(ms)
                } else {
                    Some(self.cur_start)
                };
            }
        }

        let Some(min) = min else {
            if self.extract_mode == ExtractMode::Range {
                warn!(
                    start = %self.cur_start.seconds(),
                    "all streams ended before the requested start range"
                );
            }
            self.eos_state = EosState::Graceful;
            for st in &mut self.streams {
                st.nb_frames += st.queue.len() as u64;
                st.queue.clear();
            }
            return Resolution::AllEos;
        };

        for i in 0..self.streams.len() {
            let splitrange = self.splitrange;
            let cur_range_idx = self.cur_range_idx;
            let st = &mut self.streams[i];
            let mut start_found = false;
            while let Some(pck) = st.queue.front() {
                let ts = st.pck_ts(pck);
                let dur = u64::from(pck.duration).max(1);
                let min_v = min.value() as u64;
                let (ts_min, dur_min) = if min.timescale() != st.timescale {
                    (
                        rescale_u64(ts, min.timescale(), st.timescale),
                        rescale_u64(dur, min.timescale(), st.timescale),
                    )
                } else {
                    (ts, dur)
                };

                let mut is_start = 0u8;
                if ts_min >= min_v {
                    is_start = 1;
                } else if st.can_split && ts_min + dur_min >= min_v {
                    is_start = 2;
                } else if st.audio_samples_to_keep > 0 && ts_min + dur_min >= min_v {
                    is_start = 1;
                } else if st.start_state == StartState::ReinsertSingle {
                    is_start = 1;
                }

                if is_start > 0 {
                    let orig = min.rescale(st.timescale);
                    st.split_start = 0;
                    if is_start == 2 {
                        let off = rescale_u64(min_v - ts_min, st.timescale, min.timescale());
                        st.split_start = u32::try_from(off).unwrap_or(u32::MAX);
                    }
                    st.ts_at_range_start = Some(ts);
                    // a pid whose first retained packet lands after the
                    // common cut keeps lip-sync through an output delay
                    if st.start_state == StartState::Found
                        && orig < ts as i64
                        && splitrange
                        && cur_range_idx > 1
                    {
                        st.output.set_delay(Some(ts as i64 - orig));
                    }
                    start_found = true;
                    break;
                }
                st.queue.pop_front();
                st.nb_frames += 1;
            }
            if !start_found && !st.uses_blocking_refs {
                st.start_state = StartState::Pending;
                return Resolution::NeedMore;
            }
        }

        let splitrange = self.splitrange;
        for st in &mut self.streams {
            st.start_state = StartState::Pending;
            st.first_pck_sent = if self.extract_mode == ExtractMode::Dur {
                false
            } else {
                !splitrange
            };
        }
        Resolution::Ready
    }

    /// Drop queued packets ending before `ts` on every pid (timescales
    /// translated); single-packet pids keep their retained packet.
    pub(crate) fn purge_queues(&mut self, ts: u64, timescale: u32) {
        for st in &mut self.streams {
            if st.reinsert_single_pck.is_some() {
                continue;
            }
            let ts_rescale = if st.timescale != timescale {
                rescale_u64(ts, st.timescale, timescale)
            } else {
                ts
            };
            while let Some(pck) = st.queue.front() {
                let end = pck.decision_ts().unwrap_or(0) + u64::from(pck.duration);
                if end >= ts_rescale {
                    break;
                }
                st.queue.pop_front();
                st.nb_frames += 1;
            }
        }
    }
}

/// `v * to / from`, widened so large timestamps cannot overflow.
pub(crate) fn rescale_u64(v: u64, to: u32, from: u32) -> u64 {
    if from == 0 {
        return v;
    }
    (u128::from(v) * u128::from(to) / u128::from(from)) as u64
}

/// Position of a packet against the current range, with raw-audio
/// sub-packet boundaries reported through `samples_to_keep`.
#[allow(clippy::too_many_arguments)]
fn classify_packet(
    range_type: RangeType,
    cur_start: MediaTime,
    cur_end: MediaTime,
    start_frame_plus_one: u64,
    end_frame_plus_one: u64,
    st: &Stream,
    ts: u64,
    dur: u32,
    frame_idx: u64,
    samples_to_keep: &mut u32,
) -> PckPos {
    if start_frame_plus_one > 0 {
        if frame_idx < start_frame_plus_one {
            return PckPos::Before;
        }
        if range_type != RangeType::Open
            && end_frame_plus_one > 0
            && frame_idx >= end_frame_plus_one
        {
            return PckPos::After;
        }
        return PckPos::Inside;
    }

    let t = MediaTime::new(ts as i64, st.timescale);
    let t_end = MediaTime::new((ts + u64::from(dur)) as i64, st.timescale);
    let mut before = false;
    let mut after = false;

    if t < cur_start {
        before = true;
        if st.is_raw_audio() && t_end > cur_start {
            let mut nb_samp = (cur_start.rescale(st.timescale) - ts as i64).max(0) as u64;
            if st.timescale != st.sample_rate {
                nb_samp = rescale_u64(nb_samp, st.sample_rate, st.timescale);
            }
            *samples_to_keep = u32::try_from(nb_samp).unwrap_or(u32::MAX);
            before = false;
        }
    }
    // a packet ending exactly on the cut is still inside: ranges are
    // half-open
    if range_type != RangeType::Open && cur_end.is_valid() && t_end > cur_end {
        if st.is_raw_audio() && t < cur_end {
            let mut nb_samp = (cur_end.rescale(st.timescale) - ts as i64).max(0) as u64;
            if st.timescale != st.sample_rate {
                nb_samp = rescale_u64(nb_samp, st.sample_rate, st.timescale);
            }
            *samples_to_keep = u32::try_from(nb_samp).unwrap_or(u32::MAX);
        }
        after = true;
    }

    if before {
        // long packets (typically text) can straddle the whole range
        if after {
            PckPos::After
        } else {
            PckPos::Before
        }
    } else if after {
        PckPos::After
    } else {
        PckPos::Inside
    }
}

#[cfg(test)]
mod tests {
    use recut_pipeline::mock::{CapturePid, SourcePid};
    use recut_pipeline::{PidInfo, StreamKind};
    use rstest::rstest;

    use super::*;

    fn stream_with(timescale: u32, sample_rate: u32, abps: u32) -> Stream {
        let mut info = PidInfo::new(timescale, StreamKind::Audio);
        if abps > 0 {
            info = info.with_raw_audio(sample_rate, 1, abps);
        }
        let (out, _rec) = CapturePid::new();
        Stream::new(Box::new(SourcePid::new(info, vec![])), Box::new(out))
    }

    #[rstest]
    // 25fps video against [4s, 8s) in 90kHz
    #[case(359_999, 3600, PckPos::Before)]
    #[case(360_000, 3600, PckPos::Inside)]
    #[case(716_400, 3600, PckPos::Inside)] // ends exactly on the cut
    #[case(720_000, 3600, PckPos::After)]
    fn classify_time_range(#[case] ts: u64, #[case] dur: u32, #[case] expect: PckPos) {
        let st = stream_with(90_000, 0, 0);
        let mut keep = 0;
        let pos = classify_packet(
            RangeType::Closed,
            MediaTime::new(4, 1),
            MediaTime::new(8, 1),
            0,
            0,
            &st,
            ts,
            dur,
            1,
            &mut keep,
        );
        assert_eq!(pos, expect);
        assert_eq!(keep, 0);
    }

    #[test]
    fn classify_audio_straddles_start() {
        let st = stream_with(48_000, 48_000, 4);
        let mut keep = 0;
        // start at 4s = sample 192000; packet covers 191488..192512
        let pos = classify_packet(
            RangeType::Open,
            MediaTime::new(4, 1),
            MediaTime::INVALID,
            0,
            0,
            &st,
            191_488,
            1024,
            1,
            &mut keep,
        );
        assert_eq!(pos, PckPos::Inside);
        assert_eq!(keep, 512);
    }

    #[test]
    fn classify_audio_straddles_end() {
        let st = stream_with(48_000, 48_000, 4);
        let mut keep = 0;
        let pos = classify_packet(
            RangeType::Closed,
            MediaTime::new(0, 1),
            MediaTime::new(8, 1),
            0,
            0,
            &st,
            383_500,
            1024,
            1,
            &mut keep,
        );
        assert_eq!(pos, PckPos::After);
        assert_eq!(keep, 500);
    }

    #[rstest]
    #[case(100, PckPos::Before)]
    #[case(101, PckPos::Inside)]
    #[case(200, PckPos::Inside)]
    #[case(201, PckPos::After)]
    fn classify_frame_range(#[case] frame_idx: u64, #[case] expect: PckPos) {
        let st = stream_with(90_000, 0, 0);
        let mut keep = 0;
        // F100..F200 stored plus-one
        let pos = classify_packet(
            RangeType::Closed,
            MediaTime::INVALID,
            MediaTime::INVALID,
            101,
            201,
            &st,
            0,
            3600,
            frame_idx,
            &mut keep,
        );
        assert_eq!(pos, expect);
    }

    #[test]
    fn rescale_u64_is_wide() {
        let big = u64::MAX / 2;
        assert_eq!(rescale_u64(big, 1, 1), big);
        assert_eq!(rescale_u64(90_000, 48_000, 90_000), 48_000);
    }
}

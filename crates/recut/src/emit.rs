//! Emitter: dequeues decided packets, rewrites timestamps onto the
//! continuous output timeline, attaches chunk boundary properties and
//! applies the emission filters.

use bytes::Bytes;
use recut_pipeline::{CodecKind, Packet, PacketProp, Sap, StreamKind};
use tracing::warn;

use crate::config::RtMode;
use crate::filter::Recut;
use crate::pacer::hold_for;
use crate::range::{ExtractMode, RangeType};
use crate::stream::Stream;

impl Recut {
    /// Drain every pid as far as pacing and the chunk boundaries allow.
    /// Returns `(pids at EOS, pids at end of their chunk)`.
    pub(crate) fn emit_tick(&mut self) -> (u32, u32) {
        let count = self.streams.len();
        let mut nb_eos = 0u32;
        let mut nb_end_of_range = 0u32;

        'streams: for i in 0..count {
            loop {
                let range_active =
                    matches!(self.range_type, RangeType::Closed | RangeType::Open);

                let fetched = {
                    let st = &mut self.streams[i];
                    if range_active {
                        match st.queue.front() {
                            Some(p) => {
                                // split modes leave next-chunk packets queued;
                                // stop at the decided cut
                                if !self.is_range_extraction {
                                    if let Some(end) = st.range_end_reached {
                                        if st.pck_ts(p) >= end {
                                            nb_end_of_range += 1;
                                            continue 'streams;
                                        }
                                    }
                                }
                                Some((p.clone(), true))
                            }
                            None => None,
                        }
                    } else {
                        st.input.peek().map(|p| (p, false))
                    }
                };

                let Some((pck, is_ref)) = fetched else {
                    let st = &mut self.streams[i];
                    if st.range_end_reached.is_some() {
                        nb_end_of_range += 1;
                    } else if !st.is_playing {
                        nb_eos += 1;
                    } else if st.input.is_eos() {
                        st.output.set_eos();
                        nb_eos += 1;
                    }
                    continue 'streams;
                };

                let mut forward = true;
                if self.cfg.refs {
                    let deps = (pck.dependency_flags >> 2) & 0x3;
                    if deps == 2 {
                        forward = false;
                    }
                }
                if !self.cfg.saps.is_empty() {
                    let keep = match pck.sap {
                        Sap::Sap1 => self.filter_sap1,
                        Sap::Sap2 => self.filter_sap2,
                        Sap::Sap3 => self.filter_sap3,
                        Sap::Sap4 | Sap::Sap4Prol => self.filter_sap4,
                        Sap::None => self.filter_sap_none,
                    };
                    if !keep {
                        forward = false;
                    }
                }
                if self.range_type == RangeType::Done {
                    forward = false;
                }

                if !forward {
                    let st = &mut self.streams[i];
                    if is_ref {
                        st.queue.pop_front();
                    } else {
                        st.input.advance();
                    }
                    st.nb_frames += 1;
                    continue;
                }

                if !self.send_packet(i, &pck, is_ref) {
                    // pacing holds this pid back for now
                    continue 'streams;
                }
            }
        }

        (nb_eos, nb_end_of_range)
    }

    /// Emit one packet on pid `i`. Returns false when real-time pacing
    /// decided to hold it (the packet stays queued).
    fn send_packet(&mut self, i: usize, pck: &Packet, is_ref: bool) -> bool {
        let mut do_send = true;

        if self.cfg.rt != RtMode::Off {
            if let Some(ts) = pck.decision_ts() {
                let st = &self.streams[i];
                let cts_us = (u128::from(ts + st.tk_delay) * 1_000_000
                    / u128::from(st.timescale)) as u64;
                let use_sync = self.cfg.rt == RtMode::Sync;
                let (anchor_cts, anchor_clock) = if use_sync {
                    self.sync_anchor
                } else {
                    (st.cts_us_at_init, st.sys_clock_at_init)
                };

                if anchor_clock == 0 {
                    if use_sync {
                        self.sync_anchor = (cts_us, self.clock_val);
                    } else {
                        let st = &mut self.streams[i];
                        st.cts_us_at_init = cts_us;
                        st.sys_clock_at_init = self.clock_val;
                    }
                } else if cts_us < anchor_cts {
                    warn!("timestamp precedes the pacing clock anchor, emitting immediately");
                } else if let Some(wait) =
                    hold_for(cts_us, anchor_cts, anchor_clock, self.clock_val, self.cfg.speed)
                {
                    do_send = false;
                    if self.reschedule_in == 0 || self.reschedule_in > wait {
                        self.reschedule_in = wait;
                    }
                }
            }
        }

        // frame whitelist only applies outside range extraction
        if self.range_type == RangeType::None && !self.cfg.frames.is_empty() {
            let st = &mut self.streams[i];
            let next = st.nb_frames + 1;
            if !self.cfg.frames.iter().any(|&f| u64::from(f) == next) {
                st.input.advance();
                st.nb_frames += 1;
                return true;
            }
        }

        if !do_send {
            return false;
        }

        let rewrite_timecode = self.cfg.rewrite_timecode;
        let raw = self.cfg.raw;
        let cur_range_idx = self.cur_range_idx;
        let extract_mode = self.extract_mode;
        let range_type = self.range_type;
        let cur_start = self.cur_start;
        let cur_end = self.cur_end;
        let file_idx = self.file_idx;
        let start_frame = self.start_frame_idx_plus_one;
        let frames_at_start = self.video_frames_at_range_start;

        let st = &mut self.streams[i];
        if let Some(mut range_start) = st.ts_at_range_start {
            let mut cts_offset: u32 = 0;
            let mut dur_override: u32 = 0;
            let is_carried_tail = st
                .split_pck
                .as_ref()
                .is_some_and(|sp| sp.decision_ts() == pck.decision_ts());

            let mut new_pck: Packet;
            if rewrite_timecode
                && st.codec == CodecKind::Timecode
                && st.split_start > 0
                && frames_at_start > 0
            {
                // shift the leading frame counter so each chunk starts at
                // the right timecode
                let mut data = pck.data.to_vec();
                if data.len() >= 4 {
                    let n = u32::from_be_bytes([data[0], data[1], data[2], data[3]])
                        .wrapping_add(frames_at_start as u32);
                    data[0..4].copy_from_slice(&n.to_be_bytes());
                }
                new_pck = pck.clone();
                new_pck.data = Bytes::from(data);
            } else if is_carried_tail && st.audio_samples_to_keep > 0 {
                // end cut inside this packet: keep the head samples, the
                // carried copy delivers the tail in the next chunk
                new_pck = pck.clone();
                new_pck.data = copy_raw_audio(st, &pck.data, 0, st.audio_samples_to_keep);
                dur_override = st.audio_samples_to_keep;
            } else if st.audio_samples_to_keep > 0 {
                // start cut inside this packet: drop the head samples
                let total = pck.data.len() as u32 / st.abps.max(1);
                let keep = st.audio_samples_to_keep;
                let nb = total.saturating_sub(keep);
                new_pck = pck.clone();
                new_pck.data = copy_raw_audio(st, &pck.data, keep, nb);
                dur_override = nb;
                cts_offset = keep;
                if cur_range_idx == 1 {
                    range_start += u64::from(keep);
                    st.ts_at_range_start = Some(range_start);
                }
                st.audio_samples_to_keep = 0;
            } else {
                new_pck = pck.clone();
            }

            if cts_offset > 0 || dur_override > 0 {
                if st.timescale != st.sample_rate && st.sample_rate > 0 {
                    cts_offset = rescale_u32(cts_offset, st.timescale, st.sample_rate);
                    dur_override = rescale_u32(dur_override, st.timescale, st.sample_rate);
                }
                new_pck.duration = dur_override;
            }

            if !st.first_pck_sent {
                st.first_pck_sent = true;
                if extract_mode == ExtractMode::Range {
                    new_pck.props.push(PacketProp::FileNumber(cur_range_idx));
                    let suffix = if start_frame > 0 {
                        // frame endpoints keep their textual form
                        let mut s = self
                            .cfg
                            .starts
                            .get(cur_range_idx as usize - 1)
                            .cloned()
                            .unwrap_or_default();
                        if range_type == RangeType::Closed {
                            if let Some(end) = self.cfg.ends.get(cur_range_idx as usize - 1) {
                                s.push('_');
                                s.push_str(end);
                            }
                        }
                        s.replace([':', '/'], ".")
                    } else if cur_end.is_valid() {
                        format!("{}-{}", cur_start.rescale(1000), cur_end.rescale(1000))
                    } else {
                        format!("{}", cur_start.rescale(1000))
                    };
                    new_pck.props.push(PacketProp::FileSuffix(suffix));
                } else {
                    new_pck.props.push(PacketProp::FileNumber(file_idx));
                    new_pck.props.push(PacketProp::FileSuffix(format!(
                        "{}-{}",
                        cur_start.rescale(1000),
                        cur_end.rescale(1000)
                    )));
                }
            }

            // rewrite onto the continuous output timeline
            if let Some(cts) = pck.cts {
                let mut ts = cts as i64 + i64::from(cts_offset);
                ts += st.tk_delay as i64;
                ts += st.ts_at_range_end as i64;
                ts -= range_start as i64;
                if ts < 0 {
                    warn!("negative timestamp while splitting, clamping to 0");
                    ts = 0;
                }
                new_pck.cts = Some(ts as u64);
                if raw {
                    new_pck.dts = Some(ts as u64);
                }
            }
            if !raw {
                if let Some(dts) = pck.dts {
                    let mut ts = dts as i64 + i64::from(cts_offset);
                    ts += st.tk_delay as i64;
                    ts += st.ts_at_range_end as i64;
                    ts -= range_start as i64;
                    new_pck.dts = Some(ts.max(0) as u64);
                }
            }

            if st.split_start > 0 {
                let mut dur = pck.duration;
                // a packet shorter than the split offset is copied untouched
                if dur > st.split_start {
                    dur -= st.split_start;
                }
                new_pck.duration = dur;
                range_start += u64::from(st.split_start);
                st.ts_at_range_start = Some(range_start);
                st.split_start = 0;
            }
            if st.split_end > 0 && st.queue.len() == 1 {
                new_pck.duration = st.split_end;
                st.split_end = 0;
            }
            // reinserted single packet: clamp its duration to the chunk
            // span; the stored offset re-arms the timecode rewrite on the
            // next chunk
            if !st.can_split && st.reinsert_single_pck.is_some() {
                if let Some(end) = st.range_end_reached {
                    let ndur = (end + 1).saturating_sub(range_start);
                    if ndur > 0 && ndur < u64::from(pck.duration) {
                        new_pck.duration = u32::try_from(ndur).unwrap_or(u32::MAX);
                    }
                    st.split_start = u32::try_from(ndur).unwrap_or(u32::MAX);
                }
            }

            st.output.send(new_pck);
        } else {
            st.output.send(pck.clone());
        }

        let st = &mut self.streams[i];
        if is_ref {
            st.queue.pop_front();
        } else {
            st.input.advance();
        }
        st.nb_frames += 1;
        if st.kind == StreamKind::Visual && st.nb_frames > self.video_frames_since_start {
            self.video_frames_since_start = st.nb_frames;
        }
        true
    }
}

fn rescale_u32(v: u32, to: u32, from: u32) -> u32 {
    if from == 0 {
        return v;
    }
    u32::try_from(u64::from(v) * u64::from(to) / u64::from(from)).unwrap_or(u32::MAX)
}

/// Copy `nb_samples` starting at sample `offset`, honoring the pid's sample
/// layout. Planar sources keep per-channel planes packed contiguously.
fn copy_raw_audio(st: &Stream, src: &[u8], offset: u32, nb_samples: u32) -> Bytes {
    let abps = st.abps.max(1) as usize;
    let offset = offset as usize;
    let nb_samples = nb_samples as usize;

    if st.planar && st.channels > 0 {
        let channels = st.channels as usize;
        let stride = src.len() / channels;
        let bps = abps / channels;
        let mut out = vec![0u8; nb_samples * abps];
        for ch in 0..channels {
            let src_from = (ch * stride + offset * bps).min(src.len());
            let src_to = (src_from + nb_samples * bps).min(src.len());
            let dst_from = ch * bps * nb_samples;
            out[dst_from..dst_from + (src_to - src_from)]
                .copy_from_slice(&src[src_from..src_to]);
        }
        Bytes::from(out)
    } else {
        let from = (offset * abps).min(src.len());
        let to = (from + nb_samples * abps).min(src.len());
        Bytes::copy_from_slice(&src[from..to])
    }
}

//! Chunk planner for SAP, duration and size split modes: derives the next
//! common end cut from the SAPs queued on every pid.

use recut_pipeline::{MediaTime, Sap};
use tracing::info;

use crate::config::StartRounding;
use crate::extract::rescale_u64;
use crate::filter::Recut;
use crate::range::ExtractMode;
use crate::stream::StartState;

/// `(ts, timescale)` pair where a zero value means "no candidate yet".
type TsCandidate = (u64, u32);

fn keep_min(slot: &mut TsCandidate, ts: u64, timescale: u32) {
    if slot.0 == 0
        || u128::from(ts) * u128::from(slot.1) < u128::from(slot.0) * u128::from(timescale)
    {
        *slot = (ts, timescale);
    }
}

fn keep_max(slot: &mut TsCandidate, ts: u64, timescale: u32) {
    if slot.0 == 0
        || u128::from(ts) * u128::from(slot.1) > u128::from(slot.0) * u128::from(timescale)
    {
        *slot = (ts, timescale);
    }
}

impl Recut {
    /// Try to compute the common end cut for the current chunk. Publishes
    /// `min_ts_computed`/`min_ts_scale`, sets every pid's end boundary and
    /// flips the filter into `in_range` once every pid can reach the cut.
    pub(crate) fn check_gop_split(&mut self) {
        let count = self.streams.len();
        let mut flush_all = false;

        if self.min_ts_scale == 0 {
            let mut min: TsCandidate = (0, 0);
            let mut min_a: TsCandidate = (0, 0);
            let mut nb_eos = 0usize;
            let mut has_empty_streams = false;
            let mut wait_for_sap = false;

            for st in &self.streams {
                if st.in_eos {
                    nb_eos += 1;
                    if st.queue.is_empty() {
                        has_empty_streams = true;
                        continue;
                    }
                }

                // candidate cut: the (1 + gop_depth)-th next SAP in the queue
                let mut nb_sap = 0u32;
                let mut last_sap_ts = 0u64;
                for pck in &st.queue {
                    if !self.cfg.raw && pck.sap == Sap::None {
                        continue;
                    }
                    nb_sap += 1;
                    if nb_sap <= 1 + self.gop_depth {
                        continue;
                    }
                    last_sap_ts = st.pck_ts(pck);
                    break;
                }

                if last_sap_ts == 0 {
                    if st.in_eos && !flush_all && st.reinsert_single_pck.is_none() {
                        flush_all = true;
                    } else if !st.all_saps {
                        wait_for_sap = true;
                    }
                }

                if st.all_saps {
                    keep_min(&mut min_a, last_sap_ts, st.timescale);
                } else {
                    keep_min(&mut min, last_sap_ts, st.timescale);
                }
            }

            // size split flushes as soon as one stream drained at EOS
            if nb_eos > 0 && has_empty_streams {
                flush_all = true;
            }

            // flushing: the cut is the max end time over last queued packets
            if flush_all {
                for st in &self.streams {
                    if !st.in_eos {
                        return;
                    }
                    let Some(pck) = st.queue.back() else {
                        continue;
                    };
                    let dur = u64::from(pck.duration).max(1);
                    let ts = st.pck_ts(pck) + dur;
                    keep_max(&mut min, ts, st.timescale);
                }
            }

            if min.0 == 0 {
                if wait_for_sap {
                    return;
                }
                min = min_a;
            }
            if min.0 == 0 {
                if nb_eos < count {
                    return;
                }
            } else {
                self.min_ts_computed = min.0;
                self.min_ts_scale = min.1;
            }
        }

        // unless flushing, every pid's queue must reach the cut
        if !flush_all {
            for st in &self.streams {
                if st.start_state == StartState::EosBeforeStart {
                    continue;
                }
                if st.reinsert_single_pck.is_some() {
                    continue;
                }
                let Some(pck) = st.queue.back() else {
                    return;
                };
                let ts = st.pck_ts(pck);
                if u128::from(ts) * u128::from(self.min_ts_scale)
                    < u128::from(self.min_ts_computed) * u128::from(st.timescale)
                {
                    return;
                }
            }
        }

        if self.extract_mode == ExtractMode::Size {
            let mut nb_stop_at_min_ts = 0usize;
            let mut cumulated_size = 0u64;
            let mut nb_eos = 0usize;

            for st in &self.streams {
                let mut found = false;
                let mut walked = 0usize;
                for pck in &st.queue {
                    let ts = st.pck_ts(pck);
                    if u128::from(ts) * u128::from(self.min_ts_scale)
                        >= u128::from(self.min_ts_computed) * u128::from(st.timescale)
                    {
                        nb_stop_at_min_ts += 1;
                        found = true;
                        break;
                    }
                    cumulated_size += pck.data.len() as u64;
                    walked += 1;
                }
                if walked == st.queue.len() && st.in_eos && !found {
                    nb_eos += 1;
                }
            }

            // under target: remember this cut and ask for one more GOP
            if cumulated_size < self.split_size
                && self.min_ts_scale != 0
                && (self.prev_min_ts_computed == 0
                    || self.prev_min_ts_computed < self.min_ts_computed)
            {
                if nb_stop_at_min_ts + nb_eos == count {
                    self.est_file_size = cumulated_size;
                    self.prev_min_ts_computed = self.min_ts_computed;
                    self.prev_min_ts_scale = self.min_ts_scale;
                    self.min_ts_computed = 0;
                    self.min_ts_scale = 0;
                    self.gop_depth += 1;
                }
                return;
            }

            let use_prev = match self.cfg.round {
                StartRounding::Before => true,
                StartRounding::After => false,
                StartRounding::Closest => {
                    let diff_prev = self.split_size as i64 - self.est_file_size as i64;
                    let diff_cur = self.split_size as i64 - cumulated_size as i64;
                    diff_cur.abs() >= diff_prev.abs()
                }
            };
            let use_prev = use_prev && self.prev_min_ts_scale != 0;

            if use_prev {
                self.min_ts_computed = self.prev_min_ts_computed;
                self.min_ts_scale = self.prev_min_ts_scale;
            } else {
                self.est_file_size = cumulated_size;
            }
            info!(
                estimation = if use_prev { "previous" } else { "current" },
                size = self.est_file_size,
                "size split cut computed"
            );
            self.prev_min_ts_computed = 0;
            self.prev_min_ts_scale = 0;
        }

        // good to go: anchor every pid's chunk boundaries on the cut
        self.in_range = true;
        self.gop_depth = 0;
        for st in &mut self.streams {
            st.first_pck_sent = false;
            if let Some(pck) = st.queue.front() {
                let end = if self.min_ts_scale != 0 {
                    rescale_u64(self.min_ts_computed, st.timescale, self.min_ts_scale)
                } else {
                    self.min_ts_computed
                };
                st.range_end_reached = Some(end);
                st.ts_at_range_start = Some(st.pck_ts(pck));
            } else {
                st.range_end_reached = None;
            }
        }
        self.cur_end = MediaTime::new(self.min_ts_computed as i64, self.min_ts_scale);
    }
}

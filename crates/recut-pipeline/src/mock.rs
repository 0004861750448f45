//! In-memory pids for driving the filter in tests.

use std::sync::Arc;

use crate::{Packet, PidEvent, PidInfo, PidInput, PidOutput};

/// Minimal mutex wrapper with infallible `lock()` for tests.
pub struct MockLog<T> {
    inner: std::sync::Mutex<T>,
}

impl<T> MockLog<T> {
    #[must_use]
    pub fn new(value: T) -> Self {
        Self {
            inner: std::sync::Mutex::new(value),
        }
    }

    /// # Panics
    ///
    /// Panics if the mutex is poisoned.
    pub fn lock(&self) -> std::sync::MutexGuard<'_, T> {
        self.inner
            .lock()
            .expect("mock pid log mutex should not be poisoned")
    }
}

impl<T: Default> Default for MockLog<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

/// Scripted input pid: a fixed packet list with a cursor.
///
/// A `Play` event rewinds the cursor to the requested start position, which
/// is how a seekable upstream behaves after STOP+PLAY.
pub struct SourcePid {
    info: PidInfo,
    packets: Vec<Packet>,
    cursor: usize,
    discard: bool,
    events: Arc<MockLog<Vec<PidEvent>>>,
}

impl SourcePid {
    #[must_use]
    pub fn new(info: PidInfo, packets: Vec<Packet>) -> Self {
        Self {
            info,
            packets,
            cursor: 0,
            discard: false,
            events: Arc::new(MockLog::default()),
        }
    }

    /// Shared log of events the filter sent upstream.
    #[must_use]
    pub fn event_log(&self) -> Arc<MockLog<Vec<PidEvent>>> {
        Arc::clone(&self.events)
    }

    fn seek_to(&mut self, start_secs: f64) {
        let timescale = if self.info.timescale == 0 {
            1000
        } else {
            self.info.timescale
        };
        let target = (start_secs * f64::from(timescale)) as u64;
        self.cursor = self
            .packets
            .iter()
            .position(|p| {
                let ts = p.decision_ts().unwrap_or(0);
                ts + u64::from(p.duration) > target
            })
            .unwrap_or(self.packets.len());
    }
}

impl PidInput for SourcePid {
    fn info(&self) -> &PidInfo {
        &self.info
    }

    fn peek(&mut self) -> Option<Packet> {
        if self.discard {
            return None;
        }
        self.packets.get(self.cursor).cloned()
    }

    fn advance(&mut self) {
        if self.cursor < self.packets.len() {
            self.cursor += 1;
        }
    }

    fn is_eos(&mut self) -> bool {
        self.discard || self.cursor >= self.packets.len()
    }

    fn send_event(&mut self, event: PidEvent) {
        if let PidEvent::Play { start_range, .. } = &event {
            self.seek_to(*start_range);
        }
        self.events.lock().push(event);
    }

    fn set_discard(&mut self, discard: bool) {
        self.discard = discard;
    }
}

/// Everything an output pid observed, for assertions.
#[derive(Default)]
pub struct OutputRecord {
    pub packets: Vec<Packet>,
    pub eos: bool,
    /// History of delay overrides (including clears).
    pub delays: Vec<Option<i64>>,
    pub has_sync: Option<bool>,
    pub props: Vec<String>,
    pub period_resumes: u32,
}

/// Output pid recording into a shared [`OutputRecord`].
pub struct CapturePid {
    record: Arc<MockLog<OutputRecord>>,
}

impl CapturePid {
    #[must_use]
    pub fn new() -> (Self, Arc<MockLog<OutputRecord>>) {
        let record = Arc::new(MockLog::default());
        (
            Self {
                record: Arc::clone(&record),
            },
            record,
        )
    }
}

impl PidOutput for CapturePid {
    fn send(&mut self, packet: Packet) {
        self.record.lock().packets.push(packet);
    }

    fn set_eos(&mut self) {
        self.record.lock().eos = true;
    }

    fn set_delay(&mut self, delay: Option<i64>) {
        self.record.lock().delays.push(delay);
    }

    fn set_has_sync(&mut self, has_sync: bool) {
        self.record.lock().has_sync = Some(has_sync);
    }

    fn push_properties(&mut self, props: &str) {
        self.record.lock().props.push(props.to_owned());
    }

    fn mark_period_resume(&mut self) {
        self.record.lock().period_resumes += 1;
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::{Sap, StreamKind};

    fn packet(ts: u64, dur: u32) -> Packet {
        Packet {
            dts: Some(ts),
            cts: Some(ts),
            duration: dur,
            sap: Sap::Sap1,
            data: Bytes::from_static(b"xx"),
            ..Packet::default()
        }
    }

    #[test]
    fn source_pid_drains_to_eos() {
        let info = PidInfo::new(1000, StreamKind::Visual);
        let mut pid = SourcePid::new(info, vec![packet(0, 40), packet(40, 40)]);
        assert!(!pid.is_eos());
        assert_eq!(pid.peek().unwrap().dts, Some(0));
        pid.advance();
        pid.advance();
        assert!(pid.peek().is_none());
        assert!(pid.is_eos());
    }

    #[test]
    fn play_event_rewinds_cursor() {
        let info = PidInfo::new(1000, StreamKind::Visual);
        let mut pid = SourcePid::new(
            info,
            vec![packet(0, 40), packet(40, 40), packet(80, 40), packet(120, 40)],
        );
        pid.advance();
        pid.advance();
        pid.advance();
        pid.send_event(PidEvent::Play {
            start_range: 0.05,
            speed: 1.0,
        });
        // 50ms lands inside the packet starting at 40ms
        assert_eq!(pid.peek().unwrap().dts, Some(40));
        assert_eq!(pid.event_log().lock().len(), 1);
    }

    #[test]
    fn capture_pid_records() {
        let (mut out, record) = CapturePid::new();
        out.send(packet(0, 40));
        out.set_delay(None);
        out.mark_period_resume();
        out.set_eos();
        let rec = record.lock();
        assert_eq!(rec.packets.len(), 1);
        assert_eq!(rec.delays, vec![None]);
        assert_eq!(rec.period_resumes, 1);
        assert!(rec.eos);
    }
}

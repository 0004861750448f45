use crate::Packet;

/// Broad stream family of a pid.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum StreamKind {
    Visual,
    Audio,
    Text,
    #[default]
    Other,
}

/// Codec family, as far as the filter cares.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum CodecKind {
    /// Uncompressed payloads (PCM audio, raw video).
    Raw,
    /// Timecode track whose payload leads with a big-endian frame counter.
    Timecode,
    #[default]
    Compressed,
}

/// What the upstream source supports when asked to play.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum PlaybackMode {
    #[default]
    None,
    Seek,
    FastForward,
    Rewind,
}

/// Static pid metadata, read once when the pid is attached.
#[derive(Clone, Debug)]
pub struct PidInfo {
    /// Ticks per second for this pid's timestamps. 0 falls back to 1000.
    pub timescale: u32,
    pub kind: StreamKind,
    pub codec: CodecKind,
    /// Raw audio only. 0 falls back to the timescale.
    pub sample_rate: u32,
    pub channels: u32,
    /// Bytes per sample, per channel (raw audio only).
    pub bytes_per_sample: u32,
    /// Planar sample layout (channel planes) instead of interleaved frames.
    pub planar: bool,
    /// Declared delay in timescale ticks. Negative values are decoder-side
    /// CTS offsets and stay in the stream.
    pub delay: i64,
    pub playback: PlaybackMode,
}

impl Default for PidInfo {
    fn default() -> Self {
        Self {
            timescale: 1000,
            kind: StreamKind::Other,
            codec: CodecKind::Compressed,
            sample_rate: 0,
            channels: 0,
            bytes_per_sample: 0,
            planar: false,
            delay: 0,
            playback: PlaybackMode::Rewind,
        }
    }
}

impl PidInfo {
    #[must_use]
    pub fn new(timescale: u32, kind: StreamKind) -> Self {
        Self {
            timescale,
            kind,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_codec(mut self, codec: CodecKind) -> Self {
        self.codec = codec;
        self
    }

    #[must_use]
    pub fn with_raw_audio(mut self, sample_rate: u32, channels: u32, bytes_per_sample: u32) -> Self {
        self.codec = CodecKind::Raw;
        self.sample_rate = sample_rate;
        self.channels = channels;
        self.bytes_per_sample = bytes_per_sample;
        self
    }

    #[must_use]
    pub fn with_planar(mut self, planar: bool) -> Self {
        self.planar = planar;
        self
    }

    #[must_use]
    pub fn with_delay(mut self, delay: i64) -> Self {
        self.delay = delay;
        self
    }

    #[must_use]
    pub fn with_playback(mut self, playback: PlaybackMode) -> Self {
        self.playback = playback;
        self
    }
}

/// Playback event travelling upstream.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum PidEvent {
    Play {
        /// Requested start position in seconds.
        start_range: f64,
        speed: f64,
    },
    Stop,
}

/// Input side of a pid: a cursor over upstream packets.
///
/// All operations are non-blocking; `peek` returning `None` means no data is
/// available right now (check `is_eos` to distinguish starvation from end).
pub trait PidInput {
    fn info(&self) -> &PidInfo;

    /// Current head packet, without consuming it.
    fn peek(&mut self) -> Option<Packet>;

    /// Consume the head packet.
    fn advance(&mut self);

    fn is_eos(&mut self) -> bool;

    fn send_event(&mut self, event: PidEvent);

    /// When set, the upstream may drop everything it would deliver.
    fn set_discard(&mut self, discard: bool);
}

/// Output side of a pid.
pub trait PidOutput {
    fn send(&mut self, packet: Packet);

    fn set_eos(&mut self);

    /// Override (or clear, with `None`) the declared pid delay.
    fn set_delay(&mut self, delay: Option<i64>);

    /// Advertise whether the pid still contains non-sync samples.
    fn set_has_sync(&mut self, has_sync: bool);

    /// Apply a `name=value,name=value` property set for the current range.
    fn push_properties(&mut self, props: &str);

    /// Mark the start of a new period on this pid.
    fn mark_period_resume(&mut self);
}

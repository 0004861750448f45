/// Real-time pacing mode.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RtMode {
    /// No pacing: emit as fast as the session allows.
    #[default]
    Off,
    /// One clock anchor per pid.
    PerPid,
    /// A single clock anchor shared by all pids.
    Sync,
}

/// How the start cut snaps to a random access point.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StartRounding {
    /// First SAP preceding or equal to the requested start.
    #[default]
    Before,
    /// First SAP following or equal to the requested start.
    After,
    /// Whichever SAP is closest to the requested start.
    Closest,
}

/// Filter options.
///
/// Range endpoints (`starts`/`ends`) use the textual forms understood by the
/// range parser: `T[hh:]mm:ss[.ms]`, plain seconds (`int`, `float`,
/// `num/den`), `F<frame>`, and the split selectors `SAP`, `D<dur>`,
/// `S<size>` as the first start.
#[derive(Clone, Debug)]
pub struct RecutConfig {
    /// Real-time regulation of emission.
    pub rt: RtMode,
    /// Playback speed for real-time regulation.
    pub speed: f64,
    /// Keep only the listed SAP classes (0 = non-SAP). Empty = keep all.
    pub saps: Vec<u32>,
    /// Keep only frames used as references, when dependency flags say so.
    pub refs: bool,
    /// Inputs are decoded; every packet is a random access point.
    pub raw: bool,
    /// 1-based whitelist of frame indices (outside range extraction).
    pub frames: Vec<u32>,
    /// Extraction range start endpoints.
    pub starts: Vec<String>,
    /// Extraction range end endpoints. Missing entries make the matching
    /// range open (or bounded by the next start).
    pub ends: Vec<String>,
    /// Start-cut rounding policy.
    pub round: StartRounding,
    /// Snap each range end to the frame before the next video SAP.
    pub adjust_end: bool,
    /// Treat every packet as a SAP when cutting.
    pub nosap: bool,
    /// Attach `FileNumber`/`FileSuffix` to the first packet of each chunk.
    pub splitrange: bool,
    /// Seconds of rewind applied to upstream seeks, so the SAP preceding
    /// the requested start is delivered.
    pub seeksafe: f64,
    /// Rewrite timecode sample counters when splitting.
    pub rewrite_timecode: bool,
    /// Extra output pid property sets, one `name=value,...` string per range.
    pub range_props: Vec<String>,
}

impl Default for RecutConfig {
    fn default() -> Self {
        Self {
            rt: RtMode::Off,
            speed: 1.0,
            saps: Vec::new(),
            refs: false,
            raw: false,
            frames: Vec::new(),
            starts: Vec::new(),
            ends: Vec::new(),
            round: StartRounding::Before,
            adjust_end: false,
            nosap: false,
            splitrange: false,
            seeksafe: 10.0,
            rewrite_timecode: true,
            range_props: Vec::new(),
        }
    }
}

impl RecutConfig {
    /// Range extraction over the given start endpoints.
    #[must_use]
    pub fn with_starts<I, S>(mut self, starts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.starts = starts.into_iter().map(Into::into).collect();
        self
    }

    /// End endpoints matching `starts`.
    #[must_use]
    pub fn with_ends<I, S>(mut self, ends: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ends = ends.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_round(mut self, round: StartRounding) -> Self {
        self.round = round;
        self
    }

    #[must_use]
    pub fn with_splitrange(mut self, splitrange: bool) -> Self {
        self.splitrange = splitrange;
        self
    }

    #[must_use]
    pub fn with_rt(mut self, rt: RtMode) -> Self {
        self.rt = rt;
        self
    }

    #[must_use]
    pub fn with_speed(mut self, speed: f64) -> Self {
        self.speed = speed;
        self
    }

    #[must_use]
    pub fn with_seeksafe(mut self, seeksafe: f64) -> Self {
        self.seeksafe = seeksafe;
        self
    }

    #[must_use]
    pub fn with_nosap(mut self, nosap: bool) -> Self {
        self.nosap = nosap;
        self
    }

    #[must_use]
    pub fn with_adjust_end(mut self, adjust_end: bool) -> Self {
        self.adjust_end = adjust_end;
        self
    }
}

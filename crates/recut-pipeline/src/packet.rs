use bytes::Bytes;

/// Stream access point class of a packet.
///
/// Classes 1-4 follow the ISO 14496-12 SAP taxonomy; decoding can start at
/// classes 1-3 without earlier packets.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Sap {
    /// Not a random access point.
    #[default]
    None,
    Sap1,
    Sap2,
    Sap3,
    Sap4,
    /// SAP 4 with a prolongated recovery period.
    Sap4Prol,
}

impl Sap {
    /// True for the classes a cut may land on (1, 2, 3).
    #[must_use]
    pub fn is_sync(self) -> bool {
        matches!(self, Sap::Sap1 | Sap::Sap2 | Sap::Sap3)
    }
}

/// Property attached to an emitted packet at a chunk boundary.
#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum PacketProp {
    /// 1-based index of the output chunk, for `$num$`-style templating.
    FileNumber(u32),
    /// Suffix describing the chunk's range, for `$FS$`-style templating.
    FileSuffix(String),
}

/// One framed access unit travelling through the pipeline.
///
/// Cloning is cheap: the payload is a shared `Bytes` and stands in for the
/// session's packet reference counting. Timestamps are in the pid's
/// timescale; `None` means the stream carries no such timestamp.
#[derive(Clone, Debug, Default)]
pub struct Packet {
    pub dts: Option<u64>,
    pub cts: Option<u64>,
    pub duration: u32,
    pub sap: Sap,
    /// ISO dependency flags; bits 2-3 describe whether other packets
    /// reference this one (`2` = not used as reference).
    pub dependency_flags: u8,
    /// The upstream requires this packet to be consumed before producing
    /// more (its memory is borrowed, not owned).
    pub blocking_ref: bool,
    pub data: Bytes,
    pub props: Vec<PacketProp>,
}

impl Packet {
    /// Timestamp used for ordering decisions: DTS when present, else CTS.
    #[must_use]
    pub fn decision_ts(&self) -> Option<u64> {
        self.dts.or(self.cts)
    }

    #[must_use]
    pub fn file_number(&self) -> Option<u32> {
        self.props.iter().find_map(|p| match p {
            PacketProp::FileNumber(n) => Some(*n),
            _ => None,
        })
    }

    #[must_use]
    pub fn file_suffix(&self) -> Option<&str> {
        self.props.iter().find_map(|p| match p {
            PacketProp::FileSuffix(s) => Some(s.as_str()),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decision_ts_prefers_dts() {
        let pck = Packet {
            dts: Some(10),
            cts: Some(20),
            ..Packet::default()
        };
        assert_eq!(pck.decision_ts(), Some(10));

        let pck = Packet {
            dts: None,
            cts: Some(20),
            ..Packet::default()
        };
        assert_eq!(pck.decision_ts(), Some(20));
    }

    #[test]
    fn sap_sync_classes() {
        assert!(Sap::Sap1.is_sync());
        assert!(Sap::Sap3.is_sync());
        assert!(!Sap::None.is_sync());
        assert!(!Sap::Sap4.is_sync());
    }
}

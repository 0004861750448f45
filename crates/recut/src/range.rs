//! Textual range endpoint parsing.

use recut_pipeline::MediaTime;
use tracing::warn;

/// What the filter is extracting.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) enum ExtractMode {
    #[default]
    None,
    /// Explicit time/frame ranges.
    Range,
    /// One chunk per SAP.
    Sap,
    /// Chunks of a target byte size.
    Size,
    /// Chunks of a fixed duration.
    Dur,
}

/// State of the configured range list.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) enum RangeType {
    #[default]
    None,
    Closed,
    Open,
    Done,
}

/// A parsed range endpoint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Endpoint {
    Time(MediaTime),
    /// 0-based frame index as given by the user.
    Frame(u64),
    SapSplit,
    DurSplit(MediaTime),
    SizeSplit(u64),
}

/// Parse one endpoint. `None` logs a warning and means the range list is
/// unusable from this entry on.
pub(crate) fn parse_endpoint(text: &str) -> Option<Endpoint> {
    let parsed = parse_inner(text);
    if parsed.is_none() {
        warn!(endpoint = text, "unrecognized range endpoint, expecting T[hh:]mm:ss[.ms], INT, FRAC, F<n>, SAP, D<dur> or S<size>");
    }
    parsed
}

fn parse_inner(text: &str) -> Option<Endpoint> {
    let mut chars = text.chars();
    match chars.next()? {
        'T' => parse_clock(&text[1..]).map(Endpoint::Time),
        'F' | 'f' => text[1..].parse::<u64>().ok().map(Endpoint::Frame),
        'D' | 'd' => parse_duration(&text[1..]).map(Endpoint::DurSplit),
        'S' | 's' if text != "SAP" => parse_size(&text[1..]).map(Endpoint::SizeSplit),
        _ if text == "RAP" || text == "SAP" => Some(Endpoint::SapSplit),
        _ => parse_seconds(text).map(Endpoint::Time),
    }
}

/// `hh:mm:ss`, `mm:ss` or `s` clock forms, each with an optional `.ms`
/// millisecond suffix. A millisecond field of 1000 or more is ignored.
fn parse_clock(text: &str) -> Option<MediaTime> {
    let (clock, ms) = match text.split_once('.') {
        Some((clock, ms_txt)) => {
            let ms: u64 = ms_txt.parse().ok()?;
            (clock, if ms >= 1000 { 0 } else { ms })
        }
        None => (text, 0),
    };

    let fields: Vec<&str> = clock.split(':').collect();
    let secs = match fields.as_slice() {
        [h, m, s] => {
            let (h, m, s): (u64, u64, u64) = (h.parse().ok()?, m.parse().ok()?, s.parse().ok()?);
            h * 3600 + m * 60 + s
        }
        [m, s] => {
            let (m, s): (u64, u64) = (m.parse().ok()?, s.parse().ok()?);
            m * 60 + s
        }
        // a bare `Ts` needs the `.ms` form to be distinguishable
        [s] if text.contains('.') => s.parse().ok()?,
        _ => return None,
    };
    Some(MediaTime::millis((secs * 1000 + ms) as i64))
}

/// `D<ms>` or `D<num>/<den>` seconds fraction.
fn parse_duration(text: &str) -> Option<MediaTime> {
    if let Some((num, den)) = text.split_once('/') {
        let num: i64 = num.parse().ok()?;
        let den: u32 = den.parse().ok()?;
        if den == 0 {
            return None;
        }
        return Some(MediaTime::new(num, den));
    }
    text.parse::<i64>().ok().map(MediaTime::millis)
}

/// `S<bytes>` with optional binary multiplier suffix `k`, `m` or `g`.
fn parse_size(text: &str) -> Option<u64> {
    let (digits, mult) = match text.chars().last()? {
        'k' | 'K' => (&text[..text.len() - 1], 1u64 << 10),
        'm' | 'M' => (&text[..text.len() - 1], 1u64 << 20),
        'g' | 'G' => (&text[..text.len() - 1], 1u64 << 30),
        _ => (text, 1),
    };
    digits.parse::<u64>().ok().map(|v| v * mult)
}

/// Plain seconds: integer, decimal, or `num/den` fraction.
fn parse_seconds(text: &str) -> Option<MediaTime> {
    if let Some((num, den)) = text.split_once('/') {
        let num: i64 = num.parse().ok()?;
        let den: u32 = den.parse().ok()?;
        if den == 0 {
            return None;
        }
        return Some(MediaTime::new(num, den));
    }
    if text.contains('.') {
        let secs: f64 = text.parse().ok()?;
        return Some(MediaTime::new((secs * 1_000_000.0) as i64, 1_000_000));
    }
    text.parse::<i64>().ok().map(|v| MediaTime::new(v, 1))
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("T00:00:10", 10_000)]
    #[case("T01:02:03", 3_723_000)]
    #[case("T1:30", 90_000)]
    #[case("T0:04.250", 4_250)]
    #[case("T2.5", 2_005)] // the ms field is an integer, not a decimal part
    #[case("T1:00:00.1500", 3_600_000)] // out-of-range ms ignored
    fn clock_forms(#[case] text: &str, #[case] ms: i64) {
        assert_eq!(
            parse_endpoint(text),
            Some(Endpoint::Time(MediaTime::millis(ms)))
        );
    }

    #[rstest]
    #[case("10", MediaTime::new(10, 1))]
    #[case("2.5", MediaTime::new(2_500_000, 1_000_000))]
    #[case("3/4", MediaTime::new(3, 4))]
    fn plain_seconds(#[case] text: &str, #[case] expect: MediaTime) {
        assert_eq!(parse_endpoint(text), Some(Endpoint::Time(expect)));
    }

    #[rstest]
    #[case("F100", 100)]
    #[case("f0", 0)]
    fn frames(#[case] text: &str, #[case] idx: u64) {
        assert_eq!(parse_endpoint(text), Some(Endpoint::Frame(idx)));
    }

    #[test]
    fn sap_split() {
        assert_eq!(parse_endpoint("SAP"), Some(Endpoint::SapSplit));
        assert_eq!(parse_endpoint("RAP"), Some(Endpoint::SapSplit));
    }

    #[rstest]
    #[case("D2500", MediaTime::millis(2500))]
    #[case("D1/3", MediaTime::new(1, 3))]
    fn duration_split(#[case] text: &str, #[case] expect: MediaTime) {
        assert_eq!(parse_endpoint(text), Some(Endpoint::DurSplit(expect)));
    }

    #[rstest]
    #[case("S1000", 1000)]
    #[case("S100k", 102_400)]
    #[case("S1m", 1_048_576)]
    #[case("S2g", 2 << 30)]
    fn size_split(#[case] text: &str, #[case] bytes: u64) {
        assert_eq!(parse_endpoint(text), Some(Endpoint::SizeSplit(bytes)));
    }

    #[rstest]
    #[case("")]
    #[case("T5")]
    #[case("bogus")]
    #[case("T1:2:3:4")]
    #[case("D1/0")]
    fn rejects_garbage(#[case] text: &str) {
        assert_eq!(parse_endpoint(text), None);
    }
}

//! Synthetic deterministic tracks for driving the filter end to end:
//! 25 fps video on a 90 kHz timescale with a SAP every 12 frames, and raw
//! 48 kHz stereo audio in 1024-sample packets.

#![allow(dead_code)]

use std::sync::Arc;

use bytes::Bytes;
use recut::{Recut, Tick};
use recut_pipeline::mock::{CapturePid, MockLog, OutputRecord, SourcePid};
use recut_pipeline::{Packet, PidEvent, PidInfo, Sap, StreamKind};

pub const VIDEO_TIMESCALE: u32 = 90_000;
pub const FRAME_DUR: u32 = 3_600;
pub const GOP_LEN: u64 = 12;

pub const AUDIO_RATE: u32 = 48_000;
pub const AUDIO_PCK_SAMPLES: u32 = 1_024;
/// Stereo s16 interleaved: 4 bytes per sample frame.
pub const AUDIO_ABPS: u32 = 4;

pub fn video_info() -> PidInfo {
    PidInfo::new(VIDEO_TIMESCALE, StreamKind::Visual)
}

pub fn audio_info() -> PidInfo {
    PidInfo::new(AUDIO_RATE, StreamKind::Audio).with_raw_audio(AUDIO_RATE, 2, 2)
}

pub fn video_packet(idx: u64) -> Packet {
    let ts = idx * u64::from(FRAME_DUR);
    Packet {
        dts: Some(ts),
        cts: Some(ts),
        duration: FRAME_DUR,
        sap: if idx % GOP_LEN == 0 { Sap::Sap1 } else { Sap::None },
        data: Bytes::from(vec![(idx % 251) as u8; 1000]),
        ..Packet::default()
    }
}

pub fn video_track(frames: u64) -> Vec<Packet> {
    (0..frames).map(video_packet).collect()
}

pub fn audio_packet(idx: u64) -> Packet {
    let ts = idx * u64::from(AUDIO_PCK_SAMPLES);
    let bytes = (AUDIO_PCK_SAMPLES * AUDIO_ABPS) as usize;
    let data: Vec<u8> = (0..bytes)
        .map(|j| ((idx as usize * 31 + j) % 251) as u8)
        .collect();
    Packet {
        dts: Some(ts),
        cts: Some(ts),
        duration: AUDIO_PCK_SAMPLES,
        sap: Sap::Sap1,
        data: Bytes::from(data),
        ..Packet::default()
    }
}

pub fn audio_track(packets: u64) -> Vec<Packet> {
    (0..packets).map(audio_packet).collect()
}

pub type OutputHandle = Arc<MockLog<OutputRecord>>;
pub type EventHandle = Arc<MockLog<Vec<PidEvent>>>;

/// Attach a scripted pid and start playback on it.
pub fn attach(
    filter: &mut Recut,
    info: PidInfo,
    packets: Vec<Packet>,
) -> (OutputHandle, EventHandle) {
    let src = SourcePid::new(info, packets);
    let events = src.event_log();
    let (out, record) = CapturePid::new();
    let idx = filter.add_stream(Box::new(src), Box::new(out));
    filter.handle_event(
        idx,
        PidEvent::Play {
            start_range: 0.0,
            speed: 1.0,
        },
    );
    (record, events)
}

/// Drive the session loop until the filter reports end of stream.
pub fn run_to_eos(filter: &mut Recut) {
    for _ in 0..1_000_000 {
        match filter.process().expect("filter process failed") {
            Tick::Eos => return,
            Tick::Active | Tick::Sleep(_) => {}
        }
    }
    panic!("filter did not reach end of stream");
}

pub fn cts_list(record: &OutputHandle) -> Vec<u64> {
    record
        .lock()
        .packets
        .iter()
        .map(|p| p.cts.expect("emitted packet without cts"))
        .collect()
}

pub fn dts_list(record: &OutputHandle) -> Vec<u64> {
    record
        .lock()
        .packets
        .iter()
        .map(|p| p.dts.expect("emitted packet without dts"))
        .collect()
}

pub fn assert_non_decreasing(values: &[u64]) {
    for w in values.windows(2) {
        assert!(w[0] <= w[1], "timeline goes backwards: {} then {}", w[0], w[1]);
    }
}

/// Indices of packets carrying a `FileNumber`, with the number.
pub fn chunk_boundaries(record: &OutputHandle) -> Vec<(usize, u32)> {
    record
        .lock()
        .packets
        .iter()
        .enumerate()
        .filter_map(|(i, p)| p.file_number().map(|n| (i, n)))
        .collect()
}

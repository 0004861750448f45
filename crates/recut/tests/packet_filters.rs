//! Emission filtering outside range extraction: SAP classes, frame
//! whitelists and reference-frame selection.

mod fixture;

use fixture::*;
use recut::{Recut, RecutConfig, StartRounding};

#[test]
fn sap_filter_keeps_only_listed_classes() {
    let mut cfg = RecutConfig::default();
    cfg.saps = vec![1];
    let mut filter = Recut::new(cfg);
    let (video, _) = attach(&mut filter, video_info(), video_track(36));
    run_to_eos(&mut filter);

    let packets = video.lock().packets.clone();
    assert_eq!(packets.len(), 3);
    for (i, p) in packets.iter().enumerate() {
        assert_eq!(p.data, video_packet(i as u64 * GOP_LEN).data);
    }
    // stripping non-sync packets is advertised on the pid
    assert_eq!(video.lock().has_sync, Some(false));
}

#[test]
fn frame_whitelist_is_one_based() {
    let mut cfg = RecutConfig::default();
    cfg.frames = vec![1, 5, 7];
    let mut filter = Recut::new(cfg);
    let (video, _) = attach(&mut filter, video_info(), video_track(10));
    run_to_eos(&mut filter);

    let packets = video.lock().packets.clone();
    assert_eq!(packets.len(), 3);
    assert_eq!(packets[0].data, video_packet(0).data);
    assert_eq!(packets[1].data, video_packet(4).data);
    assert_eq!(packets[2].data, video_packet(6).data);
}

#[test]
fn refs_filter_drops_non_reference_frames() {
    let mut cfg = RecutConfig::default();
    cfg.refs = true;
    let mut filter = Recut::new(cfg);
    let mut packets = video_track(8);
    for (i, p) in packets.iter_mut().enumerate() {
        // dependency bits 2-3 = 2: not used as a reference
        if i % 2 == 1 {
            p.dependency_flags = 2 << 2;
        }
    }
    let (video, _) = attach(&mut filter, video_info(), packets);
    run_to_eos(&mut filter);

    let out = video.lock().packets.clone();
    assert_eq!(out.len(), 4);
    for (i, p) in out.iter().enumerate() {
        assert_eq!(p.data, video_packet(i as u64 * 2).data);
    }
}

#[test]
fn nosap_cuts_on_any_packet() {
    // with nosap every packet is an admissible cut: [1s, 2s) starts on the
    // exact frame even though it is not a SAP
    let cfg = RecutConfig::default()
        .with_starts(["T0:00:01"])
        .with_ends(["T0:00:02"])
        .with_nosap(true)
        .with_round(StartRounding::After);
    let mut filter = Recut::new(cfg);
    let (video, _) = attach(&mut filter, video_info(), video_track(100));
    run_to_eos(&mut filter);

    let packets = video.lock().packets.clone();
    assert_eq!(packets.len(), 25);
    assert_eq!(packets[0].cts, Some(0));
    assert_eq!(packets[0].data, video_packet(25).data);
    assert_eq!(packets[24].data, video_packet(49).data);
}

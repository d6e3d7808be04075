use mcb_core::error::McbError;
use mcb_core::protocol::{self, McbClient};
use mcb_core::types::{GateMode, Presets, Roi, Timing};
use mcb_hardware::SimulatedMcb;
use mcb_traits::Transport;
use rstest::rstest;

fn opened(channels: usize) -> (SimulatedMcb, mcb_traits::DetectorHandle) {
    let mut sim = SimulatedMcb::new(1, channels);
    let h = protocol::open(&mut sim, 1).unwrap();
    (sim, h)
}

fn mcb_err(e: &eyre::Report) -> &McbError {
    e.downcast_ref::<McbError>().expect("typed McbError")
}

#[test]
fn clear_then_set_data_end_to_end_on_2048_channels() {
    let (mut sim, h) = opened(2048);
    let mut c = McbClient::new(&mut sim, h);
    assert_eq!(c.channel_count().unwrap(), 2048);

    c.set_data(0, 2048, 7).unwrap();
    c.set_data(100, 10, 999).unwrap();
    let (counts, mask) = c.counts().unwrap();
    assert_eq!(counts.len(), 2048);
    assert_eq!(mask.len(), 2048);
    assert!(counts[100..110].iter().all(|&v| v == 999));
    assert_eq!(counts[99], 7);
    assert_eq!(counts[110], 7);

    c.clear().unwrap();
    let (counts, _) = c.counts().unwrap();
    assert!(counts.iter().all(|&v| v == 0));
    assert_eq!(c.timing().unwrap(), Timing::default());
}

#[test]
fn set_counts_writes_every_channel() {
    let (mut sim, h) = opened(256);
    let wanted: Vec<u32> = (0..256u32).map(|i| (i / 16) * 3).collect();
    McbClient::new(&mut sim, h).set_counts(&wanted).unwrap();
    assert_eq!(sim.counts(1).unwrap(), wanted.as_slice());
}

#[test]
fn set_counts_rejects_wrong_length_without_sending() {
    let (mut sim, h) = opened(256);
    let err = McbClient::new(&mut sim, h).set_counts(&[1, 2, 3]).unwrap_err();
    assert!(matches!(mcb_err(&err), McbError::Validation(_)));
    assert!(sim.counts(1).unwrap().iter().all(|&v| v == 0));
}

#[rstest]
#[case::none(&[])]
#[case::one(&[Roi::new(10, 5)])]
#[case::several(&[Roi::new(0, 3), Roi::new(40, 8), Roi::new(1000, 24)])]
fn roi_listing_walks_the_cursor(#[case] rois: &[Roi]) {
    let (mut sim, h) = opened(1024);
    let mut c = McbClient::new(&mut sim, h);
    for &r in rois {
        c.set_roi(r).unwrap();
    }
    assert_eq!(c.rois().unwrap(), rois.to_vec());
    // A second walk restarts from the first ROI.
    assert_eq!(c.rois().unwrap(), rois.to_vec());
}

#[test]
fn roi_at_end_of_spectrum_is_listed() {
    let (mut sim, h) = opened(512);
    let mut c = McbClient::new(&mut sim, h);
    c.set_roi(Roi::new(500, 12)).unwrap();
    assert_eq!(c.rois().unwrap(), vec![Roi::new(500, 12)]);
}

#[test]
fn clear_roi_and_clear_all() {
    let (mut sim, h) = opened(512);
    let mut c = McbClient::new(&mut sim, h);
    c.set_roi(Roi::new(10, 20)).unwrap();
    c.set_roi(Roi::new(100, 5)).unwrap();
    c.clear_roi(Roi::new(15, 5)).unwrap();
    assert_eq!(
        c.rois().unwrap(),
        vec![Roi::new(10, 5), Roi::new(20, 10), Roi::new(100, 5)]
    );
    c.clear_all_rois().unwrap();
    assert!(c.rois().unwrap().is_empty());
}

#[rstest]
#[case(Roi::new(510, 5))]
#[case(Roi::new(0, 0))]
#[case(Roi::new(usize::MAX, 2))]
fn out_of_range_roi_is_a_validation_error(#[case] roi: Roi) {
    let (mut sim, h) = opened(512);
    let err = McbClient::new(&mut sim, h).set_roi(roi).unwrap_err();
    assert!(matches!(mcb_err(&err), McbError::Validation(_)));
}

#[test]
fn timing_and_presets_convert_ticks_to_ms() {
    let (mut sim, h) = opened(512);
    let mut c = McbClient::new(&mut sim, h);
    c.set_timing(Timing {
        real_ms: 10_000,
        live_ms: 9_990,
    })
    .unwrap();
    // 9_990 ms truncates to 499 ticks.
    assert_eq!(
        c.timing().unwrap(),
        Timing {
            real_ms: 10_000,
            live_ms: 9_980
        }
    );
    c.set_presets(Presets {
        real_ms: 0,
        live_ms: 60_000,
    })
    .unwrap();
    assert_eq!(
        c.presets().unwrap(),
        Presets {
            real_ms: 0,
            live_ms: 60_000
        }
    );
}

#[rstest]
#[case(GateMode::Off)]
#[case(GateMode::Coincident)]
#[case(GateMode::Anticoincident)]
fn gate_round_trips(#[case] g: GateMode) {
    let (mut sim, h) = opened(512);
    let mut c = McbClient::new(&mut sim, h);
    c.set_gate(g).unwrap();
    assert_eq!(c.gate().unwrap(), g);
}

#[test]
fn discriminators_are_bounded_by_channel_count() {
    let (mut sim, h) = opened(512);
    let mut c = McbClient::new(&mut sim, h);
    c.set_lld(5).unwrap();
    c.set_uld(500).unwrap();
    assert_eq!(c.discriminators().unwrap(), (5, 500));
    let err = c.set_uld(512).unwrap_err();
    assert!(matches!(mcb_err(&err), McbError::Validation(_)));
}

#[test]
fn start_and_stop_are_idempotent() {
    let (mut sim, h) = opened(512);
    let mut c = McbClient::new(&mut sim, h);
    c.stop().unwrap();
    c.start().unwrap();
    c.start().unwrap();
    assert!(c.is_active().unwrap());
    c.stop().unwrap();
    c.stop().unwrap();
    assert!(!c.is_active().unwrap());
}

#[test]
fn rejected_command_surfaces_device_codes() {
    let (mut sim, h) = opened(512);
    let err = McbClient::new(&mut sim, h)
        .send(&mcb_core::protocol::Command::SetLld(usize::MAX))
        .unwrap_err();
    match mcb_err(&err) {
        McbError::Device {
            macro_code,
            micro_code,
            ..
        } => assert_eq!((*macro_code, *micro_code), (129, 128)),
        other => panic!("expected device error, got {other:?}"),
    }
}

#[test]
fn garbled_response_is_a_protocol_error() {
    let (mut sim, h) = opened(512);
    sim.garble_next_comm(1, 1);
    let err = McbClient::new(&mut sim, h).timing().unwrap_err();
    assert!(matches!(mcb_err(&err), McbError::Protocol { .. }));
}

#[test]
fn driver_failure_is_a_transport_error() {
    let (mut sim, h) = opened(512);
    sim.fail_next_comm(1, 1);
    let err = McbClient::new(&mut sim, h).presets().unwrap_err();
    assert!(mcb_err(&err).is_transport());
    // The next call goes through.
    assert!(McbClient::new(&mut sim, h).presets().is_ok());
}

#[test]
fn enumeration_and_unknown_detector() {
    let mut sim = SimulatedMcb::new(3, 128);
    assert_eq!(protocol::detector_count(&mut sim).unwrap(), 3);
    let (name, id) = protocol::detector_name(&mut sim, 2).unwrap();
    assert_eq!((name.as_str(), id), ("SIM MCB 2", 1002));
    let err = protocol::open(&mut sim, 9).unwrap_err();
    assert!(matches!(mcb_err(&err), McbError::Transport(_)));
}

#[test]
fn closed_handle_is_rejected() {
    let (mut sim, h) = opened(128);
    protocol::close(&mut sim, h).unwrap();
    assert!(sim.is_active(h).is_err());
    let err = McbClient::new(&mut sim, h).timing().unwrap_err();
    assert!(mcb_err(&err).is_transport());
}

use mcb_hardware::{HwError, SimulatedMcb};
use mcb_traits::{DetectorHandle, Transport};
use rstest::rstest;

fn open_first(sim: &mut SimulatedMcb) -> DetectorHandle {
    sim.open(1).expect("open detector 1")
}

fn field(resp: &str) -> &str {
    resp[2..resp.len() - 4].trim()
}

#[test]
fn enumerates_configured_detectors() {
    let mut sim = SimulatedMcb::new(3, 1024);
    assert_eq!(sim.detector_count().unwrap(), 3);
    let (name, id) = sim.detector_name(2).unwrap();
    assert_eq!(name, "SIM MCB 2");
    assert_eq!(id, 1002);
}

#[test]
fn unknown_detector_index_is_typed_error() {
    let mut sim = SimulatedMcb::new(1, 1024);
    let err = sim.open(4).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<HwError>(),
        Some(HwError::NoSuchDetector(4))
    ));
}

#[rstest]
#[case("SET_TRUE_PRESET 500", "SHOW_TRUE_PRESET", "500")]
#[case("SET_LIVE_PRESET 250", "SHOW_LIVE_PRESET", "250")]
#[case("SET_LLD 12", "SHOW_LLD", "12")]
#[case("SET_ULD 2000", "SHOW_ULD", "2000")]
fn set_then_show_round_trips(#[case] set: &str, #[case] show: &str, #[case] expected: &str) {
    let mut sim = SimulatedMcb::default();
    let h = open_first(&mut sim);
    assert!(sim.comm(h, set).unwrap().starts_with("$A"));
    assert_eq!(field(&sim.comm(h, show).unwrap()), expected);
}

#[rstest]
#[case("SET_GATE_OFF", "0OFF")]
#[case("SET_GATE_COINCIDENT", "1COINCIDENT")]
#[case("SET_GATE_ANTICOINCIDENT", "2ANTICOINCIDENT")]
fn gate_record_carries_index_and_name(#[case] set: &str, #[case] body: &str) {
    let mut sim = SimulatedMcb::default();
    let h = open_first(&mut sim);
    sim.comm(h, set).unwrap();
    assert_eq!(sim.comm(h, "SHOW_GATE").unwrap(), format!("$F{body}\n"));
}

#[test]
fn set_data_range_and_clear() {
    let mut sim = SimulatedMcb::default();
    let h = open_first(&mut sim);
    sim.comm(h, "SET_DATA [10,5],7").unwrap();
    let (counts, _) = sim.read_counts(h, 8, 10).unwrap();
    assert_eq!(counts, vec![0, 0, 7, 7, 7, 7, 7, 0, 0, 0]);
    sim.comm(h, "CLEAR").unwrap();
    assert!(sim.counts(1).unwrap().iter().all(|&c| c == 0));
}

#[test]
fn unknown_command_is_invalid_command_record() {
    let mut sim = SimulatedMcb::default();
    let h = open_first(&mut sim);
    assert!(sim.comm(h, "FROB").unwrap().starts_with("$E132000"));
}

#[test]
fn out_of_range_roi_is_rejected() {
    let mut sim = SimulatedMcb::default();
    let h = open_first(&mut sim);
    assert!(sim.comm(h, "SET_ROI 2040,20").unwrap().starts_with("$E129128"));
}

#[test]
fn read_past_end_is_channel_range_error() {
    let mut sim = SimulatedMcb::new(1, 64);
    let h = open_first(&mut sim);
    let err = sim.read_counts(h, 60, 10).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<HwError>(),
        Some(HwError::ChannelRange { len: 64, .. })
    ));
}

#[test]
fn auto_advance_runs_on_activity_poll() {
    let mut sim = SimulatedMcb::default().with_auto_advance(200);
    let h = open_first(&mut sim);
    sim.comm(h, "START").unwrap();
    for _ in 0..5 {
        assert!(sim.is_active(h).unwrap());
    }
    assert_eq!(field(&sim.comm(h, "SHOW_TRUE").unwrap()), "50");
    assert_eq!(field(&sim.comm(h, "SHOW_LIVE").unwrap()), "45");
}

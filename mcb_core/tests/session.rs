use mcb_core::calibration::CalibrationPoint;
use mcb_core::error::McbError;
use mcb_core::session::{
    AcquisitionSession, DisplayMode, LOG_Y_LIMIT, SessionCommand, SessionOptions, Transition,
};
use mcb_core::settings::{MemoryStore, SettingsStore};
use mcb_core::spe::SpeFile;
use mcb_core::types::{GateMode, Presets, Roi, Timing};
use mcb_hardware::SimulatedMcb;
use mcb_traits::{DetectorHandle, Transport};
use tempfile::tempdir;

const CHANNELS: usize = 1024;

fn setup() -> (SimulatedMcb, MemoryStore, AcquisitionSession) {
    let mut sim = SimulatedMcb::new(1, CHANNELS).with_auto_advance(200);
    let mut store = MemoryStore::new();
    let session =
        AcquisitionSession::open(&mut sim, &mut store, 1, SessionOptions::default()).unwrap();
    (sim, store, session)
}

fn kind(e: &eyre::Report) -> &McbError {
    e.downcast_ref::<McbError>().expect("typed McbError")
}

#[test]
fn open_reads_detector_state() {
    let (_sim, _store, s) = setup();
    assert_eq!(s.identity(), "1001 SIM MCB 1");
    assert_eq!(s.channels(), CHANNELS);
    assert_eq!(s.display_channels(), CHANNELS);
    assert!(!s.is_active());
    assert_eq!(s.gate(), GateMode::Off);
    assert_eq!(s.discriminators(), (0, CHANNELS - 1));
    assert!(!s.calibration().calibrated);
    assert!(s.rois().is_empty());
}

#[test]
fn start_tick_stop_accumulates_counts_and_dead_time() {
    let (mut sim, mut store, mut s) = setup();
    s.apply(&mut sim, &mut store, SessionCommand::Start).unwrap();
    assert!(s.is_active());
    for _ in 0..3 {
        assert_eq!(s.tick(&mut sim).unwrap(), Transition::None);
    }
    // 10 real ticks and 9 live ticks per poll.
    assert_eq!(
        s.timing(),
        Timing {
            real_ms: 600,
            live_ms: 540
        }
    );
    assert!((s.dead_time_percent() - 10.0).abs() < 1e-9);
    assert!(s.counts().iter().any(|&c| c > 0));

    s.apply(&mut sim, &mut store, SessionCommand::Stop).unwrap();
    s.apply(&mut sim, &mut store, SessionCommand::Stop).unwrap();
    assert!(!s.is_active());
}

#[test]
fn externally_started_acquisition_is_reported_once() {
    let (mut sim, _store, mut s) = setup();
    sim.comm(DetectorHandle::new(1), "START").unwrap();
    assert_eq!(s.tick(&mut sim).unwrap(), Transition::Started);
    assert_eq!(s.tick(&mut sim).unwrap(), Transition::None);
}

#[test]
fn live_preset_stops_acquisition() {
    let (mut sim, mut store, mut s) = setup();
    s.apply(
        &mut sim,
        &mut store,
        SessionCommand::SetPresets(Presets {
            real_ms: 0,
            live_ms: 1_010,
        }),
    )
    .unwrap();
    // Presets are held in whole ticks.
    assert_eq!(s.presets().live_ms, 1_000);
    s.apply(&mut sim, &mut store, SessionCommand::Start).unwrap();

    let mut stopped_at = None;
    for i in 0..20 {
        if s.tick(&mut sim).unwrap() == Transition::Stopped {
            stopped_at = Some(i);
            break;
        }
    }
    assert!(stopped_at.is_some());
    assert!(s.timing().live_ms >= 1_000);
    let frame = s.frame();
    assert!(frame.start_enabled && !frame.stop_enabled);
}

#[test]
fn clear_zeroes_counts_and_timing() {
    let (mut sim, mut store, mut s) = setup();
    s.apply(&mut sim, &mut store, SessionCommand::Start).unwrap();
    s.tick(&mut sim).unwrap();
    s.apply(&mut sim, &mut store, SessionCommand::Clear).unwrap();
    assert!(s.counts().iter().all(|&c| c == 0));
    assert_eq!(s.timing(), Timing::default());
    assert_eq!(s.dead_time_percent(), 0.0);
}

#[test]
fn roi_commands_update_list_mask_and_fits() {
    let (mut sim, mut store, mut s) = setup();
    s.apply(&mut sim, &mut store, SessionCommand::MarkRoi(Roi::new(290, 40)))
        .unwrap();
    s.apply(&mut sim, &mut store, SessionCommand::MarkRoi(Roi::new(600, 60)))
        .unwrap();
    assert_eq!(s.rois(), &[Roi::new(290, 40), Roi::new(600, 60)]);
    assert_eq!(s.fits().len(), 2);
    assert!(s.roi_mask()[290] && s.roi_mask()[329] && !s.roi_mask()[330]);

    s.apply(&mut sim, &mut store, SessionCommand::ClearRoi(Roi::new(600, 60)))
        .unwrap();
    assert_eq!(s.rois(), &[Roi::new(290, 40)]);
    assert!(!s.roi_mask()[600]);

    let err = s
        .apply(&mut sim, &mut store, SessionCommand::MarkRoi(Roi::new(1000, 50)))
        .unwrap_err();
    assert!(matches!(kind(&err), McbError::Validation(_)));
    assert_eq!(s.rois(), &[Roi::new(290, 40)]);
}

#[test]
fn display_resolution_change_rescales_marker() {
    let (mut sim, mut store, mut s) = setup();
    s.apply(&mut sim, &mut store, SessionCommand::SetMarker(200)).unwrap();
    s.apply(&mut sim, &mut store, SessionCommand::SetDisplayChannels(256))
        .unwrap();
    assert_eq!(s.marker(), 50);
    assert_eq!(s.frame().counts.len(), 256);
    assert_eq!(s.marker_info().channel, 200);

    let err = s
        .apply(&mut sim, &mut store, SessionCommand::SetDisplayChannels(300))
        .unwrap_err();
    assert!(matches!(kind(&err), McbError::Validation(_)));
    assert_eq!(s.display_channels(), 256);

    let err = s
        .apply(&mut sim, &mut store, SessionCommand::SetMarker(256))
        .unwrap_err();
    assert!(matches!(kind(&err), McbError::Validation(_)));
    assert_eq!(s.marker(), 50);
}

#[test]
fn frame_scales_in_log_mode() {
    let (mut sim, mut store, mut s) = setup();
    sim.comm(DetectorHandle::new(1), "SET_DATA [0,1024],5").unwrap();
    sim.comm(DetectorHandle::new(1), "SET_DATA [10,1],1000").unwrap();
    s.tick(&mut sim).unwrap();

    let linear = s.frame();
    assert_eq!(linear.y_limit, 1024.0);
    assert_eq!(linear.counts[10], 1000.0);

    s.apply(&mut sim, &mut store, SessionCommand::SetDisplayMode(DisplayMode::Log))
        .unwrap();
    let log = s.frame();
    assert_eq!(log.y_limit, LOG_Y_LIMIT);
    assert!((log.counts[0] - 5f64.log2()).abs() < 1e-12);
    assert!(log.roi_counts.iter().all(|&v| v == 0.0));
}

#[test]
fn discriminators_are_validated_before_sending() {
    let (mut sim, mut store, mut s) = setup();
    let err = s
        .apply(
            &mut sim,
            &mut store,
            SessionCommand::SetDiscriminators { lld: 10, uld: 5 },
        )
        .unwrap_err();
    assert!(matches!(kind(&err), McbError::Validation(_)));
    assert_eq!(s.discriminators(), (0, CHANNELS - 1));

    s.apply(
        &mut sim,
        &mut store,
        SessionCommand::SetDiscriminators { lld: 10, uld: 1000 },
    )
    .unwrap();
    assert_eq!(s.discriminators(), (10, 1000));
    s.apply(&mut sim, &mut store, SessionCommand::SetGate(GateMode::Coincident))
        .unwrap();
    assert_eq!(s.gate(), GateMode::Coincident);
}

#[test]
fn calibration_and_description_persist_across_reopen() {
    let (mut sim, mut store, mut s) = setup();
    s.apply(
        &mut sim,
        &mut store,
        SessionCommand::SetCalibrationPoint {
            slot: 0,
            point: CalibrationPoint::new(100.0, 50.0),
        },
    )
    .unwrap();
    s.apply(
        &mut sim,
        &mut store,
        SessionCommand::SetCalibrationUnits("MeV".into()),
    )
    .unwrap();
    s.apply(
        &mut sim,
        &mut store,
        SessionCommand::SetDescription("background run".into()),
    )
    .unwrap();
    assert!(s.calibration().calibrated);

    s.apply(&mut sim, &mut store, SessionCommand::SetMarker(200)).unwrap();
    assert_eq!(s.marker_info().energy, Some(100.0));

    let saved = store.load("1001 SIM MCB 1").unwrap().expect("persisted");
    assert_eq!(saved.points[0].channel, 100.0);
    assert_eq!(saved.units, "MeV");
    assert_eq!(saved.description, "background run");

    s.close(&mut sim).unwrap();
    let s = AcquisitionSession::open(&mut sim, &mut store, 1, SessionOptions::default()).unwrap();
    assert!(s.calibration().calibrated);
    assert!((s.calibration().b - 0.5).abs() < 1e-12);
    assert_eq!(s.calibration().units, "MeV");
    assert_eq!(s.description(), "background run");
    assert_eq!(s.calibration_points()[0], CalibrationPoint::new(100.0, 50.0));
}

#[test]
fn invalid_calibration_input_changes_nothing() {
    let (mut sim, mut store, mut s) = setup();
    let err = s
        .apply(
            &mut sim,
            &mut store,
            SessionCommand::SetCalibrationPoint {
                slot: 3,
                point: CalibrationPoint::new(1.0, 1.0),
            },
        )
        .unwrap_err();
    assert!(matches!(kind(&err), McbError::Validation(_)));
    let err = s
        .apply(
            &mut sim,
            &mut store,
            SessionCommand::SetCalibrationUnits("k eV".into()),
        )
        .unwrap_err();
    assert!(matches!(kind(&err), McbError::Validation(_)));
    assert!(store.get("1001 SIM MCB 1").is_none());
}

#[test]
fn failed_tick_keeps_cached_state() {
    let (mut sim, mut store, mut s) = setup();
    s.apply(&mut sim, &mut store, SessionCommand::Start).unwrap();
    s.tick(&mut sim).unwrap();
    let before = (s.counts().to_vec(), s.timing());
    sim.fail_next_comm(1, 1);
    assert!(s.tick(&mut sim).is_err());
    assert_eq!((s.counts().to_vec(), s.timing()), before);
    assert!(s.tick(&mut sim).is_ok());
}

#[test]
fn save_then_load_restores_spectrum() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("run.Spe");
    let (mut sim, mut store, mut s) = setup();
    s.apply(&mut sim, &mut store, SessionCommand::Start).unwrap();
    for _ in 0..5 {
        s.tick(&mut sim).unwrap();
    }
    s.apply(&mut sim, &mut store, SessionCommand::Stop).unwrap();
    s.apply(&mut sim, &mut store, SessionCommand::MarkRoi(Roi::new(300, 20)))
        .unwrap();
    let saved = s.save(&mut sim, &path).unwrap();
    assert_eq!(saved.counts, s.counts());
    assert_eq!(saved.real_s, 1);

    s.apply(&mut sim, &mut store, SessionCommand::Clear).unwrap();
    s.apply(&mut sim, &mut store, SessionCommand::ClearRoi(Roi::new(0, CHANNELS)))
        .unwrap();
    assert!(s.rois().is_empty());

    s.load(&mut sim, &mut store, &path).unwrap();
    assert_eq!(s.counts(), saved.counts.as_slice());
    assert_eq!(s.rois(), &[Roi::new(300, 20)]);
    assert_eq!(s.timing().real_ms, 1_000);
    assert_eq!(sim.counts(1).unwrap(), saved.counts.as_slice());
}

#[test]
fn load_with_wrong_length_touches_nothing() {
    let (mut sim, mut store, mut s) = setup();
    sim.comm(DetectorHandle::new(1), "SET_DATA [0,1024],3").unwrap();
    s.tick(&mut sim).unwrap();
    let file = SpeFile {
        counts: vec![9; 512],
        ..SpeFile::default()
    };
    let err = s.load_file(&mut sim, &mut store, &file).unwrap_err();
    assert!(matches!(kind(&err), McbError::Validation(_)));
    assert!(sim.counts(1).unwrap().iter().all(|&c| c == 3));
    assert!(s.counts().iter().all(|&c| c == 3));
}

#[test]
fn load_while_acquiring_is_refused() {
    let (mut sim, mut store, mut s) = setup();
    s.apply(&mut sim, &mut store, SessionCommand::Start).unwrap();
    let file = SpeFile {
        counts: vec![9; CHANNELS],
        ..SpeFile::default()
    };
    let err = s.load_file(&mut sim, &mut store, &file).unwrap_err();
    assert!(matches!(kind(&err), McbError::State(_)));
    assert!(!sim.counts(1).unwrap().iter().all(|&c| c == 9));
}

#[test]
fn failed_load_restores_previous_device_content() {
    let (mut sim, mut store, mut s) = setup();
    s.apply(&mut sim, &mut store, SessionCommand::MarkRoi(Roi::new(10, 5)))
        .unwrap();
    sim.comm(DetectorHandle::new(1), "SET_DATA [0,1024],3").unwrap();
    s.tick(&mut sim).unwrap();

    let file = SpeFile {
        counts: vec![5; CHANNELS],
        real_s: 10,
        live_s: 9,
        rois: vec![Roi::new(100, 4)],
        description: "from file".into(),
        ..SpeFile::default()
    };
    // Snapshot reads 6 records, then SET_DATA and SET_TRUE go through and
    // SET_LIVE fails.
    sim.fail_comm_after(1, 8);
    let err = s.load_file(&mut sim, &mut store, &file).unwrap_err();
    assert!(kind(&err).is_transport());

    assert!(sim.counts(1).unwrap().iter().all(|&c| c == 3));
    assert_eq!(s.description(), "");
    s.tick(&mut sim).unwrap();
    assert_eq!(s.rois(), &[Roi::new(10, 5)]);
    assert_eq!(s.timing(), Timing::default());
}

/// Store that reads nothing and refuses every write.
struct FullDisk;

impl SettingsStore for FullDisk {
    fn load(&mut self, _key: &str) -> mcb_core::Result<Option<mcb_config::DetectorSettings>> {
        Ok(None)
    }

    fn save(&mut self, _key: &str, _settings: &mcb_config::DetectorSettings) -> mcb_core::Result<()> {
        Err(eyre::Report::new(McbError::Io("disk full".into())))
    }
}

#[test]
fn settings_write_failure_rolls_back_the_device() {
    let (mut sim, mut store, mut s) = setup();
    s.apply(&mut sim, &mut store, SessionCommand::MarkRoi(Roi::new(10, 5)))
        .unwrap();
    sim.comm(DetectorHandle::new(1), "SET_DATA [0,1024],3").unwrap();
    s.tick(&mut sim).unwrap();

    let file = SpeFile {
        counts: vec![9; CHANNELS],
        real_s: 10,
        live_s: 9,
        rois: vec![Roi::new(100, 4)],
        description: "from file".into(),
        ..SpeFile::default()
    };
    let err = s.load_file(&mut sim, &mut FullDisk, &file).unwrap_err();
    assert!(matches!(kind(&err), McbError::Io(_)));

    // Device and cache both still hold the pre-load state.
    assert!(sim.counts(1).unwrap().iter().all(|&c| c == 3));
    assert!(s.counts().iter().all(|&c| c == 3));
    assert_eq!(s.description(), "");
    s.tick(&mut sim).unwrap();
    assert_eq!(s.rois(), &[Roi::new(10, 5)]);
    assert_eq!(s.timing(), Timing::default());
}

//! Subcommand implementations: backend assembly, session driving and output.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use eyre::WrapErr;
use mcb_config::{Backend, CalibrationPointRow, Config, MAX_CALIBRATION_POINTS};
use mcb_core::calibration::CalibrationPoint;
use mcb_core::peakfit::{self, FitOptions, RoiFit};
use mcb_core::session::{AcquisitionSession, SessionCommand, SessionOptions, Transition};
use mcb_core::settings::FileStore;
use mcb_core::spe::SpeFile;
use mcb_core::station::Station;
use mcb_core::types::{Presets, Roi};
use mcb_core::{EnergyCalibration, protocol, rebin};
use mcb_traits::{MonotonicClock, Transport};
use serde_json::json;

pub type Result<T> = eyre::Result<T>;

/// Build the transport selected by `[hardware].backend`.
pub fn make_transport(cfg: &Config) -> Result<Box<dyn Transport>> {
    match cfg.hardware.backend {
        Backend::Sim => {
            tracing::info!(
                detectors = cfg.hardware.sim_detectors,
                channels = cfg.hardware.sim_channels,
                "using simulated MCB backend"
            );
            Ok(Box::new(
                mcb_hardware::SimulatedMcb::new(
                    cfg.hardware.sim_detectors,
                    cfg.hardware.sim_channels,
                )
                .with_auto_advance(cfg.hardware.sim_advance_ms),
            ))
        }
        Backend::Live => live_transport(),
    }
}

#[cfg(all(feature = "hardware", windows))]
fn live_transport() -> Result<Box<dyn Transport>> {
    let t = mcb_hardware::McbcioTransport::startup()
        .map_err(|e| eyre::eyre!("start MCB driver: {e}"))?;
    Ok(Box::new(t))
}

#[cfg(not(all(feature = "hardware", windows)))]
fn live_transport() -> Result<Box<dyn Transport>> {
    eyre::bail!(
        "live backend unavailable: build on Windows with `--features hardware` or set hardware.backend = \"sim\""
    )
}

fn store(cfg: &Config) -> FileStore {
    FileStore::new(&cfg.settings.path)
}

fn open_one(cfg: &Config, detector: u32) -> Result<(Station<Box<dyn Transport>>, FileStore)> {
    let transport = make_transport(cfg)?;
    let mut store = store(cfg);
    let options = SessionOptions::from(cfg);
    let station = Station::open_one(transport, &mut store, detector, options)
        .wrap_err_with(|| format!("open detector {detector}"))?;
    Ok((station, store))
}

fn session<'a>(station: &'a Station<Box<dyn Transport>>, detector: u32) -> Result<&'a AcquisitionSession> {
    station
        .session(detector)
        .ok_or_else(|| eyre::eyre!("detector {detector} is not open"))
}

fn close(station: Station<Box<dyn Transport>>) {
    let (_, outcomes) = station.close();
    for (index, r) in outcomes {
        if let Err(e) = r {
            tracing::warn!(index, error = %e, "close failed");
        }
    }
}

pub fn list(cfg: &Config, json_mode: bool) -> Result<()> {
    let mut t = make_transport(cfg)?;
    let count = protocol::detector_count(&mut t)?;
    for index in 1..=count {
        let (name, id) = protocol::detector_name(&mut t, index)?;
        let handle = protocol::open(&mut t, index)?;
        let channels = protocol::McbClient::new(&mut t, handle).channel_count();
        protocol::close(&mut t, handle)?;
        let channels = channels?;
        if json_mode {
            println!(
                "{}",
                json!({ "index": index, "id": id, "name": name, "channels": channels })
            );
        } else {
            println!("{index:>3}  {id:04}  {name:<24} {channels} channels");
        }
    }
    Ok(())
}

fn fit_json(f: &RoiFit, units: &str) -> serde_json::Value {
    let peak = |p: Option<peakfit::PeakFit>| {
        p.map(|p| {
            json!({
                "mean": p.mean,
                "mean_err": p.errors[1],
                "sigma": p.sigma,
                "fwhm": p.fwhm(),
                "amplitude": p.amplitude,
            })
        })
    };
    json!({
        "start": f.roi.start,
        "len": f.roi.len,
        "channel": peak(f.channel),
        "energy": peak(f.energy),
        "units": units,
    })
}

fn fit_line(f: &RoiFit, units: &str) -> String {
    let mut s = format!("ROI {}..={}:", f.roi.start, f.roi.last());
    match f.channel {
        Some(p) => s.push_str(&format!(
            " centroid {:.2} ± {:.2} ch, FWHM {:.2} ch",
            p.mean,
            p.errors[1],
            p.fwhm()
        )),
        None => s.push_str(" fit failed"),
    }
    if let Some(p) = f.energy {
        s.push_str(&format!(
            ", {:.2} ± {:.2} {units}, FWHM {:.2} {units}",
            p.mean,
            p.errors[1],
            p.fwhm()
        ));
    }
    s
}

fn print_status(s: &AcquisitionSession, json_mode: bool) {
    let t = s.timing();
    let p = s.presets();
    let (lld, uld) = s.discriminators();
    let cal = s.calibration();
    if json_mode {
        let rois: Vec<_> = s.rois().iter().map(|r| json!([r.start, r.len])).collect();
        println!(
            "{}",
            json!({
                "detector": s.identity(),
                "channels": s.channels(),
                "active": s.is_active(),
                "real_ms": t.real_ms,
                "live_ms": t.live_ms,
                "real_preset_ms": p.real_ms,
                "live_preset_ms": p.live_ms,
                "gate": s.gate().to_string(),
                "lld": lld,
                "uld": uld,
                "rois": rois,
                "calibrated": cal.calibrated,
                "calibration": [cal.a, cal.b, cal.c],
                "units": cal.units,
                "description": s.description(),
            })
        );
        return;
    }
    println!("Detector:    {} ({} channels)", s.identity(), s.channels());
    println!("Active:      {}", if s.is_active() { "yes" } else { "no" });
    println!("Real/Live:   {:.2} s / {:.2} s", t.real_ms as f64 / 1e3, t.live_ms as f64 / 1e3);
    println!("Presets:     real {} ms, live {} ms", p.real_ms, p.live_ms);
    println!("Gate:        {}", s.gate());
    println!("LLD/ULD:     {lld} / {uld}");
    if cal.calibrated {
        println!("Calibration: E = {:e}·ch² + {:e}·ch + {:e} {}", cal.a, cal.b, cal.c, cal.units);
    } else {
        println!("Calibration: none");
    }
    if s.rois().is_empty() {
        println!("ROIs:        none");
    }
    for f in s.fits() {
        println!("{}", fit_line(f, &cal.units));
    }
}

pub fn status(cfg: &Config, detector: u32, json_mode: bool) -> Result<()> {
    let (station, _store) = open_one(cfg, detector)?;
    print_status(session(&station, detector)?, json_mode);
    close(station);
    Ok(())
}

#[derive(Debug, Default)]
pub struct MonitorArgs {
    pub detector: u32,
    pub ticks: u64,
    pub clear: bool,
    pub live_preset_s: Option<u64>,
    pub real_preset_s: Option<u64>,
    pub rois: Vec<(usize, usize)>,
    pub save: Option<std::path::PathBuf>,
}

fn check(r: Option<mcb_core::Result<()>>, detector: u32) -> Result<()> {
    r.unwrap_or_else(|| Err(eyre::eyre!("detector {detector} is not open")))
}

pub fn monitor(cfg: &Config, args: MonitorArgs, shutdown: &Arc<AtomicBool>, json_mode: bool) -> Result<()> {
    let d = args.detector;
    let (mut station, mut store) = open_one(cfg, d)?;
    if args.clear {
        check(station.apply(&mut store, d, SessionCommand::Clear), d)?;
    }
    if args.live_preset_s.is_some() || args.real_preset_s.is_some() {
        let presets = Presets {
            real_ms: args.real_preset_s.unwrap_or(0) * 1000,
            live_ms: args.live_preset_s.unwrap_or(0) * 1000,
        };
        check(station.apply(&mut store, d, SessionCommand::SetPresets(presets)), d)?;
    }
    for &(start, len) in &args.rois {
        check(station.apply(&mut store, d, SessionCommand::MarkRoi(Roi::new(start, len))), d)?;
    }
    check(station.apply(&mut store, d, SessionCommand::Start), d)?;
    tracing::info!(detector = d, ticks = args.ticks, "monitor start");

    let clock = MonotonicClock::new();
    let period = Duration::from_millis(cfg.acquisition.poll_ms);
    let bound = (args.ticks > 0).then_some(args.ticks);
    let mut failure = None;
    station.run(&clock, period, bound, shutdown, |st, outcomes| {
        for (index, r) in outcomes {
            let Some(s) = st.session(*index) else { continue };
            match r {
                Ok(transition) => print_tick(s, *transition, json_mode),
                Err(e) => {
                    failure = Some(eyre::eyre!("detector {index}: {e}"));
                    return false;
                }
            }
        }
        !outcomes
            .iter()
            .any(|(_, r)| matches!(r, Ok(Transition::Stopped)))
    });

    let stop = check(station.apply(&mut store, d, SessionCommand::Stop), d);
    if let Some(e) = failure {
        close(station);
        return Err(e);
    }
    stop?;
    if let Some(path) = &args.save {
        let (transport, s) = station
            .split(d)
            .ok_or_else(|| eyre::eyre!("detector {d} is not open"))?;
        s.save(transport, path)
            .wrap_err_with(|| format!("save spectrum to {}", path.display()))?;
        if !json_mode {
            println!("Saved {}", path.display());
        }
    }
    close(station);
    Ok(())
}

fn print_tick(s: &AcquisitionSession, transition: Transition, json_mode: bool) {
    let t = s.timing();
    let total: u64 = s.counts().iter().map(|&c| u64::from(c)).sum();
    let units = &s.calibration().units;
    if json_mode {
        let fits: Vec<_> = s.fits().iter().map(|f| fit_json(f, units)).collect();
        println!(
            "{}",
            json!({
                "detector": s.identity(),
                "active": s.is_active(),
                "real_ms": t.real_ms,
                "live_ms": t.live_ms,
                "dead_time_pct": s.dead_time_percent(),
                "total_counts": total,
                "stopped": transition == Transition::Stopped,
                "fits": fits,
            })
        );
        return;
    }
    println!(
        "real {:>8.2} s  live {:>8.2} s  dead {:>5.1} %  counts {total}",
        t.real_ms as f64 / 1e3,
        t.live_ms as f64 / 1e3,
        s.dead_time_percent()
    );
    for f in s.fits() {
        println!("  {}", fit_line(f, units));
    }
    if transition == Transition::Stopped {
        println!("Preset reached, acquisition stopped.");
    }
}

pub fn calibrate(
    cfg: &Config,
    detector: u32,
    points: &[(f64, f64)],
    csv: Option<&Path>,
    units: Option<String>,
    json_mode: bool,
) -> Result<()> {
    let rows: Vec<CalibrationPointRow> = match csv {
        Some(path) => mcb_config::load_calibration_points_csv(path)?,
        None => points
            .iter()
            .map(|&(channel, energy)| CalibrationPointRow { channel, energy })
            .collect(),
    };
    if rows.is_empty() {
        eyre::bail!("no calibration points given; use --point CHANNEL:ENERGY or --csv FILE");
    }
    if rows.len() > MAX_CALIBRATION_POINTS {
        eyre::bail!(
            "{} calibration points given, at most {MAX_CALIBRATION_POINTS} allowed",
            rows.len()
        );
    }

    let (mut station, mut store) = open_one(cfg, detector)?;
    if let Some(u) = units {
        check(station.apply(&mut store, detector, SessionCommand::SetCalibrationUnits(u)), detector)?;
    }
    for slot in 0..MAX_CALIBRATION_POINTS {
        let point = rows.get(slot).map_or_else(CalibrationPoint::default, CalibrationPoint::from);
        check(
            station.apply(&mut store, detector, SessionCommand::SetCalibrationPoint { slot, point }),
            detector,
        )?;
    }
    let s = session(&station, detector)?;
    let cal = s.calibration().clone();
    if json_mode {
        println!(
            "{}",
            json!({
                "detector": s.identity(),
                "calibrated": cal.calibrated,
                "a": cal.a,
                "b": cal.b,
                "c": cal.c,
                "units": cal.units,
            })
        );
    } else if cal.calibrated {
        println!(
            "{}: E = {:e}·ch² + {:e}·ch + {:e} {}",
            s.identity(),
            cal.a,
            cal.b,
            cal.c,
            cal.units
        );
    } else {
        println!("{}: points are degenerate, detector left uncalibrated", s.identity());
    }
    close(station);
    Ok(())
}

pub fn inspect(cfg: &Config, file: &Path, display_channels: Option<usize>, json_mode: bool) -> Result<()> {
    let spe = SpeFile::read_from(file)?;
    let n = spe.counts.len();
    let m = display_channels.unwrap_or(n);
    let mut mask = vec![false; n];
    for r in spe.rois.iter().filter(|r| r.fits(n)) {
        mask[r.start..r.start + r.len].iter_mut().for_each(|b| *b = true);
    }
    let (rebinned, _) = rebin::rebin(&spe.counts, &mask, m)?;
    let opts = FitOptions::from(&cfg.fit);
    let cal: &EnergyCalibration = &spe.calibration;
    let fits: Vec<RoiFit> = spe
        .rois
        .iter()
        .map(|&roi| peakfit::fit_roi(&rebinned, n, roi, cal, &opts))
        .collect();
    let total: u64 = spe.counts.iter().map(|&c| u64::from(c)).sum();

    if json_mode {
        let fits: Vec<_> = fits.iter().map(|f| fit_json(f, &cal.units)).collect();
        println!(
            "{}",
            json!({
                "file": file.display().to_string(),
                "description": spe.description,
                "detector_id": spe.detector_id,
                "detector_name": spe.detector_name,
                "measured": spe.measured.map(|t| t.to_string()),
                "live_s": spe.live_s,
                "real_s": spe.real_s,
                "channels": n,
                "total_counts": total,
                "calibrated": cal.calibrated,
                "fits": fits,
            })
        );
        return Ok(());
    }
    println!("File:        {}", file.display());
    println!("Description: {}", spe.description);
    println!("Detector:    {:04} {}", spe.detector_id, spe.detector_name);
    if let Some(t) = spe.measured {
        println!("Measured:    {t}");
    }
    println!("Live/Real:   {} s / {} s", spe.live_s, spe.real_s);
    println!("Channels:    {n} ({total} counts)");
    for f in &fits {
        println!("{}", fit_line(f, &cal.units));
    }
    Ok(())
}

pub fn load(cfg: &Config, file: &Path, detector: u32, json_mode: bool) -> Result<()> {
    // Parse before touching the device.
    let spe = SpeFile::read_from(file)?;
    let (mut station, mut store) = open_one(cfg, detector)?;
    let (transport, s) = station
        .split(detector)
        .ok_or_else(|| eyre::eyre!("detector {detector} is not open"))?;
    s.load_file(transport, &mut store, &spe)?;
    if json_mode {
        println!(
            "{}",
            json!({ "detector": s.identity(), "loaded": file.display().to_string(), "channels": spe.counts.len() })
        );
    } else {
        println!("Loaded {} into {}", file.display(), s.identity());
    }
    close(station);
    Ok(())
}

pub fn self_check(cfg: &Config, json_mode: bool) -> Result<()> {
    let mut t = make_transport(cfg)?;
    let count = protocol::detector_count(&mut t)?;
    if count == 0 {
        eyre::bail!("no detectors configured");
    }
    for index in 1..=count {
        let handle = protocol::open(&mut t, index).wrap_err_with(|| format!("open detector {index}"))?;
        let channels = protocol::McbClient::new(&mut t, handle).channel_count();
        protocol::close(&mut t, handle)?;
        let channels = channels.wrap_err_with(|| format!("read length of detector {index}"))?;
        tracing::debug!(index, channels, "detector ok");
    }
    if json_mode {
        println!("{}", json!({ "ok": true, "detectors": count }));
    } else {
        println!("OK ({count} detectors)");
    }
    Ok(())
}

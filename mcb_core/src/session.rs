//! Per-detector acquisition state refreshed on every tick.
//!
//! A session owns the cached view of one detector (spectrum, ROIs, fits,
//! timing, presets) and is the only place UI commands mutate the device.
//! The transport is borrowed per call, so a tick can never interleave with a
//! command, save or load on the same detector.
use std::path::Path;

use chrono::TimeZone;
use mcb_config::DetectorSettings;
use mcb_traits::{DetectorHandle, Transport};

use crate::calibration::{CalibrationPoint, DEFAULT_UNITS, EnergyCalibration};
use crate::deadtime::DeadTimeWindow;
use crate::error::{McbError, Result, fail};
use crate::peakfit::{self, FitOptions, PeakFit, RoiFit};
use crate::protocol::{self, McbClient};
use crate::rebin;
use crate::settings::{SettingsStore, identity_key};
use crate::spe::{SpeFile, SpePresets};
use crate::types::{GateMode, Presets, Roi, Timing};
use crate::util::{MILLIS_PER_SEC, ms_to_ticks, ms_to_whole_secs, ticks_to_ms};

/// Number of calibration reference slots.
pub const CALIBRATION_SLOTS: usize = 3;
/// Fixed y-limit of the log-scale display (log2 of the u32 count range).
pub const LOG_Y_LIMIT: f64 = 31.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DisplayMode {
    #[default]
    Linear,
    Log,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SessionOptions {
    /// Display resolution; `None` shows every channel.
    pub display_channels: Option<usize>,
    pub display_mode: DisplayMode,
    pub fit: FitOptions,
}

/// Every mutation a UI can request.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionCommand {
    Start,
    Stop,
    Clear,
    SetPresets(Presets),
    SetGate(GateMode),
    SetDiscriminators { lld: usize, uld: usize },
    /// Region in raw channels.
    MarkRoi(Roi),
    ClearRoi(Roi),
    SetCalibrationPoint { slot: usize, point: CalibrationPoint },
    SetCalibrationUnits(String),
    SetDescription(String),
    SetDisplayChannels(usize),
    SetDisplayMode(DisplayMode),
    /// Marker position in display channels.
    SetMarker(usize),
}

/// Acquisition state change observed by a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    None,
    Started,
    Stopped,
}

/// Everything a renderer needs for one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct DisplayFrame {
    pub mode: DisplayMode,
    /// Rebinned counts, log2-scaled in log mode.
    pub counts: Vec<f64>,
    /// Counts inside ROIs, zero elsewhere.
    pub roi_counts: Vec<f64>,
    pub roi_mask: Vec<bool>,
    /// One curve per ROI, `(display x, y)`.
    pub fit_curves: Vec<Vec<(f64, f64)>>,
    pub y_limit: f64,
    pub marker: usize,
    pub start_enabled: bool,
    pub stop_enabled: bool,
}

/// What sits under the marker.
#[derive(Debug, Clone, PartialEq)]
pub struct MarkerInfo {
    pub display_channel: usize,
    pub channel: usize,
    pub counts: u64,
    pub energy: Option<f64>,
    /// First ROI containing the marker and its fits.
    pub roi: Option<RoiFit>,
}

/// Snapshot of the device content replaced by a load.
struct DeviceSnapshot {
    counts: Vec<u32>,
    timing: Timing,
    presets: Presets,
    rois: Vec<Roi>,
}

#[derive(Debug)]
pub struct AcquisitionSession {
    index: u32,
    handle: DetectorHandle,
    id: u32,
    name: String,
    channels: usize,
    display_channels: usize,
    mode: DisplayMode,
    fit: FitOptions,
    active: bool,
    counts: Vec<u32>,
    roi_mask: Vec<bool>,
    rebinned: Vec<u64>,
    rebinned_mask: Vec<bool>,
    rois: Vec<Roi>,
    fits: Vec<RoiFit>,
    timing: Timing,
    presets: Presets,
    gate: GateMode,
    lld: usize,
    uld: usize,
    dead: DeadTimeWindow,
    points: [CalibrationPoint; CALIBRATION_SLOTS],
    calibration: EnergyCalibration,
    description: String,
    marker: usize,
}

impl AcquisitionSession {
    /// Open detector `index`, restore its persisted settings and read its state.
    pub fn open(
        transport: &mut dyn Transport,
        store: &mut dyn SettingsStore,
        index: u32,
        options: SessionOptions,
    ) -> Result<Self> {
        let (name, id) = protocol::detector_name(transport, index)?;
        let handle = protocol::open(transport, index)?;
        match Self::init(transport, store, index, handle, id, name, options) {
            Ok(s) => Ok(s),
            Err(e) => {
                if let Err(close_err) = protocol::close(transport, handle) {
                    tracing::warn!(error = %close_err, index, "close after failed open");
                }
                Err(e)
            }
        }
    }

    fn init(
        transport: &mut dyn Transport,
        store: &mut dyn SettingsStore,
        index: u32,
        handle: DetectorHandle,
        id: u32,
        name: String,
        options: SessionOptions,
    ) -> Result<Self> {
        let mut client = McbClient::new(transport, handle);
        let channels = client.channel_count()?;
        let display_channels = options.display_channels.unwrap_or(channels);
        rebin::check_resolution(channels, display_channels)?;
        let gate = client.gate()?;
        let (lld, uld) = client.discriminators()?;

        let settings = store
            .load(&identity_key(id, &name))?
            .unwrap_or_default();
        let mut points = [CalibrationPoint::default(); CALIBRATION_SLOTS];
        for (slot, row) in points.iter_mut().zip(&settings.points) {
            *slot = row.into();
        }

        let mut session = Self {
            index,
            handle,
            id,
            name,
            channels,
            display_channels,
            mode: options.display_mode,
            fit: options.fit,
            active: false,
            counts: vec![0; channels],
            roi_mask: vec![false; channels],
            rebinned: vec![0; display_channels],
            rebinned_mask: vec![false; display_channels],
            rois: Vec::new(),
            fits: Vec::new(),
            timing: Timing::default(),
            presets: Presets::default(),
            gate,
            lld,
            uld,
            dead: DeadTimeWindow::new(),
            points,
            calibration: EnergyCalibration::from(&settings),
            description: settings.description,
            marker: 0,
        };
        session.tick(transport)?;
        tracing::info!(
            detector = %session.identity(),
            channels,
            display_channels,
            calibrated = session.calibration.calibrated,
            "session opened"
        );
        Ok(session)
    }

    /// Release the detector handle.
    pub fn close(self, transport: &mut dyn Transport) -> Result<()> {
        protocol::close(transport, self.handle)
    }

    fn client<'t>(&self, transport: &'t mut dyn Transport) -> McbClient<'t> {
        McbClient::new(transport, self.handle).with_channels(self.channels)
    }

    /// Settings key `"{id:04} {name}"`.
    pub fn identity(&self) -> String {
        identity_key(self.id, &self.name)
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn display_channels(&self) -> usize {
        self.display_channels
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn counts(&self) -> &[u32] {
        &self.counts
    }

    pub fn roi_mask(&self) -> &[bool] {
        &self.roi_mask
    }

    pub fn rebinned(&self) -> &[u64] {
        &self.rebinned
    }

    pub fn rois(&self) -> &[Roi] {
        &self.rois
    }

    pub fn fits(&self) -> &[RoiFit] {
        &self.fits
    }

    pub fn timing(&self) -> Timing {
        self.timing
    }

    pub fn presets(&self) -> Presets {
        self.presets
    }

    pub fn gate(&self) -> GateMode {
        self.gate
    }

    pub fn discriminators(&self) -> (usize, usize) {
        (self.lld, self.uld)
    }

    pub fn dead_time_percent(&self) -> f64 {
        self.dead.percent()
    }

    pub fn calibration(&self) -> &EnergyCalibration {
        &self.calibration
    }

    pub fn calibration_points(&self) -> &[CalibrationPoint; CALIBRATION_SLOTS] {
        &self.points
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn display_mode(&self) -> DisplayMode {
        self.mode
    }

    pub fn marker(&self) -> usize {
        self.marker
    }

    /// Refresh every cached value from the device. Nothing is committed
    /// unless every read succeeds.
    pub fn tick(&mut self, transport: &mut dyn Transport) -> Result<Transition> {
        let mut client = self.client(transport);
        let active = client.is_active()?;
        let (counts, mask) = client.counts()?;
        let rois = client.rois()?;
        let timing = client.timing()?;
        let presets = client.presets()?;
        let (rebinned, rebinned_mask) = rebin::rebin(&counts, &mask, self.display_channels)?;
        let fits = fit_all(&rebinned, self.channels, &rois, &self.calibration, &self.fit);

        let transition = match (self.active, active) {
            (false, true) => Transition::Started,
            (true, false) => Transition::Stopped,
            _ => Transition::None,
        };
        match transition {
            Transition::Started => tracing::info!(detector = %self.identity(), "acquisition started"),
            Transition::Stopped => tracing::info!(
                detector = %self.identity(),
                real_ms = timing.real_ms,
                live_ms = timing.live_ms,
                "acquisition stopped"
            ),
            Transition::None => {}
        }

        self.active = active;
        self.counts = counts;
        self.roi_mask = mask;
        self.rebinned = rebinned;
        self.rebinned_mask = rebinned_mask;
        self.rois = rois;
        self.fits = fits;
        self.timing = timing;
        self.presets = presets;
        self.dead.push(timing);
        Ok(transition)
    }

    /// Apply one command fully, or fail without touching cached state.
    pub fn apply(
        &mut self,
        transport: &mut dyn Transport,
        store: &mut dyn SettingsStore,
        cmd: SessionCommand,
    ) -> Result<()> {
        tracing::debug!(detector = %self.identity(), command = ?cmd, "session command");
        match cmd {
            SessionCommand::Start => {
                self.client(transport).start()?;
                self.active = true;
            }
            SessionCommand::Stop => {
                self.client(transport).stop()?;
                self.active = false;
            }
            SessionCommand::Clear => {
                self.client(transport).clear()?;
                self.counts.iter_mut().for_each(|c| *c = 0);
                self.rebinned.iter_mut().for_each(|c| *c = 0);
                self.timing = Timing::default();
                self.dead.reset();
                self.refit();
            }
            SessionCommand::SetPresets(p) => {
                self.client(transport).set_presets(p)?;
                self.presets = Presets {
                    real_ms: ticks_to_ms(ms_to_ticks(p.real_ms)),
                    live_ms: ticks_to_ms(ms_to_ticks(p.live_ms)),
                };
            }
            SessionCommand::SetGate(g) => {
                self.client(transport).set_gate(g)?;
                self.gate = g;
            }
            SessionCommand::SetDiscriminators { lld, uld } => {
                if lld > uld {
                    return fail(McbError::Validation(format!(
                        "lower level discriminator {lld} above upper level {uld}"
                    )));
                }
                if uld >= self.channels {
                    return fail(McbError::Validation(format!(
                        "upper level discriminator {uld} outside detector channels 0..{}",
                        self.channels
                    )));
                }
                let mut client = self.client(transport);
                client.set_lld(lld)?;
                client.set_uld(uld)?;
                self.lld = lld;
                self.uld = uld;
            }
            SessionCommand::MarkRoi(roi) => self.change_roi(transport, roi, true)?,
            SessionCommand::ClearRoi(roi) => self.change_roi(transport, roi, false)?,
            SessionCommand::SetCalibrationPoint { slot, point } => {
                if slot >= CALIBRATION_SLOTS {
                    return fail(McbError::Validation(format!(
                        "calibration slot {slot} outside 0..{CALIBRATION_SLOTS}"
                    )));
                }
                let mut points = self.points;
                points[slot] = point;
                let calibration = EnergyCalibration::from_points(&points, &self.calibration.units);
                self.persist(store, &points, &calibration, &self.description)?;
                self.points = points;
                self.calibration = calibration;
                self.refit();
            }
            SessionCommand::SetCalibrationUnits(units) => {
                let units = units.trim();
                if units.is_empty() || units.contains(char::is_whitespace) {
                    return fail(McbError::Validation(format!(
                        "calibration units {units:?} must be a single word"
                    )));
                }
                let mut calibration = self.calibration.clone();
                calibration.units = units.to_string();
                self.persist(store, &self.points, &calibration, &self.description)?;
                self.calibration = calibration;
            }
            SessionCommand::SetDescription(text) => {
                let text = text.trim().to_string();
                self.persist(store, &self.points, &self.calibration, &text)?;
                self.description = text;
            }
            SessionCommand::SetDisplayChannels(m) => self.set_display_channels(m)?,
            SessionCommand::SetDisplayMode(mode) => self.mode = mode,
            SessionCommand::SetMarker(pos) => {
                if pos >= self.display_channels {
                    return fail(McbError::Validation(format!(
                        "marker {pos} outside display channels 0..{}",
                        self.display_channels
                    )));
                }
                self.marker = pos;
            }
        }
        Ok(())
    }

    fn change_roi(&mut self, transport: &mut dyn Transport, roi: Roi, mark: bool) -> Result<()> {
        let mut client = self.client(transport);
        if mark {
            client.set_roi(roi)?;
        } else {
            client.clear_roi(roi)?;
        }
        let rois = client.rois()?;
        let mut mask = self.roi_mask.clone();
        mask[roi.start..roi.start + roi.len]
            .iter_mut()
            .for_each(|m| *m = mark);
        let (rebinned, rebinned_mask) = rebin::rebin(&self.counts, &mask, self.display_channels)?;
        self.roi_mask = mask;
        self.rebinned = rebinned;
        self.rebinned_mask = rebinned_mask;
        self.rois = rois;
        self.refit();
        Ok(())
    }

    fn set_display_channels(&mut self, m: usize) -> Result<()> {
        rebin::check_resolution(self.channels, m)?;
        let (rebinned, rebinned_mask) = rebin::rebin(&self.counts, &self.roi_mask, m)?;
        let old = self.display_channels;
        self.marker = (self.marker * m / old).min(m - 1);
        self.display_channels = m;
        self.rebinned = rebinned;
        self.rebinned_mask = rebinned_mask;
        self.refit();
        tracing::debug!(detector = %self.identity(), from = old, to = m, "display resolution changed");
        Ok(())
    }

    fn refit(&mut self) {
        self.fits = fit_all(&self.rebinned, self.channels, &self.rois, &self.calibration, &self.fit);
    }

    fn persist(
        &self,
        store: &mut dyn SettingsStore,
        points: &[CalibrationPoint; CALIBRATION_SLOTS],
        calibration: &EnergyCalibration,
        description: &str,
    ) -> Result<()> {
        let settings = DetectorSettings {
            points: points.iter().map(|&p| p.into()).collect(),
            a: calibration.a,
            b: calibration.b,
            c: calibration.c,
            units: calibration.units.clone(),
            description: description.to_string(),
        };
        store.save(&self.identity(), &settings)
    }

    /// Build the renderer's view of the cached state.
    pub fn frame(&self) -> DisplayFrame {
        let scale = |v: f64| match self.mode {
            DisplayMode::Linear => v,
            DisplayMode::Log => v.max(1.0).log2(),
        };
        let counts: Vec<f64> = self.rebinned.iter().map(|&c| scale(c as f64)).collect();
        let roi_counts = self
            .rebinned
            .iter()
            .zip(&self.rebinned_mask)
            .map(|(&c, &m)| if m { scale(c as f64) } else { scale(0.0) })
            .collect();
        let fit_curves = self
            .fits
            .iter()
            .map(|f| f.curve.iter().map(|&(x, y)| (x, scale(y))).collect())
            .collect();
        let y_limit = match self.mode {
            DisplayMode::Log => LOG_Y_LIMIT,
            DisplayMode::Linear => {
                let max = self.rebinned.iter().copied().max().unwrap_or(0);
                next_power_of_two_above(max) as f64
            }
        };
        DisplayFrame {
            mode: self.mode,
            counts,
            roi_counts,
            roi_mask: self.rebinned_mask.clone(),
            fit_curves,
            y_limit,
            marker: self.marker,
            start_enabled: !self.active,
            stop_enabled: self.active,
        }
    }

    /// Channel, energy and the first ROI under the marker.
    pub fn marker_info(&self) -> MarkerInfo {
        let channel = rebin::to_raw(self.marker, self.channels, self.display_channels);
        let roi = self
            .fits
            .iter()
            .find(|f| f.roi.contains(channel))
            .cloned();
        MarkerInfo {
            display_channel: self.marker,
            channel,
            counts: self.rebinned.get(self.marker).copied().unwrap_or(0),
            energy: self
                .calibration
                .calibrated
                .then(|| self.calibration.energy(channel as f64)),
            roi,
        }
    }

    /// Channel-domain fit of the first ROI containing raw `channel`.
    pub fn fit_at(&self, channel: usize) -> Option<PeakFit> {
        self.fits
            .iter()
            .find(|f| f.roi.contains(channel))
            .and_then(|f| f.channel)
    }

    /// Refresh from the device and write the spectrum to `path`.
    pub fn save(&mut self, transport: &mut dyn Transport, path: &Path) -> Result<SpeFile> {
        self.tick(transport)?;
        let started = self.client(transport).start_timestamp()?;
        let measured = chrono::Local
            .timestamp_opt(started, 0)
            .single()
            .map(|t| t.naive_local());
        let file = SpeFile {
            description: self.description.clone(),
            detector_id: self.id,
            detector_name: self.name.clone(),
            measured,
            live_s: ms_to_whole_secs(self.timing.live_ms),
            real_s: ms_to_whole_secs(self.timing.real_ms),
            first_channel: 0,
            counts: self.counts.clone(),
            rois: self.rois.clone(),
            presets: SpePresets::from_presets(self.presets),
            calibration: self.calibration.clone(),
        };
        file.write_to(path)?;
        tracing::info!(detector = %self.identity(), path = %path.display(), "spectrum saved");
        Ok(file)
    }

    /// Replace the device content with a spectrum file.
    ///
    /// The file is parsed and validated before any command is sent. If
    /// writing the device or the settings store fails, the previous device
    /// content is restored best-effort and the error is returned.
    pub fn load(
        &mut self,
        transport: &mut dyn Transport,
        store: &mut dyn SettingsStore,
        path: &Path,
    ) -> Result<()> {
        let file = SpeFile::read_from(path)?;
        self.load_file(transport, store, &file)
    }

    pub fn load_file(
        &mut self,
        transport: &mut dyn Transport,
        store: &mut dyn SettingsStore,
        file: &SpeFile,
    ) -> Result<()> {
        file.validate_for(self.channels)?;
        let mut client = self.client(transport);
        if client.is_active()? {
            return fail(McbError::State(
                "stop the acquisition before loading a spectrum".into(),
            ));
        }
        let snapshot = DeviceSnapshot {
            counts: client.counts()?.0,
            timing: client.timing()?,
            presets: client.presets()?,
            rois: client.rois()?,
        };
        let target = DeviceSnapshot {
            counts: file.counts.clone(),
            timing: Timing {
                real_ms: file.real_s * MILLIS_PER_SEC,
                live_ms: file.live_s * MILLIS_PER_SEC,
            },
            presets: file.presets.to_presets(),
            rois: file.rois.clone(),
        };
        let units = if file.calibration.units.is_empty() {
            DEFAULT_UNITS
        } else {
            file.calibration.units.as_str()
        };
        let calibration = EnergyCalibration::from_coefficients(
            file.calibration.a,
            file.calibration.b,
            file.calibration.c,
            units,
        );
        let points = [CalibrationPoint::default(); CALIBRATION_SLOTS];
        let applied = write_snapshot(&mut client, &target)
            .and_then(|()| self.persist(store, &points, &calibration, &file.description));
        if let Err(e) = applied {
            tracing::warn!(detector = %self.identity(), error = %e, "load failed, restoring previous spectrum");
            if let Err(restore_err) = write_snapshot(&mut client, &snapshot) {
                tracing::warn!(detector = %self.identity(), error = %restore_err, "restore incomplete");
            }
            return Err(e);
        }

        self.points = points;
        self.calibration = calibration;
        self.description = file.description.clone();
        self.dead.reset();
        self.tick(transport)?;
        tracing::info!(detector = %self.identity(), channels = file.counts.len(), "spectrum loaded");
        Ok(())
    }
}

fn write_snapshot(client: &mut McbClient<'_>, s: &DeviceSnapshot) -> Result<()> {
    client.set_counts(&s.counts)?;
    client.set_timing(s.timing)?;
    client.set_presets(s.presets)?;
    client.clear_all_rois()?;
    for &roi in &s.rois {
        client.set_roi(roi)?;
    }
    Ok(())
}

fn fit_all(
    rebinned: &[u64],
    channels: usize,
    rois: &[Roi],
    calibration: &EnergyCalibration,
    opts: &FitOptions,
) -> Vec<RoiFit> {
    rois.iter()
        .map(|&roi| peakfit::fit_roi(rebinned, channels, roi, calibration, opts))
        .collect()
}

/// Smallest power of two strictly greater than `v` (1 for 0).
fn next_power_of_two_above(v: u64) -> u64 {
    1u64.checked_shl(64 - v.leading_zeros()).unwrap_or(u64::MAX)
}

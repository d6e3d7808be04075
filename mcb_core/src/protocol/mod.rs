//! Typed MCB operations over the single `Transport::comm` request primitive.
//!
//! Commands are rendered by [`command`]; responses are sliced by the field
//! table in [`schema`]. `$E` records become [`McbError::Device`], anything
//! that does not match its declared layout becomes [`McbError::Protocol`].
pub mod codes;
pub mod command;
pub mod schema;

use mcb_traits::{DetectorHandle, Transport};

use crate::error::{McbError, Result, fail};
use crate::hw_error::to_report;
use crate::types::{GateMode, Presets, Roi, Timing};
use crate::util::{ms_to_ticks, ticks_to_ms};

pub use command::{Command, Query};
pub use schema::ResponseSchema;

/// Number of configured detectors.
pub fn detector_count(transport: &mut dyn Transport) -> Result<u32> {
    transport.detector_count().map_err(to_report)
}

/// `(name, id)` of the detector at 1-based `index`.
pub fn detector_name(transport: &mut dyn Transport, index: u32) -> Result<(String, u32)> {
    transport.detector_name(index).map_err(to_report)
}

pub fn open(transport: &mut dyn Transport, index: u32) -> Result<DetectorHandle> {
    let handle = transport.open(index).map_err(to_report)?;
    tracing::debug!(index, handle = %handle, "detector opened");
    Ok(handle)
}

pub fn close(transport: &mut dyn Transport, handle: DetectorHandle) -> Result<()> {
    transport.close(handle).map_err(to_report)?;
    tracing::debug!(handle = %handle, "detector closed");
    Ok(())
}

/// Operations on one opened detector, borrowing the transport for their duration.
pub struct McbClient<'t> {
    transport: &'t mut dyn Transport,
    handle: DetectorHandle,
    channels: Option<usize>,
}

impl<'t> McbClient<'t> {
    pub fn new(transport: &'t mut dyn Transport, handle: DetectorHandle) -> Self {
        Self {
            transport,
            handle,
            channels: None,
        }
    }

    /// Skip the channel-count query when the caller already knows it.
    pub fn with_channels(mut self, channels: usize) -> Self {
        self.channels = Some(channels);
        self
    }

    pub fn handle(&self) -> DetectorHandle {
        self.handle
    }

    /// Send raw wire text; `$E` records are returned as device errors.
    fn call(&mut self, wire: &str) -> Result<String> {
        tracing::trace!(handle = %self.handle, command = wire, "mcb command");
        let resp = self.transport.comm(self.handle, wire).map_err(to_report)?;
        tracing::trace!(handle = %self.handle, response = resp.trim_end(), "mcb response");
        if resp.starts_with(schema::DEVICE_ERROR.tag) {
            let fields = schema::DEVICE_ERROR
                .fields(&resp)
                .map_err(|reason| self.protocol_error(wire, &resp, reason))?;
            let macro_code = fields[0]
                .parse::<u16>()
                .map_err(|_| self.protocol_error(wire, &resp, "macro code is not a number"))?;
            let micro_code = fields[1]
                .parse::<u16>()
                .map_err(|_| self.protocol_error(wire, &resp, "micro code is not a number"))?;
            return fail(McbError::Device {
                command: wire.to_string(),
                macro_code,
                micro_code,
            });
        }
        Ok(resp)
    }

    fn protocol_error(&self, wire: &str, resp: &str, reason: impl Into<String>) -> eyre::Report {
        let e = McbError::protocol(wire, resp, reason);
        tracing::error!(handle = %self.handle, error = %e, "protocol error");
        eyre::Report::new(e)
    }

    /// Send a state-changing command. START/STOP on an input already in
    /// that state succeed.
    pub fn send(&mut self, cmd: &Command) -> Result<()> {
        let wire = cmd.wire();
        match self.call(&wire) {
            Ok(_) => Ok(()),
            Err(e) => {
                let benign = matches!(cmd, Command::Start | Command::Stop)
                    && matches!(
                        e.downcast_ref::<McbError>(),
                        Some(McbError::Device {
                            macro_code: 0,
                            micro_code: codes::ALREADY_STARTED_STOPPED,
                            ..
                        })
                    );
                if benign {
                    tracing::debug!(handle = %self.handle, command = %wire, "input already in requested state");
                    Ok(())
                } else {
                    Err(e)
                }
            }
        }
    }

    /// Issue `q` and return its validated fields.
    fn query(&mut self, q: Query) -> Result<Vec<String>> {
        let wire = q.wire();
        let resp = self.call(wire)?;
        match q.schema().fields(&resp) {
            Ok(fields) => Ok(fields.into_iter().map(str::to_string).collect()),
            Err(reason) => Err(self.protocol_error(wire, &resp, reason)),
        }
    }

    fn query_count(&mut self, q: Query) -> Result<u64> {
        let fields = self.query(q)?;
        fields[0].parse::<u64>().map_err(|_| {
            self.protocol_error(q.wire(), &fields[0], "count field is not a number")
        })
    }

    pub fn channel_count(&mut self) -> Result<usize> {
        if let Some(n) = self.channels {
            return Ok(n);
        }
        let n = self
            .transport
            .channel_count(self.handle)
            .map_err(to_report)?;
        self.channels = Some(n);
        Ok(n)
    }

    pub fn is_active(&mut self) -> Result<bool> {
        self.transport.is_active(self.handle).map_err(to_report)
    }

    pub fn start_timestamp(&mut self) -> Result<i64> {
        self.transport
            .start_timestamp(self.handle)
            .map_err(to_report)
    }

    pub fn start(&mut self) -> Result<()> {
        self.send(&Command::Start)
    }

    pub fn stop(&mut self) -> Result<()> {
        self.send(&Command::Stop)
    }

    pub fn clear(&mut self) -> Result<()> {
        self.send(&Command::Clear)
    }

    /// Full spectrum: `(counts, roi_mask)`, both `channel_count` long.
    pub fn counts(&mut self) -> Result<(Vec<u32>, Vec<bool>)> {
        let n = self.channel_count()?;
        let (counts, mask) = self
            .transport
            .read_counts(self.handle, 0, n)
            .map_err(to_report)?;
        if counts.len() != n || mask.len() != n {
            return Err(self.protocol_error(
                "read_counts",
                &format!("{} values, {} mask bits", counts.len(), mask.len()),
                format!("expected {n} channels"),
            ));
        }
        Ok((counts, mask))
    }

    /// Set `count` channels from `start` to `value`.
    pub fn set_data(&mut self, start: usize, count: usize, value: u32) -> Result<()> {
        let n = self.channel_count()?;
        if !Roi::new(start, count).fits(n) {
            return fail(McbError::Validation(format!(
                "channels {start}..{} outside detector length {n}",
                start.saturating_add(count)
            )));
        }
        self.send(&Command::SetData {
            start,
            count,
            value,
        })
    }

    /// Overwrite the whole spectrum, one range command per run of equal values.
    pub fn set_counts(&mut self, counts: &[u32]) -> Result<()> {
        let n = self.channel_count()?;
        if counts.len() != n {
            return fail(McbError::Validation(format!(
                "spectrum has {} channels, detector has {n}",
                counts.len()
            )));
        }
        let mut i = 0;
        while i < n {
            let value = counts[i];
            let run = counts[i..].iter().take_while(|&&c| c == value).count();
            self.send(&Command::SetData {
                start: i,
                count: run,
                value,
            })?;
            i += run;
        }
        Ok(())
    }

    pub fn timing(&mut self) -> Result<Timing> {
        Ok(Timing {
            real_ms: ticks_to_ms(self.query_count(Query::RealTicks)?),
            live_ms: ticks_to_ms(self.query_count(Query::LiveTicks)?),
        })
    }

    pub fn set_timing(&mut self, t: Timing) -> Result<()> {
        self.send(&Command::SetRealTicks(ms_to_ticks(t.real_ms)))?;
        self.send(&Command::SetLiveTicks(ms_to_ticks(t.live_ms)))
    }

    pub fn presets(&mut self) -> Result<Presets> {
        Ok(Presets {
            real_ms: ticks_to_ms(self.query_count(Query::RealPresetTicks)?),
            live_ms: ticks_to_ms(self.query_count(Query::LivePresetTicks)?),
        })
    }

    pub fn set_presets(&mut self, p: Presets) -> Result<()> {
        self.send(&Command::SetRealPresetTicks(ms_to_ticks(p.real_ms)))?;
        self.send(&Command::SetLivePresetTicks(ms_to_ticks(p.live_ms)))
    }

    pub fn gate(&mut self) -> Result<GateMode> {
        let wire = Query::Gate.wire();
        let fields = self.query(Query::Gate)?;
        let by_index = fields[0].parse::<u8>().ok().and_then(GateMode::from_index);
        match by_index {
            Some(g) if g.wire_name() == fields[1] => Ok(g),
            Some(_) => Err(self.protocol_error(
                wire,
                &fields.concat(),
                "gate index and name disagree",
            )),
            None => Err(self.protocol_error(wire, &fields.concat(), "unknown gate index")),
        }
    }

    pub fn set_gate(&mut self, g: GateMode) -> Result<()> {
        self.send(&Command::SetGate(g))
    }

    /// `(lld, uld)` in channels.
    pub fn discriminators(&mut self) -> Result<(usize, usize)> {
        let lld = self.query_count(Query::Lld)?;
        let uld = self.query_count(Query::Uld)?;
        Ok((lld as usize, uld as usize))
    }

    fn check_channel(&mut self, what: &str, ch: usize) -> Result<()> {
        let n = self.channel_count()?;
        if ch >= n {
            return fail(McbError::Validation(format!(
                "{what} {ch} outside detector channels 0..{n}"
            )));
        }
        Ok(())
    }

    pub fn set_lld(&mut self, ch: usize) -> Result<()> {
        self.check_channel("lower level discriminator", ch)?;
        self.send(&Command::SetLld(ch))
    }

    pub fn set_uld(&mut self, ch: usize) -> Result<()> {
        self.check_channel("upper level discriminator", ch)?;
        self.send(&Command::SetUld(ch))
    }

    fn query_roi(&mut self, q: Query) -> Result<Roi> {
        let fields = self.query(q)?;
        let parse = |s: &str| s.parse::<usize>().ok();
        match (parse(&fields[0]), parse(&fields[1])) {
            (Some(start), Some(len)) => Ok(Roi::new(start, len)),
            _ => Err(self.protocol_error(q.wire(), &fields.join(","), "ROI field is not a number")),
        }
    }

    /// Every ROI stored on the device, walking the SHOW_ROI/SHOW_NEXT cursor.
    pub fn rois(&mut self) -> Result<Vec<Roi>> {
        let n = self.channel_count()?;
        let mut out = Vec::new();
        let mut q = Query::FirstRoi;
        for _ in 0..=n {
            let roi = self.query_roi(q)?;
            if roi.len == 0 {
                return Ok(out);
            }
            out.push(roi);
            q = Query::NextRoi;
        }
        Err(self.protocol_error(
            Query::NextRoi.wire(),
            "",
            format!("ROI listing did not terminate within {n} steps"),
        ))
    }

    fn check_roi(&mut self, roi: Roi) -> Result<()> {
        let n = self.channel_count()?;
        if !roi.fits(n) {
            return fail(McbError::Validation(format!(
                "ROI start {} length {} outside detector channels 0..{n}",
                roi.start, roi.len
            )));
        }
        Ok(())
    }

    pub fn set_roi(&mut self, roi: Roi) -> Result<()> {
        self.check_roi(roi)?;
        self.send(&Command::SetRoi {
            start: roi.start,
            len: roi.len,
        })
    }

    pub fn clear_roi(&mut self, roi: Roi) -> Result<()> {
        self.check_roi(roi)?;
        self.send(&Command::ClearRoi {
            start: roi.start,
            len: roi.len,
        })
    }

    /// Remove every ROI on the detector.
    pub fn clear_all_rois(&mut self) -> Result<()> {
        let n = self.channel_count()?;
        self.clear_roi(Roi::new(0, n))
    }
}

//! One transport shared by every configured detector.
//!
//! Master start/stop/clear fan out to all sessions. A failing detector never
//! aborts the others: per-detector outcomes are collected and returned.
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use mcb_traits::Transport;
use mcb_traits::clock::Clock;

use crate::error::Result;
use crate::protocol;
use crate::session::{AcquisitionSession, SessionCommand, SessionOptions, Transition};
use crate::settings::SettingsStore;

/// Outcome of one operation on one detector, keyed by its 1-based index.
pub type DetectorOutcome<T> = (u32, Result<T>);

pub struct Station<T: Transport> {
    transport: T,
    sessions: Vec<AcquisitionSession>,
}

impl<T: Transport> Station<T> {
    /// Open every detector the transport reports.
    ///
    /// Detectors that fail to open are logged and skipped; the station is
    /// only an error when the transport cannot be enumerated at all.
    pub fn open_all(
        mut transport: T,
        store: &mut dyn SettingsStore,
        options: SessionOptions,
    ) -> Result<Self> {
        let count = protocol::detector_count(&mut transport)?;
        let mut sessions = Vec::with_capacity(count as usize);
        for index in 1..=count {
            match AcquisitionSession::open(&mut transport, store, index, options) {
                Ok(s) => sessions.push(s),
                Err(e) => tracing::warn!(index, error = %e, "detector skipped"),
            }
        }
        tracing::info!(configured = count, opened = sessions.len(), "station ready");
        Ok(Self {
            transport,
            sessions,
        })
    }

    /// Open only detector `index`.
    pub fn open_one(
        mut transport: T,
        store: &mut dyn SettingsStore,
        index: u32,
        options: SessionOptions,
    ) -> Result<Self> {
        let session = AcquisitionSession::open(&mut transport, store, index, options)?;
        Ok(Self {
            transport,
            sessions: vec![session],
        })
    }

    pub fn sessions(&self) -> &[AcquisitionSession] {
        &self.sessions
    }

    pub fn session(&self, index: u32) -> Option<&AcquisitionSession> {
        self.sessions.iter().find(|s| s.index() == index)
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Borrow the transport together with one session.
    pub fn split(&mut self, index: u32) -> Option<(&mut T, &mut AcquisitionSession)> {
        let session = self.sessions.iter_mut().find(|s| s.index() == index)?;
        Some((&mut self.transport, session))
    }

    /// Apply `cmd` to one detector.
    pub fn apply(
        &mut self,
        store: &mut dyn SettingsStore,
        index: u32,
        cmd: SessionCommand,
    ) -> Option<Result<()>> {
        let (transport, session) = self.split(index)?;
        Some(session.apply(transport, store, cmd))
    }

    fn apply_all(&mut self, store: &mut dyn SettingsStore, cmd: &SessionCommand) -> Vec<DetectorOutcome<()>> {
        let transport = &mut self.transport;
        self.sessions
            .iter_mut()
            .map(|s| {
                let r = s.apply(&mut *transport, &mut *store, cmd.clone());
                if let Err(e) = &r {
                    tracing::warn!(detector = %s.identity(), error = %e, command = ?cmd, "master command failed");
                }
                (s.index(), r)
            })
            .collect()
    }

    pub fn start_all(&mut self, store: &mut dyn SettingsStore) -> Vec<DetectorOutcome<()>> {
        self.apply_all(store, &SessionCommand::Start)
    }

    pub fn stop_all(&mut self, store: &mut dyn SettingsStore) -> Vec<DetectorOutcome<()>> {
        self.apply_all(store, &SessionCommand::Stop)
    }

    pub fn clear_all(&mut self, store: &mut dyn SettingsStore) -> Vec<DetectorOutcome<()>> {
        self.apply_all(store, &SessionCommand::Clear)
    }

    /// Refresh every session once.
    pub fn tick_all(&mut self) -> Vec<DetectorOutcome<Transition>> {
        let transport = &mut self.transport;
        self.sessions
            .iter_mut()
            .map(|s| {
                let r = s.tick(&mut *transport);
                if let Err(e) = &r {
                    tracing::warn!(detector = %s.identity(), error = %e, "tick failed");
                }
                (s.index(), r)
            })
            .collect()
    }

    /// Whether any detector is still acquiring.
    pub fn any_active(&self) -> bool {
        self.sessions.iter().any(AcquisitionSession::is_active)
    }

    /// Tick every `period` until `ticks` rounds ran (if bounded) or `stop`
    /// is raised. `on_tick` sees the station after each round and may return
    /// `false` to end the loop. Returns the number of rounds run.
    pub fn run<C, F>(
        &mut self,
        clock: &C,
        period: Duration,
        ticks: Option<u64>,
        stop: &Arc<AtomicBool>,
        mut on_tick: F,
    ) -> u64
    where
        C: Clock + ?Sized,
        F: FnMut(&Self, &[DetectorOutcome<Transition>]) -> bool,
    {
        let mut rounds = 0u64;
        while !stop.load(Ordering::Relaxed) && ticks.is_none_or(|t| rounds < t) {
            let started = clock.now();
            let outcomes = self.tick_all();
            rounds += 1;
            if !on_tick(self, &outcomes) {
                break;
            }
            if !clock.sleep_remaining(started, period) {
                tracing::debug!(round = rounds, period_ms = period.as_millis() as u64, "tick overran its period");
            }
        }
        rounds
    }

    /// Close every detector and hand the transport back.
    pub fn close(mut self) -> (T, Vec<DetectorOutcome<()>>) {
        let outcomes = self
            .sessions
            .drain(..)
            .map(|s| {
                let index = s.index();
                (index, s.close(&mut self.transport))
            })
            .collect();
        (self.transport, outcomes)
    }
}

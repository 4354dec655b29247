//! Presence state machine.
//!
//! Every tick asks the host whether the target is running, refreshes the
//! cached hardware snapshot when needed and tells the sink to update or clear.
//! Ticks run strictly one after another, so the state needs no locking.

use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::hardware::{AcceleratorInfo, HardwareSnapshot};
use crate::model::ActiveModel;
use crate::presence::{PresenceRecord, PresenceSink};

/// Everything the monitor needs to know about the host, one call per sub-probe.
pub trait HostProbe {
    fn is_active(&mut self) -> bool;
    fn accelerator(&mut self) -> Option<AcceleratorInfo>;
    fn system_memory_gib(&mut self) -> Option<u64>;
    /// Must only be called while the target is confirmed running.
    fn target_version(&mut self) -> Option<String>;
    fn active_model(&mut self) -> Option<ActiveModel>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    NeverObserved,
    Stopped,
    Running,
}

/// Mutable memory of the state machine. Lives only as long as the monitor;
/// a restart always re-probes from scratch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MonitorState {
    /// `None` until the first detection.
    pub was_running: Option<bool>,
    /// True only while the sink was last told to `update`.
    pub presence_active: bool,
    pub consecutive_stopped_ticks: u32,
    pub hardware: Option<HardwareSnapshot>,
    /// Unix seconds of the first model observed in the current running streak.
    pub streak_started_at: Option<i64>,
}

impl MonitorState {
    pub fn run_state(&self) -> RunState {
        match self.was_running {
            None => RunState::NeverObserved,
            Some(false) => RunState::Stopped,
            Some(true) => RunState::Running,
        }
    }

    fn needs_hardware_refresh(&self) -> bool {
        self.hardware.as_ref().map_or(true, |h| !h.version_known())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Continue,
    /// The monitor has shut down and the loop must stop.
    Exit,
}

pub struct Monitor<H, S> {
    host: H,
    sink: S,
    state: MonitorState,
    large_image_key: String,
    auto_exit: bool,
    auto_exit_grace_ticks: u32,
    shut_down: bool,
}

impl<H: HostProbe, S: PresenceSink> Monitor<H, S> {
    pub fn new(config: &Config, host: H, sink: S) -> Self {
        Self {
            host,
            sink,
            state: MonitorState::default(),
            large_image_key: config.large_image_key.clone(),
            auto_exit: config.auto_exit,
            auto_exit_grace_ticks: config.auto_exit_grace_ticks,
            shut_down: false,
        }
    }

    pub fn state(&self) -> &MonitorState {
        &self.state
    }

    /// Performs one detection and the resulting refresh and sink calls.
    pub fn tick(&mut self, now: DateTime<Utc>) -> TickOutcome {
        if self.shut_down {
            return TickOutcome::Exit;
        }

        let running = self.host.is_active();
        log::debug!(
            "Detection result: target is {}",
            if running { "RUNNING" } else { "STOPPED" }
        );

        let previous = self.state.run_state();
        self.state.was_running = Some(running);

        if running {
            // Any running observation resets the debounce, transition or not.
            self.state.consecutive_stopped_ticks = 0;
            self.on_running(previous, now);
            return TickOutcome::Continue;
        }

        self.state.consecutive_stopped_ticks = self.state.consecutive_stopped_ticks.saturating_add(1);
        self.on_stopped(previous);

        if self.auto_exit && self.state.consecutive_stopped_ticks >= self.auto_exit_grace_ticks {
            log::info!(
                "Target stopped for {} consecutive checks, exiting",
                self.state.consecutive_stopped_ticks
            );
            self.shutdown();
            return TickOutcome::Exit;
        }
        TickOutcome::Continue
    }

    fn on_running(&mut self, previous: RunState, now: DateTime<Utc>) {
        match previous {
            RunState::NeverObserved => {
                log::info!("Initial state: target already running, showing presence");
                self.refresh_hardware();
            }
            RunState::Stopped => {
                log::info!("State change: target started, showing presence");
                self.refresh_hardware();
            }
            RunState::Running => {
                if self.state.needs_hardware_refresh() {
                    self.refresh_hardware();
                }
            }
        }

        let model = self.host.active_model();
        if model.is_some() && self.state.streak_started_at.is_none() {
            self.state.streak_started_at = Some(now.timestamp());
        }
        let start = model.as_ref().and(self.state.streak_started_at);

        let record = PresenceRecord::build(
            model.as_ref(),
            self.state.hardware.as_ref().unwrap_or(&HardwareSnapshot::default()),
            &self.large_image_key,
            start,
        );
        self.set_presence(&record);
    }

    fn on_stopped(&mut self, previous: RunState) {
        match previous {
            RunState::NeverObserved => log::info!("Initial state: target not running"),
            RunState::Running => {
                log::info!("State change: target stopped, hiding presence");
                self.state.streak_started_at = None;
                self.clear_presence();
            }
            RunState::Stopped => {
                if self.state.presence_active {
                    log::info!("Hiding presence, target confirmed stopped");
                    self.clear_presence();
                }
            }
        }
    }

    /// Replaces the snapshot wholesale. The version query is safe here because
    /// callers only refresh on ticks that observed the target running.
    fn refresh_hardware(&mut self) {
        let snapshot = HardwareSnapshot::new(
            self.host.accelerator(),
            self.host.system_memory_gib(),
            self.host.target_version(),
        );
        log::info!(
            "Hardware refreshed: GPU={}, RAM={}GB, Version={}",
            snapshot.accelerator_name.as_deref().unwrap_or("unknown"),
            snapshot
                .system_memory_gib
                .map_or_else(|| "unknown".to_string(), |g| g.to_string()),
            snapshot.target_version.as_deref().unwrap_or("unknown"),
        );
        self.state.hardware = Some(snapshot);
    }

    fn set_presence(&mut self, record: &PresenceRecord) {
        match self.sink.update(record) {
            Ok(()) => {
                if !self.state.presence_active {
                    log::info!("Rich Presence SET: {}", record.details);
                }
                self.state.presence_active = true;
            }
            Err(e) => {
                log::error!("{e}");
                self.state.presence_active = false;
            }
        }
    }

    fn clear_presence(&mut self) {
        match self.sink.clear() {
            Ok(()) => log::info!("Rich Presence CLEARED"),
            Err(e) => log::error!("{e}"),
        }
        self.state.presence_active = false;
    }

    /// Clears a visible presence and closes the sink. Safe to call repeatedly:
    /// only the first call has any effect.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;

        if self.state.presence_active {
            self.clear_presence();
        }
        self.sink.close();
        log::info!("Monitor stopped");
    }
}

/// Ticks every `interval` until auto-exit triggers or `shutdown` is cancelled,
/// then runs the monitor's shutdown path.
///
/// Ticks block on child processes and sockets, so they run through
/// `block_in_place`; this requires the multi-threaded runtime.
pub async fn run<H: HostProbe, S: PresenceSink>(
    monitor: &mut Monitor<H, S>,
    interval: Duration,
    shutdown: CancellationToken,
) {
    while !shutdown.is_cancelled() {
        let outcome = tokio::task::block_in_place(|| monitor.tick(Utc::now()));
        if outcome == TickOutcome::Exit {
            break;
        }

        tokio::select! {
            _ = shutdown.cancelled() => {
                log::info!("Shutdown requested");
                break;
            }
            _ = tokio::time::sleep(interval) => {}
        }
    }
    tokio::task::block_in_place(|| monitor.shutdown());
}

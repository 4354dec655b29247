//! Detection of the target service: a process-table scan with a local port
//! probe as fallback.

use std::io::ErrorKind;
use std::net::{Ipv4Addr, SocketAddr, TcpStream};
use std::time::Duration;
use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System, UpdateKind};
use thiserror::Error;

use crate::config::TargetConfig;

#[derive(Debug, Error)]
pub enum DetectError {
    #[error("process enumeration failed: {0}")]
    Enumeration(String),
    #[error("probe failed: {0}")]
    Probe(#[from] std::io::Error),
}

/// One way of telling whether the target is alive.
///
/// `Ok(false)` means "not seen by this strategy"; the detector then moves on
/// to the next one. Errors are treated the same way but logged.
pub trait DetectionStrategy {
    fn name(&self) -> &'static str;
    fn detect(&mut self) -> Result<bool, DetectError>;
}

/// Ordered fallback over detection strategies. The first strategy that reports
/// the target as running wins and later strategies are not consulted.
pub struct ProcessDetector {
    strategies: Vec<Box<dyn DetectionStrategy>>,
}

impl ProcessDetector {
    pub fn new(strategies: Vec<Box<dyn DetectionStrategy>>) -> Self {
        Self { strategies }
    }

    /// Process-table scan first, then the local port probe.
    pub fn for_target(target: &TargetConfig) -> Self {
        Self::new(vec![
            Box::new(ProcessTableScan::new(&target.process_match)),
            Box::new(PortProbe::localhost(target.port, target.port_timeout())),
        ])
    }

    pub fn is_active(&mut self) -> bool {
        for strategy in &mut self.strategies {
            match strategy.detect() {
                Ok(true) => {
                    log::debug!("Target detected by {}", strategy.name());
                    return true;
                }
                Ok(false) => log::debug!("Target not seen by {}", strategy.name()),
                Err(e) => log::warn!("Detection via {} failed: {e}", strategy.name()),
            }
        }
        false
    }
}

/// Minimal view of an OS process used for matching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
    pub exe: Option<String>,
}

impl ProcessInfo {
    /// True if the name or executable path contains `needle`. `needle` must be lowercase.
    pub fn matches(&self, needle: &str) -> bool {
        self.name.to_lowercase().contains(needle)
            || self
                .exe
                .as_deref()
                .is_some_and(|exe| exe.to_lowercase().contains(needle))
    }
}

/// Identifies the daemon's own process so the scan never reports itself. The
/// daemon's binary name contains the target's name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnProcess {
    pub pid: u32,
    pub exe: Option<String>,
}

impl OwnProcess {
    pub fn current() -> Self {
        Self {
            pid: std::process::id(),
            exe: std::env::current_exe()
                .ok()
                .map(|e| e.to_string_lossy().into_owned()),
        }
    }

    /// True for our own pid and for any other entry running our executable,
    /// such as a second daemon instance.
    fn is_self(&self, p: &ProcessInfo) -> bool {
        p.pid == self.pid || (self.exe.is_some() && p.exe == self.exe)
    }
}

/// Scans the OS process table for a process whose name or executable path
/// contains the configured substring (case-insensitive).
pub struct ProcessTableScan {
    sys: System,
    needle: String,
    own: OwnProcess,
}

impl ProcessTableScan {
    pub fn new(needle: &str) -> Self {
        Self {
            sys: System::new(),
            needle: needle.to_lowercase(),
            own: OwnProcess::current(),
        }
    }

    fn snapshot(&self) -> Vec<ProcessInfo> {
        self.sys
            .processes()
            .values()
            // Linux lists every thread under its own tid with the owner's exe.
            .filter(|p| p.thread_kind().is_none())
            .map(|p| ProcessInfo {
                pid: p.pid().as_u32(),
                name: p.name().to_string_lossy().into_owned(),
                // Unreadable executables (access denied) simply have no path.
                exe: p.exe().map(|e| e.to_string_lossy().into_owned()),
            })
            .collect()
    }
}

impl DetectionStrategy for ProcessTableScan {
    fn name(&self) -> &'static str {
        "process table"
    }

    fn detect(&mut self) -> Result<bool, DetectError> {
        // Names come with every refresh; only the executable path is requested on top.
        self.sys.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::new().with_exe(UpdateKind::OnlyIfNotSet),
        );

        let processes = self.snapshot();
        if processes.is_empty() {
            return Err(DetectError::Enumeration("no processes visible".into()));
        }

        let found = find_matches(&processes, &self.needle, &self.own);
        if found.is_empty() {
            return Ok(false);
        }
        log::debug!("Found {} matching process(es)", found.len());
        for p in &found {
            log::debug!("   PID: {}, Name: {}", p.pid, p.name);
        }
        Ok(true)
    }
}

/// Processes matching `needle`, excluding the daemon itself.
pub fn find_matches<'a>(
    processes: &'a [ProcessInfo],
    needle: &str,
    own: &OwnProcess,
) -> Vec<&'a ProcessInfo> {
    processes
        .iter()
        .filter(|p| !own.is_self(p) && p.matches(needle))
        .collect()
}

/// TCP connect probe against the target's local port. A successful connect
/// counts as running.
pub struct PortProbe {
    addr: SocketAddr,
    timeout: Duration,
}

impl PortProbe {
    pub fn new(addr: SocketAddr, timeout: Duration) -> Self {
        Self { addr, timeout }
    }

    pub fn localhost(port: u16, timeout: Duration) -> Self {
        Self::new(SocketAddr::from((Ipv4Addr::LOCALHOST, port)), timeout)
    }
}

impl DetectionStrategy for PortProbe {
    fn name(&self) -> &'static str {
        "port probe"
    }

    fn detect(&mut self) -> Result<bool, DetectError> {
        match TcpStream::connect_timeout(&self.addr, self.timeout) {
            Ok(_) => {
                log::debug!("Port {} is open", self.addr.port());
                Ok(true)
            }
            Err(e) if matches!(e.kind(), ErrorKind::ConnectionRefused | ErrorKind::TimedOut) => {
                log::debug!("Port {} is closed", self.addr.port());
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }
}

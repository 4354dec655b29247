use std::time::Duration;

use crate::command::{CommandRunner, SystemCommandRunner};
use crate::config::{split_command, Config};
use crate::hardware::{AcceleratorInfo, HardwareProbe};
use crate::model::{parse_active_model, ActiveModel};
use crate::monitor::HostProbe;
use crate::process_monitor::ProcessDetector;

/// [`HostProbe`] backed by the real OS: process table, local port, and the
/// target's own command-line tools.
pub struct SystemHost {
    detector: ProcessDetector,
    hardware: HardwareProbe<SystemCommandRunner>,
    runner: SystemCommandRunner,
    detection_command: Vec<String>,
    timeout: Duration,
}

impl SystemHost {
    pub fn new(config: &Config) -> Self {
        let timeout = config.target.command_timeout();
        Self {
            detector: ProcessDetector::for_target(&config.target),
            hardware: HardwareProbe::new(
                SystemCommandRunner,
                split_command(&config.target.version_command),
                timeout,
            ),
            runner: SystemCommandRunner,
            detection_command: split_command(&config.detection_command),
            timeout,
        }
    }
}

impl HostProbe for SystemHost {
    fn is_active(&mut self) -> bool {
        self.detector.is_active()
    }

    fn accelerator(&mut self) -> Option<AcceleratorInfo> {
        self.hardware.accelerator()
    }

    fn system_memory_gib(&mut self) -> Option<u64> {
        self.hardware.system_memory_gib()
    }

    fn target_version(&mut self) -> Option<String> {
        self.hardware.target_version()
    }

    fn active_model(&mut self) -> Option<ActiveModel> {
        let out = self.runner.run(&self.detection_command, self.timeout);
        match out.success_stdout() {
            Some(stdout) => parse_active_model(stdout),
            None => {
                log::debug!("Workload query returned nothing: {}", out.stderr);
                None
            }
        }
    }
}

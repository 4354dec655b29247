//! Best-effort host facts shown alongside the presence: accelerator, system
//! memory and the target's version. Every sub-probe tolerates its tool being
//! absent and reports `None` instead of failing.

use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;
use sysinfo::System;

use crate::command::CommandRunner;

const NVIDIA_QUERY: &[&str] = &[
    "nvidia-smi",
    "--query-gpu=name,memory.total",
    "--format=csv,noheader,nounits",
];

const WMIC_QUERY: &[&str] = &[
    "wmic",
    "path",
    "win32_VideoController",
    "get",
    "Name,AdapterRAM",
    "/format:list",
];

pub const UNKNOWN: &str = "unknown";

/// Version extractors, most specific first. The first one that matches wins.
static VERSION_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)ollama version is (.+)",
        r"(?i)version (.+)",
        r"(?i)v?(\d+\.\d+\.\d+)",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceleratorInfo {
    pub name: String,
    pub memory_mib: Option<u64>,
}

/// Cached bundle of host facts. Replaced wholesale on refresh, never patched
/// field by field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HardwareSnapshot {
    pub accelerator_name: Option<String>,
    pub accelerator_memory_mib: Option<u64>,
    pub system_memory_gib: Option<u64>,
    pub target_version: Option<String>,
}

impl HardwareSnapshot {
    pub fn new(
        accelerator: Option<AcceleratorInfo>,
        system_memory_gib: Option<u64>,
        target_version: Option<String>,
    ) -> Self {
        let (accelerator_name, accelerator_memory_mib) = match accelerator {
            Some(a) => (Some(a.name), a.memory_mib),
            None => (None, None),
        };
        Self {
            accelerator_name,
            accelerator_memory_mib,
            system_memory_gib,
            target_version,
        }
    }

    /// False while the version is missing or the literal `unknown` marker.
    pub fn version_known(&self) -> bool {
        self.target_version
            .as_deref()
            .is_some_and(|v| !v.is_empty() && v != UNKNOWN)
    }

    pub fn brand(&self) -> GpuBrand {
        GpuBrand::classify(self.accelerator_name.as_deref())
    }
}

/// Coarse accelerator vendor, used only to pick the small presence icon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpuBrand {
    Nvidia,
    Amd,
    Intel,
    Generic,
}

impl GpuBrand {
    pub fn classify(name: Option<&str>) -> Self {
        let Some(name) = name else {
            return GpuBrand::Generic;
        };
        let name = name.to_lowercase();
        let has_any = |keywords: &[&str]| keywords.iter().any(|k| name.contains(k));

        if has_any(&["nvidia", "geforce", "rtx", "gtx"]) {
            GpuBrand::Nvidia
        } else if has_any(&["amd", "radeon", "rx"]) {
            GpuBrand::Amd
        } else if has_any(&["intel", "iris", "uhd"]) {
            GpuBrand::Intel
        } else {
            GpuBrand::Generic
        }
    }

    /// Asset key of the matching icon.
    pub fn as_str(self) -> &'static str {
        match self {
            GpuBrand::Nvidia => "nvidia",
            GpuBrand::Amd => "amd",
            GpuBrand::Intel => "intel",
            GpuBrand::Generic => "gpu",
        }
    }
}

/// Runs the individual hardware and version queries.
pub struct HardwareProbe<R> {
    runner: R,
    version_command: Vec<String>,
    timeout: Duration,
}

impl<R: CommandRunner> HardwareProbe<R> {
    pub fn new(runner: R, version_command: Vec<String>, timeout: Duration) -> Self {
        Self {
            runner,
            version_command,
            timeout,
        }
    }

    /// Vendor CSV query first, then the OS-specific secondary source.
    pub fn accelerator(&self) -> Option<AcceleratorInfo> {
        let out = self.runner.run(&to_argv(NVIDIA_QUERY), self.timeout);
        if let Some(info) = out.success_stdout().and_then(parse_vendor_csv) {
            return Some(info);
        }
        log::debug!("Vendor accelerator query unavailable: {}", out.stderr);

        if cfg!(windows) {
            let out = self.runner.run(&to_argv(WMIC_QUERY), self.timeout);
            if let Some(info) = out.success_stdout().and_then(parse_wmic_list) {
                return Some(info);
            }
            log::debug!("Secondary accelerator query unavailable: {}", out.stderr);
        }
        None
    }

    pub fn system_memory_gib(&self) -> Option<u64> {
        let mut sys = System::new();
        sys.refresh_memory();
        gib_from_bytes(sys.total_memory())
    }

    /// Asks the target for its version. Only call this once the target is
    /// known to be running: the query could otherwise start it.
    pub fn target_version(&self) -> Option<String> {
        let out = self.runner.run(&self.version_command, self.timeout);
        match out.success_stdout() {
            Some(stdout) => Some(parse_version(stdout)),
            None => {
                log::warn!("Version query failed: {}", out.stderr);
                None
            }
        }
    }
}

fn to_argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

/// Parses the first line of `name, memory.total` vendor CSV output. The memory
/// column keeps only its digits; if none remain the name is still returned.
pub fn parse_vendor_csv(stdout: &str) -> Option<AcceleratorInfo> {
    let line = stdout.lines().map(str::trim).find(|l| !l.is_empty())?;
    let mut parts = line.split(',').map(str::trim);

    let name = parts.next().filter(|n| !n.is_empty())?.to_string();
    let memory_mib = parts.next().and_then(|mem| {
        let digits: String = mem.chars().filter(char::is_ascii_digit).collect();
        digits.parse().ok()
    });
    Some(AcceleratorInfo { name, memory_mib })
}

/// Parses `wmic ... /format:list` output (`Key=Value` lines). The first
/// adapter listed wins.
pub fn parse_wmic_list(stdout: &str) -> Option<AcceleratorInfo> {
    let mut name: Option<String> = None;
    let mut adapter_ram: Option<u64> = None;

    for line in stdout.lines().map(str::trim) {
        if let Some(v) = line.strip_prefix("Name=") {
            if name.is_none() && !v.trim().is_empty() {
                name = Some(v.trim().to_string());
            }
        } else if let Some(v) = line.strip_prefix("AdapterRAM=") {
            if adapter_ram.is_none() {
                adapter_ram = v.trim().parse().ok();
            }
        }
    }

    let memory_mib = adapter_ram
        .filter(|&b| b > 0)
        .map(|b| (b as f64 / (1024.0 * 1024.0)).round() as u64);
    name.map(|name| AcceleratorInfo { name, memory_mib })
}

/// Converts a byte count into whole GiB, rounded to nearest. Zero means unknown.
pub fn gib_from_bytes(bytes: u64) -> Option<u64> {
    if bytes == 0 {
        return None;
    }
    Some((bytes as f64 / (1024.0 * 1024.0 * 1024.0)).round() as u64)
}

/// Extracts a version token from version-query output. Falls back to the raw
/// first line, or `unknown` when there is no output at all.
pub fn parse_version(stdout: &str) -> String {
    let stdout = stdout.trim();
    for pattern in VERSION_PATTERNS.iter() {
        if let Some(m) = pattern.captures(stdout).and_then(|c| c.get(1)) {
            return m.as_str().trim().to_string();
        }
    }
    stdout
        .lines()
        .next()
        .filter(|l| !l.is_empty())
        .unwrap_or(UNKNOWN)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandOutput;
    use std::cell::RefCell;
    use std::collections::HashMap;

    /// Answers by program name and records every program invoked.
    #[derive(Default)]
    struct ScriptedRunner {
        outputs: HashMap<String, CommandOutput>,
        calls: RefCell<Vec<String>>,
    }

    impl ScriptedRunner {
        fn with(mut self, program: &str, ok: bool, stdout: &str) -> Self {
            self.outputs.insert(
                program.to_string(),
                CommandOutput {
                    ok,
                    stdout: stdout.to_string(),
                    stderr: String::new(),
                },
            );
            self
        }
    }

    impl CommandRunner for ScriptedRunner {
        fn run(&self, argv: &[String], _timeout: Duration) -> CommandOutput {
            let program = argv.first().cloned().unwrap_or_default();
            self.calls.borrow_mut().push(program.clone());
            self.outputs
                .get(&program)
                .cloned()
                .unwrap_or_else(|| CommandOutput::failed("not found"))
        }
    }

    fn probe(runner: ScriptedRunner) -> HardwareProbe<ScriptedRunner> {
        HardwareProbe::new(
            runner,
            vec!["ollama".into(), "--version".into()],
            Duration::from_secs(1),
        )
    }

    // ── vendor CSV ────────────────────────────────────────────────────────────

    #[test]
    fn vendor_csv_parses_name_and_memory() {
        let info = parse_vendor_csv("NVIDIA GeForce RTX 4090, 24564\n").unwrap();
        assert_eq!(info.name, "NVIDIA GeForce RTX 4090");
        assert_eq!(info.memory_mib, Some(24564));
    }

    #[test]
    fn vendor_csv_uses_first_gpu_only() {
        let info = parse_vendor_csv("RTX A6000, 49140\nRTX A4000, 16376").unwrap();
        assert_eq!(info.name, "RTX A6000");
        assert_eq!(info.memory_mib, Some(49140));
    }

    #[test]
    fn vendor_csv_strips_units_from_memory() {
        let info = parse_vendor_csv("Tesla T4, 15360 MiB").unwrap();
        assert_eq!(info.memory_mib, Some(15360));
    }

    #[test]
    fn vendor_csv_keeps_name_when_memory_unparseable() {
        let info = parse_vendor_csv("Tesla T4, [N/A]").unwrap();
        assert_eq!(info.name, "Tesla T4");
        assert_eq!(info.memory_mib, None);

        let info = parse_vendor_csv("Tesla T4").unwrap();
        assert_eq!(info.memory_mib, None);
    }

    #[test]
    fn vendor_csv_empty_is_none() {
        assert!(parse_vendor_csv("").is_none());
        assert!(parse_vendor_csv(" , 1024").is_none());
    }

    // ── wmic list ─────────────────────────────────────────────────────────────

    #[test]
    fn wmic_list_parses_name_and_adapter_ram() {
        let out = "\r\nAdapterRAM=4293918720\r\nName=AMD Radeon RX 6800\r\n\r\n";
        let info = parse_wmic_list(out).unwrap();
        assert_eq!(info.name, "AMD Radeon RX 6800");
        assert_eq!(info.memory_mib, Some(4095));
    }

    #[test]
    fn wmic_list_without_name_is_none() {
        assert!(parse_wmic_list("AdapterRAM=1024\n").is_none());
    }

    #[test]
    fn wmic_list_zero_ram_is_unknown() {
        let info = parse_wmic_list("AdapterRAM=0\nName=Intel(R) UHD Graphics 630\n").unwrap();
        assert_eq!(info.memory_mib, None);
    }

    // ── memory ────────────────────────────────────────────────────────────────

    #[test]
    fn gib_rounds_to_nearest() {
        let gib = 1024 * 1024 * 1024;
        assert_eq!(gib_from_bytes(16 * gib), Some(16));
        assert_eq!(gib_from_bytes(15 * gib + gib / 2 + 1), Some(16));
        assert_eq!(gib_from_bytes(15 * gib + gib / 4), Some(15));
        assert_eq!(gib_from_bytes(0), None);
    }

    // ── version ───────────────────────────────────────────────────────────────

    #[test]
    fn version_prefers_full_phrase() {
        assert_eq!(parse_version("ollama version is 0.3.12"), "0.3.12");
        assert_eq!(parse_version("Ollama Version Is 0.5.1\n"), "0.5.1");
    }

    #[test]
    fn version_falls_back_to_generic_phrase() {
        assert_eq!(parse_version("client version 1.2"), "1.2");
    }

    #[test]
    fn version_falls_back_to_semver_token() {
        assert_eq!(parse_version("build v0.1.32-rc1"), "0.1.32");
    }

    #[test]
    fn version_without_match_returns_first_line() {
        assert_eq!(parse_version("dev build\nsecond line"), "dev build");
    }

    #[test]
    fn version_empty_is_unknown() {
        assert_eq!(parse_version("   "), UNKNOWN);
    }

    // ── brand ─────────────────────────────────────────────────────────────────

    #[test]
    fn brand_classification() {
        assert_eq!(GpuBrand::classify(Some("NVIDIA RTX 4090")), GpuBrand::Nvidia);
        assert_eq!(GpuBrand::classify(Some("GeForce GTX 1080")), GpuBrand::Nvidia);
        assert_eq!(GpuBrand::classify(Some("AMD Radeon RX 7900")), GpuBrand::Amd);
        assert_eq!(GpuBrand::classify(Some("Intel Iris Xe")), GpuBrand::Intel);
        assert_eq!(GpuBrand::classify(Some("Apple M2")), GpuBrand::Generic);
        assert_eq!(GpuBrand::classify(None), GpuBrand::Generic);
    }

    #[test]
    fn brand_asset_keys() {
        assert_eq!(GpuBrand::Nvidia.as_str(), "nvidia");
        assert_eq!(GpuBrand::Amd.as_str(), "amd");
        assert_eq!(GpuBrand::Intel.as_str(), "intel");
        assert_eq!(GpuBrand::Generic.as_str(), "gpu");
    }

    // ── snapshot ──────────────────────────────────────────────────────────────

    #[test]
    fn snapshot_version_known() {
        let mut s = HardwareSnapshot::default();
        assert!(!s.version_known());
        s.target_version = Some(UNKNOWN.into());
        assert!(!s.version_known());
        s.target_version = Some("0.3.12".into());
        assert!(s.version_known());
    }

    #[test]
    fn snapshot_from_accelerator() {
        let s = HardwareSnapshot::new(
            Some(AcceleratorInfo {
                name: "NVIDIA RTX 4090".into(),
                memory_mib: Some(24576),
            }),
            Some(64),
            None,
        );
        assert_eq!(s.accelerator_name.as_deref(), Some("NVIDIA RTX 4090"));
        assert_eq!(s.accelerator_memory_mib, Some(24576));
        assert_eq!(s.brand(), GpuBrand::Nvidia);
    }

    // ── probe ─────────────────────────────────────────────────────────────────

    #[test]
    fn accelerator_uses_vendor_query_when_available() {
        let p = probe(ScriptedRunner::default().with("nvidia-smi", true, "NVIDIA RTX 4090, 24576"));
        let info = p.accelerator().unwrap();
        assert_eq!(info.name, "NVIDIA RTX 4090");
        assert_eq!(info.memory_mib, Some(24576));
        assert_eq!(*p.runner.calls.borrow(), vec!["nvidia-smi".to_string()]);
    }

    #[cfg(not(windows))]
    #[test]
    fn accelerator_absent_when_vendor_tool_missing() {
        let p = probe(ScriptedRunner::default());
        assert!(p.accelerator().is_none());
    }

    #[cfg(windows)]
    #[test]
    fn accelerator_falls_back_to_wmic() {
        let p = probe(ScriptedRunner::default().with(
            "wmic",
            true,
            "AdapterRAM=8589934592\r\nName=AMD Radeon RX 6600\r\n",
        ));
        let info = p.accelerator().unwrap();
        assert_eq!(info.name, "AMD Radeon RX 6600");
        assert_eq!(info.memory_mib, Some(8192));
    }

    #[test]
    fn target_version_parses_command_output() {
        let p = probe(ScriptedRunner::default().with("ollama", true, "ollama version is 0.4.0"));
        assert_eq!(p.target_version().as_deref(), Some("0.4.0"));
    }

    #[test]
    fn target_version_failure_is_none() {
        let p = probe(ScriptedRunner::default().with("ollama", false, ""));
        assert_eq!(p.target_version(), None);
    }
}

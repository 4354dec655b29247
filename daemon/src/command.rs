//! Bounded execution of external commands.
//!
//! Commands are executed from an argument vector, never through a shell.

use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;
use wait_timeout::ChildExt;

/// How long to wait for the pipe readers after the child has exited or been killed.
const OUTPUT_COLLECTION_TIMEOUT: Duration = Duration::from_secs(2);

/// Result of running an external command. Both streams are trimmed.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    /// True only when the command exited with status zero within its timeout.
    pub ok: bool,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn failed(stderr: impl Into<String>) -> Self {
        Self {
            ok: false,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Stdout of a successful run that produced output, otherwise `None`.
    pub fn success_stdout(&self) -> Option<&str> {
        (self.ok && !self.stdout.is_empty()).then_some(self.stdout.as_str())
    }
}

/// Runs external commands on behalf of the probes.
pub trait CommandRunner {
    /// Runs `argv` and waits at most `timeout`. Never fails: spawn errors and
    /// timeouts are reported through `ok = false` and `stderr`.
    fn run(&self, argv: &[String], timeout: Duration) -> CommandOutput;
}

/// [`CommandRunner`] backed by real OS processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemCommandRunner;

impl CommandRunner for SystemCommandRunner {
    fn run(&self, argv: &[String], timeout: Duration) -> CommandOutput {
        let Some((program, args)) = argv.split_first() else {
            return CommandOutput::failed("Empty command");
        };

        let mut child = match Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
        {
            Ok(c) => c,
            Err(e) => return CommandOutput::failed(format!("Failed to spawn {program}: {e}")),
        };

        // Drain both pipes while waiting so a chatty child cannot block on a full pipe.
        let stdout_rx = spawn_reader(child.stdout.take());
        let stderr_rx = spawn_reader(child.stderr.take());

        let status = match child.wait_timeout(timeout) {
            Ok(Some(status)) => Some(status),
            Ok(None) => {
                kill_child_process(&mut child);
                None
            }
            Err(e) => {
                kill_child_process(&mut child);
                return CommandOutput::failed(format!("Failed to wait for {program}: {e}"));
            }
        };

        let stdout = stdout_rx
            .recv_timeout(OUTPUT_COLLECTION_TIMEOUT)
            .unwrap_or_default();
        let stderr = stderr_rx
            .recv_timeout(OUTPUT_COLLECTION_TIMEOUT)
            .unwrap_or_default();

        match status {
            Some(status) => CommandOutput {
                ok: status.success(),
                stdout: stdout.trim().to_string(),
                stderr: stderr.trim().to_string(),
            },
            None => CommandOutput {
                ok: false,
                stdout: stdout.trim().to_string(),
                stderr: format!("Command timeout after {}ms", timeout.as_millis()),
            },
        }
    }
}

fn spawn_reader<R: Read + Send + 'static>(stream: Option<R>) -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel();
    match stream {
        Some(mut stream) => {
            thread::spawn(move || {
                let mut buf = Vec::new();
                let _ = stream.read_to_end(&mut buf);
                let _ = tx.send(String::from_utf8_lossy(&buf).into_owned());
            });
        }
        None => {
            let _ = tx.send(String::new());
        }
    }
    rx
}

/// Kills the child and reaps it. Errors are ignored since the process may already be gone.
fn kill_child_process(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

/// Starts `argv` in the background with all stdio detached and does not wait for it.
pub fn spawn_detached(argv: &[String]) -> std::io::Result<()> {
    let Some((program, args)) = argv.split_first() else {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "empty command",
        ));
    };
    Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn empty_argv_fails_without_spawning() {
        let out = SystemCommandRunner.run(&[], Duration::from_secs(1));
        assert!(!out.ok);
        assert_eq!(out.stderr, "Empty command");
    }

    #[test]
    fn missing_program_reports_spawn_failure() {
        let out = SystemCommandRunner.run(
            &argv(&["definitely-not-a-real-program-xyz"]),
            Duration::from_secs(1),
        );
        assert!(!out.ok);
        assert!(out.stderr.contains("Failed to spawn"));
        assert!(out.stdout.is_empty());
    }

    #[test]
    fn success_stdout_requires_ok_and_output() {
        let ok = CommandOutput {
            ok: true,
            stdout: "x".into(),
            stderr: String::new(),
        };
        assert_eq!(ok.success_stdout(), Some("x"));
        let empty = CommandOutput {
            ok: true,
            ..CommandOutput::default()
        };
        assert_eq!(empty.success_stdout(), None);
        let failed = CommandOutput {
            ok: false,
            stdout: "x".into(),
            stderr: String::new(),
        };
        assert_eq!(failed.success_stdout(), None);
    }

    #[cfg(unix)]
    #[test]
    fn captures_and_trims_both_streams() {
        let out = SystemCommandRunner.run(
            &argv(&["sh", "-c", "echo '  hello  '; echo oops >&2"]),
            Duration::from_secs(5),
        );
        assert!(out.ok);
        assert_eq!(out.stdout, "hello");
        assert_eq!(out.stderr, "oops");
    }

    #[cfg(unix)]
    #[test]
    fn arguments_are_not_shell_interpreted() {
        let out = SystemCommandRunner.run(&argv(&["echo", "$HOME", "a;b"]), Duration::from_secs(5));
        assert!(out.ok);
        assert_eq!(out.stdout, "$HOME a;b");
    }

    #[cfg(unix)]
    #[test]
    fn nonzero_exit_is_not_ok() {
        let out = SystemCommandRunner.run(&argv(&["sh", "-c", "exit 3"]), Duration::from_secs(5));
        assert!(!out.ok);
    }

    #[cfg(unix)]
    #[test]
    fn timeout_kills_child_and_reports() {
        let start = std::time::Instant::now();
        let out = SystemCommandRunner.run(&argv(&["sleep", "10"]), Duration::from_millis(200));
        assert!(!out.ok);
        assert!(out.stderr.contains("timeout"));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn spawn_detached_rejects_empty_command() {
        assert!(spawn_detached(&[]).is_err());
    }
}

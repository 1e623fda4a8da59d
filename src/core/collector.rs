//! Captured emulator output

use std::io;
use std::process::{Child, ExitStatus};

use tracing::debug;

/// Everything the emulator printed during a session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedOutput {
    /// Standard output, decoded lossily as UTF-8
    pub stdout: String,
    /// Standard error, decoded lossily as UTF-8
    pub stderr: String,
    /// Exit status of the emulator, if it was reaped
    pub status: Option<ExitStatus>,
}

impl CapturedOutput {
    pub fn is_empty(&self) -> bool {
        self.stdout.is_empty() && self.stderr.is_empty()
    }
}

/// Read both output pipes to end-of-stream and reap the child.
///
/// The child must already have been stopped; this blocks until every writer
/// of the pipes has gone away.
///
/// Nothing reads the pipes while the session runs, so a guest that prints
/// more than one pipe buffer (64 KiB on Linux) before quitting stalls on its
/// write, gets signalled, and only the buffered prefix is returned. A verbose
/// `make qemu-nox` build can get close to that.
pub fn drain(child: Child) -> io::Result<CapturedOutput> {
    let output = child.wait_with_output()?;
    debug!(
        stdout_bytes = output.stdout.len(),
        stderr_bytes = output.stderr.len(),
        "Drained emulator output"
    );

    Ok(CapturedOutput {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        status: Some(output.status),
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::process::{Command, Stdio};

    #[test]
    fn test_drain_decodes_both_streams() {
        let child = Command::new("sh")
            .args(["-c", "printf 'out\\n'; printf 'err\\n' >&2; exit 3"])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .unwrap();

        let output = drain(child).unwrap();
        assert_eq!(output.stdout, "out\n");
        assert_eq!(output.stderr, "err\n");
        assert_eq!(output.status.and_then(|s| s.code()), Some(3));
    }

    #[test]
    fn test_drain_invalid_utf8_is_lossy() {
        let child = Command::new("sh")
            .args(["-c", "printf 'a\\377b'"])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .unwrap();

        let output = drain(child).unwrap();
        assert_eq!(output.stdout, "a\u{FFFD}b");
        assert!(output.stderr.is_empty());
    }
}

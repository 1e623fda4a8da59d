//! Emulator process handle
//!
//! Launches the emulator with all three standard streams piped and, on Unix,
//! in a session of its own. The whole process group is the unit that gets
//! stopped, so an emulator started through a wrapper (`make`, a shell script)
//! goes down together with the wrapper.

use std::io;
use std::path::PathBuf;
use std::process::{Child, ChildStdin, Command, Stdio};

use thiserror::Error;
use tracing::{debug, info, warn};

use super::collector::{self, CapturedOutput};

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Empty emulator command line")]
    EmptyCommand,

    #[error("Working directory does not exist: {}", .0.display())]
    MissingWorkingDir(PathBuf),

    #[error("Failed to launch `{program}`: {source}")]
    LaunchFailure {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("Session already owns an emulator process")]
    AlreadyLaunched,

    #[error("Emulator console input is closed")]
    InputClosed,

    #[error("Failed to write to emulator console: {0}")]
    WriteFailure(#[source] io::Error),

    #[error("Failed to signal emulator process group: {0}")]
    Signal(#[source] io::Error),

    #[error("Failed to wait for emulator: {0}")]
    Wait(#[source] io::Error),

    #[error("Failed to collect emulator output: {0}")]
    Collect(#[source] io::Error),
}

pub type Result<T> = std::result::Result<T, ProcessError>;

/// What to run and where
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
}

impl LaunchSpec {
    /// Build from an argument vector; the first element is the program
    pub fn from_argv(argv: &[String], working_dir: impl Into<PathBuf>) -> Result<Self> {
        let (program, args) = argv.split_first().ok_or(ProcessError::EmptyCommand)?;
        if program.is_empty() {
            return Err(ProcessError::EmptyCommand);
        }

        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            working_dir: working_dir.into(),
        })
    }

    /// Full command line, for logs
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Signals the harness sends to the emulator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stop {
    Graceful,
    Forceful,
}

/// A running emulator and its pipes
pub struct EmulatorProcess {
    /// Taken by `collect`
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    pid: u32,
}

impl EmulatorProcess {
    /// Spawn the emulator described by `spec`
    pub fn spawn(spec: &LaunchSpec) -> Result<Self> {
        if !spec.working_dir.is_dir() {
            return Err(ProcessError::MissingWorkingDir(spec.working_dir.clone()));
        }

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .current_dir(&spec.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        detach(&mut command);

        let mut child = command.spawn().map_err(|source| ProcessError::LaunchFailure {
            program: spec.program.clone(),
            source,
        })?;
        let stdin = child.stdin.take();
        let pid = child.id();

        info!(pid, "Started emulator: {}", spec.display());

        Ok(Self {
            child: Some(child),
            stdin,
            pid,
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Console input stream
    pub fn input(&mut self) -> Result<&mut ChildStdin> {
        self.stdin.as_mut().ok_or(ProcessError::InputClosed)
    }

    /// Check if the emulator has exited, reaping it if so
    pub fn has_exited(&mut self) -> Result<bool> {
        match self.child.as_mut() {
            Some(child) => child
                .try_wait()
                .map(|status| status.is_some())
                .map_err(ProcessError::Wait),
            None => Ok(true),
        }
    }

    /// Ask the process group to stop
    pub fn request_stop(&mut self) -> Result<()> {
        info!(pid = self.pid, "Requesting emulator stop");
        self.signal(Stop::Graceful)
    }

    /// Kill the process group and block until the emulator is reaped
    pub fn force_stop(&mut self) -> Result<()> {
        warn!(pid = self.pid, "Killing emulator process group");
        self.signal(Stop::Forceful)?;
        if let Some(child) = self.child.as_mut() {
            child.wait().map_err(ProcessError::Wait)?;
        }
        Ok(())
    }

    /// Close the console and read everything the emulator printed.
    ///
    /// Any process left in the group is killed first so nothing can keep the
    /// pipes open. Returns empty output if already collected.
    pub fn collect(&mut self) -> Result<CapturedOutput> {
        self.stdin.take();

        // The leader may already be reaped here. Its pid stays the group id
        // while any member lives; if the whole group is gone the kill reports
        // ESRCH. Only a pid recycled into a fresh session leader in between
        // could be hit, which is accepted.
        self.signal(Stop::Forceful)?;
        match self.child.take() {
            Some(child) => collector::drain(child).map_err(ProcessError::Collect),
            None => Ok(CapturedOutput::default()),
        }
    }

    fn signal(&mut self, stop: Stop) -> Result<()> {
        match self.child.as_mut() {
            Some(child) => signal_group(child, self.pid, stop).map_err(ProcessError::Signal),
            None => Ok(()),
        }
    }
}

impl Drop for EmulatorProcess {
    fn drop(&mut self) {
        self.stdin.take();

        if let Some(mut child) = self.child.take() {
            if let Err(e) = signal_group(&mut child, self.pid, Stop::Forceful) {
                warn!("Failed to kill emulator on drop: {}", e);
            }
            let _ = child.wait();
            debug!(pid = self.pid, "Emulator reaped on drop");
        }
    }
}

/// Put the child in its own session, leading a new process group
#[cfg(unix)]
fn detach(command: &mut Command) {
    use std::os::unix::process::CommandExt;

    // Safety: setsid is async-signal-safe and touches no parent memory
    unsafe {
        command.pre_exec(|| {
            if libc::setsid() == -1 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        });
    }
}

#[cfg(not(unix))]
fn detach(_command: &mut Command) {}

#[cfg(unix)]
fn signal_group(_child: &mut Child, pid: u32, stop: Stop) -> io::Result<()> {
    let signal = match stop {
        Stop::Graceful => libc::SIGTERM,
        Stop::Forceful => libc::SIGKILL,
    };
    let pgid = libc::pid_t::try_from(pid)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;

    // Safety: plain syscall; a negative pid addresses the process group
    if unsafe { libc::kill(-pgid, signal) } == -1 {
        let err = io::Error::last_os_error();
        // Whole group already gone
        if err.raw_os_error() == Some(libc::ESRCH) {
            return Ok(());
        }
        return Err(err);
    }
    Ok(())
}

#[cfg(not(unix))]
fn signal_group(child: &mut Child, _pid: u32, _stop: Stop) -> io::Result<()> {
    match child.kill() {
        // Already exited
        Err(e) if e.kind() == io::ErrorKind::InvalidInput => Ok(()),
        other => other,
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::io::Write;
    use std::thread;
    use std::time::Duration;

    fn sh(script: &str) -> LaunchSpec {
        LaunchSpec::from_argv(
            &["sh".to_string(), "-c".to_string(), script.to_string()],
            std::env::temp_dir(),
        )
        .unwrap()
    }

    #[test]
    fn test_from_argv() {
        let argv = vec!["make".to_string(), "qemu-nox".to_string()];
        let spec = LaunchSpec::from_argv(&argv, "/tmp").unwrap();
        assert_eq!(spec.program, "make");
        assert_eq!(spec.args, ["qemu-nox"]);
        assert_eq!(spec.display(), "make qemu-nox");

        assert!(matches!(
            LaunchSpec::from_argv(&[], "/tmp"),
            Err(ProcessError::EmptyCommand)
        ));
    }

    #[test]
    fn test_missing_binary_is_launch_failure() {
        let spec = LaunchSpec::from_argv(&["/nonexistent/keyfeed-emulator".to_string()], "/").unwrap();
        assert!(matches!(
            EmulatorProcess::spawn(&spec),
            Err(ProcessError::LaunchFailure { .. })
        ));
    }

    #[test]
    fn test_missing_working_dir() {
        let mut spec = sh("true");
        spec.working_dir = PathBuf::from("/nonexistent/keyfeed-dir");
        assert!(matches!(
            EmulatorProcess::spawn(&spec),
            Err(ProcessError::MissingWorkingDir(_))
        ));
    }

    #[test]
    fn test_child_leads_its_own_session() {
        let mut process = EmulatorProcess::spawn(&sh("sleep 5")).unwrap();
        let pid = process.pid() as libc::pid_t;

        // Give the child time to get past exec
        thread::sleep(Duration::from_millis(100));
        let sid = unsafe { libc::getsid(pid) };
        assert_eq!(sid, pid);
        assert_ne!(sid, unsafe { libc::getsid(0) });

        process.force_stop().unwrap();
        assert!(process.has_exited().unwrap());
    }

    #[test]
    fn test_echo_through_pipes() {
        let mut process = EmulatorProcess::spawn(&sh("head -n 1")).unwrap();
        process.input().unwrap().write_all(b"ping\n").unwrap();
        thread::sleep(Duration::from_millis(200));

        let output = process.collect().unwrap();
        assert_eq!(output.stdout, "ping\n");
        assert_eq!(output.status.and_then(|s| s.code()), Some(0));
    }

    #[test]
    fn test_graceful_stop_reaches_grandchildren() {
        let mut process = EmulatorProcess::spawn(&sh("sleep 30 & wait")).unwrap();
        thread::sleep(Duration::from_millis(100));

        process.request_stop().unwrap();
        thread::sleep(Duration::from_millis(200));
        assert!(process.has_exited().unwrap());

        // Pipes must hit end-of-stream: the backgrounded sleep is gone too
        let output = process.collect().unwrap();
        assert!(output.is_empty());
    }

    #[test]
    fn test_collect_twice_is_empty_second_time() {
        let mut process = EmulatorProcess::spawn(&sh("echo booted")).unwrap();
        thread::sleep(Duration::from_millis(100));

        let first = process.collect().unwrap();
        assert_eq!(first.stdout, "booted\n");

        let second = process.collect().unwrap();
        assert_eq!(second, CapturedOutput::default());
        assert!(matches!(process.input(), Err(ProcessError::InputClosed)));
    }

    #[test]
    fn test_collect_after_leader_exited() {
        let mut process = EmulatorProcess::spawn(&sh("exit 0")).unwrap();
        for _ in 0..50 {
            if process.has_exited().unwrap() {
                break;
            }
            thread::sleep(Duration::from_millis(20));
        }
        assert!(process.has_exited().unwrap());

        // The sweep finds no group left and must not turn that into an error
        let output = process.collect().unwrap();
        assert!(output.is_empty());
        assert_eq!(output.status.and_then(|s| s.code()), Some(0));
    }

    /// State letter and process group from `/proc/<pid>/stat`, or `None`
    /// once the pid has been reaped.
    fn proc_state(pid: u32) -> Option<(char, i32)> {
        let stat = std::fs::read_to_string(format!("/proc/{}/stat", pid)).ok()?;
        // The command name may contain spaces, so split after its closing paren
        let rest = &stat[stat.rfind(')')? + 1..];
        let mut fields = rest.split_whitespace();
        let state = fields.next()?.chars().next()?;
        let _ppid = fields.next()?;
        let pgrp = fields.next()?.parse().ok()?;
        Some((state, pgrp))
    }

    #[test]
    fn test_drop_kills_and_reaps_group() {
        let mut process = EmulatorProcess::spawn(&sh("sleep 30 & echo $!; wait")).unwrap();
        let pgid = process.pid();

        let mut line = String::new();
        {
            use std::io::{BufRead, BufReader};
            let stdout = process.child.as_mut().and_then(|c| c.stdout.as_mut()).unwrap();
            BufReader::new(stdout).read_line(&mut line).unwrap();
        }
        let sleeper: u32 = line.trim().parse().unwrap();
        assert_eq!(proc_state(sleeper).map(|(_, pgrp)| pgrp), Some(pgid as i32));

        drop(process);

        // The leader is waited on by Drop and must be gone entirely
        assert_eq!(proc_state(pgid), None);

        // The orphaned sleeper is reparented; it may linger as a zombie when
        // init does not reap, but it must not be running
        let mut alive = true;
        for _ in 0..50 {
            match proc_state(sleeper) {
                None | Some(('Z', _)) | Some(('X', _)) => {
                    alive = false;
                    break;
                }
                Some(_) => thread::sleep(Duration::from_millis(20)),
            }
        }
        assert!(!alive, "background sleep survived drop");

        let group_alive = unsafe { libc::kill(-(pgid as i32), 0) } == 0;
        if group_alive {
            // Only unreaped zombies may remain in the group
            assert!(matches!(proc_state(sleeper), None | Some(('Z', _)) | Some(('X', _))));
        }
    }
}

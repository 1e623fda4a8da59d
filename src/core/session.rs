//! Session management
//!
//! One session is one emulator run: launch, type the script, quit, collect.
//! Only a failed launch is reported as an error; anything that goes wrong
//! afterwards downgrades to a forced stop and whatever output was captured.

use tracing::{error, info, warn};

use super::collector::CapturedOutput;
use super::process::{EmulatorProcess, LaunchSpec, ProcessError};
use super::script::Script;
use super::sequencer::Sequencer;
use super::termination::{self, Shutdown};
use super::timing::TimingPolicy;

/// Lifecycle of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    NotStarted,
    Running,
    TerminatedCleanly,
    TerminatedForcibly,
    Failed,
}

/// Result tag carried next to the captured output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The emulator quit on its own after the script
    CleanExit,
    /// The harness had to stop the emulator
    ForcedExit,
    /// The emulator never started
    LaunchFailed(String),
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::CleanExit => "clean exit",
            Outcome::ForcedExit => "forced exit",
            Outcome::LaunchFailed(_) => "launch failed",
        }
    }
}

/// Final artifact of a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub outcome: Outcome,
    pub output: CapturedOutput,
    pub commands_sent: usize,
}

/// A single emulator run
pub struct Session {
    script: Script,
    timing: TimingPolicy,
    status: SessionStatus,
    process: Option<EmulatorProcess>,
    commands_sent: usize,
    launch_error: Option<String>,
    output: Option<CapturedOutput>,
}

impl Session {
    /// Create a new session
    pub fn new(script: Script, timing: TimingPolicy) -> Self {
        Self {
            script,
            timing,
            status: SessionStatus::NotStarted,
            process: None,
            commands_sent: 0,
            launch_error: None,
            output: None,
        }
    }

    #[allow(dead_code)]
    pub fn status(&self) -> SessionStatus {
        self.status
    }

    #[allow(dead_code)]
    pub fn commands_sent(&self) -> usize {
        self.commands_sent
    }

    pub fn outcome(&self) -> Outcome {
        match self.status {
            SessionStatus::TerminatedCleanly => Outcome::CleanExit,
            SessionStatus::Failed => Outcome::LaunchFailed(
                self.launch_error.clone().unwrap_or_else(|| "not launched".to_string()),
            ),
            SessionStatus::NotStarted
            | SessionStatus::Running
            | SessionStatus::TerminatedForcibly => Outcome::ForcedExit,
        }
    }

    /// Start the emulator
    pub fn launch(&mut self, spec: &LaunchSpec) -> Result<(), ProcessError> {
        if self.status != SessionStatus::NotStarted {
            return Err(ProcessError::AlreadyLaunched);
        }

        match EmulatorProcess::spawn(spec) {
            Ok(process) => {
                info!(pid = process.pid(), "Session running");
                self.process = Some(process);
                self.status = SessionStatus::Running;
                Ok(())
            }
            Err(e) => {
                error!("Launch failed: {}", e);
                self.status = SessionStatus::Failed;
                self.launch_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// Type the script, then shut the emulator down.
    ///
    /// Never fails: a broken console or a stubborn emulator ends in a kill.
    pub fn drive(&mut self) {
        if self.status != SessionStatus::Running {
            return;
        }
        let Some(process) = self.process.as_mut() else {
            return;
        };

        let sent = &mut self.commands_sent;
        let result = inject(process, &self.script, &self.timing, sent)
            .and_then(|()| termination::shut_down(process, &self.timing));

        let shutdown = match result {
            Ok(shutdown) => shutdown,
            Err(e) => {
                info!("Session interrupted ({}), stopping emulator", e);
                termination::kill(process)
            }
        };

        self.status = match shutdown {
            Shutdown::Clean => SessionStatus::TerminatedCleanly,
            Shutdown::Forced => SessionStatus::TerminatedForcibly,
        };
    }

    /// Captured output; read once, cached afterwards.
    ///
    /// A still-running emulator is killed first.
    pub fn collect(&mut self) -> &CapturedOutput {
        if self.output.is_none() {
            let output = self.take_output();
            self.output = Some(output);
        }
        self.output.get_or_insert_with(CapturedOutput::default)
    }

    /// Consume the session into its report
    pub fn finish(mut self) -> SessionReport {
        self.collect();
        SessionReport {
            outcome: self.outcome(),
            output: self.output.take().unwrap_or_default(),
            commands_sent: self.commands_sent,
        }
    }

    fn take_output(&mut self) -> CapturedOutput {
        let Some(mut process) = self.process.take() else {
            return CapturedOutput::default();
        };

        if self.status == SessionStatus::Running {
            warn!("Collecting output from a running emulator");
            termination::kill(&mut process);
            self.status = SessionStatus::TerminatedForcibly;
        }

        match process.collect() {
            Ok(output) => {
                info!(
                    status = ?output.status,
                    "Collected {} bytes of output",
                    output.stdout.len() + output.stderr.len()
                );
                output
            }
            Err(e) => {
                warn!("Output collection failed: {}", e);
                CapturedOutput::default()
            }
        }
    }
}

fn inject(
    process: &mut EmulatorProcess,
    script: &Script,
    timing: &TimingPolicy,
    sent: &mut usize,
) -> Result<(), ProcessError> {
    let input = process.input()?;
    let mut sequencer = Sequencer::new(input, timing);
    let result = sequencer.send_script(script);
    *sent = sequencer.sent();
    result.map_err(ProcessError::WriteFailure)
}

/// Run a complete session
pub fn run_session(spec: &LaunchSpec, script: Script, timing: TimingPolicy) -> SessionReport {
    info!(
        commands = script.len(),
        "Starting session, paced waits total {:?}",
        timing.paced_total(script.iter())
    );

    let mut session = Session::new(script, timing);
    if session.launch(spec).is_ok() {
        session.drive();
    }
    session.finish()
}

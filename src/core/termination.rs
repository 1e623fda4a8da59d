//! Emulator shutdown
//!
//! Escalation ladder: quit sequence on the console, then a graceful stop of
//! the process group, then a kill. Every rung is separated by a fixed grace
//! period from the timing policy.

use std::thread;

use tracing::{info, warn};

use super::process::{EmulatorProcess, ProcessError, Result};
use super::sequencer;
use super::timing::TimingPolicy;

/// How the emulator ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shutdown {
    /// Exited by itself after the quit sequence
    Clean,
    /// The harness had to signal it
    Forced,
}

/// Quit the emulator and make sure it is gone.
///
/// On success the emulator has exited and been reaped. A failure to write the
/// quit sequence is returned as an error; the caller falls back to [`kill`].
pub fn shut_down(process: &mut EmulatorProcess, timing: &TimingPolicy) -> Result<Shutdown> {
    thread::sleep(timing.settle_delay);

    let input = process.input()?;
    sequencer::send_quit(input).map_err(ProcessError::WriteFailure)?;
    thread::sleep(timing.quit_grace);

    if process.has_exited()? {
        info!("Emulator exited after quit sequence");
        return Ok(Shutdown::Clean);
    }

    process.request_stop()?;
    thread::sleep(timing.stop_grace);

    if process.has_exited()? {
        info!("Emulator stopped on request");
    } else {
        info!("Emulator ignored stop request after {:?}, escalating", timing.stop_grace);
        process.force_stop()?;
    }

    Ok(Shutdown::Forced)
}

/// Fallback when the session cannot proceed normally
pub fn kill(process: &mut EmulatorProcess) -> Shutdown {
    if let Err(e) = process.force_stop() {
        warn!("Forced stop failed: {}", e);
    }
    Shutdown::Forced
}

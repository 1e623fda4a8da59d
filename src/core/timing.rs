//! Pacing for console input.
//!
//! The guest offers no readiness handshake, so every wait the harness makes is
//! a fixed, elapsed-time delay. All of them live here so callers (and tests
//! against stub guests) can shrink them without touching the session logic.

use std::time::Duration;

/// Delays applied around command injection and shutdown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingPolicy {
    /// Wait before the first keystroke, long enough to reach a prompt
    pub boot_delay: Duration,
    /// Base wait after each command line
    pub command_delay: Duration,
    /// Extra wait per byte of the command line just sent
    pub per_byte_delay: Duration,
    /// Wait after the last command before sending the quit sequence
    pub settle_delay: Duration,
    /// Wait for the emulator to act on the quit sequence
    pub quit_grace: Duration,
    /// Wait for the process group to honour a graceful stop
    pub stop_grace: Duration,
}

impl Default for TimingPolicy {
    fn default() -> Self {
        Self {
            boot_delay: Duration::from_millis(2000),
            command_delay: Duration::from_millis(1000),
            per_byte_delay: Duration::ZERO,
            settle_delay: Duration::from_millis(3000),
            quit_grace: Duration::from_millis(1000),
            stop_grace: Duration::from_millis(1000),
        }
    }
}

impl TimingPolicy {
    /// No waiting at all
    #[allow(dead_code)]
    pub const fn immediate() -> Self {
        Self {
            boot_delay: Duration::ZERO,
            command_delay: Duration::ZERO,
            per_byte_delay: Duration::ZERO,
            settle_delay: Duration::ZERO,
            quit_grace: Duration::ZERO,
            stop_grace: Duration::ZERO,
        }
    }

    /// Wait that follows `command`
    pub fn command_delay_for(&self, command: &str) -> Duration {
        let bytes = u32::try_from(command.len()).unwrap_or(u32::MAX);
        self.command_delay
            .saturating_add(self.per_byte_delay.saturating_mul(bytes))
    }

    /// Sum of every deliberate wait a session makes for `commands`.
    ///
    /// Blocking on process exit and pipe draining comes on top of this.
    pub fn paced_total<'a, I>(&self, commands: I) -> Duration
    where
        I: IntoIterator<Item = &'a str>,
    {
        let pacing = commands
            .into_iter()
            .fold(Duration::ZERO, |acc, cmd| acc.saturating_add(self.command_delay_for(cmd)));

        self.boot_delay
            .saturating_add(pacing)
            .saturating_add(self.settle_delay)
            .saturating_add(self.quit_grace)
            .saturating_add(self.stop_grace)
    }
}

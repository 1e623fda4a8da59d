//! Keystroke injection
//!
//! Writes the script into the emulator's console input one line at a time,
//! flushing after every line and pausing between lines the way a person at
//! the keyboard would.

use std::io::{self, Write};
use std::thread;

use tracing::{debug, info};

use super::script::Script;
use super::timing::TimingPolicy;

/// QEMU monitor escape: Ctrl-A followed by `x` quits the emulator
pub const QUIT_SEQUENCE: &[u8] = b"\x01x";

/// Line terminator appended to every command
const LINE_END: &[u8] = b"\n";

/// Delivers a script to a console input stream
pub struct Sequencer<'a, W: Write> {
    input: &'a mut W,
    timing: &'a TimingPolicy,
    sent: usize,
}

impl<'a, W: Write> Sequencer<'a, W> {
    pub fn new(input: &'a mut W, timing: &'a TimingPolicy) -> Self {
        Self {
            input,
            timing,
            sent: 0,
        }
    }

    /// Number of commands fully written so far
    pub fn sent(&self) -> usize {
        self.sent
    }

    /// Wait for boot, then type every command in order.
    ///
    /// Stops at the first failed write; commands after it are never attempted.
    pub fn send_script(&mut self, script: &Script) -> io::Result<()> {
        thread::sleep(self.timing.boot_delay);

        for command in script.iter() {
            self.send_line(command)?;
            thread::sleep(self.timing.command_delay_for(command));
        }

        Ok(())
    }

    fn send_line(&mut self, command: &str) -> io::Result<()> {
        debug!("Sending: {}", command);
        self.input.write_all(command.as_bytes())?;
        self.input.write_all(LINE_END)?;
        self.input.flush()?;
        self.sent += 1;
        Ok(())
    }
}

/// Write the emulator quit sequence
pub fn send_quit<W: Write>(input: &mut W) -> io::Result<()> {
    info!("Sending quit sequence to emulator");
    input.write_all(QUIT_SEQUENCE)?;
    input.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    /// Accepts a fixed number of writes, then behaves like a closed pipe
    struct ClosingWriter {
        written: Vec<u8>,
        writes_left: usize,
    }

    impl Write for ClosingWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.writes_left == 0 {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed"));
            }
            self.writes_left -= 1;
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn script(commands: &[&str]) -> Script {
        Script::new(commands.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn test_commands_written_in_order_with_newlines() {
        let timing = TimingPolicy::immediate();
        let mut input = Vec::new();

        let mut sequencer = Sequencer::new(&mut input, &timing);
        sequencer.send_script(&script(&["ls", "echo Hello", "cat README"])).unwrap();
        assert_eq!(sequencer.sent(), 3);

        assert_eq!(input, b"ls\necho Hello\ncat README\n");
    }

    #[test]
    fn test_quit_sequence_follows_script() {
        let timing = TimingPolicy::immediate();
        let mut input = Vec::new();

        Sequencer::new(&mut input, &timing)
            .send_script(&script(&["ls", "echo x"]))
            .unwrap();
        send_quit(&mut input).unwrap();

        let quits = input
            .windows(QUIT_SEQUENCE.len())
            .filter(|w| *w == QUIT_SEQUENCE)
            .count();
        assert_eq!(quits, 1);
        assert!(input.ends_with(QUIT_SEQUENCE));
        assert_eq!(&input[..input.len() - QUIT_SEQUENCE.len()], b"ls\necho x\n");
    }

    #[test]
    fn test_empty_script_writes_nothing_but_still_waits() {
        let timing = TimingPolicy {
            boot_delay: Duration::from_millis(30),
            ..TimingPolicy::immediate()
        };
        let mut input = Vec::new();

        let start = Instant::now();
        let mut sequencer = Sequencer::new(&mut input, &timing);
        sequencer.send_script(&Script::new(Vec::new())).unwrap();
        assert_eq!(sequencer.sent(), 0);

        assert!(start.elapsed() >= Duration::from_millis(30));
        assert!(input.is_empty());
    }

    #[test]
    fn test_write_failure_abandons_remaining_commands() {
        let timing = TimingPolicy::immediate();
        // Two writes per command (text, terminator): the second command's
        // terminator hits the closed pipe.
        let mut input = ClosingWriter {
            written: Vec::new(),
            writes_left: 3,
        };

        let mut sequencer = Sequencer::new(&mut input, &timing);
        let err = sequencer
            .send_script(&script(&["one", "two", "three"]))
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
        assert_eq!(sequencer.sent(), 1);

        assert_eq!(input.written, b"one\ntwo");
    }

    #[test]
    fn test_pacing_between_commands() {
        let timing = TimingPolicy {
            command_delay: Duration::from_millis(20),
            ..TimingPolicy::immediate()
        };
        let mut input = Vec::new();

        let start = Instant::now();
        Sequencer::new(&mut input, &timing)
            .send_script(&script(&["a", "b", "c"]))
            .unwrap();
        assert!(start.elapsed() >= Duration::from_millis(60));
    }
}

//! Command scripts
//!
//! A script is nothing more than an ordered list of console lines. The harness
//! never interprets them; each one is typed into the guest as-is.

use std::fs;
use std::io;
use std::path::Path;

/// Commands used when the caller supplies none
pub const DEFAULT_SCRIPT: &[&str] = &["ls", "echo hello from keyfeed"];

/// Ordered console commands
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Script {
    commands: Vec<String>,
}

impl Default for Script {
    fn default() -> Self {
        Self::new(DEFAULT_SCRIPT.iter().map(|s| s.to_string()).collect())
    }
}

impl Script {
    pub fn new(commands: Vec<String>) -> Self {
        Self { commands }
    }

    /// Parse a script file body.
    ///
    /// One command per line. Blank lines and lines starting with `#` (after
    /// leading whitespace) are skipped; other lines keep their exact text.
    pub fn parse(content: &str) -> Self {
        let commands = content
            .lines()
            .filter(|line| {
                let trimmed = line.trim_start();
                !trimmed.is_empty() && !trimmed.starts_with('#')
            })
            .map(str::to_string)
            .collect();

        Self { commands }
    }

    /// Load a script file
    pub fn from_file(path: &Path) -> io::Result<Self> {
        fs::read_to_string(path).map(|content| Self::parse(&content))
    }

    #[allow(dead_code)]
    pub fn commands(&self) -> &[String] {
        &self.commands
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.commands.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

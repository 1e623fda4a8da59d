//! keyfeed - type scripted commands into an emulated guest's console
//!
//! keyfeed launches an emulator whose serial console is attached to standard
//! input/output (for example `make qemu-nox`), waits for the guest to boot,
//! types each command followed by Enter, quits the emulator with its Ctrl-A x
//! escape, and prints everything the guest wrote.
//!
//! # Quick Start
//!
//! ```text
//! keyfeed                          # default script against `make qemu-nox`
//! keyfeed ls "cat README"          # custom commands
//! keyfeed -C ~/xv6 -f smoke.txt    # commands from a file, run in ~/xv6
//! keyfeed -e "qemu-system-riscv64 -nographic -kernel kernel" ls
//! ```
//!
//! The guest is driven purely by elapsed time: there is no readiness check,
//! so slow guests need larger delays (`--boot-delay`, `--command-delay`, or
//! the `[timing]` table of `~/.keyfeed/config.toml`).

mod config;
mod core;

use std::env;
use std::fs::{self, File, OpenOptions};
use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use crossterm::execute;
use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::config::Config;
use crate::core::process::LaunchSpec;
use crate::core::script::Script;
use crate::core::session::{run_session, Outcome, SessionReport};
use crate::core::timing::TimingPolicy;

/// Version string from Cargo.toml
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Log verbosity selected on the command line
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum Verbosity {
    Quiet,
    #[default]
    Normal,
    Verbose,
}

/// Command-line options
#[derive(Debug, Default, PartialEq, Eq)]
struct Options {
    config_path: Option<PathBuf>,
    working_dir: Option<PathBuf>,
    emulator: Option<Vec<String>>,
    script_file: Option<PathBuf>,
    boot_delay_ms: Option<u64>,
    command_delay_ms: Option<u64>,
    settle_delay_ms: Option<u64>,
    log_file: Option<PathBuf>,
    verbosity: Verbosity,
    print_config: bool,
    /// Positional commands
    commands: Vec<String>,
}

/// What the command line asks for
#[derive(Debug, PartialEq, Eq)]
enum Action {
    Run(Options),
    Help,
    Version,
}

fn print_version() {
    eprintln!("keyfeed {}", VERSION);
}

fn print_help() {
    eprintln!("keyfeed {} - Type scripted commands into an emulated guest console", VERSION);
    eprintln!();
    eprintln!("Usage: keyfeed [OPTIONS] [COMMAND]...");
    eprintln!();
    eprintln!("Each COMMAND is typed into the guest followed by Enter.");
    eprintln!("Without commands, the config file script or a built-in one is used.");
    eprintln!();
    eprintln!("Emulator options:");
    eprintln!("  -e, --emulator <CMD>      Emulator command line (default: make qemu-nox)");
    eprintln!("  -C, --dir <DIR>           Directory to launch the emulator in");
    eprintln!("  -c, --config <FILE>       Config file (default: ~/.keyfeed/config.toml)");
    eprintln!("      --print-config        Print the effective config and exit");
    eprintln!();
    eprintln!("Script options:");
    eprintln!("  -f, --script <FILE>       Read commands from FILE, one per line");
    eprintln!("      --boot-delay <MS>     Wait before the first command");
    eprintln!("      --command-delay <MS>  Wait after each command");
    eprintln!("      --settle-delay <MS>   Wait after the last command before quitting");
    eprintln!();
    eprintln!("Other options:");
    eprintln!("      --log-file <FILE>     Append logs to FILE instead of stderr");
    eprintln!("      --verbose             Log every command sent");
    eprintln!("  -q, --quiet               Only log warnings");
    eprintln!("  -v, --version             Show version");
    eprintln!("  -h, --help                Show this help");
    eprintln!("      --                    Treat the rest as commands");
    eprintln!();
    eprintln!("Examples:");
    eprintln!("  keyfeed                         Default script, make qemu-nox");
    eprintln!("  keyfeed ls \"echo hi\"            Two commands");
    eprintln!("  keyfeed -C ~/xv6 -f smoke.txt   Script file, run inside ~/xv6");
    eprintln!();
    eprintln!("The emulator is quit with Ctrl-A x; it is killed if it does not exit.");
    eprintln!("RUST_LOG overrides the log filter.");
}

fn parse_args<I>(args: I) -> Result<Action, String>
where
    I: IntoIterator<Item = String>,
{
    let mut args = args.into_iter();
    let mut options = Options::default();

    fn value(args: &mut impl Iterator<Item = String>, flag: &str) -> Result<String, String> {
        args.next().ok_or_else(|| format!("Missing argument for {}", flag))
    }

    fn millis(args: &mut impl Iterator<Item = String>, flag: &str) -> Result<u64, String> {
        let raw = value(args, flag)?;
        raw.parse()
            .map_err(|_| format!("Invalid milliseconds for {}: {}", flag, raw))
    }

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-h" | "--help" => return Ok(Action::Help),
            "-v" | "--version" => return Ok(Action::Version),
            "-c" | "--config" => {
                options.config_path = Some(PathBuf::from(value(&mut args, &arg)?));
            }
            "-C" | "--dir" => {
                options.working_dir = Some(PathBuf::from(value(&mut args, &arg)?));
            }
            "-e" | "--emulator" => {
                let line = value(&mut args, &arg)?;
                let argv: Vec<String> = line.split_whitespace().map(str::to_string).collect();
                if argv.is_empty() {
                    return Err("Empty emulator command".to_string());
                }
                options.emulator = Some(argv);
            }
            "-f" | "--script" => {
                options.script_file = Some(PathBuf::from(value(&mut args, &arg)?));
            }
            "--boot-delay" => {
                options.boot_delay_ms = Some(millis(&mut args, &arg)?);
            }
            "--command-delay" => {
                options.command_delay_ms = Some(millis(&mut args, &arg)?);
            }
            "--settle-delay" => {
                options.settle_delay_ms = Some(millis(&mut args, &arg)?);
            }
            "--log-file" => {
                options.log_file = Some(PathBuf::from(value(&mut args, &arg)?));
            }
            "--verbose" => {
                options.verbosity = Verbosity::Verbose;
            }
            "-q" | "--quiet" => {
                options.verbosity = Verbosity::Quiet;
            }
            "--print-config" => {
                options.print_config = true;
            }
            "--" => {
                options.commands.extend(args.by_ref());
            }
            flag if flag.starts_with('-') && flag.len() > 1 => {
                return Err(format!("Unknown argument: {}. Use -h for help.", flag));
            }
            _ => options.commands.push(arg.clone()),
        }
    }

    Ok(Action::Run(options))
}

/// Set up tracing, to stderr or appended to a file
fn init_logging(verbosity: Verbosity, log_file: Option<&PathBuf>) -> anyhow::Result<()> {
    let filter = match verbosity {
        Verbosity::Quiet => EnvFilter::new("warn"),
        Verbosity::Verbose => EnvFilter::new("debug"),
        Verbosity::Normal => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info")),
    };
    let builder = FmtSubscriber::builder().with_env_filter(filter);

    match log_file {
        Some(path) => {
            let file = open_log_file(path)?;
            let subscriber = builder
                .with_writer(std::sync::Mutex::new(file))
                .with_ansi(false)
                .finish();
            let _ = tracing::subscriber::set_global_default(subscriber);
        }
        None => {
            let subscriber = builder.with_writer(io::stderr).finish();
            let _ = tracing::subscriber::set_global_default(subscriber);
        }
    }

    Ok(())
}

/// Open `path` for appending, creating missing parent directories
fn open_log_file(path: &Path) -> anyhow::Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open log file {}", path.display()))
}

/// Merge command-line overrides into the loaded config
fn apply_overrides(config: &mut Config, options: &Options) {
    if let Some(emulator) = &options.emulator {
        config.command = emulator.clone();
    }
    if let Some(dir) = &options.working_dir {
        config.working_dir = Some(dir.clone());
    }
    if let Some(ms) = options.boot_delay_ms {
        config.timing.boot_delay_ms = ms;
    }
    if let Some(ms) = options.command_delay_ms {
        config.timing.command_delay_ms = ms;
    }
    if let Some(ms) = options.settle_delay_ms {
        config.timing.settle_delay_ms = ms;
    }
}

/// Pick the script: arguments, then script file, then config, then built-in
fn resolve_script(options: &Options, config: &Config) -> anyhow::Result<Script> {
    if !options.commands.is_empty() {
        return Ok(Script::new(options.commands.clone()));
    }
    if let Some(path) = &options.script_file {
        return Script::from_file(path)
            .with_context(|| format!("Failed to read script {}", path.display()));
    }
    Ok(config
        .script
        .clone()
        .map(Script::new)
        .unwrap_or_default())
}

fn print_banner(out: &mut impl Write, title: &str, color: bool) {
    let line = format!("--- {} ---", title);
    let _ = if color {
        execute!(
            out,
            SetForegroundColor(Color::Cyan),
            Print(line),
            ResetColor,
            Print("\n")
        )
    } else {
        writeln!(out, "{}", line)
    };
}

fn print_section(out: &mut impl Write, title: &str, body: &str, color: bool) {
    print_banner(out, title, color);
    let _ = out.write_all(body.as_bytes());
    if !body.is_empty() && !body.ends_with('\n') {
        let _ = writeln!(out);
    }
}

fn print_report(report: &SessionReport, script_len: usize) {
    let mut stdout = io::stdout().lock();
    let color = stdout.is_terminal();

    print_section(&mut stdout, "Guest Output", &report.output.stdout, color);
    print_banner(&mut stdout, "End Output", color);

    if !report.output.stderr.is_empty() {
        print_section(&mut stdout, "Emulator Stderr", &report.output.stderr, color);
        print_banner(&mut stdout, "End Stderr", color);
    }

    let status = report
        .output
        .status
        .map(|s| s.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let _ = writeln!(
        stdout,
        "{}: {}/{} commands sent, emulator {}",
        report.outcome.label(),
        report.commands_sent,
        script_len,
        status
    );
    let _ = stdout.flush();
}

fn main() -> anyhow::Result<()> {
    let options = match parse_args(env::args().skip(1)) {
        Ok(Action::Run(options)) => options,
        Ok(Action::Help) => {
            print_help();
            return Ok(());
        }
        Ok(Action::Version) => {
            print_version();
            return Ok(());
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!("Use --help for usage information");
            std::process::exit(1);
        }
    };

    init_logging(options.verbosity, options.log_file.as_ref())?;

    let mut config = match &options.config_path {
        Some(path) => Config::from_path(path)?,
        None => Config::load(),
    };
    apply_overrides(&mut config, &options);

    if options.print_config {
        print!("{}", config.to_toml().context("Failed to render config")?);
        return Ok(());
    }

    let working_dir = match &config.working_dir {
        Some(dir) => dir.clone(),
        None => env::current_dir().context("Failed to determine current directory")?,
    };
    let spec = LaunchSpec::from_argv(&config.command, working_dir)?;
    let script = resolve_script(&options, &config)?;
    let timing = TimingPolicy::from(config.timing);

    info!("keyfeed {} driving `{}`", VERSION, spec.display());

    if script.is_empty() {
        info!("Empty script, only the quit sequence will be typed");
    }

    let script_len = script.len();
    let report = run_session(&spec, script, timing);
    if report.output.is_empty() {
        warn!("Emulator produced no output");
    }
    print_report(&report, script_len);

    if let Outcome::LaunchFailed(reason) = &report.outcome {
        bail!("Emulator did not start: {}", reason);
    }
    Ok(())
}

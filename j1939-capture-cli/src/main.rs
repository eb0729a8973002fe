//! J1939 capture CLI
//!
//! Thin front end over the j1939-capture library:
//! - `capture`: log frames to CSV/JSON, or stream them to stdout
//! - `monitor`: print decoded signal values per source address
//!
//! Frames come from a `candump -L` log file or stdin.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use j1939_capture::sink::csv::{format_row, header};
use j1939_capture::{CaptureSession, ControlHandle, Mode, OutputFormat, SessionConfig};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

mod config;
mod modes;
mod monitor;
mod replay;

use config::AppConfig;
use replay::CandumpSource;

/// J1939 Capture - Decode and log J1939 traffic
#[derive(Parser, Debug)]
#[command(name = "j1939-capture")]
#[command(about = "Capture J1939 frames to CSV/JSON logs or stream them live", long_about = None)]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Path to configuration file (config.toml)
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Verbosity level (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Log frames to a file (logged mode) or print them (stream mode)
    Capture(CaptureArgs),
    /// Print decoded signal values as frames arrive
    Monitor(MonitorArgs),
}

#[derive(clap::Args, Debug)]
struct CaptureArgs {
    /// candump log to replay ("-" for stdin)
    #[arg(value_name = "INPUT")]
    input: Option<PathBuf>,

    /// Capture mode, e.g. "logged", "logging", "stream", "live"
    #[arg(short, long)]
    mode: Option<String>,

    /// Output format (csv or json)
    #[arg(short, long)]
    format: Option<String>,

    /// Directory for the log file
    #[arg(short, long, value_name = "DIR")]
    output_dir: Option<PathBuf>,

    /// Log file name without extension
    #[arg(short, long)]
    name: Option<String>,

    /// Stop after this many seconds
    #[arg(short, long, value_name = "SECONDS")]
    duration: Option<u64>,

    /// Receive timeout per poll
    #[arg(long, value_name = "MS")]
    poll_timeout_ms: Option<u64>,

    /// Decode these signals into extra columns, e.g. "nox,o2" or "all"
    #[arg(short, long, value_name = "NAMES", value_delimiter = ',')]
    signals: Vec<String>,
}

#[derive(clap::Args, Debug)]
struct MonitorArgs {
    /// candump log to replay ("-" for stdin)
    #[arg(value_name = "INPUT")]
    input: Option<PathBuf>,

    /// Stop after this many seconds
    #[arg(short, long, value_name = "SECONDS")]
    duration: Option<u64>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(args.verbose, args.quiet);

    log::info!("J1939 Capture CLI v{}", env!("CARGO_PKG_VERSION"));
    log::info!("Using capture library v{}", j1939_capture::VERSION);

    let app_config = match &args.config {
        Some(path) => config::load_config(path)?,
        None => AppConfig::default(),
    };

    match args.command {
        Command::Capture(capture) => capture_mode(capture, &app_config),
        Command::Monitor(monitor) => monitor_mode(monitor, &app_config),
    }
}

/// Capture mode: logged to a file, or streamed to stdout as CSV rows
fn capture_mode(args: CaptureArgs, app_config: &AppConfig) -> Result<()> {
    let mode_name = args.mode.as_deref().unwrap_or(&app_config.capture.mode);
    let mode = modes::resolve_mode(mode_name)?;
    let poll_timeout = args
        .poll_timeout_ms
        .unwrap_or(app_config.capture.poll_timeout_ms);

    let selection = if args.signals.is_empty() {
        &app_config.capture.signals
    } else {
        &args.signals
    };
    let signals = config::select_signals(&app_config.signal_catalog(), selection)?;
    let signal_columns = signals.names();
    if !signals.is_empty() {
        log::info!("Decoding signals: {}", signal_columns.join(", "));
    }

    let mut session_config = SessionConfig::new(mode)
        .with_poll_timeout(Duration::from_millis(poll_timeout))
        .with_signals(signals);
    if mode == Mode::Logged {
        let mut output = app_config.output.clone();
        if let Some(format) = &args.format {
            output.format = Some(format.parse::<OutputFormat>()?);
        }
        if args.output_dir.is_some() {
            output.location = args.output_dir.clone();
        }
        if args.name.is_some() {
            output.name = args.name.clone();
        }
        session_config = session_config.with_output(config::resolve_output(&output)?);
    }

    let control = ControlHandle::default();
    install_interrupt_handler(&control)?;
    if let Some(seconds) = args.duration {
        stop_after(&control, Duration::from_secs(seconds));
    }

    let input = input_path(args.input.as_deref(), app_config);
    let source = CandumpSource::open(&input)
        .with_context(|| format!("Failed to open input: {:?}", input))?
        .stop_at_eof(control.clone());
    let mut session = CaptureSession::new(source, session_config)
        .context("Failed to create capture session")?
        .with_control(control);

    match mode {
        Mode::Logged => {
            if let Some(path) = session.output_path() {
                log::info!("Logging to {:?}", path);
            }
            session.begin_logging()?;
            session.run(|_, _| {})?;
        }
        Mode::Stream => {
            println!("{}", header(&signal_columns));
            session.run(|_, record| println!("{}", format_row(record)))?;
        }
    }

    let emitted = session.records_emitted();
    let skipped = session.source().skipped();
    session.close().context("Failed to finalize log")?;

    log::info!("Captured {} records ({} input lines skipped)", emitted, skipped);
    Ok(())
}

/// Monitor mode: stream frames and print catalog signals
fn monitor_mode(args: MonitorArgs, app_config: &AppConfig) -> Result<()> {
    let catalog = app_config.signal_catalog();
    log::info!("Monitoring {} signals", catalog.len());

    let control = ControlHandle::default();
    install_interrupt_handler(&control)?;
    if let Some(seconds) = args.duration {
        stop_after(&control, Duration::from_secs(seconds));
    }

    let input = input_path(args.input.as_deref(), app_config);
    let source = CandumpSource::open(&input)
        .with_context(|| format!("Failed to open input: {:?}", input))?
        .stop_at_eof(control.clone());
    let config = SessionConfig::stream()
        .with_poll_timeout(Duration::from_millis(app_config.capture.poll_timeout_ms));
    let mut session = CaptureSession::new(source, config)?.with_control(control);

    session.run(|frame, record| {
        if let Some(line) = monitor::format_line(frame, record, &catalog) {
            println!("{}", line);
        }
    })?;
    session.close()?;
    Ok(())
}

/// Command line input, then `[input] file`, then stdin
fn input_path(cli: Option<&Path>, app_config: &AppConfig) -> PathBuf {
    cli.map(Path::to_path_buf)
        .or_else(|| app_config.input.file.clone())
        .unwrap_or_else(|| PathBuf::from("-"))
}

fn install_interrupt_handler(control: &ControlHandle) -> Result<()> {
    let control = control.clone();
    ctrlc::set_handler(move || {
        log::info!("Interrupt received, stopping");
        control.request_stop();
    })
    .context("Failed to install Ctrl-C handler")
}

fn stop_after(control: &ControlHandle, duration: Duration) {
    let control = control.clone();
    thread::spawn(move || {
        thread::sleep(duration);
        log::info!("Capture duration of {:?} elapsed", duration);
        control.request_stop();
    });
}

fn init_logging(verbose: u8, quiet: bool) {
    use env_logger::Builder;
    use log::LevelFilter;
    use std::io::Write;

    let level = if quiet {
        LevelFilter::Error
    } else {
        match verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };

    Builder::new()
        .filter_level(level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {}] {}",
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();
}

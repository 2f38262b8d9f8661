//! Purpose: `linepool` CLI entry point and command dispatch.
//! Role: Binary crate root; parses args, runs commands, maps errors to exit codes.
//! Invariants: Non-interactive errors are emitted as JSON on stderr; TTY errors as text.
//! Invariants: Process exit code is derived from `api::to_exit_code`.
//! Invariants: `serve` binds and daemonizes before any async runtime is started.
#![allow(clippy::result_large_err)]
use std::io::{self, IsTerminal, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::path::PathBuf;
use std::time::Duration;

use clap::{
    Args, CommandFactory, Parser, Subcommand, ValueEnum, ValueHint,
    error::ErrorKind as ClapErrorKind,
};
use clap_complete::aot::Shell;
use serde_json::{Map, Value, json};
use std::error::Error as StdError;

mod command_dispatch;
mod serve;

use linepool::api::{DELIMITER, Error, ErrorKind, to_exit_code};

const DEFAULT_BIND: &str = "0.0.0.0:9000";
const DEFAULT_SEND_TIMEOUT: &str = "5s";

#[derive(Copy, Clone, Debug)]
struct RunOutcome {
    exit_code: i32,
}

impl RunOutcome {
    fn ok() -> Self {
        Self { exit_code: 0 }
    }

    fn with_code(exit_code: i32) -> Self {
        Self { exit_code }
    }
}

fn main() {
    let exit_code = match run() {
        Ok(outcome) => outcome.exit_code,
        Err((err, color_mode)) => {
            emit_error(&err, color_mode);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn run() -> Result<RunOutcome, (Error, ColorMode)> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ClapErrorKind::DisplayHelp
            | ClapErrorKind::DisplayVersion
            | ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
                err.print().map_err(|io_err| {
                    (
                        Error::new(ErrorKind::Io)
                            .with_message("failed to write help")
                            .with_source(io_err),
                        ColorMode::Auto,
                    )
                })?;
                let exit_code = if matches!(
                    err.kind(),
                    ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
                ) {
                    2
                } else {
                    0
                };
                return Ok(RunOutcome::with_code(exit_code));
            }
            _ => {
                let message = clap_error_summary(&err);
                let hint = clap_error_hint(&err);
                return Err((
                    Error::new(ErrorKind::Usage)
                        .with_message(message)
                        .with_hint(hint),
                    ColorMode::Auto,
                ));
            }
        },
    };

    let color_mode = cli.color;
    command_dispatch::dispatch_command(cli.command)
        .map_err(add_io_hint)
        .map_err(add_internal_hint)
        .map_err(|err| (err, color_mode))
}

#[derive(Parser)]
#[command(
    name = "linepool",
    version,
    about = "Fixed-capacity ring of newline-terminated records, served over TCP",
    help_template = r#"{about-with-newline}
{before-help}USAGE
  {usage}

COMMANDS
{subcommands}

OPTIONS
{options}

{after-help}
"#,
    long_about = None,
    before_help = r#"Clients send lines; the server keeps the most recent N and replies with all of them.

Mental model:
  - `serve` runs the ring server (timestamps injected every 10s by default)
  - `send` writes one line and prints the ring contents that come back
"#,
    after_help = r#"EXAMPLES
  $ linepool serve                          # listen on 0.0.0.0:9000, keep 10 records
  $ linepool send 127.0.0.1:9000 hello      # prints every retained record

LEARN MORE
  $ linepool <command> --help"#,
    arg_required_else_help = true,
    disable_help_subcommand = false
)]
struct Cli {
    #[arg(
        long,
        default_value = "auto",
        value_enum,
        help = "Colorize stderr diagnostics: auto|always|never"
    )]
    color: ColorMode,

    #[command(subcommand)]
    command: Command,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum ColorMode {
    Auto,
    Always,
    Never,
}

impl ColorMode {
    fn use_color(self, is_tty: bool) -> bool {
        match self {
            ColorMode::Auto => is_tty,
            ColorMode::Always => true,
            ColorMode::Never => false,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    #[command(
        about = "Run the record ring server",
        long_about = r#"Accept TCP connections, store each newline-terminated line as a record,
and reply with the concatenation of every retained record.

The ring keeps the most recent --capacity records; older ones are evicted.
A `timestamp:YYYY-MM-DD HH:MM:SS` record is injected every --stamp-period."#,
        after_help = r#"EXAMPLES
  $ linepool serve
  $ linepool serve --bind 127.0.0.1:9000 --capacity 100 --no-stamp
  $ linepool serve -d --data-file /var/tmp/linepool.data

NOTES
  - SIGINT/SIGTERM drain in-flight connections, then exit 0.
  - RUST_LOG controls log verbosity (default: info)."#
    )]
    Serve(ServeArgs),
    #[command(
        arg_required_else_help = true,
        about = "Send one line and print the reply",
        long_about = r#"Connect to a running server, send TEXT as one record (a trailing
newline is added when missing), and print the returned ring contents to stdout."#,
        after_help = r#"EXAMPLES
  $ linepool send 127.0.0.1:9000 hello
  $ linepool send localhost:9000 'two words' --timeout 2s"#
    )]
    Send {
        #[arg(help = "Server address (host:port)")]
        addr: String,
        #[arg(help = "Record text")]
        text: String,
        #[arg(
            long,
            default_value = DEFAULT_SEND_TIMEOUT,
            help = "Connect/read/write timeout (e.g. 500ms, 5s)"
        )]
        timeout: String,
    },
    #[command(
        about = "Print version info as JSON",
        long_about = r#"Emit version info (JSON when stdout is not a terminal)."#,
        after_help = r#"EXAMPLES
  $ linepool version"#
    )]
    Version,
    #[command(
        arg_required_else_help = true,
        about = "Generate shell completions",
        long_about = r#"Generate shell completion scripts.

Prints a completion script for the given shell to stdout."#,
        after_help = r#"EXAMPLES
  $ linepool completion bash > ~/.local/share/bash-completion/completions/linepool
  $ linepool completion zsh > ~/.zfunc/_linepool
  $ linepool completion fish > ~/.config/fish/completions/linepool.fish"#
    )]
    Completion {
        #[arg(help = "Shell to generate completions for")]
        shell: Shell,
    },
}

#[derive(Args)]
struct ServeArgs {
    #[arg(
        long,
        default_value = DEFAULT_BIND,
        help = "Bind address",
        help_heading = "Connection"
    )]
    bind: String,
    #[arg(
        long,
        default_value_t = linepool::api::DEFAULT_CAPACITY,
        help = "Number of records retained",
        help_heading = "Ring"
    )]
    capacity: usize,
    #[arg(
        long,
        default_value = "10s",
        conflicts_with = "no_stamp",
        help = "Interval between timestamp records (e.g. 10s, 1m)",
        help_heading = "Ring"
    )]
    stamp_period: String,
    #[arg(long, help = "Disable timestamp records", help_heading = "Ring")]
    no_stamp: bool,
    #[arg(
        long,
        value_name = "PATH",
        help = "Mirror the ring contents to this file (removed on shutdown)",
        value_hint = ValueHint::FilePath,
        help_heading = "Ring"
    )]
    data_file: Option<PathBuf>,
    #[arg(
        long,
        default_value_t = linepool::api::DEFAULT_CHUNK_BYTES,
        help = "Bytes read per socket read (at most 1M)",
        help_heading = "Limits"
    )]
    chunk_bytes: usize,
    #[arg(
        long,
        default_value = "16M",
        help = "Largest accepted record (bytes or K/M/G)",
        help_heading = "Limits"
    )]
    max_record_bytes: String,
    #[arg(
        long,
        default_value = "10s",
        help = "How long shutdown waits for in-flight connections",
        help_heading = "Limits"
    )]
    shutdown_timeout: String,
    #[arg(
        short = 'd',
        long,
        help = "Fork into the background after binding",
        help_heading = "Process"
    )]
    daemon: bool,
}

fn serve_config_from_args(args: ServeArgs) -> Result<serve::ServeConfig, Error> {
    let bind = resolve_addr(&args.bind)?;
    let stamp_period = if args.no_stamp {
        None
    } else {
        Some(parse_duration(&args.stamp_period)?)
    };
    let max_record_bytes = usize::try_from(parse_size(&args.max_record_bytes)?).map_err(|_| {
        Error::new(ErrorKind::Usage)
            .with_message("--max-record-bytes is too large")
            .with_hint("Use a smaller size like 16M.")
    })?;

    Ok(serve::ServeConfig {
        bind,
        daemon: args.daemon,
        server: linepool::api::ServerConfig {
            capacity: args.capacity,
            session: linepool::api::SessionConfig {
                chunk_bytes: args.chunk_bytes,
                max_record_bytes,
            },
            stamp_period,
            shutdown_timeout: parse_duration(&args.shutdown_timeout)?,
            scratch_path: args.data_file,
        },
    })
}

fn resolve_addr(input: &str) -> Result<SocketAddr, Error> {
    let mut addrs = input.to_socket_addrs().map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message(format!("invalid address `{input}`"))
            .with_hint("Use host:port (e.g. 127.0.0.1:9000).")
            .with_source(err)
    })?;
    addrs.next().ok_or_else(|| {
        Error::new(ErrorKind::Usage)
            .with_message(format!("address `{input}` did not resolve"))
            .with_hint("Use host:port (e.g. 127.0.0.1:9000).")
    })
}

/// Sends `text` as one record and returns the server's reply.
fn send_line(addr: &str, text: &str, timeout: Duration) -> Result<Vec<u8>, Error> {
    let target = resolve_addr(addr)?;
    let io_err = |message: &'static str| {
        move |err: io::Error| {
            let kind = match err.kind() {
                io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => ErrorKind::Busy,
                io::ErrorKind::PermissionDenied => ErrorKind::Permission,
                _ => ErrorKind::Io,
            };
            Error::new(kind).with_message(message).with_source(err)
        }
    };

    let mut stream =
        TcpStream::connect_timeout(&target, timeout).map_err(io_err("failed to connect"))?;
    stream
        .set_read_timeout(Some(timeout))
        .map_err(io_err("failed to configure socket"))?;
    stream
        .set_write_timeout(Some(timeout))
        .map_err(io_err("failed to configure socket"))?;

    let mut payload = text.as_bytes().to_vec();
    if payload.last() != Some(&DELIMITER) {
        payload.push(DELIMITER);
    }
    stream
        .write_all(&payload)
        .map_err(io_err("failed to send record"))?;

    let mut reply = Vec::new();
    stream
        .read_to_end(&mut reply)
        .map_err(io_err("failed to read reply"))?;
    Ok(reply)
}

fn add_io_hint(err: Error) -> Error {
    if err.hint().is_some() {
        return err;
    }
    match err.kind() {
        ErrorKind::Permission => err.with_hint(
            "Permission denied. Use a port above 1024 or a writable --data-file location.",
        ),
        ErrorKind::Busy => err.with_hint(
            "Resource is busy (address in use, file locked, or peer timed out). Retry or pick another.",
        ),
        ErrorKind::Io => err.with_hint("I/O error. Check the address, network, and filesystem."),
        ErrorKind::Exhausted => err.with_hint("Out of memory or over a size limit. Lower --capacity or --max-record-bytes."),
        _ => err,
    }
}

fn add_internal_hint(err: Error) -> Error {
    if err.kind() != ErrorKind::Internal || err.hint().is_some() {
        return err;
    }
    err.with_hint(
        "Unexpected internal failure. Retry with RUST_BACKTRACE=1 and RUST_LOG=debug and share the output if it persists.",
    )
}

fn parse_size(input: &str) -> Result<u64, Error> {
    let trimmed = input.trim();
    let split = trimmed
        .char_indices()
        .find(|(_, ch)| !ch.is_ascii_digit())
        .map(|(idx, _)| idx)
        .unwrap_or(trimmed.len());
    let digits = trimmed[..split].trim();
    let suffix = trimmed[split..].trim();

    let value: u64 = digits.parse().map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message("invalid size")
            .with_hint("Use bytes or K/M/G (e.g. 16M).")
            .with_source(err)
    })?;

    let multiplier = match suffix {
        "" => 1,
        "K" | "k" => 1024,
        "M" | "m" => 1024 * 1024,
        "G" | "g" => 1024 * 1024 * 1024,
        _ => {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("invalid size suffix")
                .with_hint("Use K/M/G (e.g. 16M)."));
        }
    };

    value.checked_mul(multiplier).ok_or_else(|| {
        Error::new(ErrorKind::Usage)
            .with_message("size overflow")
            .with_hint("Use a smaller size value.")
    })
}

fn parse_duration(input: &str) -> Result<Duration, Error> {
    let invalid = || {
        Error::new(ErrorKind::Usage)
            .with_message(format!("invalid duration `{input}`"))
            .with_hint("Use a number plus ms|s|m|h (e.g. 10s).")
    };
    let trimmed = input.trim();
    let split = trimmed.char_indices().find(|(_, ch)| !ch.is_ascii_digit());
    let (num_str, unit) = match split {
        Some((idx, _)) => trimmed.split_at(idx),
        None => return Err(invalid()),
    };
    if num_str.is_empty() {
        return Err(invalid());
    }
    let value: u64 = num_str.parse().map_err(|_| invalid())?;
    let millis = match unit {
        "ms" => value,
        "s" => value.saturating_mul(1_000),
        "m" => value.saturating_mul(60_000),
        "h" => value.saturating_mul(3_600_000),
        _ => return Err(invalid()),
    };
    Ok(Duration::from_millis(millis))
}

fn emit_version_output() {
    if io::stdout().is_terminal() {
        println!("linepool {}", env!("CARGO_PKG_VERSION"));
    } else {
        println!(
            "{}",
            json!({
                "name": "linepool",
                "version": env!("CARGO_PKG_VERSION"),
            })
        );
    }
}

#[derive(Copy, Clone, Debug)]
enum AnsiColor {
    Red,
    Yellow,
}

fn colorize_label(label: &str, enabled: bool, color: AnsiColor) -> String {
    if !enabled {
        return label.to_string();
    }
    let code = match color {
        AnsiColor::Red => "31",
        AnsiColor::Yellow => "33",
    };
    format!("\u{1b}[{code}m{label}\u{1b}[0m")
}

fn emit_error(err: &Error, color_mode: ColorMode) {
    let is_tty = io::stderr().is_terminal();
    if is_tty {
        eprintln!("{}", error_text(err, color_mode.use_color(is_tty)));
        return;
    }

    let value = error_json(err);
    let json = serde_json::to_string(&value).unwrap_or_else(|_| {
        "{\"error\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn error_message(err: &Error) -> String {
    if let Some(message) = err.message() {
        return message.to_string();
    }
    match err.kind() {
        ErrorKind::Internal => "internal error".to_string(),
        ErrorKind::Usage => "usage error".to_string(),
        ErrorKind::Io => "i/o error".to_string(),
        ErrorKind::Busy => "resource is busy".to_string(),
        ErrorKind::Permission => "permission denied".to_string(),
        ErrorKind::Exhausted => "resource exhausted".to_string(),
        ErrorKind::Shutdown => "server is shutting down".to_string(),
    }
}

fn error_causes(err: &Error) -> Vec<String> {
    let mut causes = Vec::new();
    let mut cur = err.source();
    while let Some(source) = cur {
        causes.push(source.to_string());
        cur = source.source();
    }
    causes
}

fn error_json(err: &Error) -> Value {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(format!("{:?}", err.kind())));
    inner.insert("message".to_string(), json!(error_message(err)));
    if let Some(hint) = err.hint() {
        inner.insert("hint".to_string(), json!(hint));
    }
    if let Some(path) = err.path() {
        inner.insert("path".to_string(), json!(path.display().to_string()));
    }
    if let Some(offset) = err.offset() {
        inner.insert("offset".to_string(), json!(offset));
    }
    let causes = error_causes(err);
    if !causes.is_empty() {
        inner.insert("causes".to_string(), json!(causes));
    }

    let mut outer = Map::new();
    outer.insert("error".to_string(), Value::Object(inner));
    Value::Object(outer)
}

fn error_text(err: &Error, use_color: bool) -> String {
    let mut lines = Vec::new();
    lines.push(format!(
        "{} {}",
        colorize_label("error:", use_color, AnsiColor::Red),
        error_message(err)
    ));

    if let Some(hint) = err.hint() {
        lines.push(format!(
            "{} {hint}",
            colorize_label("hint:", use_color, AnsiColor::Yellow)
        ));
    }
    if let Some(path) = err.path() {
        lines.push(format!(
            "{} {}",
            colorize_label("path:", use_color, AnsiColor::Yellow),
            path.display()
        ));
    }
    if let Some(offset) = err.offset() {
        lines.push(format!(
            "{} {offset}",
            colorize_label("offset:", use_color, AnsiColor::Yellow)
        ));
    }

    let causes = error_causes(err);
    if let Some(cause) = causes.first() {
        lines.push(format!(
            "{} {cause}",
            colorize_label("caused by:", use_color, AnsiColor::Yellow)
        ));
    }

    lines.join("\n")
}

fn clap_error_summary(err: &clap::Error) -> String {
    for line in err.to_string().lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("error:") {
            return rest.trim().to_string();
        }
        return trimmed.to_string();
    }
    "invalid arguments".to_string()
}

fn clap_error_hint(err: &clap::Error) -> String {
    let rendered = err.to_string();
    let usage = rendered
        .lines()
        .find_map(|line| line.trim().strip_prefix("Usage: "))
        .map(str::trim);

    let Some(usage) = usage else {
        return "Try `linepool --help`.".to_string();
    };

    let tokens: Vec<&str> = usage.split_whitespace().collect();
    let Some(pos) = tokens.iter().position(|t| *t == "linepool") else {
        return "Try `linepool --help`.".to_string();
    };

    let mut parts = Vec::new();
    for token in tokens.iter().skip(pos + 1) {
        if token.starts_with('-') || token.starts_with('<') || token.starts_with('[') {
            break;
        }
        parts.push(*token);
    }

    if parts.is_empty() {
        return "Try `linepool --help`.".to_string();
    }
    format!("Try `linepool {} --help`.", parts.join(" "))
}

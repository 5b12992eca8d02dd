//! Purpose: `memflight` CLI entry point.
//! Role: Binary crate root; parses args, runs commands, emits JSON on stdout.
//! Invariants: Commands emit stable stdout formats (TSV for batches, JSON otherwise).
//! Invariants: Non-interactive errors are emitted as JSON on stderr.
//! Invariants: Process exit code is derived from `api::to_exit_code`.
#![allow(clippy::result_large_err)]
use std::error::Error as StdError;
use std::ffi::OsString;
use std::io::{self, IsTerminal};
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum, ValueHint, error::ErrorKind as ClapErrorKind};
use serde_json::{Map, Value, json};

mod command_dispatch;
mod serve;

use memflight::api::{Error, ErrorKind, StreamDescriptor, to_exit_code};

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
    let cli = match Cli::try_parse_from(std::env::args_os().collect::<Vec<OsString>>()) {
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
                return Err((
                    Error::new(ErrorKind::Usage)
                        .with_message(clap_error_summary(&err))
                        .with_hint("Try `memflight --help`."),
                    ColorMode::Auto,
                ));
            }
        },
    };

    let color_mode = cli.color;
    command_dispatch::dispatch_command(cli.command)
        .map_err(add_transport_hint)
        .map_err(|err| (err, color_mode))
}

#[derive(Parser)]
#[command(
    name = "memflight",
    version,
    about = "In-memory columnar stream store with a put/get protocol",
    long_about = None,
    after_help = r#"EXAMPLES
  $ memflight serve
  $ memflight put --path sales/2024 batches.mfs
  $ memflight list
  $ memflight get --path sales/2024
  $ memflight drop --path sales/2024
  $ memflight inspect batches.mfs"#,
    arg_required_else_help = true
)]
struct Cli {
    #[arg(
        long,
        default_value = "auto",
        value_enum,
        help = "Colorize error labels: auto | always | never"
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
    #[command(about = "Run the HTTP server in front of an in-memory store")]
    Serve(ServeArgs),
    #[command(about = "Print an IPC stream file as TSV")]
    Inspect {
        #[arg(value_hint = ValueHint::FilePath)]
        file: PathBuf,
    },
    #[command(about = "List flights, optionally under a path prefix")]
    List {
        #[command(flatten)]
        remote: RemoteArgs,
        #[arg(long, help = "Only flights whose path starts with these segments (a/b)")]
        prefix: Option<String>,
    },
    #[command(about = "Show one flight's schema, endpoints, and totals")]
    Info {
        #[command(flatten)]
        remote: RemoteArgs,
        #[command(flatten)]
        descriptor: DescriptorArgs,
    },
    #[command(about = "Fetch every sub-stream of a flight")]
    Get {
        #[command(flatten)]
        remote: RemoteArgs,
        #[command(flatten)]
        descriptor: DescriptorArgs,
        #[arg(
            long,
            value_hint = ValueHint::FilePath,
            help = "Write an IPC stream file instead of TSV"
        )]
        output: Option<PathBuf>,
    },
    #[command(about = "Upload an IPC stream file as one put session")]
    Put {
        #[command(flatten)]
        remote: RemoteArgs,
        #[command(flatten)]
        descriptor: DescriptorArgs,
        #[arg(value_hint = ValueHint::FilePath)]
        file: PathBuf,
    },
    #[command(about = "Drop a flight and release its data")]
    Drop {
        #[command(flatten)]
        remote: RemoteArgs,
        #[command(flatten)]
        descriptor: DescriptorArgs,
    },
    #[command(about = "List the actions a server supports")]
    Actions {
        #[command(flatten)]
        remote: RemoteArgs,
    },
    #[command(about = "Print version info as JSON")]
    Version,
}

#[derive(Args)]
struct ServeArgs {
    #[arg(long, default_value = "127.0.0.1:8088", help = "Bind address")]
    bind: String,
    #[arg(long, help = "Allow binding to a non-loopback address")]
    allow_non_loopback: bool,
    #[arg(long, default_value_t = 64 * 1024 * 1024, help = "Request body limit")]
    max_body_bytes: u64,
    #[arg(long, default_value_t = 8, help = "Batches queued per put before backpressure")]
    put_queue_depth: usize,
    #[arg(long, default_value_t = 64, help = "Concurrent get streams")]
    max_concurrent_gets: usize,
    #[arg(long, help = "Refuse allocations past this many bytes")]
    memory_limit_bytes: Option<u64>,
    #[arg(long, help = "Location advertised in flight endpoints (default: bound url)")]
    location: Option<String>,
}

#[derive(Args)]
struct RemoteArgs {
    #[arg(long, default_value = "http://127.0.0.1:8088", help = "Server base url")]
    url: String,
    #[arg(long, default_value_t = 30, help = "Request timeout in seconds")]
    timeout_secs: u64,
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct DescriptorArgs {
    #[arg(long, help = "Path descriptor, segments separated by '/'")]
    path: Option<String>,
    #[arg(long, help = "Command descriptor (opaque string)")]
    cmd: Option<String>,
}

impl DescriptorArgs {
    fn descriptor(&self) -> Result<StreamDescriptor, Error> {
        match (&self.path, &self.cmd) {
            (Some(path), None) => Ok(StreamDescriptor::path(split_path(path)?)),
            (None, Some(cmd)) => Ok(StreamDescriptor::command(cmd.clone().into_bytes())),
            _ => Err(Error::new(ErrorKind::Usage)
                .with_message("exactly one of --path or --cmd is required")),
        }
    }
}

fn split_path(path: &str) -> Result<Vec<String>, Error> {
    let segments: Vec<String> = path
        .split('/')
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect();
    if segments.is_empty() {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("path must have at least one segment")
            .with_hint("Use a value like sales/2024."));
    }
    Ok(segments)
}

fn add_transport_hint(err: Error) -> Error {
    if err.hint().is_some() {
        return err;
    }
    match err.kind() {
        ErrorKind::UnknownDescriptor => {
            err.with_hint("Use `memflight list` to see the flights a server holds.")
        }
        ErrorKind::Timeout => err.with_hint("Raise --timeout-secs or check the server load."),
        _ => err,
    }
}

fn emit_json(value: Value) {
    let json = if io::stdout().is_terminal() {
        serde_json::to_string_pretty(&value)
    } else {
        serde_json::to_string(&value)
    }
    .unwrap_or_else(|_| "{\"error\":\"json encode failed\"}".to_string());
    println!("{json}");
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
    match err.message() {
        Some(message) => message.to_string(),
        None => err.kind().as_str().to_string(),
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
    inner.insert("kind".to_string(), json!(err.kind().as_str()));
    inner.insert("message".to_string(), json!(error_message(err)));
    if let Some(hint) = err.hint() {
        inner.insert("hint".to_string(), json!(hint));
    }
    if let Some(descriptor) = err.descriptor() {
        inner.insert("descriptor".to_string(), json!(descriptor));
    }
    if let Some(index) = err.index() {
        inner.insert("index".to_string(), json!(index));
    }
    let causes = error_causes(err);
    if !causes.is_empty() {
        inner.insert("causes".to_string(), json!(causes));
    }

    let mut outer = Map::new();
    outer.insert("error".to_string(), Value::Object(inner));
    Value::Object(outer)
}

fn colorize_label(label: &str, enabled: bool, code: &str) -> String {
    if !enabled {
        return label.to_string();
    }
    format!("\u{1b}[{code}m{label}\u{1b}[0m")
}

fn error_text(err: &Error, use_color: bool) -> String {
    let mut lines = vec![format!(
        "{} {}",
        colorize_label("error:", use_color, "31"),
        error_message(err)
    )];
    if let Some(hint) = err.hint() {
        lines.push(format!("{} {hint}", colorize_label("hint:", use_color, "33")));
    }
    if let Some(descriptor) = err.descriptor() {
        lines.push(format!(
            "{} {descriptor}",
            colorize_label("descriptor:", use_color, "33")
        ));
    }
    if let Some(index) = err.index() {
        lines.push(format!("{} {index}", colorize_label("index:", use_color, "33")));
    }
    for cause in error_causes(err) {
        lines.push(format!("{} {cause}", colorize_label("caused by:", use_color, "33")));
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

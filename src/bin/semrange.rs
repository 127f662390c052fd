use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use env_logger::Env;
use is_terminal::IsTerminal;
use serde::{Deserialize, Serialize};
use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::mpsc;

use semrange::{Config, Document, Legend, LineIndex, RangeMapper, ResolveMode, TextEdit};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Json,
    Yaml,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeOpt {
    Strict,
    Clamp,
}

#[derive(Debug, Parser)]
#[command(name = "semrange", version, about = "Map semantic tokens onto text buffer ranges")]
struct Args {
    /// Output format (json or yaml)
    #[arg(short = 'f', long = "format", value_enum, default_value_t = OutputFormat::Json, global = true)]
    format: OutputFormat,

    /// Resolution mode; defaults to $SEMRANGE_RESOLVE_MODE, then clamp
    #[arg(long = "mode", value_enum, global = true)]
    mode: Option<ModeOpt>,

    /// Legend file (.yml/.yaml/.json); defaults to $SEMRANGE_LEGEND, then the LSP standard legend
    #[arg(long = "legend", global = true)]
    legend: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Show the line-start table of a file ('-' for stdin)
    Lines { path: String },
    /// Decode semantic token data into absolute tokens
    Decode {
        /// Request as JSON: file path, inline JSON, or '-' for stdin
        #[arg(long = "input", default_value = "-")]
        input: String,
    },
    /// Resolve semantic tokens against a document, optionally after edits
    Resolve {
        /// Request as JSON: file path, inline JSON, or '-' for stdin
        #[arg(long = "input", default_value = "-")]
        input: String,
    },
    /// Print shell completions
    Completions { shell: clap_complete::Shell },
}

#[derive(Debug, Deserialize)]
struct DecodeRequest {
    data: Vec<u32>,
    #[serde(default)]
    legend: Option<Legend>,
    #[serde(default)]
    version: u64,
}

/// `edits` land before tokens are requested, `late_edits` after the server
/// answered (which makes the answer stale).
#[derive(Debug, Deserialize)]
struct ResolveRequest {
    text: String,
    data: Vec<u32>,
    #[serde(default)]
    legend: Option<Legend>,
    #[serde(default)]
    edits: Vec<TextEdit>,
    #[serde(default)]
    late_edits: Vec<TextEdit>,
}

#[derive(Debug, Serialize)]
struct LinesOutput<'a> {
    len: usize,
    line_count: usize,
    starts: &'a [usize],
}

#[derive(Debug, Serialize)]
struct ResolveOutput {
    version: u64,
    mode: ResolveMode,
    highlights: Vec<semrange::Highlight>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    skipped: Vec<String>,
}

fn main() -> anyhow::Result<()> {
    // Initialize logger once; default level comes from RUST_LOG
    let _ = env_logger::Builder::from_env(Env::default().default_filter_or(""))
        .format_timestamp(None)
        .try_init();
    let args = Args::parse();

    match args.cmd {
        Command::Lines { ref path } => run_lines(args.format, path),
        Command::Decode { ref input } => {
            let cfg = load_config(&args)?;
            run_decode(args.format, &cfg, input)
        }
        Command::Resolve { ref input } => {
            let cfg = load_config(&args)?;
            run_resolve(args.format, cfg, input)
        }
        Command::Completions { shell } => {
            clap_complete::generate(shell, &mut Args::command(), "semrange", &mut io::stdout());
            Ok(())
        }
    }
}

fn load_config(args: &Args) -> anyhow::Result<Config> {
    let mode = args.mode.map(|m| match m {
        ModeOpt::Strict => ResolveMode::Strict,
        ModeOpt::Clamp => ResolveMode::Clamp,
    });
    Config::load(mode, args.legend.as_deref())
}

fn emit<T: Serialize>(fmt: OutputFormat, value: &T) -> anyhow::Result<()> {
    match fmt {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(value)?),
    }
    Ok(())
}

fn read_stdin() -> anyhow::Result<String> {
    if io::stdin().is_terminal() {
        anyhow::bail!("no stdin detected: pipe input into semrange or pass a path");
    }
    let mut s = String::new();
    io::stdin().read_to_string(&mut s)?;
    Ok(s)
}

fn read_input(arg: &str) -> anyhow::Result<String> {
    // Determine source: stdin ('-'), inline JSON, or file path
    if arg == "-" {
        read_stdin()
    } else if arg.trim_start().starts_with('{') {
        Ok(arg.to_string())
    } else {
        std::fs::read_to_string(arg).with_context(|| format!("read input: {}", arg))
    }
}

fn run_lines(fmt: OutputFormat, path: &str) -> anyhow::Result<()> {
    let text = if path == "-" {
        read_stdin()?
    } else {
        std::fs::read_to_string(path).with_context(|| format!("read file: {}", path))?
    };
    let index = LineIndex::new(&text);
    log::info!("mode=lines path={} lines={}", path, index.line_count());
    emit(
        fmt,
        &LinesOutput {
            len: index.len(),
            line_count: index.line_count(),
            starts: index.starts(),
        },
    )
}

fn run_decode(fmt: OutputFormat, cfg: &Config, input: &str) -> anyhow::Result<()> {
    let req: DecodeRequest = serde_json::from_str(&read_input(input)?).context("parse decode request")?;
    let legend = req.legend.as_ref().unwrap_or(&cfg.legend);
    let batch = semrange::decode_data(&req.data, legend, req.version)?;
    log::info!("mode=decode tokens={} version={}", batch.tokens.len(), batch.version);
    emit(fmt, &batch)
}

fn run_resolve(fmt: OutputFormat, mut cfg: Config, input: &str) -> anyhow::Result<()> {
    let req: ResolveRequest = serde_json::from_str(&read_input(input)?).context("parse resolve request")?;
    if let Some(legend) = req.legend {
        cfg.legend = legend;
    }

    let (tx, rx) = mpsc::channel();
    let mut doc = Document::open(req.text, &cfg).with_mapper(RangeMapper::new(cfg.mode).with_error_channel(tx));
    for edit in &req.edits {
        doc.apply(edit).with_context(|| format!("apply edit {:?}", edit.range))?;
    }
    let request = doc.request_tokens();
    doc.complete(&request, req.data)?;
    for edit in &req.late_edits {
        doc.apply(edit).with_context(|| format!("apply late edit {:?}", edit.range))?;
    }

    log::info!(
        "mode=resolve resolve_mode={:?} version={} tokens={}",
        cfg.mode,
        doc.version(),
        doc.tokens().map(|b| b.tokens.len()).unwrap_or_default()
    );
    let highlights = doc.highlights().context("strict resolution failed")?;
    let skipped: Vec<String> = rx.try_iter().map(|e| e.to_string()).collect();
    for s in &skipped {
        eprintln!("skipped: {}", s);
    }
    emit(
        fmt,
        &ResolveOutput {
            version: doc.version(),
            mode: cfg.mode,
            highlights,
            skipped,
        },
    )
}

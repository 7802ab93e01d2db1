//! HyperMD - command line front end
//!
//! Tokenizes a markdown file and prints the tokens or spans as JSON.

use anyhow::{bail, Context};
use hypermd::markdown::Span;
use hypermd::Editor;
use serde::Serialize;
use std::path::PathBuf;

/// Application name for logging
const APP_NAME: &str = "hypermd";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Output {
    #[default]
    Tokens,
    Spans,
}

#[derive(Debug, Default)]
struct Flags {
    output: Output,
    config: Option<PathBuf>,
    file: Option<PathBuf>,
}

#[derive(Serialize)]
struct TokenEntry<'a> {
    line: usize,
    start: usize,
    end: usize,
    text: &'a str,
    style: Option<&'a str>,
}

#[derive(Serialize)]
struct SpanEntry<'a> {
    line: usize,
    #[serde(flatten)]
    span: &'a Span,
}

fn main() -> anyhow::Result<()> {
    init_logging();

    let flags = parse_args()?;
    let Some(file) = flags.file else {
        print_help();
        bail!("no input file given");
    };

    let text = std::fs::read_to_string(&file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let mut editor = Editor::open(&text, flags.config.as_deref()).map_err(|e| {
        log::error!("{}", e.user_message());
        e
    })?;
    log::info!("Tokenizing {} ({} lines)", file.display(), editor.line_count());

    let json = match flags.output {
        Output::Tokens => {
            let mut tokens = Vec::new();
            for line in 0..editor.line_count() {
                tokens.push((line, editor.get_line_tokens(line, true)));
            }
            let entries: Vec<TokenEntry<'_>> = tokens
                .iter()
                .flat_map(|(line, tokens)| {
                    tokens.iter().map(move |t| TokenEntry {
                        line: *line,
                        start: t.start,
                        end: t.end,
                        text: &t.string,
                        style: t.style.as_deref(),
                    })
                })
                .collect();
            serde_json::to_string_pretty(&entries)?
        }
        Output::Spans => {
            let line_count = editor.line_count();
            let mut spans = Vec::new();
            let mut extractor = editor.get_line_span_extractor();
            for line in 0..line_count {
                spans.push((line, extractor.extract(line).to_vec()));
            }
            let entries: Vec<SpanEntry<'_>> = spans
                .iter()
                .flat_map(|(line, spans)| spans.iter().map(move |span| SpanEntry { line: *line, span }))
                .collect();
            serde_json::to_string_pretty(&entries)?
        }
    };
    println!("{}", json);
    Ok(())
}

/// Initialize the logging system
fn init_logging() {
    // Set default log level if not specified
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info,hypermd=debug");
    }

    env_logger::Builder::from_default_env()
        .format_timestamp_millis()
        .init();
}

/// Parse command line arguments
fn parse_args() -> anyhow::Result<Flags> {
    let args: Vec<String> = std::env::args().collect();
    let mut flags = Flags::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                print_help();
                std::process::exit(0);
            }
            "-v" | "--version" => {
                print_version();
                std::process::exit(0);
            }
            "--tokens" => flags.output = Output::Tokens,
            "--spans" => flags.output = Output::Spans,
            "--config" => {
                let Some(path) = args.get(i + 1) else {
                    bail!("--config requires a path argument");
                };
                flags.config = Some(PathBuf::from(path));
                i += 1;
            }
            arg if arg.starts_with('-') => {
                bail!("unknown option: {} (use --help for usage information)", arg);
            }
            arg => {
                if flags.file.is_some() {
                    bail!("only one input file is accepted");
                }
                flags.file = Some(PathBuf::from(arg));
            }
        }
        i += 1;
    }

    Ok(flags)
}

/// Print help message
fn print_help() {
    println!(
        r#"HyperMD - markdown tokenizer

USAGE:
    hypermd [OPTIONS] FILE

OPTIONS:
    -h, --help          Show this help message
    -v, --version       Show version information
    --tokens            Print one JSON entry per token (default)
    --spans             Print one JSON entry per span
    --config PATH       Load configuration from a JSON file

EXAMPLES:
    hypermd README.md
    hypermd --spans notes.md
    hypermd --config hypermd.json notes.md
"#
    );
}

/// Print version information
fn print_version() {
    println!("{} {}", APP_NAME, env!("CARGO_PKG_VERSION"));
}

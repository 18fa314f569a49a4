#![forbid(unsafe_code)]
//! Command line entry point: read items from stdin or a file, run a
//! one-shot sweep selection, and print whatever was picked.

use std::io::Read;
use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

use sweep_client::{sweep, Icon, NoMatch, SweepError, SweepOptions};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum NoMatchArg {
    Nothing,
    Input,
}

impl From<NoMatchArg> for NoMatch {
    fn from(arg: NoMatchArg) -> Self {
        match arg {
            NoMatchArg::Nothing => NoMatch::Nothing,
            NoMatchArg::Input => NoMatch::Input,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "sweep-client")]
#[command(about = "Select items with the sweep fuzzy finder")]
struct Cli {
    /// Override the prompt string.
    #[arg(short, long, default_value = "INPUT")]
    prompt: String,
    /// Prompt icon: an SVG path, icon JSON, or a file holding either.
    #[arg(long)]
    prompt_icon: Option<String>,
    /// Start with the given query.
    #[arg(long)]
    query: Option<String>,
    /// Comma-separated list of fields to limit search to.
    #[arg(long)]
    nth: Option<String>,
    /// Field delimiter.
    #[arg(long)]
    delimiter: Option<String>,
    /// Theme as a list of comma-separated attributes.
    #[arg(long)]
    theme: Option<String>,
    /// Default scorer.
    #[arg(long)]
    scorer: Option<String>,
    /// TTY device path.
    #[arg(long)]
    tty: Option<String>,
    /// Sweep command to spawn.
    #[arg(long, default_value = "sweep")]
    sweep: String,
    /// Expect items as a JSON array and print the selection as JSON.
    #[arg(long)]
    json: bool,
    /// What is returned when enter is pressed with no match.
    #[arg(long, value_enum)]
    no_match: Option<NoMatchArg>,
    /// Keep item order instead of sorting by score.
    #[arg(long)]
    keep_order: bool,
    /// File to read items from instead of stdin.
    #[arg(long)]
    input: Option<PathBuf>,
    /// Rendezvous over a temporary on-disk socket instead of a socket pair.
    #[arg(long)]
    tmp_socket: bool,
    /// Log file path.
    #[arg(long)]
    log: Option<String>,
}

fn init_tracing(log: Option<&str>) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr);
    match log {
        Some(path) => match std::fs::File::create(path) {
            Ok(file) => tracing_subscriber::fmt()
                .with_env_filter(EnvFilter::from_default_env())
                .with_writer(std::sync::Mutex::new(file))
                .with_ansi(false)
                .init(),
            Err(err) => {
                eprintln!("failed to open log file {path}: {err}");
                builder.init();
            }
        },
        None => builder.init(),
    }
}

fn read_input(input: Option<&PathBuf>) -> Result<String, SweepError> {
    match input {
        Some(path) => Ok(std::fs::read_to_string(path)?),
        None => {
            let mut buffer = String::new();
            std::io::stdin().read_to_string(&mut buffer)?;
            Ok(buffer)
        }
    }
}

async fn run(cli: Cli) -> Result<(), SweepError> {
    let options = {
        let mut options = SweepOptions::new()
            .sweep(cli.sweep.split_whitespace().map(String::from).collect())
            .prompt(cli.prompt.clone())
            .keep_order(cli.keep_order)
            .tmp_socket(cli.tmp_socket);
        if let Some(query) = &cli.query {
            options = options.query(query.clone());
        }
        if let Some(nth) = &cli.nth {
            options = options.nth(nth.clone());
        }
        if let Some(delimiter) = &cli.delimiter {
            options = options.delimiter(delimiter.clone());
        }
        if let Some(theme) = &cli.theme {
            options = options.theme(theme.clone());
        }
        if let Some(scorer) = &cli.scorer {
            options = options.scorer(scorer.clone());
        }
        if let Some(tty) = &cli.tty {
            options = options.tty(tty.clone());
        }
        if let Some(log) = &cli.log {
            options = options.log(log.clone());
        }
        if let Some(no_match) = cli.no_match {
            options = options.no_match(no_match.into());
        }
        options
    };

    let prompt_icon = match &cli.prompt_icon {
        Some(icon) => Some(Icon::from_str_or_file(icon)?),
        None => None,
    };

    let input = read_input(cli.input.as_ref())?;
    if cli.json {
        let items: Vec<Value> = serde_json::from_str(&input)?;
        let selected = sweep(items, prompt_icon, options).await?;
        if !selected.is_empty() {
            println!("{}", Value::Array(selected));
        }
    } else {
        let items: Vec<String> = input.lines().map(str::to_string).collect();
        let selected = sweep(items, prompt_icon, options).await?;
        for item in selected {
            println!("{item}");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.log.as_deref());
    if let Err(err) = run(cli).await {
        eprintln!("{err}");
        std::process::exit(1);
    }
}

//! combee - an interactive shell for aide-de-camp MongoDB job queues.

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use combee::shell::{render_error, Command, Shell, PROMPT};
use combee::{Combee, Config, DEFAULT_BATCH_SIZE};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "combee")]
#[command(version, about, long_about = None)]
struct Cli {
    /// MongoDB connection URI
    #[arg(long, env = "COMBEE_MONGODB_URI")]
    uri: Option<String>,

    /// Queues to inspect, comma separated
    #[arg(long, env = "COMBEE_QUEUES", value_delimiter = ',')]
    queues: Vec<String>,

    /// Look up queue names in the database when none are given
    #[arg(long)]
    discover: bool,

    /// CA certificate for TLS connections
    #[arg(long)]
    cert_file: Option<String>,

    /// Jobs fetched per page while scanning
    #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
    batch_size: u64,

    /// Directory export files are written to
    #[arg(long, default_value = ".")]
    export_dir: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,

    /// Run these commands and exit instead of starting the shell
    #[arg(short, long)]
    eval: Vec<String>,
}

impl Cli {
    fn config(&self) -> Config {
        Config {
            uri: self.uri.clone(),
            queues: self.queues.clone(),
            discover: self.discover,
            cert_file: self.cert_file.clone(),
            batch_size: self.batch_size,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_level))
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let combee = Combee::connect(&cli.config())
        .await
        .map_err(|e| anyhow::anyhow!(render_error(&e)))
        .context("Failed to start combee")?;
    let shell = Shell::new(combee, cli.export_dir.clone());

    if !cli.eval.is_empty() {
        for line in &cli.eval {
            if !run_line(&shell, line).await {
                break;
            }
        }
        return Ok(());
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("{PROMPT}");
        std::io::stdout().flush().context("Failed to write prompt")?;
        let Some(line) = lines.next_line().await.context("Failed to read input")? else {
            break;
        };
        if !run_line(&shell, &line).await {
            break;
        }
    }
    Ok(())
}

/// Runs one line; `false` once the user asked to leave.
async fn run_line(shell: &Shell<combee::MongoDbJobStore>, line: &str) -> bool {
    let command = match Command::parse(line) {
        Ok(Some(Command::Exit)) => return false,
        Ok(Some(command)) => command,
        Ok(None) => return true,
        Err(e) => {
            eprintln!("{}", render_error(&e));
            return true;
        }
    };
    match shell.execute(command).await {
        Ok(output) if output.is_empty() => {}
        Ok(output) => println!("{output}"),
        Err(e) => eprintln!("{}", render_error(&e)),
    }
    true
}

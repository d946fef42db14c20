use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use askdb_core::executor::ExecutionProgressEvent;
use askdb_core::operation::OperationMeta;
use askdb_runtime::{ChannelProgressReporter, QueryError, QueryService, RuntimeApp, RuntimeOptions};

#[derive(Debug, Parser)]
#[command(name = "askdb", about = "Ask a database questions in natural language")]
pub struct Cli {
    #[arg(long, global = true, default_value = "config/askdb.yaml")]
    config: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Answer one question and print the trace
    Ask(AskArgs),
    /// Read questions from stdin until EOF or `exit`
    Chat(ChatArgs),
    /// Print the configured suggested queries
    Suggestions,
    /// List registered operations
    Operations,
}

#[derive(Debug, Args)]
struct AskArgs {
    /// Print only the answer
    #[arg(long)]
    no_trace: bool,
    /// Print step progress to stderr
    #[arg(long)]
    verbose: bool,
    #[arg(value_name = "TEXT", required = true)]
    input: Vec<String>,
}

#[derive(Debug, Args)]
struct ChatArgs {
    #[arg(long)]
    no_trace: bool,
    #[arg(long)]
    verbose: bool,
}

impl Cli {
    pub async fn run(self) -> anyhow::Result<()> {
        match self.command {
            Command::Ask(args) => {
                let service = start(&self.config, args.verbose).await?;
                let input = args.input.join(" ");
                ask_once(&service, &input, args.no_trace).await
            }
            Command::Chat(args) => {
                let service = start(&self.config, args.verbose).await?;
                chat(&service, args.no_trace).await
            }
            Command::Suggestions => {
                let config = askdb_config::load_config(&self.config)
                    .with_context(|| format!("failed to load {}", self.config.display()))?;
                for (index, query) in config.app.suggested_queries.iter().enumerate() {
                    println!("{}. {}", index + 1, query);
                }
                Ok(())
            }
            Command::Operations => {
                let service = start(&self.config, false).await?;
                for meta in service.catalog() {
                    print_operation(&meta);
                }
                Ok(())
            }
        }
    }
}

async fn start(config: &Path, verbose: bool) -> anyhow::Result<Arc<QueryService>> {
    let mut options = RuntimeOptions::new();
    if verbose {
        let (reporter, events) = ChannelProgressReporter::channel();
        options = options.with_progress_reporter(Arc::new(reporter));
        tokio::spawn(print_progress(events));
    }
    let app = RuntimeApp::from_config_path(config, options)
        .await
        .with_context(|| format!("failed to start askdb from {}", config.display()))?;
    Ok(app.service)
}

async fn ask_once(service: &QueryService, input: &str, no_trace: bool) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let result = service.submit_query_with_cancel(input, &cancel).await;
    interrupt.abort();
    match result {
        Ok(response) => {
            if no_trace {
                println!("{}", response.answer);
            } else {
                println!("{}", response.trace);
            }
            Ok(())
        }
        Err(err) => {
            print_failure(&err, no_trace);
            Err(err.into())
        }
    }
}

async fn chat(service: &QueryService, no_trace: bool) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    loop {
        stdout.write_all(b"askdb> ").await?;
        stdout.flush().await?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line.eq_ignore_ascii_case("exit") || line.eq_ignore_ascii_case("quit") {
            break;
        }
        // Failures are reported and the session continues.
        if let Err(err) = ask_once(service, line, no_trace).await {
            eprintln!("error: {:#}", err);
        }
    }
    Ok(())
}

fn print_failure(err: &QueryError, no_trace: bool) {
    if no_trace {
        return;
    }
    if let Some(trace) = err.trace() {
        println!("{}", trace);
    }
}

fn print_operation(meta: &OperationMeta) {
    println!("{} ({})", meta.reference, meta.kind);
    if !meta.description.is_empty() {
        println!("    {}", meta.description);
    }
    for parameter in &meta.parameters {
        match &parameter.default {
            Some(default) => println!("    - {} = {:?}", parameter.name, default),
            None => println!("    - {}", parameter.name),
        }
    }
}

async fn print_progress(mut events: mpsc::UnboundedReceiver<ExecutionProgressEvent>) {
    while let Some(event) = events.recv().await {
        let step = event
            .step_index
            .map(|index| format!("step {}", index))
            .unwrap_or_else(|| "plan".to_string());
        let operation = event
            .operation
            .map(|operation| format!(" {}", operation))
            .unwrap_or_default();
        match event.message {
            Some(message) => eprintln!("[{}] {}{}: {}", step, event.phase, operation, message),
            None => eprintln!("[{}] {}{}", step, event.phase, operation),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ask_joins_words_and_accepts_global_config() {
        let cli = Cli::try_parse_from([
            "askdb",
            "ask",
            "--no-trace",
            "how",
            "many",
            "sales?",
            "--config",
            "other.yaml",
        ])
        .expect("parse");
        assert_eq!(cli.config, PathBuf::from("other.yaml"));
        match cli.command {
            Command::Ask(args) => {
                assert!(args.no_trace);
                assert!(!args.verbose);
                assert_eq!(args.input.join(" "), "how many sales?");
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_ask_requires_text() {
        assert!(Cli::try_parse_from(["askdb", "ask"]).is_err());
        let cli = Cli::try_parse_from(["askdb", "operations"]).expect("parse");
        assert_eq!(cli.config, PathBuf::from("config/askdb.yaml"));
    }
}

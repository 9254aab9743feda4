use anyhow::{Context, Result};
use clap::Parser;
use insights_assistant::{DataAssistant, LlmClient, PipelineConfig, RuleBasedGenerator, StructuredGenerator};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

#[derive(Parser)]
#[command(name = "insights-assistant")]
#[command(about = "Ask questions about a CSV file in plain English")]
struct Args {
    /// CSV file to analyse
    #[arg(long)]
    csv: PathBuf,

    /// Answer a single question and exit
    #[arg(short, long)]
    question: Option<String>,

    /// Skip the executive summary after loading
    #[arg(long)]
    no_summary: bool,

    /// Retry budget for both resolution and synthesis
    #[arg(long)]
    max_retries: Option<u32>,

    /// Use the offline rule-based interpreter even when OPENAI_API_KEY is set
    #[arg(long)]
    rules: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut config = PipelineConfig::from_env()?;
    if let Some(retries) = args.max_retries {
        config.max_resolution_attempts = retries;
        config.max_synthesis_attempts = retries;
        config.validate()?;
    }

    let generator: Arc<dyn StructuredGenerator> = match std::env::var("OPENAI_API_KEY") {
        Ok(key) if !args.rules && !key.is_empty() => Arc::new(LlmClient::from_config(key, &config)),
        _ => {
            if !args.rules {
                warn!("OPENAI_API_KEY is not set, using the rule-based interpreter");
            }
            Arc::new(RuleBasedGenerator::new())
        }
    };
    info!("Using '{}' generator", generator.name());

    let mut assistant = DataAssistant::new(config, generator)?;
    let profile = assistant
        .load_csv(&args.csv)
        .with_context(|| format!("failed to load {}", args.csv.display()))?;
    println!(
        "Loaded '{}': {} rows, {} columns\n",
        profile.name,
        profile.row_count,
        profile.columns.len()
    );

    if !args.no_summary {
        let summary = assistant.summarize().await?;
        println!("{}", summary.to_markdown());
    }

    if let Some(question) = args.question {
        answer(&mut assistant, &question).await?;
        return Ok(());
    }

    println!("Ask a question about the data (type 'exit' to quit).");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if matches!(question.to_lowercase().as_str(), "exit" | "quit") {
            break;
        }
        answer(&mut assistant, question).await?;
    }

    Ok(())
}

async fn answer(assistant: &mut DataAssistant, question: &str) -> Result<()> {
    let run = assistant.ask(question).await?;
    if let Some(sql) = run.sql() {
        debug!("SQL: {}", sql);
    }
    debug!(
        "Trace: {:?} (resolution attempts {}, synthesis attempts {})",
        run.trace, run.retry.resolution_attempts, run.retry.synthesis_attempts
    );
    println!("{}\n", run.message());
    Ok(())
}

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use conversation_manager::context::{SummarizationOutcome, TrimReport};
use conversation_manager::logging;
use conversation_manager::metrics::METRICS;
use conversation_manager::prelude::*;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Resource name used for guarded completion calls
const LLM_RESOURCE: &str = "llm";

/// `conversation-manager` - token-budgeted chat history and outbound quotas
#[derive(Parser, Debug)]
#[command(name = "conversation-manager")]
#[command(version)]
#[command(about = "Token-budgeted chat history and outbound call quotas.", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print Prometheus metrics when the command finishes
    #[arg(long, global = true)]
    metrics: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Archive a session as a plain-text transcript
    Export { session_id: String },

    /// Trim a 20-message sample conversation and show the result
    TrimTest {
        /// Only run this strategy (recency, recency_with_summary, smart, summarization)
        #[arg(long)]
        strategy: Option<TrimStrategy>,

        #[arg(long, default_value_t = 100)]
        max_tokens: usize,

        #[arg(long, default_value_t = 6)]
        keep_recent: usize,
    },

    /// Print a session transcript
    Show { session_id: String },

    /// Truncate a session to an empty history
    Clear { session_id: String },

    /// Consume one call of quota for a resource and print its window
    Quota {
        resource: String,

        /// Use the authenticated limit
        #[arg(long)]
        authenticated: bool,
    },

    /// Send one user message and print the reply
    Send {
        message: String,

        /// Resume this session instead of starting a new one
        #[arg(long)]
        session: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = run(&cli).await;

    if cli.metrics {
        print!("{}", METRICS.export_prometheus());
    }

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(1)
        }
    }
}

async fn run(cli: &Cli) -> Result<()> {
    let config = Config::load(cli.config.as_deref()).context("loading configuration")?;
    if let Err(e) = logging::init(&config.logging) {
        eprintln!("Warning: {}", e);
    }

    match &cli.command {
        Commands::Export { session_id } => {
            let store = open_history(&config).await?;
            store.require(session_id).await?;
            let archive_id = store.archive(session_id).await?;
            println!(
                "Chat history exported to {}",
                config
                    .history
                    .session_dir
                    .join(format!("{}.txt", archive_id))
                    .display()
            );
        }
        Commands::TrimTest {
            strategy,
            max_tokens,
            keep_recent,
        } => trim_test(&config, *strategy, *max_tokens, *keep_recent).await?,
        Commands::Show { session_id } => {
            let store = open_history(&config).await?;
            store.require(session_id).await?;
            print!("{}", store.transcript(session_id).await?);
        }
        Commands::Clear { session_id } => {
            let store = open_history(&config).await?;
            store.require(session_id).await?;
            store.clear(session_id).await?;
            println!("Cleared chat session {}", session_id);
        }
        Commands::Quota {
            resource,
            authenticated,
        } => {
            let guard = open_guard(&config).await?;
            let identity = if *authenticated {
                Identity::Authenticated
            } else {
                Identity::Anonymous
            };
            let limit = config.rate_limit.limit_for(identity);
            let state = guard.check_and_increment(resource, limit).await?;
            println!(
                "{}: {}/{} calls used, window resets at {}",
                resource,
                state.count,
                limit,
                state.resets_at(guard.window())
            );
        }
        Commands::Send { message, session } => {
            send(&config, message, session.as_deref()).await?;
        }
    }

    Ok(())
}

async fn open_history(config: &Config) -> Result<HistoryStore> {
    HistoryStore::open_dir(config.history.session_dir.clone(), config.history.max_files)
        .await
        .with_context(|| {
            format!(
                "opening session directory {}",
                config.history.session_dir.display()
            )
        })
}

async fn open_guard(config: &Config) -> Result<RateLimitGuard> {
    let store = FileRateLimitStore::new(config.rate_limit.state_dir.clone())
        .await
        .with_context(|| format!("opening rate limit state {}", config.rate_limit.state_dir))?;
    Ok(RateLimitGuard::with_window(
        Arc::new(store),
        config.rate_limit.window(),
    ))
}

fn estimator(config: &Config) -> Arc<dyn TokenEstimator> {
    match TiktokenEstimator::for_model(&config.token_budget.tokenizer_model) {
        Ok(estimator) => Arc::new(estimator),
        Err(e) => {
            warn!("Tokenizer unavailable ({}); estimating by word count", e);
            Arc::new(WordBasedEstimator::default())
        }
    }
}

fn sample_conversation() -> Vec<Message> {
    (0..20)
        .map(|i| {
            if i % 2 == 0 {
                Message::user(format!(
                    "This is user message number {}. It contains some text to increase the token count significantly.",
                    i
                ))
            } else {
                Message::assistant(format!(
                    "This is assistant response number {}. Each message adds more content to the history, making it longer and longer.",
                    i
                ))
            }
        })
        .collect()
}

async fn trim_test(
    config: &Config,
    strategy: Option<TrimStrategy>,
    max_tokens: usize,
    keep_recent: usize,
) -> Result<()> {
    let summarizer: Arc<dyn Summarizer> = if config.llm.api_key.is_some() {
        let client = OpenAiCompatibleClient::new(config.llm.clone())?;
        Arc::new(LlmSummarizer::new(Arc::new(client)))
    } else {
        Arc::new(ConcatenationSummarizer)
    };
    let trimmer = MessageTrimmer::new(estimator(config), Some(summarizer));

    let messages = sample_conversation();
    println!("--- Message Trimming Test ---");
    println!("Original Message Count: {}", messages.len());
    println!("Original Token Count: {}", trimmer.count_tokens(&messages));
    println!("Max Token Limit Set To: {}", max_tokens);

    let strategies = match strategy {
        Some(strategy) => vec![strategy],
        None => vec![TrimStrategy::Recency, TrimStrategy::RecencyWithSummary],
    };

    for strategy in strategies {
        let budget = TrimBudget::new(max_tokens, strategy).with_keep_recent(keep_recent);
        budget.validate()?;

        let report = trimmer.trim_with_report(&messages, &budget).await;
        println!("{}", "-".repeat(30));
        println!("Strategy: {}", strategy);
        print_report(&report);
    }

    Ok(())
}

fn print_report(report: &TrimReport) {
    println!("Resulting messages:");
    for message in &report.messages {
        let preview: String = message.content.chars().take(70).collect();
        println!("  - {}: {}...", message.role, preview);
    }
    println!("Final Token Count: {}", report.total_tokens);
    match &report.summarization {
        SummarizationOutcome::NotNeeded => {}
        SummarizationOutcome::Summarized => println!("Summarization: ok"),
        SummarizationOutcome::Degraded(reason) => println!("Summarization: degraded ({})", reason),
    }
    if report.clamped {
        println!("Recency clamp applied after summarization");
    }
}

async fn send(config: &Config, message: &str, session_id: Option<&str>) -> Result<()> {
    let history = Arc::new(open_history(config).await?);

    // Summaries and replies draw on the same quota, one unit per request
    let guard = Arc::new(open_guard(config).await?);
    let limit = config
        .rate_limit
        .limit_for(Identity::from_credential(config.llm.api_key.as_ref()));
    let client: Arc<dyn CompletionClient> = Arc::new(GuardedCompletionClient::new(
        Arc::new(OpenAiCompatibleClient::new(config.llm.clone())?),
        guard,
        LLM_RESOURCE,
        limit,
    ));
    let summarizer: Arc<dyn Summarizer> = Arc::new(LlmSummarizer::new(client.clone()));
    let trimmer = Arc::new(MessageTrimmer::new(estimator(config), Some(summarizer)));

    let session = ConversationSession::start(
        history,
        trimmer,
        config.token_budget.budget(),
        client,
        session_id,
    )
    .await?;

    let cancel = CancellationToken::new();
    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };

    let outcome = session.send(message, &cancel).await;
    ctrl_c.abort();

    match outcome? {
        TurnOutcome::Completed(reply) => println!("{}", reply.content),
        TurnOutcome::Cancelled => eprintln!("Turn cancelled"),
    }
    eprintln!("Session: {}", session.id());
    Ok(())
}

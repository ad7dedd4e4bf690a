use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use dialoguer::Input;
use instagram_client::{
    InstagramApiClient, InstagramSessionProvider, LiveCommentFeed, TerminalPrompt,
};
use keyword_matcher::KeywordExtractor;
use order_store::CsvOrderSink;
use orders_core::{
    AppConfig, ConfigError, CoreError, ErrorReporter, GrammarKind, MatchPolicy, ReceiptPrinter,
    SessionProvider, Settings,
};
use poll_service::{PollConfig, PollScheduler, SpoolerReceiptPrinter, StopReason};
use std::future::Future;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Records orders typed into an Instagram live chat.
#[derive(Parser)]
#[command(name = "live-orders")]
#[command(about = "Poll a live broadcast's comments and record order keywords")]
#[command(version)]
struct Cli {
    /// What to do
    #[arg(long, value_enum, default_value_t = Mode::Monitor)]
    mode: Mode,

    /// Stop after this many recorded orders (0 for no limit)
    #[arg(long)]
    limit: Option<u64>,

    /// Largest accepted count for the amount grammar (0 for no ceiling)
    #[arg(long)]
    ceiling: Option<u32>,

    /// Label used in the order file name
    #[arg(long)]
    filename: Option<String>,

    /// Order grammar to match
    #[arg(long, value_enum, default_value_t = Grammar::Grouped)]
    grammar: Grammar,

    /// Record every order token in a comment
    #[arg(long, conflicts_with = "first_match")]
    all_matches: bool,

    /// Record only the first order token in a comment
    #[arg(long)]
    first_match: bool,

    /// Do not print receipts
    #[arg(long)]
    no_print: bool,

    /// TOML settings file
    #[arg(long, env = "LIVE_ORDERS_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Log in (or verify the saved session) and show the identity in use
    Session,
    /// Look up the id of the account's current live broadcast
    Broadcast,
    /// Poll BROADCAST_ID and record orders
    Monitor,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Grammar {
    /// `500+2`: amount and count
    Amount,
    /// `A5+12`: group letter, group number and quantity
    Grouped,
}

impl From<Grammar> for GrammarKind {
    fn from(grammar: Grammar) -> Self {
        match grammar {
            Grammar::Amount => GrammarKind::Amount,
            Grammar::Grouped => GrammarKind::Grouped,
        }
    }
}

impl Cli {
    fn policy_override(&self) -> Option<MatchPolicy> {
        if self.all_matches {
            Some(MatchPolicy::All)
        } else if self.first_match {
            Some(MatchPolicy::FirstOnly)
        } else {
            None
        }
    }
}

/// How long shutdown waits for blocking work, such as an open verification
/// prompt, after the run has finished.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("live_orders=debug,orders_core=debug,instagram_client=debug,keyword_matcher=debug,order_store=debug,poll_service=debug,warn")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("live_orders=info,orders_core=info,instagram_client=info,keyword_matcher=info,order_store=info,poll_service=info,warn")
        })
    };
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    let result = block_on_with_grace(run(cli), SHUTDOWN_GRACE)
        .context("Failed to start the async runtime")
        .and_then(|result| result);

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let reporter = ErrorReporter::new();
            match e.downcast_ref::<CoreError>() {
                Some(core) => eprintln!("{}", reporter.fatal_message(core)),
                None => eprintln!("Error: {:#}", e),
            }
            ExitCode::FAILURE
        }
    }
}

/// Drives `future` on a fresh runtime, then gives blocking tasks at most
/// `grace` to finish before abandoning them.
fn block_on_with_grace<F: Future>(future: F, grace: Duration) -> std::io::Result<F::Output> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let output = runtime.block_on(future);
    runtime.shutdown_timeout(grace);
    Ok(output)
}

async fn run(cli: Cli) -> Result<()> {
    let settings = Settings::load(cli.config.as_deref())
        .map_err(CoreError::from)
        .context("Failed to load settings")?;
    let config = AppConfig::from_env(settings).map_err(CoreError::from)?;

    let api = Arc::new(InstagramApiClient::new(
        &config.settings.api.base_url,
        Duration::from_secs(config.settings.api.timeout_secs),
    )?);
    let provider = InstagramSessionProvider::new(
        Arc::clone(&api),
        config.credentials.clone(),
        config.settings.output.session_file.clone(),
        Arc::new(TerminalPrompt),
    );

    info!("Starting live-orders in {:?} mode", cli.mode);
    let result = match cli.mode {
        Mode::Session => check_session(&provider).await,
        Mode::Broadcast => lookup_broadcast(&api, &provider).await,
        Mode::Monitor => monitor(&cli, &config, Arc::clone(&api), provider).await,
    };

    info!("API usage: {}", api.metrics().get_metrics().await.summary());
    result
}

async fn check_session(provider: &InstagramSessionProvider) -> Result<()> {
    let session = provider.acquire(false).await?;
    println!("User agent: {}", session.user_agent());
    println!(
        "Account: {} ({})",
        session.username,
        session.user_id.as_deref().unwrap_or("unknown id")
    );
    println!("Session file: {}", provider.session_path().display());
    Ok(())
}

async fn lookup_broadcast(
    api: &InstagramApiClient,
    provider: &InstagramSessionProvider,
) -> Result<()> {
    let session = provider.acquire(false).await?;
    let user_id = api
        .user_id_from_username(&session, &session.username)
        .await?;
    let broadcast_id = api
        .live_broadcast_id(&session, &user_id, &session.username)
        .await?;
    info!("Live broadcast found for {}", session.username);
    println!("BROADCAST_ID={}", broadcast_id);
    Ok(())
}

async fn monitor(
    cli: &Cli,
    config: &AppConfig,
    api: Arc<InstagramApiClient>,
    provider: InstagramSessionProvider,
) -> Result<()> {
    let broadcast_id = config
        .require_broadcast_id()
        .map_err(CoreError::from)?
        .to_string();
    let settings = &config.settings;

    let limit = match cli.limit {
        Some(limit) => limit,
        None => prompt_number("Maximum orders to record (0 for no limit)")?,
    };
    let label = match &cli.filename {
        Some(label) => label.clone(),
        None => prompt_label()?,
    };
    if label.trim().is_empty() {
        return Err(CoreError::from(ConfigError::MissingField {
            field: "filename".to_string(),
        })
        .into());
    }

    let grammar = GrammarKind::from(cli.grammar);
    let ceiling = match (grammar, cli.ceiling) {
        (GrammarKind::Amount, Some(ceiling)) => Some(ceiling),
        (GrammarKind::Amount, None) => Some(prompt_number::<u32>(
            "Largest accepted count per order (0 for no ceiling)",
        )?),
        (GrammarKind::Grouped, ceiling) => {
            if ceiling.is_some() {
                warn!("--ceiling only applies to the amount grammar; ignoring it");
            }
            None
        }
    }
    .filter(|ceiling| *ceiling > 0);

    let mut extractor = KeywordExtractor::new(grammar).with_ceiling(ceiling);
    if let Some(policy) = cli.policy_override() {
        extractor = extractor.with_policy(policy);
    }
    info!(
        "Monitoring broadcast {} with the {} grammar ({:?}, ceiling {:?})",
        broadcast_id,
        grammar,
        extractor.policy(),
        extractor.ceiling()
    );

    let sink = CsvOrderSink::new(&settings.output.orders_dir, &label, grammar);
    info!("Orders will be written to {}", sink.target_path().display());

    let printer: Option<Box<dyn ReceiptPrinter>> = if settings.receipt.enabled && !cli.no_print {
        Some(Box::new(SpoolerReceiptPrinter::from_settings(
            &settings.output.receipts_dir,
            &settings.receipt,
        )))
    } else {
        info!("Receipt printing disabled");
        None
    };

    let feed = LiveCommentFeed::new(api, broadcast_id.as_str(), settings.poll.page_cap);
    let mut scheduler = PollScheduler::new(
        provider,
        feed,
        extractor,
        Box::new(sink),
        PollConfig::from_settings(&settings.poll),
    )
    .with_printer(printer)
    .with_skip_usernames(settings.filter.skip_usernames.iter().cloned())
    .with_limit(limit);

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, stopping");
            on_signal.cancel();
        }
    });

    match scheduler.run(cancel).await? {
        StopReason::LimitReached => info!("Order limit reached"),
        StopReason::Cancelled => info!("Stopped by operator"),
    }
    Ok(())
}

fn prompt_number<T>(prompt: &str) -> Result<T>
where
    T: Clone + std::str::FromStr + std::fmt::Display + Default,
    <T as std::str::FromStr>::Err: std::fmt::Display + std::fmt::Debug,
{
    let value = Input::<T>::new()
        .with_prompt(prompt)
        .default(T::default())
        .interact_text()
        .context("Failed to read from terminal")?;
    Ok(value)
}

fn prompt_label() -> Result<String> {
    let label = Input::<String>::new()
        .with_prompt("Label for the order file")
        .interact_text()
        .context("Failed to read from terminal")?;
    Ok(label.trim().to_string())
}

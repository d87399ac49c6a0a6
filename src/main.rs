use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use mercari_watcher::config::AppConfig;
use mercari_watcher::currency::{CurrencyCache, FrankfurterLookup};
use mercari_watcher::cycle::{CycleSettings, QueryCycleRunner};
use mercari_watcher::diagnostics::Diagnostics;
use mercari_watcher::extractor::ListingExtractor;
use mercari_watcher::models::{load_queries, Query};
use mercari_watcher::notifiers::{message, ConsoleNotifier, Notifier, Pacer, TelegramNotifier};
use mercari_watcher::scheduler::{wait_for_stop, SchedulerLoop};
use mercari_watcher::scraper::ChromeDriver;
use mercari_watcher::store::KnownItemStore;

#[derive(Parser, Debug)]
#[command(name = "mercari-watcher", version, about = "Alerts on new Mercari listings for saved searches")]
struct Cli {
    /// Configuration file, without extension
    #[arg(long, default_value = "config/default")]
    config: String,

    /// Newline separated search queries
    #[arg(long, default_value = "search_queries.txt")]
    queries: PathBuf,

    /// Run a single round and exit
    #[arg(long)]
    once: bool,

    /// Print notifications instead of sending them
    #[arg(long)]
    console: bool,
}

/// Everything that can fail before the first round.
struct Components {
    queries: Vec<Query>,
    store: KnownItemStore,
    extractor: ListingExtractor,
    currency: CurrencyCache,
    driver: ChromeDriver,
}

fn init_logging(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("mercari_watcher=info"));
    let console_layer = fmt::layer().with_target(true);

    match log_dir {
        Some(dir) => {
            let (writer, guard) = non_blocking(rolling::daily(dir, "mercari-watcher.log"));
            let file_layer = fmt::layer().with_ansi(false).with_writer(writer);
            tracing_subscriber::registry()
                .with(env_filter)
                .with(console_layer)
                .with(file_layer)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(console_layer)
                .init();
            None
        }
    }
}

fn build_notifier(config: &AppConfig, console: bool) -> Result<Box<dyn Notifier>> {
    if console {
        return Ok(Box::new(ConsoleNotifier));
    }
    match TelegramNotifier::from_config(&config.telegram)? {
        Some(telegram) => Ok(Box::new(telegram)),
        None => {
            warn!("No Telegram token configured, printing notifications to the console");
            Ok(Box::new(ConsoleNotifier))
        }
    }
}

fn setup(cli: &Cli, config: &AppConfig) -> Result<Components> {
    let queries = load_queries(&cli.queries)
        .with_context(|| format!("loading queries from {}", cli.queries.display()))?;
    info!(count = queries.len(), "Loaded search queries");

    let mut store = KnownItemStore::open(config.storage.known_items_file.clone())
        .context("opening known items store")?;
    for query in &queries {
        store.ensure_query(query);
    }

    let extractor = ListingExtractor::new(&config.scraper.base_url).context("building extractor")?;
    let lookup = FrankfurterLookup::from_config(&config.currency).context("building rate lookup")?;
    let currency = CurrencyCache::from_config(&config.currency, Box::new(lookup));
    let driver = ChromeDriver::launch(&config.scraper).context("launching browser")?;

    Ok(Components {
        queries,
        store,
        extractor,
        currency,
        driver,
    })
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = match AppConfig::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            let _guard = init_logging(None);
            error!(path = %cli.config, error = %e, "Invalid configuration");
            return ExitCode::FAILURE;
        }
    };
    let _guard = init_logging(Some(config.storage.log_dir.as_path()));

    info!("Starting Mercari Watcher...");

    let notifier = match build_notifier(&config, cli.console) {
        Ok(notifier) => notifier,
        Err(e) => {
            error!(error = %e, "Could not set up notifications");
            return ExitCode::FAILURE;
        }
    };
    let mut pacer = Pacer::new(
        notifier,
        &config.telegram.chat_id,
        Duration::from_millis(config.notifications.alert_delay_ms),
        config.notifications.send_debug_messages,
    );

    let components = match setup(&cli, &config) {
        Ok(components) => components,
        Err(e) => {
            let reason = format!("{:#}", e);
            error!(error = %reason, "Startup failed");
            if let Err(send_err) = pacer.send_text(&message::critical(&reason)).await {
                warn!(error = %send_err, "Could not send critical error notification");
            }
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = pacer.send_text(&message::startup(&components.queries)).await {
        warn!(error = %e, "Could not send startup notification");
    }

    let runner = QueryCycleRunner::new(
        Box::new(components.driver),
        components.extractor,
        components.store,
        components.currency,
        pacer,
        Diagnostics::from_config(&config.storage),
        CycleSettings::from_config(&config),
    );
    let mut scheduler = SchedulerLoop::new(runner, components.queries, &config.scheduler);
    let max_rounds = cli.once.then_some(1);

    let interrupted = tokio::select! {
        _ = scheduler.run(max_rounds) => false,
        _ = wait_for_stop(tokio::signal::ctrl_c()) => true,
    };

    if interrupted {
        info!("Stop requested, shutting down...");
        if let Err(e) = scheduler.runner_mut().pacer_mut().send_text(&message::stopped()).await {
            warn!(error = %e, "Could not send stop notification");
        }
    }

    let stats = scheduler.stats();
    info!(
        rounds = stats.rounds_completed,
        succeeded = stats.queries_succeeded,
        failed = stats.queries_failed,
        new_items = stats.new_items_found,
        "Mercari Watcher stopped"
    );
    ExitCode::SUCCESS
}

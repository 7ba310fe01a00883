//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use articlepipe_core::{Pipeline, ProgressReporter, RecordMapper, RetryPolicy, with_retry};
use articlepipe_shared::{
    AppConfig, BatchStatistics, FetchConfig, FetchTarget, StoredArticle, init_config, load_config,
};
use articlepipe_storage::Storage;

/// Landing pages of the quotes sandbox site, one per page number.
const QUOTES_URL_TEMPLATE: &str = "http://quotes.toscrape.com/page/{}/";
const QUOTES_CONCURRENCY: usize = 2;
const HTTPBIN_HTML_URL: &str = "https://httpbin.org/html";

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// articlepipe: concurrent article fetching into a local store.
#[derive(Parser)]
#[command(
    name = "articlepipe",
    version,
    about = "Fetch article pages concurrently, extract their text, and keep them in a local database.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Database file (overrides `[storage] path`).
    #[arg(long, env = "ARTICLEPIPE_DB", global = true)]
    pub db: Option<PathBuf>,

    /// Command output format.
    #[arg(long, default_value = "text", global = true)]
    pub output: OutputFormat,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Command output format.
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub(crate) enum OutputFormat {
    Text,
    Json,
}

/// Fetch tuning flags; unset values fall back to `[fetch]` in the config file.
#[derive(Args, Debug, Default)]
pub(crate) struct FetchArgs {
    /// Maximum concurrent fetches.
    #[arg(short, long)]
    pub concurrency: Option<usize>,

    /// Seconds to wait before each fetch.
    #[arg(short, long)]
    pub delay: Option<f64>,

    /// Per-fetch timeout in seconds.
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Response body cap in bytes.
    #[arg(long)]
    pub max_body: Option<usize>,

    /// Re-run the whole invocation this many times on a transient setup error.
    #[arg(long, default_value_t = 0)]
    pub retries: u32,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Fetch URLs and store the extracted articles.
    Crawl {
        /// URLs to fetch.
        urls: Vec<String>,

        /// Source label recorded with every stored article.
        #[arg(short, long)]
        source: String,

        /// File with one URL per line (`#` starts a comment).
        #[arg(short, long)]
        file: Option<PathBuf>,

        #[command(flatten)]
        fetch: FetchArgs,
    },

    /// Crawl the quotes.toscrape.com sandbox.
    Quotes {
        /// Number of listing pages to fetch.
        #[arg(long, default_value_t = 3)]
        pages: u32,

        #[command(flatten)]
        fetch: FetchArgs,
    },

    /// Fetch httpbin's sample HTML page repeatedly, one at a time.
    Httpbin {
        /// How many times to fetch it.
        #[arg(long, default_value_t = 3)]
        count: u32,
    },

    /// List stored articles, newest first.
    List {
        /// Only articles with this source label.
        #[arg(short, long)]
        source: Option<String>,

        #[arg(short, long, default_value_t = 10)]
        limit: u32,

        #[arg(long, default_value_t = 0)]
        offset: u32,
    },

    /// Search titles and content for a keyword.
    Search {
        keyword: String,

        #[arg(short, long, default_value_t = 10)]
        limit: u32,
    },

    /// Show article counts.
    Stats,

    /// Delete articles fetched more than N days ago.
    Purge {
        #[arg(long)]
        days: u32,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags. Logs go to stderr.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "articlepipe=info",
        1 => "articlepipe=debug",
        _ => "articlepipe=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let ctx = Context {
        db: cli.db,
        output: cli.output,
    };

    match cli.command {
        Command::Crawl {
            urls,
            source,
            file,
            fetch,
        } => {
            let targets = collect_targets(&urls, file.as_deref())?;
            cmd_crawl(&ctx, &targets, &source, &fetch).await
        }
        Command::Quotes { pages, fetch } => {
            let fetch = with_quotes_defaults(fetch);
            let targets: Vec<FetchTarget> = (1..=pages)
                .map(|i| FetchTarget::from(QUOTES_URL_TEMPLATE.replace("{}", &i.to_string())))
                .collect();
            cmd_crawl(&ctx, &targets, "quotes", &fetch).await
        }
        Command::Httpbin { count } => {
            let targets = vec![FetchTarget::from(HTTPBIN_HTML_URL); count as usize];
            let fetch = FetchArgs {
                concurrency: Some(1),
                delay: Some(0.5),
                ..FetchArgs::default()
            };
            cmd_crawl(&ctx, &targets, "httpbin", &fetch).await
        }
        Command::List {
            source,
            limit,
            offset,
        } => cmd_list(&ctx, source.as_deref(), limit, offset).await,
        Command::Search { keyword, limit } => cmd_search(&ctx, &keyword, limit).await,
        Command::Stats => cmd_stats(&ctx).await,
        Command::Purge { days } => cmd_purge(&ctx, days).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

/// Global flags every command needs.
struct Context {
    db: Option<PathBuf>,
    output: OutputFormat,
}

impl Context {
    /// Open the store: `--db`/`ARTICLEPIPE_DB` first, then `[storage] path`.
    async fn open_storage(&self, config: &AppConfig) -> articlepipe_shared::Result<Storage> {
        let path = match &self.db {
            Some(path) => path.clone(),
            None => config.storage.resolved_path()?,
        };
        let storage = Storage::open(&path)
            .await?
            .with_conflict_policy(config.storage.on_conflict);
        Ok(storage)
    }
}

/// Merge flag overrides onto the configured fetch settings.
fn resolve_fetch_config(config: &AppConfig, args: &FetchArgs) -> Result<FetchConfig> {
    let mut fetch = FetchConfig::from(config);

    if let Some(concurrency) = args.concurrency {
        fetch.concurrency = concurrency;
    }
    if let Some(delay) = args.delay {
        fetch.polite_delay = Duration::try_from_secs_f64(delay)
            .map_err(|e| eyre!("invalid --delay {delay}: {e}"))?;
    }
    if let Some(timeout) = args.timeout {
        fetch.timeout = Duration::from_secs(timeout);
    }
    if let Some(max_body) = args.max_body {
        fetch.max_body_bytes = max_body;
    }

    fetch.validate()?;
    Ok(fetch)
}

/// The quotes sandbox is crawled with two workers unless `-c` says otherwise.
fn with_quotes_defaults(mut args: FetchArgs) -> FetchArgs {
    args.concurrency.get_or_insert(QUOTES_CONCURRENCY);
    args
}

/// Positional URLs followed by the URLs listed in `file`, in order.
fn collect_targets(urls: &[String], file: Option<&Path>) -> Result<Vec<FetchTarget>> {
    let mut targets: Vec<FetchTarget> = urls.iter().map(|u| FetchTarget::from(u.as_str())).collect();

    if let Some(path) = file {
        let content = std::fs::read_to_string(path)
            .map_err(|e| eyre!("cannot read URL file '{}': {e}", path.display()))?;
        targets.extend(parse_url_list(&content));
    }

    if targets.is_empty() {
        return Err(eyre!("no URLs given: pass them as arguments or with --file"));
    }
    Ok(targets)
}

fn parse_url_list(content: &str) -> impl Iterator<Item = FetchTarget> + '_ {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(FetchTarget::from)
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_crawl(
    ctx: &Context,
    targets: &[FetchTarget],
    source: &str,
    args: &FetchArgs,
) -> Result<()> {
    let config = load_config()?;
    let fetch = resolve_fetch_config(&config, args)?;

    info!(
        targets = targets.len(),
        source,
        concurrency = fetch.concurrency,
        delay_ms = fetch.polite_delay.as_millis() as u64,
        "starting crawl"
    );

    let reporter = CliProgress::new(ctx.output == OutputFormat::Text);
    let policy = RetryPolicy::with_retries(args.retries);

    let (config, fetch, reporter) = (&config, &fetch, &reporter);
    let stats = with_retry(&policy, move || {
        crawl_attempt(ctx, config, targets, source, fetch, reporter)
    })
    .await?;

    match ctx.output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&stats)?),
        OutputFormat::Text => print_batch_summary(source, &stats),
    }
    Ok(())
}

/// One full crawl invocation: open the store, then fetch and persist.
async fn crawl_attempt(
    ctx: &Context,
    config: &AppConfig,
    targets: &[FetchTarget],
    source: &str,
    fetch: &FetchConfig,
    progress: &dyn ProgressReporter,
) -> articlepipe_shared::Result<BatchStatistics> {
    let storage = ctx.open_storage(config).await?;
    let pipeline = Pipeline::new(storage).with_mapper(RecordMapper::from(&config.limits));
    pipeline.run(targets, source, fetch, progress).await
}

fn print_batch_summary(source: &str, stats: &BatchStatistics) {
    println!();
    println!("  Crawl finished ({source})");
    println!("  Total:   {}", stats.total);
    println!("  Success: {}", stats.success);
    println!("  Failed:  {}", stats.failed);
    println!("  Stored:  {}", stats.stored);
    println!();
}

async fn cmd_list(ctx: &Context, source: Option<&str>, limit: u32, offset: u32) -> Result<()> {
    let config = load_config()?;
    let storage = ctx.open_storage(&config).await?;
    let mut stream = storage.stream(source, limit, offset).await?;

    match ctx.output {
        OutputFormat::Json => {
            let articles = stream.collect_all().await?;
            println!("{}", serde_json::to_string_pretty(&articles)?);
        }
        OutputFormat::Text => {
            let mut shown = 0;
            while let Some(article) = stream.next().await? {
                print_article(&article);
                shown += 1;
            }
            if shown == 0 {
                println!("No articles found.");
            }
        }
    }
    Ok(())
}

async fn cmd_search(ctx: &Context, keyword: &str, limit: u32) -> Result<()> {
    let config = load_config()?;
    let storage = ctx.open_storage(&config).await?;
    let results = storage.search(keyword, limit).await?;

    match ctx.output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&results)?),
        OutputFormat::Text => {
            println!("{} result(s) for '{keyword}'", results.len());
            for article in &results {
                print_article(article);
            }
        }
    }
    Ok(())
}

fn print_article(article: &StoredArticle) {
    let fetched = article
        .fetched_at
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".into());
    println!("[{}] {}", article.id, article.title);
    println!("    {}", article.url);
    println!(
        "    source: {}  fetched: {fetched}",
        article.source.as_deref().unwrap_or("-")
    );
}

async fn cmd_stats(ctx: &Context) -> Result<()> {
    let config = load_config()?;
    let storage = ctx.open_storage(&config).await?;
    let stats = storage.stats().await?;

    match ctx.output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&stats)?),
        OutputFormat::Text => {
            println!("  Database: {}", stats.database_path);
            println!("  Articles: {}", stats.total_articles);
            for (source, count) in &stats.by_source {
                let label = if source.is_empty() { "(none)" } else { source };
                println!("    {label}: {count}");
            }
        }
    }
    Ok(())
}

async fn cmd_purge(ctx: &Context, days: u32) -> Result<()> {
    let config = load_config()?;
    let storage = ctx.open_storage(&config).await?;
    let deleted = storage.purge_older_than(days).await?;

    match ctx.output {
        OutputFormat::Json => println!("{}", serde_json::json!({ "deleted": deleted, "days": days })),
        OutputFormat::Text => println!("Deleted {deleted} article(s) fetched more than {days} day(s) ago."),
    }
    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new(visible: bool) -> Self {
        if !visible {
            return Self {
                spinner: ProgressBar::hidden(),
            };
        }

        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.enable_steady_tick(Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn page_fetched(&self, url: &str, current: usize, total: usize) {
        self.spinner
            .set_message(format!("Fetched [{current}/{total}] {url}"));
    }

    fn record_stored(&self, url: &str, _id: i64, current: usize, total: usize) {
        self.spinner
            .set_message(format!("Stored [{current}/{total}] {url}"));
    }

    fn done(&self, _stats: &BatchStatistics) {
        self.spinner.finish_and_clear();
    }
}

use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_appender::rolling;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use watchdesk::DashboardError;
use watchdesk::config::DashboardConfig;
use watchdesk::gateway::{DashboardApi, HttpGateway};
use watchdesk::models::{
    DeliveryStatus, LinkedAccount, LogLevel, LogQuery, LogRecord, Profile, ProfileUpdate,
    ResourceId, StatsSnapshot,
};
use watchdesk::stream::{LiveEventStream, LogFeed, ReconnectPolicy, feed::follow};
use watchdesk::sync::{
    CacheState, CacheView, DashboardStore, DiagnosticRun, DiagnosticRunner, DiagnosticTracker,
    Mutation, MutationCoordinator, MutationOutcome, RunState,
};
use watchdesk::version::VERSION;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Parser, Debug)]
#[command(author, version = VERSION, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Follow the live log feed and refresh stats periodically
    Watch,
    /// Print the current stats snapshot
    Stats,
    /// Print recent log records, oldest first
    Logs {
        #[arg(long)]
        level: Option<LogLevel>,
        #[arg(long)]
        profile: Option<ResourceId>,
        #[arg(long, default_value_t = 50)]
        limit: u32,
        #[arg(long)]
        offset: Option<u32>,
    },
    #[command(subcommand)]
    Profiles(ProfileCommand),
    #[command(subcommand)]
    Accounts(AccountCommand),
    /// Show the scraper session diagnostics
    Session,
}

#[derive(Subcommand, Debug)]
enum ProfileCommand {
    List,
    Add {
        username: String,
        webhook_url: String,
        /// Check interval in minutes
        #[arg(long, default_value_t = 30)]
        interval: u32,
        #[arg(long)]
        no_posts: bool,
        #[arg(long)]
        no_stories: bool,
    },
    Set {
        id: ResourceId,
        #[arg(long)]
        webhook_url: Option<String>,
        #[arg(long)]
        interval: Option<u32>,
        #[arg(long)]
        posts: Option<bool>,
        #[arg(long)]
        stories: Option<bool>,
        #[arg(long)]
        active: Option<bool>,
    },
    Remove {
        id: ResourceId,
    },
    /// Trigger an immediate check
    Check {
        id: ResourceId,
    },
    /// Run the diagnostic test and show every step
    Test {
        id: ResourceId,
    },
}

#[derive(Subcommand, Debug)]
enum AccountCommand {
    List,
    Add { username: String, password: String },
    Remove { id: ResourceId },
    /// Try logging in with the given password
    Login { id: ResourceId, password: String },
}

fn init_logging(log_dir: &str, default_filter: &str) {
    // Log to a file: JSON format, daily rotation
    let file_appender = rolling::daily(log_dir, "watchdesk.log");
    let file_layer = fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false)
        .json();

    // Console output goes to stderr so command output stays clean on stdout.
    let console_layer = fmt::layer().with_writer(std::io::stderr);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .init();
}

/// Everything a command needs, wired from one config.
struct Dashboard {
    config: DashboardConfig,
    api: Arc<dyn DashboardApi>,
    store: DashboardStore,
    coordinator: MutationCoordinator,
    runner: DiagnosticRunner,
}

impl Dashboard {
    fn new(config: DashboardConfig) -> Result<Self, DashboardError> {
        let gateway = HttpGateway::from_config(&config)?;
        let diagnostic_api: Arc<dyn DashboardApi> =
            Arc::new(gateway.with_timeout(config.diagnostic_timeout())?);
        let api: Arc<dyn DashboardApi> = Arc::new(gateway);

        let store = DashboardStore::new(Arc::clone(&api));
        let coordinator = MutationCoordinator::new(Arc::clone(&api), store.clone());
        let runner = DiagnosticRunner::from_config(
            diagnostic_api,
            Arc::new(DiagnosticTracker::new()),
            &config,
        );
        Ok(Self {
            config,
            api,
            store,
            coordinator,
            runner,
        })
    }
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let args = Args::parse();

    let config = match DashboardConfig::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            return Err(e.into());
        }
    };

    let default_filter = match args.command {
        Command::Watch => "info",
        _ => "warn",
    };
    init_logging(&config.log_dir, default_filter);
    info!(version = VERSION, api = %config.api_base_url, "Starting watchdesk.");

    let dashboard = Dashboard::new(config)?;
    let result = match args.command {
        Command::Watch => watch(&dashboard).await,
        Command::Stats => show_stats(&dashboard).await,
        Command::Logs {
            level,
            profile,
            limit,
            offset,
        } => {
            let query = LogQuery {
                level,
                profile_id: profile,
                limit: Some(limit),
                offset,
            };
            show_logs(&dashboard, &query).await
        }
        Command::Profiles(cmd) => profiles(&dashboard, cmd).await,
        Command::Accounts(cmd) => accounts(&dashboard, cmd).await,
        Command::Session => show_session(&dashboard).await,
    };

    if let Err(e) = &result {
        error!(error = %e, "Command failed.");
    }
    result
}

fn fail(err: DashboardError) -> BoxError {
    eprintln!("Error: {}", err.user_message());
    err.into()
}

async fn watch(dashboard: &Dashboard) -> Result<(), BoxError> {
    let url = dashboard.config.resolved_stream_url()?;

    // The server replays recent records on connect, so the feed starts empty.
    let stream = LiveEventStream::new();
    let feed = LogFeed::shared(dashboard.config.log_feed_capacity);
    let _feed_subscription = follow(&feed, &stream);
    let _printer = stream.subscribe(print_log);

    let stream_handle = stream.spawn(url, ReconnectPolicy::from_config(&dashboard.config));
    let stats_task = dashboard
        .store
        .spawn_stats_refresh(dashboard.config.stats_refresh_interval());
    let mut stats_rx = dashboard.store.stats.subscribe();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl-C received, shutting down.");
                break;
            }
            changed = stats_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = stats_rx.borrow_and_update().clone();
                print_stats_update(&state);
            }
        }
    }

    stats_task.abort();
    stream_handle.shutdown();
    let buffered = feed.lock().map(|f| f.len()).unwrap_or_default();
    info!(buffered, stats = ?stream.stats(), "Watch stopped.");
    Ok(())
}

fn print_log(record: &LogRecord) {
    let owner = record
        .profile_id
        .map(|id| format!(" [profile {id}]"))
        .unwrap_or_default();
    println!(
        "{} {:<7}{} {}",
        record.created_at.format("%Y-%m-%d %H:%M:%S"),
        record.level.to_string().to_uppercase(),
        owner,
        record.message
    );
    if let Some(details) = &record.details {
        println!("        {details}");
    }
}

fn print_stats(stats: &StatsSnapshot) {
    let last_check = stats
        .last_check
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "never".to_string());
    println!(
        "profiles {}/{} active | posts {} | stories {} | errors {} | last check {}",
        stats.active_profiles,
        stats.total_profiles,
        stats.total_posts,
        stats.total_stories,
        stats.total_errors,
        last_check
    );
}

fn print_stats_update(state: &CacheState<StatsSnapshot>) {
    if state.refreshing {
        return;
    }
    match &state.view {
        CacheView::Pending => {}
        CacheView::Ready(stats) => print_stats(stats),
        CacheView::Error { error, last_good } => {
            warn!(error = %error, "Stats refresh failed.");
            if let Some(stats) = last_good {
                print!("(stale) ");
                print_stats(stats);
            }
        }
    }
}

async fn show_stats(dashboard: &Dashboard) -> Result<(), BoxError> {
    match dashboard.store.stats.refresh().await {
        CacheView::Ready(stats) => {
            print_stats(&stats);
            Ok(())
        }
        CacheView::Error { error, .. } => Err(fail(error)),
        CacheView::Pending => Ok(()),
    }
}

async fn show_logs(dashboard: &Dashboard, query: &LogQuery) -> Result<(), BoxError> {
    let mut feed = LogFeed::new(dashboard.config.log_feed_capacity);
    feed.load_recent(dashboard.api.as_ref(), query)
        .await
        .map_err(fail)?;
    if feed.is_empty() {
        println!("No log records.");
    }
    feed.records().for_each(print_log);
    Ok(())
}

async fn show_session(dashboard: &Dashboard) -> Result<(), BoxError> {
    let status = dashboard.api.session_status().await.map_err(fail)?;
    println!("logged in:     {}", status.is_logged_in);
    println!("valid session: {}", status.has_valid_session);
    if let Some(user) = &status.context_username {
        println!("username:      {user}");
    }
    println!("cookies:       {}", status.cookies_count);
    if let Some(result) = &status.test_login_result {
        println!("test login:    {result}");
    }
    if let Some(err) = &status.test_login_error {
        println!("login error:   {err}");
    }
    Ok(())
}

fn print_profiles(profiles: &[Profile]) {
    if profiles.is_empty() {
        println!("No profiles.");
        return;
    }
    println!(
        "{:>5}  {:<24} {:>8}  {:<6} {:<6} {:<6}  {}",
        "ID", "USERNAME", "INTERVAL", "POSTS", "STORY", "ACTIVE", "WEBHOOK"
    );
    for p in profiles {
        println!(
            "{:>5}  {:<24} {:>7}m  {:<6} {:<6} {:<6}  {}",
            p.id,
            p.username,
            p.check_interval,
            p.download_posts,
            p.download_stories,
            p.is_active,
            p.webhook_url
        );
    }
}

fn print_accounts(accounts: &[LinkedAccount]) {
    if accounts.is_empty() {
        println!("No linked accounts.");
        return;
    }
    for a in accounts {
        let last_login = a
            .last_login
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:>5}  {:<24} active={:<5} session={:<5} last login {}",
            a.id, a.username, a.is_active, a.has_valid_session, last_login
        );
    }
}

fn print_run(run: &DiagnosticRun) {
    let label = if run.label.is_empty() {
        format!("profile {}", run.resource_id)
    } else {
        format!("@{}", run.label)
    };
    println!("Diagnostic run for {label}: {:?}", run.state);
    for (n, step) in run.steps.iter().enumerate() {
        let time = step
            .timestamp
            .map(|t| t.format("%H:%M:%S").to_string())
            .unwrap_or_default();
        println!("  {:>2}. {:<28} {:<10} {}", n + 1, step.step, step.status, time);
        if let Some(details) = &step.details {
            println!("      {details}");
        }
    }

    let Some(outcome) = &run.outcome else {
        return;
    };
    if let Some(artifact) = &outcome.artifact {
        println!("  found {}: {}", artifact.kind, artifact.caption);
        if let Some(reason) = artifact.skip_reason() {
            println!("    download skipped: {reason}");
        }
    }
    match outcome.delivery_status() {
        DeliveryStatus::NotConfigured => println!("  webhook: not configured"),
        DeliveryStatus::Skipped { reason } => {
            println!("  webhook: test skipped ({})", reason.unwrap_or_default())
        }
        DeliveryStatus::Attempted { success } => println!(
            "  webhook: {}",
            if success { "delivered" } else { "delivery failed" }
        ),
    }
    if let Some(err) = &outcome.error {
        println!("  error: {err}");
    }
    if let Some(warning) = &outcome.warning {
        println!("  warning: {warning}");
    }
}

async fn profiles(dashboard: &Dashboard, cmd: ProfileCommand) -> Result<(), BoxError> {
    let coordinator = &dashboard.coordinator;
    match cmd {
        ProfileCommand::List => match dashboard.store.profiles.refresh().await {
            CacheView::Ready(list) => print_profiles(&list),
            CacheView::Error { error, .. } => return Err(fail(error)),
            CacheView::Pending => {}
        },
        ProfileCommand::Add {
            username,
            webhook_url,
            interval,
            no_posts,
            no_stories,
        } => {
            coordinator.edit_profile_form(|form| {
                form.username = username.trim_start_matches('@').to_string();
                form.webhook_url = webhook_url;
                form.check_interval = interval;
                form.download_posts = !no_posts;
                form.download_stories = !no_stories;
            });
            if let MutationOutcome::Profile(profile) =
                coordinator.submit_profile_form().await.map_err(fail)?
            {
                println!("Added profile @{} (id {}).", profile.username, profile.id);
            }
        }
        ProfileCommand::Set {
            id,
            webhook_url,
            interval,
            posts,
            stories,
            active,
        } => {
            let update = ProfileUpdate {
                webhook_url,
                check_interval: interval,
                download_posts: posts,
                download_stories: stories,
                is_active: active,
            };
            if update.is_empty() {
                println!("Nothing to update.");
                return Ok(());
            }
            coordinator
                .submit(Mutation::UpdateProfile { id, update })
                .await
                .map_err(fail)?;
            println!("Updated profile {id}.");
        }
        ProfileCommand::Remove { id } => {
            coordinator
                .submit(Mutation::DeleteProfile(id))
                .await
                .map_err(fail)?;
            println!("Removed profile {id}.");
        }
        ProfileCommand::Check { id } => {
            coordinator
                .submit(Mutation::ForceCheck(id))
                .await
                .map_err(fail)?;
            println!("Check triggered for profile {id}.");
        }
        ProfileCommand::Test { id } => {
            println!("Running diagnostic test for profile {id}...");
            match dashboard.runner.run(id).await.map_err(fail)? {
                Some(run) => {
                    print_run(&run);
                    if run.state == RunState::Failed {
                        return Err("diagnostic run failed".into());
                    }
                }
                None => println!("Run dismissed."),
            }
        }
    }
    Ok(())
}

async fn accounts(dashboard: &Dashboard, cmd: AccountCommand) -> Result<(), BoxError> {
    let coordinator = &dashboard.coordinator;
    match cmd {
        AccountCommand::List => match dashboard.store.accounts.refresh().await {
            CacheView::Ready(list) => print_accounts(&list),
            CacheView::Error { error, .. } => return Err(fail(error)),
            CacheView::Pending => {}
        },
        AccountCommand::Add { username, password } => {
            coordinator.edit_account_form(|form| {
                form.username = username;
                form.password = password;
            });
            if let MutationOutcome::Account(account) =
                coordinator.submit_account_form().await.map_err(fail)?
            {
                println!("Linked account {} (id {}).", account.username, account.id);
            }
        }
        AccountCommand::Remove { id } => {
            coordinator
                .submit(Mutation::DeleteAccount(id))
                .await
                .map_err(fail)?;
            println!("Removed account {id}.");
        }
        AccountCommand::Login { id, password } => {
            let outcome = coordinator
                .submit(Mutation::TestAccountLogin { id, password })
                .await
                .map_err(fail)?;
            if let MutationOutcome::LoginTest(result) = outcome {
                let message = result.message.unwrap_or_default();
                if result.success {
                    println!("Login OK. {message}");
                } else {
                    println!("Login failed. {message}");
                }
            }
        }
    }
    Ok(())
}

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use groupcast_lib::analytics::{AnalyticsSink, AnalyticsStore, BotAccount};
use groupcast_lib::config::Settings;
use groupcast_lib::destinations::DestinationStore;
use groupcast_lib::dispatch::{Broadcaster, DispatchReport, DispatchStatus, Dispatcher, TracingSink};
use groupcast_lib::session::{BotApiSession, ConnectStatus, SessionProfile, SessionStore};
use groupcast_lib::template::MessageTemplate;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "groupcast")]
#[command(about = "Broadcast a message to a list of groups, throttled and rate-limit aware", long_about = None)]
struct Cli {
    /// Settings file (defaults to $GROUPCAST_SETTINGS or ./settings.toml)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a bot token and save it as a session profile
    Login {
        /// Bot token; falls back to `bot_token` from the settings file
        #[arg(long)]
        token: Option<String>,
        #[arg(long, default_value = "default")]
        name: String,
    },
    /// List saved session profiles
    Sessions {
        /// Delete the named profile instead of listing
        #[arg(long, value_name = "NAME")]
        remove: Option<String>,
    },
    /// Manage the saved group list
    Groups {
        #[command(subcommand)]
        action: GroupsAction,
    },
    /// Send a message to every saved group
    Send {
        #[arg(long, conflicts_with = "message_file", required_unless_present = "message_file")]
        message: Option<String>,
        #[arg(long)]
        message_file: Option<PathBuf>,
        /// Expand {a|b} choices separately for every group
        #[arg(long)]
        spintax: bool,
        /// Session profile to use (defaults to the most recently used one)
        #[arg(long)]
        session: Option<String>,
        /// Seconds to wait after each successful send
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        interval: Option<u64>,
    },
    /// Show today's counters and per-group delivery rates
    Stats {
        #[arg(long, default_value_t = 7)]
        days: u32,
        #[arg(long)]
        session: Option<String>,
    },
}

#[derive(Subcommand)]
enum GroupsAction {
    /// Replace the saved list
    Save {
        #[arg(conflicts_with = "file", required_unless_present = "file")]
        names: Vec<String>,
        /// Import from a CSV file with a `group_name` column
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Print the saved list
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let settings_path = cli.settings.unwrap_or_else(Settings::settings_path);
    let settings = Settings::load_or_init(&settings_path)
        .with_context(|| format!("Failed to load settings from {}", settings_path.display()))?;
    settings.ensure_directories()?;

    match cli.command {
        Commands::Login { token, name } => login(&settings, token, &name).await?,
        Commands::Sessions { remove } => sessions(&settings, remove).await?,
        Commands::Groups { action } => match action {
            GroupsAction::Save { names, file } => save_groups(&settings, names, file).await?,
            GroupsAction::List => list_groups(&settings).await?,
        },
        Commands::Send {
            message,
            message_file,
            spintax,
            session,
            interval,
        } => {
            let template = match (message, message_file) {
                (Some(text), _) => MessageTemplate::new(text),
                (None, Some(path)) => MessageTemplate::new(
                    tokio::fs::read_to_string(&path)
                        .await
                        .with_context(|| format!("Failed to read {}", path.display()))?,
                ),
                (None, None) => bail!("either --message or --message-file is required"),
            };
            if spintax && !template.has_choices() {
                warn!("--spintax given but the message has no {{a|b}} choices");
            }
            send(&settings, template, spintax, session, interval).await?
        }
        Commands::Stats { days, session } => stats(&settings, days, session).await?,
    }

    Ok(())
}

async fn login(settings: &Settings, token: Option<String>, name: &str) -> Result<()> {
    let token = token
        .or_else(|| Some(settings.bot_token.clone()).filter(|t| !t.is_empty()))
        .ok_or_else(|| anyhow!("no token given and bot_token is empty in the settings file"))?;

    let session = BotApiSession::new(&settings.api_base_url, &token);
    let identity = match session.connect().await? {
        ConnectStatus::Connected(identity) => identity,
        ConnectStatus::Unauthorized(detail) => bail!("token rejected: {}", detail),
    };

    let mut profile = SessionProfile::new(name, &settings.api_base_url, &token);
    profile.account_id = Some(identity.id.to_string());
    let path = SessionStore::new(settings.sessions_path()).save(&profile).await?;

    let store = AnalyticsStore::open(settings.database_path())?;
    store.save_bot_account(&BotAccount {
        account_id: identity.id.to_string(),
        username: identity.username.clone(),
        display_name: identity.display_name(),
    })?;

    println!("Logged in as {} (profile '{}' saved to {})", identity.display_name(), name, path.display());
    Ok(())
}

async fn sessions(settings: &Settings, remove: Option<String>) -> Result<()> {
    let store = SessionStore::new(settings.sessions_path());

    if let Some(name) = remove {
        if store.remove(&name).await? {
            println!("Removed profile '{}'", name);
        } else {
            println!("No profile named '{}'", name);
        }
        return Ok(());
    }

    let profiles = store.list().await?;
    if profiles.is_empty() {
        println!("No saved sessions. Run `groupcast login` first.");
    }
    for profile in profiles {
        let last_used = profile
            .last_used
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "never".to_string());
        println!(
            "{:<20} account={:<12} last_used={}",
            profile.name,
            profile.account_id.as_deref().unwrap_or("-"),
            last_used
        );
    }
    Ok(())
}

async fn save_groups(settings: &Settings, names: Vec<String>, file: Option<PathBuf>) -> Result<()> {
    let names = match file {
        Some(path) => DestinationStore::new(path)
            .load()
            .await?
            .into_iter()
            .map(|d| d.to_string())
            .collect(),
        None => names,
    };

    let saved = DestinationStore::new(settings.groups_file()).save(names).await?;
    println!("Saved {} groups to {}", saved.len(), settings.groups_file().display());
    Ok(())
}

async fn list_groups(settings: &Settings) -> Result<()> {
    let groups = DestinationStore::new(settings.groups_file()).load().await?;
    if groups.is_empty() {
        println!("No groups saved.");
    }
    for group in groups {
        println!("{}", group);
    }
    Ok(())
}

async fn pick_profile(store: &SessionStore, name: Option<String>) -> Result<SessionProfile> {
    match name {
        Some(name) => Ok(store.load(&name).await?),
        None => store
            .latest()
            .await?
            .ok_or_else(|| anyhow!("no saved session; run `groupcast login` first")),
    }
}

async fn send(
    settings: &Settings,
    template: MessageTemplate,
    randomize: bool,
    profile_name: Option<String>,
    interval: Option<u64>,
) -> Result<()> {
    let profiles = SessionStore::new(settings.sessions_path());
    let profile = pick_profile(&profiles, profile_name).await?;

    let session = BotApiSession::from_profile(&profile).with_default_retry_after(settings.default_rate_limit_secs);
    if let ConnectStatus::Unauthorized(detail) = session.connect().await? {
        bail!("session '{}' is no longer authorized: {}", profile.name, detail);
    }
    profiles.touch(&profile.name).await?;
    let account_id = session.identity().map(|i| i.id.to_string()).unwrap_or_default();

    let store = AnalyticsStore::open(settings.database_path())?;
    let (analytics, writer) = AnalyticsSink::spawn(store, account_id);

    let mut config = settings.dispatch_config();
    if let Some(secs) = interval {
        config = config.with_inter_send_delay(secs);
    }
    let dispatcher = Dispatcher::new(config)
        .with_sink(Arc::new(TracingSink))
        .with_sink(Arc::new(analytics));
    let broadcaster = Broadcaster::new(
        Box::new(session),
        DestinationStore::new(settings.groups_file()),
        dispatcher,
    );

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, stopping after the current group");
                cancel.cancel();
            }
        });
    }

    info!(profile = %profile.name, "Starting broadcast");
    let report = broadcaster.run(&template, randomize, &cancel).await?;

    // dropping the broadcaster closes the analytics queue
    drop(broadcaster);
    if let Err(e) = writer.await {
        warn!("Analytics writer did not finish cleanly: {}", e);
    }

    print_summary(&report);
    Ok(())
}

fn print_summary(report: &DispatchReport) {
    for outcome in &report.outcomes {
        match &outcome.status {
            DispatchStatus::Sent => println!("  sent          {}", outcome.destination),
            DispatchStatus::RateLimited { retry_after_secs } => {
                println!("  rate limited  {} ({}s)", outcome.destination, retry_after_secs)
            }
            DispatchStatus::Failed { detail } => println!("  failed        {}: {}", outcome.destination, detail),
        }
    }
    println!(
        "{}: {} sent, {} rate limited, {} failed",
        if report.cancelled { "Cancelled" } else { "Done" },
        report.sent_count(),
        report.rate_limited_count(),
        report.failed_count()
    );
}

async fn stats(settings: &Settings, days: u32, profile_name: Option<String>) -> Result<()> {
    let profile = pick_profile(&SessionStore::new(settings.sessions_path()), profile_name).await?;
    let bot_id = profile
        .account_id
        .ok_or_else(|| anyhow!("profile '{}' has no account id; log in again", profile.name))?;
    let store = AnalyticsStore::open(settings.database_path())?;

    match store.get_bot_stats(&bot_id)? {
        Some(today) => println!(
            "Today: {} attempts, {} sent, {} failed, {} rate limited",
            today.messages_sent, today.successful_sends, today.failed_sends, today.rate_limited_sends
        ),
        None => println!("Today: nothing sent yet"),
    }

    println!("Groups, last {} days:", days);
    for group in store.get_group_performance(days)? {
        println!(
            "  {:<32} {:>5} attempts  {:>5.1}% delivered",
            group.group_name,
            group.message_count,
            group.success_rate * 100.0
        );
    }

    let errors = store.get_recent_errors(&bot_id, 5)?;
    if !errors.is_empty() {
        println!("Recent errors:");
    }
    for e in errors {
        println!(
            "  {} {:<24} {}",
            e.timestamp.format("%Y-%m-%d %H:%M"),
            e.group_name.as_deref().unwrap_or("-"),
            e.message
        );
    }

    for activity in store.get_bot_activity_stats(&bot_id, days)? {
        println!(
            "  {:<16} total={} ok={} failed={}",
            activity.activity_type, activity.total, activity.success_count, activity.fail_count
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_interval_is_rejected() {
        let result = Cli::try_parse_from(["groupcast", "send", "--message", "hi", "--interval", "0"]);
        assert!(result.is_err());

        let cli = Cli::try_parse_from(["groupcast", "send", "--message", "hi", "--interval", "5"]).unwrap();
        assert!(matches!(cli.command, Commands::Send { interval: Some(5), .. }));
    }
}

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use feedroom::bot::{ActionMemory, CommandHandler, ImageStore, ACTION_MEMORY_CAPACITY};
use feedroom::config::Config;
use feedroom::mastodon::MastodonClient;
use feedroom::matrix::MatrixClient;
use feedroom::pipeline::{assemble, FeedSources};
use feedroom::relay::{AttachmentRelay, ControlRoomWriter, RoomWriter};
use feedroom::services::{AccountLookup, ChatRoom, StatusStream, StreamSource};
use std::path::Path;
use std::sync::Arc;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "feedroom")]
#[command(about = "Relay a Mastodon account into Matrix rooms")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file path
    #[arg(short, long, default_value = "feedroom.toml")]
    config: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the relay
    Run,
    /// Validate the configuration and log in to both services
    Check,
    /// Show version
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Commands::Run);

    if let Commands::Version = command {
        println!("feedroom v{}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let mut config = Config::load_from_file(&cli.config)
        .with_context(|| format!("Failed to load config from {}", cli.config))?;

    config
        .expand_paths()
        .context("Failed to expand paths in config")?;

    init_logging(&config.logging.level)?;

    config
        .validate()
        .context("Configuration validation failed")?;

    match command {
        Commands::Run => run_relay(config).await,
        Commands::Check => check_config(&config).await,
        Commands::Version => Ok(()),
    }
}

fn secrets(config: &Config) -> (&str, &str) {
    (
        config.mastodon.access_token.as_deref().unwrap_or_default(),
        config.matrix.password.as_deref().unwrap_or_default(),
    )
}

async fn run_relay(config: Config) -> Result<()> {
    tracing::info!("Starting feedroom v{}", env!("CARGO_PKG_VERSION"));
    let (access_token, password) = secrets(&config);

    let mastodon = Arc::new(MastodonClient::new(&config.mastodon.server, access_token)?);
    let me = mastodon
        .current_account()
        .await
        .context("Failed to resolve the Mastodon account")?;
    tracing::info!("Mastodon account: @{} ({})", me.acct, me.id);

    let matrix = Arc::new(
        MatrixClient::login(&config.matrix.url, &config.matrix.user, password)
            .await
            .context("Failed to log in to Matrix")?,
    );
    let chat: Arc<dyn ChatRoom> = matrix.clone();

    let control_room = config.matrix.room_id.clone();
    let plan = config.pipeline_plan()?;
    chat.join_room(&control_room).await?;
    for room in plan.rooms() {
        if room != control_room {
            chat.join_room(room).await?;
        }
    }

    let home = mastodon.subscribe(StreamSource::User).await?;
    let mut tags = Vec::new();
    for tag in config.tag_streams() {
        let events = mastodon.subscribe(StreamSource::Hashtag(tag.clone())).await?;
        tags.push((tag, events));
    }

    let graph = assemble(&plan, mastodon.clone(), FeedSources { home, tags })
        .await
        .context("Failed to assemble the feed pipeline")?;

    let attachments = AttachmentRelay::spawn(chat.clone(), config.feed2matrix.image_bytes_limit)
        .context("Failed to create the attachment cache")?;
    let limits = config.room_limits();
    for (room, statuses) in graph.rooms {
        RoomWriter::new(chat.clone(), attachments.clone(), room, limits).spawn(statuses);
    }
    ControlRoomWriter {
        writer: RoomWriter::new(chat.clone(), attachments, control_room.clone(), limits),
        show_notifications: config.matrix.show_mastodon_notifications,
        show_statuses: config.matrix.show_own_toots_from_foreign_clients
            || config.matrix.show_complete_home_stream,
    }
    .spawn(graph.control, graph.notifications);

    let images = if config.images.enabled {
        let store = ImageStore::create(
            Path::new(&config.images.temp_dir),
            config.feed2matrix.image_count_limit,
        )?;
        tracing::info!("Storing images in {}", store.path().display());
        Some(Arc::new(store))
    } else {
        None
    };

    CommandHandler::new(
        chat,
        mastodon,
        config.bot_settings(),
        ActionMemory::spawn(ACTION_MEMORY_CAPACITY),
        images,
        Some(graph.mark_seen),
    )
    .spawn(matrix.spawn_sync(control_room));

    wait_for_shutdown().await?;

    // Dropping the runtime drops every task, and with them the image directory.
    tracing::info!("Received shutdown signal, stopping feedroom...");
    Ok(())
}

async fn check_config(config: &Config) -> Result<()> {
    println!("Testing configuration...");
    println!("✓ Configuration is valid");

    let plan = config.pipeline_plan()?;
    println!(
        "  {} destination blocks into {} rooms, {} tag streams",
        plan.destinations.len(),
        plan.rooms().len(),
        config.tag_streams().len()
    );

    let (access_token, password) = secrets(config);
    let mastodon = MastodonClient::new(&config.mastodon.server, access_token)?;
    let me = mastodon
        .current_account()
        .await
        .context("Failed to resolve the Mastodon account")?;
    println!("✓ Mastodon credentials are valid");
    println!("  Account: @{} ({})", me.acct, me.id);

    let matrix = MatrixClient::login(&config.matrix.url, &config.matrix.user, password)
        .await
        .context("Failed to log in to Matrix")?;
    println!("✓ Matrix login successful");
    println!("  User: {}", matrix.user_id());

    println!("\nConfiguration test completed successfully!");
    Ok(())
}

async fn wait_for_shutdown() -> Result<()> {
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
        .context("Failed to install SIGTERM handler")?;
    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())
        .context("Failed to install SIGINT handler")?;

    tokio::select! {
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM");
        },
        _ = sigint.recv() => {
            tracing::info!("Received SIGINT");
        },
        _ = signal::ctrl_c() => {
            tracing::info!("Received Ctrl+C");
        }
    }

    Ok(())
}

fn init_logging(level: &str) -> Result<()> {
    let filter = match level.to_lowercase().as_str() {
        "error" => tracing::Level::ERROR,
        "warn" => tracing::Level::WARN,
        "debug" => tracing::Level::DEBUG,
        "trace" => tracing::Level::TRACE,
        _ => tracing::Level::INFO,
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter.to_string())),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false)
                .compact(),
        )
        .init();

    Ok(())
}

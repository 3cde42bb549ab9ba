//! Media relay binary: runs the job pipeline against a local outbox.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use relay_media::{Extractor, HttpDownloader, MediaTools, SystemTools, WebFetcher};
use relay_models::{format_size, Attachment, ChatId, MediaKind, MessageRef, UserId, VideoMetadata};
use relay_worker::channels::ChannelStore;
use relay_worker::metrics::init_metrics;
use relay_worker::sweeper::run_sweeper;
use relay_worker::{
    CaptionEngine, LocalOutbox, ProbeOutcome, Relay, RelayConfig, Submission,
};

#[derive(Debug, Parser)]
#[command(name = "mediarelay", version, about = "Per-user media relay pipeline")]
struct Cli {
    /// Directory receiving uploaded files and their JSON sidecars
    #[arg(long, env = "RELAY_OUTBOX_DIR", default_value = "outbox")]
    outbox: PathBuf,

    /// Override the configured work directory
    #[arg(long)]
    work_dir: Option<PathBuf>,

    /// User id the submissions are made as
    #[arg(long, default_value_t = 1)]
    user: i64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run files or URLs through the pipeline into the outbox
    Submit {
        /// Local paths or http(s) URLs, processed in order
        #[arg(required = true)]
        inputs: Vec<String>,

        /// Upload under this name instead of the brand
        #[arg(long)]
        rename: Option<String>,

        /// Caption template applied to every upload
        #[arg(long)]
        caption: Option<String>,

        /// Thumbnail frame offset such as `5s` or `1m 30s`
        #[arg(long)]
        thumbnail_offset: Option<String>,

        /// Custom thumbnail image
        #[arg(long, conflicts_with = "thumbnail_offset")]
        thumbnail: Option<PathBuf>,

        /// Audio track order such as `2,1`; remuxes instead of uploading as is
        #[arg(long)]
        audio_order: Option<String>,

        /// Variant number to pick for extractor URLs
        #[arg(long, default_value_t = 1)]
        variant: usize,
    },

    /// Preview captions rendered from a template
    Render {
        template: String,

        /// Number of consecutive uploads to render
        #[arg(short = 'n', long, default_value_t = 3)]
        count: usize,
    },

    /// List the audio tracks and metadata of a file
    Probe { file: PathBuf },

    /// Manage saved channels
    Channels {
        #[command(subcommand)]
        action: ChannelAction,
    },
}

#[derive(Debug, Subcommand)]
enum ChannelAction {
    List,
    Add { id: String, name: String },
    Remove { id: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider (required for TLS/HTTPS)
    rustls::crypto::ring::default_provider()
        .install_default()
        .ok();

    // Load environment variables
    dotenvy::dotenv().ok();

    init_tracing()?;

    let cli = Cli::parse();
    let mut config = RelayConfig::from_env();
    if let Some(dir) = cli.work_dir.clone() {
        config.channels_file = dir.join("channels.json");
        config.work_dir = dir;
    }
    tokio::fs::create_dir_all(&config.work_dir)
        .await
        .with_context(|| format!("creating work dir {}", config.work_dir.display()))?;
    info!("Relay config: {:?}", config);

    match cli.command {
        Command::Render { template, count } => {
            let mut engine = CaptionEngine::new(&template);
            for n in 1..=count {
                println!("{:>3}: {}", n, engine.render());
            }
            Ok(())
        }
        Command::Probe { file } => probe(&config, &file).await,
        Command::Channels { action } => {
            let relay = build_relay(config, &cli.outbox).await?;
            channels(&relay, ChatId(cli.user), action).await
        }
        Command::Submit {
            inputs,
            rename,
            caption,
            thumbnail_offset,
            thumbnail,
            audio_order,
            variant,
        } => {
            if let Some(port) = config.metrics_port {
                init_metrics(port).context("installing metrics exporter")?;
                info!("Metrics exporter listening on port {}", port);
            }

            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            let sweeper = tokio::spawn(run_sweeper(
                config.work_dir.clone(),
                config.temp_retention,
                config.sweep_interval,
                shutdown_rx,
            ));

            let relay = build_relay(config, &cli.outbox).await?;
            let user = UserId(cli.user);
            let chat = ChatId(cli.user);

            if let Some(template) = caption {
                relay.settings().save_template(user, &template).await;
            }
            if let Some(offset) = thumbnail_offset {
                if relay.set_thumbnail_offset(user, chat, &offset).await?.is_none() {
                    bail!("invalid thumbnail offset: {}", offset);
                }
            }
            if let Some(image) = thumbnail {
                let photo = local_attachment(&image, chat, 0).await?;
                relay.set_custom_thumbnail(user, chat, &photo).await?;
            }

            let order = Order {
                rename: rename.as_deref(),
                audio_order: audio_order.as_deref(),
                variant,
            };
            for (i, input) in inputs.iter().enumerate() {
                submit(&relay, user, chat, input, i as i64 + 1, &order).await?;
            }

            let remuxes = relay.wait_idle().await;
            info!(remuxes = remuxes.len(), "All jobs finished");

            shutdown_tx.send(true).ok();
            sweeper.await.ok();
            Ok(())
        }
    }
}

fn init_tracing() -> anyhow::Result<()> {
    // Colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env()
        .add_directive("relay_worker=info".parse()?)
        .add_directive("relay_media=info".parse()?)
        .add_directive("mediarelay=info".parse()?);

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
    Ok(())
}

async fn build_relay(config: RelayConfig, outbox: &Path) -> anyhow::Result<Relay> {
    let platform = Arc::new(
        LocalOutbox::new(outbox)
            .await
            .with_context(|| format!("creating outbox {}", outbox.display()))?,
    );
    let tools = Arc::new(SystemTools::new(config.tool_timeouts));
    let http = HttpDownloader::new(config.max_file_bytes, config.http_timeout)?;
    let fetch = Arc::new(WebFetcher::new(
        http,
        Extractor::new(config.extractor_timeout.as_secs()),
    ));
    let channels = ChannelStore::load(&config.channels_file).await;

    Ok(Relay::new(Arc::new(config), platform, tools, fetch, channels))
}

/// Per-run submission options.
struct Order<'a> {
    rename: Option<&'a str>,
    audio_order: Option<&'a str>,
    variant: usize,
}

async fn submit(
    relay: &Relay,
    user: UserId,
    chat: ChatId,
    input: &str,
    message_id: i64,
    order: &Order<'_>,
) -> anyhow::Result<()> {
    if input.starts_with("http://") || input.starts_with("https://") {
        match relay.submit_url(user, chat, input).await? {
            Submission::VariantsOffered(prompt) => {
                let picked = relay
                    .choose_variant(user, chat, prompt, order.variant)
                    .await?;
                info!("{} -> {:?}", input, picked);
            }
            other => info!("{} -> {:?}", input, other),
        }
        return Ok(());
    }

    let path = PathBuf::from(input);
    if let Some(reply) = order.audio_order {
        relay.settings().set_audio_change(user, true).await;
        let attachment = local_attachment(&path, chat, message_id).await?;
        let submitted = relay.submit_attachment(user, chat, attachment).await?;
        relay.settings().set_audio_change(user, false).await;

        if let Submission::AudioOrder(ProbeOutcome::AwaitingOrder { prompt, tracks }) = submitted {
            info!("{} has {} audio tracks, applying order {}", input, tracks.len(), reply);
            let reply_message = MessageRef::new(chat, message_id);
            let answered = relay
                .handle_text(user, reply_message, Some(prompt), reply)
                .await?;
            info!("{} -> {:?}", input, answered);
        } else {
            info!("{} -> {:?}", input, submitted);
        }
        return Ok(());
    }

    let submitted = relay
        .submit_local_file(user, chat, path, order.rename)
        .await?;
    info!("{} -> {:?}", input, submitted);
    Ok(())
}

/// Attachment whose handle is a local path, as understood by [`LocalOutbox`].
async fn local_attachment(path: &Path, chat: ChatId, message_id: i64) -> anyhow::Result<Attachment> {
    let size = tokio::fs::metadata(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?
        .len();
    let file_name = path.file_name().map(|n| n.to_string_lossy().into_owned());
    let kind = MediaKind::classify(file_name.as_deref().unwrap_or_default(), None);
    Ok(Attachment {
        file_id: path.to_string_lossy().into_owned(),
        message: MessageRef::new(chat, message_id),
        file_name,
        kind,
        size: Some(size),
        metadata: VideoMetadata::default(),
    })
}

async fn probe(config: &RelayConfig, file: &Path) -> anyhow::Result<()> {
    let tools = SystemTools::new(config.tool_timeouts);
    let report = tools.probe(file).await;
    let size = tokio::fs::metadata(file).await.map(|m| m.len()).unwrap_or(0);
    println!(
        "{}: {}s {}x{} ({}){}",
        file.display(),
        report.metadata.duration,
        report.metadata.width,
        report.metadata.height,
        format_size(size),
        if report.degraded { " [degraded]" } else { "" }
    );

    let tracks = tools
        .audio_tracks(file)
        .await
        .with_context(|| format!("listing audio tracks of {}", file.display()))?;
    if tracks.is_empty() {
        println!("No audio track found in this file.");
    }
    for (i, track) in tracks.iter().enumerate() {
        println!("{}. {}", i + 1, track.describe());
    }
    Ok(())
}

async fn channels(relay: &Relay, chat: ChatId, action: ChannelAction) -> anyhow::Result<()> {
    match action {
        ChannelAction::List => {
            let saved = relay.list_channels().await;
            if saved.is_empty() {
                println!("No saved channels.");
            }
            for (id, name) in saved {
                println!("{}\t{}", id, name);
            }
        }
        ChannelAction::Add { id, name } => relay.save_channel(chat, &id, &name).await?,
        ChannelAction::Remove { id } => {
            if !relay.remove_channel(chat, &id).await? {
                bail!("channel {} is not saved", id);
            }
        }
    }
    Ok(())
}

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use modgate::config::Config;
use modgate::{output, Blob, ContentMeta, ModerationClient};

/// modgate: fail-open content moderation gateway.
///
/// Checks text and images against a remote moderation service, enforcing the
/// locally cached policy and allowing content whenever the service is down.
#[derive(Parser)]
#[command(name = "modgate", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check whether a piece of text may pass
    CheckText {
        /// The text to check
        text: String,

        /// User the text belongs to
        #[arg(long)]
        user_id: Option<String>,

        /// Channel the text was posted in
        #[arg(long)]
        channel: Option<String>,
    },

    /// Check whether a JPEG image may pass
    CheckImage {
        /// Path to the JPEG file
        path: PathBuf,

        /// User the image belongs to
        #[arg(long)]
        user_id: Option<String>,
    },

    /// Show the moderation policy currently in force
    Policy,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if missing)
    let _ = dotenvy::dotenv();

    // Set up structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("modgate=info")),
        )
        .init();

    let cli = Cli::parse();

    let config = Config::load()?;
    config.require_api_key()?;
    let client = ModerationClient::init(&config.api_key, config.client.clone())?;
    info!(base_url = %config.client.api_base_url, "Using moderation service");

    match cli.command {
        Commands::CheckText {
            text,
            user_id,
            channel,
        } => {
            let mut meta = ContentMeta::new();
            if let Some(user_id) = user_id {
                meta = meta.with_user_id(user_id);
            }
            if let Some(channel) = channel {
                meta = meta.with_channel(channel);
            }
            let permitted = client.check_text(&text, &meta).await;
            output::display_text_verdict(&text, permitted);
        }

        Commands::CheckImage { path, user_id } => {
            let file = tokio::fs::File::open(&path)
                .await
                .with_context(|| format!("Failed to open {}", path.display()))?;
            let mut meta = ContentMeta::new();
            if let Some(user_id) = user_id {
                meta = meta.with_user_id(user_id);
            }
            if let Some(name) = path.file_name() {
                meta = meta.with_content_id(name.to_string_lossy());
            }
            let result = client.check_image_jpeg(Blob::from_reader(file), &meta).await?;
            output::display_image_result(&result);
        }

        Commands::Policy => {
            let policy = client.policy().await;
            let fetched = client.policy_store().last_fetch().await.is_some();
            output::display_policy(&policy, fetched);
        }
    }

    client.flush().await;
    Ok(())
}

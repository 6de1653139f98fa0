//! Run command handler: Discord gateway plus conversation loop.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info};

use zeptocord::agent::ConversationLoop;
use zeptocord::bus::MessageBus;
use zeptocord::channels::{Channel, DiscordChannel, DiscordOpener, DiscordRest};
use zeptocord::config::Config;
use zeptocord::providers::{CompletionClient, OpenAiCompatClient};
use zeptocord::session::ConversationManager;
use zeptocord::utils::logging::init_logging;

/// Start the bot and run until Ctrl-C.
pub(crate) async fn cmd_run(config_path: Option<PathBuf>) -> Result<()> {
    let config = match &config_path {
        Some(path) => Config::load_from_path(path),
        None => Config::load(),
    }
    .context("Failed to load configuration")?;

    init_logging(&config.logging);
    config.validate().context("Invalid configuration")?;
    if !config.discord.enabled {
        anyhow::bail!("Discord is disabled in configuration; nothing to run");
    }

    let client = Arc::new(
        OpenAiCompatClient::from_config(&config.provider)
            .context("Failed to create completion client")?,
    );
    info!(model = client.model(), "Completion client ready");

    let store = Arc::new(
        ConversationManager::from_config(&config.conversation)
            .context("Failed to open conversation store")?,
    );

    let rest = Arc::new(DiscordRest::new(&config.discord.token));
    let opener = Arc::new(DiscordOpener::new(Arc::clone(&rest), &config.discord));

    let bus = Arc::new(MessageBus::new());
    let mut discord = DiscordChannel::new(config.discord.clone(), Arc::clone(&bus));

    let agent = Arc::new(
        ConversationLoop::new(client, store, opener)
            .with_discord_api(rest)
            .with_reply_config(config.reply.clone())
            .with_limits(config.conversation.clone())
            .with_bot_user(discord.bot_user()),
    );

    discord
        .start()
        .await
        .context("Failed to start Discord channel")?;
    let agent_task = tokio::spawn(Arc::clone(&agent).start(Arc::clone(&bus)));

    println!("zeptocord is running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    info!("Shutting down");

    agent.stop();
    if let Err(e) = discord.stop().await {
        error!("Failed to stop Discord channel: {}", e);
    }
    match agent_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Conversation loop exited with error: {}", e),
        Err(e) => error!("Conversation loop task failed: {}", e),
    }
    Ok(())
}

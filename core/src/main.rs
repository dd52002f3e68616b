/// Agora Sync - headless client that keeps the caches live and logs push traffic
use agora_sync::push::ConnectionState;
use agora_sync::{Config, HttpApiClient, Session, SyncClient, TcpPushTransport};
use colored::Colorize;
use std::env;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = env::args().collect();
    let config =
        Config::from_args(&args).map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;

    let session = Session::new();
    let api = HttpApiClient::new(&config, session.subscribe())
        .map_err(|e| anyhow::anyhow!("API client error: {}", e))?;
    let transport = TcpPushTransport::from_config(&config);

    info!("Starting Agora sync client");
    info!("   API: {}", config.api_base_url);
    info!("   Push: {}", config.push_addr);
    info!("   Protocol Version: {}", agora_sync::push::PROTOCOL_VERSION);

    let client = SyncClient::create(config, session.clone(), Arc::new(api), Arc::new(transport));

    let mut state = client.connection().subscribe_state();
    tokio::spawn(async move {
        while state.changed().await.is_ok() {
            let current = *state.borrow_and_update();
            let label = match current {
                ConnectionState::Connected => "connected".green(),
                ConnectionState::Connecting => "connecting".yellow(),
                ConnectionState::Disconnected => "disconnected".red(),
            };
            println!("{} {}", "push:".bold(), label);
        }
    });

    let mut typing = client.typing().subscribe();
    tokio::spawn(async move {
        while let Ok(update) = typing.recv().await {
            let verb = if update.is_typing { "is typing" } else { "stopped typing" };
            println!(
                "{} {} {} in {}",
                "typing:".bold(),
                update.user_id.cyan(),
                verb,
                update.conversation_id
            );
        }
    });

    match env::var("AGORA_TOKEN") {
        Ok(token) if !token.trim().is_empty() => {
            session.login(token.trim());
            match client.validate_session().await {
                Ok(Some(user)) => {
                    println!("{} {}", "signed in as".green(), user.full_name().bold());
                    if let Err(e) = client.fetch_notifications().await {
                        warn!("Could not load notifications: {}", e);
                    }
                    if let Err(e) = client.fetch_conversations().await {
                        warn!("Could not load conversations: {}", e);
                    }
                    println!(
                        "{} {}",
                        "unread notifications:".bold(),
                        client.store().unread_count().await
                    );
                }
                Ok(None) => {}
                Err(e) => eprintln!("{} {}", "session rejected:".red(), e.user_message()),
            }
        }
        _ => warn!("AGORA_TOKEN not set; running without a session"),
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    client.teardown().await;
    Ok(())
}

mod discord_commands;

use std::sync::Arc;

use poise::{Framework, FrameworkOptions, serenity_prelude as serenity};
use scrapwatch_bot::bm::{BmClient, HttpTransport};
use scrapwatch_bot::jobs::{self, UpdateContext};
use scrapwatch_bot::notify;
use scrapwatch_bot::sync::SessionSync;
use scrapwatch_bot::tasks::{SingleFlight, TaskQueue};
use scrapwatch_db::Database;

type Context<'a> = poise::Context<'a, crate::Data, crate::discord_commands::Error>;

pub(crate) struct Data {
    pub(crate) db: Database,
    pub(crate) client: Arc<BmClient<HttpTransport>>,
    pub(crate) sync: SessionSync<HttpTransport>,
}

#[tokio::main]
async fn main() {
    // Initialize tracing for structured logging
    #[cfg(debug_assertions)]
    let log_level = tracing::Level::DEBUG;
    #[cfg(not(debug_assertions))]
    let log_level = tracing::Level::INFO;

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .init();
    tracing::info!("Starting scrapwatch...");
    // Load configuration from environment variables or use defaults
    let config = scrapwatch_bot::config::Config::from_env();
    tracing::info!(
        "Configuration: db_path={}, api_url={}, cache_ttl={}s, rate={}req/s, update_interval={}s",
        config.database_path,
        config.battlemetrics_api_url,
        config.request_cache_ttl.as_secs(),
        config.requests_per_second,
        config.update_interval.as_secs()
    );

    let db = Database::open(&config.database_path).await.unwrap();
    let transport = HttpTransport::new(
        config.battlemetrics_api_url.clone(),
        config.battlemetrics_token.clone().unwrap(),
        config.http_timeout,
    )
    .unwrap();
    let client = Arc::new(BmClient::new(
        transport,
        config.request_cache_ttl,
        config.requests_per_second,
    ));

    let (events_tx, events_rx) = tokio::sync::mpsc::unbounded_channel();
    let sync = SessionSync::new(
        db.clone(),
        Arc::clone(&client),
        events_tx,
        config.sessions_refresh_secs,
    );
    let flights = Arc::new(SingleFlight::new());
    let queue = TaskQueue::spawn();

    // Slash commands arrive over the interactions gateway, so no
    // privileged intents are needed
    let intents = serenity::GatewayIntents::default();

    let framework_db = db.clone();
    let framework_client = Arc::clone(&client);
    let framework_sync = sync.clone();
    let framework = Framework::builder()
        .options(FrameworkOptions {
            commands: vec![
                discord_commands::track(),
                discord_commands::untrack(),
                discord_commands::list(),
                discord_commands::stats(),
                discord_commands::server(),
                discord_commands::overview(),
                discord_commands::notifications(),
            ],
            prefix_options: poise::PrefixFrameworkOptions {
                prefix: Some(config.discord_command_prefix.clone()),
                ..Default::default()
            },
            pre_command: |ctx| {
                Box::pin(async move {
                    tracing::info!(
                        "Executing command '{}' by user '{}'",
                        ctx.command().name,
                        ctx.author().name
                    );
                })
            },
            post_command: |ctx| {
                Box::pin(async move {
                    tracing::info!(
                        "Finished command '{}' by user '{}'",
                        ctx.command().name,
                        ctx.author().name
                    );
                })
            },
            ..Default::default()
        })
        .setup(move |ctx, _ready, framework| {
            Box::pin(async move {
                poise::builtins::register_globally(ctx, &framework.options().commands).await?;
                Ok(Data {
                    db: framework_db,
                    client: framework_client,
                    sync: framework_sync,
                })
            })
        })
        .build();

    let mut discord =
        serenity::ClientBuilder::new(config.discord_token.as_deref().unwrap(), intents)
            .framework(framework)
            .await
            .expect("Error creating Discord client");

    let http = Arc::clone(&discord.http);
    tokio::spawn(notify::run_notifier(db.clone(), Arc::clone(&http), events_rx));

    let update_ctx = UpdateContext {
        db,
        client,
        sync,
        flights,
        queue,
        http,
        server_refresh_secs: config.server_refresh_secs,
    };
    tokio::select! {
        _ = jobs::run_periodic(update_ctx, config.update_interval) => {
            tracing::error!("Update loop stopped unexpectedly");
        }
        result = discord.start() => {
            if let Err(e) = result {
                tracing::error!("Discord client error: {:?}", e);
            }
        }
    }
}

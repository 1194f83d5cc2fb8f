//! The periodic refresh pipeline.
//!
//! One cycle synchronizes sessions for every tracked player, refreshes
//! metadata of the pinned servers and redraws each guild's overview.
//! Server refreshes and overview redraws go through [`SingleFlight`]
//! so a slow cycle never stacks on top of itself, and message edits go
//! through the [`TaskQueue`] so Discord sees them one at a time.

use std::sync::Arc;
use std::time::Duration;

use poise::serenity_prelude as serenity;
use scrapwatch_db::{Database, DbError, Guild, PersistentMessage, Server};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::bm::{BmClient, Transport};
use crate::embeds::{self, PlayerReport};
use crate::error::SyncError;
use crate::helpers::now;
use crate::sync::{SessionSync, server_from_info};
use crate::tasks::{SingleFlight, TaskQueue};

/// Key under which overview pages are stored per guild.
const OVERVIEW_KEY: &str = "overview";

/// Everything one update cycle needs.
pub struct UpdateContext<T: Transport> {
    pub db: Database,
    pub client: Arc<BmClient<T>>,
    pub sync: SessionSync<T>,
    pub flights: Arc<SingleFlight>,
    pub queue: TaskQueue,
    pub http: Arc<serenity::Http>,
    pub server_refresh_secs: i64,
}

impl<T: Transport> Clone for UpdateContext<T> {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
            client: Arc::clone(&self.client),
            sync: self.sync.clone(),
            flights: Arc::clone(&self.flights),
            queue: self.queue.clone(),
            http: Arc::clone(&self.http),
            server_refresh_secs: self.server_refresh_secs,
        }
    }
}

/// Run update cycles forever, one per `interval`. The first cycle
/// starts immediately. A cycle that overruns the interval delays the
/// next tick instead of bursting.
pub async fn run_periodic<T: Transport>(ctx: UpdateContext<T>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        run_update_cycle(&ctx).await;
    }
}

/// One full pass: sessions, server metadata, overviews.
pub async fn run_update_cycle<T: Transport>(ctx: &UpdateContext<T>) {
    info!("update cycle started");
    ctx.sync.sync_all().await;
    refresh_tracked_servers(ctx).await;
    update_overviews(ctx).await;
    info!("update cycle finished");
}

/// Refresh metadata of every pinned server whose stored copy went
/// stale. Wipe timestamps and map links move on every wipe, so the
/// overview would drift without this.
async fn refresh_tracked_servers<T: Transport>(ctx: &UpdateContext<T>) {
    let server_ids = match ctx.db.tracked_server_ids().await {
        Ok(ids) => ids,
        Err(err) => {
            warn!(%err, "could not list tracked servers");
            return;
        }
    };

    for server_id in server_ids {
        let stale = match ctx.db.get_server(server_id.clone()).await {
            Ok(Some(server)) => server.is_stale(now(), ctx.server_refresh_secs),
            Ok(None) => true,
            Err(err) => {
                warn!(server = %server_id, %err, "could not load server");
                continue;
            }
        };

        let outcome = ctx
            .flights
            .run(&server_id, || stale, || refresh_server(ctx, &server_id))
            .await;
        if let Some(Err(err)) = outcome.completed() {
            warn!(server = %server_id, %err, "server refresh failed");
        }
    }
}

async fn refresh_server<T: Transport>(
    ctx: &UpdateContext<T>,
    server_id: &str,
) -> Result<(), SyncError> {
    let info = ctx.client.get_server_info(server_id).await?;
    ctx.db.upsert_server(server_from_info(&info, now())).await?;
    debug!(server = %server_id, "server metadata refreshed");
    Ok(())
}

async fn update_overviews<T: Transport>(ctx: &UpdateContext<T>) {
    let guilds = match ctx.db.list_guilds().await {
        Ok(guilds) => guilds,
        Err(err) => {
            warn!(%err, "could not list guilds");
            return;
        }
    };

    for guild in guilds {
        let key = format!("overview-{}", guild.id);
        let outcome = ctx
            .flights
            .run(&key, || true, || update_guild_overview(ctx, &guild))
            .await;
        if let Some(Err(err)) = outcome.completed() {
            warn!(guild = guild.id, %err, "overview update failed");
        }
    }
}

/// Build the sorted reports for a guild, along with its pinned server.
pub async fn build_guild_reports(
    db: &Database,
    guild: &Guild,
    now: i64,
) -> Result<(Vec<PlayerReport>, Option<Server>), DbError> {
    let tracked_server = match &guild.server_id {
        Some(id) => db.get_server(id.clone()).await?,
        None => None,
    };

    let tracked = db.tracked_players(guild.id).await?;
    let mut reports = Vec::with_capacity(tracked.len());
    for entry in &tracked {
        let sessions = db.sessions_for_player(entry.player.id.clone()).await?;
        let current_server = match &entry.player.server_id {
            Some(id) => db.get_server(id.clone()).await?,
            None => None,
        };
        reports.push(embeds::build_report(
            entry,
            &sessions,
            current_server.as_ref(),
            tracked_server.as_ref(),
            now,
        ));
    }
    embeds::sort_reports(&mut reports);
    Ok((reports, tracked_server))
}

/// Redraw one guild's overview by editing its persistent messages.
async fn update_guild_overview<T: Transport>(
    ctx: &UpdateContext<T>,
    guild: &Guild,
) -> anyhow::Result<()> {
    let Some(channel_id) = guild.overview_channel_id else {
        debug!(guild = guild.id, "no overview channel configured, skipping");
        return Ok(());
    };
    let channel = serenity::ChannelId::new(channel_id);

    let (reports, tracked_server) = build_guild_reports(&ctx.db, guild, now()).await?;
    let updated_at = chrono::Local::now().format("%H:%M:%S").to_string();
    let pages = embeds::overview_embeds(&reports, tracked_server.as_ref(), &updated_at);

    let messages = ensure_overview_messages(ctx, guild, channel, pages.len()).await?;

    for (message, embed) in messages.iter().zip(pages) {
        let http = Arc::clone(&ctx.http);
        let channel = serenity::ChannelId::new(message.channel_id);
        let message_id = serenity::MessageId::new(message.message_id);
        let name = format!("edit-{message_id}");
        ctx.queue.push(Some(name.as_str()), async move {
            let builder = serenity::EditMessage::new().content("").embed(embed);
            if let Err(err) = channel.edit_message(&http, message_id, builder).await {
                warn!(%channel, %message_id, %err, "overview edit failed");
            }
        });
    }

    Ok(())
}

/// Get the stored overview messages for a guild, recreating the whole
/// strip when the page count, the channel or the messages themselves
/// no longer line up.
async fn ensure_overview_messages<T: Transport>(
    ctx: &UpdateContext<T>,
    guild: &Guild,
    channel: serenity::ChannelId,
    count: usize,
) -> anyhow::Result<Vec<PersistentMessage>> {
    let existing = ctx
        .db
        .persistent_messages(guild.id, OVERVIEW_KEY.to_string())
        .await?;

    let mut live = Vec::new();
    if existing.iter().all(|message| message.channel_id == channel.get()) {
        for message in &existing {
            if ctx
                .http
                .get_message(channel, serenity::MessageId::new(message.message_id))
                .await
                .is_ok()
            {
                live.push(message.clone());
            }
        }
    }
    if live.len() == count && live.len() == existing.len() {
        return Ok(live);
    }

    for message in &existing {
        let message_channel = serenity::ChannelId::new(message.channel_id);
        if let Err(err) = message_channel
            .delete_message(&ctx.http, serenity::MessageId::new(message.message_id))
            .await
        {
            debug!(message = message.message_id, %err, "stale overview message not deleted");
        }
    }
    ctx.db
        .delete_persistent_messages(guild.id, OVERVIEW_KEY.to_string())
        .await?;

    let mut created = Vec::with_capacity(count);
    for page_index in 0..count {
        let sent = channel
            .send_message(
                &ctx.http,
                serenity::CreateMessage::new().content("Loading..."),
            )
            .await?;
        let message = PersistentMessage {
            guild_id: guild.id,
            key: OVERVIEW_KEY.to_string(),
            page_index: page_index as u32,
            channel_id: channel.get(),
            message_id: sent.id.get(),
        };
        ctx.db.save_persistent_message(message.clone()).await?;
        created.push(message);
    }
    info!(guild = guild.id, pages = count, "overview messages created");
    Ok(created)
}

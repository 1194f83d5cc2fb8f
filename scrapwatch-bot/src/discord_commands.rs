use crate::Context;
use poise::CreateReply;
use poise::command;
use poise::serenity_prelude::CreateEmbed;
use scrapwatch_bot::helpers::now;
use scrapwatch_bot::{embeds, jobs, validation};

pub(crate) type Error = Box<dyn std::error::Error + Send + Sync>;

/// Make sure the guild row exists and its name is current.
async fn ensure_guild(ctx: &Context<'_>) -> Result<u64, Error> {
    let guild_id = ctx
        .guild_id()
        .ok_or("This command can only be used in a server")?
        .get();
    let name = ctx
        .partial_guild()
        .await
        .map(|guild| guild.name)
        .unwrap_or_default();
    ctx.data().db.upsert_guild(guild_id, name).await?;
    Ok(guild_id)
}

/// Track a Battlemetrics player in this server's overview
#[command(slash_command, prefix_command, required_permissions = "ADMINISTRATOR")]
pub async fn track(
    ctx: Context<'_>,
    #[description = "Battlemetrics player id"] player_id: String,
    #[description = "Display name shown on the overview"] nickname: Option<String>,
) -> Result<(), Error> {
    let data = ctx.data();
    let guild_id = ensure_guild(&ctx).await?;
    validation::validate_player_id(&player_id)?;

    let info = match data.client.get_player_info(&player_id).await {
        Ok(info) => info,
        Err(err) => {
            tracing::warn!(player = %player_id, %err, "player lookup failed");
            ctx.say("Could not fetch that player from Battlemetrics.")
                .await?;
            return Ok(());
        }
    };
    let player = data
        .db
        .create_missing_player(info.id.clone(), info.attributes.name.clone())
        .await?;

    let nickname = nickname.unwrap_or_else(|| player.name.clone());
    validation::validate_nickname(&nickname)?;
    let newly_tracked = data
        .db
        .track_player(guild_id, player.id.clone(), nickname.clone())
        .await?;

    // Pull the history right away so the next overview has data
    let server_ids: Vec<String> = data
        .db
        .get_guild(guild_id)
        .await?
        .and_then(|guild| guild.server_id)
        .into_iter()
        .collect();
    if let Err(err) = data.sync.sync_player(&player.id, &server_ids, true).await {
        tracing::warn!(player = %player.id, %err, "initial sync failed");
    }

    let reply = if newly_tracked {
        format!("Now tracking **{}** ({}).", nickname, player.id)
    } else {
        "That player is already tracked.".to_string()
    };
    ctx.say(reply).await?;
    Ok(())
}

/// Stop tracking a player in this server
#[command(slash_command, prefix_command, required_permissions = "ADMINISTRATOR")]
pub async fn untrack(
    ctx: Context<'_>,
    #[description = "Battlemetrics player id"] player_id: String,
) -> Result<(), Error> {
    let data = ctx.data();
    let guild_id = ensure_guild(&ctx).await?;
    validation::validate_player_id(&player_id)?;

    let removed = data.db.untrack_player(guild_id, player_id.clone()).await?;
    let reply = if removed {
        format!("Stopped tracking player {player_id}.")
    } else {
        "That player is not tracked.".to_string()
    };
    ctx.say(reply).await?;
    Ok(())
}

/// List the players tracked in this server
#[command(slash_command, prefix_command)]
pub async fn list(ctx: Context<'_>) -> Result<(), Error> {
    let data = ctx.data();
    let guild_id = ensure_guild(&ctx).await?;

    let tracked = data.db.tracked_players(guild_id).await?;
    let embed = CreateEmbed::default().title("Tracked Players").color(0x5865F2);
    let embed = if tracked.is_empty() {
        embed.description("No players tracked yet.")
    } else {
        let list: String = tracked
            .iter()
            .map(|entry| format!("- **{}** ({})", entry.nickname, entry.player.id))
            .collect::<Vec<_>>()
            .join("\n");
        embed.description(list)
    };
    ctx.send(CreateReply::default().embed(embed)).await?;
    Ok(())
}

/// Show the full player overview right now
#[command(slash_command, prefix_command)]
pub async fn stats(ctx: Context<'_>) -> Result<(), Error> {
    let data = ctx.data();
    let guild_id = ensure_guild(&ctx).await?;
    let guild = data
        .db
        .get_guild(guild_id)
        .await?
        .ok_or("This server is not set up yet")?;

    let (reports, tracked_server) = jobs::build_guild_reports(&data.db, &guild, now()).await?;
    if reports.is_empty() {
        ctx.say("No players tracked yet.").await?;
        return Ok(());
    }

    let updated_at = chrono::Local::now().format("%H:%M:%S").to_string();
    let pages = embeds::overview_embeds(&reports, tracked_server.as_ref(), &updated_at);
    let mut reply = CreateReply::default();
    // Discord caps a message at ten embeds
    for page in pages.into_iter().take(10) {
        reply = reply.embed(page);
    }
    ctx.send(reply).await?;
    Ok(())
}

/// Pin a Battlemetrics server to this Discord server
#[command(
    slash_command,
    prefix_command,
    required_permissions = "ADMINISTRATOR",
    subcommands("server_set", "server_unset"),
    subcommand_required
)]
pub async fn server(_ctx: Context<'_>) -> Result<(), Error> {
    Ok(())
}

/// Pin a server; overviews scope online status and playtime to it
#[command(
    slash_command,
    prefix_command,
    required_permissions = "ADMINISTRATOR",
    rename = "set"
)]
pub async fn server_set(
    ctx: Context<'_>,
    #[description = "Battlemetrics server id"] server_id: String,
) -> Result<(), Error> {
    let data = ctx.data();
    let guild_id = ensure_guild(&ctx).await?;
    validation::validate_server_id(&server_id)?;

    let server = match data.sync.ensure_server(&server_id).await {
        Ok(server) => server,
        Err(err) => {
            tracing::warn!(server = %server_id, %err, "server lookup failed");
            ctx.say("Could not fetch that server from Battlemetrics.")
                .await?;
            return Ok(());
        }
    };
    data.db
        .set_guild_server(guild_id, Some(server.id.clone()))
        .await?;
    ctx.say(format!("Tracked server set to **{}**.", server.name))
        .await?;
    Ok(())
}

/// Unpin the tracked server
#[command(
    slash_command,
    prefix_command,
    required_permissions = "ADMINISTRATOR",
    rename = "unset"
)]
pub async fn server_unset(ctx: Context<'_>) -> Result<(), Error> {
    let data = ctx.data();
    let guild_id = ensure_guild(&ctx).await?;
    data.db.set_guild_server(guild_id, None).await?;
    ctx.say("Tracked server unset.").await?;
    Ok(())
}

/// Maintain the auto-updating player overview in this channel
#[command(slash_command, prefix_command, required_permissions = "ADMINISTRATOR")]
pub async fn overview(ctx: Context<'_>) -> Result<(), Error> {
    let data = ctx.data();
    let guild_id = ensure_guild(&ctx).await?;
    data.db
        .set_overview_channel(guild_id, ctx.channel_id().get())
        .await?;
    ctx.say("The player overview will be maintained in this channel.")
        .await?;
    Ok(())
}

/// Direct-message notifications when tracked players go on or offline
#[command(
    slash_command,
    prefix_command,
    subcommands("notifications_enable", "notifications_disable"),
    subcommand_required
)]
pub async fn notifications(_ctx: Context<'_>) -> Result<(), Error> {
    Ok(())
}

/// Get a DM whenever a tracked player goes on or offline
#[command(slash_command, prefix_command, rename = "enable")]
pub async fn notifications_enable(ctx: Context<'_>) -> Result<(), Error> {
    let data = ctx.data();
    let guild_id = ensure_guild(&ctx).await?;
    data.db
        .enable_notifications(guild_id, ctx.author().id.get())
        .await?;
    ctx.say("All notifications enabled.").await?;
    Ok(())
}

/// Stop receiving presence DMs from this server
#[command(slash_command, prefix_command, rename = "disable")]
pub async fn notifications_disable(ctx: Context<'_>) -> Result<(), Error> {
    let data = ctx.data();
    let guild_id = ensure_guild(&ctx).await?;
    let removed = data
        .db
        .disable_notifications(guild_id, ctx.author().id.get())
        .await?;
    let reply = if removed {
        "All notifications disabled."
    } else {
        "You had no notifications enabled here."
    };
    ctx.say(reply).await?;
    Ok(())
}

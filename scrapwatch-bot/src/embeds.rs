//! Embed rendering for tracked player overviews.
//!
//! Reports are derived from stored sessions only; rendering never
//! touches the network. Pages hold ten players each, the first page
//! carries the header and the last one the update timestamp.

use poise::serenity_prelude::{CreateEmbed, CreateEmbedAuthor, CreateEmbedFooter};
use scrapwatch_db::{Server, Session, TrackedPlayer};

use crate::bedtime::{self, BedtimeStats};
use crate::helpers::{format_hours, hours_between, round1, time_played_since};

pub const PLAYERS_PER_PAGE: usize = 10;
const EMBED_COLOR: u32 = 0x5865F2;
/// Sessions needed before the sleep block is worth showing.
const MIN_SESSIONS_FOR_SLEEP: usize = 5;

/// Everything the embed needs to know about one tracked player.
#[derive(Debug, Clone)]
pub struct PlayerReport {
    pub player_id: String,
    pub nickname: String,
    /// Server the player is currently on, if any
    pub server_id: Option<String>,
    pub server_name: Option<String>,
    /// On the guild's pinned server, or anywhere when unpinned
    pub is_online: bool,
    pub online_since_hrs: Option<f64>,
    pub offline_since_hrs: Option<f64>,
    /// Hours played on the pinned server since its last wipe
    pub wipe_playtime_hrs: Option<f64>,
    pub sleep: Option<BedtimeStats>,
}

/// Derive a report for one tracked player from their session history.
pub fn build_report(
    tracked: &TrackedPlayer,
    sessions: &[Session],
    current_server: Option<&Server>,
    tracked_server: Option<&Server>,
    now: i64,
) -> PlayerReport {
    let player = &tracked.player;
    let is_online = match tracked_server {
        Some(server) => player.server_id.as_deref() == Some(server.id.as_str()),
        None => player.server_id.is_some(),
    };

    let sleep = if sessions.len() >= MIN_SESSIONS_FOR_SLEEP {
        bedtime::analyze(sessions)
    } else {
        None
    };

    let wipe_playtime_hrs = tracked_server.map(|server| {
        let since = server.wipe.unwrap_or(0);
        time_played_since(sessions, &server.id, since, now) as f64 / 3600.0
    });

    let latest = sessions
        .iter()
        .max_by(|a, b| (a.start, &a.id).cmp(&(b.start, &b.id)));

    let mut online_since_hrs = None;
    let mut offline_since_hrs = None;
    if let Some(latest) = latest {
        match latest.stop {
            Some(stop) if !is_online => offline_since_hrs = Some(hours_between(stop, now)),
            _ => online_since_hrs = Some(hours_between(latest.start, now)),
        }
    }

    PlayerReport {
        player_id: player.id.clone(),
        nickname: tracked.nickname.clone(),
        server_id: player.server_id.clone(),
        server_name: current_server.map(|server| server.name.clone()),
        is_online,
        online_since_hrs,
        offline_since_hrs,
        sleep,
        wipe_playtime_hrs,
    }
}

/// Online players first, then players online elsewhere, then by how
/// recently they were seen.
pub fn sort_reports(reports: &mut [PlayerReport]) {
    reports.sort_by(|a, b| {
        b.is_online
            .cmp(&a.is_online)
            .then_with(|| b.server_id.is_some().cmp(&a.server_id.is_some()))
            .then_with(|| {
                let a_hrs = a.offline_since_hrs.or(a.online_since_hrs).unwrap_or(0.0);
                let b_hrs = b.offline_since_hrs.or(b.online_since_hrs).unwrap_or(0.0);
                a_hrs
                    .partial_cmp(&b_hrs)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
    });
}

/// Render the paged overview. With a pinned server only players with
/// wipe playtime are shown; the description says how many are hidden.
pub fn overview_embeds(
    reports: &[PlayerReport],
    tracked_server: Option<&Server>,
    updated_at: &str,
) -> Vec<CreateEmbed> {
    let displayed: Vec<&PlayerReport> = reports
        .iter()
        .filter(|report| {
            tracked_server.is_none() || report.wipe_playtime_hrs.unwrap_or(0.0) > 0.0
        })
        .collect();

    let page_count = displayed.len().div_ceil(PLAYERS_PER_PAGE).max(1);
    let mut embeds = Vec::with_capacity(page_count);

    for page in 0..page_count {
        let mut embed = CreateEmbed::default().color(EMBED_COLOR);

        for report in displayed
            .iter()
            .skip(page * PLAYERS_PER_PAGE)
            .take(PLAYERS_PER_PAGE)
        {
            let (name, value) = player_field(report, tracked_server.is_some());
            embed = embed.field(name, value, false);
        }

        if page == 0 {
            if let Some(server) = tracked_server {
                let mut author = CreateEmbedAuthor::new(format!("Tracking: {}", server.name))
                    .url(format!(
                        "https://www.battlemetrics.com/servers/rust/{}",
                        server.id
                    ));
                if let Some(preview) = &server.map_preview {
                    author = author.icon_url(preview);
                }
                embed = embed.author(author);
            }
            embed = embed
                .title("Tracked Players")
                .description(description_line(reports, &displayed, tracked_server));
        }

        if page + 1 == page_count {
            embed = embed.footer(CreateEmbedFooter::new(format!("Updated at {updated_at}")));
        }

        embeds.push(embed);
    }

    embeds
}

fn description_line(
    all: &[PlayerReport],
    displayed: &[&PlayerReport],
    tracked_server: Option<&Server>,
) -> String {
    let online = displayed
        .iter()
        .filter(|report| {
            if tracked_server.is_some() {
                report.is_online
            } else {
                report.server_id.is_some()
            }
        })
        .count();
    let mut description = format!(
        "**{online}**/**{}** tracked players online (showing {}/{})",
        all.len(),
        displayed.len(),
        all.len()
    );
    if let Some(url) = tracked_server.and_then(|server| server.map_url.as_ref()) {
        description.push_str(&format!("\n[**View Server Map**]({url})"));
    }
    description
}

fn player_field(report: &PlayerReport, has_tracked_server: bool) -> (String, String) {
    let icon = if report.is_online {
        "🟢"
    } else if report.server_id.is_some() {
        "🟠"
    } else {
        "🔴"
    };
    let name = format!("{icon} | {} ({})", report.nickname, report.player_id);

    let mut value = online_line(report, has_tracked_server);
    if let Some(hours) = report.wipe_playtime_hrs {
        if hours > 0.0 {
            value.push_str(&format!(
                "Playtime since wipe: **{} hours**\n",
                round1(hours)
            ));
        }
    }
    if let Some(stats) = &report.sleep {
        value.push_str(&sleep_block(stats));
    }
    value.push_str(&format!(
        "\n[**Battlemetrics**](https://www.battlemetrics.com/players/{})\n",
        report.player_id
    ));
    (name, value)
}

fn playtime_phrase(report: &PlayerReport) -> Option<String> {
    if let Some(hours) = report.online_since_hrs {
        Some(format!("for **{}**", format_hours(hours)))
    } else {
        report
            .offline_since_hrs
            .map(|hours| format!("**{}** ago", format_hours(hours)))
    }
}

fn online_line(report: &PlayerReport, has_tracked_server: bool) -> String {
    match (&report.server_name, playtime_phrase(report)) {
        (Some(server), Some(playtime)) => format!("Online on {server} {playtime}.\n"),
        (Some(server), None) => format!("Online on {server}.\n"),
        (None, Some(playtime)) if has_tracked_server => {
            format!("Last online on tracked server {playtime}.\n")
        }
        (None, Some(playtime)) => format!("Last online {playtime}.\n"),
        (None, None) => "No recorded sessions yet.\n".to_string(),
    }
}

fn sleep_block(stats: &BedtimeStats) -> String {
    let tz = format!("GMT{:+}", stats.tz_offset_hrs);
    format!(
        "\nAverage bedtime: **{}** \u{b1}(~{}h) ({tz})\n\
         Average wake-up time: **{}** \u{b1}(~{}h) ({tz})\n\n\
         Average sleep time: **{} hours**\n\
         Shortest sleep time: **{} hours**\n",
        stats.average_bedtime,
        stats.average_bedtime_deviation_hrs,
        stats.average_wake_time,
        stats.average_wake_deviation_hrs,
        stats.average_sleep_hrs,
        stats.min_sleep_hrs,
    )
}

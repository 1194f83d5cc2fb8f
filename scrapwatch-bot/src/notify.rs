//! Online/offline transition delivery.
//!
//! The synchronizer emits one [`TransitionEvent`] per derived state
//! change; the notifier drains them and DMs every subscribed user in
//! the guilds tracking that player.

use std::sync::Arc;

use poise::serenity_prelude as serenity;
use scrapwatch_db::Database;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// A player's derived presence flipped during a sync pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionEvent {
    pub player_id: String,
    pub player_name: String,
    pub became_online: bool,
    /// Server the player is on now; None when they went offline
    pub server_id: Option<String>,
}

impl TransitionEvent {
    /// DM text for subscribers.
    pub fn message(&self) -> String {
        if self.became_online {
            format!("{} is now online.", self.player_name)
        } else {
            format!("{} is now offline.", self.player_name)
        }
    }
}

/// Drain transition events and notify subscribers. Delivery failures
/// are logged and dropped; the next transition tries again.
pub async fn run_notifier(
    db: Database,
    http: Arc<serenity::Http>,
    mut events: mpsc::UnboundedReceiver<TransitionEvent>,
) {
    while let Some(event) = events.recv().await {
        deliver(&db, &http, &event).await;
    }
    debug!("transition channel closed, notifier stopping");
}

async fn deliver(db: &Database, http: &serenity::Http, event: &TransitionEvent) {
    let targets = match db.notify_targets_for_player(event.player_id.clone()).await {
        Ok(targets) => targets,
        Err(err) => {
            warn!(player = %event.player_id, %err, "could not resolve notification targets");
            return;
        }
    };

    if targets.is_empty() {
        return;
    }

    info!(
        player = %event.player_id,
        online = event.became_online,
        recipients = targets.len(),
        "delivering transition"
    );
    let text = event.message();
    for user_id in targets {
        let user = serenity::UserId::new(user_id);
        match user.create_dm_channel(http).await {
            Ok(channel) => {
                if let Err(err) = channel.say(http, text.clone()).await {
                    warn!(user_id, %err, "failed to send notification");
                }
            }
            Err(err) => warn!(user_id, %err, "failed to open dm channel"),
        }
    }
}

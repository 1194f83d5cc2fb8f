//! Session synchronization against the Battlemetrics API.
//!
//! A sync pass pulls a player's remote sessions, upserts them into the
//! store and re-derives the player's current server from the latest
//! session. Exactly one transition event is emitted when that derived
//! state actually changed, which keeps re-runs idempotent.

use std::collections::BTreeSet;
use std::sync::Arc;

use scrapwatch_db::{Database, Player, Server, Session};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::bm::types::{ServerInfo, SessionRecord};
use crate::bm::{BmClient, Transport};
use crate::error::SyncError;
use crate::helpers::now;
use crate::notify::TransitionEvent;

pub struct SessionSync<T: Transport> {
    db: Database,
    client: Arc<BmClient<T>>,
    events: mpsc::UnboundedSender<TransitionEvent>,
    refresh_secs: i64,
}

impl<T: Transport> Clone for SessionSync<T> {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
            client: Arc::clone(&self.client),
            events: self.events.clone(),
            refresh_secs: self.refresh_secs,
        }
    }
}

impl<T: Transport> SessionSync<T> {
    pub fn new(
        db: Database,
        client: Arc<BmClient<T>>,
        events: mpsc::UnboundedSender<TransitionEvent>,
        refresh_secs: i64,
    ) -> Self {
        Self {
            db,
            client,
            events,
            refresh_secs,
        }
    }

    /// Pull the remote sessions of one player and reconcile them.
    ///
    /// Without `force`, a player refreshed recently is returned as is.
    /// A fetch failure aborts before any store mutation. Sessions
    /// pointing at servers that cannot be resolved are skipped, the
    /// rest still land.
    pub async fn sync_player(
        &self,
        player_id: &str,
        server_ids: &[String],
        force: bool,
    ) -> Result<Player, SyncError> {
        let player = self
            .db
            .get_player(player_id.to_string())
            .await?
            .ok_or(SyncError::UnknownPlayer)?;

        let now = now();
        if !force && !player.sessions_stale(now, self.refresh_secs) {
            debug!(player = %player.id, "sessions are fresh, skipping sync");
            return Ok(player);
        }

        let records = self.client.get_sessions(player_id, server_ids).await?;
        debug!(player = %player.id, count = records.len(), "fetched remote sessions");

        let known_servers = self.resolve_servers(&records).await;

        for record in &records {
            let Some(server_id) = record.server_id() else {
                debug!(session = %record.id, "session without server reference, skipping");
                continue;
            };
            if !known_servers.contains(server_id) {
                continue;
            }
            let Some(start) = record.attributes.start else {
                debug!(session = %record.id, "session without start time, skipping");
                continue;
            };

            self.db
                .upsert_session(Session {
                    id: record.id.clone(),
                    player_id: player.id.clone(),
                    server_id: server_id.to_string(),
                    start: start.timestamp(),
                    stop: record.attributes.stop.map(|stop| stop.timestamp()),
                })
                .await?;
        }

        self.db.touch_player_sessions(player.id.clone(), now).await?;
        let player = Player {
            sessions_updated_at: now,
            ..player
        };
        self.update_player_server(player).await
    }

    /// Get the stored server, fetching and persisting it on a miss.
    pub async fn ensure_server(&self, server_id: &str) -> Result<Server, SyncError> {
        if let Some(server) = self.db.get_server(server_id.to_string()).await? {
            return Ok(server);
        }
        let info = self.client.get_server_info(server_id).await?;
        let server = self.db.upsert_server(server_from_info(&info, now())).await?;
        debug!(server = %server.id, "server resolved from the API");
        Ok(server)
    }

    /// Get or create every server the records reference. A server that
    /// cannot be resolved is left out and its sessions are skipped.
    async fn resolve_servers(&self, records: &[SessionRecord]) -> BTreeSet<String> {
        let mut wanted = BTreeSet::new();
        for record in records {
            if let Some(server_id) = record.server_id() {
                wanted.insert(server_id.to_string());
            }
        }

        let mut known = BTreeSet::new();
        for server_id in wanted {
            match self.ensure_server(&server_id).await {
                Ok(_) => {
                    known.insert(server_id);
                }
                Err(err) => {
                    warn!(server = %server_id, %err, "could not resolve server, skipping its sessions");
                }
            }
        }

        known
    }

    /// Re-derive the current server from the latest session, persist
    /// the change and emit a transition event if anything flipped.
    async fn update_player_server(&self, player: Player) -> Result<Player, SyncError> {
        let Some(latest) = self.db.latest_session(player.id.clone()).await? else {
            return Ok(player);
        };

        let server_id = if latest.is_open() {
            Some(latest.server_id)
        } else {
            None
        };

        let changed = self
            .db
            .set_player_server(player.id.clone(), server_id.clone())
            .await?;

        let player = Player {
            server_id: server_id.clone(),
            ..player
        };

        if changed {
            info!(
                player = %player.id,
                online = server_id.is_some(),
                "presence changed"
            );
            let event = TransitionEvent {
                player_id: player.id.clone(),
                player_name: player.name.clone(),
                became_online: server_id.is_some(),
                server_id,
            };
            if self.events.send(event).is_err() {
                warn!(player = %player.id, "transition receiver is gone, event dropped");
            }
        }

        Ok(player)
    }

    /// Synchronize every tracked player. Failures are logged per
    /// player and do not abort the sweep.
    pub async fn sync_all(&self) {
        let targets = match self.db.sync_targets().await {
            Ok(targets) => targets,
            Err(err) => {
                warn!(%err, "could not load sync targets");
                return;
            }
        };

        debug!(players = targets.len(), "synchronizing tracked players");
        for target in targets {
            if let Err(err) = self
                .sync_player(&target.player_id, &target.server_ids, false)
                .await
            {
                warn!(player = %target.player_id, %err, "sync failed");
            }
        }
    }
}

pub(crate) fn server_from_info(info: &ServerInfo, now: i64) -> Server {
    Server {
        id: info.id.clone(),
        name: info.attributes.name.clone(),
        wipe: info.wipe(),
        map_url: info.map_url(),
        map_preview: info.map_preview(),
        updated_at: now,
    }
}

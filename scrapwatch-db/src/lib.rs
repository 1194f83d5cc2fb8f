mod error;
mod models;

pub use error::{DbError, Result};
pub use models::{Guild, PersistentMessage, Player, Server, Session, SyncTarget, TrackedPlayer};

use std::path::Path;
use tokio_rusqlite::Connection;
use tokio_rusqlite::rusqlite::{OptionalExtension, params};
use tracing::{debug, info};

/// Database wrapper for all Scrapwatch operations.
#[derive(Clone)]
pub struct Database {
  conn: Connection,
}

impl Database {
  /// Open or create a database at the given path.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = Connection::open(path).await?;
    let db = Self { conn };
    db.initialize().await?;
    Ok(db)
  }

  /// Create an in-memory database (useful for testing).
  pub async fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory().await?;
    let db = Self { conn };
    db.initialize().await?;
    Ok(db)
  }

  /// Initialize the database schema.
  async fn initialize(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        // Enable WAL mode for better concurrent read/write performance
        conn.pragma_update(None, "journal_mode", "WAL")?;

        // Enable foreign key constraints (must be set per-connection)
        conn.pragma_update(None, "foreign_keys", "ON")?;

        conn.execute_batch(
          r#"
          -- Game servers seen on Battlemetrics
          CREATE TABLE IF NOT EXISTS servers (
              id TEXT PRIMARY KEY,
              name TEXT NOT NULL,
              wipe INTEGER,
              map_url TEXT,
              map_preview TEXT,
              updated_at INTEGER NOT NULL
          );

          -- Players known to the tracker
          CREATE TABLE IF NOT EXISTS players (
              id TEXT PRIMARY KEY,
              name TEXT NOT NULL,
              server_id TEXT REFERENCES servers(id),
              sessions_updated_at INTEGER NOT NULL DEFAULT 0
          );

          -- Play sessions mirrored from the remote API
          CREATE TABLE IF NOT EXISTS sessions (
              id TEXT PRIMARY KEY,
              player_id TEXT NOT NULL REFERENCES players(id) ON DELETE CASCADE,
              server_id TEXT NOT NULL REFERENCES servers(id),
              start INTEGER NOT NULL,
              stop INTEGER
          );

          -- Discord guilds using the tracker
          CREATE TABLE IF NOT EXISTS guilds (
              id INTEGER PRIMARY KEY,
              name TEXT NOT NULL,
              server_id TEXT REFERENCES servers(id),
              overview_channel_id INTEGER
          );

          -- Which guild tracks which player
          CREATE TABLE IF NOT EXISTS tracked_players (
              guild_id INTEGER NOT NULL REFERENCES guilds(id) ON DELETE CASCADE,
              player_id TEXT NOT NULL REFERENCES players(id) ON DELETE CASCADE,
              nickname TEXT NOT NULL,
              PRIMARY KEY (guild_id, player_id)
          );

          -- Users subscribed to online/offline notifications
          CREATE TABLE IF NOT EXISTS notify_users (
              guild_id INTEGER NOT NULL REFERENCES guilds(id) ON DELETE CASCADE,
              user_id INTEGER NOT NULL,
              PRIMARY KEY (guild_id, user_id)
          );

          -- Auto-edited overview messages
          CREATE TABLE IF NOT EXISTS persistent_messages (
              guild_id INTEGER NOT NULL REFERENCES guilds(id) ON DELETE CASCADE,
              key TEXT NOT NULL,
              page_index INTEGER NOT NULL,
              channel_id INTEGER NOT NULL,
              message_id INTEGER NOT NULL,
              PRIMARY KEY (guild_id, key, page_index)
          );

          -- Index for fast session lookups per player
          CREATE INDEX IF NOT EXISTS idx_sessions_player ON sessions(player_id, start);

          -- Index for reverse tracking lookups (player -> guilds)
          CREATE INDEX IF NOT EXISTS idx_tracked_players_player ON tracked_players(player_id);
          "#,
        )?;
        Ok(())
      })
      .await?;

    info!("database initialized");
    Ok(())
  }

  // ========================================================================
  // Players
  // ========================================================================

  /// Create a player if it does not exist yet, and return the stored row.
  /// An existing player keeps its name and state.
  pub async fn create_missing_player(&self, id: String, name: String) -> Result<Player> {
    let player = self
      .conn
      .call(move |conn| {
        conn
          .prepare_cached(
            "INSERT INTO players (id, name) VALUES (?1, ?2) ON CONFLICT(id) DO NOTHING",
          )?
          .execute(params![&id, &name])?;

        conn
          .prepare_cached(
            "SELECT id, name, server_id, sessions_updated_at FROM players WHERE id = ?1",
          )?
          .query_row(params![&id], |row| {
            Ok(Player {
              id: row.get(0)?,
              name: row.get(1)?,
              server_id: row.get(2)?,
              sessions_updated_at: row.get(3)?,
            })
          })
      })
      .await?;

    debug!(%player.id, %player.name, "ensured player");
    Ok(player)
  }

  /// Get a player by Battlemetrics id.
  pub async fn get_player(&self, id: String) -> Result<Option<Player>> {
    let player = self
      .conn
      .call(move |conn| {
        conn
          .prepare_cached(
            "SELECT id, name, server_id, sessions_updated_at FROM players WHERE id = ?1",
          )?
          .query_row(params![&id], |row| {
            Ok(Player {
              id: row.get(0)?,
              name: row.get(1)?,
              server_id: row.get(2)?,
              sessions_updated_at: row.get(3)?,
            })
          })
          .optional()
      })
      .await?;

    Ok(player)
  }

  /// Set the server a player is currently online on (None = offline).
  /// Returns whether the stored value actually changed.
  pub async fn set_player_server(
    &self,
    player_id: String,
    server_id: Option<String>,
  ) -> Result<bool> {
    let player_log = player_id.clone();
    let online = server_id.is_some();

    let changed = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;

        let current: Option<Option<String>> = tx
          .prepare_cached("SELECT server_id FROM players WHERE id = ?1")?
          .query_row(params![&player_id], |row| row.get(0))
          .optional()?;

        let current = match current {
          Some(c) => c,
          None => return Ok(Err(DbError::PlayerNotFound)),
        };

        if current == server_id {
          tx.commit()?;
          return Ok(Ok(false));
        }

        tx.prepare_cached("UPDATE players SET server_id = ?2 WHERE id = ?1")?
          .execute(params![&player_id, &server_id])?;

        tx.commit()?;
        Ok(Ok(true))
      })
      .await??;

    if changed {
      debug!(player = %player_log, online, "updated player server");
    }
    Ok(changed)
  }

  /// Stamp the time of the last session sync for a player.
  pub async fn touch_player_sessions(&self, player_id: String, now: i64) -> Result<()> {
    self
      .conn
      .call(move |conn| {
        let updated = conn
          .prepare_cached("UPDATE players SET sessions_updated_at = ?2 WHERE id = ?1")?
          .execute(params![&player_id, now])?;

        if updated == 0 {
          return Ok(Err(DbError::PlayerNotFound));
        }

        Ok(Ok(()))
      })
      .await??;

    Ok(())
  }

  // ========================================================================
  // Sessions
  // ========================================================================

  /// Insert a session, or update its stop time if the id is already known.
  /// `start`, player and server are never changed for an existing session.
  pub async fn upsert_session(&self, session: Session) -> Result<()> {
    let session_log = session.id.clone();

    self
      .conn
      .call(move |conn| {
        conn
          .prepare_cached(
            r#"
            INSERT INTO sessions (id, player_id, server_id, start, stop)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(id) DO UPDATE SET stop = excluded.stop
            "#,
          )?
          .execute(params![
            &session.id,
            &session.player_id,
            &session.server_id,
            session.start,
            session.stop
          ])?;
        Ok(())
      })
      .await?;

    debug!(session = %session_log, "upserted session");
    Ok(())
  }

  /// All sessions of a player, oldest first.
  pub async fn sessions_for_player(&self, player_id: String) -> Result<Vec<Session>> {
    let sessions = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare_cached(
          r#"
          SELECT id, player_id, server_id, start, stop
          FROM sessions
          WHERE player_id = ?1
          ORDER BY start
          "#,
        )?;

        let sessions = stmt
          .query_map(params![&player_id], |row| {
            Ok(Session {
              id: row.get(0)?,
              player_id: row.get(1)?,
              server_id: row.get(2)?,
              start: row.get(3)?,
              stop: row.get(4)?,
            })
          })?
          .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(sessions)
      })
      .await?;

    Ok(sessions)
  }

  /// The most recent session of a player by start time.
  /// Ties on start are broken by id, descending, so the result is stable.
  pub async fn latest_session(&self, player_id: String) -> Result<Option<Session>> {
    let session = self
      .conn
      .call(move |conn| {
        conn
          .prepare_cached(
            r#"
            SELECT id, player_id, server_id, start, stop
            FROM sessions
            WHERE player_id = ?1
            ORDER BY start DESC, id DESC
            LIMIT 1
            "#,
          )?
          .query_row(params![&player_id], |row| {
            Ok(Session {
              id: row.get(0)?,
              player_id: row.get(1)?,
              server_id: row.get(2)?,
              start: row.get(3)?,
              stop: row.get(4)?,
            })
          })
          .optional()
      })
      .await?;

    Ok(session)
  }

  // ========================================================================
  // Servers
  // ========================================================================

  /// Insert a server or refresh its metadata.
  pub async fn upsert_server(&self, server: Server) -> Result<Server> {
    let server = self
      .conn
      .call(move |conn| {
        conn
          .prepare_cached(
            r#"
            INSERT INTO servers (id, name, wipe, map_url, map_preview, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                wipe = excluded.wipe,
                map_url = excluded.map_url,
                map_preview = excluded.map_preview,
                updated_at = excluded.updated_at
            "#,
          )?
          .execute(params![
            &server.id,
            &server.name,
            server.wipe,
            &server.map_url,
            &server.map_preview,
            server.updated_at
          ])?;

        Ok(server)
      })
      .await?;

    debug!(%server.id, %server.name, "upserted server");
    Ok(server)
  }

  /// Get a server by Battlemetrics id.
  pub async fn get_server(&self, id: String) -> Result<Option<Server>> {
    let server = self
      .conn
      .call(move |conn| {
        conn
          .prepare_cached(
            "SELECT id, name, wipe, map_url, map_preview, updated_at FROM servers WHERE id = ?1",
          )?
          .query_row(params![&id], |row| {
            Ok(Server {
              id: row.get(0)?,
              name: row.get(1)?,
              wipe: row.get(2)?,
              map_url: row.get(3)?,
              map_preview: row.get(4)?,
              updated_at: row.get(5)?,
            })
          })
          .optional()
      })
      .await?;

    Ok(server)
  }

  /// Distinct server ids currently pinned by at least one guild.
  pub async fn tracked_server_ids(&self) -> Result<Vec<String>> {
    let ids = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare_cached(
          "SELECT DISTINCT server_id FROM guilds WHERE server_id IS NOT NULL ORDER BY server_id",
        )?;

        let ids = stmt
          .query_map([], |row| row.get(0))?
          .collect::<std::result::Result<Vec<String>, _>>()?;

        Ok(ids)
      })
      .await?;

    Ok(ids)
  }

  // ========================================================================
  // Guilds
  // ========================================================================

  /// Create a guild or refresh its name.
  pub async fn upsert_guild(&self, id: u64, name: String) -> Result<()> {
    self
      .conn
      .call(move |conn| {
        conn
          .prepare_cached(
            "INSERT INTO guilds (id, name) VALUES (?1, ?2) ON CONFLICT(id) DO UPDATE SET name = excluded.name",
          )?
          .execute(params![id, &name])?;
        Ok(())
      })
      .await?;

    debug!(guild_id = id, "ensured guild");
    Ok(())
  }

  /// Get a guild by Discord id.
  pub async fn get_guild(&self, id: u64) -> Result<Option<Guild>> {
    let guild = self
      .conn
      .call(move |conn| {
        conn
          .prepare_cached(
            "SELECT id, name, server_id, overview_channel_id FROM guilds WHERE id = ?1",
          )?
          .query_row(params![id], |row| {
            Ok(Guild {
              id: row.get(0)?,
              name: row.get(1)?,
              server_id: row.get(2)?,
              overview_channel_id: row.get(3)?,
            })
          })
          .optional()
      })
      .await?;

    Ok(guild)
  }

  /// All guilds, in id order.
  pub async fn list_guilds(&self) -> Result<Vec<Guild>> {
    let guilds = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare_cached(
          "SELECT id, name, server_id, overview_channel_id FROM guilds ORDER BY id",
        )?;

        let guilds = stmt
          .query_map([], |row| {
            Ok(Guild {
              id: row.get(0)?,
              name: row.get(1)?,
              server_id: row.get(2)?,
              overview_channel_id: row.get(3)?,
            })
          })?
          .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(guilds)
      })
      .await?;

    Ok(guilds)
  }

  /// Pin (or unpin with None) the tracked server of a guild.
  pub async fn set_guild_server(&self, guild_id: u64, server_id: Option<String>) -> Result<()> {
    self
      .conn
      .call(move |conn| {
        let updated = conn
          .prepare_cached("UPDATE guilds SET server_id = ?2 WHERE id = ?1")?
          .execute(params![guild_id, &server_id])?;

        if updated == 0 {
          return Ok(Err(DbError::GuildNotFound));
        }

        Ok(Ok(()))
      })
      .await??;

    debug!(guild_id, "updated guild server");
    Ok(())
  }

  /// Set the channel that carries the auto-edited overview of a guild.
  pub async fn set_overview_channel(&self, guild_id: u64, channel_id: u64) -> Result<()> {
    self
      .conn
      .call(move |conn| {
        let updated = conn
          .prepare_cached("UPDATE guilds SET overview_channel_id = ?2 WHERE id = ?1")?
          .execute(params![guild_id, channel_id])?;

        if updated == 0 {
          return Ok(Err(DbError::GuildNotFound));
        }

        Ok(Ok(()))
      })
      .await??;

    debug!(guild_id, channel_id, "updated overview channel");
    Ok(())
  }

  // ========================================================================
  // Tracked Players
  // ========================================================================

  /// Link a player to a guild. Returns false if the link already existed.
  pub async fn track_player(
    &self,
    guild_id: u64,
    player_id: String,
    nickname: String,
  ) -> Result<bool> {
    let player_log = player_id.clone();

    let inserted = self
      .conn
      .call(move |conn| {
        let inserted = conn
          .prepare_cached(
            r#"
            INSERT INTO tracked_players (guild_id, player_id, nickname)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(guild_id, player_id) DO NOTHING
            "#,
          )?
          .execute(params![guild_id, &player_id, &nickname])?;

        Ok(inserted > 0)
      })
      .await?;

    if inserted {
      debug!(guild_id, player = %player_log, "tracked player");
    }
    Ok(inserted)
  }

  /// Remove a tracking link. Returns false if it did not exist.
  pub async fn untrack_player(&self, guild_id: u64, player_id: String) -> Result<bool> {
    let player_log = player_id.clone();

    let removed = self
      .conn
      .call(move |conn| {
        let removed = conn
          .prepare_cached("DELETE FROM tracked_players WHERE guild_id = ?1 AND player_id = ?2")?
          .execute(params![guild_id, &player_id])?;

        Ok(removed > 0)
      })
      .await?;

    if removed {
      debug!(guild_id, player = %player_log, "untracked player");
    }
    Ok(removed)
  }

  /// The players a guild tracks, with their guild-local nicknames.
  pub async fn tracked_players(&self, guild_id: u64) -> Result<Vec<TrackedPlayer>> {
    let tracked = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare_cached(
          r#"
          SELECT tp.nickname, p.id, p.name, p.server_id, p.sessions_updated_at
          FROM tracked_players tp
          JOIN players p ON p.id = tp.player_id
          WHERE tp.guild_id = ?1
          ORDER BY tp.nickname
          "#,
        )?;

        let tracked = stmt
          .query_map(params![guild_id], |row| {
            Ok(TrackedPlayer {
              nickname: row.get(0)?,
              player: Player {
                id: row.get(1)?,
                name: row.get(2)?,
                server_id: row.get(3)?,
                sessions_updated_at: row.get(4)?,
              },
            })
          })?
          .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(tracked)
      })
      .await?;

    Ok(tracked)
  }

  /// One sync target per tracked player, carrying the distinct server
  /// filters of the guilds that track them. A guild without a pinned
  /// server widens its players to an unscoped sync (empty filter list).
  pub async fn sync_targets(&self) -> Result<Vec<SyncTarget>> {
    let rows = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare_cached(
          r#"
          SELECT DISTINCT tp.player_id, g.server_id
          FROM tracked_players tp
          JOIN guilds g ON g.id = tp.guild_id
          ORDER BY tp.player_id, g.server_id
          "#,
        )?;

        let rows = stmt
          .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
          .collect::<std::result::Result<Vec<(String, Option<String>)>, _>>()?;

        Ok(rows)
      })
      .await?;

    let mut targets: Vec<SyncTarget> = Vec::new();
    let mut unscoped = false;
    for (player_id, server_id) in rows {
      if !targets.last().is_some_and(|t| t.player_id == player_id) {
        if unscoped && let Some(prev) = targets.last_mut() {
          prev.server_ids.clear();
        }
        unscoped = false;
        targets.push(SyncTarget {
          player_id,
          server_ids: Vec::new(),
        });
      }
      match server_id {
        None => unscoped = true,
        Some(server_id) => {
          if let Some(target) = targets.last_mut()
            && target.server_ids.last() != Some(&server_id)
          {
            target.server_ids.push(server_id);
          }
        }
      }
    }
    if unscoped && let Some(prev) = targets.last_mut() {
      prev.server_ids.clear();
    }

    Ok(targets)
  }

  // ========================================================================
  // Notifications
  // ========================================================================

  /// Subscribe a user to online/offline notifications in a guild.
  pub async fn enable_notifications(&self, guild_id: u64, user_id: u64) -> Result<()> {
    self
      .conn
      .call(move |conn| {
        conn
          .prepare_cached(
            "INSERT INTO notify_users (guild_id, user_id) VALUES (?1, ?2) ON CONFLICT DO NOTHING",
          )?
          .execute(params![guild_id, user_id])?;
        Ok(())
      })
      .await?;

    debug!(guild_id, user_id, "enabled notifications");
    Ok(())
  }

  /// Unsubscribe a user. Returns false if there was no subscription.
  pub async fn disable_notifications(&self, guild_id: u64, user_id: u64) -> Result<bool> {
    let removed = self
      .conn
      .call(move |conn| {
        let removed = conn
          .prepare_cached("DELETE FROM notify_users WHERE guild_id = ?1 AND user_id = ?2")?
          .execute(params![guild_id, user_id])?;

        Ok(removed > 0)
      })
      .await?;

    if removed {
      debug!(guild_id, user_id, "disabled notifications");
    }
    Ok(removed)
  }

  /// Distinct users to DM when the given player changes state, across
  /// all guilds that track the player.
  pub async fn notify_targets_for_player(&self, player_id: String) -> Result<Vec<u64>> {
    let users = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare_cached(
          r#"
          SELECT DISTINCT n.user_id
          FROM notify_users n
          JOIN tracked_players tp ON tp.guild_id = n.guild_id
          WHERE tp.player_id = ?1
          ORDER BY n.user_id
          "#,
        )?;

        let users = stmt
          .query_map(params![&player_id], |row| row.get(0))?
          .collect::<std::result::Result<Vec<u64>, _>>()?;

        Ok(users)
      })
      .await?;

    Ok(users)
  }

  // ========================================================================
  // Persistent Messages
  // ========================================================================

  /// The auto-edited messages of a guild for one logical key, page order.
  pub async fn persistent_messages(
    &self,
    guild_id: u64,
    key: String,
  ) -> Result<Vec<PersistentMessage>> {
    let messages = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare_cached(
          r#"
          SELECT guild_id, key, page_index, channel_id, message_id
          FROM persistent_messages
          WHERE guild_id = ?1 AND key = ?2
          ORDER BY page_index
          "#,
        )?;

        let messages = stmt
          .query_map(params![guild_id, &key], |row| {
            Ok(PersistentMessage {
              guild_id: row.get(0)?,
              key: row.get(1)?,
              page_index: row.get(2)?,
              channel_id: row.get(3)?,
              message_id: row.get(4)?,
            })
          })?
          .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(messages)
      })
      .await?;

    Ok(messages)
  }

  /// Remember (or replace) an auto-edited message for one page.
  pub async fn save_persistent_message(&self, message: PersistentMessage) -> Result<()> {
    self
      .conn
      .call(move |conn| {
        conn
          .prepare_cached(
            r#"
            INSERT OR REPLACE INTO persistent_messages
              (guild_id, key, page_index, channel_id, message_id)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
          )?
          .execute(params![
            message.guild_id,
            &message.key,
            message.page_index,
            message.channel_id,
            message.message_id
          ])?;
        Ok(())
      })
      .await?;

    Ok(())
  }

  /// Forget all auto-edited messages of a guild for one logical key.
  pub async fn delete_persistent_messages(&self, guild_id: u64, key: String) -> Result<u64> {
    let deleted = self
      .conn
      .call(move |conn| {
        let deleted = conn
          .prepare_cached("DELETE FROM persistent_messages WHERE guild_id = ?1 AND key = ?2")?
          .execute(params![guild_id, &key])?;

        Ok(deleted as u64)
      })
      .await?;

    if deleted > 0 {
      debug!(guild_id, deleted, "deleted persistent messages");
    }
    Ok(deleted)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn now() -> i64 {
    1700000000 // Fixed timestamp for testing
  }

  fn test_server(id: &str) -> Server {
    Server {
      id: id.to_string(),
      name: format!("Rusty Shores {id}"),
      wipe: Some(now() - 86400),
      map_url: None,
      map_preview: None,
      updated_at: now(),
    }
  }

  fn test_session(id: &str, player: &str, server: &str, start: i64, stop: Option<i64>) -> Session {
    Session {
      id: id.to_string(),
      player_id: player.to_string(),
      server_id: server.to_string(),
      start,
      stop,
    }
  }

  #[tokio::test]
  async fn test_player_lifecycle() {
    let db = Database::open_in_memory().await.unwrap();

    // Create a player
    let player = db
      .create_missing_player("1001".to_string(), "FlyingPancake".to_string())
      .await
      .unwrap();
    assert_eq!(player.id, "1001");
    assert_eq!(player.name, "FlyingPancake");
    assert!(player.server_id.is_none());
    assert_eq!(player.sessions_updated_at, 0);

    // Creating again keeps the original name
    let player = db
      .create_missing_player("1001".to_string(), "SomebodyElse".to_string())
      .await
      .unwrap();
    assert_eq!(player.name, "FlyingPancake");

    // Get it
    let player = db.get_player("1001".to_string()).await.unwrap().unwrap();
    assert_eq!(player.name, "FlyingPancake");
    assert!(db.get_player("9999".to_string()).await.unwrap().is_none());

    // Stamp the sync time
    db.touch_player_sessions("1001".to_string(), now())
      .await
      .unwrap();
    let player = db.get_player("1001".to_string()).await.unwrap().unwrap();
    assert_eq!(player.sessions_updated_at, now());
    assert!(!player.sessions_stale(now() + 100, 300));
    assert!(player.sessions_stale(now() + 400, 300));

    // Stamping an unknown player fails
    let result = db.touch_player_sessions("9999".to_string(), now()).await;
    assert!(result.is_err());
  }

  #[tokio::test]
  async fn test_player_server_change_detection() {
    let db = Database::open_in_memory().await.unwrap();

    db.upsert_server(test_server("42")).await.unwrap();
    db.create_missing_player("1001".to_string(), "FlyingPancake".to_string())
      .await
      .unwrap();

    // Offline -> online is a change
    let changed = db
      .set_player_server("1001".to_string(), Some("42".to_string()))
      .await
      .unwrap();
    assert!(changed);

    // Same value again is not
    let changed = db
      .set_player_server("1001".to_string(), Some("42".to_string()))
      .await
      .unwrap();
    assert!(!changed);

    // Online -> offline is a change again
    let changed = db.set_player_server("1001".to_string(), None).await.unwrap();
    assert!(changed);
    let changed = db.set_player_server("1001".to_string(), None).await.unwrap();
    assert!(!changed);

    // Unknown player is an error
    let result = db.set_player_server("9999".to_string(), None).await;
    assert!(result.is_err());
  }

  #[tokio::test]
  async fn test_session_upsert_updates_stop_only() {
    let db = Database::open_in_memory().await.unwrap();

    db.upsert_server(test_server("42")).await.unwrap();
    db.create_missing_player("1001".to_string(), "FlyingPancake".to_string())
      .await
      .unwrap();

    // An open session appears
    db.upsert_session(test_session("s1", "1001", "42", now(), None))
      .await
      .unwrap();

    let sessions = db.sessions_for_player("1001".to_string()).await.unwrap();
    assert_eq!(sessions.len(), 1);
    assert!(sessions[0].is_open());

    // The same remote session closes later; start must survive even if
    // the payload disagrees about it
    db.upsert_session(test_session("s1", "1001", "42", now() + 999, Some(now() + 7200)))
      .await
      .unwrap();

    let sessions = db.sessions_for_player("1001".to_string()).await.unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].start, now());
    assert_eq!(sessions[0].stop, Some(now() + 7200));
    assert_eq!(sessions[0].duration_secs(now() + 9999), 7200);
  }

  #[tokio::test]
  async fn test_latest_session_ordering() {
    let db = Database::open_in_memory().await.unwrap();

    db.upsert_server(test_server("42")).await.unwrap();
    db.create_missing_player("1001".to_string(), "FlyingPancake".to_string())
      .await
      .unwrap();

    db.upsert_session(test_session("s1", "1001", "42", now(), Some(now() + 3600)))
      .await
      .unwrap();
    db.upsert_session(test_session("s2", "1001", "42", now() + 7200, None))
      .await
      .unwrap();

    let latest = db
      .latest_session("1001".to_string())
      .await
      .unwrap()
      .unwrap();
    assert_eq!(latest.id, "s2");
    assert!(latest.is_open());

    // Equal start times fall back to id, descending
    db.upsert_session(test_session("s3", "1001", "42", now() + 7200, Some(now() + 9000)))
      .await
      .unwrap();
    let latest = db
      .latest_session("1001".to_string())
      .await
      .unwrap()
      .unwrap();
    assert_eq!(latest.id, "s3");

    assert!(
      db.latest_session("9999".to_string())
        .await
        .unwrap()
        .is_none()
    );
  }

  #[tokio::test]
  async fn test_guild_tracking_lifecycle() {
    let db = Database::open_in_memory().await.unwrap();

    db.upsert_guild(12345, "Rust Friends".to_string()).await.unwrap();
    db.upsert_server(test_server("42")).await.unwrap();
    db.create_missing_player("1001".to_string(), "FlyingPancake".to_string())
      .await
      .unwrap();

    // Pin the tracked server
    db.set_guild_server(12345, Some("42".to_string()))
      .await
      .unwrap();
    let guild = db.get_guild(12345).await.unwrap().unwrap();
    assert_eq!(guild.server_id.as_deref(), Some("42"));

    // Track a player; tracking twice is a no-op
    assert!(
      db.track_player(12345, "1001".to_string(), "pancake".to_string())
        .await
        .unwrap()
    );
    assert!(
      !db
        .track_player(12345, "1001".to_string(), "pancake".to_string())
        .await
        .unwrap()
    );

    let tracked = db.tracked_players(12345).await.unwrap();
    assert_eq!(tracked.len(), 1);
    assert_eq!(tracked[0].nickname, "pancake");
    assert_eq!(tracked[0].player.id, "1001");

    // Untrack
    assert!(db.untrack_player(12345, "1001".to_string()).await.unwrap());
    assert!(!db.untrack_player(12345, "1001".to_string()).await.unwrap());
    assert!(db.tracked_players(12345).await.unwrap().is_empty());

    // Unpin the server
    db.set_guild_server(12345, None).await.unwrap();
    let guild = db.get_guild(12345).await.unwrap().unwrap();
    assert!(guild.server_id.is_none());

    // Unknown guild is an error
    assert!(db.set_guild_server(999, None).await.is_err());
  }

  #[tokio::test]
  async fn test_sync_targets_aggregation() {
    let db = Database::open_in_memory().await.unwrap();

    db.upsert_guild(1, "Guild One".to_string()).await.unwrap();
    db.upsert_guild(2, "Guild Two".to_string()).await.unwrap();
    db.upsert_server(test_server("42")).await.unwrap();
    db.upsert_server(test_server("43")).await.unwrap();
    db.set_guild_server(1, Some("42".to_string())).await.unwrap();
    db.set_guild_server(2, Some("43".to_string())).await.unwrap();

    db.create_missing_player("1001".to_string(), "A".to_string())
      .await
      .unwrap();
    db.create_missing_player("1002".to_string(), "B".to_string())
      .await
      .unwrap();

    // 1001 is tracked by both guilds, 1002 only by guild two
    db.track_player(1, "1001".to_string(), "a".to_string())
      .await
      .unwrap();
    db.track_player(2, "1001".to_string(), "a".to_string())
      .await
      .unwrap();
    db.track_player(2, "1002".to_string(), "b".to_string())
      .await
      .unwrap();

    let targets = db.sync_targets().await.unwrap();
    assert_eq!(targets.len(), 2);
    assert_eq!(targets[0].player_id, "1001");
    assert_eq!(targets[0].server_ids, vec!["42", "43"]);
    assert_eq!(targets[1].player_id, "1002");
    assert_eq!(targets[1].server_ids, vec!["43"]);

    // A guild without a pinned server widens its players to unscoped
    db.set_guild_server(1, None).await.unwrap();
    let targets = db.sync_targets().await.unwrap();
    assert_eq!(targets[0].player_id, "1001");
    assert!(targets[0].server_ids.is_empty());
    assert_eq!(targets[1].server_ids, vec!["43"]);
  }

  #[tokio::test]
  async fn test_tracked_server_ids() {
    let db = Database::open_in_memory().await.unwrap();

    db.upsert_guild(1, "Guild One".to_string()).await.unwrap();
    db.upsert_guild(2, "Guild Two".to_string()).await.unwrap();
    db.upsert_guild(3, "Guild Three".to_string()).await.unwrap();
    db.upsert_server(test_server("42")).await.unwrap();
    db.upsert_server(test_server("43")).await.unwrap();

    db.set_guild_server(1, Some("42".to_string())).await.unwrap();
    db.set_guild_server(2, Some("42".to_string())).await.unwrap();
    db.set_guild_server(3, Some("43".to_string())).await.unwrap();

    let ids = db.tracked_server_ids().await.unwrap();
    assert_eq!(ids, vec!["42", "43"]);
  }

  #[tokio::test]
  async fn test_notify_targets() {
    let db = Database::open_in_memory().await.unwrap();

    db.upsert_guild(1, "Guild One".to_string()).await.unwrap();
    db.upsert_guild(2, "Guild Two".to_string()).await.unwrap();
    db.create_missing_player("1001".to_string(), "A".to_string())
      .await
      .unwrap();
    db.track_player(1, "1001".to_string(), "a".to_string())
      .await
      .unwrap();

    // Guild one tracks the player, guild two does not
    db.enable_notifications(1, 501).await.unwrap();
    db.enable_notifications(1, 502).await.unwrap();
    db.enable_notifications(2, 503).await.unwrap();

    let users = db
      .notify_targets_for_player("1001".to_string())
      .await
      .unwrap();
    assert_eq!(users, vec![501, 502]);

    // Enabling twice stays a single subscription
    db.enable_notifications(1, 501).await.unwrap();
    let users = db
      .notify_targets_for_player("1001".to_string())
      .await
      .unwrap();
    assert_eq!(users, vec![501, 502]);

    assert!(db.disable_notifications(1, 501).await.unwrap());
    assert!(!db.disable_notifications(1, 501).await.unwrap());
    let users = db
      .notify_targets_for_player("1001".to_string())
      .await
      .unwrap();
    assert_eq!(users, vec![502]);
  }

  #[tokio::test]
  async fn test_persistent_message_lifecycle() {
    let db = Database::open_in_memory().await.unwrap();

    db.upsert_guild(1, "Guild One".to_string()).await.unwrap();

    let page = |index: u32, message_id: u64| PersistentMessage {
      guild_id: 1,
      key: "overview".to_string(),
      page_index: index,
      channel_id: 777,
      message_id,
    };

    db.save_persistent_message(page(1, 9002)).await.unwrap();
    db.save_persistent_message(page(0, 9001)).await.unwrap();

    let messages = db
      .persistent_messages(1, "overview".to_string())
      .await
      .unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].page_index, 0);
    assert_eq!(messages[0].message_id, 9001);
    assert_eq!(messages[1].message_id, 9002);

    // Replacing a page keeps a single row
    db.save_persistent_message(page(0, 9010)).await.unwrap();
    let messages = db
      .persistent_messages(1, "overview".to_string())
      .await
      .unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].message_id, 9010);

    let deleted = db
      .delete_persistent_messages(1, "overview".to_string())
      .await
      .unwrap();
    assert_eq!(deleted, 2);
    assert!(
      db.persistent_messages(1, "overview".to_string())
        .await
        .unwrap()
        .is_empty()
    );
  }
}

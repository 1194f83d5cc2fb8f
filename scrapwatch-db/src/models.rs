/// A player tracked on Battlemetrics.
#[derive(Debug, Clone, PartialEq)]
pub struct Player {
  /// Battlemetrics player id
  pub id: String,
  /// Player name as reported by the API at first sight
  pub name: String,
  /// Server the player is currently online on, if any.
  /// Derived from the most recent session; rewritten on every sync.
  pub server_id: Option<String>,
  /// Unix timestamp of the last session sync, 0 before the first one
  pub sessions_updated_at: i64,
}

impl Player {
  /// Whether the player is currently considered online anywhere.
  pub fn is_online(&self) -> bool {
    self.server_id.is_some()
  }

  /// Whether the stored sessions are older than the given window.
  pub fn sessions_stale(&self, now: i64, max_age_secs: i64) -> bool {
    self.sessions_updated_at == 0 || now - self.sessions_updated_at > max_age_secs
  }
}

/// A play session mirrored from the remote API.
///
/// `start` and identity are fixed at creation; only `stop` is
/// reconciled on later syncs. `stop` is None while the session is open.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
  /// Battlemetrics session id
  pub id: String,
  pub player_id: String,
  pub server_id: String,
  /// Unix timestamp of session start
  pub start: i64,
  /// Unix timestamp of session end, None while still open
  pub stop: Option<i64>,
}

impl Session {
  pub fn is_open(&self) -> bool {
    self.stop.is_none()
  }

  /// Seconds played, using `now` for a still-open session.
  pub fn duration_secs(&self, now: i64) -> i64 {
    (self.stop.unwrap_or(now) - self.start).max(0)
  }
}

/// A game server known to the tracker.
#[derive(Debug, Clone, PartialEq)]
pub struct Server {
  /// Battlemetrics server id
  pub id: String,
  pub name: String,
  /// Unix timestamp of the last wipe, if the API reports one
  pub wipe: Option<i64>,
  /// Link to the current map on rustmaps
  pub map_url: Option<String>,
  /// Thumbnail image of the current map
  pub map_preview: Option<String>,
  /// Unix timestamp of the last metadata refresh
  pub updated_at: i64,
}

impl Server {
  /// Whether the metadata is older than the given window.
  pub fn is_stale(&self, now: i64, max_age_secs: i64) -> bool {
    now - self.updated_at > max_age_secs
  }
}

/// A Discord guild using the tracker.
#[derive(Debug, Clone, PartialEq)]
pub struct Guild {
  /// Discord guild ID
  pub id: u64,
  pub name: String,
  /// The single server this guild tracks for overviews, if set
  pub server_id: Option<String>,
  /// Channel carrying the auto-edited overview messages, if set
  pub overview_channel_id: Option<u64>,
}

/// A tracking link joined with the player it points at.
#[derive(Debug, Clone)]
pub struct TrackedPlayer {
  /// Guild-local display name
  pub nickname: String,
  pub player: Player,
}

/// One player to synchronize, with the distinct server filters of the
/// guilds tracking them. An empty filter list means an unscoped sync.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncTarget {
  pub player_id: String,
  pub server_ids: Vec<String>,
}

/// An auto-edited message (one page of an overview).
#[derive(Debug, Clone, PartialEq)]
pub struct PersistentMessage {
  pub guild_id: u64,
  /// Logical message group, e.g. "overview"
  pub key: String,
  pub page_index: u32,
  pub channel_id: u64,
  pub message_id: u64,
}

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{Offset, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::BusinessTime;
use crate::limits::MAX_ROOMS;
use crate::model::Ms;

const HOUR_MS: Ms = 3_600_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomRules {
    /// Aggregate party size allowed at any instant.
    pub max_total_participants: u32,
    /// Separate bookings allowed at any instant.
    pub max_concurrent_groups: u32,
    pub min_booking_size: u32,
    /// Upper bound for regular users only; admins are capped by the room total.
    pub max_booking_size: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub name: String,
    #[serde(flatten)]
    pub rules: RoomRules,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomCatalog {
    rooms: Vec<Room>,
}

impl RoomCatalog {
    pub fn new(rooms: Vec<Room>) -> Result<Self, ConfigError> {
        if rooms.is_empty() {
            return Err(ConfigError::Invalid("room catalog is empty".into()));
        }
        if rooms.len() > MAX_ROOMS {
            return Err(ConfigError::Invalid(format!("more than {MAX_ROOMS} rooms")));
        }
        for (i, room) in rooms.iter().enumerate() {
            let r = &room.rules;
            if room.name.trim().is_empty() {
                return Err(ConfigError::Invalid("room with empty name".into()));
            }
            if rooms[..i].iter().any(|other| other.name == room.name) {
                return Err(ConfigError::Invalid(format!("duplicate room {}", room.name)));
            }
            if r.max_concurrent_groups == 0 || r.max_total_participants == 0 {
                return Err(ConfigError::Invalid(format!("room {} has zero capacity", room.name)));
            }
            if r.min_booking_size == 0 || r.min_booking_size > r.max_booking_size {
                return Err(ConfigError::Invalid(format!("room {} has an empty booking-size range", room.name)));
            }
        }
        Ok(Self { rooms })
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let rooms: Vec<Room> = serde_json::from_str(json).map_err(|e| ConfigError::Invalid(format!("room catalog: {e}")))?;
        Self::new(rooms)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        Self::from_json(&json)
    }

    pub fn rules(&self, room: &str) -> Option<&RoomRules> {
        self.rooms.iter().find(|r| r.name == room).map(|r| &r.rules)
    }

    pub fn contains(&self, room: &str) -> bool {
        self.rules(room).is_some()
    }

    pub fn rooms(&self) -> &[Room] {
        &self.rooms
    }
}

impl Default for RoomCatalog {
    fn default() -> Self {
        let room = |name: &str, total, groups, min, max| Room {
            name: name.to_string(),
            rules: RoomRules {
                max_total_participants: total,
                max_concurrent_groups: groups,
                min_booking_size: min,
                max_booking_size: max,
            },
        };
        Self {
            rooms: vec![
                room("Main Hall", 55, 6, 2, 25),
                room("Jonah", 20, 2, 2, 10),
                room("Joseph", 15, 1, 2, 15),
                room("Moses", 15, 1, 2, 15),
            ],
        }
    }
}

/// Banner shown on the calendar, optionally limited to a window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Announcement {
    pub message: String,
    pub active: bool,
    pub starts_at: Option<Ms>,
    pub ends_at: Option<Ms>,
}

/// Room catalog and admission rules. Built once at start-up and shared by `Arc`;
/// nothing in the decision path reads the environment.
#[derive(Debug, Clone)]
pub struct Policy {
    pub catalog: RoomCatalog,
    /// Room that regular-user requests are squeezed into when they fit.
    pub overflow_room: Option<String>,
    pub business_time: BusinessTime,
    pub user_window_days: u32,
    pub admin_window_months: u32,
    /// Minimum lead time for regular users; 0 disables the check.
    pub min_lead_ms: Ms,
    pub retention_days: u32,
    pub lock_wait: Duration,
    pub announcement: Option<Announcement>,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            catalog: RoomCatalog::default(),
            overflow_room: Some("Main Hall".to_string()),
            business_time: BusinessTime::from_offset_minutes(8 * 60).unwrap_or(BusinessTime::new(Utc.fix())),
            user_window_days: 7,
            admin_window_months: 6,
            min_lead_ms: 24 * HOUR_MS,
            retention_days: 365,
            lock_wait: Duration::from_secs(30),
            announcement: None,
        }
    }
}

impl Policy {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(ref room) = self.overflow_room
            && !self.catalog.contains(room)
        {
            return Err(ConfigError::Invalid(format!("overflow room {room} is not in the catalog")));
        }
        if self.lock_wait.is_zero() {
            return Err(ConfigError::Invalid("lock wait must be positive".into()));
        }
        Ok(())
    }

    pub fn rules(&self, room: &str) -> Option<&RoomRules> {
        self.catalog.rules(room)
    }

    /// The banner to show at `now`, if any. A window is honored only when both ends are set.
    pub fn announcement_at(&self, now: Ms) -> Option<&str> {
        let a = self.announcement.as_ref()?;
        if !a.active || a.message.trim().is_empty() {
            return None;
        }
        if let (Some(start), Some(end)) = (a.starts_at, a.ends_at)
            && (now < start || now > end)
        {
            return None;
        }
        Some(&a.message)
    }
}

// ── Process configuration ────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub admin_secret: Option<String>,
    pub metrics_port: Option<u16>,
    pub sweep_interval: Duration,
    pub compact_threshold: u64,
    pub policy: Policy,
}

impl Config {
    /// Read `ROOMBOOK_*` variables. Unparsable values fall back to defaults with a warning;
    /// an unreadable or invalid room file is fatal.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut policy = Policy::default();

        if let Ok(path) = std::env::var("ROOMBOOK_ROOMS_FILE") {
            policy.catalog = RoomCatalog::load(Path::new(&path))?;
        }
        if let Ok(room) = std::env::var("ROOMBOOK_OVERFLOW_ROOM") {
            policy.overflow_room = Some(room).filter(|r| !r.trim().is_empty());
        }
        if let Some(minutes) = env_parse::<i32>("ROOMBOOK_TZ_OFFSET_MINUTES") {
            match BusinessTime::from_offset_minutes(minutes) {
                Some(bt) => policy.business_time = bt,
                None => tracing::warn!("ROOMBOOK_TZ_OFFSET_MINUTES={minutes} out of range, using default"),
            }
        }
        if let Some(days) = env_parse("ROOMBOOK_RETENTION_DAYS") {
            policy.retention_days = days;
        }
        if let Some(hours) = env_parse::<i64>("ROOMBOOK_MIN_LEAD_HOURS") {
            policy.min_lead_ms = hours.max(0) * HOUR_MS;
        }
        if let Some(secs) = env_parse::<u64>("ROOMBOOK_LOCK_WAIT_SECS") {
            policy.lock_wait = Duration::from_secs(secs.max(1));
        }
        if let Ok(message) = std::env::var("ROOMBOOK_ANNOUNCEMENT") {
            policy.announcement = Some(Announcement {
                message,
                active: true,
                starts_at: None,
                ends_at: None,
            });
        }
        policy.validate()?;

        Ok(Self {
            data_dir: PathBuf::from(std::env::var("ROOMBOOK_DATA_DIR").unwrap_or_else(|_| "./data".into())),
            admin_secret: std::env::var("ROOMBOOK_ADMIN_SECRET").ok().filter(|s| !s.is_empty()),
            metrics_port: env_parse("ROOMBOOK_METRICS_PORT"),
            sweep_interval: Duration::from_secs(env_parse("ROOMBOOK_SWEEP_INTERVAL_SECS").unwrap_or(86_400).max(1)),
            compact_threshold: env_parse("ROOMBOOK_COMPACT_THRESHOLD").unwrap_or(1000),
            policy,
        })
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("invalid {key}={raw:?}, using default");
            None
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io(PathBuf, std::io::Error),
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(path, e) => write!(f, "cannot read {}: {e}", path.display()),
            ConfigError::Invalid(msg) => write!(f, "invalid configuration: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

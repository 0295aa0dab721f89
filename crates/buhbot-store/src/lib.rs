//! SQLite-backed persistence for chats, requests, alerts and settings.
//!
//! | module      | owns                                                |
//! |-------------|------------------------------------------------------|
//! | `db`        | schema init, in-memory test helper                   |
//! | `chats`     | monitored-chat configuration rows                    |
//! | `requests`  | request lifecycle rows, the atomic claim primitive   |
//! | `alerts`    | dedup-safe warning/breach alert rows                 |
//! | `settings`  | global settings singleton, schedules, holidays       |
//! | `audit`     | best-effort change history around request updates    |
//! | `messages`  | raw inbound message log for observability             |

pub mod alerts;
pub mod audit;
pub mod chats;
pub mod db;
pub mod error;
pub mod messages;
pub mod requests;
pub mod settings;

pub use error::{Result, StoreError};

use std::sync::{Arc, Mutex};

use rusqlite::Connection;

/// Shared handle type every `buhbot-*` crate threads through for store access.
pub type Db = Arc<Mutex<Connection>>;

/// Open (or create) the SQLite database at `path` and run schema init.
pub fn open(path: &str) -> Result<Db> {
    let conn = Connection::open(path)?;
    db::init_db(&conn)?;
    Ok(Arc::new(Mutex::new(conn)))
}

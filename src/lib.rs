//! DataShare: token-based file sharing with password gates and timed expiry.

pub mod auth;
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod files;
pub mod guard;
pub mod handlers;
pub mod logging;
pub mod models;
pub mod reaper;
pub mod records;
pub mod router;
pub mod state;
pub mod storage;
pub mod users;
pub mod validation;

pub use error::{AppError, Result};
pub use state::AppState;

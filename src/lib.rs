//! Export, import, backup and wipe engine for the construction management
//! database. The HTTP router and the `faena` binary are thin shells over
//! [`state::AppState`].

pub mod config;
pub mod db;
pub mod error;
pub mod export;
pub mod http;
pub mod import;
pub mod literal;
pub mod logging;
pub mod report;
pub mod state;
pub mod table_order;
pub mod value;
pub mod wipe;

pub use error::{AppError, AppResult, ErrorClass};
pub use state::AppState;

mod connection;
pub mod helpers;
mod migrations;
pub mod models;
pub mod repositories;

pub use connection::{Database, DbError};
pub use repositories::SqliteSessionRepository;

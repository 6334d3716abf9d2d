pub mod sessions;

pub use sessions::SqliteSessionRepository;

pub mod errors;
pub mod finalize;
pub mod host;
pub mod queries;
pub mod repository;
pub mod state;
pub mod store;

pub use errors::FinalizeError;
pub use finalize::{FinalizedSession, SectionAttributes, SessionAttributes};
pub use host::{CommandOutcome, SessionCommand, SessionHost};
pub use queries::{CompletedSectionView, SessionSnapshot};
pub use repository::{InMemorySessionRepository, SavedSession, SessionRepository};
pub use state::{ActiveSessionState, LibraryItemId, Section, SelectOutcome, SessionStatus};
pub use store::ActiveSessionStore;

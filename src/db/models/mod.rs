pub mod session;

pub use session::{SectionRecord, SessionRecord, SessionWithSections};

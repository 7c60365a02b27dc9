pub mod board;
#[cfg(feature = "browser")]
pub mod browser;
pub mod cleaner;
pub mod listing;
pub mod profile;
pub mod session;

pub use board::{BoardSource, BoardSourceFactory};
#[cfg(feature = "browser")]
pub use browser::BrowserSession;
pub use cleaner::DescriptionCleaner;
pub use profile::BoardProfile;
pub use session::{PageSession, SessionConfig};

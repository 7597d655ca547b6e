//! Per-user session state: transcript, derived profile, and game-mode
//! overlay, each with its own retention policy.

pub mod mode;
pub mod store;
pub mod types;

pub use mode::GameMode;
pub use store::{MemorySessionStore, RedisSessionStore, SessionStore};
pub use types::{InlineData, Part, Profile, Role, Turn};

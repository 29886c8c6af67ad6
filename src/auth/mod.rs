//! Token Blacklist Store (C4) and Auth Gate (C5), spec.md §4.4-§4.5.

pub mod blacklist;
pub mod gate;

pub use blacklist::{BlacklistStore, FileBlacklist, InMemoryBlacklist};
pub use gate::{AuthGate, Claims, TokenType};

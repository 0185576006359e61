//! Lobby registry and player naming

pub mod names;
pub mod registry;

pub use registry::LobbyRegistry;

pub mod config;
pub mod server;

pub use config::{Config, EmbedderKind};
pub use server::{router, serve, AppState};

pub mod app;
pub mod client;
pub mod config;
pub mod date_key;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod state;
pub mod stats;
pub mod storage;
pub mod store;
pub mod sync;
pub mod voice;

pub use app::router;
pub use client::ResourceClient;
pub use config::{ClientConfig, ServerConfig};
pub use date_key::DateKey;
pub use errors::{TrackerError, TransportError};
pub use state::AppState;
pub use storage::load_data;
pub use store::RecordStore;
pub use sync::{Persistence, SyncCoordinator};

pub mod cache;
pub mod diagnose;
pub mod health;
pub mod index;
pub mod reconnect;
pub mod registry;
pub mod session;
pub mod state;

pub use diagnose::RegistryError;
pub use index::{SearchPage, ToolHit, ToolIndex};
pub use registry::{PeerStatus, Registry, ToolMetadata};
pub use state::{HealthState, HealthStatus, Lifecycle};

//! Session continuity engine

pub mod coordinator;
mod credentials;
pub mod error;
pub mod manager;
pub mod monitor;
pub mod navigator;
pub mod pipeline;
pub mod resolver;

pub use coordinator::RefreshCoordinator;
pub use error::{RefreshError, SessionError};
pub use manager::SessionManager;
pub use monitor::{ExpirationMonitor, MonitorHandle};
pub use navigator::{Location, Navigator, RecordingNavigator};
pub use pipeline::RequestPipeline;
pub use resolver::{AuthResolver, SessionMount};

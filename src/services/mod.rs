//! Background Services Module
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐ start_all  ┌──────────────────┐  get_background_action  ┌────────────────┐
//! │ ServiceManager  │───────────▶│  RefreshWorkers  │◀────────────────────────│ CachedMetadata │
//! └─────────────────┘  shutdown  └──────────────────┘        action.run        └────────────────┘
//! ```
//!
//! # Services
//!
//! - **ServiceManager**: starts registered services and broadcasts shutdown
//! - **RefreshWorkers**: drains the metadata cache's background refresh queue

pub mod framework;
pub mod refresh;

pub use framework::{Service, ServiceError, ServiceManager, ServiceStatus};
pub use refresh::RefreshWorkers;

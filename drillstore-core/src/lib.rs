//! # Drillstore Core
//!
//! Building blocks shared by the Drillstore crates:
//! - Core data structures (URIs, index values, status records)
//! - The `DataObject` capability trait
//! - Error types
//! - Configuration
//! - Metrics and utilities
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                 drillstore-core                 │
//! ├─────────────────────────────────────────────────┤
//! │  • types    - URIs, index values, records      │
//! │  • traits   - DataObject capability interface  │
//! │  • error    - Error handling                   │
//! │  • config   - Chunk/growing/limit settings     │
//! │  • metrics  - Operation counters               │
//! │  • utils    - Common utilities                 │
//! └─────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod metrics;
pub mod traits;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use error::{Error, Result};
pub use traits::DataObject;
pub use types::{
    ChangeHistoryEntry, ChangeType, CommonMetadata, ContainerStatus, DataQuery, EtpUri,
    GrowingObjectStatus, IndexKind, IndexRange, IndexValue, ObjectHeader, ReturnElements,
    Timestamp,
};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

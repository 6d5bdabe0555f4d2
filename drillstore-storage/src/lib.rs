//! # Drillstore Storage
//!
//! Chunked storage and growing-object lifecycle for index-ordered channel data.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Write Path                           │
//! │                                                             │
//! │  Rows ──> Codec ──> Chunk Store ──> Lifecycle ──> Commit    │
//! │            │          │ merge/split    │ growing    │       │
//! │            ▼          ▼                ▼            ▼       │
//! │        duplicate   Transaction journal (rollback)  History  │
//! │          scan                                               │
//! └─────────────────────────────────────────────────────────────┘
//!
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Background                            │
//! │                                                             │
//! │  Sweeper ──> expire growing objects ──> deactivate          │
//! │   (tick)      (last append < cutoff)     containers         │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod chunk;
pub mod chunk_store;
pub mod codec;
pub mod document;
pub mod growing;
pub mod history;
pub mod snapshot;
pub mod store;
pub mod sweeper;
pub mod transaction;

pub use chunk::{ChannelDataChunk, DataFilter};
pub use chunk_store::{ChannelDataChunkStore, DeleteSummary, WriteSummary};
pub use codec::{ChannelDataReader, ChannelRow, ChannelValue};
pub use document::{Collection, Database};
pub use growing::{ContainerActivityUpdater, GrowingObjectManager, WellboreActivityUpdater};
pub use history::ChangeHistory;
pub use store::{ChannelDataPage, LogDataStore};
pub use sweeper::{GrowingObjectSweeper, SweepReport, SweeperHandle};
pub use transaction::{JournalEntry, Rollback, Transaction, TransactionState};

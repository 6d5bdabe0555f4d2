//! # Log Data Store
//!
//! The operations callers use. Each write opens one root transaction and runs
//!
//! ```text
//!   codec rows ──► chunk store ──► lifecycle ──► commit ──► change history
//!                  merge/split     growing,
//!                  persist         last append,
//!                                  container active
//! ```
//!
//! Any error on the way returns before `commit`, so dropping the transaction
//! undoes the writes already made. The history entry is appended only after a
//! successful commit.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, instrument};

use drillstore_core::{
    error::{Error, Result},
    metrics::Metrics,
    ChangeHistoryEntry, ChangeType, Config, ContainerStatus, DataQuery, EtpUri, GrowingObjectStatus,
    IndexKind, IndexRange, IndexValue, ObjectHeader, ReturnElements, Timestamp,
};

use crate::chunk::ChannelDataChunk;
use crate::chunk_store::{ChannelDataChunkStore, DeleteSummary, WriteSummary};
use crate::codec::{ChannelDataReader, ChannelRow};
use crate::document::Database;
use crate::growing::{GrowingObjectManager, WellboreActivityUpdater};
use crate::history::ChangeHistory;
use crate::snapshot::{self, SnapshotManifest};
use crate::sweeper::{GrowingObjectSweeper, SweepReport};

/// Result of a read
#[derive(Debug, Clone, Default)]
pub struct ChannelDataPage {
    pub header: Option<ObjectHeader>,
    pub index_mnemonics: Vec<String>,
    pub mnemonics: Vec<String>,
    pub units: Vec<String>,
    pub rows: Vec<ChannelRow>,
    /// More rows matched than `max_data_points` allows
    pub truncated: bool,
}

pub struct LogDataStore {
    config: Config,
    db: Arc<Database>,
    chunks: ChannelDataChunkStore,
    growing: Arc<GrowingObjectManager>,
    history: ChangeHistory,
}

impl LogDataStore {
    /// Empty in-memory store
    pub fn new(config: Config) -> Result<Self> {
        Self::with_database(config, Arc::new(Database::new()))
    }

    pub fn with_database(config: Config, db: Arc<Database>) -> Result<Self> {
        let growing = GrowingObjectManager::with_default_activity(Arc::clone(&db));
        Self::build(config, db, growing)
    }

    /// Store whose container activity goes through `activity`
    pub fn with_activity_updater(
        config: Config,
        db: Arc<Database>,
        activity: Arc<dyn WellboreActivityUpdater>,
    ) -> Result<Self> {
        let growing = GrowingObjectManager::new(Arc::clone(&db), activity);
        Self::build(config, db, growing)
    }

    fn build(config: Config, db: Arc<Database>, growing: GrowingObjectManager) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            chunks: ChannelDataChunkStore::new(Arc::clone(&db), config.chunk.clone()),
            history: ChangeHistory::new(Arc::clone(&db)),
            growing: Arc::new(growing),
            config,
            db,
        })
    }

    /// Load the snapshot in `dir`, or start empty if there is none
    pub fn open(config: Config, dir: &Path) -> Result<Self> {
        if snapshot::exists(dir) {
            let db = snapshot::load(dir, Metrics::new())?;
            Self::with_database(config, Arc::new(db))
        } else {
            info!(dir = %dir.display(), "No snapshot found, starting empty");
            Self::new(config)
        }
    }

    pub fn save(&self, dir: &Path) -> Result<SnapshotManifest> {
        snapshot::save(&self.db, dir)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn metrics(&self) -> &Metrics {
        self.db.metrics()
    }

    pub fn chunk_store(&self) -> &ChannelDataChunkStore {
        &self.chunks
    }

    pub fn growing(&self) -> &Arc<GrowingObjectManager> {
        &self.growing
    }

    pub fn history(&self) -> &ChangeHistory {
        &self.history
    }

    fn require_header(&self, uri: &EtpUri) -> Result<ObjectHeader> {
        self.growing
            .get_header(uri)?
            .ok_or_else(|| Error::ParentNotFound { uri: uri.to_string() })
    }

    /// Register a container (wellbore)
    pub fn add_container(&self, container: ContainerStatus) -> Result<()> {
        let tx = self.db.begin_transaction();
        tx.set_context(container.uri.clone());
        self.growing.register_container(&tx, &container)?;
        tx.commit();
        self.metrics().record_commit();
        drop(tx);

        self.history
            .append(&ChangeHistoryEntry::new(container.uri, ChangeType::Add, "container added"))
    }

    /// Register a data object; its container is created if missing
    pub fn add_object(&self, header: ObjectHeader) -> Result<()> {
        let tx = self.db.begin_transaction();
        tx.set_context(header.uri.clone());
        if let Some(container_uri) = &header.container_uri {
            if self.growing.get_container(container_uri)?.is_none() {
                let name = container_uri.object_id().unwrap_or_default();
                self.growing
                    .register_container(&tx, &ContainerStatus::new(container_uri.clone(), name))?;
            }
        }
        self.growing.register_object(&tx, &header)?;
        tx.commit();
        self.metrics().record_commit();
        drop(tx);

        self.history.append(
            &ChangeHistoryEntry::new(header.uri.clone(), ChangeType::Add, "object added")
                .with_growing_state(header.object_growing),
        )
    }

    pub fn add_data(&self, uri: &EtpUri, reader: ChannelDataReader) -> Result<WriteSummary> {
        self.write_data(uri, reader, ChangeType::Add)
    }

    pub fn update_data(&self, uri: &EtpUri, reader: ChannelDataReader) -> Result<WriteSummary> {
        self.write_data(uri, reader, ChangeType::Update)
    }

    #[instrument(skip(self, uri, reader), fields(uri = %uri, rows = reader.row_count()))]
    fn write_data(&self, uri: &EtpUri, reader: ChannelDataReader, change: ChangeType) -> Result<WriteSummary> {
        let limit = self.config.limits.max_data_nodes;
        if reader.row_count() > limit {
            self.metrics().record_write_error();
            return Err(Error::MaxDataExceeded {
                count: reader.row_count(),
                limit,
            });
        }
        self.require_header(uri)?;

        let tx = self.db.begin_transaction();
        tx.set_context(uri.clone());

        let written = match change {
            ChangeType::Add => self.chunks.add_data(&tx, uri, reader),
            _ => self.chunks.update_data(&tx, uri, reader),
        };
        let summary = match written {
            Ok(summary) => summary,
            Err(e) => {
                self.metrics().record_write_error();
                return Err(e);
            }
        };
        if summary.rows > 0 {
            self.growing.record_append(&tx, uri)?;
        }

        tx.commit();
        self.metrics().record_commit();
        drop(tx);

        let (start, end) = match &summary.range {
            Some((start, end)) => (Some(start.clone()), Some(end.clone())),
            None => (None, None),
        };
        self.history.append(
            &ChangeHistoryEntry::new(uri.clone(), change, format!("{} rows", summary.rows))
                .with_growing_state(summary.rows > 0)
                .with_range(start, end),
        )?;
        Ok(summary)
    }

    /// Chunks selected by the query; empty when the query asks for no data.
    /// An open range selects every chunk.
    pub fn get_data(&self, uri: &EtpUri, query: &DataQuery) -> Result<Vec<ChannelDataChunk>> {
        if !query.return_elements.includes_data() {
            return Ok(Vec::new());
        }
        let filter = self
            .chunks
            .build_data_filter(uri, &query.mnemonics, query.range, query.range.is_open());
        self.chunks.get_data(&filter)
    }

    /// Header and rows for a query, capped at `max_data_points` rows
    pub fn read_data(&self, uri: &EtpUri, query: &DataQuery) -> Result<ChannelDataPage> {
        let header = self
            .growing
            .get_header(uri)?
            .ok_or_else(|| Error::NotFound { uri: uri.to_string() })?;

        let mut page = ChannelDataPage::default();
        if query.return_elements != ReturnElements::DataOnly {
            page.header = Some(header);
        }
        if !query.return_elements.includes_data() {
            return Ok(page);
        }

        let filter = self
            .chunks
            .build_data_filter(uri, &query.mnemonics, query.range, query.range.is_open());
        let reader = match self.chunks.get_reader(&filter)? {
            Some(reader) => reader,
            None => return Ok(page),
        };

        page.index_mnemonics = reader.index_mnemonics().to_vec();
        page.mnemonics = reader.mnemonics().to_vec();
        page.units = reader.units().to_vec();
        page.rows = reader.into_rows();

        let limit = self.config.limits.max_data_points;
        if page.rows.len() > limit {
            debug!(uri = %uri, rows = page.rows.len(), limit, "Truncating read");
            page.rows.truncate(limit);
            page.truncated = true;
        }
        Ok(page)
    }

    /// Delete data in `range`; with `mnemonics`, only those channels
    pub fn delete_data(
        &self,
        uri: &EtpUri,
        range: IndexRange,
        mnemonics: Option<&[String]>,
    ) -> Result<DeleteSummary> {
        self.require_header(uri)?;
        let kind = self
            .chunks
            .get_chunks(uri)?
            .first()
            .map_or(IndexKind::Depth, |c| c.index_kind);

        let tx = self.db.begin_transaction();
        tx.set_context(uri.clone());
        let summary = self.chunks.delete_data(&tx, uri, range, mnemonics)?;
        tx.commit();
        self.metrics().record_commit();
        drop(tx);

        let info = match mnemonics {
            Some(names) => format!("{} rows, channels {}", summary.rows_removed, names.join(",")),
            None => format!("{} rows", summary.rows_removed),
        };
        self.history.append(
            &ChangeHistoryEntry::new(uri.clone(), ChangeType::DeleteData, info).with_range(
                range.start.map(|k| IndexValue::from_key(kind, k)),
                range.end.map(|k| IndexValue::from_key(kind, k)),
            ),
        )?;
        Ok(summary)
    }

    /// Delete an object with all of its data
    pub fn delete_object(&self, uri: &EtpUri) -> Result<()> {
        self.require_header(uri)?;

        let tx = self.db.begin_transaction();
        tx.set_context(uri.clone());
        let chunks = self.chunks.delete_all(&tx, uri)?;
        self.growing.remove_object(&tx, uri)?;
        tx.commit();
        self.metrics().record_commit();
        drop(tx);

        self.history.append(&ChangeHistoryEntry::new(
            uri.clone(),
            ChangeType::Delete,
            format!("{} chunks", chunks),
        ))
    }

    pub fn update_object_growing(&self, uri: &EtpUri, is_growing: bool) -> Result<bool> {
        let tx = self.db.begin_transaction();
        tx.set_context(uri.clone());
        let changed = self.growing.update_object_growing(&tx, uri, is_growing)?;
        tx.commit();
        self.metrics().record_commit();
        drop(tx);

        if changed {
            self.history.append(
                &ChangeHistoryEntry::new(uri.clone(), ChangeType::GrowingChanged, "growing flag set")
                    .with_growing_state(is_growing),
            )?;
        }
        Ok(changed)
    }

    pub fn expire_growing_objects(&self, object_type: &str, cutoff: Timestamp) -> Result<BTreeSet<EtpUri>> {
        self.growing.expire_growing_objects(object_type, cutoff)
    }

    pub fn expire_wellbore_objects(&self, containers: &BTreeSet<EtpUri>) -> Result<usize> {
        self.growing.expire_wellbore_objects(containers)
    }

    pub fn object_status(&self, uri: &EtpUri) -> Result<Option<GrowingObjectStatus>> {
        self.growing.get_status(uri)
    }

    pub fn container_status(&self, uri: &EtpUri) -> Result<Option<ContainerStatus>> {
        self.growing.get_container(uri)
    }

    /// Sweeper over this store's lifecycle with the configured timeouts
    pub fn sweeper(&self) -> GrowingObjectSweeper {
        GrowingObjectSweeper::new(Arc::clone(&self.growing), self.config.growing.clone())
    }

    pub fn sweep_once(&self) -> Result<SweepReport> {
        self.sweeper().sweep_once()
    }
}

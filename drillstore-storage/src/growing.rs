//! # Growing-Object Lifecycle
//!
//! Tracks whether a data object is still receiving appended data and whether its
//! container (wellbore) is active.
//!
//! ```text
//!                 append                      append
//!   NotGrowing ───────────► Growing ◄──────────────┐
//!       ▲                     │  (refreshes last   │
//!       │                     │   append time)  ───┘
//!       │  sweep, last append │
//!       └────── < cutoff ─────┘
//! ```
//!
//! Three collections back the lifecycle: object headers (`dataObject`), the
//! minimal tracking records the sweep reads (`dbGrowingObject`), and container
//! activity (`wellbore`). A container stays active while any child is growing;
//! only the sweep turns it off.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use drillstore_core::{
    error::{Error, Result},
    metrics::Metrics,
    ChangeHistoryEntry, ChangeType, ContainerStatus, DataObject, EtpUri, GrowingObjectStatus,
    ObjectHeader, Timestamp,
};

use crate::document::{Collection, Database, Versioned};
use crate::history::ChangeHistory;
use crate::transaction::Transaction;

pub const OBJECT_COLLECTION: &str = "dataObject";
pub const GROWING_COLLECTION: &str = "dbGrowingObject";
pub const CONTAINER_COLLECTION: &str = "wellbore";

/// Pushes container activity changes to wherever containers are kept
pub trait WellboreActivityUpdater: Send + Sync {
    /// Set the container's active flag. Returns true if the flag changed.
    /// Writes go through `tx` when one is given.
    fn update_is_active(&self, tx: Option<&Transaction>, uri: &EtpUri, is_active: bool) -> Result<bool>;
}

/// Writes container activity to the `wellbore` collection, creating the
/// record on first use
pub struct ContainerActivityUpdater {
    db: Arc<Database>,
}

impl ContainerActivityUpdater {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

impl WellboreActivityUpdater for ContainerActivityUpdater {
    fn update_is_active(&self, tx: Option<&Transaction>, uri: &EtpUri, is_active: bool) -> Result<bool> {
        let collection = self.db.collection(CONTAINER_COLLECTION);
        let mut container = match collection.get::<ContainerStatus>(uri.as_str())? {
            Some(stored) if stored.document.is_active == is_active => return Ok(false),
            Some(stored) => stored.document,
            None => ContainerStatus::new(uri.clone(), uri.object_id().unwrap_or_default()),
        };

        container.is_active = is_active;
        container.touch();
        match tx {
            Some(tx) => tx.upsert(&collection, uri.as_str(), &container)?,
            None => collection.upsert(uri.as_str(), &container)?,
        };
        debug!(container = %uri, is_active, "Container activity changed");
        Ok(true)
    }
}

pub struct GrowingObjectManager {
    db: Arc<Database>,
    activity: Arc<dyn WellboreActivityUpdater>,
    history: ChangeHistory,
    metrics: Metrics,
}

impl GrowingObjectManager {
    pub fn new(db: Arc<Database>, activity: Arc<dyn WellboreActivityUpdater>) -> Self {
        let metrics = db.metrics().clone();
        let history = ChangeHistory::new(Arc::clone(&db));
        Self {
            db,
            activity,
            history,
            metrics,
        }
    }

    /// Manager whose container updates go to the `wellbore` collection
    pub fn with_default_activity(db: Arc<Database>) -> Self {
        let activity = Arc::new(ContainerActivityUpdater::new(Arc::clone(&db)));
        Self::new(db, activity)
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    fn objects(&self) -> Arc<Collection> {
        self.db.collection(OBJECT_COLLECTION)
    }

    fn statuses(&self) -> Arc<Collection> {
        self.db.collection(GROWING_COLLECTION)
    }

    fn containers(&self) -> Arc<Collection> {
        self.db.collection(CONTAINER_COLLECTION)
    }

    /// Store the header of a data object
    pub fn register_object(&self, tx: &Transaction, header: &ObjectHeader) -> Result<u64> {
        tx.upsert(&self.objects(), header.uri.as_str(), header)
    }

    /// Store a container record
    pub fn register_container(&self, tx: &Transaction, container: &ContainerStatus) -> Result<u64> {
        tx.upsert(&self.containers(), container.uri.as_str(), container)
    }

    pub fn get_header(&self, uri: &EtpUri) -> Result<Option<ObjectHeader>> {
        Ok(self.objects().get::<ObjectHeader>(uri.as_str())?.map(|v| v.document))
    }

    fn require_header(&self, uri: &EtpUri) -> Result<Versioned<ObjectHeader>> {
        self.objects()
            .get(uri.as_str())?
            .ok_or_else(|| Error::ParentNotFound { uri: uri.to_string() })
    }

    pub fn get_status(&self, uri: &EtpUri) -> Result<Option<GrowingObjectStatus>> {
        Ok(self.statuses().get::<GrowingObjectStatus>(uri.as_str())?.map(|v| v.document))
    }

    pub fn get_container(&self, uri: &EtpUri) -> Result<Option<ContainerStatus>> {
        Ok(self.containers().get::<ContainerStatus>(uri.as_str())?.map(|v| v.document))
    }

    /// Headers of every registered object, in URI order
    pub fn headers(&self) -> Result<Vec<ObjectHeader>> {
        Ok(self
            .objects()
            .scan_prefix::<ObjectHeader>("")?
            .into_iter()
            .map(|v| v.document)
            .collect())
    }

    /// Remove an object's header and tracking record
    pub fn remove_object(&self, tx: &Transaction, uri: &EtpUri) -> Result<bool> {
        let existed = tx.delete(&self.objects(), uri.as_str())?;
        tx.delete(&self.statuses(), uri.as_str())?;
        Ok(existed)
    }

    /// Set the object's growing flag. Turning it on also stamps the last append
    /// time and activates the container. Turning it off touches only the header;
    /// the tracking record stays growing until the sweep expires it, which is
    /// also when the container is released. Returns true if the flag changed.
    pub fn update_object_growing(&self, tx: &Transaction, uri: &EtpUri, is_growing: bool) -> Result<bool> {
        let stored = self.require_header(uri)?;
        let mut header = stored.document;
        if header.object_growing == is_growing {
            return Ok(false);
        }

        header.object_growing = is_growing;
        header.touch();
        let outcome = tx.replace_checked(&self.objects(), uri.as_str(), &header, stored.version)?;
        if outcome.raced {
            self.metrics.record_race();
        }

        if is_growing {
            self.update_last_append_date_time(tx, uri, header.container_uri.as_ref())?;
            if let Some(container) = &header.container_uri {
                self.activity.update_is_active(Some(tx), container, true)?;
            }
        }

        debug!(uri = %uri, is_growing, "Object growing flag changed");
        Ok(true)
    }

    /// Upsert the tracking record with the current time
    pub fn update_last_append_date_time(
        &self,
        tx: &Transaction,
        uri: &EtpUri,
        container_uri: Option<&EtpUri>,
    ) -> Result<()> {
        let status = GrowingObjectStatus {
            uri: uri.clone(),
            object_type: uri.object_type().unwrap_or_default().to_string(),
            container_uri: container_uri.cloned(),
            last_append: Utc::now(),
            is_growing: true,
        };
        tx.upsert(&self.statuses(), uri.as_str(), &status)?;
        Ok(())
    }

    /// Lifecycle bookkeeping for one append: the object is growing, its last
    /// append time is now and its container is active. Returns true if the
    /// object just started growing.
    pub fn record_append(&self, tx: &Transaction, uri: &EtpUri) -> Result<bool> {
        if self.update_object_growing(tx, uri, true)? {
            return Ok(true);
        }

        let header = self.require_header(uri)?.document;
        self.update_last_append_date_time(tx, uri, header.container_uri.as_ref())?;
        if let Some(container) = &header.container_uri {
            self.activity.update_is_active(Some(tx), container, true)?;
        }
        Ok(false)
    }

    /// Flip every growing object of `object_type` whose last append is older
    /// than `cutoff` to not growing. Returns the containers of the flipped objects.
    ///
    /// Records that change while the sweep runs are left for the next pass.
    pub fn expire_growing_objects(&self, object_type: &str, cutoff: Timestamp) -> Result<BTreeSet<EtpUri>> {
        let statuses = self.statuses();
        let expired: Vec<Versioned<GrowingObjectStatus>> = statuses.find(|s: &GrowingObjectStatus| {
            s.is_growing && s.object_type.eq_ignore_ascii_case(object_type) && s.last_append < cutoff
        })?;

        let mut containers = BTreeSet::new();
        let mut flipped = 0u64;
        for stored in expired {
            let mut status = stored.document;
            status.is_growing = false;
            let Some(status_version) = statuses.replace_if_version(&stored.key, &status, stored.version)? else {
                debug!(uri = %status.uri, "Skipping expiry, record changed during sweep");
                continue;
            };

            if !self.clear_header_growing(&status.uri, status_version)? {
                debug!(uri = %status.uri, "Skipping expiry, append landed during sweep");
                continue;
            }

            self.history.append(
                &ChangeHistoryEntry::new(status.uri.clone(), ChangeType::GrowingChanged, "growing timeout expired")
                    .with_growing_state(false),
            )?;
            if let Some(container) = status.container_uri {
                containers.insert(container);
            }
            flipped += 1;
        }

        if flipped > 0 {
            self.metrics.record_objects_expired(flipped);
            info!(object_type, expired = flipped, "Expired growing objects");
        }
        Ok(containers)
    }

    /// Clear the header's growing flag after the sweep flipped the tracking
    /// record to `status_version`. Returns false, with the header left growing,
    /// if an append rewrote the tracking record in between.
    fn clear_header_growing(&self, uri: &EtpUri, status_version: u64) -> Result<bool> {
        let objects = self.objects();
        let Some(stored) = objects.get::<ObjectHeader>(uri.as_str())? else {
            return Ok(true);
        };
        let mut header = stored.document;
        if !header.object_growing {
            return Ok(true);
        }

        header.object_growing = false;
        header.touch();
        let Some(header_version) = objects.replace_if_version(uri.as_str(), &header, stored.version)? else {
            self.metrics.record_race();
            return Ok(false);
        };

        let appended = self
            .statuses()
            .get::<GrowingObjectStatus>(uri.as_str())?
            .map_or(false, |s| s.version != status_version && s.document.is_growing);
        if appended {
            header.object_growing = true;
            header.touch();
            if objects.replace_if_version(uri.as_str(), &header, header_version)?.is_none() {
                self.metrics.record_race();
            }
            return Ok(false);
        }
        Ok(true)
    }

    /// Distinct object types that have a tracking record
    pub fn tracked_object_types(&self) -> Result<BTreeSet<String>> {
        Ok(self
            .statuses()
            .scan_prefix::<GrowingObjectStatus>("")?
            .into_iter()
            .map(|v| v.document.object_type.to_ascii_lowercase())
            .filter(|t| !t.is_empty())
            .collect())
    }

    /// Deactivate each container that has no growing child left.
    /// Returns the number of containers turned off.
    pub fn expire_wellbore_objects(&self, containers: &BTreeSet<EtpUri>) -> Result<usize> {
        let mut deactivated = 0;
        for container in containers {
            let growing: Vec<Versioned<GrowingObjectStatus>> = self
                .statuses()
                .find(|s: &GrowingObjectStatus| s.is_growing && s.container_uri.as_ref() == Some(container))?;
            if !growing.is_empty() {
                continue;
            }
            if self.activity.update_is_active(None, container, false)? {
                deactivated += 1;
            }
        }

        if deactivated > 0 {
            self.metrics.record_containers_deactivated(deactivated as u64);
            info!(deactivated, "Deactivated containers");
        }
        Ok(deactivated)
    }
}

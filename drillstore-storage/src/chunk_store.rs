//! # Channel Data Chunk Store
//!
//! Persists a URI's channel data as contiguous, non-overlapping chunks bounded
//! by an index-range width and a maximum encoded document size.
//!
//! ```text
//!  width = 1000
//!
//!  bucket 0 [0, 1000)          bucket 1 [1000, 2000)      bucket 3 ...
//!  ┌──────────┬──────────┐     ┌──────────────┐
//!  │ chunk a  │ chunk b  │     │   chunk c    │          (gaps allowed)
//!  │ 0..499   │ 500..999 │     │  1000..1100  │
//!  └──────────┴──────────┘     └──────────────┘
//!   split by halving when one chunk would exceed the document ceiling
//! ```
//!
//! ## Write path
//!
//! 1. Incoming rows are sorted by primary index and scanned once for duplicates.
//! 2. Rows are grouped into aligned buckets `floor(key / width)`.
//! 3. Each bucket is merged with the chunks already stored in it (incoming
//!    non-null values win) and re-split until every piece fits the ceiling.
//! 4. Every bucket is planned before anything is written, so a row that can
//!    never fit leaves the stored chunks untouched.
//! 5. The plan is applied through the caller's transaction. Existing chunk ids
//!    are reused in order and unchanged pieces are not rewritten.

use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use drillstore_core::{
    config::ChunkConfig,
    error::{Error, Result},
    metrics::Metrics,
    types::compare_keys,
    utils::bucket_start,
    EtpUri, IndexKind, IndexRange, IndexValue,
};

use crate::chunk::{chunk_prefix, ChannelDataChunk, DataFilter, CHUNK_COLLECTION};
use crate::codec::{check_duplicate_indices, compare_rows, union_mnemonics, ChannelDataReader, ChannelRow};
use crate::document::{Collection, Database, Versioned};
use crate::transaction::Transaction;

/// Outcome of an add or update
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteSummary {
    pub rows: usize,
    pub chunks_inserted: usize,
    pub chunks_replaced: usize,
    pub chunks_deleted: usize,
    pub chunks_unchanged: usize,
    pub races: usize,
    /// First and last primary index of the incoming rows
    pub range: Option<(IndexValue, IndexValue)>,
}

/// Outcome of a data delete
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteSummary {
    pub chunks_deleted: usize,
    pub chunks_updated: usize,
    pub rows_removed: usize,
}

/// Column layout shared by the rows of one write
#[derive(Debug, Clone)]
struct Layout {
    index_kind: IndexKind,
    index_mnemonics: Vec<String>,
    mnemonics: Vec<String>,
    units: Vec<String>,
}

#[derive(Debug)]
enum ChunkWrite {
    Insert(ChannelDataChunk),
    Replace {
        chunk: ChannelDataChunk,
        expected_version: u64,
    },
    Delete {
        key: String,
    },
    Unchanged,
}

pub struct ChannelDataChunkStore {
    db: Arc<Database>,
    config: ChunkConfig,
    metrics: Metrics,
}

impl ChannelDataChunkStore {
    pub fn new(db: Arc<Database>, config: ChunkConfig) -> Self {
        let metrics = db.metrics().clone();
        Self { db, config, metrics }
    }

    pub fn config(&self) -> &ChunkConfig {
        &self.config
    }

    fn collection(&self) -> Arc<Collection> {
        self.db.collection(CHUNK_COLLECTION)
    }

    pub fn build_data_filter(
        &self,
        uri: &EtpUri,
        mnemonics: &[String],
        range: IndexRange,
        include_all: bool,
    ) -> DataFilter {
        DataFilter {
            uri: uri.clone(),
            mnemonics: mnemonics.to_vec(),
            range,
            include_all,
        }
    }

    fn stored_chunks(&self, uri: &EtpUri) -> Result<Vec<Versioned<ChannelDataChunk>>> {
        let mut chunks: Vec<Versioned<ChannelDataChunk>> =
            self.collection().scan_prefix(&chunk_prefix(uri))?;
        chunks.sort_by(|a, b| compare_keys(a.document.start_index, b.document.start_index));
        Ok(chunks)
    }

    /// Every chunk of `uri`, unprojected, ordered by start index
    pub fn get_chunks(&self, uri: &EtpUri) -> Result<Vec<ChannelDataChunk>> {
        Ok(self
            .stored_chunks(uri)?
            .into_iter()
            .map(|v| v.document)
            .collect())
    }

    /// Selected chunks ordered by start index, projected to the requested
    /// channels and trimmed to the range
    pub fn get_data(&self, filter: &DataFilter) -> Result<Vec<ChannelDataChunk>> {
        let mut selected = Vec::new();
        for stored in self.stored_chunks(&filter.uri)? {
            let chunk = stored.document;
            if !filter.selects(chunk.start_index, chunk.end_index) {
                continue;
            }
            if let Some(projected) = project(chunk, filter)? {
                selected.push(projected);
            }
        }
        debug!(uri = %filter.uri, chunks = selected.len(), "Selected chunks");
        Ok(selected)
    }

    /// Selected data as one cursor over the union of the chunks' channels
    pub fn get_reader(&self, filter: &DataFilter) -> Result<Option<ChannelDataReader>> {
        let chunks = self.get_data(filter)?;
        let first = match chunks.first() {
            Some(first) => first,
            None => return Ok(None),
        };
        let index_mnemonics = first.index_mnemonics.clone();

        let mut mnemonics: Vec<String> = Vec::new();
        for chunk in &chunks {
            mnemonics = union_mnemonics(&mnemonics, &chunk.mnemonics);
        }
        if let Some(order) = filter.projection(&mnemonics) {
            mnemonics = order;
        }
        let units = merged_units(&mnemonics, chunks.iter().map(|c| (&c.mnemonics[..], &c.units[..])));

        let mut rows = Vec::new();
        for chunk in &chunks {
            rows.extend(
                chunk
                    .rows()?
                    .into_iter()
                    .map(|row| row.remap(&chunk.mnemonics, &mnemonics)),
            );
        }

        ChannelDataReader::from_rows(rows, Some(index_mnemonics), Some(mnemonics))?
            .with_units(units)
            .map(Some)
    }

    pub fn add_data(&self, tx: &Transaction, uri: &EtpUri, reader: ChannelDataReader) -> Result<WriteSummary> {
        self.write(tx, uri, reader, "add")
    }

    pub fn update_data(&self, tx: &Transaction, uri: &EtpUri, reader: ChannelDataReader) -> Result<WriteSummary> {
        self.write(tx, uri, reader, "update")
    }

    fn write(&self, tx: &Transaction, uri: &EtpUri, reader: ChannelDataReader, op: &str) -> Result<WriteSummary> {
        let layout = Layout {
            index_kind: reader.index_kind(),
            index_mnemonics: reader.index_mnemonics().to_vec(),
            mnemonics: reader.mnemonics().to_vec(),
            units: reader.units().to_vec(),
        };
        let mut rows = reader.into_rows();
        if rows.is_empty() {
            return Ok(WriteSummary::default());
        }

        rows.sort_by(compare_rows);
        check_duplicate_indices(&rows)?;

        let width = self.config.range_size(layout.index_kind);
        let mut summary = WriteSummary {
            rows: rows.len(),
            range: Some((rows[0].primary().clone(), rows[rows.len() - 1].primary().clone())),
            ..Default::default()
        };

        let existing = self.stored_chunks(uri)?;
        for chunk in &existing {
            let stored = &chunk.document;
            if stored.index_kind != layout.index_kind {
                return Err(Error::format(0, format!("{} is indexed by {:?}", uri, stored.index_kind)));
            }
            if stored.index_mnemonics.len() != layout.index_mnemonics.len() {
                return Err(Error::format(0, format!("{} has {} index values per row", uri, stored.index_mnemonics.len())));
            }
        }

        // Plan every bucket before persisting anything
        let mut plan = Vec::new();
        let mut cursor = 0;
        while cursor < rows.len() {
            let bucket = bucket_start(rows[cursor].key(), width);
            let end = rows[cursor..]
                .iter()
                .position(|r| bucket_start(r.key(), width) != bucket)
                .map_or(rows.len(), |n| cursor + n);

            let in_bucket: Vec<&Versioned<ChannelDataChunk>> = existing
                .iter()
                .filter(|c| bucket_start(c.document.start_index, width) == bucket)
                .collect();
            plan.extend(self.plan_bucket(uri, &layout, &rows[cursor..end], &in_bucket)?);
            cursor = end;
        }

        let collection = self.collection();
        for write in plan {
            match write {
                ChunkWrite::Insert(chunk) => {
                    tx.insert(&collection, &chunk.key(), &chunk)?;
                    self.metrics.record_chunk_written();
                    summary.chunks_inserted += 1;
                }
                ChunkWrite::Replace { chunk, expected_version } => {
                    let outcome = tx.replace_checked(&collection, &chunk.key(), &chunk, expected_version)?;
                    if outcome.raced {
                        warn!(
                            uri = %uri,
                            chunk = %chunk.id,
                            expected_version,
                            "ConcurrencyRaceWarning: chunk changed during merge, last write wins"
                        );
                        self.metrics.record_race();
                        summary.races += 1;
                    }
                    self.metrics.record_chunk_written();
                    summary.chunks_replaced += 1;
                }
                ChunkWrite::Delete { key } => {
                    tx.delete(&collection, &key)?;
                    self.metrics.record_chunk_deleted();
                    summary.chunks_deleted += 1;
                }
                ChunkWrite::Unchanged => summary.chunks_unchanged += 1,
            }
        }
        self.metrics.record_rows_written(summary.rows as u64);

        info!(
            uri = %uri,
            op,
            rows = summary.rows,
            inserted = summary.chunks_inserted,
            replaced = summary.chunks_replaced,
            deleted = summary.chunks_deleted,
            "Wrote channel data"
        );
        Ok(summary)
    }

    fn plan_bucket(
        &self,
        uri: &EtpUri,
        layout: &Layout,
        incoming: &[ChannelRow],
        existing: &[&Versioned<ChannelDataChunk>],
    ) -> Result<Vec<ChunkWrite>> {
        if existing.is_empty() {
            let pieces = self.split_to_fit(uri, layout, incoming)?;
            if pieces.len() > 1 {
                self.metrics.record_chunk_split(pieces.len() as u64);
            }
            return Ok(pieces.into_iter().map(ChunkWrite::Insert).collect());
        }

        let mut mnemonics: Vec<String> = Vec::new();
        for chunk in existing {
            mnemonics = union_mnemonics(&mnemonics, &chunk.document.mnemonics);
        }
        mnemonics = union_mnemonics(&mnemonics, &layout.mnemonics);

        let sources = existing
            .iter()
            .map(|c| (&c.document.mnemonics[..], &c.document.units[..]))
            .chain(std::iter::once((&layout.mnemonics[..], &layout.units[..])));
        let units = merged_units(&mnemonics, sources);

        let mut stored_rows = Vec::new();
        for chunk in existing {
            let from = &chunk.document.mnemonics;
            stored_rows.extend(chunk.document.rows()?.into_iter().map(|r| r.remap(from, &mnemonics)));
        }
        stored_rows.sort_by(compare_rows);

        let incoming = incoming
            .iter()
            .cloned()
            .map(|r| r.remap(&layout.mnemonics, &mnemonics));
        let merged = merge_sorted(stored_rows, incoming);

        let merged_layout = Layout {
            index_kind: layout.index_kind,
            index_mnemonics: existing[0].document.index_mnemonics.clone(),
            mnemonics,
            units,
        };
        let mut pieces = self.split_to_fit(uri, &merged_layout, &merged)?;
        if pieces.len() > 1 {
            self.metrics.record_chunk_split(pieces.len() as u64);
        }

        let mut writes = Vec::with_capacity(pieces.len().max(existing.len()));
        for (i, piece) in pieces.iter_mut().enumerate() {
            match existing.get(i) {
                Some(stored) => {
                    piece.id = stored.document.id;
                    if piece.same_content(&stored.document) {
                        writes.push(ChunkWrite::Unchanged);
                    } else {
                        writes.push(ChunkWrite::Replace {
                            chunk: piece.clone(),
                            expected_version: stored.version,
                        });
                    }
                }
                None => writes.push(ChunkWrite::Insert(piece.clone())),
            }
        }
        for stored in existing.iter().skip(pieces.len()) {
            writes.push(ChunkWrite::Delete {
                key: stored.key.clone(),
            });
        }
        Ok(writes)
    }

    /// Halve `rows` until every piece fits the document ceiling
    fn split_to_fit(&self, uri: &EtpUri, layout: &Layout, rows: &[ChannelRow]) -> Result<Vec<ChannelDataChunk>> {
        let mut pieces = Vec::new();
        self.split_into(uri, layout, rows, &mut pieces)?;
        Ok(pieces)
    }

    fn split_into(
        &self,
        uri: &EtpUri,
        layout: &Layout,
        rows: &[ChannelRow],
        out: &mut Vec<ChannelDataChunk>,
    ) -> Result<()> {
        let chunk = ChannelDataChunk::from_rows(
            Uuid::new_v4(),
            uri,
            layout.index_kind,
            &layout.index_mnemonics,
            &layout.mnemonics,
            &layout.units,
            rows,
        )?;
        let size = chunk.document_size()?;
        let limit = self.config.max_document_size;
        if size <= limit {
            out.push(chunk);
            return Ok(());
        }
        if rows.len() == 1 {
            return Err(Error::DocumentTooLarge { size, limit });
        }

        debug!(uri = %uri, rows = rows.len(), size, limit, "Splitting oversized chunk");
        let mid = rows.len() / 2;
        self.split_into(uri, layout, &rows[..mid], out)?;
        self.split_into(uri, layout, &rows[mid..], out)
    }

    /// Remove data in `range`. With `mnemonics`, only those channels are cleared
    /// and rows left without values are removed.
    pub fn delete_data(
        &self,
        tx: &Transaction,
        uri: &EtpUri,
        range: IndexRange,
        mnemonics: Option<&[String]>,
    ) -> Result<DeleteSummary> {
        let collection = self.collection();
        let mut summary = DeleteSummary::default();

        for stored in self.stored_chunks(uri)? {
            let chunk = &stored.document;
            if !range.overlaps(chunk.start_index, chunk.end_index) {
                continue;
            }

            if mnemonics.is_none() && range.covers(chunk.start_index, chunk.end_index) {
                tx.delete(&collection, &stored.key)?;
                self.metrics.record_chunk_deleted();
                summary.chunks_deleted += 1;
                summary.rows_removed += chunk.record_count;
                continue;
            }

            let columns: Option<Vec<usize>> = mnemonics.map(|names| {
                chunk
                    .mnemonics
                    .iter()
                    .enumerate()
                    .filter(|(_, m)| names.iter().any(|n| n.eq_ignore_ascii_case(m)))
                    .map(|(i, _)| i)
                    .collect()
            });

            let rows = chunk.rows()?;
            let before = rows.clone();
            let mut kept = Vec::with_capacity(rows.len());
            for mut row in rows {
                if !range.contains(row.key()) {
                    kept.push(row);
                    continue;
                }
                if let Some(columns) = &columns {
                    for &c in columns {
                        if let Some(slot) = row.values.get_mut(c) {
                            *slot = None;
                        }
                    }
                    if !row.is_empty() {
                        kept.push(row);
                    }
                }
            }

            if kept == before {
                continue;
            }
            summary.rows_removed += before.len() - kept.len();

            if kept.is_empty() {
                tx.delete(&collection, &stored.key)?;
                self.metrics.record_chunk_deleted();
                summary.chunks_deleted += 1;
                continue;
            }

            let trimmed = ChannelDataChunk::from_rows(
                chunk.id,
                uri,
                chunk.index_kind,
                &chunk.index_mnemonics,
                &chunk.mnemonics,
                &chunk.units,
                &kept,
            )?;
            let outcome = tx.replace_checked(&collection, &stored.key, &trimmed, stored.version)?;
            if outcome.raced {
                warn!(uri = %uri, chunk = %chunk.id, "ConcurrencyRaceWarning: chunk changed during delete");
                self.metrics.record_race();
            }
            summary.chunks_updated += 1;
        }

        info!(
            uri = %uri,
            deleted = summary.chunks_deleted,
            updated = summary.chunks_updated,
            rows = summary.rows_removed,
            "Deleted channel data"
        );
        Ok(summary)
    }

    /// Remove every chunk of `uri`
    pub fn delete_all(&self, tx: &Transaction, uri: &EtpUri) -> Result<usize> {
        let collection = self.collection();
        let chunks = self.stored_chunks(uri)?;
        for stored in &chunks {
            tx.delete(&collection, &stored.key)?;
            self.metrics.record_chunk_deleted();
        }
        Ok(chunks.len())
    }
}

/// Merge two row lists ordered by primary index. On equal keys the incoming
/// row's non-null values overwrite the stored ones.
fn merge_sorted(stored: Vec<ChannelRow>, incoming: impl Iterator<Item = ChannelRow>) -> Vec<ChannelRow> {
    let mut merged = Vec::with_capacity(stored.len());
    let mut stored = stored.into_iter().peekable();

    for row in incoming {
        while let Some(next) = stored.next_if(|s| s.key() < row.key()) {
            merged.push(next);
        }
        match stored.next_if(|s| s.key() == row.key()) {
            Some(mut existing) => {
                existing.merge_from(row);
                merged.push(existing);
            }
            None => merged.push(row),
        }
    }
    merged.extend(stored);
    merged
}

/// Unit per mnemonic, taking the first non-empty unit any source declares
fn merged_units<'a>(mnemonics: &[String], sources: impl Iterator<Item = (&'a [String], &'a [String])> + Clone) -> Vec<String> {
    mnemonics
        .iter()
        .map(|m| {
            sources
                .clone()
                .find_map(|(names, units)| {
                    names
                        .iter()
                        .position(|n| n == m)
                        .and_then(|i| units.get(i))
                        .filter(|u| !u.is_empty())
                        .cloned()
                })
                .unwrap_or_default()
        })
        .collect()
}

/// Trim a chunk to the filter's range and channels; `None` if nothing is left
fn project(chunk: ChannelDataChunk, filter: &DataFilter) -> Result<Option<ChannelDataChunk>> {
    let projection = filter.projection(&chunk.mnemonics);
    let whole_range = filter.include_all || filter.range.covers(chunk.start_index, chunk.end_index);
    if projection.is_none() && whole_range {
        return Ok(Some(chunk));
    }

    let mut rows = chunk.rows()?;
    rows.retain(|r| filter.keeps_row(r.key()));

    let (mnemonics, units) = match projection {
        Some(order) => {
            let units = merged_units(&order, std::iter::once((&chunk.mnemonics[..], &chunk.units[..])));
            rows = rows
                .into_iter()
                .map(|r| r.remap(&chunk.mnemonics, &order))
                .filter(|r| !r.is_empty())
                .collect();
            (order, units)
        }
        None => (chunk.mnemonics.clone(), chunk.units.clone()),
    };

    if rows.is_empty() {
        return Ok(None);
    }
    ChannelDataChunk::from_rows(
        chunk.id,
        &chunk.uri,
        chunk.index_kind,
        &chunk.index_mnemonics,
        &mnemonics,
        &units,
        &rows,
    )
    .map(Some)
}

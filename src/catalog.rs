//! Block filter catalog and checkpoint document.
//!
//! The catalog maps block ids to their rough filters. The query executor asks
//! it which blocks of a scan may match a predicate; the checkpoint writer asks
//! it for a JSON document holding one entry per block:
//!
//! ```text
//! {
//!   "version": 1,
//!   "blocks": [
//!     { "block_id": 7, "build_time": 42, "membership_summary": {..}, "range_summary": {..} },
//!     { "block_id": 8 }                       // never built: no filter fields
//!   ]
//! }
//! ```

use crate::codec::JsonLoadOutcome;
use crate::error::{Error, Result};
use crate::predicate::Predicate;
use crate::rough_filter::FastRoughFilter;
use crate::segment::SegmentRecovery;
use parking_lot::RwLock;
use serde_json::{json, Map, Value as JsonValue};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

/// Identifier of a storage block.
pub type BlockId = u64;

/// Version of the checkpoint document layout.
pub const CHECKPOINT_VERSION: u64 = 1;

const JSON_TAG_BLOCK_ID: &str = "block_id";

/// What happened to each block while loading a checkpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Blocks whose filter was restored.
    pub loaded: Vec<BlockId>,
    /// Blocks without persisted filter data.
    pub absent: Vec<BlockId>,
    /// Blocks whose filter data was damaged. They are registered unbuilt.
    pub partially_loaded: Vec<BlockId>,
}

impl RecoveryReport {
    /// Returns true if any block lost its filter to damaged data.
    pub fn has_degraded_blocks(&self) -> bool {
        !self.partially_loaded.is_empty()
    }
}

/// Registry of rough filters keyed by block id.
#[derive(Debug, Default)]
pub struct FilterCatalog {
    filters: RwLock<BTreeMap<BlockId, Arc<FastRoughFilter>>>,
}

impl FilterCatalog {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter of `block`, registering an unbuilt one if needed.
    pub fn get_or_create(&self, block: BlockId) -> Arc<FastRoughFilter> {
        if let Some(filter) = self.filters.read().get(&block) {
            return Arc::clone(filter);
        }
        let mut filters = self.filters.write();
        Arc::clone(filters.entry(block).or_insert_with(|| Arc::new(FastRoughFilter::new())))
    }

    /// Filter of `block`, if registered.
    pub fn get(&self, block: BlockId) -> Option<Arc<FastRoughFilter>> {
        self.filters.read().get(&block).cloned()
    }

    /// Register `filter` for `block`, returning the filter it supersedes.
    pub fn insert(
        &self,
        block: BlockId,
        filter: Arc<FastRoughFilter>,
    ) -> Option<Arc<FastRoughFilter>> {
        self.filters.write().insert(block, filter)
    }

    /// Drop the filter of a compacted or deleted block.
    pub fn remove(&self, block: BlockId) -> Option<Arc<FastRoughFilter>> {
        self.filters.write().remove(&block)
    }

    /// Number of registered blocks.
    pub fn len(&self) -> usize {
        self.filters.read().len()
    }

    /// Returns true if no block is registered.
    pub fn is_empty(&self) -> bool {
        self.filters.read().is_empty()
    }

    /// Registered block ids in ascending order.
    pub fn block_ids(&self) -> Vec<BlockId> {
        self.filters.read().keys().copied().collect()
    }

    /// Register filters recovered from a filter segment.
    ///
    /// Later records supersede earlier ones for the same block. Returns the
    /// number of filters registered.
    pub fn install_recovered(&self, recovery: SegmentRecovery) -> usize {
        let count = recovery.filters.len();
        let mut filters = self.filters.write();
        for (block, filter) in recovery.filters {
            filters.insert(block, Arc::new(filter));
        }
        count
    }

    /// Blocks that may hold rows matching `predicate`, in ascending order.
    ///
    /// Blocks without a built filter are always included.
    pub fn prune(&self, predicate: &Predicate) -> Vec<BlockId> {
        let snapshot: Vec<(BlockId, Arc<FastRoughFilter>)> = self
            .filters
            .read()
            .iter()
            .map(|(block, filter)| (*block, Arc::clone(filter)))
            .collect();

        let total = snapshot.len();
        let candidates: Vec<BlockId> = snapshot
            .into_iter()
            .filter(|(_, filter)| !filter.evaluate(predicate).can_skip())
            .map(|(block, _)| block)
            .collect();

        log::debug!("Rough filters pruned {} of {} blocks", total - candidates.len(), total);
        candidates
    }

    /// Build the checkpoint document.
    pub fn checkpoint(&self) -> Result<JsonValue> {
        let filters = self.filters.read();
        let mut blocks = Vec::with_capacity(filters.len());
        for (block, filter) in filters.iter() {
            let mut entry = Map::new();
            entry.insert(JSON_TAG_BLOCK_ID.to_string(), JsonValue::from(*block));
            if filter.has_filter() {
                filter.save_to_json(&mut entry)?;
            }
            blocks.push(JsonValue::Object(entry));
        }
        Ok(json!({ "version": CHECKPOINT_VERSION, "blocks": blocks }))
    }

    /// Write the checkpoint document to `path`, replacing it atomically.
    pub fn save_checkpoint<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let document = self.checkpoint()?;
        let tmp_path = path.with_extension("tmp");

        {
            let mut writer = BufWriter::new(File::create(&tmp_path)?);
            serde_json::to_writer(&mut writer, &document)?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&tmp_path, path)?;

        log::info!("Saved rough filter checkpoint with {} blocks to {:?}", self.len(), path);
        Ok(())
    }

    /// Rebuild a catalog from a checkpoint document.
    ///
    /// A malformed document fails with [`Error::Corruption`]. Damaged filter
    /// data of individual blocks does not fail the load; those blocks are
    /// registered unbuilt and listed in the report.
    pub fn from_checkpoint(document: &JsonValue) -> Result<(Self, RecoveryReport)> {
        let version = document.get("version").and_then(JsonValue::as_u64);
        if version != Some(CHECKPOINT_VERSION) {
            return Err(Error::corruption(format!(
                "Unsupported rough filter checkpoint version: {:?}",
                document.get("version")
            )));
        }
        let entries = document
            .get("blocks")
            .and_then(JsonValue::as_array)
            .ok_or_else(|| Error::corruption("Rough filter checkpoint has no block list"))?;

        let catalog = FilterCatalog::new();
        let mut report = RecoveryReport::default();

        for entry in entries {
            let entry = entry
                .as_object()
                .ok_or_else(|| Error::corruption("Checkpoint block entry is not an object"))?;
            let block = entry
                .get(JSON_TAG_BLOCK_ID)
                .and_then(JsonValue::as_u64)
                .ok_or_else(|| Error::corruption("Checkpoint block entry has no block id"))?;

            let filter = Arc::new(FastRoughFilter::new());
            match filter.load_from_json(entry)? {
                JsonLoadOutcome::Loaded => report.loaded.push(block),
                JsonLoadOutcome::Absent => report.absent.push(block),
                JsonLoadOutcome::PartiallyLoaded => {
                    log::error!("Block {} lost its rough filter during recovery", block);
                    report.partially_loaded.push(block);
                }
            }

            if catalog.insert(block, filter).is_some() {
                return Err(Error::corruption(format!(
                    "Duplicate block {} in rough filter checkpoint",
                    block
                )));
            }
        }

        log::info!(
            "Recovered rough filters: {} loaded, {} absent, {} degraded",
            report.loaded.len(),
            report.absent.len(),
            report.partially_loaded.len()
        );
        Ok((catalog, report))
    }

    /// Read a checkpoint document from `path`.
    pub fn load_checkpoint<P: AsRef<Path>>(path: P) -> Result<(Self, RecoveryReport)> {
        let path = path.as_ref();
        log::info!("Recovering rough filters from {:?}", path);

        let reader = BufReader::new(File::open(path)?);
        let document: JsonValue = serde_json::from_reader(reader).map_err(|e| {
            Error::corruption(format!("Failed to parse rough filter checkpoint: {}", e))
        })?;
        Self::from_checkpoint(&document)
    }
}

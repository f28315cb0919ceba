//! Data repository collaborator: typed datasets addressed by
//! `(dataset type, data id)`.

use std::fmt;

use hashbrown::HashMap;
use parking_lot::RwLock;

use crate::error::Error;
use crate::exposure::Exposure;
use crate::psf::Psf;
use crate::source::SourceCatalog;

/// Opaque dataset identifier. Never interpreted, only compared and displayed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DataId(String);

impl DataId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Identifier combining `self` with a tile identifier, for per-tile products
    /// of an input exposure.
    pub fn joined(&self, other: &DataId) -> DataId {
        DataId(format!("{} {}", self.0, other.0))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DataId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DataId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

#[derive(Debug, Clone)]
pub enum Dataset {
    Exposure(Exposure),
    Psf(Psf),
    Sources(SourceCatalog),
}

/// Synchronous get/put store. Shared by the parallel preprocessing stage,
/// so implementations must tolerate concurrent calls.
pub trait Repository: Send + Sync {
    fn get(&self, dataset_type: &str, id: &DataId) -> Option<Dataset>;

    fn put(&self, dataset_type: &str, id: &DataId, dataset: Dataset) -> Result<(), Error>;

    /// `None` when absent or not an exposure.
    fn get_exposure(&self, dataset_type: &str, id: &DataId) -> Option<Exposure> {
        match self.get(dataset_type, id)? {
            Dataset::Exposure(exposure) => Some(exposure),
            _ => None,
        }
    }

    fn get_psf(&self, dataset_type: &str, id: &DataId) -> Option<Psf> {
        match self.get(dataset_type, id)? {
            Dataset::Psf(psf) => Some(psf),
            _ => None,
        }
    }

    fn get_sources(&self, dataset_type: &str, id: &DataId) -> Option<SourceCatalog> {
        match self.get(dataset_type, id)? {
            Dataset::Sources(catalog) => Some(catalog),
            _ => None,
        }
    }
}

/// Process-local repository.
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    datasets: RwLock<HashMap<(String, DataId), Dataset>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, dataset_type: &str, id: &DataId) -> bool {
        self.datasets
            .read()
            .contains_key(&(dataset_type.to_string(), id.clone()))
    }

    /// Ids stored under `dataset_type`, sorted.
    pub fn ids(&self, dataset_type: &str) -> Vec<DataId> {
        let mut ids: Vec<DataId> = self
            .datasets
            .read()
            .keys()
            .filter(|(t, _)| t == dataset_type)
            .map(|(_, id)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.datasets.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Repository for InMemoryRepository {
    fn get(&self, dataset_type: &str, id: &DataId) -> Option<Dataset> {
        self.datasets
            .read()
            .get(&(dataset_type.to_string(), id.clone()))
            .cloned()
    }

    fn put(&self, dataset_type: &str, id: &DataId, dataset: Dataset) -> Result<(), Error> {
        tracing::debug!(dataset_type, id = %id, "Put dataset");
        self.datasets
            .write()
            .insert((dataset_type.to_string(), id.clone()), dataset);
        Ok(())
    }
}

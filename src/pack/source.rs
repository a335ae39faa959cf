use std::{collections::BTreeMap, path::PathBuf, sync::Arc};

use anyhow::{anyhow, Context, Result};

use crate::common::write_atomic;

/// Read-only access to package files by package-relative path,
/// e.g. "units.geojson" or "manifest.json".
pub trait PackSource: Send + Sync {
    fn get(&self, rel: &str) -> Result<Arc<[u8]>>;
    fn has(&self, rel: &str) -> bool;
}

/// Write access to package files by package-relative path.
pub trait PackSink: Send + Sync {
    fn put(&mut self, rel: &str, bytes: &[u8]) -> Result<()>;
}

/// Package stored as a directory; every file is replaced atomically.
pub struct DiskPack {
    root: PathBuf,
}

impl DiskPack {
    pub fn new(root: impl Into<PathBuf>) -> Self { Self { root: root.into() } }

    #[inline] pub fn root(&self) -> &std::path::Path { &self.root }

    fn full(&self, rel: &str) -> PathBuf { self.root.join(rel) }
}

impl PackSource for DiskPack {
    fn get(&self, rel: &str) -> Result<Arc<[u8]>> {
        let path = self.full(rel);
        let bytes = std::fs::read(&path)
            .with_context(|| format!("Failed to read package file {}", path.display()))?;
        Ok(Arc::from(bytes))
    }

    fn has(&self, rel: &str) -> bool { self.full(rel).is_file() }
}

impl PackSink for DiskPack {
    fn put(&mut self, rel: &str, bytes: &[u8]) -> Result<()> {
        write_atomic(&self.full(rel), bytes)
    }
}

/// In-memory package, keyed by package-relative path.
#[derive(Default, Clone)]
pub struct MemPack {
    pub(crate) files: BTreeMap<String, Arc<[u8]>>,
}

impl MemPack {
    pub fn new() -> Self { Self::default() }
}

impl PackSource for MemPack {
    fn get(&self, rel: &str) -> Result<Arc<[u8]>> {
        self.files.get(rel).cloned()
            .ok_or_else(|| anyhow!("missing package file: {rel}"))
    }

    fn has(&self, rel: &str) -> bool { self.files.contains_key(rel) }
}

impl PackSink for MemPack {
    fn put(&mut self, rel: &str, bytes: &[u8]) -> Result<()> {
        self.files.insert(rel.to_string(), Arc::from(bytes));
        Ok(())
    }
}

use std::collections::BTreeMap;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{geom::Crs, pack::{PackSink, PackSource}};

pub(crate) const MANIFEST: &str = "manifest.json";

/// Lowercase hex SHA-256 of `bytes`.
pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct FileHash {
    pub sha256: String,
}

/// Index of an AOI package; written after every layer file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Manifest {
    pub package_id: String,
    pub version: String,
    pub crs: String,
    /// Source column the unit ids were taken from.
    pub key_column: String,
    pub counts: BTreeMap<String, usize>,
    pub files: BTreeMap<String, FileHash>,
}

impl Manifest {
    pub(crate) fn new(crs: Crs, key_column: &str) -> Self {
        Self {
            package_id: "aoi".into(),
            version: "1".into(),
            crs: crs.to_string(),
            key_column: key_column.into(),
            counts: BTreeMap::new(),
            files: BTreeMap::new(),
        }
    }

    /// Write one layer file and record its hash and feature count.
    pub(crate) fn put_layer(&mut self, sink: &mut dyn PackSink, rel: &str, bytes: &[u8], count: usize) -> Result<()> {
        sink.put(rel, bytes)?;
        let layer = rel.split('.').next().unwrap_or(rel);
        self.counts.insert(layer.to_string(), count);
        self.files.insert(rel.to_string(), FileHash { sha256: sha256_hex(bytes) });
        Ok(())
    }

    pub(crate) fn write(&self, sink: &mut dyn PackSink) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(self).context("Failed to serialize manifest.json")?;
        sink.put(MANIFEST, &bytes)
    }

    pub(crate) fn from_pack_source(src: &dyn PackSource) -> Result<Self> {
        let bytes = src.get(MANIFEST).context("Failed to read manifest.json")?;
        serde_json::from_slice(&bytes).context("Failed to parse manifest.json")
    }

    pub(crate) fn crs(&self) -> Result<Crs> {
        Ok(self.crs.parse::<Crs>()?)
    }

    /// Read a listed file, checking it against its recorded hash.
    pub(crate) fn read_verified(&self, src: &dyn PackSource, rel: &str) -> Result<std::sync::Arc<[u8]>> {
        let Some(expected) = self.files.get(rel) else {
            bail!("manifest.json does not list {rel}");
        };
        let bytes = src.get(rel)?;
        let actual = sha256_hex(&bytes);
        if actual != expected.sha256 {
            bail!("{rel} does not match manifest.json (sha256 {actual}, expected {})", expected.sha256);
        }
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pack::MemPack;

    #[test]
    fn known_digest() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn tampered_layer_is_rejected() {
        let mut pack = MemPack::new();
        let mut manifest = Manifest::new(Crs::from_epsg(3347).unwrap(), "DGUID");
        manifest.put_layer(&mut pack, "units.geojson", b"{}", 0).unwrap();
        manifest.write(&mut pack).unwrap();

        let back = Manifest::from_pack_source(&pack).unwrap();
        assert_eq!(back.counts["units"], 0);
        assert!(back.read_verified(&pack, "units.geojson").is_ok());

        pack.put("units.geojson", b"{ }").unwrap();
        assert!(back.read_verified(&pack, "units.geojson").is_err());
    }
}

use std::{fs::File, io::Write, path::{Path, PathBuf}};

use anyhow::{Context, Result};
use tempfile::NamedTempFile;

use super::ensure_dir_exists;

/// Write-then-rename wrapper for final artifacts.
pub struct PendingWrite {
    target: PathBuf,
    tmp: NamedTempFile,
}

/// Open a temporary file beside `target`; nothing is visible at `target`
/// until [`PendingWrite::finalize`] succeeds.
pub fn open_for_write(target: &Path) -> Result<PendingWrite> {
    let parent = target.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
    ensure_dir_exists(parent)?;
    let tmp = NamedTempFile::new_in(parent).context("create temp file")?;
    Ok(PendingWrite { target: target.to_path_buf(), tmp })
}

impl Write for PendingWrite {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> { self.tmp.write(buf) }
    fn flush(&mut self) -> std::io::Result<()> { self.tmp.flush() }
}

impl PendingWrite {
    pub fn finalize(mut self) -> Result<()> {
        self.tmp.flush().context("flush temp file")?;
        self.tmp.as_file().sync_all().ok(); // best-effort fsync file
        self.tmp.persist(&self.target)
            .with_context(|| format!("rename to {}", self.target.display()))?;
        if let Some(dir) = self.target.parent() {
            let _ = File::open(dir).and_then(|f| f.sync_all());
        }
        Ok(())
    }
}

/// Atomically replace `target` with `bytes`.
pub fn write_atomic(target: &Path, bytes: &[u8]) -> Result<()> {
    let mut pending = open_for_write(target)?;
    pending.write_all(bytes)
        .with_context(|| format!("write {}", target.display()))?;
    pending.finalize()
}

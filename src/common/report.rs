use std::{fmt::Write as _, path::Path};

use anyhow::{Context, Result};

use crate::common::{ensure_dir_exists, mean, median};

/// Plain-text debug report written next to each stage's artifacts.
///
/// Reports are diagnostics, so they are written directly rather than through
/// [`crate::common::PendingWrite`].
#[derive(Debug, Default)]
pub struct DebugReport {
    text: String,
}

impl DebugReport {
    pub fn new(title: &str) -> Self {
        let mut report = Self::default();
        let _ = writeln!(report.text, "=== {title} ===");
        report
    }

    pub fn section(&mut self, name: &str) -> &mut Self {
        let _ = writeln!(self.text, "\n--- {name} ---");
        self
    }

    pub fn line(&mut self, key: &str, value: impl std::fmt::Display) -> &mut Self {
        let _ = writeln!(self.text, "{key}: {value}");
        self
    }

    /// Null count and share for one output column.
    pub fn missingness(&mut self, column: &str, values: &[Option<f64>]) -> &mut Self {
        let missing = values.iter().filter(|v| v.is_none_or(|v| !v.is_finite())).count();
        let share = if values.is_empty() { 0.0 } else { missing as f64 / values.len() as f64 * 100.0 };
        let _ = writeln!(self.text, "{column}: {missing} / {} missing ({share:.1}%)", values.len());
        self
    }

    /// count/min/median/mean/max of the non-null values of a column.
    pub fn describe(&mut self, column: &str, values: &[Option<f64>]) -> &mut Self {
        let valid: Vec<f64> = values.iter().flatten().copied().filter(|v| v.is_finite()).collect();
        if valid.is_empty() {
            let _ = writeln!(self.text, "{column}: count=0");
            return self;
        }
        let min = valid.iter().copied().fold(f64::INFINITY, f64::min);
        let max = valid.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let _ = writeln!(
            self.text,
            "{column}: count={} min={min:.6} median={:.6} mean={:.6} max={max:.6}",
            valid.len(),
            median(&valid).unwrap_or(f64::NAN),
            mean(&valid).unwrap_or(f64::NAN),
        );
        self
    }

    #[cfg(test)]
    #[inline] pub fn as_str(&self) -> &str { &self.text }

    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            ensure_dir_exists(parent)?;
        }
        std::fs::write(path, &self.text)
            .with_context(|| format!("Failed to write report {}", path.display()))?;
        tracing::debug!(path = %path.display(), "wrote debug report");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_sections_and_stats() {
        let mut report = DebugReport::new("Stage");
        report.line("units", 3)
            .section("missingness")
            .missingness("green_frac", &[Some(0.1), None, Some(0.3), None])
            .describe("green_frac", &[Some(0.1), None, Some(0.3)]);

        let text = report.as_str();
        assert!(text.starts_with("=== Stage ===\n"));
        assert!(text.contains("units: 3\n"));
        assert!(text.contains("green_frac: 2 / 4 missing (50.0%)"));
        assert!(text.contains("count=2 min=0.100000 median=0.200000"));
    }
}

use std::{fmt, sync::Arc};

/// Stable key for a dissemination area across every stage.
/// Keeps the original DGUID text (leading zeros included) and never goes through a number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Dguid(Arc<str>); // e.g., "2021S051259150001"

impl Dguid {
    /// Build from raw field text, trimming surrounding whitespace.
    /// Returns None for blank values, which count as null keys.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        (!trimmed.is_empty()).then(|| Self(Arc::from(trimmed)))
    }

    #[inline] pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for Dguid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

impl From<&str> for Dguid {
    fn from(value: &str) -> Self { Self(Arc::from(value)) }
}

impl std::borrow::Borrow<str> for Dguid {
    fn borrow(&self) -> &str { &self.0 }
}

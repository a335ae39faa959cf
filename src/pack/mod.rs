mod manifest;
mod package;
mod source;

pub(crate) use manifest::{Manifest, MANIFEST};
pub use package::AoiPackage;
pub use source::{DiskPack, MemPack, PackSink, PackSource};
#[cfg(test)]
pub(crate) use package::fixtures;

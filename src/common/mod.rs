mod fs;
mod keys;
mod normalize;
mod report;
mod write;

pub(crate) use fs::*;
pub(crate) use keys::*;
pub(crate) use normalize::*;
pub(crate) use report::*;
pub(crate) use write::*;

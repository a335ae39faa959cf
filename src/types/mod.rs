mod dguid;

pub use dguid::Dguid;

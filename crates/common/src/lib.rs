//! Materialstore Common Library
//!
//! Job names, timestamps, metadata, materials and the content-addressed
//! store that persists them.

pub mod config;
pub mod error;
pub mod material;
pub mod metadata;
pub mod query;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use config::{
    validate_threshold, InspectorConfig, MaterialstoreConfig, ReportConfig, StoreConfig,
    UnsupportedPolicy,
};
pub use error::{Error, Result, Side};
pub use material::{Material, MaterialId, MaterialList};
pub use metadata::{IgnoreMetadataKeys, Metadata, MetadataBuilder};
pub use query::{Constraint, QueryOnMetadata};
pub use store::{PruneStats, Store};
pub use types::*;

/// Materialstore version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default store root: `$MATERIALSTORE_ROOT`, else `./store`
pub fn default_store_path() -> std::path::PathBuf {
    std::env::var_os("MATERIALSTORE_ROOT")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|| std::path::PathBuf::from("store"))
}

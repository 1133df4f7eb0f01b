#[cfg(feature = "capstone-engine")]
pub mod capstone;
pub mod manifest;

#[cfg(feature = "capstone-engine")]
pub use self::capstone::CapstoneEngine;
pub use manifest::ManifestEngine;

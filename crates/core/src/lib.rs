//! tratsch-core – Gemeinsame Typen
//!
//! Dieses Crate stellt die fundamentalen Bausteine bereit, die von allen
//! anderen Tratsch-Crates gemeinsam genutzt werden. Fehlertypen definiert
//! jedes Crate selbst (thiserror-Enums nahe am jeweiligen Code).

pub mod types;

// Re-Exporte fuer bequemen Zugriff
pub use types::{name_schluessel, SessionId};

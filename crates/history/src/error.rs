//! Fehlertypen fuer das History-Crate

use thiserror::Error;

/// Verlaufs-Fehlertypen
#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("Ungueltiger Gespraechs-Schluessel: {0}")]
    UngueltigerSchluessel(String),

    #[error("IO-Fehler: {0}")]
    Io(#[from] std::io::Error),
}

pub type HistoryResult<T> = Result<T, HistoryError>;

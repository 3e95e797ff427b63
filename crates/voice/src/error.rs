//! Fehlertypen fuer das Voice-Crate

use thiserror::Error;

/// Fehlertyp fuer Voice-Raeume
#[derive(Debug, Error)]
pub enum VoiceError {
    /// Socket konnte nicht gebunden werden oder ist unbrauchbar
    #[error("IO-Fehler: {0}")]
    Io(#[from] std::io::Error),

    /// Kein aktiver Voice-Raum unter diesem Schluessel
    #[error("Kein Voice-Raum: {0}")]
    KeinRaum(String),
}

pub type VoiceResult<T> = Result<T, VoiceError>;

//! Fehlertypen fuer den Relay-Service

use thiserror::Error;
use tratsch_protocol::BefehlsFehler;

/// Fehlertyp fuer den Relay-Service
#[derive(Debug, Error)]
pub enum RelayError {
    /// IO-Fehler (TCP, Socket)
    #[error("IO-Fehler: {0}")]
    Io(#[from] std::io::Error),

    /// Anmeldename wird bereits von einer verbundenen Session gehalten
    #[error("Name bereits vergeben: {0}")]
    NameVergeben(String),

    /// Raum existiert bereits
    #[error("Raum existiert bereits: {0}")]
    RaumExistiert(String),

    /// Raum nicht gefunden
    #[error("Raum nicht gefunden: {0}")]
    RaumNichtGefunden(String),

    /// Benutzer nicht verbunden
    #[error("Benutzer nicht verbunden: {0}")]
    BenutzerNichtGefunden(String),

    /// Protokollfehler in einer Befehlszeile
    #[error("Protokollfehler: {0}")]
    Befehl(#[from] BefehlsFehler),

    /// Verlaufs-Fehler
    #[error("Verlaufs-Fehler: {0}")]
    Verlauf(#[from] tratsch_history::HistoryError),

    /// Voice-Fehler
    #[error("Voice-Fehler: {0}")]
    Voice(#[from] tratsch_voice::VoiceError),
}

/// Result-Typ fuer den Relay-Service
pub type RelayResult<T> = Result<T, RelayError>;

//! Gemeinsame Identifikationstypen fuer Tratsch
//!
//! Benutzer werden protokollweit ueber ihren Anzeigenamen identifiziert
//! (case-insensitiv eindeutig, siehe tratsch-relay). Die `SessionId` dient
//! ausschliesslich der Nachverfolgung einzelner Verbindungen im Log – sie
//! wird pro TCP-Verbindung neu vergeben und nie ueber das Netz gesendet.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Eindeutige Verbindungs-ID (pro TCP-Verbindung, nur fuer Logging)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Erstellt eine neue zufaellige SessionId
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Gibt die innere UUID zurueck
    pub fn inner(&self) -> Uuid {
        self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "session:{}", self.0)
    }
}

/// Normalisiert einen Benutzernamen fuer case-insensitive Vergleiche
///
/// Alle Verzeichnis- und Raum-Schluessel verwenden diese Form; die
/// Original-Schreibweise bleibt als Anzeigename erhalten.
pub fn name_schluessel(name: &str) -> String {
    name.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_eindeutig() {
        let a = SessionId::new();
        let b = SessionId::new();
        assert_ne!(a, b, "Zwei neue SessionIds muessen verschieden sein");
    }

    #[test]
    fn session_id_display() {
        let id = SessionId(Uuid::nil());
        assert!(id.to_string().starts_with("session:"));
    }

    #[test]
    fn name_schluessel_normalisiert() {
        assert_eq!(name_schluessel("Anna"), "anna");
        assert_eq!(name_schluessel("  BEN  "), "ben");
        assert_eq!(name_schluessel("anna"), name_schluessel("ANNA"));
    }
}

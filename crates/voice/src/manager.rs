//! VoiceRoomManager – Verzeichnis aller aktiven Voice-Raeume
//!
//! Raeume werden lazy unter einem logischen Schluessel erstellt (Raumname
//! oder kanonischer Paar-Schluessel fuer 1:1-Gespraeche). Ein erneutes
//! `raum_starten` fuer denselben Schluessel ist idempotent und liefert den
//! bestehenden Port. Verlaesst der letzte Teilnehmer einen Raum, wird er
//! gestoppt und sein Port freigegeben.

use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::error::{VoiceError, VoiceResult};
use crate::room::VoiceRoom;

/// Kanonischer Voice-Schluessel fuer ein 1:1-Gespraech
///
/// Beide Namen kleingeschrieben und sortiert, damit beide Seiten denselben
/// Raum ansprechen: `anna`+`Ben` -> `anna_ben`.
pub fn paar_schluessel(a: &str, b: &str) -> String {
    let a = a.trim().to_lowercase();
    let b = b.trim().to_lowercase();
    if a <= b {
        format!("{}_{}", a, b)
    } else {
        format!("{}_{}", b, a)
    }
}

// ---------------------------------------------------------------------------
// VoiceRoomManager
// ---------------------------------------------------------------------------

/// Verwaltet alle aktiven Voice-Raeume des Prozesses
///
/// Thread-safe via Arc + DashMap. Clone teilt den inneren Zustand.
#[derive(Clone)]
pub struct VoiceRoomManager {
    inner: Arc<VoiceRoomManagerInner>,
}

struct VoiceRoomManagerInner {
    /// Aktive Raeume, indiziert nach logischem Schluessel
    raeume: DashMap<String, VoiceRoom>,
}

impl VoiceRoomManager {
    /// Erstellt einen neuen leeren Manager
    pub fn neu() -> Self {
        Self {
            inner: Arc::new(VoiceRoomManagerInner {
                raeume: DashMap::new(),
            }),
        }
    }

    /// Startet den Raum zum Schluessel oder liefert den bestehenden Port
    ///
    /// Idempotent: wiederholte Aufrufe fuer denselben Schluessel geben
    /// denselben Port zurueck.
    pub async fn raum_starten(&self, schluessel: &str) -> VoiceResult<u16> {
        if let Some(raum) = self.inner.raeume.get(schluessel) {
            return Ok(raum.port());
        }

        let raum = VoiceRoom::starten(schluessel).await?;

        // Zwei Sessions koennen gleichzeitig hier ankommen; der Verlierer
        // stoppt seinen frisch gebundenen Raum wieder.
        match self.inner.raeume.entry(schluessel.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(bestehend) => {
                raum.stoppen();
                Ok(bestehend.get().port())
            }
            dashmap::mapref::entry::Entry::Vacant(eintrag) => {
                let port = raum.port();
                eintrag.insert(raum);
                Ok(port)
            }
        }
    }

    /// Gibt den Port eines aktiven Raums zurueck
    pub fn raum_port(&self, schluessel: &str) -> Option<u16> {
        self.inner.raeume.get(schluessel).map(|r| r.port())
    }

    /// Registriert einen Teilnehmer-Endpunkt im Raum
    pub fn beitreten(
        &self,
        schluessel: &str,
        name: &str,
        endpunkt: SocketAddr,
    ) -> VoiceResult<u16> {
        match self.inner.raeume.get(schluessel) {
            Some(raum) => {
                raum.teilnehmer_hinzufuegen(name, endpunkt);
                Ok(raum.port())
            }
            None => Err(VoiceError::KeinRaum(schluessel.to_string())),
        }
    }

    /// Entfernt einen Teilnehmer; ein leer gewordener Raum wird gestoppt
    pub fn verlassen(&self, schluessel: &str, name: &str) -> VoiceResult<()> {
        let verbleibend = match self.inner.raeume.get(schluessel) {
            Some(raum) => raum.teilnehmer_entfernen(name),
            None => return Err(VoiceError::KeinRaum(schluessel.to_string())),
        };

        if verbleibend == 0 {
            self.raum_stoppen(schluessel);
        }
        Ok(())
    }

    /// Stoppt einen Raum explizit und entfernt ihn aus dem Verzeichnis
    pub fn raum_stoppen(&self, schluessel: &str) -> bool {
        if let Some((_, raum)) = self.inner.raeume.remove(schluessel) {
            raum.stoppen();
            true
        } else {
            false
        }
    }

    /// Entfernt einen Benutzer aus allen Raeumen (Verbindungsabbau)
    ///
    /// Leer gewordene Raeume werden gestoppt.
    pub fn teilnehmer_ueberall_entfernen(&self, name: &str) {
        let schluessel: Vec<String> = self
            .inner
            .raeume
            .iter()
            .filter(|e| e.value().hat_teilnehmer(name))
            .map(|e| e.key().clone())
            .collect();

        for s in schluessel {
            let _ = self.verlassen(&s, name);
        }
    }

    /// Gibt die Anzahl der aktiven Raeume zurueck
    pub fn raum_anzahl(&self) -> usize {
        self.inner.raeume.len()
    }
}

impl Default for VoiceRoomManager {
    fn default() -> Self {
        Self::neu()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

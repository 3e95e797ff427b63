//! Directory – Verzeichnis verbundener Sessions und Raeume
//!
//! Haelt die beiden zentralen Abbildungen des Servers:
//! - Benutzername (normalisiert) -> SessionHandle, genau ein Eintrag pro
//!   angemeldetem Benutzer
//! - Raumname (normalisiert) -> Raum mit Mitglieder-Menge
//!
//! Das Directory besitzt kein I/O. Alle Operationen sind atomar gegenueber
//! gleichzeitiger Registrierung/Abmeldung; Mitglieder-Mengen werden als
//! Snapshot herausgegeben und nie live iteriert.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;

use tratsch_core::types::name_schluessel;
use tratsch_core::SessionId;

use crate::error::{RelayError, RelayResult};
use crate::outbox::SessionHandle;

// ---------------------------------------------------------------------------
// Raum
// ---------------------------------------------------------------------------

/// Ein benannter Raum mit seiner Mitglieder-Menge
///
/// Mitglieder sind normalisierte Benutzernamen; ein Mitglied muss nicht
/// verbunden sein. Raeume werden nur explizit erstellt und nie durch
/// schrumpfende Mitgliedschaft entfernt.
#[derive(Debug, Clone)]
pub struct Raum {
    /// Anzeigename in Original-Schreibweise
    pub name: String,
    /// Ersteller des Raums
    pub ersteller: String,
    /// Mitglieder (normalisierte Namen)
    mitglieder: HashSet<String>,
}

impl Raum {
    fn neu(name: impl Into<String>, ersteller: impl Into<String>) -> Self {
        let ersteller = ersteller.into();
        let mut mitglieder = HashSet::new();
        mitglieder.insert(name_schluessel(&ersteller));
        Self {
            name: name.into(),
            ersteller,
            mitglieder,
        }
    }

    /// Prueft ob ein Benutzer Mitglied ist
    pub fn ist_mitglied(&self, name: &str) -> bool {
        self.mitglieder.contains(&name_schluessel(name))
    }

    /// Gibt die Anzahl der Mitglieder zurueck
    pub fn mitglieder_anzahl(&self) -> usize {
        self.mitglieder.len()
    }
}

// ---------------------------------------------------------------------------
// Directory
// ---------------------------------------------------------------------------

/// Verzeichnis aller verbundenen Sessions und Raeume
///
/// Thread-safe via Arc + DashMap. Clone teilt den inneren Zustand.
#[derive(Clone)]
pub struct Directory {
    inner: Arc<DirectoryInner>,
}

struct DirectoryInner {
    /// Verbundene Benutzer: normalisierter Name -> SessionHandle
    benutzer: DashMap<String, SessionHandle>,
    /// Raeume: normalisierter Name -> Raum
    raeume: DashMap<String, Raum>,
}

impl Directory {
    /// Erstellt ein neues leeres Directory
    pub fn neu() -> Self {
        Self {
            inner: Arc::new(DirectoryInner {
                benutzer: DashMap::new(),
                raeume: DashMap::new(),
            }),
        }
    }

    // -----------------------------------------------------------------------
    // Benutzer
    // -----------------------------------------------------------------------

    /// Registriert eine Session unter ihrem Anzeigenamen
    ///
    /// Schlaegt fehl wenn der Name (case-insensitiv) bereits von einer
    /// verbundenen Session gehalten wird – es wird nie ueberschrieben.
    pub fn registrieren(&self, handle: SessionHandle) -> RelayResult<()> {
        let schluessel = name_schluessel(&handle.name);
        match self.inner.benutzer.entry(schluessel) {
            Entry::Occupied(_) => Err(RelayError::NameVergeben(handle.name.clone())),
            Entry::Vacant(eintrag) => {
                tracing::info!(name = %handle.name, session = %handle.session_id, "Benutzer angemeldet");
                eintrag.insert(handle);
                Ok(())
            }
        }
    }

    /// Entfernt eine Session aus dem Verzeichnis
    ///
    /// Der Abgleich ueber die SessionId verhindert, dass der Abbau einer
    /// alten Verbindung eine inzwischen neu angemeldete Session gleichen
    /// Namens entfernt.
    pub fn abmelden(&self, name: &str, session_id: &SessionId) {
        let entfernt = self
            .inner
            .benutzer
            .remove_if(&name_schluessel(name), |_, h| h.session_id == *session_id);
        if entfernt.is_some() {
            tracing::info!(name, session = %session_id, "Benutzer abgemeldet");
        }
    }

    /// Sucht das SessionHandle eines verbundenen Benutzers
    pub fn suchen(&self, name: &str) -> Option<SessionHandle> {
        self.inner
            .benutzer
            .get(&name_schluessel(name))
            .map(|e| e.value().clone())
    }

    /// Prueft ob ein Benutzer verbunden ist
    pub fn ist_verbunden(&self, name: &str) -> bool {
        self.inner.benutzer.contains_key(&name_schluessel(name))
    }

    /// Gibt alle verbundenen Sessions zurueck (Snapshot)
    pub fn alle_sessions(&self) -> Vec<SessionHandle> {
        self.inner
            .benutzer
            .iter()
            .map(|e| e.value().clone())
            .collect()
    }

    /// Gibt die Anzeigenamen aller verbundenen Benutzer zurueck
    pub fn benutzerliste(&self) -> Vec<String> {
        let mut namen: Vec<String> = self
            .inner
            .benutzer
            .iter()
            .map(|e| e.value().name.clone())
            .collect();
        namen.sort();
        namen
    }

    /// Gibt die Anzahl der verbundenen Benutzer zurueck
    pub fn benutzer_anzahl(&self) -> usize {
        self.inner.benutzer.len()
    }

    // -----------------------------------------------------------------------
    // Raeume
    // -----------------------------------------------------------------------

    /// Erstellt einen Raum; der Ersteller wird erstes Mitglied
    pub fn raum_erstellen(&self, raum: &str, ersteller: &str) -> RelayResult<()> {
        match self.inner.raeume.entry(name_schluessel(raum)) {
            Entry::Occupied(_) => Err(RelayError::RaumExistiert(raum.to_string())),
            Entry::Vacant(eintrag) => {
                eintrag.insert(Raum::neu(raum, ersteller));
                tracing::info!(raum, ersteller, "Raum erstellt");
                Ok(())
            }
        }
    }

    /// Fuegt einen Benutzer einem bestehenden Raum hinzu
    pub fn raum_beitreten(&self, raum: &str, name: &str) -> RelayResult<()> {
        match self.inner.raeume.get_mut(&name_schluessel(raum)) {
            Some(mut eintrag) => {
                eintrag.mitglieder.insert(name_schluessel(name));
                tracing::info!(raum, name, "Raum beigetreten");
                Ok(())
            }
            None => Err(RelayError::RaumNichtGefunden(raum.to_string())),
        }
    }

    /// Prueft ob ein Raum existiert
    pub fn raum_existiert(&self, raum: &str) -> bool {
        self.inner.raeume.contains_key(&name_schluessel(raum))
    }

    /// Gibt die Mitglieder eines Raums zurueck (Snapshot, normalisierte Namen)
    pub fn mitglieder(&self, raum: &str) -> RelayResult<Vec<String>> {
        match self.inner.raeume.get(&name_schluessel(raum)) {
            Some(eintrag) => Ok(eintrag.mitglieder.iter().cloned().collect()),
            None => Err(RelayError::RaumNichtGefunden(raum.to_string())),
        }
    }

    /// Gibt die Anzeigenamen aller Raeume zurueck
    pub fn raumliste(&self) -> Vec<String> {
        let mut namen: Vec<String> = self
            .inner
            .raeume
            .iter()
            .map(|e| e.value().name.clone())
            .collect();
        namen.sort();
        namen
    }
}

impl Default for Directory {
    fn default() -> Self {
        Self::neu()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

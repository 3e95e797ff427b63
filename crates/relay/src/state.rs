//! RelayState – gemeinsamer Dienste-Verbund des Servers
//!
//! Buendelt Directory, RelayEngine, Verlauf und Voice-Manager in einem
//! explizit konstruierten Objekt. Der Verbund wird beim Start einmal
//! erstellt und jeder Verbindung per Arc mitgegeben – es gibt keinen
//! ambienten globalen Zustand.

use tratsch_history::HistoryStore;
use tratsch_voice::VoiceRoomManager;

use crate::directory::Directory;
use crate::engine::RelayEngine;

/// Standard-Limit fuer gleichzeitig angemeldete Benutzer
pub const STANDARD_MAX_CLIENTS: u32 = 512;

/// Gemeinsamer Zustand aller Verbindungs-Tasks
pub struct RelayState {
    /// Verzeichnis verbundener Sessions und Raeume
    pub directory: Directory,
    /// Fan-out-Engine
    pub engine: RelayEngine,
    /// Gespraechsverlauf
    pub verlauf: HistoryStore,
    /// Voice-Raum-Verwaltung
    pub voice: VoiceRoomManager,
    /// Maximale Anzahl gleichzeitig angemeldeter Benutzer
    pub max_clients: u32,
}

impl RelayState {
    /// Erstellt den Dienste-Verbund mit frischem Directory und Engine
    pub fn neu(verlauf: HistoryStore, voice: VoiceRoomManager) -> Self {
        let directory = Directory::neu();
        let engine = RelayEngine::neu(directory.clone(), verlauf.clone());
        Self {
            directory,
            engine,
            verlauf,
            voice,
            max_clients: STANDARD_MAX_CLIENTS,
        }
    }

    /// Setzt das Client-Limit
    pub fn mit_max_clients(mut self, max_clients: u32) -> Self {
        self.max_clients = max_clients;
        self
    }
}

//! tratsch-relay – TCP Relay-Service
//!
//! Dieses Crate implementiert den Kern des Tratsch-Servers:
//! - Directory: Verzeichnis verbundener Sessions und Raeume (kein I/O)
//! - ClientConnection: Zustandsmaschine pro TCP-Verbindung
//! - RelayEngine: Fan-out von Text und Audio an eine/mehrere Sessions
//! - RelayServer: TCP-Listener, ein Task pro Verbindung
//!
//! Alle Dienste sind gewoehnliche, direkt aufrufbare Objekte – ein
//! alternatives Praesentationsprotokoll kann Directory, RelayEngine und
//! HistoryStore ohne das Zeilenprotokoll ansprechen.

pub mod directory;
pub mod engine;
pub mod error;
pub mod outbox;
pub mod session;
pub mod state;
pub mod tcp;

// Bequeme Re-Exporte
pub use directory::{Directory, Raum};
pub use engine::RelayEngine;
pub use error::{RelayError, RelayResult};
pub use outbox::{Ausgehend, SendeErgebnis, SessionHandle};
pub use session::{ClientConnection, VerbindungsZustand};
pub use state::RelayState;
pub use tcp::RelayServer;

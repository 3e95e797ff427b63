//! tratsch-voice – UDP Voice-Relay
//!
//! Pro aktivem Voice-Raum laeuft ein eigener UDP-Socket mit Empfangs-Loop.
//! Eingehende Datagramme werden unveraendert an alle registrierten
//! Teilnehmer-Endpunkte ausser dem Absender weitergereicht – kein Dekodieren,
//! kein Umordnen, keine Neuuebertragung (best effort).

pub mod error;
pub mod manager;
pub mod room;

// Bequeme Re-Exporte
pub use error::{VoiceError, VoiceResult};
pub use manager::{paar_schluessel, VoiceRoomManager};
pub use room::VoiceRoom;

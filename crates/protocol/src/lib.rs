//! tratsch-protocol – Leitungsprotokoll fuer Tratsch
//!
//! Ein Client spricht mit dem Server ueber einen einzigen geordneten
//! Bytestrom, auf dem sich zwei Frame-Arten abwechseln:
//!
//! - **Zeilen-Frames**: UTF-8-Text bis einschliesslich `\n` (Befehle,
//!   Chat-Text, Audio-Header)
//! - **Binaer-Frames**: exakt N rohe Bytes direkt nach einem gueltigen
//!   `AUDIO:`-Header, nie zeilengepuffert
//!
//! Der [`FrameCodec`] haelt beide Lesearten auf demselben Puffer zusammen;
//! [`Befehl`] ist der einmal pro Zeile dekodierte, getaggte Befehlstyp.

pub mod command;
pub mod frame;

// Bequeme Re-Exporte
pub use command::{AudioHeader, AudioZiel, Befehl, BefehlsFehler, END_OF_HISTORY};
pub use frame::{Frame, FrameCodec, MAX_BLOB_GROESSE, MAX_ZEILEN_LAENGE};

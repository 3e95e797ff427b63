//! tratsch-history – Append-only Gespraechsverlauf
//!
//! Jedes Gespraech (Raum, Privatchat, Rundruf) bekommt eine eigene
//! Textdatei `verlauf_<schluessel>.txt`. Eintraege werden ausschliesslich
//! angehaengt und nie veraendert oder geloescht.

pub mod error;
pub mod store;

// Bequeme Re-Exporte
pub use error::{HistoryError, HistoryResult};
pub use store::{
    gespraechs_schluessel, EintragsArt, HistoryStore, VerlaufsEintrag, RUNDRUF_SCHLUESSEL,
};

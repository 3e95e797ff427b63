//! Outbox – serialisierte Schreibzugriffe auf eine Session
//!
//! Pro Verbindung laeuft genau ein Schreib-Task, der alle ausgehenden
//! Frames nacheinander auf den Socket schreibt. Fan-out aus fremden
//! Sessions legt Nachrichten nur in die Queue – dadurch koennen sich
//! Zeilen und Binaersegmente verschiedener Absender nie auf Byte-Ebene
//! verschraenken. Ein Audio-Blob samt Header ist ein einzelnes
//! Queue-Element und wird damit atomar geschrieben.

use bytes::Bytes;
use futures_util::SinkExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::mpsc;
use tokio_util::codec::FramedWrite;

use tratsch_core::SessionId;
use tratsch_protocol::{Frame, FrameCodec};

/// Groesse der Send-Queue pro Session
pub const SEND_QUEUE_GROESSE: usize = 64;

// ---------------------------------------------------------------------------
// Ausgehende Nachrichten
// ---------------------------------------------------------------------------

/// Eine ausgehende Nachricht in der Send-Queue einer Session
#[derive(Debug, Clone)]
pub enum Ausgehend {
    /// Eine einzelne Textzeile
    Zeile(String),
    /// Audio-Header plus vollstaendig gepufferter Blob (atomar geschrieben)
    Audio { header: String, daten: Bytes },
}

/// Ergebnis eines nicht-blockierenden Sendeversuchs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendeErgebnis {
    /// Nachricht eingereiht
    Eingereiht,
    /// Queue voll – Nachricht verworfen, Session gilt weiter als verbunden
    Voll,
    /// Queue geschlossen – Session ist getrennt
    Geschlossen,
}

// ---------------------------------------------------------------------------
// SessionHandle
// ---------------------------------------------------------------------------

/// Handle auf die Send-Queue einer verbundenen Session
///
/// Wird im Directory gefuehrt; alle Fan-out-Schreibzugriffe laufen
/// ausschliesslich ueber dieses Handle.
#[derive(Clone, Debug)]
pub struct SessionHandle {
    /// Verbindungs-ID (nur fuer Logging und Abmelde-Abgleich)
    pub session_id: SessionId,
    /// Anzeigename in Original-Schreibweise
    pub name: String,
    tx: mpsc::Sender<Ausgehend>,
}

impl SessionHandle {
    /// Erstellt ein neues Handle
    pub fn neu(session_id: SessionId, name: impl Into<String>, tx: mpsc::Sender<Ausgehend>) -> Self {
        Self {
            session_id,
            name: name.into(),
            tx,
        }
    }

    /// Reiht eine Textzeile nicht-blockierend ein
    pub fn zeile_senden(&self, text: impl Into<String>) -> SendeErgebnis {
        self.senden(Ausgehend::Zeile(text.into()))
    }

    /// Reiht Header plus Blob als ein atomares Element ein
    pub fn audio_senden(&self, header: impl Into<String>, daten: Bytes) -> SendeErgebnis {
        self.senden(Ausgehend::Audio {
            header: header.into(),
            daten,
        })
    }

    fn senden(&self, nachricht: Ausgehend) -> SendeErgebnis {
        match self.tx.try_send(nachricht) {
            Ok(()) => SendeErgebnis::Eingereiht,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(
                    name = %self.name,
                    "Send-Queue voll – Nachricht verworfen"
                );
                SendeErgebnis::Voll
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!(
                    name = %self.name,
                    "Send-Queue geschlossen (Session getrennt)"
                );
                SendeErgebnis::Geschlossen
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Schreib-Task
// ---------------------------------------------------------------------------

/// Startet den Schreib-Task einer Verbindung
///
/// Liest aus der Queue und schreibt Frames auf die Schreibhaelfte des
/// Sockets. Endet wenn alle Sender gedroppt sind oder ein Schreibfehler
/// auftritt.
pub(crate) fn schreib_task_starten(
    session_id: SessionId,
    schreib_haelfte: OwnedWriteHalf,
    mut rx: mpsc::Receiver<Ausgehend>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut framed = FramedWrite::new(schreib_haelfte, FrameCodec::new());

        while let Some(nachricht) = rx.recv().await {
            let ergebnis = match nachricht {
                Ausgehend::Zeile(text) => framed.send(Frame::Zeile(text)).await,
                Ausgehend::Audio { header, daten } => {
                    // Header und Blob direkt hintereinander – kein anderer
                    // Absender kann dazwischenschreiben
                    match framed.feed(Frame::Zeile(header)).await {
                        Ok(()) => framed.send(Frame::Blob(daten)).await,
                        Err(e) => Err(e),
                    }
                }
            };

            if let Err(e) = ergebnis {
                tracing::debug!(
                    session = %session_id,
                    fehler = %e,
                    "Schreibfehler – Schreib-Task endet"
                );
                break;
            }
        }

        tracing::debug!(session = %session_id, "Schreib-Task beendet");
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn test_handle(kapazitaet: usize) -> (SessionHandle, mpsc::Receiver<Ausgehend>) {
        let (tx, rx) = mpsc::channel(kapazitaet);
        (SessionHandle::neu(SessionId::new(), "anna", tx), rx)
    }

    #[tokio::test]
    async fn zeile_einreihen() {
        let (handle, mut rx) = test_handle(4);

        assert_eq!(handle.zeile_senden("hallo"), SendeErgebnis::Eingereiht);
        match rx.try_recv().unwrap() {
            Ausgehend::Zeile(text) => assert_eq!(text, "hallo"),
            anderes => panic!("Zeile erwartet, war {:?}", anderes),
        }
    }

    #[tokio::test]
    async fn audio_ist_ein_element() {
        let (handle, mut rx) = test_handle(4);

        let ergebnis = handle.audio_senden("AUDIO:a.wav:3", Bytes::from_static(&[1, 2, 3]));
        assert_eq!(ergebnis, SendeErgebnis::Eingereiht);

        match rx.try_recv().unwrap() {
            Ausgehend::Audio { header, daten } => {
                assert_eq!(header, "AUDIO:a.wav:3");
                assert_eq!(daten, Bytes::from_static(&[1, 2, 3]));
            }
            anderes => panic!("Audio erwartet, war {:?}", anderes),
        }
        assert!(rx.try_recv().is_err(), "Genau ein Queue-Element");
    }

    #[tokio::test]
    async fn volle_queue_verwirft() {
        let (handle, _rx) = test_handle(1);

        assert_eq!(handle.zeile_senden("eins"), SendeErgebnis::Eingereiht);
        assert_eq!(handle.zeile_senden("zwei"), SendeErgebnis::Voll);
    }

    #[tokio::test]
    async fn geschlossene_queue_erkannt() {
        let (handle, rx) = test_handle(4);
        drop(rx);

        assert_eq!(handle.zeile_senden("verloren"), SendeErgebnis::Geschlossen);
    }
}

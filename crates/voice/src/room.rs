//! VoiceRoom – ein UDP-Socket und eine Empfangs-Loop pro Raum
//!
//! ## Architektur
//!
//! ```text
//! UDP Socket (recv_from)
//!     |
//!     v
//! Absender-Endpunkt merken
//!     |
//!     v
//! Teilnehmer-Snapshot --> send_to an jeden Endpunkt ausser den Absender
//! ```
//!
//! Die Loop puffert nichts und blockiert nie laenger als der OS-Sendeaufruf;
//! bei Verlust degradiert die Sprachqualitaet, das Relay bleibt unbeteiligt.

use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::watch;

use tratsch_core::types::name_schluessel;

use crate::error::VoiceResult;

/// Maximale Datagramm-Groesse (opakes Audio-Frame plus Reserve)
const UDP_PUFFER_GROESSE: usize = 4096;

// ---------------------------------------------------------------------------
// VoiceRoom
// ---------------------------------------------------------------------------

/// Ein aktiver Voice-Raum: gebundener UDP-Port plus Teilnehmer-Endpunkte
///
/// Thread-safe via Arc; Clone teilt den inneren Zustand.
#[derive(Clone)]
pub struct VoiceRoom {
    inner: Arc<VoiceRoomInner>,
}

struct VoiceRoomInner {
    /// Logischer Raum-Schluessel (Raumname oder kanonischer Paar-Schluessel)
    schluessel: String,
    /// Gebundener UDP-Socket (Port vom OS zugewiesen)
    socket: Arc<UdpSocket>,
    port: u16,
    /// Teilnehmer: normalisierter Name -> UDP-Endpunkt
    teilnehmer: DashMap<String, SocketAddr>,
    /// Shutdown-Signal fuer die Empfangs-Loop
    shutdown_tx: watch::Sender<bool>,
    /// Handle der Empfangs-Loop (Abbruch beim Stoppen)
    empfangs_task: parking_lot::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl VoiceRoom {
    /// Bindet einen OS-zugewiesenen UDP-Port und startet die Empfangs-Loop
    pub async fn starten(schluessel: impl Into<String>) -> VoiceResult<Self> {
        let schluessel = schluessel.into();
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        let port = socket.local_addr()?.port();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let inner = Arc::new(VoiceRoomInner {
            schluessel: schluessel.clone(),
            socket: Arc::new(socket),
            port,
            teilnehmer: DashMap::new(),
            shutdown_tx,
            empfangs_task: parking_lot::Mutex::new(None),
        });

        let task = tokio::spawn(empfangs_loop(Arc::clone(&inner), shutdown_rx));
        *inner.empfangs_task.lock() = Some(task);

        tracing::info!(schluessel = %schluessel, port, "Voice-Raum gestartet");
        Ok(Self { inner })
    }

    /// Gibt den gebundenen UDP-Port zurueck
    pub fn port(&self) -> u16 {
        self.inner.port
    }

    /// Gibt den logischen Raum-Schluessel zurueck
    pub fn schluessel(&self) -> &str {
        &self.inner.schluessel
    }

    /// Registriert einen Teilnehmer-Endpunkt
    ///
    /// Ein erneuter Beitritt desselben Namens aktualisiert den Endpunkt.
    pub fn teilnehmer_hinzufuegen(&self, name: &str, endpunkt: SocketAddr) {
        self.inner
            .teilnehmer
            .insert(name_schluessel(name), endpunkt);
        tracing::info!(
            schluessel = %self.inner.schluessel,
            name,
            endpunkt = %endpunkt,
            "Voice-Teilnehmer registriert"
        );
    }

    /// Entfernt einen Teilnehmer; gibt die Anzahl der Verbleibenden zurueck
    pub fn teilnehmer_entfernen(&self, name: &str) -> usize {
        if self
            .inner
            .teilnehmer
            .remove(&name_schluessel(name))
            .is_some()
        {
            tracing::info!(
                schluessel = %self.inner.schluessel,
                name,
                "Voice-Teilnehmer entfernt"
            );
        }
        self.inner.teilnehmer.len()
    }

    /// Prueft ob ein Name registriert ist
    pub fn hat_teilnehmer(&self, name: &str) -> bool {
        self.inner.teilnehmer.contains_key(&name_schluessel(name))
    }

    /// Gibt die Anzahl der registrierten Teilnehmer zurueck
    pub fn teilnehmer_anzahl(&self) -> usize {
        self.inner.teilnehmer.len()
    }

    /// Stoppt die Empfangs-Loop und gibt den Port frei (idempotent)
    pub fn stoppen(&self) {
        let _ = self.inner.shutdown_tx.send(true);
        if let Some(task) = self.inner.empfangs_task.lock().take() {
            task.abort();
            tracing::info!(
                schluessel = %self.inner.schluessel,
                port = self.inner.port,
                "Voice-Raum gestoppt"
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Empfangs-Loop
// ---------------------------------------------------------------------------

/// Empfaengt Datagramme und reicht sie an alle anderen Teilnehmer weiter
///
/// Hot Path: Stack-Puffer wird wiederverwendet, die Teilnehmer-Liste wird
/// pro Datagramm als Snapshot kopiert (nie live iteriert, siehe Manager).
async fn empfangs_loop(inner: Arc<VoiceRoomInner>, mut shutdown_rx: watch::Receiver<bool>) {
    let mut buf = [0u8; UDP_PUFFER_GROESSE];

    loop {
        tokio::select! {
            result = inner.socket.recv_from(&mut buf) => {
                match result {
                    Ok((laenge, absender)) => {
                        datagramm_weiterleiten(&inner, &buf[..laenge], absender).await;
                    }
                    Err(e) => {
                        tracing::error!(
                            schluessel = %inner.schluessel,
                            fehler = %e,
                            "UDP-Empfangsfehler"
                        );
                        // Kurze Pause um Busy-Loop bei persistentem Fehler zu vermeiden
                        tokio::time::sleep(std::time::Duration::from_millis(1)).await;
                    }
                }
            }

            Ok(()) = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }

    tracing::debug!(schluessel = %inner.schluessel, "Voice-Empfangs-Loop beendet");
}

/// Leitet ein Datagramm an alle registrierten Endpunkte ausser den Absender
async fn datagramm_weiterleiten(inner: &VoiceRoomInner, daten: &[u8], absender: SocketAddr) {
    // Snapshot der Ziele, damit die Map waehrend der Sends mutierbar bleibt
    let ziele: Vec<SocketAddr> = inner.teilnehmer.iter().map(|e| *e.value()).collect();

    let mut weitergeleitet = 0usize;
    for ziel in ziele {
        if ziel == absender {
            continue; // nie an den Absender-Endpunkt zurueckschicken
        }
        match inner.socket.send_to(daten, ziel).await {
            Ok(_) => weitergeleitet += 1,
            Err(e) => {
                tracing::warn!(
                    schluessel = %inner.schluessel,
                    ziel = %ziel,
                    fehler = %e,
                    "UDP-Sendefehler"
                );
            }
        }
    }

    tracing::trace!(
        schluessel = %inner.schluessel,
        absender = %absender,
        bytes = daten.len(),
        empfaenger = weitergeleitet,
        "Datagramm weitergeleitet"
    );
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

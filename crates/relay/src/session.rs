//! ClientConnection – Zustandsmaschine einer einzelnen TCP-Verbindung
//!
//! Jede Verbindung laeuft in einem eigenen tokio-Task. Die Lesehaelfte
//! dekodiert Frames ueber den `FrameCodec`; die Schreibhaelfte gehoert
//! exklusiv dem Outbox-Schreib-Task (siehe `outbox`).
//!
//! ## Zustandsmaschine
//! ```text
//! WarteAufAnmeldung -> WarteAufBefehl -> [EmpfaengtAudio] -> WarteAufBefehl -> ... -> Getrennt
//! ```
//!
//! `EmpfaengtAudio` wird nur direkt nach einem gueltigen `AUDIO:`-Header
//! betreten und endet nachdem exakt `laenge` Bytes verbraucht sind. Endet
//! der Stream vorher, wird der Blob verworfen und die Verbindung getrennt –
//! ein abgeschnittenes Segment wird nie weitergeleitet oder protokolliert.

use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_util::codec::FramedRead;

use tratsch_core::types::name_schluessel;
use tratsch_core::SessionId;
use tratsch_history::gespraechs_schluessel;
use tratsch_protocol::{AudioHeader, AudioZiel, Befehl, Frame, FrameCodec, END_OF_HISTORY};
use tratsch_voice::paar_schluessel;

use crate::error::RelayError;
use crate::outbox::{schreib_task_starten, Ausgehend, SessionHandle, SEND_QUEUE_GROESSE};
use crate::state::RelayState;

// ---------------------------------------------------------------------------
// Verbindungszustand
// ---------------------------------------------------------------------------

/// Zustand der TCP-Verbindung
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerbindungsZustand {
    /// Verbunden, wartet auf `LOGIN:<name>`
    WarteAufAnmeldung,
    /// Angemeldet, wartet auf den naechsten Befehl
    WarteAufBefehl,
    /// Liest gerade das Binaersegment eines Audio-Headers
    EmpfaengtAudio,
    /// Verbindung wird abgebaut
    Getrennt,
}

// ---------------------------------------------------------------------------
// ClientConnection
// ---------------------------------------------------------------------------

type LeseStrom = FramedRead<tokio::net::tcp::OwnedReadHalf, FrameCodec>;

/// Verarbeitet eine einzelne TCP-Verbindung
pub struct ClientConnection {
    state: Arc<RelayState>,
    peer_addr: SocketAddr,
    session_id: SessionId,
    zustand: VerbindungsZustand,
    /// Zeitpunkt des letzten dekodierten Frames
    letzte_aktivitaet: DateTime<Utc>,
}

impl ClientConnection {
    /// Erstellt eine neue ClientConnection
    pub fn neu(state: Arc<RelayState>, peer_addr: SocketAddr) -> Self {
        Self {
            state,
            peer_addr,
            session_id: SessionId::new(),
            zustand: VerbindungsZustand::WarteAufAnmeldung,
            letzte_aktivitaet: Utc::now(),
        }
    }

    /// Gibt den aktuellen Verbindungszustand zurueck
    pub fn zustand(&self) -> VerbindungsZustand {
        self.zustand
    }

    /// Gibt die Verbindungs-ID zurueck
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Startet die Verbindungs-Verarbeitungsschleife
    ///
    /// Laeuft bis die Verbindung endet oder ein Shutdown-Signal eingeht.
    /// Der Abbau (Verzeichnis- und Voice-Austragung) passiert immer, auch
    /// bei abnormalem Verbindungsende.
    pub async fn verarbeiten(
        mut self,
        stream: TcpStream,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        let peer_addr = self.peer_addr;
        tracing::info!(peer = %peer_addr, session = %self.session_id, "Neue Verbindung");

        let (lese_haelfte, schreib_haelfte) = stream.into_split();
        let mut framed = FramedRead::new(lese_haelfte, FrameCodec::new());

        let (sende_tx, sende_rx) = mpsc::channel::<Ausgehend>(SEND_QUEUE_GROESSE);
        let _schreib_task = schreib_task_starten(self.session_id, schreib_haelfte, sende_rx);

        // Anmeldephase
        let name = match self.anmeldung(&mut framed, &sende_tx, &mut shutdown_rx).await {
            Some(name) => name,
            None => {
                tracing::info!(peer = %peer_addr, session = %self.session_id, "Verbindung ohne Anmeldung beendet");
                return;
            }
        };
        self.zustand = VerbindungsZustand::WarteAufBefehl;

        let eigenes_handle = self
            .state
            .directory
            .suchen(&name)
            .expect("Session wurde soeben registriert");

        // Befehlsschleife
        loop {
            tokio::select! {
                frame = framed.next() => {
                    match frame {
                        Some(Ok(Frame::Zeile(zeile))) => {
                            self.letzte_aktivitaet = Utc::now();
                            let weiter = self
                                .zeile_verarbeiten(&zeile, &name, &eigenes_handle, &mut framed)
                                .await;
                            if !weiter {
                                break;
                            }
                        }
                        Some(Ok(Frame::Blob(_))) => {
                            // Der Codec liefert Blobs nur nach einem Audio-Header,
                            // und die werden in zeile_verarbeiten konsumiert
                            tracing::error!(
                                peer = %peer_addr,
                                "Unerwartetes Binaersegment – Verbindung wird getrennt"
                            );
                            break;
                        }
                        Some(Err(e)) => {
                            tracing::warn!(peer = %peer_addr, fehler = %e, "Frame-Lesefehler");
                            break;
                        }
                        None => {
                            tracing::info!(peer = %peer_addr, "Verbindung vom Client getrennt");
                            break;
                        }
                    }
                }

                Ok(()) = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        tracing::info!(peer = %peer_addr, "Shutdown-Signal – Verbindung wird getrennt");
                        let _ = eigenes_handle.zeile_senden("ERROR:Server wird heruntergefahren");
                        break;
                    }
                }
            }
        }

        // Abbau – muss auch bei abnormalem Ende passieren
        self.zustand = VerbindungsZustand::Getrennt;
        self.state.directory.abmelden(&name, &self.session_id);
        self.state.voice.teilnehmer_ueberall_entfernen(&name);

        tracing::info!(
            peer = %peer_addr,
            session = %self.session_id,
            name = %name,
            letzte_aktivitaet = %self.letzte_aktivitaet,
            "Verbindungs-Task beendet"
        );
    }

    // -----------------------------------------------------------------------
    // Anmeldung
    // -----------------------------------------------------------------------

    /// Liest Zeilen bis zu einer gueltigen Anmeldung
    ///
    /// Gibt den registrierten Anzeigenamen zurueck, oder `None` wenn die
    /// Verbindung vorher endet oder der Name vergeben ist (Verbindung wird
    /// dann geschlossen, siehe Fehlertaxonomie).
    async fn anmeldung(
        &mut self,
        framed: &mut LeseStrom,
        sende_tx: &mpsc::Sender<Ausgehend>,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> Option<String> {
        let direkt = |text: String| {
            let _ = sende_tx.try_send(Ausgehend::Zeile(text));
        };

        loop {
            let frame = tokio::select! {
                frame = framed.next() => frame,
                Ok(()) = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        return None;
                    }
                    continue;
                }
            };

            let zeile = match frame {
                Some(Ok(Frame::Zeile(zeile))) => zeile,
                Some(Ok(Frame::Blob(_))) | Some(Err(_)) | None => return None,
            };
            self.letzte_aktivitaet = Utc::now();

            match Befehl::parse(&zeile) {
                Ok(Befehl::Anmelden { name }) => {
                    if self.state.directory.benutzer_anzahl() >= self.state.max_clients as usize {
                        tracing::warn!(peer = %self.peer_addr, "Server voll – Anmeldung abgelehnt");
                        direkt("ERROR:Server voll".to_string());
                        return None;
                    }

                    let handle =
                        SessionHandle::neu(self.session_id, name.clone(), sende_tx.clone());
                    match self.state.directory.registrieren(handle) {
                        Ok(()) => {
                            direkt(format!("OK:Angemeldet als {}", name));
                            return Some(name);
                        }
                        Err(RelayError::NameVergeben(_)) => {
                            // Doppelter Name: ablehnen und Verbindung schliessen
                            direkt(format!("ERROR:Name bereits vergeben: {}", name));
                            return None;
                        }
                        Err(e) => {
                            direkt(format!("ERROR:{}", e));
                            return None;
                        }
                    }
                }
                Ok(_) => direkt("ERROR:Bitte zuerst anmelden (LOGIN:<name>)".to_string()),
                Err(e) => direkt(format!("ERROR:{}", e)),
            }
        }
    }

    // -----------------------------------------------------------------------
    // Befehls-Dispatch
    // -----------------------------------------------------------------------

    /// Verarbeitet eine Befehlszeile; gibt `false` zurueck wenn die
    /// Verbindung enden soll
    async fn zeile_verarbeiten(
        &mut self,
        zeile: &str,
        name: &str,
        handle: &SessionHandle,
        framed: &mut LeseStrom,
    ) -> bool {
        let befehl = match Befehl::parse(zeile) {
            Ok(befehl) => befehl,
            Err(e) => {
                // Protokollfehler betrifft nur diese eine Zeile
                let _ = handle.zeile_senden(format!("ERROR:{}", e));
                return true;
            }
        };

        match befehl {
            Befehl::Anmelden { .. } => {
                let _ = handle.zeile_senden(format!("ERROR:Bereits angemeldet als {}", name));
            }

            Befehl::Rundruf { text } => {
                if let Err(e) = self.state.engine.text_an_alle(name, &text).await {
                    let _ = handle.zeile_senden(format!("ERROR:{}", e));
                }
            }

            Befehl::Gruppe { raum, text } => {
                if let Err(e) = self.state.engine.text_an_raum(name, &raum, &text).await {
                    let _ = handle.zeile_senden(format!("ERROR:{}", e));
                }
            }

            Befehl::Privat { empfaenger, text } => {
                match self.state.engine.text_an_benutzer(name, &empfaenger, &text).await {
                    Ok(true) => {}
                    Ok(false) => {
                        let _ = handle.zeile_senden(format!(
                            "ERROR:Benutzer nicht verbunden: {}",
                            empfaenger
                        ));
                    }
                    Err(e) => {
                        let _ = handle.zeile_senden(format!("ERROR:{}", e));
                    }
                }
            }

            Befehl::GruppeErstellen { raum } => {
                match self.state.directory.raum_erstellen(&raum, name) {
                    Ok(()) => {
                        let _ = handle.zeile_senden(format!("OK:Raum erstellt: {}", raum));
                    }
                    Err(e) => {
                        let _ = handle.zeile_senden(format!("ERROR:{}", e));
                    }
                }
            }

            Befehl::GruppeBeitreten { raum } => {
                match self.state.directory.raum_beitreten(&raum, name) {
                    Ok(()) => {
                        let _ = handle.zeile_senden(format!("OK:Raum beigetreten: {}", raum));
                    }
                    Err(e) => {
                        let _ = handle.zeile_senden(format!("ERROR:{}", e));
                    }
                }
            }

            Befehl::Benutzerliste => {
                let namen = self.state.directory.benutzerliste().join(",");
                let _ = handle.zeile_senden(format!("USERS:{}", namen));
            }

            Befehl::Gruppenliste => {
                let namen = self.state.directory.raumliste().join(",");
                let _ = handle.zeile_senden(format!("GROUPS:{}", namen));
            }

            Befehl::Verlauf { schluessel, anzahl } => {
                let schluessel = self.gespraech_aufloesen(name, &schluessel);
                let ergebnis = match anzahl {
                    Some(n) => self.state.verlauf.letzte_lesen(&schluessel, n).await,
                    None => self.state.verlauf.alles_lesen(&schluessel).await,
                };
                self.mehrzeilig_senden(handle, ergebnis);
            }

            Befehl::Suche { schluessel, begriff } => {
                let schluessel = self.gespraech_aufloesen(name, &schluessel);
                let ergebnis = self.state.verlauf.suchen(&schluessel, &begriff).await;
                self.mehrzeilig_senden(handle, ergebnis);
            }

            Befehl::Audio(header) => {
                return self.audio_verarbeiten(name, handle, &header, framed).await;
            }

            Befehl::VoiceAnfrage { raum } => {
                let schluessel = self.voice_schluessel(name, &raum);
                match self.state.voice.raum_starten(&schluessel).await {
                    Ok(port) => {
                        let _ = handle.zeile_senden(format!("VOICE_PORT:{}", port));
                    }
                    Err(e) => {
                        tracing::error!(raum = %raum, fehler = %e, "Voice-Raum-Start fehlgeschlagen");
                        let _ = handle.zeile_senden("VOICE_ERR");
                    }
                }
            }

            Befehl::VoiceBeitritt { raum, udp_port } => {
                let schluessel = self.voice_schluessel(name, &raum);
                let endpunkt = SocketAddr::new(self.peer_addr.ip(), udp_port);
                match self.state.voice.beitreten(&schluessel, name, endpunkt) {
                    Ok(port) => {
                        let _ = handle.zeile_senden(format!("VOICE_PORT:{}", port));
                    }
                    Err(_) => {
                        let _ = handle.zeile_senden("NO_VOICE");
                    }
                }
            }

            Befehl::VoiceAuflegen { raum } => {
                let schluessel = self.voice_schluessel(name, &raum);
                match self.state.voice.verlassen(&schluessel, name) {
                    Ok(()) => {
                        let _ = handle.zeile_senden(format!("OK:Aufgelegt: {}", raum));
                    }
                    Err(_) => {
                        let _ = handle.zeile_senden("NO_VOICE");
                    }
                }
            }

            Befehl::Beenden => {
                tracing::info!(name, "Sauberes Abmelden");
                return false;
            }
        }

        true
    }

    // -----------------------------------------------------------------------
    // Audio
    // -----------------------------------------------------------------------

    /// Liest das Binaersegment zu einem Audio-Header und leitet es weiter
    ///
    /// Gibt `false` zurueck wenn die Verbindung enden soll (abgeschnittenes
    /// Segment). Ein abgeschnittener Blob wird weder weitergeleitet noch
    /// protokolliert.
    async fn audio_verarbeiten(
        &mut self,
        name: &str,
        handle: &SessionHandle,
        header: &AudioHeader,
        framed: &mut LeseStrom,
    ) -> bool {
        self.zustand = VerbindungsZustand::EmpfaengtAudio;

        let daten = match framed.next().await {
            Some(Ok(Frame::Blob(daten))) => daten,
            Some(Ok(Frame::Zeile(_))) => {
                // Der Codec garantiert nach einem gueltigen Header ein Blob
                tracing::error!(name, "Zeile statt Binaersegment nach Audio-Header");
                return false;
            }
            Some(Err(e)) => {
                tracing::warn!(
                    name,
                    datei = %header.dateiname,
                    erwartet = header.laenge,
                    fehler = %e,
                    "Audio-Segment abgeschnitten – Blob wird verworfen"
                );
                return false;
            }
            None => {
                tracing::warn!(
                    name,
                    datei = %header.dateiname,
                    erwartet = header.laenge,
                    "Verbindung endete vor dem Audio-Segment"
                );
                return false;
            }
        };
        self.zustand = VerbindungsZustand::WarteAufBefehl;
        self.letzte_aktivitaet = Utc::now();

        match self.state.engine.audio_weiterleiten(name, header, daten).await {
            Ok(erreicht) => {
                // Bei privatem Ziel ohne Empfaenger den Absender informieren
                if erreicht == 0 {
                    if let AudioZiel::Privat(empfaenger) = &header.ziel {
                        let _ = handle.zeile_senden(format!(
                            "ERROR:Benutzer nicht verbunden: {}",
                            empfaenger
                        ));
                    }
                }
            }
            Err(e) => {
                let _ = handle.zeile_senden(format!("ERROR:{}", e));
            }
        }
        true
    }

    // -----------------------------------------------------------------------
    // Hilfsfunktionen
    // -----------------------------------------------------------------------

    /// Sendet ein mehrzeiliges Ergebnis, abgeschlossen mit `END_OF_HISTORY`
    fn mehrzeilig_senden(
        &self,
        handle: &SessionHandle,
        ergebnis: Result<Vec<String>, tratsch_history::HistoryError>,
    ) {
        match ergebnis {
            Ok(zeilen) => {
                if zeilen.is_empty() {
                    let _ = handle.zeile_senden("(leer)");
                }
                for zeile in zeilen {
                    let _ = handle.zeile_senden(zeile);
                }
            }
            Err(e) => {
                let _ = handle.zeile_senden(format!("ERROR:{}", e));
            }
        }
        let _ = handle.zeile_senden(END_OF_HISTORY);
    }

    /// Loest ein Verlaufs-Ziel auf: Raumname, Rundruf-Schluessel oder
    /// kanonischer Paar-Schluessel fuer Privatchats
    fn gespraech_aufloesen(&self, name: &str, ziel: &str) -> String {
        if !self.state.directory.raum_existiert(ziel) && self.state.directory.ist_verbunden(ziel) {
            gespraechs_schluessel(name, ziel)
        } else {
            name_schluessel(ziel)
        }
    }

    /// Loest ein Voice-Ziel auf: Raumname oder kanonischer Paar-Schluessel
    fn voice_schluessel(&self, name: &str, ziel: &str) -> String {
        if !self.state.directory.raum_existiert(ziel) && self.state.directory.ist_verbunden(ziel) {
            paar_schluessel(name, ziel)
        } else {
            name_schluessel(ziel)
        }
    }
}

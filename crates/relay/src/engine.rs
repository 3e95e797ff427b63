//! RelayEngine – Fan-out von Text und Audio an Sessions
//!
//! Die Engine loest Empfaenger ueber das Directory auf und schreibt ueber
//! die SessionHandles (Outbox-Queues) der Ziele. Sie haelt nie einen Lock
//! ueber eine ganze Fan-out-Schleife – pro Ziel ist der einzelne
//! `try_send` die gesamte kritische Sektion.
//!
//! Jede akzeptierte Nachricht wird im Verlauf protokolliert, auch wenn
//! kein Empfaenger online ist. Ein toter Empfaenger (geschlossene Queue)
//! wird waehrend des Fan-outs aus dem Directory entfernt; die Schleife
//! laeuft fuer die uebrigen Ziele weiter.

use bytes::Bytes;

use tratsch_core::types::name_schluessel;
use tratsch_history::{
    gespraechs_schluessel, EintragsArt, HistoryStore, VerlaufsEintrag, RUNDRUF_SCHLUESSEL,
};
use tratsch_protocol::{AudioHeader, AudioZiel};

use crate::directory::Directory;
use crate::error::RelayResult;
use crate::outbox::{SendeErgebnis, SessionHandle};

// ---------------------------------------------------------------------------
// RelayEngine
// ---------------------------------------------------------------------------

/// Fan-out-Engine fuer Text-Zeilen und Audio-Blobs
///
/// Clone teilt Directory und Verlauf (beide intern Arc-geteilt).
#[derive(Clone)]
pub struct RelayEngine {
    directory: Directory,
    verlauf: HistoryStore,
}

impl RelayEngine {
    /// Erstellt eine neue Engine auf dem gegebenen Directory und Verlauf
    pub fn neu(directory: Directory, verlauf: HistoryStore) -> Self {
        Self { directory, verlauf }
    }

    // -----------------------------------------------------------------------
    // Text
    // -----------------------------------------------------------------------

    /// Rundruf an alle verbundenen Benutzer ausser dem Absender
    ///
    /// Gibt die Anzahl der erreichten Sessions zurueck.
    pub async fn text_an_alle(&self, absender: &str, text: &str) -> RelayResult<usize> {
        let zeile = format!("{}: {}", absender, text);
        let mut erreicht = 0usize;

        for handle in self.directory.alle_sessions() {
            if name_schluessel(&handle.name) == name_schluessel(absender) {
                continue;
            }
            if self.zeile_zustellen(&handle, &zeile) {
                erreicht += 1;
            }
        }

        self.eintrag_anhaengen(EintragsArt::Text, absender, RUNDRUF_SCHLUESSEL, text)
            .await;
        tracing::debug!(absender, erreicht, "Rundruf zugestellt");
        Ok(erreicht)
    }

    /// Text an alle verbundenen Mitglieder eines Raums ausser dem Absender
    pub async fn text_an_raum(
        &self,
        absender: &str,
        raum: &str,
        text: &str,
    ) -> RelayResult<usize> {
        // Raum-Aufloesung vor dem Verlaufseintrag: ohne Raum kein Gespraech
        let mitglieder = self.directory.mitglieder(raum)?;
        let zeile = format!("[{}] {}: {}", raum, absender, text);
        let erreicht = self.an_mitglieder_zustellen(&mitglieder, absender, &zeile);

        self.eintrag_anhaengen(EintragsArt::Text, absender, &name_schluessel(raum), text)
            .await;
        tracing::debug!(absender, raum, erreicht, "Raum-Nachricht zugestellt");
        Ok(erreicht)
    }

    /// Privater Text an einen einzelnen Benutzer
    ///
    /// Gibt `false` zurueck wenn der Empfaenger nicht verbunden ist. Der
    /// Zustellversuch wird in beiden Faellen im Verlauf protokolliert.
    pub async fn text_an_benutzer(
        &self,
        absender: &str,
        empfaenger: &str,
        text: &str,
    ) -> RelayResult<bool> {
        let zeile = format!("[privat] {}: {}", absender, text);
        let zugestellt = match self.directory.suchen(empfaenger) {
            Some(handle) => self.zeile_zustellen(&handle, &zeile),
            None => false,
        };

        let schluessel = gespraechs_schluessel(absender, empfaenger);
        self.eintrag_anhaengen(EintragsArt::Text, absender, &schluessel, text)
            .await;
        tracing::debug!(absender, empfaenger, zugestellt, "Private Nachricht");
        Ok(zugestellt)
    }

    // -----------------------------------------------------------------------
    // Audio
    // -----------------------------------------------------------------------

    /// Leitet einen vollstaendig gepufferten Audio-Blob an sein Ziel weiter
    ///
    /// Jeder Empfaenger bekommt die Header-Zeile und dieselbe Bytefolge als
    /// ein atomares Outbox-Element. Gibt die Anzahl der erreichten Sessions
    /// zurueck.
    pub async fn audio_weiterleiten(
        &self,
        absender: &str,
        header: &AudioHeader,
        daten: Bytes,
    ) -> RelayResult<usize> {
        debug_assert_eq!(header.laenge, daten.len());
        let header_zeile = header.als_zeile();

        let (erreicht, schluessel) = match &header.ziel {
            AudioZiel::Alle => {
                let mut erreicht = 0usize;
                for handle in self.directory.alle_sessions() {
                    if name_schluessel(&handle.name) == name_schluessel(absender) {
                        continue;
                    }
                    if self.audio_zustellen(&handle, &header_zeile, daten.clone()) {
                        erreicht += 1;
                    }
                }
                (erreicht, RUNDRUF_SCHLUESSEL.to_string())
            }
            AudioZiel::Gruppe(raum) => {
                let mitglieder = self.directory.mitglieder(raum)?;
                let mut erreicht = 0usize;
                for mitglied in &mitglieder {
                    if *mitglied == name_schluessel(absender) {
                        continue;
                    }
                    if let Some(handle) = self.directory.suchen(mitglied) {
                        if self.audio_zustellen(&handle, &header_zeile, daten.clone()) {
                            erreicht += 1;
                        }
                    }
                }
                (erreicht, name_schluessel(raum))
            }
            AudioZiel::Privat(empfaenger) => {
                let erreicht = match self.directory.suchen(empfaenger) {
                    Some(handle) => {
                        usize::from(self.audio_zustellen(&handle, &header_zeile, daten.clone()))
                    }
                    None => 0,
                };
                (erreicht, gespraechs_schluessel(absender, empfaenger))
            }
        };

        self.eintrag_anhaengen(EintragsArt::Audio, absender, &schluessel, &header.dateiname)
            .await;
        tracing::debug!(
            absender,
            datei = %header.dateiname,
            bytes = daten.len(),
            erreicht,
            "Audio-Blob weitergeleitet"
        );
        Ok(erreicht)
    }

    // -----------------------------------------------------------------------
    // Interne Zustellung
    // -----------------------------------------------------------------------

    /// Stellt eine Zeile an die Mitglieder-Menge eines Raums zu
    fn an_mitglieder_zustellen(
        &self,
        mitglieder: &[String],
        absender: &str,
        zeile: &str,
    ) -> usize {
        let absender_schluessel = name_schluessel(absender);
        let mut erreicht = 0usize;

        for mitglied in mitglieder {
            if *mitglied == absender_schluessel {
                continue;
            }
            // Offline-Mitglieder werden uebersprungen
            if let Some(handle) = self.directory.suchen(mitglied) {
                if self.zeile_zustellen(&handle, zeile) {
                    erreicht += 1;
                }
            }
        }
        erreicht
    }

    /// Stellt eine einzelne Zeile zu; entfernt tote Sessions aus dem Directory
    fn zeile_zustellen(&self, handle: &SessionHandle, zeile: &str) -> bool {
        match handle.zeile_senden(zeile) {
            SendeErgebnis::Eingereiht => true,
            SendeErgebnis::Voll => false,
            SendeErgebnis::Geschlossen => {
                self.tote_session_entfernen(handle);
                false
            }
        }
    }

    /// Stellt Header+Blob zu; entfernt tote Sessions aus dem Directory
    fn audio_zustellen(&self, handle: &SessionHandle, header: &str, daten: Bytes) -> bool {
        match handle.audio_senden(header, daten) {
            SendeErgebnis::Eingereiht => true,
            SendeErgebnis::Voll => false,
            SendeErgebnis::Geschlossen => {
                self.tote_session_entfernen(handle);
                false
            }
        }
    }

    fn tote_session_entfernen(&self, handle: &SessionHandle) {
        tracing::warn!(
            name = %handle.name,
            session = %handle.session_id,
            "Schreibziel getrennt – wird aus dem Verzeichnis entfernt"
        );
        self.directory.abmelden(&handle.name, &handle.session_id);
    }

    /// Haengt einen Verlaufseintrag an; Fehler brechen den Fan-out nie ab
    async fn eintrag_anhaengen(
        &self,
        art: EintragsArt,
        absender: &str,
        schluessel: &str,
        inhalt: &str,
    ) {
        let eintrag = VerlaufsEintrag::jetzt(art, absender, schluessel, inhalt);
        if let Err(e) = self.verlauf.anhaengen(&eintrag).await {
            tracing::error!(
                schluessel,
                fehler = %e,
                "Verlaufseintrag konnte nicht geschrieben werden"
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbox::Ausgehend;
    use tokio::sync::mpsc;
    use tratsch_core::SessionId;

    struct TestAufbau {
        _verzeichnis: tempfile::TempDir,
        directory: Directory,
        engine: RelayEngine,
        verlauf: HistoryStore,
    }

    fn aufbau() -> TestAufbau {
        let verzeichnis = tempfile::tempdir().unwrap();
        let verlauf = HistoryStore::neu(verzeichnis.path());
        let directory = Directory::neu();
        let engine = RelayEngine::neu(directory.clone(), verlauf.clone());
        TestAufbau {
            _verzeichnis: verzeichnis,
            directory,
            engine,
            verlauf,
        }
    }

    fn session(directory: &Directory, name: &str) -> mpsc::Receiver<Ausgehend> {
        let (tx, rx) = mpsc::channel(16);
        directory
            .registrieren(SessionHandle::neu(SessionId::new(), name, tx))
            .unwrap();
        rx
    }

    fn naechste_zeile(rx: &mut mpsc::Receiver<Ausgehend>) -> String {
        match rx.try_recv().expect("Nachricht erwartet") {
            Ausgehend::Zeile(text) => text,
            anderes => panic!("Zeile erwartet, war {:?}", anderes),
        }
    }

    #[tokio::test]
    async fn rundruf_erreicht_alle_ausser_absender() {
        let t = aufbau();
        let mut anna = session(&t.directory, "anna");
        let mut ben = session(&t.directory, "ben");
        let mut carla = session(&t.directory, "carla");

        let erreicht = t.engine.text_an_alle("anna", "hallo zusammen").await.unwrap();
        assert_eq!(erreicht, 2);

        assert_eq!(naechste_zeile(&mut ben), "anna: hallo zusammen");
        assert_eq!(naechste_zeile(&mut carla), "anna: hallo zusammen");
        assert!(anna.try_recv().is_err(), "Absender bekommt kein Echo");

        let log = t.verlauf.alles_lesen(RUNDRUF_SCHLUESSEL).await.unwrap();
        assert_eq!(log.len(), 1);
    }

    #[tokio::test]
    async fn raum_nachricht_nur_an_verbundene_mitglieder() {
        let t = aufbau();
        let mut anna = session(&t.directory, "anna");
        let mut ben = session(&t.directory, "ben");
        let mut carla = session(&t.directory, "carla"); // kein Mitglied

        t.directory.raum_erstellen("band", "anna").unwrap();
        t.directory.raum_beitreten("band", "ben").unwrap();
        t.directory.raum_beitreten("band", "offline").unwrap();

        let erreicht = t
            .engine
            .text_an_raum("anna", "band", "probe um acht")
            .await
            .unwrap();
        assert_eq!(erreicht, 1, "Nur ben ist verbundenes Mitglied");

        assert_eq!(naechste_zeile(&mut ben), "[band] anna: probe um acht");
        assert!(anna.try_recv().is_err());
        assert!(carla.try_recv().is_err(), "Nicht-Mitglied bekommt nichts");

        let log = t.verlauf.alles_lesen("band").await.unwrap();
        assert_eq!(log.len(), 1);
        assert!(log[0].contains("[TEXT] anna -> band : probe um acht"));
    }

    #[tokio::test]
    async fn raum_fehlt_kein_verlaufseintrag() {
        let t = aufbau();
        let _anna = session(&t.directory, "anna");

        let ergebnis = t.engine.text_an_raum("anna", "nix", "hallo").await;
        assert!(ergebnis.is_err());
        assert!(t.verlauf.alles_lesen("nix").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn private_nachricht_zugestellt() {
        let t = aufbau();
        let _anna = session(&t.directory, "anna");
        let mut ben = session(&t.directory, "ben");

        let zugestellt = t
            .engine
            .text_an_benutzer("anna", "ben", "nur fuer dich")
            .await
            .unwrap();
        assert!(zugestellt);
        assert_eq!(naechste_zeile(&mut ben), "[privat] anna: nur fuer dich");
    }

    #[tokio::test]
    async fn private_nachricht_an_geist_wird_protokolliert() {
        let t = aufbau();
        let _anna = session(&t.directory, "anna");

        let zugestellt = t
            .engine
            .text_an_benutzer("anna", "ghost", "bist du da?")
            .await
            .unwrap();
        assert!(!zugestellt);

        // Verlauf haelt den Versuch unter dem kanonischen Paar-Schluessel fest
        let log = t
            .verlauf
            .alles_lesen(&gespraechs_schluessel("anna", "ghost"))
            .await
            .unwrap();
        assert_eq!(log.len(), 1);
        assert!(log[0].contains("bist du da?"));
    }

    #[tokio::test]
    async fn beide_richtungen_landen_im_selben_log() {
        let t = aufbau();
        let _anna = session(&t.directory, "anna");
        let _ben = session(&t.directory, "ben");

        t.engine.text_an_benutzer("anna", "ben", "hin").await.unwrap();
        t.engine.text_an_benutzer("ben", "anna", "zurueck").await.unwrap();

        let log = t.verlauf.alles_lesen("anna_ben").await.unwrap();
        assert_eq!(log.len(), 2);
    }

    #[tokio::test]
    async fn audio_an_raum_identische_bytes() {
        let t = aufbau();
        let _anna = session(&t.directory, "anna");
        let mut ben = session(&t.directory, "ben");
        let mut carla = session(&t.directory, "carla");

        t.directory.raum_erstellen("band", "anna").unwrap();
        t.directory.raum_beitreten("band", "ben").unwrap();
        t.directory.raum_beitreten("band", "carla").unwrap();

        let daten = Bytes::from(vec![0x5Au8; 5000]);
        let header = AudioHeader::parse("AUDIO:note.wav:5000:GROUP:band").unwrap();

        let erreicht = t
            .engine
            .audio_weiterleiten("anna", &header, daten.clone())
            .await
            .unwrap();
        assert_eq!(erreicht, 2);

        for rx in [&mut ben, &mut carla] {
            match rx.try_recv().unwrap() {
                Ausgehend::Audio { header, daten: blob } => {
                    assert_eq!(header, "AUDIO:note.wav:5000:GROUP:band");
                    assert_eq!(blob.len(), 5000);
                    assert_eq!(blob, daten);
                }
                anderes => panic!("Audio erwartet, war {:?}", anderes),
            }
        }

        let log = t.verlauf.alles_lesen("band").await.unwrap();
        assert_eq!(log.len(), 1);
        assert!(log[0].contains("[AUDIO] anna -> band : note.wav"));
    }

    #[tokio::test]
    async fn audio_ohne_empfaenger_trotzdem_im_verlauf() {
        let t = aufbau();
        let _anna = session(&t.directory, "anna");
        t.directory.raum_erstellen("band", "anna").unwrap();

        let header = AudioHeader::parse("AUDIO:solo.wav:4:GROUP:band").unwrap();
        let erreicht = t
            .engine
            .audio_weiterleiten("anna", &header, Bytes::from_static(&[1, 2, 3, 4]))
            .await
            .unwrap();
        assert_eq!(erreicht, 0);

        let log = t.verlauf.alles_lesen("band").await.unwrap();
        assert_eq!(log.len(), 1, "Eintrag darf nicht uebersprungen werden");
    }

    #[tokio::test]
    async fn tote_session_wird_beim_fanout_entfernt() {
        let t = aufbau();
        let _anna = session(&t.directory, "anna");
        let mut carla = session(&t.directory, "carla");

        // bens Empfangsseite ist weg (Verbindung tot), Handle steht noch im Verzeichnis
        let ben_rx = session(&t.directory, "ben");
        drop(ben_rx);

        let erreicht = t.engine.text_an_alle("anna", "hallo").await.unwrap();
        assert_eq!(erreicht, 1, "Nur carla ist erreichbar");
        assert_eq!(naechste_zeile(&mut carla), "anna: hallo");

        // ben wurde als getrennt erkannt und entfernt
        assert!(!t.directory.ist_verbunden("ben"));
        assert!(t.directory.ist_verbunden("carla"));
    }
}

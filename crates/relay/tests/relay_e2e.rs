//! End-to-End-Tests ueber echte TCP-Verbindungen
//!
//! Die Testclients sprechen das Leitungsprotokoll wie ein echter Client:
//! gepufferter Zeilenleser und exaktes Byte-Lesen auf demselben Stream.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::timeout;

use tratsch_history::{gespraechs_schluessel, HistoryStore};
use tratsch_relay::{RelayServer, RelayState};
use tratsch_voice::VoiceRoomManager;

// ---------------------------------------------------------------------------
// Test-Infrastruktur
// ---------------------------------------------------------------------------

struct TestServer {
    addr: SocketAddr,
    state: Arc<RelayState>,
    shutdown_tx: watch::Sender<bool>,
    _verzeichnis: tempfile::TempDir,
}

async fn server_starten() -> TestServer {
    let verzeichnis = tempfile::tempdir().expect("Tempdir muss anlegbar sein");
    let state = Arc::new(RelayState::neu(
        HistoryStore::neu(verzeichnis.path()),
        VoiceRoomManager::neu(),
    ));

    let server = RelayServer::binden(Arc::clone(&state), "127.0.0.1:0".parse().unwrap())
        .await
        .expect("Server muss binden");
    let addr = server.lokale_adresse().unwrap();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        let _ = server.starten(shutdown_rx).await;
    });

    TestServer {
        addr,
        state,
        shutdown_tx,
        _verzeichnis: verzeichnis,
    }
}

/// Testclient: Zeilenleser und exaktes Byte-Lesen auf demselben Stream
struct TestClient {
    leser: BufReader<OwnedReadHalf>,
    schreiber: OwnedWriteHalf,
}

impl TestClient {
    async fn verbinden(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.expect("Verbindung muss klappen");
        let (lese, schreib) = stream.into_split();
        Self {
            leser: BufReader::new(lese),
            schreiber: schreib,
        }
    }

    async fn anmelden(addr: SocketAddr, name: &str) -> Self {
        let mut client = Self::verbinden(addr).await;
        client.zeile_senden(&format!("LOGIN:{}", name)).await;
        let antwort = client.zeile_lesen().await;
        assert!(
            antwort.starts_with("OK:"),
            "Anmeldung von {} fehlgeschlagen: {}",
            name,
            antwort
        );
        client
    }

    async fn zeile_senden(&mut self, zeile: &str) {
        self.schreiber
            .write_all(format!("{}\n", zeile).as_bytes())
            .await
            .expect("Senden muss klappen");
    }

    async fn bytes_senden(&mut self, daten: &[u8]) {
        self.schreiber.write_all(daten).await.expect("Senden muss klappen");
    }

    async fn zeile_lesen(&mut self) -> String {
        let mut zeile = String::new();
        let gelesen = timeout(Duration::from_secs(2), self.leser.read_line(&mut zeile))
            .await
            .expect("Zeitlimit beim Zeilenlesen")
            .expect("Lesen muss klappen");
        assert!(gelesen > 0, "Verbindung wurde unerwartet geschlossen");
        zeile.trim_end_matches(['\r', '\n']).to_string()
    }

    async fn bytes_lesen(&mut self, anzahl: usize) -> Vec<u8> {
        let mut daten = vec![0u8; anzahl];
        timeout(Duration::from_secs(2), self.leser.read_exact(&mut daten))
            .await
            .expect("Zeitlimit beim Byte-Lesen")
            .expect("Lesen muss klappen");
        daten
    }

    /// Liest Zeilen bis einschliesslich END_OF_HISTORY
    async fn verlauf_lesen(&mut self) -> Vec<String> {
        let mut zeilen = Vec::new();
        loop {
            let zeile = self.zeile_lesen().await;
            if zeile == "END_OF_HISTORY" {
                return zeilen;
            }
            zeilen.push(zeile);
        }
    }
}

/// Wartet bis der Verlauf eines Schluessels mindestens `mindestens` Zeilen hat
async fn verlauf_abwarten(state: &RelayState, schluessel: &str, mindestens: usize) -> Vec<String> {
    for _ in 0..40 {
        let zeilen = state.verlauf.alles_lesen(schluessel).await.unwrap();
        if zeilen.len() >= mindestens {
            return zeilen;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("Verlauf {} erreichte nie {} Zeilen", schluessel, mindestens);
}

// ---------------------------------------------------------------------------
// Szenarien
// ---------------------------------------------------------------------------

#[tokio::test]
async fn rundruf_erreicht_andere_clients() {
    let server = server_starten().await;
    let mut anna = TestClient::anmelden(server.addr, "Anna").await;
    let mut ben = TestClient::anmelden(server.addr, "Ben").await;

    anna.zeile_senden("hallo zusammen").await;

    let zeile = ben.zeile_lesen().await;
    assert_eq!(zeile, "Anna: hallo zusammen");

    let _ = server.shutdown_tx.send(true);
}

#[tokio::test]
async fn doppelter_name_wird_abgelehnt_und_getrennt() {
    let server = server_starten().await;
    let _anna = TestClient::anmelden(server.addr, "Anna").await;

    // Case-insensitiv: "anna" kollidiert mit "Anna"
    let mut zweite = TestClient::verbinden(server.addr).await;
    zweite.zeile_senden("LOGIN:anna").await;
    let antwort = zweite.zeile_lesen().await;
    assert!(antwort.starts_with("ERROR:Name bereits vergeben"));

    // Danach schliesst der Server die Verbindung
    let mut rest = String::new();
    let gelesen = timeout(Duration::from_secs(2), zweite.leser.read_line(&mut rest))
        .await
        .expect("Zeitlimit")
        .expect("Lesen muss klappen");
    assert_eq!(gelesen, 0, "Verbindung muss geschlossen sein");

    let _ = server.shutdown_tx.send(true);
}

#[tokio::test]
async fn gruppen_audio_an_alle_mitglieder() {
    let server = server_starten().await;
    let mut anna = TestClient::anmelden(server.addr, "Anna").await;
    let mut ben = TestClient::anmelden(server.addr, "Ben").await;
    let mut carla = TestClient::anmelden(server.addr, "Carla").await;

    anna.zeile_senden("CREATE_GROUP:band").await;
    assert!(anna.zeile_lesen().await.starts_with("OK:"));
    ben.zeile_senden("JOIN_GROUP:band").await;
    assert!(ben.zeile_lesen().await.starts_with("OK:"));
    carla.zeile_senden("JOIN_GROUP:band").await;
    assert!(carla.zeile_lesen().await.starts_with("OK:"));

    // Anna sendet Header plus exakt 5000 Bytes
    let daten: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();
    anna.zeile_senden("AUDIO:note.wav:5000:GROUP:band").await;
    anna.bytes_senden(&daten).await;

    // Ben und Carla empfangen identischen Header und identische Bytes
    for client in [&mut ben, &mut carla] {
        let header = client.zeile_lesen().await;
        assert_eq!(header, "AUDIO:note.wav:5000:GROUP:band");
        let empfangen = client.bytes_lesen(5000).await;
        assert_eq!(empfangen, daten, "Bytefolge muss identisch sein");
    }

    // Kein Byte des Blobs blutet in den Zeilenstrom: die naechste
    // Textnachricht kommt sauber an
    anna.zeile_senden("GROUP:band:danach").await;
    assert_eq!(ben.zeile_lesen().await, "[band] Anna: danach");
    assert_eq!(carla.zeile_lesen().await, "[band] Anna: danach");

    // Verlauf: genau ein AUDIO-Eintrag von Anna unter "band"
    let log = verlauf_abwarten(&server.state, "band", 1).await;
    assert!(log[0].contains("[AUDIO] Anna -> band : note.wav"));

    let _ = server.shutdown_tx.send(true);
}

#[tokio::test]
async fn abgeschnittenes_audio_wird_nicht_weitergeleitet() {
    let server = server_starten().await;
    let mut anna = TestClient::anmelden(server.addr, "Anna").await;
    let mut ben = TestClient::anmelden(server.addr, "Ben").await;

    anna.zeile_senden("CREATE_GROUP:band").await;
    assert!(anna.zeile_lesen().await.starts_with("OK:"));
    ben.zeile_senden("JOIN_GROUP:band").await;
    assert!(ben.zeile_lesen().await.starts_with("OK:"));

    // Anna kuendigt 100 Bytes an, sendet aber nur 10 und trennt
    anna.zeile_senden("AUDIO:kaputt.wav:100:GROUP:band").await;
    anna.bytes_senden(&[0xAB; 10]).await;
    drop(anna);

    // Ben darf weder Header noch Bytes sehen
    let mut puffer = String::new();
    let ergebnis = timeout(Duration::from_millis(500), ben.leser.read_line(&mut puffer)).await;
    assert!(ergebnis.is_err(), "Ben darf nichts empfangen: {:?}", puffer);

    // Kein Verlaufseintrag fuer den verworfenen Blob
    tokio::time::sleep(Duration::from_millis(100)).await;
    let log = server.state.verlauf.alles_lesen("band").await.unwrap();
    assert!(log.is_empty(), "Abgeschnittener Blob darf nicht im Verlauf stehen");

    let _ = server.shutdown_tx.send(true);
}

#[tokio::test]
async fn private_nachricht_an_geist_meldet_fehler_und_protokolliert() {
    let server = server_starten().await;
    let mut anna = TestClient::anmelden(server.addr, "Anna").await;

    anna.zeile_senden("PRIV:ghost:bist du da?").await;
    let antwort = anna.zeile_lesen().await;
    assert!(antwort.starts_with("ERROR:Benutzer nicht verbunden"));

    let schluessel = gespraechs_schluessel("Anna", "ghost");
    let log = verlauf_abwarten(&server.state, &schluessel, 1).await;
    assert!(log[0].contains("bist du da?"));

    let _ = server.shutdown_tx.send(true);
}

#[tokio::test]
async fn voice_request_ist_idempotent() {
    let server = server_starten().await;
    let mut anna = TestClient::anmelden(server.addr, "Anna").await;
    let mut ben = TestClient::anmelden(server.addr, "Ben").await;

    anna.zeile_senden("CREATE_GROUP:band").await;
    assert!(anna.zeile_lesen().await.starts_with("OK:"));

    anna.zeile_senden("VOICE_REQUEST:band").await;
    let antwort = anna.zeile_lesen().await;
    let port = antwort
        .strip_prefix("VOICE_PORT:")
        .expect("VOICE_PORT erwartet")
        .to_string();

    // Zweite Anfrage fuer denselben Raum liefert denselben Port
    ben.zeile_senden("VOICE_REQUEST:band").await;
    assert_eq!(ben.zeile_lesen().await, format!("VOICE_PORT:{}", port));

    // Beitritt und Auflegen
    anna.zeile_senden("VOICE_JOIN:band:40100").await;
    assert_eq!(anna.zeile_lesen().await, format!("VOICE_PORT:{}", port));
    anna.zeile_senden("VOICE_HANGUP:band").await;
    assert!(anna.zeile_lesen().await.starts_with("OK:"));

    // Raum wurde beim letzten Auflegen gestoppt
    ben.zeile_senden("VOICE_JOIN:band:40101").await;
    assert_eq!(ben.zeile_lesen().await, "NO_VOICE");

    let _ = server.shutdown_tx.send(true);
}

#[tokio::test]
async fn verlauf_und_suche_ueber_die_leitung() {
    let server = server_starten().await;
    let mut anna = TestClient::anmelden(server.addr, "Anna").await;
    let mut ben = TestClient::anmelden(server.addr, "Ben").await;

    anna.zeile_senden("CREATE_GROUP:band").await;
    assert!(anna.zeile_lesen().await.starts_with("OK:"));
    ben.zeile_senden("JOIN_GROUP:band").await;
    assert!(ben.zeile_lesen().await.starts_with("OK:"));

    anna.zeile_senden("GROUP:band:probe am montag").await;
    assert_eq!(ben.zeile_lesen().await, "[band] Anna: probe am montag");
    anna.zeile_senden("GROUP:band:bringt kabel mit").await;
    assert_eq!(ben.zeile_lesen().await, "[band] Anna: bringt kabel mit");
    verlauf_abwarten(&server.state, "band", 2).await;

    // Kompletter Verlauf
    ben.zeile_senden("HISTORY:band").await;
    let zeilen = ben.verlauf_lesen().await;
    assert_eq!(zeilen.len(), 2);
    assert!(zeilen[0].contains("probe am montag"));

    // Letzte 1
    ben.zeile_senden("HISTORY:band:1").await;
    let zeilen = ben.verlauf_lesen().await;
    assert_eq!(zeilen.len(), 1);
    assert!(zeilen[0].contains("bringt kabel mit"));

    // Suche
    ben.zeile_senden("SEARCH:band:kabel").await;
    let zeilen = ben.verlauf_lesen().await;
    assert_eq!(zeilen.len(), 1);

    // Leerer Verlauf liefert Platzhalter
    ben.zeile_senden("HISTORY:leer").await;
    let zeilen = ben.verlauf_lesen().await;
    assert_eq!(zeilen, vec!["(leer)".to_string()]);

    let _ = server.shutdown_tx.send(true);
}

#[tokio::test]
async fn listen_und_protokollfehler() {
    let server = server_starten().await;
    let mut anna = TestClient::anmelden(server.addr, "Anna").await;
    let _ben = TestClient::anmelden(server.addr, "Ben").await;

    anna.zeile_senden("USERS").await;
    assert_eq!(anna.zeile_lesen().await, "USERS:Anna,Ben");

    anna.zeile_senden("CREATE_GROUP:band").await;
    assert!(anna.zeile_lesen().await.starts_with("OK:"));
    anna.zeile_senden("GROUPS").await;
    assert_eq!(anna.zeile_lesen().await, "GROUPS:band");

    // Ungueltiger Audio-Header: Fehlerzeile, Verbindung bleibt offen
    anna.zeile_senden("AUDIO:kaputt.wav:abc").await;
    assert!(anna.zeile_lesen().await.starts_with("ERROR:"));
    anna.zeile_senden("USERS").await;
    assert!(anna.zeile_lesen().await.starts_with("USERS:"));

    let _ = server.shutdown_tx.send(true);
}

#[tokio::test]
async fn abmeldung_raeumt_verzeichnis_auf() {
    let server = server_starten().await;
    let mut anna = TestClient::anmelden(server.addr, "Anna").await;

    assert!(server.state.directory.ist_verbunden("anna"));

    anna.zeile_senden("EXIT").await;
    drop(anna);

    for _ in 0..40 {
        if !server.state.directory.ist_verbunden("anna") {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(!server.state.directory.ist_verbunden("anna"));

    // Name ist wieder frei
    let _wieder = TestClient::anmelden(server.addr, "Anna").await;

    let _ = server.shutdown_tx.send(true);
}

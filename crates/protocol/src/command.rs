//! Befehls-Dekodierung an der Frame-Grenze
//!
//! Jede empfangene Zeile wird genau einmal in einen getaggten [`Befehl`]
//! uebersetzt und danach erschoepfend gematcht – es gibt keine verstreuten
//! String-Vergleiche in den Handlern.
//!
//! ## Zeilenformen
//!
//! ```text
//! LOGIN:<name>                          Anmeldung (erste Zeile der Verbindung)
//! CREATE_GROUP:<raum>                   Raum erstellen
//! JOIN_GROUP:<raum>                     Raum beitreten
//! USERS / GROUPS                        Listen abfragen
//! GROUP:<raum>:<text>                   Text an Raum
//! PRIV:<benutzer>:<text>                Privater Text
//! HISTORY:<schluessel>[:<n>]            Verlauf (komplett oder letzte n)
//! SEARCH:<schluessel>:<begriff>         Verlaufssuche
//! AUDIO:<datei>:<laenge>[:<scope>:<ziel>]  Audio-Header, scope GROUP|PRIV|ALL
//! VOICE_REQUEST:<raum>                  Voice-Raum starten/abfragen
//! VOICE_JOIN:<raum>:<udpPort>           Voice-Raum beitreten
//! VOICE_HANGUP:<raum>                   Voice-Raum verlassen
//! EXIT                                  Abmelden
//! <alles andere>                        Rundruf an alle Benutzer
//! ```

use thiserror::Error;

/// Abschlusszeile fuer mehrzeilige Verlaufs-Antworten
pub const END_OF_HISTORY: &str = "END_OF_HISTORY";

// ---------------------------------------------------------------------------
// Fehler
// ---------------------------------------------------------------------------

/// Fehler beim Dekodieren einer Befehlszeile
///
/// Ein Befehlsfehler betrifft nur die einzelne Zeile; die Verbindung
/// bleibt offen.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BefehlsFehler {
    #[error("Ungueltiger Audio-Header: {0}")]
    UngueltigerAudioHeader(String),

    #[error("Falsche Feldanzahl fuer {befehl}")]
    FalscheFeldanzahl { befehl: &'static str },

    #[error("Leeres Feld in Befehl {befehl}")]
    LeeresFeld { befehl: &'static str },

    #[error("Ungueltige Zahl in Befehl {befehl}: {wert}")]
    UngueltigeZahl { befehl: &'static str, wert: String },

    #[error("Name enthaelt ungueltige Zeichen: {0}")]
    UngueltigerName(String),
}

// ---------------------------------------------------------------------------
// Audio-Header
// ---------------------------------------------------------------------------

/// Adressierung eines Audio-Blobs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioZiel {
    /// Alle verbundenen Benutzer
    Alle,
    /// Mitglieder eines Raums
    Gruppe(String),
    /// Ein einzelner Benutzer
    Privat(String),
}

/// Dekodierter Audio-Header `AUDIO:<datei>:<laenge>[:<scope>:<ziel>]`
///
/// Nach dieser Zeile folgen auf der Leitung exakt `laenge` rohe Bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioHeader {
    /// Dateiname des Audio-Blobs (reine Referenz, wird nie geoeffnet)
    pub dateiname: String,
    /// Exakte Laenge des folgenden Binaersegments in Bytes
    pub laenge: usize,
    /// Adressierung
    pub ziel: AudioZiel,
}

impl AudioHeader {
    /// Versucht eine Zeile als gueltigen Audio-Header zu parsen
    ///
    /// Gibt `None` zurueck wenn die Zeile kein gueltiger Header ist –
    /// auch dann, wenn sie mit `AUDIO:` beginnt. Der Aufrufer entscheidet,
    /// ob das ein Protokollfehler ist (siehe [`Befehl::parse`]).
    pub fn parse(zeile: &str) -> Option<Self> {
        let felder: Vec<&str> = zeile.split(':').collect();
        if felder.first() != Some(&"AUDIO") {
            return None;
        }

        let (dateiname, laenge_feld, ziel) = match felder.len() {
            3 => (felder[1], felder[2], AudioZiel::Alle),
            5 => {
                let ziel = match felder[3] {
                    "GROUP" => AudioZiel::Gruppe(felder[4].to_string()),
                    "PRIV" => AudioZiel::Privat(felder[4].to_string()),
                    "ALL" => AudioZiel::Alle,
                    _ => return None,
                };
                if matches!(&ziel, AudioZiel::Gruppe(z) | AudioZiel::Privat(z) if z.is_empty()) {
                    return None;
                }
                (felder[1], felder[2], ziel)
            }
            _ => return None,
        };

        if dateiname.is_empty() {
            return None;
        }
        let laenge: usize = laenge_feld.parse().ok()?;
        if laenge == 0 {
            return None;
        }

        Some(Self {
            dateiname: dateiname.to_string(),
            laenge,
            ziel,
        })
    }

    /// Rendert den Header als Leitungszeile
    pub fn als_zeile(&self) -> String {
        match &self.ziel {
            AudioZiel::Alle => format!("AUDIO:{}:{}", self.dateiname, self.laenge),
            AudioZiel::Gruppe(raum) => {
                format!("AUDIO:{}:{}:GROUP:{}", self.dateiname, self.laenge, raum)
            }
            AudioZiel::Privat(name) => {
                format!("AUDIO:{}:{}:PRIV:{}", self.dateiname, self.laenge, name)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Befehl
// ---------------------------------------------------------------------------

/// Getaggter Befehlstyp – das Ergebnis der Dekodierung einer Zeile
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Befehl {
    /// `LOGIN:<name>` – Anmeldung mit Anzeigenamen
    Anmelden { name: String },
    /// Rundruf-Text an alle verbundenen Benutzer
    Rundruf { text: String },
    /// `GROUP:<raum>:<text>` – Text an Raummitglieder
    Gruppe { raum: String, text: String },
    /// `PRIV:<benutzer>:<text>` – privater Text
    Privat { empfaenger: String, text: String },
    /// `CREATE_GROUP:<raum>`
    GruppeErstellen { raum: String },
    /// `JOIN_GROUP:<raum>`
    GruppeBeitreten { raum: String },
    /// `USERS` – verbundene Benutzer auflisten
    Benutzerliste,
    /// `GROUPS` – Raeume auflisten
    Gruppenliste,
    /// `HISTORY:<schluessel>[:<n>]`
    Verlauf {
        schluessel: String,
        anzahl: Option<usize>,
    },
    /// `SEARCH:<schluessel>:<begriff>`
    Suche {
        schluessel: String,
        begriff: String,
    },
    /// `AUDIO:<datei>:<laenge>[:<scope>:<ziel>]` – danach folgt der Blob
    Audio(AudioHeader),
    /// `VOICE_REQUEST:<raum>`
    VoiceAnfrage { raum: String },
    /// `VOICE_JOIN:<raum>:<udpPort>`
    VoiceBeitritt { raum: String, udp_port: u16 },
    /// `VOICE_HANGUP:<raum>`
    VoiceAuflegen { raum: String },
    /// `EXIT` – sauberes Abmelden
    Beenden,
}

impl Befehl {
    /// Dekodiert eine Leitungszeile in einen Befehl
    ///
    /// Zeilen ohne bekanntes Praefix sind Rundruf-Text (Chat ohne Ziel).
    pub fn parse(zeile: &str) -> Result<Self, BefehlsFehler> {
        if zeile.eq_ignore_ascii_case("EXIT") {
            return Ok(Self::Beenden);
        }
        if zeile == "USERS" {
            return Ok(Self::Benutzerliste);
        }
        if zeile == "GROUPS" {
            return Ok(Self::Gruppenliste);
        }

        if zeile.starts_with("AUDIO:") {
            return AudioHeader::parse(zeile)
                .map(Self::Audio)
                .ok_or_else(|| BefehlsFehler::UngueltigerAudioHeader(zeile.to_string()));
        }

        if let Some(rest) = zeile.strip_prefix("LOGIN:") {
            let name = feld_pruefen("LOGIN", rest)?;
            return Ok(Self::Anmelden { name });
        }
        if let Some(rest) = zeile.strip_prefix("CREATE_GROUP:") {
            let raum = feld_pruefen("CREATE_GROUP", rest)?;
            return Ok(Self::GruppeErstellen { raum });
        }
        if let Some(rest) = zeile.strip_prefix("JOIN_GROUP:") {
            let raum = feld_pruefen("JOIN_GROUP", rest)?;
            return Ok(Self::GruppeBeitreten { raum });
        }
        if let Some(rest) = zeile.strip_prefix("GROUP:") {
            let (raum, text) = zwei_felder("GROUP", rest)?;
            return Ok(Self::Gruppe { raum, text });
        }
        if let Some(rest) = zeile.strip_prefix("PRIV:") {
            let (empfaenger, text) = zwei_felder("PRIV", rest)?;
            return Ok(Self::Privat { empfaenger, text });
        }
        if let Some(rest) = zeile.strip_prefix("HISTORY:") {
            return match rest.split_once(':') {
                None => Ok(Self::Verlauf {
                    schluessel: feld_pruefen("HISTORY", rest)?,
                    anzahl: None,
                }),
                Some((schluessel, n)) => {
                    let anzahl: usize =
                        n.parse().map_err(|_| BefehlsFehler::UngueltigeZahl {
                            befehl: "HISTORY",
                            wert: n.to_string(),
                        })?;
                    Ok(Self::Verlauf {
                        schluessel: feld_pruefen("HISTORY", schluessel)?,
                        anzahl: Some(anzahl),
                    })
                }
            };
        }
        if let Some(rest) = zeile.strip_prefix("SEARCH:") {
            let (schluessel, begriff) = zwei_felder("SEARCH", rest)?;
            return Ok(Self::Suche {
                schluessel,
                begriff,
            });
        }
        if let Some(rest) = zeile.strip_prefix("VOICE_REQUEST:") {
            let raum = feld_pruefen("VOICE_REQUEST", rest)?;
            return Ok(Self::VoiceAnfrage { raum });
        }
        if let Some(rest) = zeile.strip_prefix("VOICE_JOIN:") {
            let (raum, port) = zwei_felder("VOICE_JOIN", rest)?;
            let udp_port: u16 = port.parse().map_err(|_| BefehlsFehler::UngueltigeZahl {
                befehl: "VOICE_JOIN",
                wert: port,
            })?;
            return Ok(Self::VoiceBeitritt { raum, udp_port });
        }
        if let Some(rest) = zeile.strip_prefix("VOICE_HANGUP:") {
            let raum = feld_pruefen("VOICE_HANGUP", rest)?;
            return Ok(Self::VoiceAuflegen { raum });
        }

        Ok(Self::Rundruf {
            text: zeile.to_string(),
        })
    }
}

/// Prueft ein einzelnes Namens-/Schluesselfeld: nicht leer, kein ':'
fn feld_pruefen(befehl: &'static str, feld: &str) -> Result<String, BefehlsFehler> {
    let feld = feld.trim();
    if feld.is_empty() {
        return Err(BefehlsFehler::LeeresFeld { befehl });
    }
    if feld.contains(':') {
        return Err(BefehlsFehler::UngueltigerName(feld.to_string()));
    }
    Ok(feld.to_string())
}

/// Teilt `rest` in ein Namensfeld und einen Restteil (Text/Begriff/Port)
fn zwei_felder(
    befehl: &'static str,
    rest: &str,
) -> Result<(String, String), BefehlsFehler> {
    let (erstes, zweites) = rest
        .split_once(':')
        .ok_or(BefehlsFehler::FalscheFeldanzahl { befehl })?;
    let erstes = feld_pruefen(befehl, erstes)?;
    if zweites.is_empty() {
        return Err(BefehlsFehler::LeeresFeld { befehl });
    }
    Ok((erstes, zweites.to_string()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Wire-Format fuer TCP-Verbindungen
//!
//! Gemischtes Framing: zeilenbasierte Befehle und exakt-lange Binaersegmente
//! teilen sich denselben Bytestrom.
//!
//! ## Frame-Format
//!
//! ```text
//! ...befehl\n...chat-text\nAUDIO:ton.wav:5000\n<5000 rohe Bytes>naechster befehl\n...
//! ```
//!
//! Der Codec arbeitet als Zustandsmaschine: im Zeilenmodus wird bis `\n`
//! gelesen; meldet sich eine Zeile als gueltiger Audio-Header, wechselt der
//! Codec fuer exakt `<byteLength>` Bytes in den Binaermodus und danach
//! zurueck. Weil beide Modi auf demselben `BytesMut` operieren, kann der
//! Zeilenleser nie Bytes des Binaersegments in seinen Lookahead ziehen.

use bytes::{BufMut, Bytes, BytesMut};
use std::io;
use tokio_util::codec::{Decoder, Encoder};

use crate::command::AudioHeader;

// ---------------------------------------------------------------------------
// Konstanten
// ---------------------------------------------------------------------------

/// Maximale Laenge einer Zeile in Bytes (ohne `\n`)
pub const MAX_ZEILEN_LAENGE: usize = 8 * 1024;

/// Maximale Groesse eines Binaersegments (16 MB)
pub const MAX_BLOB_GROESSE: usize = 16 * 1024 * 1024;

// ---------------------------------------------------------------------------
// Frame
// ---------------------------------------------------------------------------

/// Ein Frame auf der Leitung: Textzeile oder rohes Binaersegment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Eine Textzeile (ohne das abschliessende `\n`)
    Zeile(String),
    /// Ein exakt-langes Binaersegment (folgt immer auf einen Audio-Header)
    Blob(Bytes),
}

// ---------------------------------------------------------------------------
// FrameCodec
// ---------------------------------------------------------------------------

/// tokio-util Codec fuer das gemischte Zeilen-/Binaer-Framing
///
/// Implementiert `Decoder` und `Encoder<Frame>` fuer die Integration mit
/// `tokio_util::codec::{FramedRead, FramedWrite}`.
#[derive(Debug)]
pub struct FrameCodec {
    /// Maximale Zeilenlaenge in Bytes
    max_zeilen_laenge: usize,
    /// Maximale Blob-Groesse in Bytes
    max_blob_groesse: usize,
    /// Anzahl noch erwarteter Bytes des laufenden Binaersegments
    erwartete_blob_bytes: Option<usize>,
}

impl FrameCodec {
    /// Erstellt einen neuen `FrameCodec` mit Standard-Limits
    pub fn new() -> Self {
        Self {
            max_zeilen_laenge: MAX_ZEILEN_LAENGE,
            max_blob_groesse: MAX_BLOB_GROESSE,
            erwartete_blob_bytes: None,
        }
    }

    /// Erstellt einen `FrameCodec` mit benutzerdefinierten Limits
    pub fn mit_limits(max_zeilen_laenge: usize, max_blob_groesse: usize) -> Self {
        Self {
            max_zeilen_laenge,
            max_blob_groesse,
            erwartete_blob_bytes: None,
        }
    }

    /// Gibt true zurueck wenn der Codec gerade ein Binaersegment erwartet
    pub fn im_binaermodus(&self) -> bool {
        self.erwartete_blob_bytes.is_some()
    }

    /// Dekodiert eine vollstaendige Zeile aus dem Puffer
    fn zeile_dekodieren(&mut self, src: &mut BytesMut, pos: usize) -> io::Result<Frame> {
        let mut zeile = src.split_to(pos + 1);
        zeile.truncate(pos); // '\n' abschneiden
        if zeile.last() == Some(&b'\r') {
            let neu = zeile.len() - 1;
            zeile.truncate(neu);
        }

        let text = String::from_utf8(zeile.to_vec()).map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Zeile ist kein gueltiges UTF-8: {}", e),
            )
        })?;

        // Gueltiger Audio-Header schaltet den Codec in den Binaermodus.
        // Ein ungueltiger Header bleibt eine gewoehnliche Zeile und wird
        // oberhalb des Codecs als Protokollfehler abgewiesen.
        if let Some(header) = AudioHeader::parse(&text) {
            if header.laenge > self.max_blob_groesse {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "Audio-Segment zu gross: {} Bytes (Maximum: {} Bytes)",
                        header.laenge, self.max_blob_groesse
                    ),
                ));
            }
            self.erwartete_blob_bytes = Some(header.laenge);
        }

        Ok(Frame::Zeile(text))
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Decoder-Implementierung
// ---------------------------------------------------------------------------

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // Binaermodus: exakt die angekuendigte Byteanzahl verbrauchen
        if let Some(laenge) = self.erwartete_blob_bytes {
            if src.len() < laenge {
                // Speicher vorbelegen um Reallocations zu vermeiden
                src.reserve(laenge - src.len());
                return Ok(None);
            }
            self.erwartete_blob_bytes = None;
            let blob = src.split_to(laenge).freeze();
            return Ok(Some(Frame::Blob(blob)));
        }

        // Zeilenmodus: bis zum naechsten '\n' lesen
        match src.iter().position(|b| *b == b'\n') {
            Some(pos) => {
                if pos > self.max_zeilen_laenge {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!(
                            "Zeile zu lang: {} Bytes (Maximum: {} Bytes)",
                            pos, self.max_zeilen_laenge
                        ),
                    ));
                }
                self.zeile_dekodieren(src, pos).map(Some)
            }
            None => {
                if src.len() > self.max_zeilen_laenge {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!(
                            "Zeile zu lang: mehr als {} Bytes ohne Zeilenende",
                            self.max_zeilen_laenge
                        ),
                    ));
                }
                Ok(None)
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }

        // Stream zu Ende waehrend ein Binaersegment noch offen war:
        // das Segment ist abgeschnitten und darf nicht weitergereicht werden.
        if let Some(erwartet) = self.erwartete_blob_bytes {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "Stream endete mitten im Audio-Segment: {} von {} Bytes empfangen",
                    src.len(),
                    erwartet
                ),
            ));
        }

        if src.is_empty() {
            Ok(None)
        } else {
            Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "Stream endete mitten in einer Zeile",
            ))
        }
    }
}

// ---------------------------------------------------------------------------
// Encoder-Implementierung
// ---------------------------------------------------------------------------

impl Encoder<Frame> for FrameCodec {
    type Error = io::Error;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            Frame::Zeile(text) => {
                if text.contains('\n') {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "Zeilen-Frame darf kein eingebettetes '\\n' enthalten",
                    ));
                }
                dst.reserve(text.len() + 1);
                dst.put_slice(text.as_bytes());
                dst.put_u8(b'\n');
            }
            Frame::Blob(daten) => {
                dst.reserve(daten.len());
                dst.put_slice(&daten);
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

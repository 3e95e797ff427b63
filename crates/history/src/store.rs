//! HistoryStore – eine Logdatei pro Gespraechs-Schluessel
//!
//! Eintraege rendern als eine Zeile pro Datensatz:
//!
//! ```text
//! [2026-08-07 12:30:05] [TEXT] anna -> band : probe um acht
//! [2026-08-07 12:31:10] [AUDIO] ben -> band : riff.wav
//! ```
//!
//! Anhaengen ist die einzige mutierende Operation. Ein Store-weiter
//! async-Mutex serialisiert alle Dateizugriffe; er wird nur um die
//! jeweilige Dateioperation gehalten, nie ueber Netzwerk-I/O.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::error::{HistoryError, HistoryResult};

// ---------------------------------------------------------------------------
// Gespraechs-Schluessel
// ---------------------------------------------------------------------------

/// Verlaufs-Schluessel fuer Rundruf-Nachrichten an alle Benutzer
pub const RUNDRUF_SCHLUESSEL: &str = "alle";

/// Kanonischer Schluessel fuer einen Privatchat zwischen zwei Benutzern
///
/// Beide Namen werden kleingeschrieben und lexikographisch sortiert, damit
/// beide Richtungen im selben Log landen: `anna`+`Ben` -> `anna_ben`.
pub fn gespraechs_schluessel(a: &str, b: &str) -> String {
    let a = a.trim().to_lowercase();
    let b = b.trim().to_lowercase();
    if a <= b {
        format!("{}_{}", a, b)
    } else {
        format!("{}_{}", b, a)
    }
}

// ---------------------------------------------------------------------------
// Eintrag
// ---------------------------------------------------------------------------

/// Art eines Verlaufs-Eintrags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EintragsArt {
    Text,
    Audio,
}

impl EintragsArt {
    fn bezeichnung(&self) -> &'static str {
        match self {
            EintragsArt::Text => "TEXT",
            EintragsArt::Audio => "AUDIO",
        }
    }
}

/// Ein einzelner Verlaufs-Eintrag
///
/// `inhalt` ist der Nachrichtentext bzw. bei Audio der Dateiname des Blobs.
#[derive(Debug, Clone)]
pub struct VerlaufsEintrag {
    pub zeitpunkt: DateTime<Utc>,
    pub art: EintragsArt,
    pub absender: String,
    pub schluessel: String,
    pub inhalt: String,
}

impl VerlaufsEintrag {
    /// Erstellt einen Eintrag mit dem aktuellen Zeitpunkt
    pub fn jetzt(
        art: EintragsArt,
        absender: impl Into<String>,
        schluessel: impl Into<String>,
        inhalt: impl Into<String>,
    ) -> Self {
        Self {
            zeitpunkt: Utc::now(),
            art,
            absender: absender.into(),
            schluessel: schluessel.into(),
            inhalt: inhalt.into(),
        }
    }

    /// Rendert den Eintrag als Logzeile
    pub fn als_zeile(&self) -> String {
        format!(
            "[{}] [{}] {} -> {} : {}",
            self.zeitpunkt.format("%Y-%m-%d %H:%M:%S"),
            self.art.bezeichnung(),
            self.absender,
            self.schluessel,
            self.inhalt
        )
    }
}

// ---------------------------------------------------------------------------
// HistoryStore
// ---------------------------------------------------------------------------

/// Append-only Verlaufs-Speicher, eine Datei pro Gespraechs-Schluessel
///
/// Thread-safe via Arc + Mutex. Clone teilt den inneren Zustand.
#[derive(Clone)]
pub struct HistoryStore {
    inner: Arc<HistoryStoreInner>,
}

struct HistoryStoreInner {
    basis_verzeichnis: PathBuf,
    /// Serialisiert alle Dateizugriffe dieses Stores
    datei_lock: Mutex<()>,
}

impl HistoryStore {
    /// Erstellt einen Store mit dem angegebenen Basisverzeichnis
    pub fn neu(basis_verzeichnis: impl Into<PathBuf>) -> Self {
        Self {
            inner: Arc::new(HistoryStoreInner {
                basis_verzeichnis: basis_verzeichnis.into(),
                datei_lock: Mutex::new(()),
            }),
        }
    }

    /// Haengt einen Eintrag an das Log seines Gespraechs an
    pub async fn anhaengen(&self, eintrag: &VerlaufsEintrag) -> HistoryResult<()> {
        let pfad = self.pfad_fuer(&eintrag.schluessel)?;
        let zeile = eintrag.als_zeile();

        let _lock = self.inner.datei_lock.lock().await;
        if let Some(parent) = pfad.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut datei = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&pfad)
            .await?;
        datei.write_all(zeile.as_bytes()).await?;
        datei.write_all(b"\n").await?;
        datei.flush().await?;

        tracing::debug!(
            schluessel = %eintrag.schluessel,
            art = eintrag.art.bezeichnung(),
            absender = %eintrag.absender,
            "Verlaufs-Eintrag angehaengt"
        );
        Ok(())
    }

    /// Liest alle Zeilen eines Gespraechs in Anhaenge-Reihenfolge
    pub async fn alles_lesen(&self, schluessel: &str) -> HistoryResult<Vec<String>> {
        let pfad = self.pfad_fuer(schluessel)?;
        let _lock = self.inner.datei_lock.lock().await;
        zeilen_lesen(&pfad).await
    }

    /// Liest die letzten `anzahl` Zeilen (oder weniger, falls kuerzer)
    pub async fn letzte_lesen(
        &self,
        schluessel: &str,
        anzahl: usize,
    ) -> HistoryResult<Vec<String>> {
        let pfad = self.pfad_fuer(schluessel)?;
        let _lock = self.inner.datei_lock.lock().await;
        let mut zeilen = zeilen_lesen(&pfad).await?;
        let ab = zeilen.len().saturating_sub(anzahl);
        Ok(zeilen.split_off(ab))
    }

    /// Sucht Zeilen die den Begriff enthalten (case-insensitiv)
    pub async fn suchen(&self, schluessel: &str, begriff: &str) -> HistoryResult<Vec<String>> {
        let pfad = self.pfad_fuer(schluessel)?;
        let begriff = begriff.to_lowercase();
        let _lock = self.inner.datei_lock.lock().await;
        let zeilen = zeilen_lesen(&pfad).await?;
        Ok(zeilen
            .into_iter()
            .filter(|z| z.to_lowercase().contains(&begriff))
            .collect())
    }

    /// Berechnet den Dateipfad fuer einen Gespraechs-Schluessel
    ///
    /// Whitespace wird zu `_`; Pfadtrenner im Schluessel sind ungueltig.
    fn pfad_fuer(&self, schluessel: &str) -> HistoryResult<PathBuf> {
        let schluessel = schluessel.trim();
        if schluessel.is_empty() || schluessel.contains(['/', '\\', '.']) {
            return Err(HistoryError::UngueltigerSchluessel(schluessel.to_string()));
        }
        let sicher: String = schluessel
            .chars()
            .map(|c| if c.is_whitespace() { '_' } else { c })
            .collect();
        Ok(self
            .inner
            .basis_verzeichnis
            .join(format!("verlauf_{}.txt", sicher)))
    }
}

/// Liest alle Zeilen einer Logdatei; fehlende Datei ergibt ein leeres Log
async fn zeilen_lesen(pfad: &Path) -> HistoryResult<Vec<String>> {
    match tokio::fs::read_to_string(pfad).await {
        Ok(inhalt) => Ok(inhalt.lines().map(str::to_string).collect()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e.into()),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> (tempfile::TempDir, HistoryStore) {
        let dir = tempfile::tempdir().expect("Tempdir muss anlegbar sein");
        let store = HistoryStore::neu(dir.path());
        (dir, store)
    }

    fn text_eintrag(absender: &str, schluessel: &str, inhalt: &str) -> VerlaufsEintrag {
        VerlaufsEintrag::jetzt(EintragsArt::Text, absender, schluessel, inhalt)
    }

    #[test]
    fn gespraechs_schluessel_kanonisch() {
        assert_eq!(gespraechs_schluessel("anna", "ben"), "anna_ben");
        assert_eq!(gespraechs_schluessel("ben", "anna"), "anna_ben");
        // Case-insensitiv: beide Richtungen und Schreibweisen landen im selben Log
        assert_eq!(gespraechs_schluessel("Ben", "ANNA"), "anna_ben");
    }

    #[test]
    fn eintrag_zeilenformat() {
        let eintrag = text_eintrag("anna", "band", "probe um acht");
        let zeile = eintrag.als_zeile();
        assert!(zeile.contains("[TEXT] anna -> band : probe um acht"));
        assert!(zeile.starts_with('['));
    }

    #[tokio::test]
    async fn anhaengen_und_alles_lesen_in_reihenfolge() {
        let (_dir, store) = test_store();

        for i in 0..5 {
            store
                .anhaengen(&text_eintrag("anna", "band", &format!("nachricht {}", i)))
                .await
                .unwrap();
        }

        let zeilen = store.alles_lesen("band").await.unwrap();
        assert_eq!(zeilen.len(), 5);
        for (i, zeile) in zeilen.iter().enumerate() {
            assert!(
                zeile.ends_with(&format!("nachricht {}", i)),
                "Reihenfolge muss der Anhaenge-Reihenfolge entsprechen"
            );
        }
    }

    #[tokio::test]
    async fn letzte_lesen_begrenzt() {
        let (_dir, store) = test_store();

        for i in 0..10 {
            store
                .anhaengen(&text_eintrag("ben", "band", &format!("n{}", i)))
                .await
                .unwrap();
        }

        let zeilen = store.letzte_lesen("band", 3).await.unwrap();
        assert_eq!(zeilen.len(), 3);
        assert!(zeilen[0].ends_with("n7"));
        assert!(zeilen[2].ends_with("n9"));

        // Mehr anfordern als vorhanden: alles zurueckgeben
        let zeilen = store.letzte_lesen("band", 100).await.unwrap();
        assert_eq!(zeilen.len(), 10);
    }

    #[tokio::test]
    async fn suchen_case_insensitiv() {
        let (_dir, store) = test_store();

        store
            .anhaengen(&text_eintrag("anna", "band", "Probe am Montag"))
            .await
            .unwrap();
        store
            .anhaengen(&text_eintrag("ben", "band", "bin dabei"))
            .await
            .unwrap();

        let treffer = store.suchen("band", "PROBE").await.unwrap();
        assert_eq!(treffer.len(), 1);
        assert!(treffer[0].contains("Probe am Montag"));

        let treffer = store.suchen("band", "fehlt").await.unwrap();
        assert!(treffer.is_empty());
    }

    #[tokio::test]
    async fn leeres_gespraech_liest_leer() {
        let (_dir, store) = test_store();
        let zeilen = store.alles_lesen("niemand").await.unwrap();
        assert!(zeilen.is_empty());
    }

    #[tokio::test]
    async fn getrennte_gespraeche_getrennte_dateien() {
        let (_dir, store) = test_store();

        store
            .anhaengen(&text_eintrag("anna", "band", "fuer die band"))
            .await
            .unwrap();
        store
            .anhaengen(&text_eintrag(
                "anna",
                &gespraechs_schluessel("anna", "ben"),
                "nur fuer ben",
            ))
            .await
            .unwrap();

        assert_eq!(store.alles_lesen("band").await.unwrap().len(), 1);
        assert_eq!(store.alles_lesen("anna_ben").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn audio_eintrag_mit_dateiname() {
        let (_dir, store) = test_store();

        store
            .anhaengen(&VerlaufsEintrag::jetzt(
                EintragsArt::Audio,
                "anna",
                "band",
                "riff.wav",
            ))
            .await
            .unwrap();

        let zeilen = store.alles_lesen("band").await.unwrap();
        assert_eq!(zeilen.len(), 1);
        assert!(zeilen[0].contains("[AUDIO] anna -> band : riff.wav"));
    }

    #[tokio::test]
    async fn schluessel_mit_leerzeichen_wird_sicher() {
        let (_dir, store) = test_store();

        store
            .anhaengen(&text_eintrag("anna", "laute truppe", "hallo"))
            .await
            .unwrap();

        let zeilen = store.alles_lesen("laute truppe").await.unwrap();
        assert_eq!(zeilen.len(), 1);
    }

    #[tokio::test]
    async fn pfad_schluessel_abgelehnt() {
        let (_dir, store) = test_store();
        let eintrag = text_eintrag("anna", "../boese", "x");
        assert!(store.anhaengen(&eintrag).await.is_err());
        assert!(store.alles_lesen("a/b").await.is_err());
    }

    #[tokio::test]
    async fn clone_teilt_inneren_state() {
        let (_dir, store1) = test_store();
        let store2 = store1.clone();

        store1
            .anhaengen(&text_eintrag("anna", "band", "geteilt"))
            .await
            .unwrap();

        assert_eq!(store2.alles_lesen("band").await.unwrap().len(), 1);
    }
}

//! tratsch-server – Bibliotheks-Root
//!
//! Deklariert die Server-Module und stellt den oeffentlichen
//! Einstiegspunkt fuer Integrationstests bereit.

pub mod config;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::watch;

use config::ServerConfig;
use tratsch_history::HistoryStore;
use tratsch_relay::{RelayServer, RelayState};
use tratsch_voice::VoiceRoomManager;

/// Haelt den laufenden Server-Zustand zusammen
pub struct Server {
    pub config: ServerConfig,
}

impl Server {
    /// Erstellt einen neuen Server aus der gegebenen Konfiguration
    pub fn neu(config: ServerConfig) -> Self {
        Self { config }
    }

    /// Startet alle Server-Subsysteme und laeuft bis zum Shutdown-Signal
    ///
    /// Reihenfolge:
    /// 1. Dienste-Verbund erstellen (Directory, Engine, Verlauf, Voice)
    /// 2. TCP-Listener binden und Accept-Loop starten
    /// 3. Auf Ctrl-C warten, dann Shutdown-Signal an alle Tasks
    pub async fn starten(self) -> Result<()> {
        tracing::info!(
            server_name = %self.config.server.name,
            tcp = %self.config.tcp_bind_adresse(),
            verlauf = %self.config.verlauf.verzeichnis,
            "Server startet"
        );

        let verlauf = HistoryStore::neu(&self.config.verlauf.verzeichnis);
        let voice = VoiceRoomManager::neu();
        let state = Arc::new(
            RelayState::neu(verlauf, voice).mit_max_clients(self.config.server.max_clients),
        );

        let bind_addr: SocketAddr = self
            .config
            .tcp_bind_adresse()
            .parse()
            .with_context(|| format!("Ungueltige Bind-Adresse: {}", self.config.tcp_bind_adresse()))?;

        let relay = RelayServer::binden(Arc::clone(&state), bind_addr)
            .await
            .context("TCP-Listener konnte nicht gebunden werden")?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let relay_task = tokio::spawn(async move { relay.starten(shutdown_rx).await });

        tracing::info!("Server laeuft. Warte auf Shutdown-Signal (Ctrl-C)...");
        tokio::signal::ctrl_c()
            .await
            .context("Ctrl-C-Handler fehlgeschlagen")?;
        tracing::info!("Shutdown-Signal empfangen, Server wird beendet");

        let _ = shutdown_tx.send(true);
        let _ = relay_task.await;

        tracing::info!("Server beendet");
        Ok(())
    }
}

//! Message-Dispatcher – zentraler Konsument aller eingehenden Frames
//!
//! Der Dispatcher ist ein einzelner Task ueber einer Multi-Producer-Queue:
//! alle Lese-Tasks speisen ihre Frames hier ein, die Verarbeitung ist
//! synchron und kurz. Dadurch sind alle Zustandsmutationen total geordnet
//! und der Broadcast-Fan-out kommt ohne feingranulare Locks aus.
//!
//! ## Zustandspruefung
//! - `Verbunden`: nur `Version` ist erlaubt
//! - `VersionGesendet`: nur `Authenticate` ist erlaubt
//! - `Authentifiziert`: Routing ueber die Handler-Tabelle
//! - `Tot`: Frames werden verworfen
//!
//! Jede andere Kombination ist ein Protokollverstoss; der Client wird auf
//! `Tot` gesetzt, in Handshake-Zustaenden geht vorher ein Reject raus.

use std::sync::Arc;

use murmel_protocol::messages::{self, ControlFrame, MessageKind};
use murmel_protocol::ping::SERVER_VERSION_GEPACKT;
use tokio::sync::mpsc;

use crate::channels::ROOT_KANAL;
use crate::client::{ClientConnection, VerbindungsZustand};
use crate::error::{ServerError, ServerResult};
use crate::handlers;
use crate::server_state::ServerState;

/// Ereignisse auf der Dispatcher-Queue
#[derive(Debug)]
pub enum DispatcherEreignis {
    /// Vollstaendig geparster Frame eines Clients
    Frame(Arc<ClientConnection>, ControlFrame),
    /// Lese-Task eines Clients hat sich beendet
    Getrennt(Arc<ClientConnection>),
}

/// Zentraler Message-Dispatcher
///
/// Konsumiert die eingehende Queue in FIFO-Reihenfolge und treibt die
/// State Machine jedes Clients. Fehler eines Clients beruehren weder den
/// Dispatcher noch andere Clients.
pub struct MessageDispatcher {
    state: Arc<ServerState>,
}

impl MessageDispatcher {
    /// Erstellt einen neuen Dispatcher
    pub fn neu(state: Arc<ServerState>) -> Self {
        Self { state }
    }

    /// Konsumiert die Queue bis alle Sender geschlossen sind
    pub async fn starten(self, mut rx: mpsc::UnboundedReceiver<DispatcherEreignis>) {
        tracing::info!("Dispatcher gestartet");
        while let Some(ereignis) = rx.recv().await {
            self.verarbeiten(ereignis);
        }
        tracing::info!("Dispatcher beendet");
    }

    /// Verarbeitet ein einzelnes Ereignis (synchron)
    pub fn verarbeiten(&self, ereignis: DispatcherEreignis) {
        match ereignis {
            DispatcherEreignis::Getrennt(client) => self.abmelden(&client),
            DispatcherEreignis::Frame(client, frame) => {
                // Tote Clients ernten bevor Broadcasts entstehen
                self.tote_ernten();

                if let Err(fehler) = self.frame_verarbeiten(&client, &frame) {
                    self.verbindung_beenden(&client, &fehler);
                }
            }
        }
    }

    /// Treibt die State Machine eines Clients fuer einen Frame
    ///
    /// Jeder Fehler betrifft genau diesen Client und fuehrt ueber
    /// `verbindung_beenden` zu dessen Ende.
    fn frame_verarbeiten(
        &self,
        client: &Arc<ClientConnection>,
        frame: &ControlFrame,
    ) -> ServerResult<()> {
        match client.zustand() {
            VerbindungsZustand::Tot => Ok(()),
            VerbindungsZustand::Authentifiziert => {
                handlers::verarbeite_authentifiziert(&self.state, client, frame)
            }
            VerbindungsZustand::VersionGesendet => {
                if frame.kind == MessageKind::Authenticate {
                    handlers::auth_handler::anmelden(&self.state, client, frame)
                } else {
                    Err(ServerError::UnerwarteteNachricht {
                        zustand: client.zustand().to_string(),
                        kind: frame.kind.to_string(),
                    })
                }
            }
            VerbindungsZustand::Verbunden => {
                if frame.kind == MessageKind::Version {
                    self.version_austausch(client, frame)
                } else {
                    Err(ServerError::UnerwarteteNachricht {
                        zustand: client.zustand().to_string(),
                        kind: frame.kind.to_string(),
                    })
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Handshake
    // -----------------------------------------------------------------------

    /// Erste Nachricht des Clients: Version speichern, eigene Version senden
    fn version_austausch(
        &self,
        client: &Arc<ClientConnection>,
        frame: &ControlFrame,
    ) -> ServerResult<()> {
        let version: messages::Version = frame.dekodieren()?;

        tracing::debug!(
            session = client.session,
            release = version.release.as_deref().unwrap_or(""),
            os = version.os.as_deref().unwrap_or(""),
            "Client-Version empfangen"
        );
        client.client_version_setzen(version);

        client.nachricht_senden(
            MessageKind::Version,
            &messages::Version {
                version: Some(SERVER_VERSION_GEPACKT),
                release: Some(format!("Murmel {}", env!("CARGO_PKG_VERSION"))),
                os: Some(std::env::consts::OS.into()),
                os_version: None,
            },
        );

        client.zustand_setzen(VerbindungsZustand::VersionGesendet);
        Ok(())
    }

    /// Beendet die Verbindung eines Clients nach einem Fehler
    ///
    /// In Handshake-Zustaenden geht vor dem Tod ein Reject raus. Der
    /// Fehler beruehrt weder den Dispatcher noch andere Clients.
    fn verbindung_beenden(&self, client: &Arc<ClientConnection>, fehler: &ServerError) {
        let zustand = client.zustand();
        tracing::warn!(
            session = client.session,
            peer = %client.tcp_adresse,
            fehler = %fehler,
            "Client-Fehler, Verbindung wird beendet"
        );

        if matches!(
            zustand,
            VerbindungsZustand::Verbunden | VerbindungsZustand::VersionGesendet
        ) {
            client.nachricht_senden(
                MessageKind::Reject,
                &messages::Reject {
                    typ: Some(messages::RejectType::None as i32),
                    reason: Some(fehler.to_string()),
                },
            );
        }
        client.tot_markieren();
    }

    // -----------------------------------------------------------------------
    // Abmeldung und Ernte
    // -----------------------------------------------------------------------

    /// Entfernt einen Client endgueltig aus dem Roster
    fn abmelden(&self, client: &Arc<ClientConnection>) {
        client.tot_markieren();

        // Doppelte Trennungsmeldungen sind harmlos
        if self.state.roster.entfernen(client.session).is_none() {
            return;
        }

        tracing::info!(
            session = client.session,
            peer = %client.tcp_adresse,
            benutzer = client.benutzername().as_deref().unwrap_or(""),
            "Client abgemeldet"
        );

        self.nach_abgang(client);
        self.state.codec_abgleich();
    }

    /// Erntet tote Clients vor dem naechsten Broadcast
    fn tote_ernten(&self) {
        let geerntet = self.state.roster.tote_ernten();
        if geerntet.is_empty() {
            return;
        }

        let mut roster_geaendert = false;
        for client in &geerntet {
            tracing::debug!(session = client.session, "Toter Client geerntet");
            self.nach_abgang(client);
            roster_geaendert |= client.war_angemeldet();
        }

        if roster_geaendert {
            self.state.codec_abgleich();
        }
    }

    /// Broadcast und Kanal-Aufraeumen nach dem Abgang eines Clients
    fn nach_abgang(&self, client: &Arc<ClientConnection>) {
        if !client.war_angemeldet() {
            return;
        }

        self.state.roster.nachricht_an_alle(
            MessageKind::UserRemove,
            &messages::UserRemove {
                session: Some(client.session),
                ..Default::default()
            },
        );

        let kanal = client.kanal_id();
        if kanal != ROOT_KANAL {
            self.state.kanal_aufraeumen(kanal);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

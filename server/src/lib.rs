//! murmel-server – Bibliotheks-Root
//!
//! Deklariert alle Server-Module und verdrahtet die Subsysteme: TLS-
//! Acceptor, zentraler Dispatcher, UDP-Ingress/-Egress und die drei
//! IO-Tasks pro Client. Der oeffentliche Einstiegspunkt steht auch den
//! Integrationstests zur Verfuegung.

pub mod channels;
pub mod client;
pub mod codec;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod handlers;
pub mod roster;
pub mod server_state;
pub mod tls;
pub mod udp;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::{mpsc, watch};
use tokio_rustls::TlsAcceptor;

use crate::client::ClientConnection;
use crate::config::ServerConfig;
use crate::dispatcher::MessageDispatcher;
use crate::server_state::ServerState;

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
    /// 1. TLS-Acceptor bauen (Dateien oder Entwicklungszertifikat)
    /// 2. TCP-Listener und UDP-Socket auf demselben Port binden
    /// 3. Dispatcher, UDP-Sende- und UDP-Empfangs-Task starten
    /// 4. Accept-Loop bis Ctrl-C
    /// 5. Shutdown: Acceptor stoppt zuerst, dann werden alle Clients als
    ///    tot markiert und die UDP-Tasks beendet
    pub async fn starten(self) -> Result<()> {
        let acceptor = tls::acceptor_erstellen(&self.config).await?;

        let tcp_listener = TcpListener::bind(self.config.tcp_bind_adresse()).await?;
        let udp_socket = Arc::new(UdpSocket::bind(self.config.udp_bind_adresse()).await?);

        let (udp_tx, udp_rx) = mpsc::unbounded_channel();
        let (dispatcher_tx, dispatcher_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let state = Arc::new(ServerState::neu(self.config, udp_tx, dispatcher_tx));

        tracing::info!(
            server_name = %state.config.server.name,
            tcp = %state.config.tcp_bind_adresse(),
            udp = %state.config.udp_bind_adresse(),
            max_benutzer = state.config.server.max_benutzer,
            "Murmel-Instanz gestartet"
        );

        // Serverweite Tasks
        let dispatcher = MessageDispatcher::neu(Arc::clone(&state));
        tokio::spawn(dispatcher.starten(dispatcher_rx));
        tokio::spawn(udp::sende_schleife(Arc::clone(&udp_socket), udp_rx));
        tokio::spawn(udp::empfangs_schleife(
            Arc::clone(&state),
            Arc::clone(&udp_socket),
            shutdown_rx.clone(),
        ));

        // Accept-Loop bis zum Shutdown-Signal
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        loop {
            tokio::select! {
                ergebnis = tcp_listener.accept() => {
                    match ergebnis {
                        Ok((stream, peer)) => {
                            let acceptor = acceptor.clone();
                            let state = Arc::clone(&state);
                            tokio::spawn(async move {
                                tls_handshake_und_start(acceptor, stream, peer, state).await;
                            });
                        }
                        Err(e) => {
                            tracing::error!(fehler = %e, "TCP-Accept-Fehler");
                            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                        }
                    }
                }

                _ = &mut ctrl_c => {
                    tracing::info!("Shutdown-Signal empfangen");
                    break;
                }
            }
        }

        // Shutdown: Acceptor ist bereits gestoppt, jetzt Clients beenden
        let _ = shutdown_tx.send(true);
        for client in state.roster.alle() {
            client.tot_markieren();
        }

        tracing::info!("Server beendet");
        Ok(())
    }
}

/// Erzwingt den TLS-Handshake und startet danach die Client-Session
///
/// Der Handshake laeuft vollstaendig bevor der Client zugelassen wird,
/// damit ein eventuell praesentiertes Peer-Zertifikat verfuegbar ist.
/// Handshake-Fehler schliessen die Verbindung kommentarlos.
async fn tls_handshake_und_start(
    acceptor: TlsAcceptor,
    stream: TcpStream,
    peer: SocketAddr,
    state: Arc<ServerState>,
) {
    let tls_stream = match acceptor.accept(stream).await {
        Ok(tls_stream) => tls_stream,
        Err(e) => {
            tracing::warn!(peer = %peer, fehler = %e, "TLS-Handshake fehlgeschlagen");
            return;
        }
    };

    // Peer-Zertifikat wird gelesen, aber nicht validiert
    let zertifikat_praesentiert = tls_stream
        .get_ref()
        .1
        .peer_certificates()
        .map(|certs| !certs.is_empty())
        .unwrap_or(false);

    tracing::info!(
        peer = %peer,
        zertifikat = zertifikat_praesentiert,
        "Client verbunden"
    );

    verbindung_starten(&state, tls_stream, peer);
}

/// Registriert eine fertig ausgehandelte Verbindung und startet ihre Tasks
///
/// Vergibt die naechste Session-ID, nimmt den Client in den Roster auf und
/// spawnt Lese-, Schreib- und UDP-Inbox-Task. Generisch ueber den Stream,
/// damit Integrationstests mit In-Memory-Duplexen arbeiten koennen.
pub fn verbindung_starten<S>(
    state: &Arc<ServerState>,
    stream: S,
    adresse: SocketAddr,
) -> Arc<ClientConnection>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let session = state.naechste_session();
    let (client, kanaele) = ClientConnection::neu(session, adresse);
    state.roster.einfuegen(Arc::clone(&client));

    tracing::debug!(session = session, peer = %adresse, "Client-Tasks gestartet");

    let (lese_haelfte, schreib_haelfte) = tokio::io::split(stream);

    tokio::spawn(client::lese_schleife(
        Arc::clone(&client),
        lese_haelfte,
        state.dispatcher_tx.clone(),
        state.config.limits.max_frame_groesse,
        kanaele.schliessen_rx.clone(),
    ));
    tokio::spawn(client::schreib_schleife(
        Arc::clone(&client),
        schreib_haelfte,
        kanaele.sende_rx,
        kanaele.schliessen_rx.clone(),
    ));
    tokio::spawn(udp::udp_inbox_schleife(
        Arc::clone(state),
        Arc::clone(&client),
        kanaele.udp_inbox_rx,
        kanaele.schliessen_rx,
    ));

    client
}

//! Handler-Tabelle fuer authentifizierte Clients
//!
//! Der Dispatcher routet jede Nachricht eines authentifizierten Clients
//! anhand ihrer Kennung in genau einen Handler. Alle Handler sind
//! synchron und geben `ServerResult` zurueck: nicht dekodierbare Payloads
//! und Krypto-Fehler wandern als `Err` zum Dispatcher, der die Verbindung
//! des betroffenen Clients beendet. Antworten und Broadcasts werden
//! nicht-blockierend in die Sende-Queues eingereiht.

pub mod auth_handler;
pub mod channel_handler;
pub mod chat_handler;
pub mod client_handler;
pub mod crypt_handler;
pub mod query_handler;
pub mod voice_handler;

use std::sync::Arc;

use murmel_protocol::messages::{self, ControlFrame, DenyType, MessageKind};

use crate::client::ClientConnection;
use crate::error::ServerResult;
use crate::server_state::ServerState;

/// Routet eine Nachricht eines authentifizierten Clients
pub fn verarbeite_authentifiziert(
    state: &Arc<ServerState>,
    client: &Arc<ClientConnection>,
    frame: &ControlFrame,
) -> ServerResult<()> {
    match frame.kind {
        MessageKind::Ping => crypt_handler::ping(client, frame),
        MessageKind::CryptSetup => crypt_handler::crypt_setup(client, frame),
        MessageKind::UdpTunnel => voice_handler::udp_tunnel(state, client, frame),

        MessageKind::UserState => client_handler::user_state(state, client, frame),
        MessageKind::UserRemove => client_handler::user_remove(client, frame),
        MessageKind::UserStats => client_handler::user_stats(state, client, frame),

        MessageKind::ChannelState => channel_handler::channel_state(state, client, frame),
        MessageKind::ChannelRemove => channel_handler::channel_remove(client, frame),

        MessageKind::TextMessage => chat_handler::text_message(state, client, frame),

        MessageKind::Acl => query_handler::acl(client, frame),
        MessageKind::QueryUsers => query_handler::query_users(state, client, frame),
        MessageKind::BanList => query_handler::ban_list(state, client, frame),
        MessageKind::PermissionQuery => query_handler::permission_query(client, frame),
        MessageKind::UserList => query_handler::user_list(client),
        MessageKind::RequestBlob => query_handler::request_blob(state, client, frame),

        MessageKind::CodecVersion => {
            // Der Server ist fuer die Codec-Slots autoritativ
            tracing::debug!(session = client.session, "CodecVersion vom Client ignoriert");
            Ok(())
        }

        MessageKind::VoiceTarget
        | MessageKind::ContextActionModify
        | MessageKind::ContextAction => {
            // Angenommen und quittiert; Detailverhalten liegt ausserhalb
            // dieses Kerns
            tracing::trace!(
                session = client.session,
                kind = %frame.kind,
                "Nachricht angenommen (keine weitere Verarbeitung)"
            );
            Ok(())
        }

        MessageKind::Version | MessageKind::Authenticate => {
            tracing::debug!(
                session = client.session,
                kind = %frame.kind,
                "Handshake-Nachricht nach der Anmeldung ignoriert"
            );
            Ok(())
        }

        MessageKind::Reject
        | MessageKind::ServerSync
        | MessageKind::ServerConfig
        | MessageKind::PermissionDenied => {
            // Reine Server->Client-Nachrichten
            tracing::debug!(
                session = client.session,
                kind = %frame.kind,
                "Server-Nachricht vom Client ignoriert"
            );
            Ok(())
        }
    }
}

/// Weist eine Operation mit PermissionDenied zurueck
pub(crate) fn verweigern(client: &Arc<ClientConnection>, typ: DenyType, grund: &str) {
    client.nachricht_senden(
        MessageKind::PermissionDenied,
        &messages::PermissionDenied {
            typ: Some(typ as i32),
            reason: Some(grund.into()),
            session: Some(client.session),
            ..Default::default()
        },
    );
}

//! Abfrage-Nachrichten: ACL, QueryUsers, BanList, PermissionQuery,
//! UserList, RequestBlob
//!
//! Alles Request/Response-Pfade ohne Broadcast. ACL- und
//! Berechtigungssemantik verwaltet eine hoehere Schicht; hier werden
//! nur die minimalen Snapshots beantwortet, die Clients zum Arbeiten
//! brauchen.

use std::sync::Arc;

use murmel_protocol::messages::{self, ControlFrame, MessageKind};

use crate::client::ClientConnection;
use crate::error::ServerResult;
use crate::server_state::ServerState;

/// Standardrechte fuer alle Benutzer: Traverse, Enter, Speak, Whisper,
/// TextMessage, MakeTempChannel
pub const STANDARD_RECHTE: u32 = 0x2 | 0x4 | 0x8 | 0x100 | 0x200 | 0x400;

/// ACL: minimalen Snapshot des angefragten Kanals zurueckgeben
pub fn acl(client: &Arc<ClientConnection>, frame: &ControlFrame) -> ServerResult<()> {
    let anfrage: messages::Acl = frame.dekodieren()?;

    client.nachricht_senden(
        MessageKind::Acl,
        &messages::Acl {
            channel_id: anfrage.channel_id,
            inherit_acls: Some(true),
            query: None,
        },
    );
    Ok(())
}

/// QueryUsers: Namen und IDs gegen den Roster aufloesen
///
/// Ohne Benutzerdatenbank dient die Session-ID als Benutzer-ID; nicht
/// aufloesbare Eintraege werden weggelassen.
pub fn query_users(
    state: &Arc<ServerState>,
    client: &Arc<ClientConnection>,
    frame: &ControlFrame,
) -> ServerResult<()> {
    let anfrage: messages::QueryUsers = frame.dekodieren()?;

    let mut ids = Vec::new();
    let mut names = Vec::new();

    for name in &anfrage.names {
        if let Some(peer) = state.roster.nach_name(name) {
            ids.push(peer.session);
            names.push(name.clone());
        }
    }
    for id in &anfrage.ids {
        if let Some(peer) = state.roster.nach_session(*id) {
            if let Some(name) = peer.benutzername() {
                ids.push(*id);
                names.push(name);
            }
        }
    }

    client.nachricht_senden(MessageKind::QueryUsers, &messages::QueryUsers { ids, names });
    Ok(())
}

/// BanList: Abfrage liefert die Liste, Schreiben ersetzt sie
pub fn ban_list(
    state: &Arc<ServerState>,
    client: &Arc<ClientConnection>,
    frame: &ControlFrame,
) -> ServerResult<()> {
    let anfrage: messages::BanList = frame.dekodieren()?;

    if anfrage.query.unwrap_or(false) {
        let bans = state.bans.lock().expect("Bann-Lock").clone();
        client.nachricht_senden(
            MessageKind::BanList,
            &messages::BanList {
                bans,
                query: None,
            },
        );
    } else {
        let anzahl = anfrage.bans.len();
        *state.bans.lock().expect("Bann-Lock") = anfrage.bans;
        tracing::info!(
            von = client.session,
            eintraege = anzahl,
            "Bannliste ersetzt"
        );
    }
    Ok(())
}

/// PermissionQuery: Standardrechte fuer den angefragten Kanal melden
pub fn permission_query(client: &Arc<ClientConnection>, frame: &ControlFrame) -> ServerResult<()> {
    let anfrage: messages::PermissionQuery = frame.dekodieren()?;

    client.nachricht_senden(
        MessageKind::PermissionQuery,
        &messages::PermissionQuery {
            channel_id: anfrage.channel_id,
            permissions: Some(STANDARD_RECHTE),
            flush: None,
        },
    );
    Ok(())
}

/// UserList: es gibt keine registrierten Benutzer
pub fn user_list(client: &Arc<ClientConnection>) -> ServerResult<()> {
    client.nachricht_senden(MessageKind::UserList, &messages::UserList { users: Vec::new() });
    Ok(())
}

/// RequestBlob: angefragte Kommentare und Kanalbeschreibungen nachsenden
pub fn request_blob(
    state: &Arc<ServerState>,
    client: &Arc<ClientConnection>,
    frame: &ControlFrame,
) -> ServerResult<()> {
    let anfrage: messages::RequestBlob = frame.dekodieren()?;

    for session in anfrage.session_comment {
        if let Some(peer) = state.roster.nach_session(session) {
            if let Some(kommentar) = peer.kommentar() {
                client.nachricht_senden(
                    MessageKind::UserState,
                    &messages::UserState {
                        session: Some(session),
                        comment: Some(kommentar),
                        ..Default::default()
                    },
                );
            }
        }
    }

    for kanal_id in anfrage.channel_description {
        let beschreibung = state
            .kanaele
            .read()
            .expect("Kanal-Lock")
            .hole(kanal_id)
            .and_then(|kanal| kanal.beschreibung.clone());
        if let Some(beschreibung) = beschreibung {
            client.nachricht_senden(
                MessageKind::ChannelState,
                &messages::ChannelState {
                    channel_id: Some(kanal_id),
                    description: Some(beschreibung),
                    ..Default::default()
                },
            );
        }
    }
    Ok(())
}

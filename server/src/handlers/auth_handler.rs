//! Anmeldung eines Clients
//!
//! Laeuft im Zustand `VersionGesendet` und fuehrt die komplette
//! Anmeldesequenz in fester Reihenfolge aus. Der neue Client muss die
//! Kanal-Liste vor den UserStates sehen (die Kanal-IDs referenzieren)
//! und ServerSync erst nach der kompletten Benutzerliste.

use std::sync::Arc;

use murmel_crypto::CryptState;
use murmel_protocol::messages::{self, ControlFrame, MessageKind, RejectType};

use crate::client::{ClientConnection, VerbindungsZustand};
use crate::error::ServerResult;
use crate::server_state::ServerState;

/// Weist die Anmeldung zurueck und beendet die Verbindung
fn ablehnen(client: &Arc<ClientConnection>, typ: RejectType, grund: &str) {
    tracing::warn!(
        session = client.session,
        peer = %client.tcp_adresse,
        grund = grund,
        "Anmeldung abgelehnt"
    );
    client.nachricht_senden(
        MessageKind::Reject,
        &messages::Reject {
            typ: Some(typ as i32),
            reason: Some(grund.into()),
        },
    );
    client.tot_markieren();
}

/// Fuehrt die Anmeldesequenz aus
///
/// Reihenfolge (alle Schritte vor dem Zustandswechsel zu
/// `Authentifiziert`, sofern nicht anders vermerkt):
/// 1. Benutzername pruefen (leer, vergeben) und Serverlimit pruefen
/// 2. Krypto-Kontext erzeugen
/// 3. CryptSetup senden
/// 4. Beworbene Codecs speichern und Codec-Abgleich fahren
/// 5. Kanal-Liste senden (Root zuerst)
/// 6. Zustand -> Authentifiziert
/// 7. UserState-Broadcast fuer den neuen Client
/// 8. Benutzerliste an den neuen Client
/// 9. ServerSync und ServerConfig
pub fn anmelden(
    state: &Arc<ServerState>,
    client: &Arc<ClientConnection>,
    frame: &ControlFrame,
) -> ServerResult<()> {
    let auth: messages::Authenticate = frame.dekodieren()?;

    // --- 1. Benutzername und Limits ---
    let benutzername = match auth.username.as_deref().map(str::trim) {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => {
            ablehnen(client, RejectType::InvalidUsername, "Benutzername fehlt");
            return Ok(());
        }
    };

    if state.roster.nach_name(&benutzername).is_some() {
        ablehnen(
            client,
            RejectType::UsernameInUse,
            "Benutzername ist bereits verbunden",
        );
        return Ok(());
    }

    if state.roster.anzahl_authentifiziert() >= state.config.server.max_benutzer {
        ablehnen(client, RejectType::ServerFull, "Server ist voll");
        return Ok(());
    }

    client.benutzername_setzen(benutzername.clone());

    // --- 2. Krypto-Kontext ---
    let krypto = CryptState::generieren()?;

    // --- 3. CryptSetup ---
    client.nachricht_senden(
        MessageKind::CryptSetup,
        &messages::CryptSetup {
            key: Some(krypto.schluessel().to_vec()),
            client_nonce: Some(krypto.decrypt_iv().to_vec()),
            server_nonce: Some(krypto.encrypt_iv().to_vec()),
        },
    );
    client.krypto_setzen(krypto);

    // --- 4. Codecs ---
    client.celt_codecs_setzen(auth.celt_versions.clone());
    state.codec_abgleich();

    // --- 5. Kanal-Liste ---
    {
        let baum = state.kanaele.read().expect("Kanal-Lock");
        for kanal in baum.alle_root_zuerst() {
            client.nachricht_senden(
                MessageKind::ChannelState,
                &messages::ChannelState {
                    channel_id: Some(kanal.id),
                    parent: kanal.eltern,
                    name: Some(kanal.name.clone()),
                    description: kanal.beschreibung.clone(),
                    temporary: Some(kanal.temporaer),
                    position: Some(kanal.position),
                    ..Default::default()
                },
            );
        }
    }

    // --- 6. Zustandswechsel ---
    client.zustand_setzen(VerbindungsZustand::Authentifiziert);

    tracing::info!(
        session = client.session,
        benutzer = %benutzername,
        peer = %client.tcp_adresse,
        "Client angemeldet"
    );

    // --- 7. Broadcast des neuen Benutzers (Kanal 0) ---
    state.roster.nachricht_an_alle(
        MessageKind::UserState,
        &messages::UserState {
            session: Some(client.session),
            name: Some(benutzername),
            channel_id: Some(0),
            ..Default::default()
        },
    );

    // --- 8. Benutzerliste an den neuen Client ---
    for peer in state.roster.authentifizierte() {
        if peer.session == client.session {
            continue;
        }
        client.nachricht_senden(
            MessageKind::UserState,
            &messages::UserState {
                session: Some(peer.session),
                name: peer.benutzername(),
                channel_id: Some(peer.kanal_id()),
                self_mute: Some(peer.selbst_stumm()),
                self_deaf: Some(peer.selbst_taub()),
                comment: peer.kommentar(),
                ..Default::default()
            },
        );
    }

    // --- 9. ServerSync und ServerConfig ---
    client.nachricht_senden(
        MessageKind::ServerSync,
        &messages::ServerSync {
            session: Some(client.session),
            max_bandwidth: Some(state.config.server.max_bandbreite),
            welcome_text: state.config.server.willkommen.clone(),
            permissions: None,
        },
    );
    client.nachricht_senden(
        MessageKind::ServerConfig,
        &messages::ServerConfig {
            max_bandwidth: Some(state.config.server.max_bandbreite),
            welcome_text: None,
            allow_html: Some(true),
            message_length: Some(state.config.limits.nachrichten_laenge),
            image_message_length: Some(state.config.limits.bild_nachrichten_laenge),
            max_users: Some(state.config.server.max_benutzer),
        },
    );

    Ok(())
}

//! Kanal-Nachrichten: ChannelState, ChannelRemove
//!
//! Clients duerfen Kanaele anlegen, umbenennen, beschreiben und
//! verschieben; alle Mutationen erhalten die Baum-Invarianten. Eine
//! Mutation, die einen Zyklus erzeugen wuerde, wird mit PermissionDenied
//! abgelehnt und nicht angewandt. Das Loeschen fremder Kanaele bleibt
//! Administratoren vorbehalten (default deny); temporaere Kanaele
//! verschwinden von selbst, sobald sie leer sind.

use std::sync::Arc;

use murmel_protocol::messages::{self, ControlFrame, DenyType, MessageKind};

use crate::channels::{KanalFehler, ROOT_KANAL};
use crate::client::ClientConnection;
use crate::error::ServerResult;
use crate::handlers::verweigern;
use crate::server_state::ServerState;

/// Bildet einen Kanalbaum-Fehler auf eine Verweigerung ab
fn fehler_melden(client: &Arc<ClientConnection>, fehler: &KanalFehler) {
    let typ = match fehler {
        KanalFehler::NameVergeben(_) => DenyType::ChannelName,
        KanalFehler::Zyklus | KanalFehler::WurzelGeschuetzt | KanalFehler::NichtGefunden(_) => {
            DenyType::Permission
        }
    };
    verweigern(client, typ, &fehler.to_string());
}

/// Broadcastet den autoritativen Zustand eines Kanals
fn kanal_broadcasten(state: &Arc<ServerState>, kanal_id: u32) {
    let nachricht = {
        let baum = state.kanaele.read().expect("Kanal-Lock");
        let Some(kanal) = baum.hole(kanal_id) else {
            return;
        };
        messages::ChannelState {
            channel_id: Some(kanal.id),
            parent: kanal.eltern,
            name: Some(kanal.name.clone()),
            description: kanal.beschreibung.clone(),
            temporary: Some(kanal.temporaer),
            position: Some(kanal.position),
            ..Default::default()
        }
    };
    state
        .roster
        .nachricht_an_alle(MessageKind::ChannelState, &nachricht);
}

/// ChannelState: Kanal anlegen oder bestehenden Kanal veraendern
pub fn channel_state(
    state: &Arc<ServerState>,
    client: &Arc<ClientConnection>,
    frame: &ControlFrame,
) -> ServerResult<()> {
    let anfrage: messages::ChannelState = frame.dekodieren()?;

    match anfrage.channel_id {
        None => kanal_anlegen(state, client, anfrage),
        Some(kanal_id) => kanal_aendern(state, client, kanal_id, anfrage),
    }
    Ok(())
}

/// Neuen Kanal anlegen; temporaere Kanaele ziehen ihren Ersteller hinein
fn kanal_anlegen(
    state: &Arc<ServerState>,
    client: &Arc<ClientConnection>,
    anfrage: messages::ChannelState,
) {
    let Some(name) = anfrage.name.as_deref().map(str::trim).filter(|n| !n.is_empty()) else {
        verweigern(client, DenyType::ChannelName, "Kanalname fehlt");
        return;
    };

    let eltern = anfrage.parent.unwrap_or(ROOT_KANAL);
    let temporaer = anfrage.temporary.unwrap_or(false);
    let position = anfrage.position.unwrap_or(0);

    let ergebnis = state.kanaele.write().expect("Kanal-Lock").anlegen(
        name,
        eltern,
        anfrage.description.clone(),
        position,
        temporaer,
    );

    let kanal_id = match ergebnis {
        Ok(id) => id,
        Err(fehler) => {
            fehler_melden(client, &fehler);
            return;
        }
    };

    tracing::info!(
        kanal = kanal_id,
        name = name,
        eltern = eltern,
        temporaer = temporaer,
        von = client.session,
        "Kanal angelegt"
    );
    kanal_broadcasten(state, kanal_id);

    // Der Ersteller eines temporaeren Kanals betritt ihn sofort
    if temporaer {
        let alter_kanal = client.kanal_id();
        client.kanal_setzen(kanal_id);
        state.roster.nachricht_an_alle(
            MessageKind::UserState,
            &messages::UserState {
                session: Some(client.session),
                actor: Some(client.session),
                channel_id: Some(kanal_id),
                ..Default::default()
            },
        );
        if alter_kanal != ROOT_KANAL {
            state.kanal_aufraeumen(alter_kanal);
        }
    }
}

/// Bestehenden Kanal umbenennen, verschieben oder beschreiben
fn kanal_aendern(
    state: &Arc<ServerState>,
    client: &Arc<ClientConnection>,
    kanal_id: u32,
    anfrage: messages::ChannelState,
) {
    {
        let mut baum = state.kanaele.write().expect("Kanal-Lock");

        if !baum.existiert(kanal_id) {
            drop(baum);
            verweigern(client, DenyType::Permission, "Kanal existiert nicht");
            return;
        }

        if let Some(name) = anfrage.name.as_deref() {
            if let Err(fehler) = baum.umbenennen(kanal_id, name) {
                drop(baum);
                fehler_melden(client, &fehler);
                return;
            }
        }

        if let Some(neue_eltern) = anfrage.parent {
            if let Err(fehler) = baum.verschieben(kanal_id, neue_eltern) {
                drop(baum);
                fehler_melden(client, &fehler);
                return;
            }
        }

        if let Some(beschreibung) = anfrage.description {
            if let Err(fehler) = baum.beschreibung_setzen(kanal_id, beschreibung) {
                drop(baum);
                fehler_melden(client, &fehler);
                return;
            }
        }
    }

    tracing::debug!(kanal = kanal_id, von = client.session, "Kanal veraendert");
    kanal_broadcasten(state, kanal_id);
}

/// ChannelRemove: ohne Privilegienmodell immer verweigert
///
/// Temporaere Kanaele werden stattdessen automatisch aufgeraeumt, sobald
/// sie leer sind.
pub fn channel_remove(client: &Arc<ClientConnection>, frame: &ControlFrame) -> ServerResult<()> {
    let _anfrage: messages::ChannelRemove = frame.dekodieren()?;
    verweigern(
        client,
        DenyType::Permission,
        "Kanaele loeschen erfordert Administratorrechte",
    );
    Ok(())
}

//! Textnachrichten
//!
//! Eine TextMessage adressiert einzelne Sessions, Kanaele oder ganze
//! Teilbaeume; die Empfaengermenge wird dedupliziert und nur unter den
//! authentifizierten Clients aufgeloest. Der Absender erhaelt seine
//! eigene Nachricht nicht zurueck.

use std::collections::BTreeSet;
use std::sync::Arc;

use murmel_protocol::messages::{self, ControlFrame, DenyType, MessageKind};

use crate::client::ClientConnection;
use crate::error::ServerResult;
use crate::handlers::verweigern;
use crate::server_state::ServerState;

/// TextMessage: an die adressierten Empfaenger verteilen
pub fn text_message(
    state: &Arc<ServerState>,
    client: &Arc<ClientConnection>,
    frame: &ControlFrame,
) -> ServerResult<()> {
    let anfrage: messages::TextMessage = frame.dekodieren()?;

    let text = anfrage.message.clone().unwrap_or_default();
    if text.len() > state.config.limits.nachrichten_laenge as usize {
        verweigern(client, DenyType::TextTooLong, "Nachricht zu lang");
        return Ok(());
    }

    // Ziel-Kanaele aufloesen: direkte Kanaele + komplette Teilbaeume
    let ziel_kanaele: BTreeSet<u32> = {
        let baum = state.kanaele.read().expect("Kanal-Lock");
        let mut kanaele: BTreeSet<u32> = anfrage
            .channel_id
            .iter()
            .copied()
            .filter(|id| baum.existiert(*id))
            .collect();
        for wurzel in &anfrage.tree_id {
            kanaele.extend(baum.teilbaum(*wurzel));
        }
        kanaele
    };

    // Empfaengermenge: adressierte Sessions + Kanalbewohner, ohne Absender
    let mut empfaenger: BTreeSet<u32> = anfrage.session.iter().copied().collect();
    for peer in state.roster.authentifizierte() {
        if ziel_kanaele.contains(&peer.kanal_id()) {
            empfaenger.insert(peer.session);
        }
    }
    empfaenger.remove(&client.session);

    let weiterleitung = messages::TextMessage {
        actor: Some(client.session),
        session: Vec::new(),
        channel_id: anfrage.channel_id,
        tree_id: anfrage.tree_id,
        message: Some(text),
    };

    let mut zugestellt = 0usize;
    for session in empfaenger {
        if let Some(peer) = state.roster.nach_session(session) {
            if peer.ist_authentifiziert()
                && peer.nachricht_senden(MessageKind::TextMessage, &weiterleitung)
            {
                zugestellt += 1;
            }
        }
    }

    tracing::debug!(
        von = client.session,
        empfaenger = zugestellt,
        "Textnachricht verteilt"
    );
    Ok(())
}

//! Benutzer-Nachrichten: UserState, UserRemove, UserStats
//!
//! Self-Updates (Kanalwechsel, Selbst-Stumm/Taub, Kommentar) werden
//! angewandt und als autoritativer UserState an alle verteilt. Fremde
//! Benutzer darf ohne Privilegienmodell niemand mutieren (default deny).

use std::sync::Arc;

use murmel_protocol::messages::{self, ControlFrame, DenyType, MessageKind};

use crate::channels::ROOT_KANAL;
use crate::client::ClientConnection;
use crate::error::ServerResult;
use crate::handlers::verweigern;
use crate::server_state::ServerState;

/// UserState: Self-Update anwenden und autoritativ broadcasten
pub fn user_state(
    state: &Arc<ServerState>,
    client: &Arc<ClientConnection>,
    frame: &ControlFrame,
) -> ServerResult<()> {
    let anfrage: messages::UserState = frame.dekodieren()?;

    // Fremdmutation: nur mit Administratorrechten (hier: default deny)
    if anfrage.session.is_some() && anfrage.session != Some(client.session) {
        verweigern(
            client,
            DenyType::Permission,
            "Andere Benutzer duerfen nicht veraendert werden",
        );
        return Ok(());
    }

    // Server-Stumm/Taub sind Administrator-Operationen
    if anfrage.mute.is_some() || anfrage.deaf.is_some() {
        verweigern(
            client,
            DenyType::Permission,
            "Stummschalten erfordert Administratorrechte",
        );
        return Ok(());
    }

    let mut antwort = messages::UserState {
        session: Some(client.session),
        actor: Some(client.session),
        ..Default::default()
    };
    let mut alter_kanal = None;

    // Kanalwechsel
    if let Some(kanal_id) = anfrage.channel_id {
        let existiert = state.kanaele.read().expect("Kanal-Lock").existiert(kanal_id);
        if !existiert {
            verweigern(client, DenyType::Permission, "Kanal existiert nicht");
            return Ok(());
        }

        let bisher = client.kanal_id();
        if kanal_id != bisher {
            client.kanal_setzen(kanal_id);
            alter_kanal = Some(bisher);
        }
        antwort.channel_id = Some(kanal_id);
    }

    // Selbst-Flags und Kommentar
    if let Some(stumm) = anfrage.self_mute {
        client.selbst_stumm_setzen(stumm);
        antwort.self_mute = Some(stumm);
    }
    if let Some(taub) = anfrage.self_deaf {
        client.selbst_taub_setzen(taub);
        antwort.self_deaf = Some(taub);
    }
    if let Some(kommentar) = anfrage.comment {
        client.kommentar_setzen(kommentar.clone());
        antwort.comment = Some(kommentar);
    }

    state.roster.nachricht_an_alle(MessageKind::UserState, &antwort);

    // Verlassene temporaere Kanaele erst nach dem Broadcast aufraeumen
    if let Some(kanal) = alter_kanal {
        if kanal != ROOT_KANAL {
            state.kanal_aufraeumen(kanal);
        }
    }

    Ok(())
}

/// UserRemove: Kick/Bann, ohne Privilegienmodell immer verweigert
pub fn user_remove(client: &Arc<ClientConnection>, frame: &ControlFrame) -> ServerResult<()> {
    let _anfrage: messages::UserRemove = frame.dekodieren()?;
    verweigern(
        client,
        DenyType::Permission,
        "Kick und Bann erfordern Administratorrechte",
    );
    Ok(())
}

/// UserStats: Statistik-Anfrage beantworten (Request/Response, kein Broadcast)
pub fn user_stats(
    state: &Arc<ServerState>,
    client: &Arc<ClientConnection>,
    frame: &ControlFrame,
) -> ServerResult<()> {
    let anfrage: messages::UserStats = frame.dekodieren()?;

    let ziel_session = anfrage.session.unwrap_or(client.session);
    let Some(ziel) = state.roster.nach_session(ziel_session) else {
        return Ok(());
    };
    if !ziel.ist_authentifiziert() {
        return Ok(());
    }

    // Volle Statistik nur fuer die eigene Session
    let nur_stats = ziel_session != client.session;

    let mut antwort = messages::UserStats {
        session: Some(ziel_session),
        stats_only: Some(nur_stats),
        onlinesecs: Some(ziel.online_sekunden()),
        ..Default::default()
    };

    {
        let krypto = ziel.krypto_sperren();
        if let Some(krypto) = krypto.as_ref() {
            antwort.from_client = Some(messages::UserStatsCounters {
                good: Some(krypto.good),
                late: Some(krypto.late),
                lost: Some(krypto.lost),
                resync: Some(krypto.resync),
            });
        }
    }

    if !nur_stats {
        antwort.version = ziel.client_version();
        antwort.celt_versions = ziel.celt_codecs();
        antwort.address = Some(ip_als_bytes(&ziel.tcp_adresse));
    }

    client.nachricht_senden(MessageKind::UserStats, &antwort);
    Ok(())
}

/// Kodiert eine IP-Adresse als 16 Bytes (IPv4 wird auf IPv6 gemappt)
fn ip_als_bytes(adresse: &std::net::SocketAddr) -> Vec<u8> {
    match adresse.ip() {
        std::net::IpAddr::V4(v4) => v4.to_ipv6_mapped().octets().to_vec(),
        std::net::IpAddr::V6(v6) => v6.octets().to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ipv4_wird_auf_ipv6_gemappt() {
        let adresse: std::net::SocketAddr = "192.168.1.10:1234".parse().unwrap();
        let bytes = ip_als_bytes(&adresse);
        assert_eq!(bytes.len(), 16);
        assert_eq!(&bytes[10..12], &[0xFF, 0xFF]);
        assert_eq!(&bytes[12..16], &[192, 168, 1, 10]);
    }
}

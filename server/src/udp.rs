//! UDP-Sprachkanal – Demux, Krypto-Zuordnung und Versand
//!
//! Ein Task liest den geteilten UDP-Socket und klassifiziert jedes
//! Datagramm: exakt 12 Bytes sind ein zustandsloser Ping, alles andere
//! ist ein verschluesseltes Sprachpaket.
//!
//! ## Zuordnung von Sprachpaketen
//!
//! ```text
//! Datagramm von X:p
//!     |
//!     v
//! Adress-Index (O(1))  -- Treffer --> mit dessen CryptState entschluesseln
//!     |
//!     kein Treffer
//!     v
//! Probe-Entschluesselung ueber alle authentifizierten Clients (O(N)).
//! Der erste Erfolg gewinnt; X:p wird als UDP-Adresse des Clients gelernt.
//! Kein Erfolg: Datagramm stillschweigend verwerfen.
//! ```
//!
//! Der Replay-Schutz des CryptState verhindert, dass eingespielte Pakete
//! die Entdeckung zum Desync missbrauchen. Haeufen sich Fehlversuche auf
//! dem schnellen Pfad, wird die gelernte Adresse vergessen und die
//! Entdeckung laeuft erneut.

use std::net::SocketAddr;
use std::sync::Arc;

use murmel_protocol::messages::{self, MessageKind};
use murmel_protocol::ping::{PingAnfrage, PingAntwort};
use murmel_protocol::voice;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};

use crate::client::ClientConnection;
use crate::server_state::ServerState;

/// Maximale Groesse eines UDP-Datagramms
pub const UDP_PAKET_GROESSE: usize = 1024;

/// Fehlversuche auf dem schnellen Pfad, bevor die gelernte Adresse
/// vergessen wird
pub const UDP_FEHLER_SCHWELLE: u32 = 32;

// ---------------------------------------------------------------------------
// Ausgang
// ---------------------------------------------------------------------------

/// Ein ausgehendes UDP-Element
#[derive(Debug)]
pub enum UdpAusgang {
    /// Wird mit dem CryptState des Zielclients verschluesselt und an
    /// dessen gelernte UDP-Adresse geschickt; ohne gelernte Adresse wird
    /// das Element verworfen (der Client tunnelt dann ueber TCP).
    Klient {
        client: Arc<ClientConnection>,
        daten: Vec<u8>,
    },
    /// Wird unveraendert an die Adresse geschickt (z.B. Ping-Antwort)
    Roh {
        adresse: SocketAddr,
        daten: Vec<u8>,
    },
}

/// Sende-Task: serialisiert allen ausgehenden UDP-Verkehr
pub async fn sende_schleife(socket: Arc<UdpSocket>, mut rx: mpsc::UnboundedReceiver<UdpAusgang>) {
    tracing::info!("UDP-Sende-Task gestartet");

    while let Some(ausgang) = rx.recv().await {
        match ausgang {
            UdpAusgang::Klient { client, daten } => {
                let Some(ziel) = client.udp_adresse() else {
                    // Client hat (noch) keinen UDP-Pfad; er faellt auf den
                    // TCP-Tunnel zurueck
                    tracing::trace!(session = client.session, "UDP-Ausgang ohne Adresse verworfen");
                    continue;
                };

                let verschluesselt = {
                    let mut guard = client.krypto_sperren();
                    match guard.as_mut() {
                        Some(krypto) => krypto.verschluesseln(&daten),
                        None => continue,
                    }
                };

                if let Err(e) = socket.send_to(&verschluesselt, ziel).await {
                    tracing::warn!(
                        session = client.session,
                        ziel = %ziel,
                        fehler = %e,
                        "UDP-Sendefehler"
                    );
                }
            }
            UdpAusgang::Roh { adresse, daten } => {
                if let Err(e) = socket.send_to(&daten, adresse).await {
                    tracing::warn!(ziel = %adresse, fehler = %e, "UDP-Sendefehler");
                }
            }
        }
    }

    tracing::info!("UDP-Sende-Task beendet");
}

// ---------------------------------------------------------------------------
// Ingress
// ---------------------------------------------------------------------------

/// Empfangs-Task: liest den geteilten UDP-Socket bis zum Shutdown
pub async fn empfangs_schleife(
    state: Arc<ServerState>,
    socket: Arc<UdpSocket>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut buf = [0u8; UDP_PAKET_GROESSE];
    tracing::info!("UDP-Empfangs-Task gestartet");

    loop {
        tokio::select! {
            ergebnis = socket.recv_from(&mut buf) => {
                match ergebnis {
                    Ok((laenge, absender)) => {
                        datagramm_verarbeiten(&state, &buf[..laenge], absender);
                    }
                    Err(e) => {
                        tracing::error!(fehler = %e, "UDP-Empfangsfehler");
                        // Kurze Pause gegen Busy-Loop bei persistentem Fehler
                        tokio::time::sleep(std::time::Duration::from_millis(1)).await;
                    }
                }
            }

            Ok(()) = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }

    tracing::info!("UDP-Empfangs-Task beendet");
}

/// Klassifiziert und verarbeitet ein einzelnes Datagramm
pub fn datagramm_verarbeiten(state: &Arc<ServerState>, daten: &[u8], absender: SocketAddr) {
    // Zustandsloser Ping: exakt 12 Bytes
    if let Some(anfrage) = PingAnfrage::parsen(daten) {
        let antwort = PingAntwort::neu(
            &anfrage,
            state.roster.anzahl_authentifiziert(),
            state.config.server.max_benutzer,
            state.config.server.max_bandbreite,
        );
        let _ = state.udp_tx.send(UdpAusgang::Roh {
            adresse: absender,
            daten: antwort.kodieren().to_vec(),
        });
        return;
    }

    // Schneller Pfad: Absenderadresse ist bekannt
    if let Some(client) = state.roster.nach_udp_adresse(&absender) {
        let klartext = {
            let mut guard = client.krypto_sperren();
            guard.as_mut().and_then(|krypto| krypto.entschluesseln(daten).ok())
        };

        match klartext {
            Some(klartext) => {
                client.udp_fehler_zuruecksetzen();
                client.udp_zustellen(klartext);
            }
            None => {
                // Fehlversuche zaehlen; ab der Schwelle Adresse vergessen
                // und Neuentdeckung erzwingen
                if client.udp_fehler_zaehlen() >= UDP_FEHLER_SCHWELLE {
                    tracing::warn!(
                        session = client.session,
                        adresse = %absender,
                        "UDP-Adresse nach Fehlerserie vergessen"
                    );
                    client.udp_adresse_vergessen();
                    state.roster.udp_adresse_vergessen(&absender);
                }
            }
        }
        return;
    }

    // Entdeckungspfad: Probe-Entschluesselung ueber alle Kandidaten
    for client in state.roster.authentifizierte() {
        let klartext = {
            let mut guard = client.krypto_sperren();
            guard.as_mut().and_then(|krypto| krypto.entschluesseln(daten).ok())
        };

        if let Some(klartext) = klartext {
            tracing::info!(
                session = client.session,
                adresse = %absender,
                "UDP-Verbindung eines Clients etabliert"
            );
            client.udp_adresse_setzen(absender);
            state.roster.udp_adresse_merken(absender, client.session);
            client.udp_zustellen(klartext);
            return;
        }
    }

    // Niemand konnte das Paket entschluesseln: stillschweigend verwerfen
    tracing::trace!(adresse = %absender, bytes = daten.len(), "Unzuordenbares Datagramm verworfen");
}

// ---------------------------------------------------------------------------
// Sprach-Routing (UDP-Inbox pro Client)
// ---------------------------------------------------------------------------

/// Inbox-Task eines Clients: konsumiert entschluesselte Datagramme
pub async fn udp_inbox_schleife(
    state: Arc<ServerState>,
    client: Arc<ClientConnection>,
    mut rx: mpsc::UnboundedReceiver<Vec<u8>>,
    mut schliessen_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            daten = rx.recv() => {
                match daten {
                    Some(daten) => sprachpaket_verarbeiten(&state, &client, &daten, false),
                    None => break,
                }
            }

            Ok(()) = schliessen_rx.changed() => {
                if *schliessen_rx.borrow() {
                    break;
                }
            }
        }
    }

    tracing::debug!(session = client.session, "UDP-Inbox-Task beendet");
}

/// Routet ein entschluesseltes Sprachpaket
///
/// Sprach-Pings gehen unveraendert an den Absender zurueck. Audio wird
/// mit der Session des Absenders versehen und an alle anderen
/// authentifizierten Clients im selben Kanal verteilt: per UDP wenn der
/// Empfaenger eine gelernte Adresse hat, sonst als UDPTunnel ueber TCP.
pub fn sprachpaket_verarbeiten(
    state: &Arc<ServerState>,
    client: &Arc<ClientConnection>,
    daten: &[u8],
    via_tunnel: bool,
) {
    let Some(paket) = voice::zerlegen(daten) else {
        return;
    };

    // Sprach-Ping: Echo an den Absender
    if paket.typ == voice::TYP_PING {
        if via_tunnel {
            client.nachricht_senden(
                MessageKind::UdpTunnel,
                &messages::UdpTunnel {
                    packet: Some(daten.to_vec()),
                },
            );
        } else {
            let _ = state.udp_tx.send(UdpAusgang::Klient {
                client: Arc::clone(client),
                daten: daten.to_vec(),
            });
        }
        return;
    }

    if !client.ist_authentifiziert() {
        return;
    }

    let weiterleitung = voice::weiterleitung_bauen(paket.typ, client.session, paket.nutzdaten);
    let kanal = client.kanal_id();

    for empfaenger in state.roster.authentifizierte() {
        if empfaenger.session == client.session || empfaenger.kanal_id() != kanal {
            continue;
        }
        if empfaenger.selbst_taub() {
            continue;
        }

        if empfaenger.udp_adresse().is_some() {
            let _ = state.udp_tx.send(UdpAusgang::Klient {
                client: Arc::clone(&empfaenger),
                daten: weiterleitung.clone(),
            });
        } else {
            empfaenger.nachricht_senden(
                MessageKind::UdpTunnel,
                &messages::UdpTunnel {
                    packet: Some(weiterleitung.clone()),
                },
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ClientKanaele, VerbindungsZustand};
    use crate::config::ServerConfig;
    use crate::dispatcher::DispatcherEreignis;
    use murmel_crypto::CryptState;

    struct TestUmgebung {
        state: Arc<ServerState>,
        udp_rx: mpsc::UnboundedReceiver<UdpAusgang>,
    }

    fn test_umgebung() -> TestUmgebung {
        let (udp_tx, udp_rx) = mpsc::unbounded_channel();
        let (dispatcher_tx, dispatcher_rx) = mpsc::unbounded_channel::<DispatcherEreignis>();
        std::mem::forget(dispatcher_rx);
        let state = Arc::new(ServerState::neu(ServerConfig::default(), udp_tx, dispatcher_tx));
        TestUmgebung { state, udp_rx }
    }

    /// Angemeldeter Client samt gespiegeltem Client-seitigem CryptState
    fn client_mit_krypto(
        state: &ServerState,
        port: u16,
    ) -> (Arc<ClientConnection>, ClientKanaele, CryptState) {
        let session = state.naechste_session();
        let adresse: SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();
        let (client, kanaele) = ClientConnection::neu(session, adresse);
        client.zustand_setzen(VerbindungsZustand::Authentifiziert);

        let server_seite = CryptState::generieren().unwrap();
        let client_seite = CryptState::mit_schluessel(
            *server_seite.schluessel(),
            *server_seite.decrypt_iv(),
            *server_seite.encrypt_iv(),
        );
        client.krypto_setzen(server_seite);
        state.roster.einfuegen(Arc::clone(&client));

        (client, kanaele, client_seite)
    }

    fn sprachpaket(inhalt: &[u8]) -> Vec<u8> {
        // Typ 0 (CELT Alpha), Ziel 0
        let mut paket = vec![0x00u8];
        paket.extend_from_slice(inhalt);
        paket
    }

    #[test]
    fn ping_datagramm_wird_beantwortet() {
        let mut umgebung = test_umgebung();
        let absender: SocketAddr = "203.0.113.5:40000".parse().unwrap();

        let anfrage = [0u8, 0, 0, 0, 1, 2, 3, 4, 5, 6, 7, 8];
        datagramm_verarbeiten(&umgebung.state, &anfrage, absender);

        match umgebung.udp_rx.try_recv().expect("Antwort erwartet") {
            UdpAusgang::Roh { adresse, daten } => {
                assert_eq!(adresse, absender);
                assert_eq!(daten.len(), 24);
                assert_eq!(&daten[0..4], &[0x00, 0x01, 0x02, 0x02]);
                assert_eq!(&daten[4..12], &[1, 2, 3, 4, 5, 6, 7, 8]);
            }
            andere => panic!("Roh-Ausgang erwartet, war {andere:?}"),
        }
    }

    #[test]
    fn elf_und_dreizehn_bytes_sind_kein_ping() {
        let mut umgebung = test_umgebung();
        let absender: SocketAddr = "203.0.113.5:40001".parse().unwrap();

        datagramm_verarbeiten(&umgebung.state, &[0u8; 11], absender);
        datagramm_verarbeiten(&umgebung.state, &[0u8; 13], absender);

        // Beide fallen in den Sprachpfad und werden mangels Client verworfen
        assert!(umgebung.udp_rx.try_recv().is_err());
    }

    #[test]
    fn entdeckung_per_probe_entschluesselung() {
        let umgebung = test_umgebung();
        let (client, _kanaele, mut client_krypto) = client_mit_krypto(&umgebung.state, 53000);
        let absender: SocketAddr = "198.51.100.7:41000".parse().unwrap();

        // Unbekannte Adresse: Zuordnung nur ueber Probe-Entschluesselung
        let datagramm = client_krypto.verschluesseln(&sprachpaket(b"hallo"));
        datagramm_verarbeiten(&umgebung.state, &datagramm, absender);

        assert_eq!(client.udp_adresse(), Some(absender));
        assert_eq!(
            umgebung.state.roster.nach_udp_adresse(&absender).unwrap().session,
            client.session
        );

        // Zweites Paket von derselben Adresse nimmt den schnellen Pfad
        let datagramm = client_krypto.verschluesseln(&sprachpaket(b"nochmal"));
        datagramm_verarbeiten(&umgebung.state, &datagramm, absender);
        assert_eq!(client.udp_adresse(), Some(absender));
    }

    #[test]
    fn unzuordenbares_datagramm_wird_verworfen() {
        let mut umgebung = test_umgebung();
        let (_client, _kanaele, _client_krypto) = client_mit_krypto(&umgebung.state, 53001);
        let absender: SocketAddr = "198.51.100.9:42000".parse().unwrap();

        // Zufallsbytes, die kein CryptState akzeptiert
        datagramm_verarbeiten(&umgebung.state, &[0xAB; 40], absender);

        assert!(umgebung.state.roster.nach_udp_adresse(&absender).is_none());
        assert!(umgebung.udp_rx.try_recv().is_err());
    }

    #[test]
    fn fehlerserie_vergisst_gelernte_adresse() {
        let umgebung = test_umgebung();
        let (client, _kanaele, mut client_krypto) = client_mit_krypto(&umgebung.state, 53002);
        let absender: SocketAddr = "198.51.100.11:43000".parse().unwrap();

        // Adresse lernen
        let datagramm = client_krypto.verschluesseln(&sprachpaket(b"start"));
        datagramm_verarbeiten(&umgebung.state, &datagramm, absender);
        assert_eq!(client.udp_adresse(), Some(absender));

        // Muell von der gelernten Adresse bis zur Schwelle
        for _ in 0..UDP_FEHLER_SCHWELLE {
            datagramm_verarbeiten(&umgebung.state, &[0xCD; 32], absender);
        }

        assert_eq!(client.udp_adresse(), None);
        assert!(umgebung.state.roster.nach_udp_adresse(&absender).is_none());
        // Der Client lebt weiter
        assert!(!client.ist_tot());
    }

    #[test]
    fn sprachpaket_wird_an_kanalmitglieder_verteilt() {
        let mut umgebung = test_umgebung();
        let (sprecher, _k1, mut sprecher_krypto) = client_mit_krypto(&umgebung.state, 53003);
        let (hoerer_udp, _k2, _krypto2) = client_mit_krypto(&umgebung.state, 53004);
        let (hoerer_tcp, mut k3, _krypto3) = client_mit_krypto(&umgebung.state, 53005);
        let (anderer_kanal, mut k4, _krypto4) = client_mit_krypto(&umgebung.state, 53006);

        // hoerer_udp hat einen gelernten UDP-Pfad, hoerer_tcp nicht
        let hoerer_adresse: SocketAddr = "198.51.100.20:44000".parse().unwrap();
        hoerer_udp.udp_adresse_setzen(hoerer_adresse);
        anderer_kanal.kanal_setzen(7);

        // Sprecher-Paket ueber die Entdeckung einspeisen
        let absender: SocketAddr = "198.51.100.21:44001".parse().unwrap();
        let datagramm = sprecher_krypto.verschluesseln(&sprachpaket(&[0x11, 0x22]));
        datagramm_verarbeiten(&umgebung.state, &datagramm, absender);

        // Inbox des Sprechers manuell leeren und routen
        // (im Betrieb uebernimmt das der Inbox-Task)
        let erwartet = voice::weiterleitung_bauen(0, sprecher.session, &[0x11, 0x22]);

        sprachpaket_verarbeiten(
            &umgebung.state,
            &sprecher,
            &sprachpaket(&[0x11, 0x22]),
            false,
        );

        // UDP-Hoerer bekommt das Paket ueber den Egress
        match umgebung.udp_rx.try_recv().expect("UDP-Ausgang erwartet") {
            UdpAusgang::Klient { client, daten } => {
                assert_eq!(client.session, hoerer_udp.session);
                assert_eq!(daten, erwartet);
            }
            andere => panic!("Klient-Ausgang erwartet, war {andere:?}"),
        }

        // TCP-Hoerer bekommt einen UDPTunnel-Frame
        let frame = k3.sende_rx.try_recv().expect("Tunnel-Frame erwartet");
        assert_eq!(frame.kind, MessageKind::UdpTunnel);
        let tunnel: messages::UdpTunnel = frame.dekodieren().unwrap();
        assert_eq!(tunnel.packet.as_deref(), Some(erwartet.as_slice()));

        // Clients in anderen Kanaelen bekommen nichts
        assert!(k4.sende_rx.try_recv().is_err());
    }

    #[test]
    fn sprach_ping_wird_gespiegelt() {
        let mut umgebung = test_umgebung();
        let (client, mut kanaele, _krypto) = client_mit_krypto(&umgebung.state, 53007);

        // Kopfbyte 0x20 = Typ 1 (Ping)
        let ping = vec![0x20u8, 0x01, 0x02];

        // Ueber UDP: Echo via Egress
        sprachpaket_verarbeiten(&umgebung.state, &client, &ping, false);
        match umgebung.udp_rx.try_recv().expect("Echo erwartet") {
            UdpAusgang::Klient { client: ziel, daten } => {
                assert_eq!(ziel.session, client.session);
                assert_eq!(daten, ping);
            }
            andere => panic!("Klient-Ausgang erwartet, war {andere:?}"),
        }

        // Ueber Tunnel: Echo als UDPTunnel-Frame
        sprachpaket_verarbeiten(&umgebung.state, &client, &ping, true);
        let frame = kanaele.sende_rx.try_recv().expect("Tunnel-Echo erwartet");
        assert_eq!(frame.kind, MessageKind::UdpTunnel);
    }

    #[test]
    fn taube_hoerer_werden_uebersprungen() {
        let mut umgebung = test_umgebung();
        let (sprecher, _k1, _krypto1) = client_mit_krypto(&umgebung.state, 53008);
        let (tauber, mut k2, _krypto2) = client_mit_krypto(&umgebung.state, 53009);
        tauber.selbst_taub_setzen(true);

        sprachpaket_verarbeiten(&umgebung.state, &sprecher, &sprachpaket(b"laut"), false);

        assert!(k2.sende_rx.try_recv().is_err());
        assert!(umgebung.udp_rx.try_recv().is_err());
    }
}

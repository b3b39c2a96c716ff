//! Roster – autoritative Menge der verbundenen Clients
//!
//! Der Roster haelt alle lebenden Client-Sessions und die gelernten
//! UDP-Adressen. Lookups (Session, UDP-Adresse) sind map-gestuetzt und
//! O(1); Broadcasts reihen nicht-blockierend in die Sende-Queues ein,
//! ein haengender Schreiber kann den Fan-out daher nicht aufhalten.

use std::net::SocketAddr;
use std::sync::Arc;

use dashmap::DashMap;
use murmel_protocol::messages::{ControlFrame, MessageKind};
use prost::Message;

use crate::client::ClientConnection;

/// Autoritative Menge der Client-Sessions eines Servers
///
/// Thread-safe via DashMap; Iteration arbeitet auf Snapshots, damit
/// waehrend eines Fan-outs keine Eintrags-Locks gehalten werden.
pub struct Roster {
    /// Alle Clients, indiziert nach Session-ID
    clients: DashMap<u32, Arc<ClientConnection>>,
    /// Gelernte UDP-Adresse -> Session-ID
    udp_index: DashMap<SocketAddr, u32>,
}

impl Roster {
    pub fn neu() -> Self {
        Self {
            clients: DashMap::new(),
            udp_index: DashMap::new(),
        }
    }

    /// Nimmt einen Client in den Roster auf (bei Accept)
    pub fn einfuegen(&self, client: Arc<ClientConnection>) {
        self.clients.insert(client.session, client);
    }

    /// Entfernt einen Client und bereinigt den UDP-Index
    pub fn entfernen(&self, session: u32) -> Option<Arc<ClientConnection>> {
        let (_, client) = self.clients.remove(&session)?;
        self.udp_index.retain(|_, s| *s != session);
        Some(client)
    }

    /// Sucht einen Client anhand der Session-ID
    pub fn nach_session(&self, session: u32) -> Option<Arc<ClientConnection>> {
        self.clients.get(&session).map(|eintrag| Arc::clone(&eintrag))
    }

    /// Sucht einen Client anhand des Benutzernamens
    pub fn nach_name(&self, name: &str) -> Option<Arc<ClientConnection>> {
        self.clients.iter().find_map(|eintrag| {
            if eintrag.benutzername().as_deref() == Some(name) {
                Some(Arc::clone(&eintrag))
            } else {
                None
            }
        })
    }

    /// Schneller Pfad des UDP-Demux: Adresse -> Client
    pub fn nach_udp_adresse(&self, adresse: &SocketAddr) -> Option<Arc<ClientConnection>> {
        let session = *self.udp_index.get(adresse)?;
        self.nach_session(session)
    }

    /// Merkt sich die gelernte UDP-Adresse eines Clients
    pub fn udp_adresse_merken(&self, adresse: SocketAddr, session: u32) {
        // Alte Zuordnung derselben Session verwerfen
        self.udp_index.retain(|_, s| *s != session);
        self.udp_index.insert(adresse, session);
    }

    /// Vergisst eine gelernte UDP-Adresse (erzwingt Neuentdeckung)
    pub fn udp_adresse_vergessen(&self, adresse: &SocketAddr) {
        self.udp_index.remove(adresse);
    }

    /// Snapshot aller Clients (auch nicht authentifizierte)
    pub fn alle(&self) -> Vec<Arc<ClientConnection>> {
        let mut clients: Vec<_> = self
            .clients
            .iter()
            .map(|eintrag| Arc::clone(&eintrag))
            .collect();
        clients.sort_by_key(|c| c.session);
        clients
    }

    /// Snapshot aller authentifizierten Clients, nach Session sortiert
    ///
    /// Die feste Reihenfolge macht Codec-Abgleich und Benutzerlisten
    /// deterministisch.
    pub fn authentifizierte(&self) -> Vec<Arc<ClientConnection>> {
        let mut clients: Vec<_> = self
            .clients
            .iter()
            .filter(|eintrag| eintrag.ist_authentifiziert())
            .map(|eintrag| Arc::clone(&eintrag))
            .collect();
        clients.sort_by_key(|c| c.session);
        clients
    }

    /// Anzahl authentifizierter Clients
    pub fn anzahl_authentifiziert(&self) -> u32 {
        self.clients
            .iter()
            .filter(|eintrag| eintrag.ist_authentifiziert())
            .count() as u32
    }

    /// Gesamtzahl der Sessions im Roster
    pub fn anzahl(&self) -> usize {
        self.clients.len()
    }

    /// Broadcast an alle authentifizierten Clients
    ///
    /// Einreihen ist pro Client nicht-blockierend; ein einzelner toter
    /// oder haengender Client unterbricht den Fan-out nicht. Gibt die
    /// Anzahl erfolgreicher Einreihungen zurueck.
    pub fn an_alle_senden(&self, frame: ControlFrame) -> usize {
        let mut gesendet = 0;
        for client in self.authentifizierte() {
            if client.senden(frame.clone()) {
                gesendet += 1;
            }
        }
        gesendet
    }

    /// Serialisiert eine Nachricht und broadcastet sie
    pub fn nachricht_an_alle<M: Message>(&self, kind: MessageKind, nachricht: &M) -> usize {
        self.an_alle_senden(ControlFrame::aus_nachricht(kind, nachricht))
    }

    /// Entfernt alle toten Clients und gibt sie zurueck
    ///
    /// Wird vom Dispatcher vor jedem Broadcast-traechtigen Schritt
    /// aufgerufen.
    pub fn tote_ernten(&self) -> Vec<Arc<ClientConnection>> {
        let tote: Vec<u32> = self
            .clients
            .iter()
            .filter(|eintrag| eintrag.ist_tot())
            .map(|eintrag| eintrag.session)
            .collect();

        tote.into_iter()
            .filter_map(|session| self.entfernen(session))
            .collect()
    }
}

impl Default for Roster {
    fn default() -> Self {
        Self::neu()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ClientKanaele, VerbindungsZustand};
    use murmel_protocol::messages;

    fn test_client(session: u32, port: u16) -> (Arc<ClientConnection>, ClientKanaele) {
        let adresse: SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();
        ClientConnection::neu(session, adresse)
    }

    fn angemeldeter_client(session: u32, port: u16) -> (Arc<ClientConnection>, ClientKanaele) {
        let (client, kanaele) = test_client(session, port);
        client.zustand_setzen(VerbindungsZustand::Authentifiziert);
        (client, kanaele)
    }

    #[test]
    fn einfuegen_und_lookup() {
        let roster = Roster::neu();
        let (client, _kanaele) = test_client(1, 50000);
        roster.einfuegen(Arc::clone(&client));

        assert_eq!(roster.anzahl(), 1);
        assert_eq!(roster.nach_session(1).unwrap().session, 1);
        assert!(roster.nach_session(2).is_none());
    }

    #[test]
    fn udp_index() {
        let roster = Roster::neu();
        let (client, _kanaele) = angemeldeter_client(1, 50001);
        roster.einfuegen(Arc::clone(&client));

        let udp: SocketAddr = "10.0.0.1:7000".parse().unwrap();
        roster.udp_adresse_merken(udp, 1);
        assert_eq!(roster.nach_udp_adresse(&udp).unwrap().session, 1);

        // Neue Adresse ersetzt die alte Zuordnung derselben Session
        let udp2: SocketAddr = "10.0.0.1:7001".parse().unwrap();
        roster.udp_adresse_merken(udp2, 1);
        assert!(roster.nach_udp_adresse(&udp).is_none());
        assert_eq!(roster.nach_udp_adresse(&udp2).unwrap().session, 1);

        roster.udp_adresse_vergessen(&udp2);
        assert!(roster.nach_udp_adresse(&udp2).is_none());
    }

    #[test]
    fn entfernen_bereinigt_udp_index() {
        let roster = Roster::neu();
        let (client, _kanaele) = angemeldeter_client(3, 50002);
        roster.einfuegen(client);

        let udp: SocketAddr = "10.0.0.2:7000".parse().unwrap();
        roster.udp_adresse_merken(udp, 3);

        roster.entfernen(3);
        assert!(roster.nach_udp_adresse(&udp).is_none());
        assert_eq!(roster.anzahl(), 0);
    }

    #[test]
    fn broadcast_nur_an_authentifizierte() {
        let roster = Roster::neu();
        let (auth1, mut kanaele1) = angemeldeter_client(1, 50003);
        let (auth2, mut kanaele2) = angemeldeter_client(2, 50004);
        let (frisch, mut kanaele3) = test_client(3, 50005);

        roster.einfuegen(auth1);
        roster.einfuegen(auth2);
        roster.einfuegen(frisch);

        let gesendet = roster.nachricht_an_alle(
            MessageKind::UserState,
            &messages::UserState {
                session: Some(1),
                ..Default::default()
            },
        );
        assert_eq!(gesendet, 2);

        assert!(kanaele1.sende_rx.try_recv().is_ok());
        assert!(kanaele2.sende_rx.try_recv().is_ok());
        assert!(kanaele3.sende_rx.try_recv().is_err(), "Unangemeldete bekommen nichts");
    }

    #[test]
    fn broadcast_ueberspringt_tote() {
        let roster = Roster::neu();
        let (lebendig, mut kanaele1) = angemeldeter_client(1, 50006);
        let (tot, mut kanaele2) = angemeldeter_client(2, 50007);
        tot.tot_markieren();

        roster.einfuegen(lebendig);
        roster.einfuegen(tot);

        let gesendet = roster.nachricht_an_alle(MessageKind::Ping, &messages::Ping::default());
        assert_eq!(gesendet, 1);
        assert!(kanaele1.sende_rx.try_recv().is_ok());
        assert!(kanaele2.sende_rx.try_recv().is_err());
    }

    #[test]
    fn tote_ernten_entfernt_nur_tote() {
        let roster = Roster::neu();
        let (lebendig, _k1) = angemeldeter_client(1, 50008);
        let (tot, _k2) = angemeldeter_client(2, 50009);
        tot.tot_markieren();

        roster.einfuegen(lebendig);
        roster.einfuegen(tot);

        let geerntet = roster.tote_ernten();
        assert_eq!(geerntet.len(), 1);
        assert_eq!(geerntet[0].session, 2);
        assert_eq!(roster.anzahl(), 1);
        assert!(roster.nach_session(1).is_some());
    }

    #[test]
    fn authentifizierte_sind_sortiert() {
        let roster = Roster::neu();
        for session in [5u32, 1, 3] {
            let (client, _kanaele) = angemeldeter_client(session, 50010 + session as u16);
            roster.einfuegen(client);
            std::mem::forget(_kanaele);
        }

        let sessions: Vec<u32> = roster.authentifizierte().iter().map(|c| c.session).collect();
        assert_eq!(sessions, vec![1, 3, 5]);
    }

    #[test]
    fn nach_name() {
        let roster = Roster::neu();
        let (client, _kanaele) = angemeldeter_client(1, 50020);
        client.benutzername_setzen("alice".into());
        roster.einfuegen(client);

        assert_eq!(roster.nach_name("alice").unwrap().session, 1);
        assert!(roster.nach_name("bob").is_none());
    }
}

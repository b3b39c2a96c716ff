//! Gemeinsamer Server-Zustand
//!
//! Buendelt Roster, Kanalbaum, Codec-Slots und die serverweiten Queues.
//! Wird als `Arc` zwischen Acceptor, Dispatcher und den UDP-Tasks geteilt.
//! Der Session-Zaehler und die Codec-Slots werden nur aus dem
//! Dispatcher-Kontext mutiert; Roster und Kanalbaum folgen der
//! Lese/Schreib-Disziplin ihrer Typen.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::Instant;

use murmel_protocol::messages::{self, MessageKind};
use tokio::sync::mpsc;

use crate::channels::{KanalBaum, ROOT_KANAL};
use crate::codec::{self, CodecZustand};
use crate::config::ServerConfig;
use crate::dispatcher::DispatcherEreignis;
use crate::roster::Roster;
use crate::udp::UdpAusgang;

/// Zentraler, geteilter Zustand einer Server-Instanz
pub struct ServerState {
    pub config: ServerConfig,
    pub roster: Roster,
    pub kanaele: RwLock<KanalBaum>,
    pub codec: Mutex<CodecZustand>,
    /// In-Memory-Bannliste (Persistenz ist Sache einer hoeheren Schicht)
    pub bans: Mutex<Vec<messages::BanEntry>>,

    /// Streng monoton steigender Session-Zaehler
    session_zaehler: AtomicU32,

    /// Ausgang zur UDP-Sende-Schleife
    pub udp_tx: mpsc::UnboundedSender<UdpAusgang>,
    /// Eingang des Dispatchers (fuer die Lese-Tasks der Clients)
    pub dispatcher_tx: mpsc::UnboundedSender<DispatcherEreignis>,

    gestartet: Instant,
}

impl ServerState {
    pub fn neu(
        config: ServerConfig,
        udp_tx: mpsc::UnboundedSender<UdpAusgang>,
        dispatcher_tx: mpsc::UnboundedSender<DispatcherEreignis>,
    ) -> Self {
        Self {
            config,
            roster: Roster::neu(),
            kanaele: RwLock::new(KanalBaum::neu()),
            codec: Mutex::new(CodecZustand::default()),
            bans: Mutex::new(Vec::new()),
            session_zaehler: AtomicU32::new(0),
            udp_tx,
            dispatcher_tx,
            gestartet: Instant::now(),
        }
    }

    /// Vergibt die naechste Session-ID (beginnend bei 1, niemals 0)
    pub fn naechste_session(&self) -> u32 {
        self.session_zaehler.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Sekunden seit Serverstart
    pub fn laufzeit_sekunden(&self) -> u64 {
        self.gestartet.elapsed().as_secs()
    }

    /// Gleicht die aktiven Codecs mit den beworbenen Listen ab
    ///
    /// Laeuft nach jeder Roster-Aenderung und nach jeder Aenderung einer
    /// Codec-Liste. Bei einem Wechsel wird CodecVersion noch im selben
    /// Dispatcher-Schritt an alle authentifizierten Clients verteilt.
    pub fn codec_abgleich(&self) {
        let listen: Vec<Vec<i32>> = self
            .roster
            .alle()
            .iter()
            .map(|client| client.celt_codecs())
            .collect();
        let gewinner = codec::gewinner_bestimmen(listen.iter().map(|l| l.as_slice()));

        let neuer_zustand = {
            let mut zustand = self.codec.lock().expect("Codec-Lock");
            if !codec::anwenden(&mut zustand, gewinner) {
                return;
            }
            *zustand
        };

        tracing::info!(
            alpha = neuer_zustand.alpha,
            beta = neuer_zustand.beta,
            bevorzuge_alpha = neuer_zustand.bevorzuge_alpha,
            "CELT-Codec-Wechsel"
        );

        self.roster.nachricht_an_alle(
            MessageKind::CodecVersion,
            &messages::CodecVersion {
                alpha: Some(neuer_zustand.alpha),
                beta: Some(neuer_zustand.beta),
                prefer_alpha: Some(neuer_zustand.bevorzuge_alpha),
            },
        );
    }

    /// Aktuelle Codec-Slots (Snapshot)
    pub fn codec_zustand(&self) -> CodecZustand {
        *self.codec.lock().expect("Codec-Lock")
    }

    /// Raeumt einen verlassenen temporaeren Kanal auf
    ///
    /// Ein temporaerer Kanal wird geloescht sobald kein authentifizierter
    /// Client mehr direkt darin steht. Mit ihm verschwindet sein ganzer
    /// Teilbaum; Bewohner von Unterkanaelen landen im Root-Kanal, und ihr
    /// Umzug wird vor den ChannelRemove-Broadcasts verteilt, damit kein
    /// Client einen Benutzer in einem geloeschten Kanal sieht.
    pub fn kanal_aufraeumen(&self, kanal_id: u32) {
        let entfernte = {
            let mut baum = self.kanaele.write().expect("Kanal-Lock");
            let temporaer = baum.hole(kanal_id).map(|k| k.temporaer).unwrap_or(false);
            if !temporaer {
                return;
            }

            let belegt = self
                .roster
                .authentifizierte()
                .iter()
                .any(|client| client.kanal_id() == kanal_id);
            if belegt {
                return;
            }

            match baum.entfernen(kanal_id) {
                Ok(entfernte) => entfernte,
                Err(_) => return,
            }
        };

        // Bewohner des entfernten Teilbaums nach Root umziehen
        for client in self.roster.authentifizierte() {
            if !entfernte.contains(&client.kanal_id()) {
                continue;
            }
            client.kanal_setzen(ROOT_KANAL);
            tracing::debug!(
                session = client.session,
                "Bewohner eines geloeschten Kanals nach Root verschoben"
            );
            self.roster.nachricht_an_alle(
                MessageKind::UserState,
                &messages::UserState {
                    session: Some(client.session),
                    channel_id: Some(ROOT_KANAL),
                    ..Default::default()
                },
            );
        }

        for id in entfernte {
            tracing::debug!(kanal = id, "Temporaerer Kanal entfernt");
            self.roster.nachricht_an_alle(
                MessageKind::ChannelRemove,
                &messages::ChannelRemove {
                    channel_id: Some(id),
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
    use crate::client::{ClientConnection, ClientKanaele, VerbindungsZustand};
    use std::net::SocketAddr;
    use std::sync::Arc;

    pub fn test_state() -> Arc<ServerState> {
        let (udp_tx, _udp_rx) = mpsc::unbounded_channel();
        let (dispatcher_tx, _dispatcher_rx) = mpsc::unbounded_channel();
        std::mem::forget(_udp_rx);
        std::mem::forget(_dispatcher_rx);
        Arc::new(ServerState::neu(ServerConfig::default(), udp_tx, dispatcher_tx))
    }

    fn angemeldeter_client(
        state: &ServerState,
        port: u16,
        codecs: Vec<i32>,
    ) -> (Arc<ClientConnection>, ClientKanaele) {
        let session = state.naechste_session();
        let adresse: SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();
        let (client, kanaele) = ClientConnection::neu(session, adresse);
        client.zustand_setzen(VerbindungsZustand::Authentifiziert);
        client.celt_codecs_setzen(codecs);
        state.roster.einfuegen(Arc::clone(&client));
        (client, kanaele)
    }

    #[test]
    fn session_zaehler_beginnt_bei_eins() {
        let state = test_state();
        assert_eq!(state.naechste_session(), 1);
        assert_eq!(state.naechste_session(), 2);
        assert_eq!(state.naechste_session(), 3);
    }

    #[test]
    fn codec_abgleich_broadcastet_wechsel() {
        let state = test_state();
        const A: i32 = -2147483637;

        let (_c1, mut kanaele1) = angemeldeter_client(&state, 51000, vec![A]);
        state.codec_abgleich();

        let zustand = state.codec_zustand();
        assert_eq!(zustand.alpha, A);
        assert!(zustand.bevorzuge_alpha);

        let frame = kanaele1.sende_rx.try_recv().expect("CodecVersion erwartet");
        assert_eq!(frame.kind, MessageKind::CodecVersion);
        let cv: messages::CodecVersion = frame.dekodieren().unwrap();
        assert_eq!(cv.alpha, Some(A));

        // Unveraenderter Gewinner: kein weiterer Broadcast
        state.codec_abgleich();
        assert!(kanaele1.sende_rx.try_recv().is_err());
    }

    #[test]
    fn temporaerer_kanal_wird_aufgeraeumt() {
        let state = test_state();
        let (client, mut kanaele) = angemeldeter_client(&state, 51001, vec![]);

        let kanal_id = state
            .kanaele
            .write()
            .unwrap()
            .anlegen("Fluechtig", 0, None, 0, true)
            .unwrap();

        // Client steht im Kanal: kein Aufraeumen
        client.kanal_setzen(kanal_id);
        state.kanal_aufraeumen(kanal_id);
        assert!(state.kanaele.read().unwrap().existiert(kanal_id));

        // Client verlaesst den Kanal: Kanal verschwindet, Broadcast folgt
        client.kanal_setzen(0);
        state.kanal_aufraeumen(kanal_id);
        assert!(!state.kanaele.read().unwrap().existiert(kanal_id));

        let frame = kanaele.sende_rx.try_recv().expect("ChannelRemove erwartet");
        assert_eq!(frame.kind, MessageKind::ChannelRemove);
    }

    #[test]
    fn aufraeumen_verpflanzt_teilbaum_bewohner_nach_root() {
        let state = test_state();
        let (direkt, _k1) = angemeldeter_client(&state, 51002, vec![]);
        let (verschachtelt, mut k2) = angemeldeter_client(&state, 51003, vec![]);

        let (temp, kind) = {
            let mut baum = state.kanaele.write().unwrap();
            let temp = baum.anlegen("Fluechtig", 0, None, 0, true).unwrap();
            let kind = baum.anlegen("Unterraum", temp, None, 0, false).unwrap();
            (temp, kind)
        };

        direkt.kanal_setzen(temp);
        verschachtelt.kanal_setzen(kind);

        // Solange der temporaere Kanal direkt bewohnt ist, passiert nichts
        state.kanal_aufraeumen(temp);
        assert!(state.kanaele.read().unwrap().existiert(temp));

        // Der direkte Bewohner geht: der Teilbaum verschwindet, der
        // Bewohner des Unterkanals landet im Root-Kanal
        direkt.kanal_setzen(0);
        state.kanal_aufraeumen(temp);

        assert!(!state.kanaele.read().unwrap().existiert(temp));
        assert!(!state.kanaele.read().unwrap().existiert(kind));
        assert_eq!(verschachtelt.kanal_id(), 0);

        // Der Umzug kommt vor den ChannelRemove-Broadcasts
        let frame = k2.sende_rx.try_recv().expect("UserState erwartet");
        assert_eq!(frame.kind, MessageKind::UserState);
        let umzug: messages::UserState = frame.dekodieren().unwrap();
        assert_eq!(umzug.session, Some(verschachtelt.session));
        assert_eq!(umzug.channel_id, Some(0));

        let frame = k2.sende_rx.try_recv().expect("ChannelRemove erwartet");
        assert_eq!(frame.kind, MessageKind::ChannelRemove);
    }

    #[test]
    fn nicht_temporaere_kanaele_bleiben() {
        let state = test_state();
        let kanal_id = state
            .kanaele
            .write()
            .unwrap()
            .anlegen("Dauerhaft", 0, None, 0, false)
            .unwrap();

        state.kanal_aufraeumen(kanal_id);
        assert!(state.kanaele.read().unwrap().existiert(kanal_id));
    }
}

//! Client-Session – Zustand und IO-Tasks einer einzelnen Verbindung
//!
//! Jede akzeptierte TLS-Verbindung bekommt eine `ClientConnection` und drei
//! tokio-Tasks: Lese-Task (Frames -> Dispatcher), Schreib-Task (Queue ->
//! TLS-Stream) und UDP-Inbox-Task (entschluesselte Datagramme -> Routing).
//!
//! ## State Machine
//! ```text
//! Verbunden -> VersionGesendet -> Authentifiziert
//!     |               |                 |
//!     +---------------+--------+--------+
//!                              v
//!                             Tot   (terminal)
//! ```
//!
//! `Tot` ist das einzige Abbruch-Primitiv: der Lese-Task beendet sich bei
//! EOF/Fehler, der Schreib-Task leert seine Queue und beendet sich, der
//! Dispatcher ignoriert weitere Nachrichten des Clients, und der Roster
//! erntet tote Clients vor dem naechsten Broadcast.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use futures_util::{SinkExt, StreamExt};
use murmel_crypto::CryptState;
use murmel_protocol::messages::{self, ControlFrame, MessageKind};
use murmel_protocol::wire::FrameCodec;
use prost::Message;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch};
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::dispatcher::DispatcherEreignis;

// ---------------------------------------------------------------------------
// Verbindungszustand
// ---------------------------------------------------------------------------

/// Zustand einer Client-Verbindung
///
/// Uebergaenge sind monoton; `Tot` ist terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerbindungsZustand {
    /// TLS-Handshake abgeschlossen, noch keine Version empfangen
    Verbunden,
    /// Versionsaustausch abgeschlossen, Authenticate steht aus
    VersionGesendet,
    /// Vollstaendig angemeldet, Mitglied des Rosters
    Authentifiziert,
    /// Verbindung beendet oder Protokollverstoss
    Tot,
}

impl std::fmt::Display for VerbindungsZustand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ---------------------------------------------------------------------------
// ClientConnection
// ---------------------------------------------------------------------------

/// Empfangsseiten der Client-Queues, werden an die IO-Tasks uebergeben
pub struct ClientKanaele {
    /// Ausgehende Control-Frames (Schreib-Task)
    pub sende_rx: mpsc::UnboundedReceiver<ControlFrame>,
    /// Entschluesselte UDP-Datagramme (Inbox-Task)
    pub udp_inbox_rx: mpsc::UnboundedReceiver<Vec<u8>>,
    /// Signal zum Beenden der Tasks (wird bei `Tot` ausgeloest)
    pub schliessen_rx: watch::Receiver<bool>,
}

/// Zustand einer einzelnen Client-Verbindung
///
/// Wird als `Arc` zwischen Roster, Dispatcher und den IO-Tasks geteilt.
/// Alle Felder sind einzeln gekapselt; der Dispatcher ist der einzige
/// Mutator des Protokollzustands, die UDP-Tasks greifen nur auf den
/// Krypto-Kontext und die UDP-Adresse zu.
pub struct ClientConnection {
    /// Eindeutige, unveraenderliche Session-ID (niemals 0)
    pub session: u32,
    /// TCP-Adresse der Gegenseite
    pub tcp_adresse: SocketAddr,

    zustand: Mutex<VerbindungsZustand>,
    /// Wurde die Anmeldung je abgeschlossen? Steuert UserRemove-Broadcasts.
    angemeldet: AtomicBool,

    benutzername: Mutex<Option<String>>,
    celt_codecs: Mutex<Vec<i32>>,
    client_version: Mutex<Option<messages::Version>>,
    kommentar: Mutex<Option<String>>,

    kanal: AtomicU32,
    selbst_stumm: AtomicBool,
    selbst_taub: AtomicBool,

    krypto: Mutex<Option<CryptState>>,
    udp_adresse: Mutex<Option<SocketAddr>>,
    udp_fehler: AtomicU32,

    sende_tx: mpsc::UnboundedSender<ControlFrame>,
    udp_inbox_tx: mpsc::UnboundedSender<Vec<u8>>,
    schliessen_tx: watch::Sender<bool>,

    verbunden_seit: Instant,
}

impl ClientConnection {
    /// Erstellt eine neue Client-Verbindung im Zustand `Verbunden`
    pub fn neu(session: u32, tcp_adresse: SocketAddr) -> (Arc<Self>, ClientKanaele) {
        let (sende_tx, sende_rx) = mpsc::unbounded_channel();
        let (udp_inbox_tx, udp_inbox_rx) = mpsc::unbounded_channel();
        let (schliessen_tx, schliessen_rx) = watch::channel(false);

        let client = Arc::new(Self {
            session,
            tcp_adresse,
            zustand: Mutex::new(VerbindungsZustand::Verbunden),
            angemeldet: AtomicBool::new(false),
            benutzername: Mutex::new(None),
            celt_codecs: Mutex::new(Vec::new()),
            client_version: Mutex::new(None),
            kommentar: Mutex::new(None),
            kanal: AtomicU32::new(0),
            selbst_stumm: AtomicBool::new(false),
            selbst_taub: AtomicBool::new(false),
            krypto: Mutex::new(None),
            udp_adresse: Mutex::new(None),
            udp_fehler: AtomicU32::new(0),
            sende_tx,
            udp_inbox_tx,
            schliessen_tx,
            verbunden_seit: Instant::now(),
        });

        let kanaele = ClientKanaele {
            sende_rx,
            udp_inbox_rx,
            schliessen_rx,
        };

        (client, kanaele)
    }

    // -----------------------------------------------------------------------
    // Zustand
    // -----------------------------------------------------------------------

    /// Aktueller Verbindungszustand
    pub fn zustand(&self) -> VerbindungsZustand {
        *self.zustand.lock().expect("Zustands-Lock")
    }

    /// Setzt den Verbindungszustand; `Tot` bleibt terminal
    pub fn zustand_setzen(&self, neuer: VerbindungsZustand) {
        let mut zustand = self.zustand.lock().expect("Zustands-Lock");
        if *zustand == VerbindungsZustand::Tot {
            return;
        }
        if neuer == VerbindungsZustand::Authentifiziert {
            self.angemeldet.store(true, Ordering::Relaxed);
        }
        *zustand = neuer;
    }

    /// Markiert den Client als tot und loest das Schliessen-Signal aus
    pub fn tot_markieren(&self) {
        {
            let mut zustand = self.zustand.lock().expect("Zustands-Lock");
            if *zustand == VerbindungsZustand::Tot {
                return;
            }
            *zustand = VerbindungsZustand::Tot;
        }
        let _ = self.schliessen_tx.send(true);
    }

    pub fn ist_tot(&self) -> bool {
        self.zustand() == VerbindungsZustand::Tot
    }

    pub fn ist_authentifiziert(&self) -> bool {
        self.zustand() == VerbindungsZustand::Authentifiziert
    }

    /// Wurde die Anmeldung je abgeschlossen (auch wenn inzwischen tot)?
    pub fn war_angemeldet(&self) -> bool {
        self.angemeldet.load(Ordering::Relaxed)
    }

    // -----------------------------------------------------------------------
    // Stammdaten
    // -----------------------------------------------------------------------

    pub fn benutzername(&self) -> Option<String> {
        self.benutzername.lock().expect("Namens-Lock").clone()
    }

    pub fn benutzername_setzen(&self, name: String) {
        *self.benutzername.lock().expect("Namens-Lock") = Some(name);
    }

    pub fn celt_codecs(&self) -> Vec<i32> {
        self.celt_codecs.lock().expect("Codec-Lock").clone()
    }

    pub fn celt_codecs_setzen(&self, codecs: Vec<i32>) {
        *self.celt_codecs.lock().expect("Codec-Lock") = codecs;
    }

    pub fn client_version(&self) -> Option<messages::Version> {
        self.client_version.lock().expect("Versions-Lock").clone()
    }

    pub fn client_version_setzen(&self, version: messages::Version) {
        *self.client_version.lock().expect("Versions-Lock") = Some(version);
    }

    pub fn kommentar(&self) -> Option<String> {
        self.kommentar.lock().expect("Kommentar-Lock").clone()
    }

    pub fn kommentar_setzen(&self, kommentar: String) {
        *self.kommentar.lock().expect("Kommentar-Lock") = Some(kommentar);
    }

    pub fn kanal_id(&self) -> u32 {
        self.kanal.load(Ordering::Relaxed)
    }

    pub fn kanal_setzen(&self, kanal_id: u32) {
        self.kanal.store(kanal_id, Ordering::Relaxed);
    }

    pub fn selbst_stumm(&self) -> bool {
        self.selbst_stumm.load(Ordering::Relaxed)
    }

    pub fn selbst_stumm_setzen(&self, wert: bool) {
        self.selbst_stumm.store(wert, Ordering::Relaxed);
    }

    pub fn selbst_taub(&self) -> bool {
        self.selbst_taub.load(Ordering::Relaxed)
    }

    pub fn selbst_taub_setzen(&self, wert: bool) {
        self.selbst_taub.store(wert, Ordering::Relaxed);
    }

    /// Sekunden seit Verbindungsaufbau
    pub fn online_sekunden(&self) -> u32 {
        self.verbunden_seit.elapsed().as_secs() as u32
    }

    // -----------------------------------------------------------------------
    // Krypto und UDP
    // -----------------------------------------------------------------------

    /// Exklusiver Zugriff auf den Krypto-Kontext
    ///
    /// Der UDP-Ingress borgt den Kontext fuer genau einen
    /// Entschluesselungsversuch; der Lock wird nie ueber ein await gehalten.
    pub fn krypto_sperren(&self) -> std::sync::MutexGuard<'_, Option<CryptState>> {
        self.krypto.lock().expect("Krypto-Lock")
    }

    /// Installiert einen frischen Krypto-Kontext
    pub fn krypto_setzen(&self, krypto: CryptState) {
        *self.krypto.lock().expect("Krypto-Lock") = Some(krypto);
    }

    /// Gelernte UDP-Adresse des Clients
    pub fn udp_adresse(&self) -> Option<SocketAddr> {
        *self.udp_adresse.lock().expect("UDP-Lock")
    }

    pub fn udp_adresse_setzen(&self, adresse: SocketAddr) {
        *self.udp_adresse.lock().expect("UDP-Lock") = Some(adresse);
        self.udp_fehler.store(0, Ordering::Relaxed);
    }

    /// Vergisst die gelernte UDP-Adresse (erzwingt Neuentdeckung)
    pub fn udp_adresse_vergessen(&self) -> Option<SocketAddr> {
        self.udp_fehler.store(0, Ordering::Relaxed);
        self.udp_adresse.lock().expect("UDP-Lock").take()
    }

    /// Zaehlt einen Entschluesselungsfehler auf dem schnellen Pfad
    ///
    /// Gibt den neuen Zaehlerstand zurueck.
    pub fn udp_fehler_zaehlen(&self) -> u32 {
        self.udp_fehler.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn udp_fehler_zuruecksetzen(&self) {
        self.udp_fehler.store(0, Ordering::Relaxed);
    }

    // -----------------------------------------------------------------------
    // Senden
    // -----------------------------------------------------------------------

    /// Reiht einen Frame nicht-blockierend in die Sende-Queue ein
    ///
    /// Nach `Tot` werden Frames stillschweigend verworfen. Gibt `true`
    /// zurueck wenn der Frame eingereiht wurde.
    pub fn senden(&self, frame: ControlFrame) -> bool {
        if self.ist_tot() {
            return false;
        }
        self.sende_tx.send(frame).is_ok()
    }

    /// Serialisiert eine protobuf-Nachricht und reiht sie ein
    pub fn nachricht_senden<M: Message>(&self, kind: MessageKind, nachricht: &M) -> bool {
        self.senden(ControlFrame::aus_nachricht(kind, nachricht))
    }

    /// Stellt ein entschluesseltes UDP-Datagramm in die Inbox des Clients
    pub fn udp_zustellen(&self, daten: Vec<u8>) {
        if self.ist_tot() {
            return;
        }
        let _ = self.udp_inbox_tx.send(daten);
    }
}

impl std::fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConnection")
            .field("session", &self.session)
            .field("tcp_adresse", &self.tcp_adresse)
            .field("zustand", &self.zustand())
            .field("benutzername", &self.benutzername())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// IO-Tasks
// ---------------------------------------------------------------------------

/// Lese-Task: parst Frames und reicht sie an den Dispatcher weiter
///
/// Beendet sich bei EOF, Lesefehler oder Schliessen-Signal und meldet die
/// Trennung genau einmal an den Dispatcher.
pub async fn lese_schleife<R>(
    client: Arc<ClientConnection>,
    leser: R,
    dispatcher_tx: mpsc::UnboundedSender<DispatcherEreignis>,
    max_frame_groesse: usize,
    mut schliessen_rx: watch::Receiver<bool>,
) where
    R: AsyncRead + Unpin,
{
    let mut framed = FramedRead::new(leser, FrameCodec::with_max_size(max_frame_groesse));

    loop {
        tokio::select! {
            frame = framed.next() => {
                match frame {
                    Some(Ok(frame)) => {
                        tracing::trace!(
                            session = client.session,
                            kind = %frame.kind,
                            bytes = frame.payload.len(),
                            "Frame empfangen"
                        );
                        if dispatcher_tx
                            .send(DispatcherEreignis::Frame(Arc::clone(&client), frame))
                            .is_err()
                        {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        tracing::warn!(
                            session = client.session,
                            peer = %client.tcp_adresse,
                            fehler = %e,
                            "Frame-Lesefehler"
                        );
                        break;
                    }
                    None => {
                        tracing::info!(
                            session = client.session,
                            peer = %client.tcp_adresse,
                            "Verbindung vom Client getrennt"
                        );
                        break;
                    }
                }
            }

            Ok(()) = schliessen_rx.changed() => {
                if *schliessen_rx.borrow() {
                    break;
                }
            }
        }
    }

    client.tot_markieren();
    let _ = dispatcher_tx.send(DispatcherEreignis::Getrennt(client));
}

/// Schreib-Task: leert die Sende-Queue in den TLS-Stream
///
/// Ein Schreibfehler markiert den Client als tot und verwirft die
/// restliche Queue.
pub async fn schreib_schleife<W>(
    client: Arc<ClientConnection>,
    schreiber: W,
    mut sende_rx: mpsc::UnboundedReceiver<ControlFrame>,
    mut schliessen_rx: watch::Receiver<bool>,
) where
    W: AsyncWrite + Unpin,
{
    let mut framed = FramedWrite::new(schreiber, FrameCodec::new());

    loop {
        tokio::select! {
            frame = sende_rx.recv() => {
                match frame {
                    Some(frame) => {
                        if let Err(e) = framed.send(frame).await {
                            tracing::warn!(
                                session = client.session,
                                fehler = %e,
                                "Senden fehlgeschlagen"
                            );
                            client.tot_markieren();
                            // Restliche Queue verwerfen
                            sende_rx.close();
                            while sende_rx.try_recv().is_ok() {}
                            break;
                        }
                    }
                    None => break,
                }
            }

            Ok(()) = schliessen_rx.changed() => {
                if *schliessen_rx.borrow() {
                    // Bereits eingereihte Frames (z.B. ein Reject) noch rausschreiben
                    while let Ok(frame) = sende_rx.try_recv() {
                        if framed.send(frame).await.is_err() {
                            break;
                        }
                    }
                    break;
                }
            }
        }
    }

    tracing::debug!(session = client.session, "Schreib-Task beendet");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn test_adresse() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    #[test]
    fn zustand_uebergaenge() {
        let (client, _kanaele) = ClientConnection::neu(1, test_adresse());
        assert_eq!(client.zustand(), VerbindungsZustand::Verbunden);

        client.zustand_setzen(VerbindungsZustand::VersionGesendet);
        assert_eq!(client.zustand(), VerbindungsZustand::VersionGesendet);

        client.zustand_setzen(VerbindungsZustand::Authentifiziert);
        assert!(client.ist_authentifiziert());
        assert!(client.war_angemeldet());
    }

    #[test]
    fn tot_ist_terminal() {
        let (client, _kanaele) = ClientConnection::neu(2, test_adresse());
        client.tot_markieren();
        assert!(client.ist_tot());

        // Kein Weg zurueck
        client.zustand_setzen(VerbindungsZustand::Authentifiziert);
        assert!(client.ist_tot());
        assert!(!client.war_angemeldet());
    }

    #[test]
    fn senden_nach_tot_wird_verworfen() {
        let (client, mut kanaele) = ClientConnection::neu(3, test_adresse());

        let frame = ControlFrame::neu(MessageKind::Ping, Bytes::new());
        assert!(client.senden(frame.clone()));
        assert!(kanaele.sende_rx.try_recv().is_ok());

        client.tot_markieren();
        assert!(!client.senden(frame));
        assert!(kanaele.sende_rx.try_recv().is_err());
    }

    #[test]
    fn tot_loest_schliessen_signal_aus() {
        let (client, kanaele) = ClientConnection::neu(4, test_adresse());
        assert!(!*kanaele.schliessen_rx.borrow());
        client.tot_markieren();
        assert!(*kanaele.schliessen_rx.borrow());
    }

    #[test]
    fn udp_fehler_zaehler() {
        let (client, _kanaele) = ClientConnection::neu(5, test_adresse());
        let adresse = test_adresse();

        client.udp_adresse_setzen(adresse);
        assert_eq!(client.udp_adresse(), Some(adresse));

        assert_eq!(client.udp_fehler_zaehlen(), 1);
        assert_eq!(client.udp_fehler_zaehlen(), 2);

        // Setzen der Adresse setzt den Zaehler zurueck
        client.udp_adresse_setzen(adresse);
        assert_eq!(client.udp_fehler_zaehlen(), 1);

        assert_eq!(client.udp_adresse_vergessen(), Some(adresse));
        assert_eq!(client.udp_adresse(), None);
    }

    #[tokio::test]
    async fn schreib_schleife_serialisiert_frames() {
        let (client, kanaele) = ClientConnection::neu(6, test_adresse());
        let (lese_seite, schreib_seite) = tokio::io::duplex(4096);

        let handle = tokio::spawn(schreib_schleife(
            Arc::clone(&client),
            schreib_seite,
            kanaele.sende_rx,
            kanaele.schliessen_rx.clone(),
        ));

        client.nachricht_senden(
            MessageKind::Version,
            &messages::Version {
                release: Some("murmel".into()),
                ..Default::default()
            },
        );
        client.tot_markieren();
        handle.await.unwrap();

        let mut framed = FramedRead::new(lese_seite, FrameCodec::new());
        let frame = framed.next().await.unwrap().unwrap();
        assert_eq!(frame.kind, MessageKind::Version);
        let version: messages::Version = frame.dekodieren().unwrap();
        assert_eq!(version.release.as_deref(), Some("murmel"));
    }

    #[tokio::test]
    async fn lese_schleife_meldet_trennung() {
        let (client, kanaele) = ClientConnection::neu(7, test_adresse());
        let (dispatcher_tx, mut dispatcher_rx) = mpsc::unbounded_channel();
        let (lese_seite, schreib_seite) = tokio::io::duplex(4096);

        let handle = tokio::spawn(lese_schleife(
            Arc::clone(&client),
            lese_seite,
            dispatcher_tx,
            1024 * 1024,
            kanaele.schliessen_rx.clone(),
        ));

        // Einen Frame schicken, dann Verbindung schliessen
        let mut framed = FramedWrite::new(schreib_seite, FrameCodec::new());
        framed
            .send(ControlFrame::neu(MessageKind::Version, Bytes::new()))
            .await
            .unwrap();
        drop(framed);

        handle.await.unwrap();

        match dispatcher_rx.recv().await.unwrap() {
            DispatcherEreignis::Frame(c, frame) => {
                assert_eq!(c.session, 7);
                assert_eq!(frame.kind, MessageKind::Version);
            }
            andere => panic!("Frame erwartet, war {andere:?}"),
        }
        match dispatcher_rx.recv().await.unwrap() {
            DispatcherEreignis::Getrennt(c) => {
                assert_eq!(c.session, 7);
                assert!(c.ist_tot());
            }
            andere => panic!("Getrennt erwartet, war {andere:?}"),
        }
    }
}

//! Keepalive und Nonce-Verwaltung: Ping, CryptSetup
//!
//! Beides sind reine Request/Response-Pfade, es wird nie gebroadcastet.

use std::sync::Arc;

use murmel_protocol::messages::{self, ControlFrame, MessageKind};

use crate::client::ClientConnection;
use crate::error::ServerResult;

/// Ping: Zeitstempel spiegeln und Krypto-Statistik mitliefern
pub fn ping(client: &Arc<ClientConnection>, frame: &ControlFrame) -> ServerResult<()> {
    let anfrage: messages::Ping = frame.dekodieren()?;

    let mut antwort = messages::Ping {
        timestamp: anfrage.timestamp,
        ..Default::default()
    };

    {
        let krypto = client.krypto_sperren();
        if let Some(krypto) = krypto.as_ref() {
            antwort.good = Some(krypto.good);
            antwort.late = Some(krypto.late);
            antwort.lost = Some(krypto.lost);
            antwort.resync = Some(krypto.resync);
        }
    }

    client.nachricht_senden(MessageKind::Ping, &antwort);
    Ok(())
}

/// CryptSetup: Nonces auf Wunsch des Clients neu aushandeln
///
/// Der Schluessel bleibt erhalten; beide Nonces werden neu erzeugt und
/// als vollstaendiges Tripel zurueckgeschickt. Das alte Nonce-Paar ist
/// ab diesem Moment unbrauchbar. Schlaegt die Erneuerung fehl, beendet
/// der Dispatcher die Verbindung.
pub fn crypt_setup(client: &Arc<ClientConnection>, frame: &ControlFrame) -> ServerResult<()> {
    let _anfrage: messages::CryptSetup = frame.dekodieren()?;

    let antwort = {
        let mut guard = client.krypto_sperren();
        let Some(krypto) = guard.as_mut() else {
            return Ok(());
        };

        krypto.nonces_erneuern()?;
        messages::CryptSetup {
            key: Some(krypto.schluessel().to_vec()),
            client_nonce: Some(krypto.decrypt_iv().to_vec()),
            server_nonce: Some(krypto.encrypt_iv().to_vec()),
        }
    };

    tracing::debug!(session = client.session, "Nonces neu ausgehandelt");
    client.nachricht_senden(MessageKind::CryptSetup, &antwort);
    Ok(())
}

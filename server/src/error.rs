//! Fehlertypen des Servers
//!
//! Protokollfehler eines einzelnen Clients werden nie nach oben gereicht:
//! die Handler geben sie als `ServerResult` an den Dispatcher zurueck, der
//! den betroffenen Client auf `Tot` setzt und weiterlaeuft. Frame- und
//! Transportfehler entstehen in den IO-Tasks als `io::Error` und beenden
//! den jeweiligen Task direkt; Kanalbaum-Verletzungen werden in den
//! Handlern als PermissionDenied beantwortet.

use murmel_crypto::KryptoFehler;
use thiserror::Error;

/// Fehlertyp des Dispatch-Pfads
#[derive(Debug, Error)]
pub enum ServerError {
    /// Nachricht passt nicht zum Verbindungszustand
    #[error("Unerwartete Nachricht {kind} im Zustand {zustand}")]
    UnerwarteteNachricht { zustand: String, kind: String },

    /// Payload liess sich nicht dekodieren
    #[error("Payload-Dekodierung fehlgeschlagen: {0}")]
    PayloadDekodierung(#[from] prost::DecodeError),

    /// Krypto-Kontext konnte nicht erzeugt oder erneuert werden
    #[error("Krypto-Fehler: {0}")]
    Krypto(#[from] KryptoFehler),
}

/// Result-Typ der Dispatcher- und Handler-Pfade
pub type ServerResult<T> = Result<T, ServerError>;

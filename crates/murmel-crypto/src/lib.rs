//! murmel-crypto – authentifizierte Verschluesselung fuer den UDP-Kanal
//!
//! Implementiert den OCB2-Modus ueber AES-128 samt der Nonce- und
//! Replay-Verwaltung, die der Sprachkanal braucht. Pro Client existiert
//! genau ein `CryptState`; der Schluessel und die beiden Start-Nonces
//! werden nach der Anmeldung per CryptSetup an den Client uebertragen.

mod cryptstate;
mod ocb;

pub use cryptstate::{CryptState, KryptoFehler, IV_GROESSE, SCHLUESSEL_GROESSE};

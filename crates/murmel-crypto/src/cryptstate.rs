//! CryptState – Nonce-Verwaltung und Replay-Schutz pro Client
//!
//! Jede Richtung fuehrt eine eigene 16-Byte-Nonce, die pro Paket als
//! Zaehler (niederwertigstes Byte zuerst) hochgezaehlt wird. Das erste
//! Byte der Nonce wandert im Klartext ins Paket; daraus rekonstruiert
//! die Gegenseite verspaetete und verlorene Pakete innerhalb eines
//! Fensters von 30 Paketen. Eine History ueber das zweite Nonce-Byte
//! verwirft Wiederholungen.
//!
//! ## Paketformat
//!
//! ```text
//! [nonce_byte(1)] [tag(3)] [OCB2-Geheimtext...]
//! ```

use aes::cipher::generic_array::GenericArray;
use aes::cipher::KeyInit;
use aes::Aes128;
use rand::rngs::OsRng;
use rand::RngCore;
use thiserror::Error;

use crate::ocb::{ocb_entschluesseln, ocb_verschluesseln, Block, BLOCK_GROESSE};

/// Schluessellaenge (AES-128)
pub const SCHLUESSEL_GROESSE: usize = 16;

/// Nonce-Laenge (ein AES-Block)
pub const IV_GROESSE: usize = BLOCK_GROESSE;

/// Groesse des Paket-Headers (Nonce-Byte + 3 Tag-Bytes)
const HEADER_GROESSE: usize = 4;

/// Fenster fuer verspaetete Pakete
const SPAET_FENSTER: i32 = 30;

/// Fehler der UDP-Verschluesselung
#[derive(Debug, Error, PartialEq, Eq)]
pub enum KryptoFehler {
    /// Zufallsquelle lieferte keine Bytes
    #[error("Schluesselerzeugung fehlgeschlagen")]
    Schluesselerzeugung,

    /// Paket unterschreitet die Mindestlaenge
    #[error("Paket zu kurz: {0} Bytes")]
    ZuKurz(usize),

    /// Nonce-Byte passt in kein gueltiges Fenster
    #[error("Nonce ausserhalb des Fensters")]
    NonceAusserhalb,

    /// Paket wurde bereits verarbeitet
    #[error("Wiederholtes Paket")]
    Wiederholung,

    /// Tag-Verifikation fehlgeschlagen
    #[error("Authentifizierung fehlgeschlagen")]
    TagVerifikation,
}

/// Krypto-Kontext eines Clients fuer den UDP-Kanal
///
/// `encrypt_iv` zaehlt Server->Client, `decrypt_iv` Client->Server.
/// Im CryptSetup erhaelt der Client den Schluessel, `decrypt_iv` als
/// client_nonce und `encrypt_iv` als server_nonce.
pub struct CryptState {
    schluessel: [u8; SCHLUESSEL_GROESSE],
    encrypt_iv: Block,
    decrypt_iv: Block,
    decrypt_history: [u8; 256],
    cipher: Aes128,

    /// Erfolgreich entschluesselte Pakete
    pub good: u32,
    /// Verspaetet angekommene Pakete
    pub late: u32,
    /// Als verloren erkannte Pakete
    pub lost: u32,
    /// Nonce-Neuaushandlungen
    pub resync: u32,
}

impl CryptState {
    /// Erzeugt einen Kontext mit frischem Schluessel und frischen Nonces
    pub fn generieren() -> Result<Self, KryptoFehler> {
        let mut schluessel = [0u8; SCHLUESSEL_GROESSE];
        let mut encrypt_iv = [0u8; IV_GROESSE];
        let mut decrypt_iv = [0u8; IV_GROESSE];

        OsRng
            .try_fill_bytes(&mut schluessel)
            .map_err(|_| KryptoFehler::Schluesselerzeugung)?;
        OsRng
            .try_fill_bytes(&mut encrypt_iv)
            .map_err(|_| KryptoFehler::Schluesselerzeugung)?;
        OsRng
            .try_fill_bytes(&mut decrypt_iv)
            .map_err(|_| KryptoFehler::Schluesselerzeugung)?;

        Ok(Self::mit_schluessel(schluessel, encrypt_iv, decrypt_iv))
    }

    /// Erzeugt einen Kontext aus vorgegebenem Material (Tests, Gegenseite)
    pub fn mit_schluessel(
        schluessel: [u8; SCHLUESSEL_GROESSE],
        encrypt_iv: Block,
        decrypt_iv: Block,
    ) -> Self {
        let cipher = Aes128::new(GenericArray::from_slice(&schluessel));
        Self {
            schluessel,
            encrypt_iv,
            decrypt_iv,
            decrypt_history: [0u8; 256],
            cipher,
            good: 0,
            late: 0,
            lost: 0,
            resync: 0,
        }
    }

    /// Gibt den symmetrischen Schluessel zurueck
    pub fn schluessel(&self) -> &[u8; SCHLUESSEL_GROESSE] {
        &self.schluessel
    }

    /// Aktuelle Server->Client-Nonce
    pub fn encrypt_iv(&self) -> &Block {
        &self.encrypt_iv
    }

    /// Aktuelle Client->Server-Nonce
    pub fn decrypt_iv(&self) -> &Block {
        &self.decrypt_iv
    }

    /// Erzeugt beide Nonces neu (Schluessel bleibt erhalten)
    ///
    /// Das alte Nonce-Paar wird damit unbrauchbar; die Replay-History
    /// wird verworfen.
    pub fn nonces_erneuern(&mut self) -> Result<(), KryptoFehler> {
        OsRng
            .try_fill_bytes(&mut self.encrypt_iv)
            .map_err(|_| KryptoFehler::Schluesselerzeugung)?;
        OsRng
            .try_fill_bytes(&mut self.decrypt_iv)
            .map_err(|_| KryptoFehler::Schluesselerzeugung)?;
        self.decrypt_history = [0u8; 256];
        self.resync = self.resync.wrapping_add(1);
        Ok(())
    }

    /// Verschluesselt ein ausgehendes Paket
    ///
    /// Zaehlt die Sende-Nonce hoch und liefert `[nonce_byte, tag(3), geheimtext]`.
    pub fn verschluesseln(&mut self, klartext: &[u8]) -> Vec<u8> {
        // Nonce inkrementieren, niederwertigstes Byte zuerst
        for i in 0..IV_GROESSE {
            self.encrypt_iv[i] = self.encrypt_iv[i].wrapping_add(1);
            if self.encrypt_iv[i] != 0 {
                break;
            }
        }

        let mut koerper = Vec::with_capacity(klartext.len());
        let mut tag: Block = [0u8; BLOCK_GROESSE];
        ocb_verschluesseln(&self.cipher, &self.encrypt_iv, klartext, &mut koerper, &mut tag);

        let mut paket = Vec::with_capacity(HEADER_GROESSE + koerper.len());
        paket.push(self.encrypt_iv[0]);
        paket.extend_from_slice(&tag[..3]);
        paket.extend_from_slice(&koerper);
        paket
    }

    /// Entschluesselt ein eingehendes Paket
    ///
    /// Rekonstruiert die Empfangs-Nonce aus dem ersten Paketbyte,
    /// akzeptiert verspaetete Pakete innerhalb des Fensters und weist
    /// Wiederholungen sowie manipulierte Pakete zurueck.
    pub fn entschluesseln(&mut self, paket: &[u8]) -> Result<Vec<u8>, KryptoFehler> {
        if paket.len() < HEADER_GROESSE {
            return Err(KryptoFehler::ZuKurz(paket.len()));
        }

        let nonce_byte = paket[0];
        let gespeicherte_iv = self.decrypt_iv;
        let mut wiederherstellen = false;
        let mut verspaetet = 0u32;
        let mut verloren = 0i32;

        if self.decrypt_iv[0].wrapping_add(1) == nonce_byte {
            // Erwartete Reihenfolge
            if nonce_byte > gespeicherte_iv[0] {
                self.decrypt_iv[0] = nonce_byte;
            } else if nonce_byte < gespeicherte_iv[0] {
                // Ueberlauf des ersten Bytes
                self.decrypt_iv[0] = nonce_byte;
                for i in 1..IV_GROESSE {
                    self.decrypt_iv[i] = self.decrypt_iv[i].wrapping_add(1);
                    if self.decrypt_iv[i] != 0 {
                        break;
                    }
                }
            } else {
                return Err(KryptoFehler::Wiederholung);
            }
        } else {
            // Verspaetet oder Luecke
            let mut diff = i32::from(nonce_byte) - i32::from(gespeicherte_iv[0]);
            if diff > 128 {
                diff -= 256;
            } else if diff < -128 {
                diff += 256;
            }

            if nonce_byte < gespeicherte_iv[0] && diff > -SPAET_FENSTER && diff < 0 {
                // Verspaetetes Paket ohne Byte-Ueberlauf
                verspaetet = 1;
                verloren = -1;
                self.decrypt_iv[0] = nonce_byte;
                wiederherstellen = true;
            } else if nonce_byte > gespeicherte_iv[0] && diff > -SPAET_FENSTER && diff < 0 {
                // Verspaetetes Paket ueber den Byte-Ueberlauf hinweg
                verspaetet = 1;
                verloren = -1;
                self.decrypt_iv[0] = nonce_byte;
                for i in 1..IV_GROESSE {
                    let vorher = self.decrypt_iv[i];
                    self.decrypt_iv[i] = vorher.wrapping_sub(1);
                    if vorher != 0 {
                        break;
                    }
                }
                wiederherstellen = true;
            } else if nonce_byte > gespeicherte_iv[0] && diff > 0 {
                // Luecke ohne Byte-Ueberlauf
                verloren = i32::from(nonce_byte) - i32::from(gespeicherte_iv[0]) - 1;
                self.decrypt_iv[0] = nonce_byte;
            } else if nonce_byte < gespeicherte_iv[0] && diff > 0 {
                // Luecke ueber den Byte-Ueberlauf hinweg
                verloren = 256 - i32::from(gespeicherte_iv[0]) + i32::from(nonce_byte) - 1;
                self.decrypt_iv[0] = nonce_byte;
                for i in 1..IV_GROESSE {
                    self.decrypt_iv[i] = self.decrypt_iv[i].wrapping_add(1);
                    if self.decrypt_iv[i] != 0 {
                        break;
                    }
                }
            } else {
                return Err(KryptoFehler::NonceAusserhalb);
            }

            if self.decrypt_history[self.decrypt_iv[0] as usize] == self.decrypt_iv[1] {
                self.decrypt_iv = gespeicherte_iv;
                return Err(KryptoFehler::Wiederholung);
            }
        }

        let mut klartext = Vec::with_capacity(paket.len() - HEADER_GROESSE);
        let mut tag: Block = [0u8; BLOCK_GROESSE];
        ocb_entschluesseln(
            &self.cipher,
            &self.decrypt_iv,
            &paket[HEADER_GROESSE..],
            &mut klartext,
            &mut tag,
        );

        if tag[..3] != paket[1..4] {
            self.decrypt_iv = gespeicherte_iv;
            return Err(KryptoFehler::TagVerifikation);
        }

        self.decrypt_history[self.decrypt_iv[0] as usize] = self.decrypt_iv[1];
        if wiederherstellen {
            self.decrypt_iv = gespeicherte_iv;
        }

        self.good = self.good.wrapping_add(1);
        self.late = self.late.wrapping_add(verspaetet);
        // Ein verspaetetes Paket fuellt eine zuvor als Verlust gezaehlte
        // Luecke wieder auf (verloren = -1)
        if verloren >= 0 {
            self.lost = self.lost.wrapping_add(verloren as u32);
        } else {
            self.lost = self.lost.saturating_sub(verloren.unsigned_abs());
        }

        Ok(klartext)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    /// Baut ein Server/Client-Paar mit gespiegelten Nonces
    fn test_paar() -> (CryptState, CryptState) {
        let server = CryptState::generieren().expect("Schluesselerzeugung");
        let client = CryptState::mit_schluessel(
            *server.schluessel(),
            *server.decrypt_iv(),
            *server.encrypt_iv(),
        );
        (server, client)
    }

    #[test]
    fn generieren_liefert_unterschiedliches_material() {
        let a = CryptState::generieren().unwrap();
        let b = CryptState::generieren().unwrap();
        assert_ne!(a.schluessel(), b.schluessel());
        assert_ne!(a.encrypt_iv(), b.encrypt_iv());
    }

    #[test]
    fn round_trip_beide_richtungen() {
        let (mut server, mut client) = test_paar();

        for laenge in 0usize..=48 {
            let klartext: Vec<u8> = (0..laenge).map(|i| (i * 13) as u8).collect();

            // Client -> Server
            let paket = client.verschluesseln(&klartext);
            assert_eq!(paket.len(), klartext.len() + 4);
            let dekodiert = server.entschluesseln(&paket).expect("Entschluesseln");
            assert_eq!(dekodiert, klartext, "Laenge {laenge}");

            // Server -> Client
            let paket = server.verschluesseln(&klartext);
            let dekodiert = client.entschluesseln(&paket).expect("Entschluesseln");
            assert_eq!(dekodiert, klartext, "Laenge {laenge}");
        }

        assert_eq!(server.good, 49);
        assert_eq!(server.late, 0);
        assert_eq!(server.lost, 0);
    }

    #[test]
    fn manipuliertes_paket_wird_abgelehnt() {
        let (mut server, mut client) = test_paar();

        let mut paket = client.verschluesseln(b"sprachdaten");
        paket[6] ^= 0x01;

        assert_eq!(
            server.entschluesseln(&paket),
            Err(KryptoFehler::TagVerifikation)
        );
        assert_eq!(server.good, 0);
    }

    #[test]
    fn wiederholtes_paket_wird_abgelehnt() {
        let (mut server, mut client) = test_paar();

        let paket = client.verschluesseln(b"einmalig");
        assert!(server.entschluesseln(&paket).is_ok());
        assert!(server.entschluesseln(&paket).is_err());
        assert_eq!(server.good, 1);
    }

    #[test]
    fn verspaetetes_paket_im_fenster_akzeptiert() {
        let (mut server, mut client) = test_paar();

        let p1 = client.verschluesseln(b"eins");
        let p2 = client.verschluesseln(b"zwei");
        let p3 = client.verschluesseln(b"drei");

        assert!(server.entschluesseln(&p1).is_ok());
        // p3 vor p2: eine Luecke entsteht
        assert!(server.entschluesseln(&p3).is_ok());
        assert_eq!(server.lost, 1);

        // p2 kommt verspaetet an, wird angenommen und fuellt die Luecke
        let dekodiert = server.entschluesseln(&p2).expect("Verspaetet im Fenster");
        assert_eq!(dekodiert, b"zwei");
        assert_eq!(server.late, 1);
        assert_eq!(server.lost, 0);

        // dasselbe verspaetete Paket erneut: Wiederholung
        assert_eq!(server.entschluesseln(&p2), Err(KryptoFehler::Wiederholung));
    }

    #[test]
    fn falscher_schluessel_schlaegt_fehl() {
        let (mut server, _) = test_paar();
        let mut fremder = CryptState::mit_schluessel(
            [0x99; SCHLUESSEL_GROESSE],
            *server.decrypt_iv(),
            *server.encrypt_iv(),
        );

        let paket = fremder.verschluesseln(b"fremd");
        assert_eq!(
            server.entschluesseln(&paket),
            Err(KryptoFehler::TagVerifikation)
        );
    }

    #[test]
    fn nonce_ueberlauf_im_ersten_byte() {
        let schluessel = [0x07u8; SCHLUESSEL_GROESSE];
        let mut iv = [0u8; IV_GROESSE];
        iv[0] = 0xFF;

        let mut server = CryptState::mit_schluessel(schluessel, [0u8; IV_GROESSE], iv);
        let mut client = CryptState::mit_schluessel(schluessel, iv, [0u8; IV_GROESSE]);

        // Erstes Paket laesst das Nonce-Byte ueberlaufen
        let paket = client.verschluesseln(b"wrap");
        assert_eq!(paket[0], 0x00);
        let dekodiert = server.entschluesseln(&paket).expect("Ueberlauf");
        assert_eq!(dekodiert, b"wrap");

        // Folgepaket normal
        let paket = client.verschluesseln(b"danach");
        assert_eq!(server.entschluesseln(&paket).unwrap(), b"danach");
    }

    #[test]
    fn zu_kurze_pakete() {
        let (mut server, _) = test_paar();
        assert_eq!(server.entschluesseln(&[]), Err(KryptoFehler::ZuKurz(0)));
        assert_eq!(server.entschluesseln(&[1, 2, 3]), Err(KryptoFehler::ZuKurz(3)));
    }

    #[test]
    fn nonces_erneuern_macht_alte_kette_unbrauchbar() {
        let (mut server, mut client) = test_paar();

        let paket = client.verschluesseln(b"vorher");
        assert!(server.entschluesseln(&paket).is_ok());

        let alte_enc = *server.encrypt_iv();
        server.nonces_erneuern().expect("Erneuern");
        assert_ne!(server.encrypt_iv(), &alte_enc);
        assert_eq!(server.resync, 1);

        // Client verschluesselt weiter mit der alten Kette
        let paket = client.verschluesseln(b"nachher");
        assert!(server.entschluesseln(&paket).is_err());
    }

    #[test]
    fn statistik_zaehlt_luecken() {
        let (mut server, mut client) = test_paar();

        let p1 = client.verschluesseln(b"a");
        let _p2 = client.verschluesseln(b"b");
        let _p3 = client.verschluesseln(b"c");
        let p4 = client.verschluesseln(b"d");

        assert!(server.entschluesseln(&p1).is_ok());
        assert!(server.entschluesseln(&p4).is_ok());
        assert_eq!(server.lost, 2);
        assert_eq!(server.good, 2);
    }
}

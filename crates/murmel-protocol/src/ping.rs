//! Zustandsloser UDP-Ping
//!
//! Clients erkunden die Serverauslastung ohne Anmeldung mit einem exakt
//! 12 Byte grossen Datagramm; der Server antwortet mit 24 Bytes. Alle
//! Felder sind big-endian.
//!
//! ## Anfrage (12 Bytes)
//!
//! ```text
//! Offset  Len  Beschreibung
//! ------  ---  -----------
//!  0       4   Anfragetyp
//!  4       8   Client-Kennung (wird gespiegelt)
//! ```
//!
//! ## Antwort (24 Bytes)
//!
//! ```text
//!  0       4   Serverversion (major<<16 | minor<<8 | patch)
//!  4       8   gespiegelte Client-Kennung
//! 12       4   Anzahl authentifizierter Benutzer
//! 16       4   maximale Benutzerzahl
//! 20       4   maximale Bandbreite (bps)
//! ```
//!
//! Datagramme mit 11 oder 13 Bytes sind KEINE Pings; sie laufen in den
//! Sprachpfad.

/// Exakte Laenge eines Ping-Datagramms
pub const PING_ANFRAGE_LAENGE: usize = 12;

/// Laenge der Ping-Antwort
pub const PING_ANTWORT_LAENGE: usize = 24;

/// Gepackte Serverversion 1.2.2
pub const SERVER_VERSION_GEPACKT: u32 = (1 << 16) | (2 << 8) | 2;

/// Geparste Ping-Anfrage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingAnfrage {
    /// Anfragetyp (derzeit immer 0)
    pub typ: u32,
    /// Zufaellige Client-Kennung, wird in der Antwort gespiegelt
    pub kennung: u64,
}

impl PingAnfrage {
    /// Parst ein Datagramm als Ping-Anfrage
    ///
    /// Gibt `None` zurueck wenn die Laenge nicht exakt 12 Bytes betraegt.
    pub fn parsen(daten: &[u8]) -> Option<Self> {
        if daten.len() != PING_ANFRAGE_LAENGE {
            return None;
        }
        let typ = u32::from_be_bytes([daten[0], daten[1], daten[2], daten[3]]);
        let kennung = u64::from_be_bytes([
            daten[4], daten[5], daten[6], daten[7], daten[8], daten[9], daten[10], daten[11],
        ]);
        Some(Self { typ, kennung })
    }
}

/// Ping-Antwort mit Serverdaten
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingAntwort {
    pub version: u32,
    pub kennung: u64,
    pub benutzer: u32,
    pub max_benutzer: u32,
    pub max_bandbreite: u32,
}

impl PingAntwort {
    /// Baut die Antwort auf eine Anfrage
    pub fn neu(anfrage: &PingAnfrage, benutzer: u32, max_benutzer: u32, max_bandbreite: u32) -> Self {
        Self {
            version: SERVER_VERSION_GEPACKT,
            kennung: anfrage.kennung,
            benutzer,
            max_benutzer,
            max_bandbreite,
        }
    }

    /// Serialisiert die Antwort in 24 Bytes (big-endian)
    pub fn kodieren(&self) -> [u8; PING_ANTWORT_LAENGE] {
        let mut buf = [0u8; PING_ANTWORT_LAENGE];
        buf[0..4].copy_from_slice(&self.version.to_be_bytes());
        buf[4..12].copy_from_slice(&self.kennung.to_be_bytes());
        buf[12..16].copy_from_slice(&self.benutzer.to_be_bytes());
        buf[16..20].copy_from_slice(&self.max_benutzer.to_be_bytes());
        buf[20..24].copy_from_slice(&self.max_bandbreite.to_be_bytes());
        buf
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

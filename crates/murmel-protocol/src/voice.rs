//! Sprach-Datagramme (UDP bzw. UDPTunnel)
//!
//! Der Server dekodiert Sprachpakete nicht; er liest nur das Kopfbyte und
//! setzt beim Weiterleiten die Session des Absenders als Varint ein.
//!
//! ## Paketformat
//!
//! ```text
//! Client -> Server: [Kopf(1)] [Nutzdaten...]
//! Server -> Client: [Kopf(1)] [Session als Varint] [Nutzdaten...]
//! ```
//!
//! Das Kopfbyte traegt in den oberen 3 Bits den Pakettyp und in den
//! unteren 5 Bits das Sprachziel (0 = normaler Kanal-Talk).

/// Pakettyp: CELT-Alpha-Audio
pub const TYP_CELT_ALPHA: u8 = 0;
/// Pakettyp: Sprach-Ping (wird unveraendert zurueckgeschickt)
pub const TYP_PING: u8 = 1;
/// Pakettyp: Speex-Audio
pub const TYP_SPEEX: u8 = 2;
/// Pakettyp: CELT-Beta-Audio
pub const TYP_CELT_BETA: u8 = 3;
/// Pakettyp: Opus-Audio
pub const TYP_OPUS: u8 = 4;

/// Zerlegtes Sprachpaket (nur der Kopf wird interpretiert)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SprachPaket<'a> {
    /// Pakettyp (obere 3 Bits des Kopfbytes)
    pub typ: u8,
    /// Sprachziel (untere 5 Bits des Kopfbytes)
    pub ziel: u8,
    /// Nutzdaten nach dem Kopfbyte (Sequenz-Varint + Audio-Frames)
    pub nutzdaten: &'a [u8],
}

/// Zerlegt ein Sprachpaket in Kopf und Nutzdaten
///
/// Gibt `None` bei leeren Datagrammen zurueck.
pub fn zerlegen(daten: &[u8]) -> Option<SprachPaket<'_>> {
    let (&kopf, nutzdaten) = daten.split_first()?;
    Some(SprachPaket {
        typ: kopf >> 5,
        ziel: kopf & 0x1F,
        nutzdaten,
    })
}

/// Baut das Paket fuer die Weiterleitung an einen Empfaenger
///
/// Der Zielanteil des Kopfbytes wird genullt (normaler Talk) und die
/// Session des Absenders als Varint eingeschoben.
pub fn weiterleitung_bauen(typ: u8, session: u32, nutzdaten: &[u8]) -> Vec<u8> {
    let mut paket = Vec::with_capacity(1 + 9 + nutzdaten.len());
    paket.push(typ << 5);
    varint_kodieren(u64::from(session), &mut paket);
    paket.extend_from_slice(nutzdaten);
    paket
}

// ---------------------------------------------------------------------------
// Mumble-Varint
// ---------------------------------------------------------------------------

/// Kodiert einen nicht-negativen Wert als Mumble-Varint
pub fn varint_kodieren(wert: u64, ziel: &mut Vec<u8>) {
    if wert < 0x80 {
        ziel.push(wert as u8);
    } else if wert < 0x4000 {
        ziel.push(0x80 | (wert >> 8) as u8);
        ziel.push(wert as u8);
    } else if wert < 0x20_0000 {
        ziel.push(0xC0 | (wert >> 16) as u8);
        ziel.push((wert >> 8) as u8);
        ziel.push(wert as u8);
    } else if wert < 0x1000_0000 {
        ziel.push(0xE0 | (wert >> 24) as u8);
        ziel.push((wert >> 16) as u8);
        ziel.push((wert >> 8) as u8);
        ziel.push(wert as u8);
    } else if wert <= u64::from(u32::MAX) {
        ziel.push(0xF0);
        ziel.extend_from_slice(&(wert as u32).to_be_bytes());
    } else {
        ziel.push(0xF4);
        ziel.extend_from_slice(&wert.to_be_bytes());
    }
}

/// Dekodiert ein Mumble-Varint
///
/// Gibt `(wert, verbrauchte_bytes)` zurueck, oder `None` bei zu kurzen
/// Daten. Negative Kodierungen (Praefix 0xF8/0xFC) werden als Betrag
/// gelesen; der Server benutzt sie nicht.
pub fn varint_dekodieren(quelle: &[u8]) -> Option<(u64, usize)> {
    let &erster = quelle.first()?;

    if erster & 0x80 == 0 {
        Some((u64::from(erster & 0x7F), 1))
    } else if erster & 0xC0 == 0x80 {
        let rest = *quelle.get(1)?;
        Some(((u64::from(erster & 0x3F) << 8) | u64::from(rest), 2))
    } else if erster & 0xE0 == 0xC0 {
        if quelle.len() < 3 {
            return None;
        }
        Some((
            (u64::from(erster & 0x1F) << 16) | (u64::from(quelle[1]) << 8) | u64::from(quelle[2]),
            3,
        ))
    } else if erster & 0xF0 == 0xE0 {
        if quelle.len() < 4 {
            return None;
        }
        Some((
            (u64::from(erster & 0x0F) << 24)
                | (u64::from(quelle[1]) << 16)
                | (u64::from(quelle[2]) << 8)
                | u64::from(quelle[3]),
            4,
        ))
    } else if erster & 0xFC == 0xF0 {
        if quelle.len() < 5 {
            return None;
        }
        Some((
            u64::from(u32::from_be_bytes([quelle[1], quelle[2], quelle[3], quelle[4]])),
            5,
        ))
    } else if erster & 0xFC == 0xF4 {
        if quelle.len() < 9 {
            return None;
        }
        Some((
            u64::from_be_bytes([
                quelle[1], quelle[2], quelle[3], quelle[4], quelle[5], quelle[6], quelle[7],
                quelle[8],
            ]),
            9,
        ))
    } else if erster & 0xFC == 0xF8 {
        // Negierte Rekursion – Betrag dekodieren
        let (wert, laenge) = varint_dekodieren(&quelle[1..])?;
        Some((wert, laenge + 1))
    } else {
        // 0xFC: kleine negative Zahl, Betrag in den unteren 2 Bits
        Some((u64::from(erster & 0x03), 1))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(wert: u64) {
        let mut buf = Vec::new();
        varint_kodieren(wert, &mut buf);
        let (dekodiert, laenge) = varint_dekodieren(&buf).expect("Dekodieren muss klappen");
        assert_eq!(dekodiert, wert, "Wert {wert:#x}");
        assert_eq!(laenge, buf.len());
    }

    #[test]
    fn varint_round_trip_groessenklassen() {
        for wert in [
            0u64,
            1,
            0x7F,
            0x80,
            0x3FFF,
            0x4000,
            0x1F_FFFF,
            0x20_0000,
            0xFFF_FFFF,
            0x1000_0000,
            u64::from(u32::MAX),
            u64::from(u32::MAX) + 1,
            u64::MAX,
        ] {
            round_trip(wert);
        }
    }

    #[test]
    fn varint_kodierte_laengen() {
        let erwartet = [(0x7Fu64, 1usize), (0x80, 2), (0x4000, 3), (0x20_0000, 4), (0x1000_0000, 5), (1 << 40, 9)];
        for (wert, laenge) in erwartet {
            let mut buf = Vec::new();
            varint_kodieren(wert, &mut buf);
            assert_eq!(buf.len(), laenge, "Wert {wert:#x}");
        }
    }

    #[test]
    fn varint_zu_kurze_daten() {
        assert!(varint_dekodieren(&[]).is_none());
        assert!(varint_dekodieren(&[0x80]).is_none());
        assert!(varint_dekodieren(&[0xF0, 0x01, 0x02]).is_none());
    }

    #[test]
    fn sprachpaket_zerlegen() {
        // Typ 4 (Opus), Ziel 2, danach Nutzdaten
        let daten = [0x82u8, 0xAA, 0xBB, 0xCC];
        let paket = zerlegen(&daten).expect("Nicht leer");
        assert_eq!(paket.typ, 4);
        assert_eq!(paket.ziel, 2);
        assert_eq!(paket.nutzdaten, &[0xAA, 0xBB, 0xCC]);
    }

    #[test]
    fn sprachpaket_leer() {
        assert!(zerlegen(&[]).is_none());
    }

    #[test]
    fn weiterleitung_setzt_session_ein() {
        let nutzdaten = [0x01u8, 0x02, 0x03];
        let paket = weiterleitung_bauen(TYP_CELT_ALPHA, 7, &nutzdaten);

        // Kopf: Typ 0, Ziel genullt
        assert_eq!(paket[0], 0x00);
        // Session 7 als Ein-Byte-Varint
        assert_eq!(paket[1], 0x07);
        assert_eq!(&paket[2..], &nutzdaten);
    }

    #[test]
    fn weiterleitung_grosse_session() {
        let paket = weiterleitung_bauen(TYP_CELT_BETA, 300, &[]);
        assert_eq!(paket[0], TYP_CELT_BETA << 5);
        let (session, _) = varint_dekodieren(&paket[1..]).unwrap();
        assert_eq!(session, 300);
    }

    #[test]
    fn ping_paket_wird_erkannt() {
        // Kopfbyte 0x20 = Typ 1 (Ping), Ziel 0
        let paket = zerlegen(&[0x20, 0x05]).unwrap();
        assert_eq!(paket.typ, TYP_PING);
        assert_eq!(paket.ziel, 0);
    }
}

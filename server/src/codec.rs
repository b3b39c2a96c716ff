//! Codec-Koordinator – handelt die beiden aktiven CELT-Codecs aus
//!
//! Der Server haelt hoechstens zwei Codec-IDs gleichzeitig aktiv
//! (Alpha/Beta) und wechselt rollierend, damit bei einem Codec-Wechsel
//! keine Clients stranden, die nur eine der beiden Versionen sprechen.
//! Der Gewinner ist der meistbeworbene Codec ueber alle Clients; bei
//! Gleichstand gewinnt der zuerst gesehene (deterministisch pro Lauf).

/// Kompatibilitaets-Bitstrom: Legacy-Codec, der immer im Alpha-Slot landet
pub const CELT_KOMPAT_BITSTROM: i32 = -2147483638;

/// Aktive Codec-Slots des Servers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CodecZustand {
    pub alpha: i32,
    pub beta: i32,
    pub bevorzuge_alpha: bool,
}

/// Bestimmt den meistbeworbenen Codec ueber alle Client-Listen
///
/// Das Histogramm wird in Erstbegegnungs-Reihenfolge aufgebaut; der
/// strikte Groesser-Vergleich laesst bei Gleichstand den zuerst
/// gesehenen Codec gewinnen. Ohne beworbene Codecs ist der Gewinner 0.
pub fn gewinner_bestimmen<'a, I>(listen: I) -> i32
where
    I: IntoIterator<Item = &'a [i32]>,
{
    let mut histogramm: Vec<(i32, u32)> = Vec::new();

    for liste in listen {
        for codec in liste {
            match histogramm.iter_mut().find(|(id, _)| id == codec) {
                Some((_, zaehler)) => *zaehler += 1,
                None => histogramm.push((*codec, 1)),
            }
        }
    }

    let mut gewinner = 0i32;
    let mut bester_zaehler = 0u32;
    for (codec, zaehler) in histogramm {
        if zaehler > bester_zaehler {
            bester_zaehler = zaehler;
            gewinner = codec;
        }
    }

    gewinner
}

/// Wendet einen Gewinner auf die Codec-Slots an
///
/// Gibt `true` zurueck wenn sich der Zustand geaendert hat und ein
/// CodecVersion-Broadcast faellig ist:
///
/// 1. Ist der Gewinner bereits der aktuelle Codec, passiert nichts.
/// 2. Der Kompatibilitaets-Bitstrom erzwingt den Alpha-Slot; sonst
///    wechselt die Bevorzugung auf den jeweils anderen Slot.
/// 3. Der Gewinner wird in den nun bevorzugten Slot geschrieben.
pub fn anwenden(zustand: &mut CodecZustand, gewinner: i32) -> bool {
    let aktuell = if zustand.bevorzuge_alpha {
        zustand.alpha
    } else {
        zustand.beta
    };

    if gewinner == aktuell {
        return false;
    }

    if gewinner == CELT_KOMPAT_BITSTROM {
        zustand.bevorzuge_alpha = true;
    } else {
        zustand.bevorzuge_alpha = !zustand.bevorzuge_alpha;
    }

    if zustand.bevorzuge_alpha {
        zustand.alpha = gewinner;
    } else {
        zustand.beta = gewinner;
    }

    true
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

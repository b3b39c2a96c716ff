//! Kanalbaum – gewurzelter Baum benannter Kanaele
//!
//! Der Root-Kanal hat immer die ID 0 und keinen Elternknoten; jeder
//! authentifizierte Benutzer steht in genau einem Kanal. Mutationen
//! erhalten die Invarianten: eindeutige IDs, keine Zyklen, genau eine
//! Wurzel. Temporaere Kanaele werden geloescht sobald sie leer sind.

use std::collections::HashMap;

use thiserror::Error;

/// ID des Root-Kanals
pub const ROOT_KANAL: u32 = 0;

/// Fehler bei Kanalbaum-Mutationen
///
/// `Zyklus` entspricht einer Invariantenverletzung und wird dem Client
/// als PermissionDenied zurueckgemeldet; die Mutation findet nicht statt.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum KanalFehler {
    #[error("Kanal {0} existiert nicht")]
    NichtGefunden(u32),

    #[error("Verschieben wuerde einen Zyklus erzeugen")]
    Zyklus,

    #[error("Der Root-Kanal kann nicht veraendert werden")]
    WurzelGeschuetzt,

    #[error("Unter diesem Elternkanal existiert bereits ein Kanal '{0}'")]
    NameVergeben(String),
}

/// Ein einzelner Kanal
#[derive(Debug, Clone)]
pub struct Kanal {
    pub id: u32,
    pub name: String,
    pub beschreibung: Option<String>,
    pub temporaer: bool,
    pub position: i32,
    /// Elternkanal; nur Root hat keinen
    pub eltern: Option<u32>,
    /// Kindkanaele in Anlegereihenfolge
    pub kinder: Vec<u32>,
}

/// Gewurzelter Kanalbaum mit ID-Vergabe
#[derive(Debug)]
pub struct KanalBaum {
    kanaele: HashMap<u32, Kanal>,
    naechste_id: u32,
}

impl KanalBaum {
    /// Erstellt den Baum mit dem Root-Kanal (ID 0, Name "Root")
    pub fn neu() -> Self {
        let mut kanaele = HashMap::new();
        kanaele.insert(
            ROOT_KANAL,
            Kanal {
                id: ROOT_KANAL,
                name: "Root".into(),
                beschreibung: None,
                temporaer: false,
                position: 0,
                eltern: None,
                kinder: Vec::new(),
            },
        );
        Self {
            kanaele,
            naechste_id: 1,
        }
    }

    /// Prueft ob eine Kanal-ID existiert
    pub fn existiert(&self, id: u32) -> bool {
        self.kanaele.contains_key(&id)
    }

    /// Gibt einen Kanal zurueck
    pub fn hole(&self, id: u32) -> Option<&Kanal> {
        self.kanaele.get(&id)
    }

    /// Anzahl der Kanaele (inkl. Root)
    pub fn anzahl(&self) -> usize {
        self.kanaele.len()
    }

    /// Legt einen Kanal unter `eltern` an und gibt die neue ID zurueck
    pub fn anlegen(
        &mut self,
        name: &str,
        eltern: u32,
        beschreibung: Option<String>,
        position: i32,
        temporaer: bool,
    ) -> Result<u32, KanalFehler> {
        if !self.existiert(eltern) {
            return Err(KanalFehler::NichtGefunden(eltern));
        }
        if self.geschwister_mit_namen(eltern, name) {
            return Err(KanalFehler::NameVergeben(name.into()));
        }

        let id = self.naechste_id;
        self.naechste_id += 1;

        self.kanaele.insert(
            id,
            Kanal {
                id,
                name: name.into(),
                beschreibung,
                temporaer,
                position,
                eltern: Some(eltern),
                kinder: Vec::new(),
            },
        );
        self.kanaele
            .get_mut(&eltern)
            .expect("Eltern gerade geprueft")
            .kinder
            .push(id);

        Ok(id)
    }

    /// Benennt einen Kanal um
    pub fn umbenennen(&mut self, id: u32, name: &str) -> Result<(), KanalFehler> {
        if id == ROOT_KANAL {
            return Err(KanalFehler::WurzelGeschuetzt);
        }
        let eltern = self
            .kanaele
            .get(&id)
            .ok_or(KanalFehler::NichtGefunden(id))?
            .eltern
            .expect("Nur Root hat keine Eltern");
        if self.geschwister_mit_namen(eltern, name) {
            return Err(KanalFehler::NameVergeben(name.into()));
        }
        self.kanaele.get_mut(&id).expect("gerade geprueft").name = name.into();
        Ok(())
    }

    /// Setzt die Beschreibung eines Kanals
    pub fn beschreibung_setzen(&mut self, id: u32, beschreibung: String) -> Result<(), KanalFehler> {
        let kanal = self
            .kanaele
            .get_mut(&id)
            .ok_or(KanalFehler::NichtGefunden(id))?;
        kanal.beschreibung = Some(beschreibung);
        Ok(())
    }

    /// Verschiebt einen Kanal unter einen neuen Elternkanal
    ///
    /// Die Mutation wird abgelehnt wenn sie einen Zyklus erzeugen wuerde,
    /// d.h. wenn der neue Elternkanal der Kanal selbst oder einer seiner
    /// Nachfahren ist.
    pub fn verschieben(&mut self, id: u32, neue_eltern: u32) -> Result<(), KanalFehler> {
        if id == ROOT_KANAL {
            return Err(KanalFehler::WurzelGeschuetzt);
        }
        if !self.existiert(id) {
            return Err(KanalFehler::NichtGefunden(id));
        }
        if !self.existiert(neue_eltern) {
            return Err(KanalFehler::NichtGefunden(neue_eltern));
        }
        if id == neue_eltern || self.ist_nachfahre(neue_eltern, id) {
            return Err(KanalFehler::Zyklus);
        }

        let alte_eltern = self.kanaele[&id].eltern.expect("Nur Root hat keine Eltern");
        if alte_eltern == neue_eltern {
            return Ok(());
        }

        let name = self.kanaele[&id].name.clone();
        if self.geschwister_mit_namen(neue_eltern, &name) {
            return Err(KanalFehler::NameVergeben(name));
        }

        self.kanaele
            .get_mut(&alte_eltern)
            .expect("Eltern-Eintrag")
            .kinder
            .retain(|kind| *kind != id);
        self.kanaele
            .get_mut(&neue_eltern)
            .expect("gerade geprueft")
            .kinder
            .push(id);
        self.kanaele.get_mut(&id).expect("gerade geprueft").eltern = Some(neue_eltern);

        Ok(())
    }

    /// Entfernt einen Kanal samt Teilbaum
    ///
    /// Gibt die IDs aller entfernten Kanaele zurueck (Wurzel des Teilbaums
    /// zuerst). Die Einordnung der bisherigen Bewohner nach Root uebernimmt
    /// der Aufrufer.
    pub fn entfernen(&mut self, id: u32) -> Result<Vec<u32>, KanalFehler> {
        if id == ROOT_KANAL {
            return Err(KanalFehler::WurzelGeschuetzt);
        }
        if !self.existiert(id) {
            return Err(KanalFehler::NichtGefunden(id));
        }

        let entfernte = self.teilbaum(id);
        let eltern = self.kanaele[&id].eltern.expect("Nur Root hat keine Eltern");
        self.kanaele
            .get_mut(&eltern)
            .expect("Eltern-Eintrag")
            .kinder
            .retain(|kind| *kind != id);
        for kanal_id in &entfernte {
            self.kanaele.remove(kanal_id);
        }

        Ok(entfernte)
    }

    /// Alle Kanaele in Breitensuche ab Root (Root zuerst)
    ///
    /// Diese Reihenfolge garantiert, dass ein Client jeden Elternkanal vor
    /// seinen Kindern sieht.
    pub fn alle_root_zuerst(&self) -> Vec<&Kanal> {
        let mut ergebnis = Vec::with_capacity(self.kanaele.len());
        let mut warteschlange = std::collections::VecDeque::from([ROOT_KANAL]);

        while let Some(id) = warteschlange.pop_front() {
            let kanal = &self.kanaele[&id];
            ergebnis.push(kanal);
            warteschlange.extend(kanal.kinder.iter().copied());
        }

        ergebnis
    }

    /// Alle IDs des Teilbaums unter `id` (inkl. `id`, Breitensuche)
    pub fn teilbaum(&self, id: u32) -> Vec<u32> {
        let mut ergebnis = Vec::new();
        let mut warteschlange = std::collections::VecDeque::from([id]);

        while let Some(aktuell) = warteschlange.pop_front() {
            if let Some(kanal) = self.kanaele.get(&aktuell) {
                ergebnis.push(aktuell);
                warteschlange.extend(kanal.kinder.iter().copied());
            }
        }

        ergebnis
    }

    /// Ist `kandidat` ein Nachfahre von `vorfahre`?
    pub fn ist_nachfahre(&self, kandidat: u32, vorfahre: u32) -> bool {
        let mut aktuell = self.kanaele.get(&kandidat).and_then(|k| k.eltern);
        while let Some(id) = aktuell {
            if id == vorfahre {
                return true;
            }
            aktuell = self.kanaele.get(&id).and_then(|k| k.eltern);
        }
        false
    }

    fn geschwister_mit_namen(&self, eltern: u32, name: &str) -> bool {
        self.kanaele
            .get(&eltern)
            .map(|k| {
                k.kinder
                    .iter()
                    .any(|kind| self.kanaele[kind].name == name)
            })
            .unwrap_or(false)
    }
}

impl Default for KanalBaum {
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

    #[test]
    fn root_existiert_mit_id_null() {
        let baum = KanalBaum::neu();
        let root = baum.hole(ROOT_KANAL).expect("Root muss existieren");
        assert_eq!(root.id, 0);
        assert_eq!(root.name, "Root");
        assert!(root.eltern.is_none());
        assert_eq!(baum.anzahl(), 1);
    }

    #[test]
    fn anlegen_vergibt_eindeutige_ids() {
        let mut baum = KanalBaum::neu();
        let a = baum.anlegen("Lobby", ROOT_KANAL, None, 0, false).unwrap();
        let b = baum.anlegen("Spiele", ROOT_KANAL, None, 1, false).unwrap();

        assert_ne!(a, b);
        assert_ne!(a, ROOT_KANAL);
        assert_eq!(baum.hole(a).unwrap().eltern, Some(ROOT_KANAL));
        assert_eq!(baum.hole(ROOT_KANAL).unwrap().kinder, vec![a, b]);
    }

    #[test]
    fn anlegen_unter_unbekanntem_kanal() {
        let mut baum = KanalBaum::neu();
        assert_eq!(
            baum.anlegen("Verwaist", 99, None, 0, false),
            Err(KanalFehler::NichtGefunden(99))
        );
    }

    #[test]
    fn doppelte_namen_unter_demselben_eltern() {
        let mut baum = KanalBaum::neu();
        baum.anlegen("Lobby", ROOT_KANAL, None, 0, false).unwrap();
        assert!(matches!(
            baum.anlegen("Lobby", ROOT_KANAL, None, 0, false),
            Err(KanalFehler::NameVergeben(_))
        ));

        // Gleicher Name unter anderem Eltern ist erlaubt
        let spiele = baum.anlegen("Spiele", ROOT_KANAL, None, 0, false).unwrap();
        assert!(baum.anlegen("Lobby", spiele, None, 0, false).is_ok());
    }

    #[test]
    fn verschieben_verhindert_zyklen() {
        let mut baum = KanalBaum::neu();
        let a = baum.anlegen("A", ROOT_KANAL, None, 0, false).unwrap();
        let b = baum.anlegen("B", a, None, 0, false).unwrap();
        let c = baum.anlegen("C", b, None, 0, false).unwrap();

        // A unter seinen Enkel C zu haengen waere ein Zyklus
        assert_eq!(baum.verschieben(a, c), Err(KanalFehler::Zyklus));
        // Ein Kanal unter sich selbst ebenfalls
        assert_eq!(baum.verschieben(b, b), Err(KanalFehler::Zyklus));

        // Gueltige Verschiebung: C direkt unter Root
        baum.verschieben(c, ROOT_KANAL).unwrap();
        assert_eq!(baum.hole(c).unwrap().eltern, Some(ROOT_KANAL));
        assert!(baum.hole(b).unwrap().kinder.is_empty());
    }

    #[test]
    fn root_ist_geschuetzt() {
        let mut baum = KanalBaum::neu();
        let a = baum.anlegen("A", ROOT_KANAL, None, 0, false).unwrap();
        assert_eq!(baum.verschieben(ROOT_KANAL, a), Err(KanalFehler::WurzelGeschuetzt));
        assert_eq!(baum.entfernen(ROOT_KANAL), Err(KanalFehler::WurzelGeschuetzt));
        assert_eq!(
            baum.umbenennen(ROOT_KANAL, "Anders"),
            Err(KanalFehler::WurzelGeschuetzt)
        );
    }

    #[test]
    fn entfernen_loescht_teilbaum() {
        let mut baum = KanalBaum::neu();
        let a = baum.anlegen("A", ROOT_KANAL, None, 0, false).unwrap();
        let b = baum.anlegen("B", a, None, 0, false).unwrap();
        let c = baum.anlegen("C", b, None, 0, false).unwrap();
        let d = baum.anlegen("D", ROOT_KANAL, None, 0, false).unwrap();

        let entfernte = baum.entfernen(a).unwrap();
        assert_eq!(entfernte, vec![a, b, c]);
        assert!(!baum.existiert(a));
        assert!(!baum.existiert(b));
        assert!(!baum.existiert(c));
        assert!(baum.existiert(d));
        assert_eq!(baum.hole(ROOT_KANAL).unwrap().kinder, vec![d]);
    }

    #[test]
    fn alle_root_zuerst_liefert_eltern_vor_kindern() {
        let mut baum = KanalBaum::neu();
        let a = baum.anlegen("A", ROOT_KANAL, None, 0, false).unwrap();
        let b = baum.anlegen("B", a, None, 0, false).unwrap();
        let _c = baum.anlegen("C", b, None, 0, false).unwrap();

        let reihenfolge: Vec<u32> = baum.alle_root_zuerst().iter().map(|k| k.id).collect();
        assert_eq!(reihenfolge[0], ROOT_KANAL);

        // Jeder Kanal erscheint nach seinen Eltern
        for (index, id) in reihenfolge.iter().enumerate() {
            if let Some(eltern) = baum.hole(*id).unwrap().eltern {
                let eltern_index = reihenfolge.iter().position(|x| *x == eltern).unwrap();
                assert!(eltern_index < index);
            }
        }
    }

    #[test]
    fn umbenennen() {
        let mut baum = KanalBaum::neu();
        let a = baum.anlegen("Alt", ROOT_KANAL, None, 0, false).unwrap();
        baum.umbenennen(a, "Neu").unwrap();
        assert_eq!(baum.hole(a).unwrap().name, "Neu");
    }

    #[test]
    fn temporaer_flag_bleibt_erhalten() {
        let mut baum = KanalBaum::neu();
        let temp = baum.anlegen("Fluechtig", ROOT_KANAL, None, 0, true).unwrap();
        assert!(baum.hole(temp).unwrap().temporaer);
        assert!(!baum.hole(ROOT_KANAL).unwrap().temporaer);
    }
}

//! Server-Konfiguration
//!
//! Wird beim Start aus einer TOML-Datei geladen. Alle Felder haben
//! sinnvolle Standardwerte, sodass der Server ohne Konfigurationsdatei
//! lauffaehig ist.

use serde::{Deserialize, Serialize};

/// Vollstaendige Server-Konfiguration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    /// Allgemeine Server-Einstellungen
    pub server: ServerEinstellungen,
    /// Netzwerk-Einstellungen
    pub netzwerk: NetzwerkEinstellungen,
    /// Protokoll-Limits
    pub limits: LimitEinstellungen,
    /// Logging-Einstellungen
    pub logging: LoggingEinstellungen,
}

/// Allgemeine Server-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerEinstellungen {
    /// Anzeigename des Servers
    pub name: String,
    /// Maximale Anzahl authentifizierter Benutzer
    pub max_benutzer: u32,
    /// Maximale Bandbreite pro Client in Bit/s
    pub max_bandbreite: u32,
    /// Willkommensnachricht (optional)
    pub willkommen: Option<String>,
}

impl Default for ServerEinstellungen {
    fn default() -> Self {
        Self {
            name: "Murmel Server".into(),
            max_benutzer: 10,
            max_bandbreite: 300_000,
            willkommen: None,
        }
    }
}

/// Netzwerk-Einstellungen
///
/// TCP (Control) und UDP (Sprache) teilen sich dieselbe Portnummer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetzwerkEinstellungen {
    /// Bind-Adresse fuer TCP und UDP
    pub bind_adresse: String,
    /// Portnummer (Mumble-Standard: 64738)
    pub port: u16,
    /// TLS-Zertifikat-Pfad (PEM); leer = selbstsigniertes Entwicklungszertifikat
    pub tls_zertifikat: Option<String>,
    /// TLS-Schluessel-Pfad (PEM)
    pub tls_schluessel: Option<String>,
}

impl Default for NetzwerkEinstellungen {
    fn default() -> Self {
        Self {
            bind_adresse: "0.0.0.0".into(),
            port: 64738,
            tls_zertifikat: None,
            tls_schluessel: None,
        }
    }
}

/// Protokoll-Limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitEinstellungen {
    /// Maximale Payload-Groesse eines Control-Frames in Bytes
    pub max_frame_groesse: usize,
    /// Maximale Laenge einer Textnachricht
    pub nachrichten_laenge: u32,
    /// Maximale Laenge einer Bildnachricht
    pub bild_nachrichten_laenge: u32,
}

impl Default for LimitEinstellungen {
    fn default() -> Self {
        Self {
            max_frame_groesse: 1024 * 1024,
            nachrichten_laenge: 1000,
            bild_nachrichten_laenge: 1000,
        }
    }
}

/// Logging-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingEinstellungen {
    /// Log-Level: "trace", "debug", "info", "warn", "error"
    pub level: String,
    /// Format: "json" oder "text"
    pub format: String,
}

impl Default for LoggingEinstellungen {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl ServerConfig {
    /// Laedt die Konfiguration aus einer TOML-Datei.
    /// Gibt die Standardkonfiguration zurueck wenn die Datei nicht existiert.
    pub fn laden(pfad: &str) -> anyhow::Result<Self> {
        match std::fs::read_to_string(pfad) {
            Ok(inhalt) => {
                let config: Self = toml::from_str(&inhalt)
                    .map_err(|e| anyhow::anyhow!("Konfigurationsfehler in '{pfad}': {e}"))?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    pfad = pfad,
                    "Konfigurationsdatei nicht gefunden, verwende Standardwerte"
                );
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::anyhow!(
                "Konfigurationsdatei '{pfad}' nicht lesbar: {e}"
            )),
        }
    }

    /// Gibt die vollstaendige Bind-Adresse fuer TCP zurueck
    pub fn tcp_bind_adresse(&self) -> String {
        format!("{}:{}", self.netzwerk.bind_adresse, self.netzwerk.port)
    }

    /// Gibt die vollstaendige Bind-Adresse fuer UDP zurueck
    pub fn udp_bind_adresse(&self) -> String {
        format!("{}:{}", self.netzwerk.bind_adresse, self.netzwerk.port)
    }
}

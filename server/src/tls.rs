//! TLS-Konfiguration fuer die Control-Verbindung
//!
//! Laedt Zertifikat und Schluessel aus PEM-Dateien. Sind keine Pfade
//! konfiguriert, wird ein selbstsigniertes In-Memory-Zertifikat erzeugt
//! (Entwicklungsmodus). Client-Zertifikate werden nicht angefordert;
//! die Identitaet kommt aus dem Authenticate-Handshake.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use tokio_rustls::rustls::ServerConfig as TlsServerConfig;
use tokio_rustls::TlsAcceptor;

use crate::config::ServerConfig;

/// Baut den TLS-Acceptor aus der Server-Konfiguration
pub async fn acceptor_erstellen(config: &ServerConfig) -> Result<TlsAcceptor> {
    match (&config.netzwerk.tls_zertifikat, &config.netzwerk.tls_schluessel) {
        (Some(zertifikat_pfad), Some(schluessel_pfad)) => {
            aus_pem_dateien(zertifikat_pfad, schluessel_pfad).await
        }
        _ => {
            tracing::warn!(
                "Kein TLS-Zertifikat konfiguriert, erzeuge selbstsigniertes \
                 Entwicklungszertifikat"
            );
            selbstsigniert()
        }
    }
}

/// Laedt Zertifikat und Schluessel aus PEM-Dateien
async fn aus_pem_dateien(zertifikat_pfad: &str, schluessel_pfad: &str) -> Result<TlsAcceptor> {
    tracing::info!(pfad = zertifikat_pfad, "Lade TLS-Zertifikat");

    let zertifikat_datei = tokio::fs::read(zertifikat_pfad)
        .await
        .context("TLS-Zertifikat nicht lesbar")?;
    let zertifikate: Vec<CertificateDer<'static>> =
        rustls_pemfile::certs(&mut &*zertifikat_datei)
            .collect::<Result<Vec<_>, _>>()
            .context("TLS-Zertifikat nicht parsebar")?;
    if zertifikate.is_empty() {
        anyhow::bail!("Keine Zertifikate in '{zertifikat_pfad}' gefunden");
    }

    let schluessel_datei = tokio::fs::read(schluessel_pfad)
        .await
        .context("TLS-Schluessel nicht lesbar")?;
    let mut schluessel: Vec<PrivateKeyDer<'static>> =
        rustls_pemfile::pkcs8_private_keys(&mut &*schluessel_datei)
            .map(|key| key.map(Into::into))
            .collect::<Result<Vec<_>, _>>()
            .context("TLS-Schluessel nicht parsebar")?;

    if schluessel.is_empty() {
        // RSA-Format als Rueckfallebene
        schluessel = rustls_pemfile::rsa_private_keys(&mut &*schluessel_datei)
            .map(|key| key.map(Into::into))
            .collect::<Result<Vec<_>, _>>()
            .context("TLS-Schluessel nicht als RSA parsebar")?;
    }
    if schluessel.is_empty() {
        anyhow::bail!("Kein privater Schluessel in '{schluessel_pfad}' gefunden");
    }

    acceptor_bauen(zertifikate, schluessel.remove(0))
}

/// Erzeugt ein selbstsigniertes Zertifikat im Speicher (Entwicklungsmodus)
fn selbstsigniert() -> Result<TlsAcceptor> {
    use rcgen::{generate_simple_self_signed, CertifiedKey};

    let CertifiedKey { cert, key_pair } =
        generate_simple_self_signed(vec!["localhost".to_string(), "murmel.local".to_string()])
            .context("Selbstsigniertes Zertifikat konnte nicht erzeugt werden")?;

    let zertifikat = cert.der().clone();
    let schluessel = PrivateKeyDer::from(PrivatePkcs8KeyDer::from(key_pair.serialize_der()));

    acceptor_bauen(vec![zertifikat], schluessel)
}

fn acceptor_bauen(
    zertifikate: Vec<CertificateDer<'static>>,
    schluessel: PrivateKeyDer<'static>,
) -> Result<TlsAcceptor> {
    let tls_config = TlsServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(zertifikate, schluessel)
        .context("TLS-Konfiguration ungueltig")?;

    Ok(TlsAcceptor::from(Arc::new(tls_config)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selbstsigniertes_zertifikat() {
        // Muss ohne Dateien einen funktionsfaehigen Acceptor liefern
        let acceptor = selbstsigniert();
        assert!(acceptor.is_ok());
    }

    #[tokio::test]
    async fn fehlende_dateien_sind_ein_fehler() {
        let ergebnis = aus_pem_dateien("/nicht/vorhanden.pem", "/nicht/vorhanden.key").await;
        assert!(ergebnis.is_err());
    }
}

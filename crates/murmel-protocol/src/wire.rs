//! Wire-Format fuer die TCP/TLS-Control-Verbindung
//!
//! Frame-basiertes Protokoll: Kind (u16 big-endian) + Laenge (u32 big-endian)
//! + Payload-Bytes.
//!
//! ## Frame-Format
//!
//! ```text
//! +--------+--------+--------+--------+--------+--------+----...----+
//! | Kind (u16 BE)   | Laenge (u32 BE)                   | Payload   |
//! +--------+--------+--------+--------+--------+--------+----...----+
//! ```
//!
//! Die Laenge gibt die Anzahl der Payload-Bytes an (ohne die 6 Header-Bytes).
//! Ein Frame mit Laenge 0 ist gueltig. Unbekannte Kind-Kennungen und Frames
//! ueber der konfigurierten Maximalgroesse sind Protokollverstoesse und
//! fuehren zum Verbindungsabbruch.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::{Decoder, Encoder};

use crate::messages::{ControlFrame, MessageKind};

// ---------------------------------------------------------------------------
// Konstanten
// ---------------------------------------------------------------------------

/// Standard-maximale Payload-Groesse (1 MB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Groesse des Frame-Headers in Bytes (Kind + Laenge)
pub const HEADER_SIZE: usize = 6;

// ---------------------------------------------------------------------------
// FrameCodec
// ---------------------------------------------------------------------------

/// tokio-util Codec fuer das Control-Framing
///
/// Implementiert `Decoder` und `Encoder<ControlFrame>` fuer die Verwendung
/// mit `tokio_util::codec::Framed`; daneben gibt es `read_frame` /
/// `write_frame` fuer geteilte Stream-Haelften.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    /// Maximale erlaubte Payload-Groesse in Bytes
    max_frame_size: usize,
}

impl FrameCodec {
    /// Erstellt einen neuen `FrameCodec` mit Standard-Limit
    pub fn new() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Erstellt einen `FrameCodec` mit benutzerdefiniertem Limit
    pub fn with_max_size(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    /// Gibt die konfigurierte maximale Payload-Groesse zurueck
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

fn unbekannte_kennung(wert: u16) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("Unbekannte Nachrichtenkennung: {}", wert),
    )
}

fn frame_zu_gross(laenge: usize, maximum: usize) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("Frame zu gross: {} Bytes (Maximum: {} Bytes)", laenge, maximum),
    )
}

// ---------------------------------------------------------------------------
// Decoder-Implementierung
// ---------------------------------------------------------------------------

impl Decoder for FrameCodec {
    type Item = ControlFrame;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // Warte auf den vollstaendigen Header
        if src.len() < HEADER_SIZE {
            return Ok(None);
        }

        // Kind und Laenge lesen ohne den Buffer zu veraendern
        let kennung = u16::from_be_bytes([src[0], src[1]]);
        let laenge = u32::from_be_bytes([src[2], src[3], src[4], src[5]]) as usize;

        if laenge > self.max_frame_size {
            return Err(frame_zu_gross(laenge, self.max_frame_size));
        }

        let kind = MessageKind::von_u16(kennung).ok_or_else(|| unbekannte_kennung(kennung))?;

        // Pruefen ob der vollstaendige Frame bereits im Buffer ist
        let gesamt = HEADER_SIZE + laenge;
        if src.len() < gesamt {
            src.reserve(gesamt - src.len());
            return Ok(None);
        }

        src.advance(HEADER_SIZE);
        let payload = src.split_to(laenge).freeze();

        Ok(Some(ControlFrame { kind, payload }))
    }
}

// ---------------------------------------------------------------------------
// Encoder-Implementierung
// ---------------------------------------------------------------------------

impl Encoder<ControlFrame> for FrameCodec {
    type Error = io::Error;

    fn encode(&mut self, item: ControlFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if item.payload.len() > self.max_frame_size {
            return Err(frame_zu_gross(item.payload.len(), self.max_frame_size));
        }

        dst.reserve(HEADER_SIZE + item.payload.len());
        dst.put_u16(item.kind.als_u16());
        dst.put_u32(item.payload.len() as u32);
        dst.put_slice(&item.payload);

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Hilfsfunktionen fuer geteilte Stream-Haelften
// ---------------------------------------------------------------------------

/// Liest einen einzelnen Frame aus einem `AsyncRead`
///
/// # Fehler
/// - `UnexpectedEof` wenn die Verbindung vor Frame-Ende getrennt wird
/// - `InvalidData` bei unbekannter Kennung oder zu grossem Frame
pub async fn read_frame<R>(reader: &mut R, max_frame_size: usize) -> io::Result<ControlFrame>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header).await?;

    let kennung = u16::from_be_bytes([header[0], header[1]]);
    let laenge = u32::from_be_bytes([header[2], header[3], header[4], header[5]]) as usize;

    if laenge > max_frame_size {
        return Err(frame_zu_gross(laenge, max_frame_size));
    }

    let kind = MessageKind::von_u16(kennung).ok_or_else(|| unbekannte_kennung(kennung))?;

    let mut payload = vec![0u8; laenge];
    reader.read_exact(&mut payload).await?;

    Ok(ControlFrame {
        kind,
        payload: Bytes::from(payload),
    })
}

/// Schreibt einen einzelnen Frame in einen `AsyncWrite` und flusht
pub async fn write_frame<W>(writer: &mut W, frame: &ControlFrame) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut header = [0u8; HEADER_SIZE];
    header[0..2].copy_from_slice(&frame.kind.als_u16().to_be_bytes());
    header[2..6].copy_from_slice(&(frame.payload.len() as u32).to_be_bytes());

    writer.write_all(&header).await?;
    writer.write_all(&frame.payload).await?;
    writer.flush().await?;

    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

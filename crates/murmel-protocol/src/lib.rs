//! murmel-protocol – Mumble-Drahtprotokoll
//!
//! Dieser Crate definiert das Control-Framing (TCP/TLS), den Katalog der
//! Control-Nachrichten (protobuf via prost), den zustandslosen UDP-Ping
//! und die Hilfsfunktionen fuer Sprach-Datagramme (Varint, Header).

pub mod messages;
pub mod ping;
pub mod voice;
pub mod wire;

pub use messages::{ControlFrame, MessageKind};
pub use wire::FrameCodec;

//! Control-Nachrichtenkatalog (TCP/TLS)
//!
//! Definiert die geschlossene Menge der Mumble-Nachrichtenarten (Kind 0-24)
//! und die dazugehoerigen protobuf-Nachrichten. Die Strukturen sind per
//! prost-Derive definiert (proto2-Semantik, optionale Felder als `Option`);
//! es wird kein protoc-Buildschritt benoetigt.
//!
//! Der Server behandelt die meisten Payloads als opake Bytes und liest nur
//! die Felder, die er fuer Dispatch, Authentifizierung und Codec-Abgleich
//! braucht. Unbekannte Felder werden beim Dekodieren uebersprungen.

use bytes::Bytes;
use prost::Message;

// ---------------------------------------------------------------------------
// MessageKind
// ---------------------------------------------------------------------------

/// Art einer Control-Nachricht (2-Byte-Kennung im Frame-Header)
///
/// Die Nummerierung ist durch das Mumble-Protokoll festgelegt und darf
/// nicht veraendert werden.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum MessageKind {
    Version = 0,
    UdpTunnel = 1,
    Authenticate = 2,
    Ping = 3,
    Reject = 4,
    ServerSync = 5,
    ChannelRemove = 6,
    ChannelState = 7,
    UserRemove = 8,
    UserState = 9,
    BanList = 10,
    TextMessage = 11,
    PermissionDenied = 12,
    Acl = 13,
    QueryUsers = 14,
    CryptSetup = 15,
    ContextActionModify = 16,
    ContextAction = 17,
    UserList = 18,
    VoiceTarget = 19,
    PermissionQuery = 20,
    CodecVersion = 21,
    UserStats = 22,
    RequestBlob = 23,
    ServerConfig = 24,
}

impl MessageKind {
    /// Dekodiert eine Kennung aus dem Frame-Header.
    ///
    /// Gibt `None` zurueck wenn die Kennung nicht zum geschlossenen
    /// Nachrichtenkatalog gehoert (Protokollverstoss).
    pub fn von_u16(wert: u16) -> Option<Self> {
        Some(match wert {
            0 => Self::Version,
            1 => Self::UdpTunnel,
            2 => Self::Authenticate,
            3 => Self::Ping,
            4 => Self::Reject,
            5 => Self::ServerSync,
            6 => Self::ChannelRemove,
            7 => Self::ChannelState,
            8 => Self::UserRemove,
            9 => Self::UserState,
            10 => Self::BanList,
            11 => Self::TextMessage,
            12 => Self::PermissionDenied,
            13 => Self::Acl,
            14 => Self::QueryUsers,
            15 => Self::CryptSetup,
            16 => Self::ContextActionModify,
            17 => Self::ContextAction,
            18 => Self::UserList,
            19 => Self::VoiceTarget,
            20 => Self::PermissionQuery,
            21 => Self::CodecVersion,
            22 => Self::UserStats,
            23 => Self::RequestBlob,
            24 => Self::ServerConfig,
            _ => return None,
        })
    }

    /// Gibt die Drahtkennung zurueck
    pub fn als_u16(self) -> u16 {
        self as u16
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ---------------------------------------------------------------------------
// ControlFrame
// ---------------------------------------------------------------------------

/// Ein vollstaendiger Control-Frame: Kennung + rohe Payload-Bytes
///
/// Die Payload bleibt bis zum jeweiligen Handler undekodiert; der
/// Dispatcher routet allein anhand der Kennung.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlFrame {
    pub kind: MessageKind,
    pub payload: Bytes,
}

impl ControlFrame {
    /// Erstellt einen Frame aus rohen Payload-Bytes
    pub fn neu(kind: MessageKind, payload: Bytes) -> Self {
        Self { kind, payload }
    }

    /// Serialisiert eine protobuf-Nachricht in einen Frame
    pub fn aus_nachricht<M: Message>(kind: MessageKind, nachricht: &M) -> Self {
        Self {
            kind,
            payload: Bytes::from(nachricht.encode_to_vec()),
        }
    }

    /// Dekodiert die Payload als protobuf-Nachricht vom Typ `M`
    pub fn dekodieren<M: Message + Default>(&self) -> Result<M, prost::DecodeError> {
        M::decode(self.payload.as_ref())
    }
}

// ---------------------------------------------------------------------------
// Handshake-Nachrichten
// ---------------------------------------------------------------------------

/// Versionsaustausch (Kind 0) – erste Nachricht in beide Richtungen
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Version {
    /// Gepackte Version: major<<16 | minor<<8 | patch
    #[prost(uint32, optional, tag = "1")]
    pub version: Option<u32>,
    #[prost(string, optional, tag = "2")]
    pub release: Option<String>,
    #[prost(string, optional, tag = "3")]
    pub os: Option<String>,
    #[prost(string, optional, tag = "4")]
    pub os_version: Option<String>,
}

/// Getunneltes Sprachpaket ueber TCP (Kind 1)
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UdpTunnel {
    #[prost(bytes = "vec", optional, tag = "1")]
    pub packet: Option<Vec<u8>>,
}

/// Anmeldung des Clients (Kind 2)
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Authenticate {
    #[prost(string, optional, tag = "1")]
    pub username: Option<String>,
    #[prost(string, optional, tag = "2")]
    pub password: Option<String>,
    #[prost(string, repeated, tag = "3")]
    pub tokens: Vec<String>,
    #[prost(int32, repeated, packed = "false", tag = "4")]
    pub celt_versions: Vec<i32>,
    #[prost(bool, optional, tag = "5")]
    pub opus: Option<bool>,
}

/// Keepalive mit Krypto-Statistik (Kind 3)
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Ping {
    #[prost(uint64, optional, tag = "1")]
    pub timestamp: Option<u64>,
    #[prost(uint32, optional, tag = "2")]
    pub good: Option<u32>,
    #[prost(uint32, optional, tag = "3")]
    pub late: Option<u32>,
    #[prost(uint32, optional, tag = "4")]
    pub lost: Option<u32>,
    #[prost(uint32, optional, tag = "5")]
    pub resync: Option<u32>,
    #[prost(uint32, optional, tag = "6")]
    pub udp_packets: Option<u32>,
    #[prost(uint32, optional, tag = "7")]
    pub tcp_packets: Option<u32>,
    #[prost(float, optional, tag = "8")]
    pub udp_ping_avg: Option<f32>,
    #[prost(float, optional, tag = "9")]
    pub udp_ping_var: Option<f32>,
    #[prost(float, optional, tag = "10")]
    pub tcp_ping_avg: Option<f32>,
    #[prost(float, optional, tag = "11")]
    pub tcp_ping_var: Option<f32>,
}

/// Ablehnungsgrund beim Handshake
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum RejectType {
    None = 0,
    WrongVersion = 1,
    InvalidUsername = 2,
    WrongUserPw = 3,
    WrongServerPw = 4,
    UsernameInUse = 5,
    ServerFull = 6,
    NoCertificate = 7,
    AuthenticatorFail = 8,
}

/// Ablehnung der Verbindung (Kind 4)
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Reject {
    #[prost(enumeration = "RejectType", optional, tag = "1")]
    pub typ: Option<i32>,
    #[prost(string, optional, tag = "2")]
    pub reason: Option<String>,
}

/// Abschluss der Anmeldung (Kind 5)
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ServerSync {
    #[prost(uint32, optional, tag = "1")]
    pub session: Option<u32>,
    #[prost(uint32, optional, tag = "2")]
    pub max_bandwidth: Option<u32>,
    #[prost(string, optional, tag = "3")]
    pub welcome_text: Option<String>,
    #[prost(uint64, optional, tag = "4")]
    pub permissions: Option<u64>,
}

// ---------------------------------------------------------------------------
// Kanal-Nachrichten
// ---------------------------------------------------------------------------

/// Kanal entfernen (Kind 6)
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ChannelRemove {
    #[prost(uint32, optional, tag = "1")]
    pub channel_id: Option<u32>,
}

/// Kanal anlegen/aendern bzw. Kanal-Snapshot (Kind 7)
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ChannelState {
    #[prost(uint32, optional, tag = "1")]
    pub channel_id: Option<u32>,
    #[prost(uint32, optional, tag = "2")]
    pub parent: Option<u32>,
    #[prost(string, optional, tag = "3")]
    pub name: Option<String>,
    #[prost(uint32, repeated, packed = "false", tag = "4")]
    pub links: Vec<u32>,
    #[prost(string, optional, tag = "5")]
    pub description: Option<String>,
    #[prost(uint32, repeated, packed = "false", tag = "6")]
    pub links_add: Vec<u32>,
    #[prost(uint32, repeated, packed = "false", tag = "7")]
    pub links_remove: Vec<u32>,
    #[prost(bool, optional, tag = "8")]
    pub temporary: Option<bool>,
    #[prost(int32, optional, tag = "9")]
    pub position: Option<i32>,
}

// ---------------------------------------------------------------------------
// Benutzer-Nachrichten
// ---------------------------------------------------------------------------

/// Benutzer kicken/bannen bzw. Abmelde-Broadcast (Kind 8)
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UserRemove {
    #[prost(uint32, optional, tag = "1")]
    pub session: Option<u32>,
    #[prost(uint32, optional, tag = "2")]
    pub actor: Option<u32>,
    #[prost(string, optional, tag = "3")]
    pub reason: Option<String>,
    #[prost(bool, optional, tag = "4")]
    pub ban: Option<bool>,
}

/// Benutzerzustand (Kind 9) – Self-Update vom Client, autoritativer
/// Broadcast vom Server
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UserState {
    #[prost(uint32, optional, tag = "1")]
    pub session: Option<u32>,
    #[prost(uint32, optional, tag = "2")]
    pub actor: Option<u32>,
    #[prost(string, optional, tag = "3")]
    pub name: Option<String>,
    #[prost(uint32, optional, tag = "4")]
    pub user_id: Option<u32>,
    #[prost(uint32, optional, tag = "5")]
    pub channel_id: Option<u32>,
    #[prost(bool, optional, tag = "6")]
    pub mute: Option<bool>,
    #[prost(bool, optional, tag = "7")]
    pub deaf: Option<bool>,
    #[prost(bool, optional, tag = "8")]
    pub suppress: Option<bool>,
    #[prost(bool, optional, tag = "9")]
    pub self_mute: Option<bool>,
    #[prost(bool, optional, tag = "10")]
    pub self_deaf: Option<bool>,
    #[prost(string, optional, tag = "14")]
    pub comment: Option<String>,
}

/// Eintrag der Bannliste
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BanEntry {
    #[prost(bytes = "vec", optional, tag = "1")]
    pub address: Option<Vec<u8>>,
    #[prost(uint32, optional, tag = "2")]
    pub mask: Option<u32>,
    #[prost(string, optional, tag = "3")]
    pub name: Option<String>,
    #[prost(string, optional, tag = "4")]
    pub hash: Option<String>,
    #[prost(string, optional, tag = "5")]
    pub reason: Option<String>,
    #[prost(string, optional, tag = "6")]
    pub start: Option<String>,
    #[prost(uint32, optional, tag = "7")]
    pub duration: Option<u32>,
}

/// Bannliste abfragen oder ersetzen (Kind 10)
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BanList {
    #[prost(message, repeated, tag = "1")]
    pub bans: Vec<BanEntry>,
    #[prost(bool, optional, tag = "2")]
    pub query: Option<bool>,
}

/// Textnachricht an Sessions/Kanaele/Teilbaeume (Kind 11)
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TextMessage {
    #[prost(uint32, optional, tag = "1")]
    pub actor: Option<u32>,
    #[prost(uint32, repeated, packed = "false", tag = "2")]
    pub session: Vec<u32>,
    #[prost(uint32, repeated, packed = "false", tag = "3")]
    pub channel_id: Vec<u32>,
    #[prost(uint32, repeated, packed = "false", tag = "4")]
    pub tree_id: Vec<u32>,
    #[prost(string, optional, tag = "5")]
    pub message: Option<String>,
}

/// Art der Verweigerung
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum DenyType {
    Text = 0,
    Permission = 1,
    SuperUser = 2,
    ChannelName = 3,
    TextTooLong = 4,
    H9k = 5,
    TemporaryChannel = 6,
    MissingCertificate = 7,
    UserName = 8,
    ChannelFull = 9,
    NestingLimit = 10,
}

/// Verweigerte Operation (Kind 12)
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PermissionDenied {
    #[prost(uint32, optional, tag = "1")]
    pub permission: Option<u32>,
    #[prost(uint32, optional, tag = "2")]
    pub channel_id: Option<u32>,
    #[prost(uint32, optional, tag = "3")]
    pub session: Option<u32>,
    #[prost(string, optional, tag = "4")]
    pub reason: Option<String>,
    #[prost(enumeration = "DenyType", optional, tag = "5")]
    pub typ: Option<i32>,
    #[prost(string, optional, tag = "6")]
    pub name: Option<String>,
}

// ---------------------------------------------------------------------------
// Abfrage-Nachrichten
// ---------------------------------------------------------------------------

/// ACL-Snapshot eines Kanals (Kind 13) – hier nur die Felder, die der
/// Server beantwortet; Gruppen/Eintraege verwaltet eine hoehere Schicht.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Acl {
    #[prost(uint32, optional, tag = "1")]
    pub channel_id: Option<u32>,
    #[prost(bool, optional, tag = "2")]
    pub inherit_acls: Option<bool>,
    #[prost(bool, optional, tag = "5")]
    pub query: Option<bool>,
}

/// Namens-/ID-Aufloesung (Kind 14)
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct QueryUsers {
    #[prost(uint32, repeated, packed = "false", tag = "1")]
    pub ids: Vec<u32>,
    #[prost(string, repeated, tag = "2")]
    pub names: Vec<String>,
}

/// Schluessel- und Nonce-Austausch fuer den UDP-Kanal (Kind 15)
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CryptSetup {
    #[prost(bytes = "vec", optional, tag = "1")]
    pub key: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "2")]
    pub client_nonce: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "3")]
    pub server_nonce: Option<Vec<u8>>,
}

/// Kontextaktion registrieren (Kind 16)
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ContextActionModify {
    #[prost(string, optional, tag = "1")]
    pub action: Option<String>,
    #[prost(string, optional, tag = "2")]
    pub text: Option<String>,
    #[prost(uint32, optional, tag = "3")]
    pub context: Option<u32>,
}

/// Kontextaktion ausloesen (Kind 17)
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ContextAction {
    #[prost(uint32, optional, tag = "1")]
    pub session: Option<u32>,
    #[prost(uint32, optional, tag = "2")]
    pub channel_id: Option<u32>,
    #[prost(string, optional, tag = "3")]
    pub action: Option<String>,
}

/// Registrierter Benutzer in der UserList
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UserListEntry {
    #[prost(uint32, optional, tag = "1")]
    pub user_id: Option<u32>,
    #[prost(string, optional, tag = "2")]
    pub name: Option<String>,
}

/// Liste registrierter Benutzer (Kind 18)
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UserList {
    #[prost(message, repeated, tag = "1")]
    pub users: Vec<UserListEntry>,
}

/// Einzelziel eines VoiceTargets
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct VoiceTargetEntry {
    #[prost(uint32, repeated, packed = "false", tag = "1")]
    pub session: Vec<u32>,
    #[prost(uint32, optional, tag = "2")]
    pub channel_id: Option<u32>,
    #[prost(string, optional, tag = "3")]
    pub group: Option<String>,
    #[prost(bool, optional, tag = "4")]
    pub links: Option<bool>,
    #[prost(bool, optional, tag = "5")]
    pub children: Option<bool>,
}

/// Fluester-Ziel definieren (Kind 19)
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct VoiceTarget {
    #[prost(uint32, optional, tag = "1")]
    pub id: Option<u32>,
    #[prost(message, repeated, tag = "2")]
    pub targets: Vec<VoiceTargetEntry>,
}

/// Berechtigungsabfrage fuer einen Kanal (Kind 20)
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PermissionQuery {
    #[prost(uint32, optional, tag = "1")]
    pub channel_id: Option<u32>,
    #[prost(uint32, optional, tag = "2")]
    pub permissions: Option<u32>,
    #[prost(bool, optional, tag = "3")]
    pub flush: Option<bool>,
}

/// Aktive CELT-Codecs (Kind 21) – vom Server autoritativ verwaltet
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CodecVersion {
    #[prost(int32, optional, tag = "1")]
    pub alpha: Option<i32>,
    #[prost(int32, optional, tag = "2")]
    pub beta: Option<i32>,
    #[prost(bool, optional, tag = "3")]
    pub prefer_alpha: Option<bool>,
}

/// Krypto-Zaehler innerhalb von UserStats
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UserStatsCounters {
    #[prost(uint32, optional, tag = "1")]
    pub good: Option<u32>,
    #[prost(uint32, optional, tag = "2")]
    pub late: Option<u32>,
    #[prost(uint32, optional, tag = "3")]
    pub lost: Option<u32>,
    #[prost(uint32, optional, tag = "4")]
    pub resync: Option<u32>,
}

/// Statistik eines Benutzers (Kind 22)
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UserStats {
    #[prost(uint32, optional, tag = "1")]
    pub session: Option<u32>,
    #[prost(bool, optional, tag = "2")]
    pub stats_only: Option<bool>,
    #[prost(message, optional, tag = "4")]
    pub from_client: Option<UserStatsCounters>,
    #[prost(message, optional, tag = "5")]
    pub from_server: Option<UserStatsCounters>,
    #[prost(uint32, optional, tag = "6")]
    pub udp_packets: Option<u32>,
    #[prost(uint32, optional, tag = "7")]
    pub tcp_packets: Option<u32>,
    #[prost(message, optional, tag = "12")]
    pub version: Option<Version>,
    #[prost(int32, repeated, packed = "false", tag = "13")]
    pub celt_versions: Vec<i32>,
    #[prost(bytes = "vec", optional, tag = "14")]
    pub address: Option<Vec<u8>>,
    #[prost(uint32, optional, tag = "16")]
    pub onlinesecs: Option<u32>,
    #[prost(uint32, optional, tag = "17")]
    pub idlesecs: Option<u32>,
}

/// Nachforderung von Kommentaren/Beschreibungen (Kind 23)
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RequestBlob {
    #[prost(uint32, repeated, packed = "false", tag = "1")]
    pub session_texture: Vec<u32>,
    #[prost(uint32, repeated, packed = "false", tag = "2")]
    pub session_comment: Vec<u32>,
    #[prost(uint32, repeated, packed = "false", tag = "3")]
    pub channel_description: Vec<u32>,
}

/// Server-Limits nach der Anmeldung (Kind 24)
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ServerConfig {
    #[prost(uint32, optional, tag = "1")]
    pub max_bandwidth: Option<u32>,
    #[prost(string, optional, tag = "2")]
    pub welcome_text: Option<String>,
    #[prost(bool, optional, tag = "3")]
    pub allow_html: Option<bool>,
    #[prost(uint32, optional, tag = "4")]
    pub message_length: Option<u32>,
    #[prost(uint32, optional, tag = "5")]
    pub image_message_length: Option<u32>,
    #[prost(uint32, optional, tag = "6")]
    pub max_users: Option<u32>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

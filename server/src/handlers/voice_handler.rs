//! Sprache ueber TCP (UDPTunnel)
//!
//! Clients ohne funktionierenden UDP-Pfad tunneln ihre Sprachpakete als
//! UDPTunnel-Frames ueber die Control-Verbindung. Die Pakete laufen in
//! denselben Router wie entschluesselte UDP-Datagramme.

use std::sync::Arc;

use murmel_protocol::messages::{self, ControlFrame};

use crate::client::ClientConnection;
use crate::error::ServerResult;
use crate::server_state::ServerState;
use crate::udp;

/// UDPTunnel: getunneltes Sprachpaket in den Router geben
pub fn udp_tunnel(
    state: &Arc<ServerState>,
    client: &Arc<ClientConnection>,
    frame: &ControlFrame,
) -> ServerResult<()> {
    let tunnel: messages::UdpTunnel = frame.dekodieren()?;

    if let Some(paket) = tunnel.packet {
        udp::sprachpaket_verarbeiten(state, client, &paket, true);
    }
    Ok(())
}

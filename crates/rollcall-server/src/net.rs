//! Local address discovery.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use tokio::net::UdpSocket;

/// Address used to pick the outbound interface. Nothing is sent to it.
const ROUTE_PROBE: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8)), 80);

/// The address this host uses to reach the wider network.
///
/// Connecting a UDP socket only selects a route; the local end of that route
/// is the address clients on the same LAN see. Falls back to loopback when
/// the host has no route.
pub async fn detect_local_ip() -> IpAddr {
    match probe_route().await {
        Ok(ip) => ip,
        Err(e) => {
            tracing::warn!(error = %e, "could not detect local address, falling back to loopback");
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        },
    }
}

async fn probe_route() -> std::io::Result<IpAddr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
    socket.connect(ROUTE_PROBE).await?;
    Ok(socket.local_addr()?.ip())
}

//
// Copyright (c) The Ripd Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;

use ripd_utils::socket::UdpSocket;
#[cfg(not(feature = "testing"))]
use ripd_utils::socket::{SocketExt, UdpSocketExt};
use ripd_utils::{Sender, UnboundedReceiver};
use serde::{Deserialize, Serialize};

#[cfg(not(feature = "testing"))]
use capctl::caps::CapState;

use crate::error::IoError;
use crate::packet::Pdu;
use crate::tasks::messages::input::UdpRxPduMsg;
use crate::tasks::messages::output::UdpTxPduMsg;

// RIPv2 multicast address (RFC 2453 section 4.3).
pub const MCAST_ADDR: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 9);

// Destination of an outbound PDU: the RIPv2 multicast group on the sending
// interface, or an explicit unicast address and port.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum SendDestination {
    Multicast,
    Unicast(SocketAddrV4),
}

// ===== global functions =====

pub(crate) fn socket(
    ifname: &str,
    rip_port: u16,
) -> Result<UdpSocket, std::io::Error> {
    #[cfg(not(feature = "testing"))]
    {
        let sockaddr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, rip_port));
        let socket = privileged(|| UdpSocket::bind_reuseaddr(sockaddr))?;
        privileged(|| SocketExt::bind_device(&socket, ifname))?;
        socket.set_multicast_loop_v4(false)?;
        socket.set_multicast_ttl_v4(1)?;
        socket.set_ipv4_tos(libc::IPTOS_PREC_INTERNETCONTROL)?;
        Ok(socket)
    }
    #[cfg(feature = "testing")]
    {
        Ok(UdpSocket::default())
    }
}

// Binding to the RIP port and to a device needs CAP_NET_BIND_SERVICE and
// CAP_NET_RAW. Runs the socket operation with the effective capability set
// raised, dropping it again afterwards.
#[cfg(not(feature = "testing"))]
fn privileged<T>(
    op: impl FnOnce() -> Result<T, std::io::Error>,
) -> Result<T, std::io::Error> {
    let mut caps = CapState::get_current().map_err(std::io::Error::other)?;
    caps.effective = caps.permitted;
    caps.set_current().map_err(std::io::Error::other)?;

    let result = op();

    caps.effective.clear();
    caps.set_current().map_err(std::io::Error::other)?;

    result
}

pub(crate) fn join_multicast(
    socket: &UdpSocket,
    ifindex: u32,
) -> Result<(), std::io::Error> {
    #[cfg(not(feature = "testing"))]
    {
        socket.join_multicast_ifindex_v4(&MCAST_ADDR, ifindex)?;
        // Multicast updates must egress through this interface as well.
        socket.set_multicast_ifindex_v4(ifindex)
    }
    #[cfg(feature = "testing")]
    {
        Ok(())
    }
}

#[cfg(not(feature = "testing"))]
pub(crate) async fn send_packet(
    socket: &UdpSocket,
    pdu: Pdu,
    dst: SocketAddrV4,
) -> Result<(), std::io::Error> {
    // Encode PDU.
    let buf = pdu.encode();

    // Send packet.
    socket.send_to(&buf, dst).await?;

    Ok(())
}

#[cfg(not(feature = "testing"))]
pub(crate) async fn write_loop(
    socket: Arc<UdpSocket>,
    mcast_sockaddr: SocketAddrV4,
    mut udp_tx_pduc: UnboundedReceiver<UdpTxPduMsg>,
) {
    while let Some(UdpTxPduMsg { dst, pdu, .. }) = udp_tx_pduc.recv().await {
        let dst = match dst {
            SendDestination::Multicast => mcast_sockaddr,
            SendDestination::Unicast(sockaddr) => sockaddr,
        };
        if let Err(error) = send_packet(&socket, pdu, dst).await {
            IoError::UdpSendError(error).log();
        }
    }
}

#[cfg(not(feature = "testing"))]
pub(crate) async fn read_loop(
    socket: Arc<UdpSocket>,
    udp_pdu_rxp: Sender<UdpRxPduMsg>,
) -> Result<(), tokio::sync::mpsc::error::SendError<UdpRxPduMsg>> {
    let mut buf = [0; 16384];

    loop {
        // Receive data from the network.
        let (num_bytes, src) = match socket.recv_from(&mut buf).await {
            Ok((num_bytes, src)) => (num_bytes, src),
            Err(error) => {
                IoError::UdpRecvError(error).log();
                continue;
            }
        };

        // The socket is IPv4-only.
        let SocketAddr::V4(src) = src else {
            continue;
        };

        // Decode packet.
        let pdu = Pdu::decode(&buf[0..num_bytes]);
        let msg = UdpRxPduMsg { src, pdu };
        udp_pdu_rxp.send(msg).await?;
    }
}

//
// Copyright (c) The Ripd Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::sync::Arc;

use ipnetwork::Ipv4Network;
use ripd_utils::UnboundedSender;
use ripd_utils::socket::UdpSocket;
use ripd_utils::task::Task;
use tokio::sync::mpsc;

use crate::debug::Debug;
use crate::error::IoError;
use crate::instance::InstanceChannelsTx;
use crate::network;
use crate::southbound::IfaceInfo;
use crate::tasks;
use crate::tasks::messages::output::UdpTxPduMsg;

#[derive(Debug)]
pub struct Interface {
    pub name: String,
    // Interface system data.
    pub system: InterfaceSys,
    // UDP socket and Tx/Rx tasks, present while RIP is running on the
    // interface.
    pub net: Option<InterfaceNet>,
}

#[derive(Debug)]
pub struct InterfaceSys {
    pub ifindex: u32,
    // Interface address and prefix length.
    pub addr: Ipv4Network,
    pub up: bool,
}

#[derive(Debug)]
pub struct InterfaceNet {
    // UDP socket.
    pub socket: Arc<UdpSocket>,
    // UDP Tx/Rx tasks.
    _udp_tx_task: Task<()>,
    _udp_rx_task: Task<()>,
    // UDP Tx output channel.
    pub udp_tx_pdup: UnboundedSender<UdpTxPduMsg>,
}

// Instance interfaces, keyed by name.
#[derive(Debug, Default)]
pub struct Interfaces(BTreeMap<String, Interface>);

// ===== impl Interface =====

impl Interface {
    pub fn new(info: IfaceInfo) -> Interface {
        Interface {
            name: info.name,
            system: InterfaceSys {
                ifindex: info.ifindex,
                addr: info.addr,
                up: info.up,
            },
            net: None,
        }
    }

    // Starts RIP operation on this interface: create the UDP socket, join
    // the RIPv2 multicast group and spawn the network Tx/Rx tasks.
    pub(crate) fn start(
        &mut self,
        rip_port: u16,
        instance_channels_tx: &InstanceChannelsTx,
    ) -> Result<(), IoError> {
        Debug::InterfaceStart(&self.name).log();

        let net = InterfaceNet::new(&self.name, rip_port, instance_channels_tx)?;
        network::join_multicast(&net.socket, self.system.ifindex)
            .map_err(IoError::UdpMulticastJoinError)?;
        self.net = Some(net);

        Ok(())
    }

    pub(crate) fn stop(&mut self) {
        if !self.is_active() {
            return;
        }

        Debug::InterfaceStop(&self.name).log();
        self.net = None;
    }

    // Checks if RIP is operational on this interface.
    pub(crate) fn is_active(&self) -> bool {
        self.net.is_some()
    }

    // Checks if the interface shares a subnet with the given IP address.
    pub(crate) fn contains_addr(&self, addr: &Ipv4Addr) -> bool {
        self.system.addr.contains(*addr)
    }
}

// ===== impl InterfaceNet =====

impl InterfaceNet {
    fn new(
        ifname: &str,
        rip_port: u16,
        instance_channels_tx: &InstanceChannelsTx,
    ) -> Result<Self, IoError> {
        // Create UDP socket.
        let socket = network::socket(ifname, rip_port)
            .map_err(IoError::UdpSocketError)
            .map(Arc::new)?;

        // Start UDP Tx/Rx tasks.
        let (udp_tx_pdup, udp_tx_pduc) = mpsc::unbounded_channel();
        let udp_tx_task = tasks::udp_tx(
            &socket,
            rip_port,
            udp_tx_pduc,
            #[cfg(feature = "testing")]
            &instance_channels_tx.protocol_output,
        );
        let udp_rx_task = tasks::udp_rx(
            &socket,
            &instance_channels_tx.protocol_input.udp_pdu_rx,
        );

        Ok(InterfaceNet {
            socket,
            _udp_tx_task: udp_tx_task,
            _udp_rx_task: udp_rx_task,
            udp_tx_pdup,
        })
    }
}

// ===== impl Interfaces =====

impl Interfaces {
    pub fn add(&mut self, info: IfaceInfo) -> &mut Interface {
        self.0
            .entry(info.name.clone())
            .or_insert_with(|| Interface::new(info))
    }

    // Returns a reference to the active interface whose subnet contains the
    // given packet source.
    pub(crate) fn get_by_source(&self, source: Ipv4Addr) -> Option<&Interface> {
        self.0
            .values()
            .filter(|iface| iface.is_active())
            .find(|iface| iface.contains_addr(&source))
    }

    // Returns an iterator visiting all interfaces, ordered by name.
    pub fn iter(&self) -> impl Iterator<Item = &'_ Interface> + '_ {
        self.0.values()
    }

    // Returns an iterator visiting all interfaces with mutable references.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &'_ mut Interface> + '_ {
        self.0.values_mut()
    }
}

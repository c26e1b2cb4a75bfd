//
// Copyright (c) The Ripd Contributors
//
// SPDX-License-Identifier: MIT
//

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use ripd_utils::Sender;
use ripd_utils::socket::UdpSocket;
use ripd_utils::task::{Task, TimeoutTask};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{Instrument, debug_span};

use crate::network;

//
// RIP tasks diagram:
//
//                  udp_rx (Nx) -> +--------------+
//         update_interval (1x) -> |              |
// triggered_upd_timeout (0/1x) -> |              | -> (Nx) udp_tx
//      route_timeout_scan (1x) -> |   instance   |
//        route_gc_sweep (0/1x) -> |              | -> (1x) southbound
//           admin_request (Nx) -> +--------------+
//

// Jitter applied to the update interval so updates from different routers
// don't synchronize across the network.
const JITTER_VALUE: i64 = 2;

// RIP inter-task message types.
pub mod messages {
    // Type aliases.
    pub type ProtocolInputMsg = input::ProtocolMsg;
    pub type ProtocolOutputMsg = output::ProtocolMsg;

    // Input messages (child task -> main task).
    pub mod input {
        use std::net::SocketAddrV4;

        use tokio::sync::oneshot;

        use crate::admin::AdminCommand;
        use crate::packet::{DecodeResult, Pdu};

        #[derive(Debug)]
        pub enum ProtocolMsg {
            UdpRxPdu(UdpRxPduMsg),
            UpdateInterval(UpdateIntervalMsg),
            TriggeredUpdTimeout(TriggeredUpdTimeoutMsg),
            RouteTimeoutScan(RouteTimeoutScanMsg),
            RouteGcSweep(RouteGcSweepMsg),
            AdminRequest(AdminRequestMsg),
        }

        #[derive(Debug)]
        pub struct UdpRxPduMsg {
            pub src: SocketAddrV4,
            pub pdu: DecodeResult<Pdu>,
        }

        #[derive(Debug)]
        pub struct UpdateIntervalMsg {}

        #[derive(Debug)]
        pub struct TriggeredUpdTimeoutMsg {}

        #[derive(Debug)]
        pub struct RouteTimeoutScanMsg {}

        #[derive(Debug)]
        pub struct RouteGcSweepMsg {}

        #[derive(Debug)]
        pub struct AdminRequestMsg {
            pub command: AdminCommand,
            pub reply: oneshot::Sender<String>,
        }
    }

    // Output messages (main task -> child task).
    pub mod output {
        use crate::network::SendDestination;
        use crate::packet::Pdu;

        #[derive(Debug)]
        pub enum ProtocolMsg {
            UdpTxPdu(UdpTxPduMsg),
        }

        #[derive(Debug)]
        pub struct UdpTxPduMsg {
            pub ifname: String,
            pub dst: SendDestination,
            pub pdu: Pdu,
        }
    }
}

// ===== RIP tasks =====

// UDP Rx task.
pub(crate) fn udp_rx(
    socket: &Arc<UdpSocket>,
    udp_pdu_rxp: &Sender<messages::input::UdpRxPduMsg>,
) -> Task<()> {
    #[cfg(not(feature = "testing"))]
    {
        let span1 = debug_span!("network");
        let _span1_guard = span1.enter();
        let span2 = debug_span!("input");
        let _span2_guard = span2.enter();

        let socket = socket.clone();
        let udp_pdu_rxp = udp_pdu_rxp.clone();

        Task::spawn_supervised(move || {
            let socket = socket.clone();
            let udp_pdu_rxp = udp_pdu_rxp.clone();
            async move {
                let _ = network::read_loop(socket, udp_pdu_rxp).await;
            }
            .in_current_span()
        })
    }
    #[cfg(feature = "testing")]
    {
        Task::spawn(async move { std::future::pending().await })
    }
}

// UDP Tx task.
#[allow(unused_mut)]
pub(crate) fn udp_tx(
    socket: &Arc<UdpSocket>,
    rip_port: u16,
    mut udp_tx_pduc: UnboundedReceiver<messages::output::UdpTxPduMsg>,
    #[cfg(feature = "testing")] proto_output_tx: &Sender<
        messages::ProtocolOutputMsg,
    >,
) -> Task<()> {
    #[cfg(not(feature = "testing"))]
    {
        let span1 = debug_span!("network");
        let _span1_guard = span1.enter();
        let span2 = debug_span!("output");
        let _span2_guard = span2.enter();

        let socket = socket.clone();
        let mcast_sockaddr =
            std::net::SocketAddrV4::new(network::MCAST_ADDR, rip_port);
        Task::spawn(
            async move {
                network::write_loop(socket, mcast_sockaddr, udp_tx_pduc).await;
            }
            .in_current_span(),
        )
    }
    #[cfg(feature = "testing")]
    {
        let proto_output_tx = proto_output_tx.clone();
        Task::spawn(async move {
            // Relay message to the test framework.
            while let Some(msg) = udp_tx_pduc.recv().await {
                let msg = messages::ProtocolOutputMsg::UdpTxPdu(msg);
                let _ = proto_output_tx.send(msg).await;
            }
        })
    }
}

// Periodic update timer. Each firing is scheduled individually so a fresh
// jitter value applies every cycle.
pub(crate) fn update_interval(
    timeout: Duration,
    update_intervalp: &Sender<messages::input::UpdateIntervalMsg>,
) -> TimeoutTask {
    let update_intervalp = update_intervalp.clone();
    TimeoutTask::new(timeout, move || async move {
        let msg = messages::input::UpdateIntervalMsg {};
        let _ = update_intervalp.send(msg).await;
    })
}

// Picks the actual delay until the next periodic update.
pub(crate) fn update_interval_jitter(interval: u16) -> Duration {
    let jitter = rand::rng().random_range(-JITTER_VALUE..=JITTER_VALUE);
    Duration::from_secs((i64::from(interval) + jitter).max(1) as u64)
}

// Triggered update holddown timer.
pub(crate) fn triggered_upd_timeout(
    timeout: Duration,
    triggered_upd_timeoutp: &Sender<messages::input::TriggeredUpdTimeoutMsg>,
) -> TimeoutTask {
    let triggered_upd_timeoutp = triggered_upd_timeoutp.clone();
    TimeoutTask::new(timeout, move || async move {
        let msg = messages::input::TriggeredUpdTimeoutMsg {};
        let _ = triggered_upd_timeoutp.send(msg).await;
    })
}

// Route timeout scan timer.
pub(crate) fn route_timeout_scan(
    timeout: Duration,
    route_timeout_scanp: &Sender<messages::input::RouteTimeoutScanMsg>,
) -> TimeoutTask {
    let route_timeout_scanp = route_timeout_scanp.clone();
    TimeoutTask::new(timeout, move || async move {
        let msg = messages::input::RouteTimeoutScanMsg {};
        let _ = route_timeout_scanp.send(msg).await;
    })
}

// Route garbage-collection sweep timer.
pub(crate) fn route_gc_sweep(
    timeout: Duration,
    route_gc_sweepp: &Sender<messages::input::RouteGcSweepMsg>,
) -> TimeoutTask {
    let route_gc_sweepp = route_gc_sweepp.clone();
    TimeoutTask::new(timeout, move || async move {
        let msg = messages::input::RouteGcSweepMsg {};
        let _ = route_gc_sweepp.send(msg).await;
    })
}

//
// Copyright (c) The Ripd Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use ipnetwork::Ipv4Network;
use ripd_utils::task::TimeoutTask;
use ripd_utils::{Receiver, Sender};
use tokio::sync::mpsc;
use tracing::error;

use crate::debug::Debug;
use crate::error::Error;
use crate::events;
use crate::interface::Interfaces;
use crate::network::SendDestination;
use crate::output::{self, ResponseType};
use crate::packet::Command;
use crate::route::{Metric, Route, RouteTable};
use crate::southbound::{IfaceInfo, SouthboundTx};
use crate::tasks;
use crate::tasks::messages::ProtocolInputMsg;
use crate::tasks::messages::input::{
    AdminRequestMsg, RouteGcSweepMsg, RouteTimeoutScanMsg,
    TriggeredUpdTimeoutMsg, UdpRxPduMsg, UpdateIntervalMsg,
};
#[cfg(feature = "testing")]
use crate::tasks::messages::ProtocolOutputMsg;

#[derive(Debug)]
pub struct Instance {
    // Instance configuration data.
    pub config: InstanceCfg,
    // Instance system data.
    pub system: InstanceSys,
    // Instance interfaces.
    pub interfaces: Interfaces,
    // Instance state data.
    pub state: InstanceState,
    // Instance Tx channels.
    pub tx: InstanceChannelsTx,
}

#[derive(Clone, Debug)]
pub struct InstanceCfg {
    // UDP port used to listen and send RIP packets.
    pub rip_port: u16,
    // TCP port of the administrative interface.
    pub admin_port: u16,
    // Base timer (T) from which all protocol durations derive.
    pub update_interval: u16,
}

#[derive(Debug, Default)]
pub struct InstanceSys {
    // Addresses assigned to this host, used to discard looped-back
    // advertisements.
    pub local_addrs: BTreeSet<Ipv4Addr>,
}

#[derive(Debug)]
pub struct InstanceState {
    // RIP routing table.
    pub routes: RouteTable,
    // Whether any route changed since the last triggered update.
    pub route_change: bool,
    // Time of the last update of any kind.
    pub last_update: Instant,
    // Triggered update suppression (RFC 2453 section 3.10.1).
    pub triggered_upd_suppressed: bool,
    pub triggered_upd_timeout_task: Option<TimeoutTask>,
    // Outbound update timer.
    pub update_interval_task: Option<TimeoutTask>,
    // Route timeout scan timer.
    pub timeout_scan_task: Option<TimeoutTask>,
    // Garbage-collection sweep timer, armed only while garbage routes exist.
    pub gc_sweep_task: Option<TimeoutTask>,
    // Message statistics.
    pub statistics: MessageStatistics,
}

// Inbound and outbound statistic counters.
#[derive(Debug, Default)]
pub struct MessageStatistics {
    pub requests_rcvd: u32,
    pub requests_sent: u32,
    pub responses_rcvd: u32,
    pub responses_sent: u32,
}

#[derive(Debug)]
pub struct InstanceChannelsTx {
    pub protocol_input: ProtocolInputChannelsTx,
    pub southbound: SouthboundTx,
    #[cfg(feature = "testing")]
    pub protocol_output: Sender<ProtocolOutputMsg>,
}

#[derive(Clone, Debug)]
pub struct ProtocolInputChannelsTx {
    // UDP Rx event.
    pub udp_pdu_rx: Sender<UdpRxPduMsg>,
    // Update interval.
    pub update_interval: Sender<UpdateIntervalMsg>,
    // Triggered update holddown expiry.
    pub triggered_upd_timeout: Sender<TriggeredUpdTimeoutMsg>,
    // Route timeout scan event.
    pub route_timeout_scan: Sender<RouteTimeoutScanMsg>,
    // Route garbage-collection sweep event.
    pub route_gc_sweep: Sender<RouteGcSweepMsg>,
    // Administrative request.
    pub admin_request: Sender<AdminRequestMsg>,
}

#[derive(Debug)]
pub struct ProtocolInputChannelsRx {
    // UDP Rx event.
    pub udp_pdu_rx: Receiver<UdpRxPduMsg>,
    // Update interval.
    pub update_interval: Receiver<UpdateIntervalMsg>,
    // Triggered update holddown expiry.
    pub triggered_upd_timeout: Receiver<TriggeredUpdTimeoutMsg>,
    // Route timeout scan event.
    pub route_timeout_scan: Receiver<RouteTimeoutScanMsg>,
    // Route garbage-collection sweep event.
    pub route_gc_sweep: Receiver<RouteGcSweepMsg>,
    // Administrative request.
    pub admin_request: Receiver<AdminRequestMsg>,
}

// ===== impl Instance =====

impl Instance {
    pub fn new(
        config: InstanceCfg,
        system: InstanceSys,
        tx: InstanceChannelsTx,
    ) -> Instance {
        Instance {
            config,
            system,
            interfaces: Default::default(),
            state: InstanceState::new(),
            tx,
        }
    }

    // Registers an interface activated for RIP processing.
    pub fn add_interface(&mut self, info: IfaceInfo) {
        self.interfaces.add(info);
    }

    // Seeds the routing table with a self-originated route (user-configured
    // or imported from the kernel). Such routes never time out and are not
    // installed back into the kernel.
    pub fn add_local_route(&mut self, prefix: Ipv4Network) {
        self.state
            .routes
            .entry(prefix)
            .or_insert_with(|| Route::new(prefix, None, Metric::from(1), 0, true));
    }

    // Brings up all interfaces, requests full tables from the neighbors and
    // emits the initial update.
    pub fn start(&mut self) {
        Debug::InstanceStart.log();

        let Instance {
            config,
            interfaces,
            state,
            tx,
            ..
        } = self;

        // Start interfaces.
        for iface in interfaces.iter_mut() {
            match iface.start(config.rip_port, tx) {
                Ok(()) => {
                    // Ask neighbors for their entire routing tables.
                    output::send_request(
                        state,
                        iface,
                        SendDestination::Multicast,
                    );
                }
                Err(error) => {
                    Error::InterfaceStartError(iface.name.clone(), error)
                        .log();
                }
            }
        }

        // Send the initial full update right away.
        output::send_response_all(state, interfaces, ResponseType::Normal);

        // Arm the periodic timers.
        let timeout = tasks::update_interval_jitter(config.update_interval);
        state.update_interval_task = Some(tasks::update_interval(
            timeout,
            &tx.protocol_input.update_interval,
        ));
        state.timeout_scan_task = Some(tasks::route_timeout_scan(
            config.timeout_interval(),
            &tx.protocol_input.route_timeout_scan,
        ));
    }

    // Runs the instance event loop until a shutdown signal arrives or all
    // input channels close. Every protocol event is processed here, one
    // message at a time, so the routing table needs no locking.
    pub async fn run(mut self, mut rx: ProtocolInputChannelsRx) {
        self.start();

        let shutdown = shutdown_signal();
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                msg = rx.recv() => match msg {
                    Some(msg) => self.process_protocol_msg(msg),
                    None => break,
                }
            }
        }

        self.shutdown();
    }

    // Process protocol message.
    pub fn process_protocol_msg(&mut self, msg: ProtocolInputMsg) {
        match msg {
            // Received UDP PDU.
            ProtocolInputMsg::UdpRxPdu(msg) => {
                events::process_pdu(self, msg.src, msg.pdu);
            }
            // Update interval has expired.
            ProtocolInputMsg::UpdateInterval(_msg) => {
                events::process_update_interval(self);
            }
            // Triggered update holddown has expired.
            ProtocolInputMsg::TriggeredUpdTimeout(_msg) => {
                events::process_triggered_upd_timeout(self);
            }
            // Route timeout scan is due.
            ProtocolInputMsg::RouteTimeoutScan(_msg) => {
                events::process_route_timeout_scan(self);
            }
            // Route garbage-collection sweep is due.
            ProtocolInputMsg::RouteGcSweep(_msg) => {
                events::process_route_gc_sweep(self);
            }
            // Administrative request.
            ProtocolInputMsg::AdminRequest(msg) => {
                events::process_admin_request(self, msg);
            }
        }
    }

    // Reverses all system changes made while running.
    fn shutdown(&mut self) {
        Debug::InstanceShutdown.log();

        // Uninstall learned routes.
        for route in self
            .state
            .routes
            .values()
            .filter(|route| route.nexthop.is_some())
        {
            self.tx.southbound.route_uninstall(route);
        }

        // Stop interfaces.
        for iface in self.interfaces.iter_mut() {
            iface.stop();
        }
    }
}

// ===== impl InstanceCfg =====

impl InstanceCfg {
    // Routes not refreshed within this window are moved to garbage
    // collection.
    pub fn timeout_interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.update_interval) * 6)
    }

    // Garbage routes older than this are deleted.
    pub fn garbage_interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.update_interval) * 4)
    }
}

impl Default for InstanceCfg {
    fn default() -> InstanceCfg {
        InstanceCfg {
            rip_port: 520,
            admin_port: 1520,
            update_interval: 30,
        }
    }
}

// ===== impl InstanceState =====

impl InstanceState {
    fn new() -> InstanceState {
        InstanceState {
            routes: Default::default(),
            route_change: false,
            last_update: Instant::now(),
            triggered_upd_suppressed: false,
            triggered_upd_timeout_task: None,
            update_interval_task: None,
            timeout_scan_task: None,
            gc_sweep_task: None,
            statistics: Default::default(),
        }
    }
}

// ===== impl MessageStatistics =====

impl MessageStatistics {
    pub(crate) fn update(&mut self, command: Command, sent: bool) {
        match (command, sent) {
            (Command::Request, false) => self.requests_rcvd += 1,
            (Command::Request, true) => self.requests_sent += 1,
            (Command::Response, false) => self.responses_rcvd += 1,
            (Command::Response, true) => self.responses_sent += 1,
        }
    }
}

// ===== impl ProtocolInputChannelsRx =====

impl ProtocolInputChannelsRx {
    pub async fn recv(&mut self) -> Option<ProtocolInputMsg> {
        tokio::select! {
            msg = self.udp_pdu_rx.recv() => {
                msg.map(ProtocolInputMsg::UdpRxPdu)
            }
            msg = self.update_interval.recv() => {
                msg.map(ProtocolInputMsg::UpdateInterval)
            }
            msg = self.triggered_upd_timeout.recv() => {
                msg.map(ProtocolInputMsg::TriggeredUpdTimeout)
            }
            msg = self.route_timeout_scan.recv() => {
                msg.map(ProtocolInputMsg::RouteTimeoutScan)
            }
            msg = self.route_gc_sweep.recv() => {
                msg.map(ProtocolInputMsg::RouteGcSweep)
            }
            msg = self.admin_request.recv() => {
                msg.map(ProtocolInputMsg::AdminRequest)
            }
        }
    }
}

// ===== global functions =====

// Create channels for all protocol input events.
pub fn protocol_input_channels()
-> (ProtocolInputChannelsTx, ProtocolInputChannelsRx) {
    let (udp_pdu_rxp, udp_pdu_rxc) = mpsc::channel(4);
    let (update_intervalp, update_intervalc) = mpsc::channel(4);
    let (triggered_upd_timeoutp, triggered_upd_timeoutc) = mpsc::channel(4);
    let (route_timeout_scanp, route_timeout_scanc) = mpsc::channel(4);
    let (route_gc_sweepp, route_gc_sweepc) = mpsc::channel(4);
    let (admin_requestp, admin_requestc) = mpsc::channel(4);

    let tx = ProtocolInputChannelsTx {
        udp_pdu_rx: udp_pdu_rxp,
        update_interval: update_intervalp,
        triggered_upd_timeout: triggered_upd_timeoutp,
        route_timeout_scan: route_timeout_scanp,
        route_gc_sweep: route_gc_sweepp,
        admin_request: admin_requestp,
    };
    let rx = ProtocolInputChannelsRx {
        udp_pdu_rx: udp_pdu_rxc,
        update_interval: update_intervalc,
        triggered_upd_timeout: triggered_upd_timeoutc,
        route_timeout_scan: route_timeout_scanc,
        route_gc_sweep: route_gc_sweepc,
        admin_request: admin_requestc,
    };

    (tx, rx)
}

// Completes when the process receives SIGINT or SIGTERM.
async fn shutdown_signal() {
    let mut terminate =
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .ok();
    if terminate.is_none() {
        error!("failed to install SIGTERM handler");
    }

    tokio::select! {
        _ = tokio::signal::ctrl_c() => (),
        _ = async {
            match terminate.as_mut() {
                Some(terminate) => {
                    terminate.recv().await;
                }
                None => std::future::pending().await,
            }
        } => (),
    }
}

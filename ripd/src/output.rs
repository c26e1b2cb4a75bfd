//
// Copyright (c) The Ripd Contributors
//
// SPDX-License-Identifier: MIT
//

use std::time::{Duration, Instant};

use itertools::Itertools;
use rand::Rng;

use crate::debug::Debug;
use crate::instance::{InstanceChannelsTx, InstanceState};
use crate::interface::{Interface, Interfaces};
use crate::network::SendDestination;
use crate::packet::{Command, Pdu, Rte, RteIpv4};
use crate::route::RouteFlags;
use crate::tasks;
use crate::tasks::messages::output::UdpTxPduMsg;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum ResponseType {
    Normal,
    Triggered,
}

// ===== global functions =====

pub(crate) fn send_pdu(
    state: &mut InstanceState,
    iface: &Interface,
    dst: SendDestination,
    pdu: Pdu,
) {
    // Log PDU being sent.
    Debug::PduTx(&iface.name, &pdu).log();

    // Update statistics.
    state.statistics.update(pdu.command, true);

    // Send packet.
    if let Some(net) = &iface.net {
        let msg = UdpTxPduMsg {
            ifname: iface.name.clone(),
            dst,
            pdu,
        };
        let _ = net.udp_tx_pdup.send(msg);
    }
}

// Requests the entire routing table of the neighbors on this interface.
pub(crate) fn send_request(
    state: &mut InstanceState,
    iface: &Interface,
    dst: SendDestination,
) {
    let pdu = Pdu::new_dump_request();
    send_pdu(state, iface, dst, pdu);
}

pub(crate) fn send_response(
    state: &mut InstanceState,
    iface: &Interface,
    dst: SendDestination,
    response_type: ResponseType,
) {
    // Any table-derived response counts as an update for the purposes of
    // triggered update suppression.
    state.last_update = Instant::now();

    // Build Response RTEs.
    let mut rtes = vec![];
    for route in state.routes.values() {
        // Skip unchanged routes for triggered updates.
        if response_type == ResponseType::Triggered
            && !route.flags.contains(RouteFlags::CHANGED)
        {
            continue;
        }

        // Split-horizon processing: suppress learned routes when advertising
        // through the interface they were learned from.
        if let Some(nexthop) = &route.nexthop
            && !route.imported
            && iface.contains_addr(nexthop)
        {
            continue;
        }

        // Advertise an unspecified nexthop unless the nexthop is a different
        // router on the interface's subnet, in which case receivers may
        // forward directly to it.
        let nexthop = route.nexthop.filter(|nexthop| {
            iface.contains_addr(nexthop) && *nexthop != iface.system.addr.ip()
        });

        // Append RTE.
        let rte =
            Rte::Ipv4(RteIpv4::new(route.tag, route.prefix, nexthop, route.metric));
        rtes.push(rte);
    }

    // Nothing to send.
    if rtes.is_empty() {
        return;
    }

    // Send as many PDUs as necessary.
    for rtes in rtes
        .into_iter()
        .chunks(Pdu::MAX_ENTRIES)
        .into_iter()
        .map(|chunk| chunk.collect())
    {
        let pdu = Pdu::new(Command::Response, rtes);
        send_pdu(state, iface, dst, pdu);
    }
}

pub(crate) fn send_response_all(
    state: &mut InstanceState,
    interfaces: &Interfaces,
    response_type: ResponseType,
) {
    for iface in interfaces.iter().filter(|iface| iface.is_active()) {
        send_response(state, iface, SendDestination::Multicast, response_type);
    }
}

// Emits a triggered update and clears all route change state.
pub(crate) fn triggered_update(
    state: &mut InstanceState,
    interfaces: &Interfaces,
) {
    Debug::TriggeredUpdate.log();

    // Send changed routes.
    send_response_all(state, interfaces, ResponseType::Triggered);

    // Clear the route change flags.
    for route in state.routes.values_mut() {
        route.flags.remove(RouteFlags::CHANGED);
    }
    state.route_change = false;
    state.triggered_upd_suppressed = false;
    state.triggered_upd_timeout_task = None;
}

// Handles a route change by requesting a triggered update, subject to the
// RFC 2453 section 3.10.1 random holddown.
pub(crate) fn handle_route_change(
    state: &mut InstanceState,
    interfaces: &Interfaces,
    tx: &InstanceChannelsTx,
) {
    // A pending triggered update will cover this change.
    if state.triggered_upd_suppressed {
        return;
    }
    state.triggered_upd_suppressed = true;

    let holddown = Duration::from_secs(rand::rng().random_range(1..5));
    if state.last_update.elapsed() > holddown {
        triggered_update(state, interfaces);
    } else {
        state.triggered_upd_timeout_task = Some(tasks::triggered_upd_timeout(
            holddown,
            &tx.protocol_input.triggered_upd_timeout,
        ));
    }
}

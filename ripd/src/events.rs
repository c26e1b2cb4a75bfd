//
// Copyright (c) The Ripd Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::btree_map;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::{Duration, Instant};

use ripd_utils::task::TimeoutTask;

use crate::admin::{self, AdminCommand};
use crate::debug::Debug;
use crate::error::Error;
use crate::instance::{
    Instance, InstanceCfg, InstanceChannelsTx, InstanceState,
};
use crate::interface::{Interface, Interfaces};
use crate::network::SendDestination;
use crate::output::{self, ResponseType};
use crate::packet::{Command, DecodeResult, Pdu, Rte};
use crate::route::{Metric, Route, RouteFlags};
use crate::southbound::SouthboundTx;
use crate::tasks;
use crate::tasks::messages::input::AdminRequestMsg;

// ===== UDP packet receipt =====

pub(crate) fn process_pdu(
    instance: &mut Instance,
    src: SocketAddrV4,
    pdu: DecodeResult<Pdu>,
) {
    let Instance {
        config,
        system,
        interfaces,
        state,
        tx,
    } = instance;
    let src_ip = *src.ip();

    // The source must belong to a subnet of one of the activated interfaces.
    let Some(iface) = interfaces.get_by_source(src_ip) else {
        Error::UdpNonLinkLocalSource(src_ip).log();
        return;
    };

    // Ignore messages sent by the local system itself.
    if system.local_addrs.contains(&src_ip) {
        Debug::HostLocalSource(&src_ip).log();
        return;
    }

    // Log received PDU.
    Debug::PduRx(&iface.name, &src_ip, &pdu).log();

    match pdu {
        Ok(pdu) => {
            state.statistics.update(pdu.command, false);
            match pdu.command {
                Command::Request => {
                    process_pdu_request(state, iface, src, pdu);
                }
                Command::Response => {
                    process_pdu_response(config, state, interfaces, src, pdu, tx);
                }
            }
        }
        Err(error) => {
            Error::UdpPduDecodeError(error).log();
        }
    }
}

fn process_pdu_request(
    state: &mut InstanceState,
    iface: &Interface,
    src: SocketAddrV4,
    mut pdu: Pdu,
) {
    // If there are no entries, no response is given.
    if pdu.rtes.is_empty() {
        return;
    }

    // The response should be sent to the requester's address and port.
    let dst = SendDestination::Unicast(src);

    // Check if it's a request to send the entire routing table.
    if pdu.is_dump_request() {
        output::send_response(state, iface, dst, ResponseType::Normal);
    } else {
        // Examine the list of RTEs in the Request one by one. For each entry,
        // look up the destination in the routing database and, if there is a
        // route, put that route's metric in the metric field of the RTE. If
        // there is no explicit route to the specified destination, put
        // infinity in the metric field. Once all the entries have been filled
        // in, change the command from Request to Response and send the
        // datagram back to the requester.
        for rte in pdu.rtes.iter_mut() {
            if let Some(rte) = rte.as_ipv4_mut() {
                let metric = match state.routes.get(&rte.prefix) {
                    // Do not perform split-horizon.
                    Some(route) => route.metric,
                    None => Metric::infinite(),
                };
                rte.metric = metric;
            }
        }
        pdu.command = Command::Response;
        output::send_pdu(state, iface, dst, pdu);
    }
}

// A Response can be received for one of several different reasons:
//
// - response to a specific query
// - regular update (unsolicited response)
// - triggered update caused by a route change
//
// Processing is the same no matter why the Response was generated.
fn process_pdu_response(
    config: &InstanceCfg,
    state: &mut InstanceState,
    interfaces: &Interfaces,
    src: SocketAddrV4,
    pdu: Pdu,
    tx: &InstanceChannelsTx,
) {
    // The Response must be ignored if it is not from the RIP port.
    if src.port() != config.rip_port {
        Debug::ResponseWrongPort(&src).log();
        return;
    }

    // Iterate over all RTEs.
    for rte in pdu.rtes {
        let Rte::Ipv4(rte) = rte else {
            continue;
        };

        // Update the metric by adding the cost of the network on which the
        // message arrived.
        let mut metric = rte.metric;
        metric.add_hop();

        // Use the nexthop from the nexthop field if it's present. Otherwise,
        // use the source of the RIP advertisement.
        let nexthop = rte.nexthop.unwrap_or(*src.ip());

        // Check if the route already exists in the routing table.
        match state.routes.entry(rte.prefix) {
            btree_map::Entry::Occupied(mut o) => {
                let route = o.get_mut();

                if Some(nexthop) == route.nexthop {
                    if metric != route.metric {
                        if !route.metric.is_infinite() && metric.is_infinite()
                        {
                            // The network became unreachable through its
                            // current nexthop: poison the route and hold it
                            // for garbage collection.
                            if start_garbage_collection(route, &tx.southbound)
                            {
                                state.route_change = true;
                                ensure_gc_sweep(
                                    &mut state.gc_sweep_task,
                                    config,
                                    tx,
                                );
                            }
                        } else {
                            update_route(
                                route,
                                Some(nexthop),
                                metric,
                                &tx.southbound,
                            );
                            state.route_change = true;
                        }
                    } else if !route.is_garbage() {
                        // Same origin, same metric: just refresh the timeout.
                        route.init_timeout();
                    }
                } else if metric < route.metric {
                    // Found a better route through a different nexthop.
                    update_route(route, Some(nexthop), metric, &tx.southbound);
                    state.route_change = true;
                }
            }
            btree_map::Entry::Vacant(v) => {
                // Never add unreachable destinations.
                if metric.is_infinite() {
                    continue;
                }

                // Create and install new route.
                let route =
                    Route::new(rte.prefix, Some(nexthop), metric, rte.tag, false);
                tx.southbound.route_install(&route);
                v.insert(route);
                state.route_change = true;
            }
        }
    }

    // A triggered update is requested only once the entire batch of RTEs has
    // been applied.
    if state.route_change {
        output::handle_route_change(state, interfaces, tx);
    }
}

// ===== update interval =====

pub(crate) fn process_update_interval(instance: &mut Instance) {
    Debug::UpdateInterval.log();

    let Instance {
        config,
        interfaces,
        state,
        tx,
        ..
    } = instance;

    output::send_response_all(state, interfaces, ResponseType::Normal);

    // Reschedule with fresh jitter.
    let timeout = tasks::update_interval_jitter(config.update_interval);
    state.update_interval_task = Some(tasks::update_interval(
        timeout,
        &tx.protocol_input.update_interval,
    ));
}

// ===== triggered update holddown expiry =====

pub(crate) fn process_triggered_upd_timeout(instance: &mut Instance) {
    let Instance {
        interfaces, state, ..
    } = instance;

    output::triggered_update(state, interfaces);
}

// ===== route timeout scan =====

pub(crate) fn process_route_timeout_scan(instance: &mut Instance) {
    Debug::TimeoutScan.log();

    let Instance {
        config,
        interfaces,
        state,
        tx,
        ..
    } = instance;
    let timeout = config.timeout_interval();
    let now = Instant::now();

    // Transition expired routes to garbage collection, remembering the most
    // recent timestamp among the surviving ones.
    let mut latest = None;
    let mut expired = vec![];
    for (prefix, route) in state.routes.iter() {
        if route.is_garbage() {
            continue;
        }
        let Some(timestamp) = route.timeout else {
            continue;
        };

        if now.duration_since(timestamp) > timeout {
            expired.push(*prefix);
        } else {
            latest = latest.max(Some(timestamp));
        }
    }
    for prefix in &expired {
        if let Some(route) = state.routes.get_mut(prefix)
            && start_garbage_collection(route, &tx.southbound)
        {
            state.route_change = true;
            ensure_gc_sweep(&mut state.gc_sweep_task, config, tx);
        }
    }

    // Poisoned routes are advertised through a triggered update.
    if state.route_change {
        output::handle_route_change(state, interfaces, tx);
    }

    // Compute the next scan time from the timestamps seen above.
    let next = next_scan_time(latest, timeout, now).unwrap_or(timeout);
    state.timeout_scan_task = Some(tasks::route_timeout_scan(
        next,
        &tx.protocol_input.route_timeout_scan,
    ));
}

// ===== route garbage collection sweep =====

pub(crate) fn process_route_gc_sweep(instance: &mut Instance) {
    Debug::GcSweep.log();

    let Instance {
        config, state, tx, ..
    } = instance;
    let garbage = config.garbage_interval();
    let now = Instant::now();

    // Mark expired garbage routes for deletion.
    let mut latest = None;
    for route in state
        .routes
        .values_mut()
        .filter(|route| route.is_garbage())
    {
        let Some(timestamp) = route.timeout else {
            continue;
        };

        if now.duration_since(timestamp) > garbage {
            route.flags.insert(RouteFlags::DELETED);
        } else {
            latest = latest.max(Some(timestamp));
        }
    }

    // Check for the deletion mark and safely drop those routes.
    let southbound = &tx.southbound;
    state.routes.retain(|prefix, route| {
        if route.flags.contains(RouteFlags::DELETED) {
            Debug::RouteDelete(prefix).log();
            southbound.route_uninstall(route);
            false
        } else {
            true
        }
    });

    // Reschedule while garbage routes remain; stand down otherwise.
    match next_scan_time(latest, garbage, now) {
        Some(next) => {
            state.gc_sweep_task = Some(tasks::route_gc_sweep(
                next,
                &tx.protocol_input.route_gc_sweep,
            ));
        }
        None => {
            state.gc_sweep_task = None;
        }
    }
}

// ===== administrative requests =====

pub(crate) fn process_admin_request(
    instance: &mut Instance,
    msg: AdminRequestMsg,
) {
    let output = match msg.command {
        AdminCommand::Routes => admin::format_routes(&instance.state.routes),
        AdminCommand::Stats => {
            admin::format_stats(&instance.state.statistics)
        }
    };
    let _ = msg.reply.send(output);
}

// ===== helper functions =====

// Poisons the route and starts its garbage-collection window. Returns
// whether the route actually transitioned (entering GC twice is a no-op).
pub(crate) fn start_garbage_collection(
    route: &mut Route,
    southbound: &SouthboundTx,
) -> bool {
    if route.is_garbage() {
        return false;
    }

    Debug::RouteStartGc(&route.prefix).log();

    route.flags.insert(RouteFlags::CHANGED | RouteFlags::GARBAGE);
    route.metric.set_infinite();
    // The timestamp now marks the start of the garbage-collection window.
    route.init_timeout();
    southbound.route_modify(route);

    true
}

fn update_route(
    route: &mut Route,
    nexthop: Option<Ipv4Addr>,
    metric: Metric,
    southbound: &SouthboundTx,
) {
    route.init_timeout();
    route.flags.remove(RouteFlags::GARBAGE);
    route.flags.insert(RouteFlags::CHANGED);
    route.metric = metric;
    route.nexthop = nexthop;

    Debug::RouteUpdate(&route.prefix, &route.nexthop, &route.metric).log();

    southbound.route_modify(route);
}

// Arms the garbage-collection sweep unless it's already running.
fn ensure_gc_sweep(
    gc_sweep_task: &mut Option<TimeoutTask>,
    config: &InstanceCfg,
    tx: &InstanceChannelsTx,
) {
    if gc_sweep_task.is_none() {
        *gc_sweep_task = Some(tasks::route_gc_sweep(
            config.garbage_interval(),
            &tx.protocol_input.route_gc_sweep,
        ));
    }
}

// Computes when the next scan should run: one second past the expiry of the
// youngest qualifying timestamp, or `None` when nothing qualifies.
fn next_scan_time(
    latest: Option<Instant>,
    window: Duration,
    now: Instant,
) -> Option<Duration> {
    latest.map(|timestamp| {
        (timestamp + window + Duration::from_secs(1))
            .saturating_duration_since(now)
    })
}

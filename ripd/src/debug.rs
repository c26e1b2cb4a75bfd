//
// Copyright (c) The Ripd Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::{Ipv4Addr, SocketAddrV4};

use ipnetwork::Ipv4Network;
use tracing::{debug, debug_span};

use crate::packet::{DecodeResult, Pdu};
use crate::route::Metric;

// RIP debug messages.
#[derive(Debug)]
pub enum Debug<'a> {
    InstanceStart,
    InstanceShutdown,
    InterfaceStart(&'a str),
    InterfaceStop(&'a str),
    UpdateInterval,
    TimeoutScan,
    GcSweep,
    TriggeredUpdate,
    PduRx(&'a str, &'a Ipv4Addr, &'a DecodeResult<Pdu>),
    PduTx(&'a str, &'a Pdu),
    HostLocalSource(&'a Ipv4Addr),
    ResponseWrongPort(&'a SocketAddrV4),
    RouteCreate(&'a Ipv4Network, &'a Option<Ipv4Addr>, &'a Metric),
    RouteUpdate(&'a Ipv4Network, &'a Option<Ipv4Addr>, &'a Metric),
    RouteStartGc(&'a Ipv4Network),
    RouteDelete(&'a Ipv4Network),
}

// ===== impl Debug =====

impl Debug<'_> {
    // Log debug message using the tracing API.
    pub(crate) fn log(&self) {
        match self {
            Debug::InstanceStart | Debug::InstanceShutdown => {
                debug!("{}", self);
            }
            Debug::InterfaceStart(name) | Debug::InterfaceStop(name) => {
                debug_span!("interface", %name).in_scope(|| {
                    debug!("{}", self);
                });
            }
            Debug::UpdateInterval
            | Debug::TimeoutScan
            | Debug::GcSweep
            | Debug::TriggeredUpdate => {
                debug!("{}", self);
            }
            Debug::PduRx(interface, source, pdu) => {
                debug_span!("network").in_scope(|| {
                    debug_span!("input", %interface, %source).in_scope(|| {
                        let data = serde_json::to_string(&pdu).unwrap();
                        debug!(%data, "{}", self);
                    });
                });
            }
            Debug::PduTx(interface, pdu) => {
                debug_span!("network").in_scope(|| {
                    debug_span!("output", %interface).in_scope(|| {
                        let data = serde_json::to_string(&pdu).unwrap();
                        debug!(%data, "{}", self);
                    });
                });
            }
            Debug::HostLocalSource(addr) => {
                debug!(address = %addr, "{}", self);
            }
            Debug::ResponseWrongPort(source) => {
                debug!(%source, "{}", self);
            }
            Debug::RouteCreate(prefix, nexthop, metric)
            | Debug::RouteUpdate(prefix, nexthop, metric) => {
                let nexthop = match nexthop {
                    Some(nexthop) => nexthop.to_string(),
                    None => "self".to_owned(),
                };
                debug!(%prefix, %nexthop, metric = %metric.get(), "{}", self);
            }
            Debug::RouteStartGc(prefix) | Debug::RouteDelete(prefix) => {
                debug!(%prefix, "{}", self);
            }
        }
    }
}

impl std::fmt::Display for Debug<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Debug::InstanceStart => {
                write!(f, "starting instance")
            }
            Debug::InstanceShutdown => {
                write!(f, "shutting down instance")
            }
            Debug::InterfaceStart(..) => {
                write!(f, "starting interface")
            }
            Debug::InterfaceStop(..) => {
                write!(f, "stopping interface")
            }
            Debug::UpdateInterval => {
                write!(f, "update interval")
            }
            Debug::TimeoutScan => {
                write!(f, "checking route timeouts")
            }
            Debug::GcSweep => {
                write!(f, "collecting garbage routes")
            }
            Debug::TriggeredUpdate => {
                write!(f, "triggered update")
            }
            Debug::PduRx(..) | Debug::PduTx(..) => {
                write!(f, "pdu")
            }
            Debug::HostLocalSource(..) => {
                write!(f, "ignoring message from the local system")
            }
            Debug::ResponseWrongPort(..) => {
                write!(f, "response source port is not the RIP port")
            }
            Debug::RouteCreate(..) => {
                write!(f, "route created")
            }
            Debug::RouteUpdate(..) => {
                write!(f, "route updated")
            }
            Debug::RouteStartGc(..) => {
                write!(f, "starting route garbage collection")
            }
            Debug::RouteDelete(..) => {
                write!(f, "route deleted")
            }
        }
    }
}

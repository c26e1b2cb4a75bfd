//
// Copyright (c) The Ripd Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;

use ipnetwork::Ipv4Network;
use ripd_utils::UnboundedSender;
use tracing::error;

use crate::route::Route;

// Interface data gathered by the host adapter at startup.
#[derive(Clone, Debug)]
pub struct IfaceInfo {
    pub name: String,
    pub ifindex: u32,
    // Interface address and prefix length.
    pub addr: Ipv4Network,
    pub up: bool,
}

// Kernel route operations requested by the protocol engine and carried out
// by the host adapter.
#[derive(Debug, Eq, PartialEq)]
pub enum RouteOpMsg {
    Install {
        prefix: Ipv4Network,
        nexthop: Ipv4Addr,
        metric: u8,
    },
    Modify {
        prefix: Ipv4Network,
        nexthop: Ipv4Addr,
        metric: u8,
    },
    Uninstall {
        prefix: Ipv4Network,
    },
}

// Failure of a kernel route operation. The in-memory routing table advances
// regardless; reconciliation is the operator's business.
#[derive(Debug)]
pub struct ModifyRouteError {
    pub operation: &'static str,
    pub prefix: Ipv4Network,
    pub reason: String,
}

#[derive(Clone, Debug)]
pub struct SouthboundTx(pub UnboundedSender<RouteOpMsg>);

// ===== impl SouthboundTx =====

impl SouthboundTx {
    pub fn new(tx: UnboundedSender<RouteOpMsg>) -> Self {
        SouthboundTx(tx)
    }

    // Install a learned route in the kernel routing table.
    pub(crate) fn route_install(&self, route: &Route) {
        // Self-originated routes already exist in the kernel (or are purely
        // administrative) and are never installed.
        let Some(nexthop) = route.nexthop else {
            return;
        };

        let msg = RouteOpMsg::Install {
            prefix: route.prefix,
            nexthop,
            metric: route.metric.get(),
        };
        let _ = self.0.send(msg);
    }

    // Update a learned route in the kernel routing table.
    pub(crate) fn route_modify(&self, route: &Route) {
        let Some(nexthop) = route.nexthop else {
            return;
        };

        let msg = RouteOpMsg::Modify {
            prefix: route.prefix,
            nexthop,
            metric: route.metric.get(),
        };
        let _ = self.0.send(msg);
    }

    // Remove a learned route from the kernel routing table.
    pub(crate) fn route_uninstall(&self, route: &Route) {
        if route.nexthop.is_none() {
            return;
        }

        let msg = RouteOpMsg::Uninstall {
            prefix: route.prefix,
        };
        let _ = self.0.send(msg);
    }
}

// ===== impl ModifyRouteError =====

impl ModifyRouteError {
    pub fn log(&self) {
        error!(
            operation = %self.operation,
            prefix = %self.prefix,
            reason = %self.reason,
            "{}", self
        );
    }
}

impl std::fmt::Display for ModifyRouteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "kernel route operation failed")
    }
}

impl std::error::Error for ModifyRouteError {}

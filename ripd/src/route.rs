//
// Copyright (c) The Ripd Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::time::Instant;

use bitflags::bitflags;
use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};

use crate::debug::Debug;
use crate::error::MetricError;

// RIP routing table, keyed by prefix (network address plus mask). Keying by
// prefix guarantees there is at most one entry per (network, mask) pair.
pub type RouteTable = BTreeMap<Ipv4Network, Route>;

#[derive(Debug)]
pub struct Route {
    pub prefix: Ipv4Network,
    // Nexthop of the route. `None` for self-originated routes, which are
    // advertised with an unspecified nexthop and never installed in the
    // kernel.
    pub nexthop: Option<Ipv4Addr>,
    pub metric: Metric,
    pub tag: u16,
    // Self-originated routes (user-configured or imported from the kernel)
    // never time out.
    pub imported: bool,
    pub flags: RouteFlags,
    // Timestamp of the last event that refreshed this route. Doubles as the
    // garbage-collection start time once the GARBAGE flag is set.
    pub timeout: Option<Instant>,
}

#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct Metric(u8);

bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct RouteFlags: u8 {
        // The route changed since the last triggered update.
        const CHANGED = 0x01;
        // The route is held at metric 16 awaiting deletion.
        const GARBAGE = 0x02;
        // Transient mark set by the GC sweep right before removal.
        const DELETED = 0x04;
    }
}

// ===== impl Route =====

impl Route {
    pub fn new(
        prefix: Ipv4Network,
        nexthop: Option<Ipv4Addr>,
        metric: Metric,
        tag: u16,
        imported: bool,
    ) -> Self {
        Debug::RouteCreate(&prefix, &nexthop, &metric).log();

        let mut route = Route {
            prefix,
            nexthop,
            metric,
            tag,
            imported,
            flags: RouteFlags::CHANGED,
            timeout: None,
        };
        route.init_timeout();
        route
    }

    // Refreshes the route timestamp. Self-originated routes carry no
    // timestamp at all, regardless of when this is called.
    pub fn init_timeout(&mut self) {
        if self.imported {
            self.timeout = None;
        } else {
            self.timeout = Some(Instant::now());
        }
    }

    pub fn is_garbage(&self) -> bool {
        self.flags.contains(RouteFlags::GARBAGE)
    }
}

// ===== impl Metric =====

impl Metric {
    pub const INFINITE: u8 = 16;

    pub fn new(metric: impl TryInto<u8>) -> Result<Self, MetricError> {
        match metric.try_into() {
            Ok(metric) if metric <= Self::INFINITE => Ok(Metric(metric)),
            _ => Err(MetricError::InvalidValue),
        }
    }

    pub fn infinite() -> Self {
        Metric(Self::INFINITE)
    }

    pub fn get(&self) -> u8 {
        self.0
    }

    // Adds the cost of the network the advertisement arrived on (one hop),
    // saturating at infinity.
    pub fn add_hop(&mut self) {
        self.0 = std::cmp::min(self.0 + 1, Self::INFINITE);
    }

    pub fn set_infinite(&mut self) {
        self.0 = Self::INFINITE
    }

    pub fn is_infinite(&self) -> bool {
        self.0 == Self::INFINITE
    }
}

impl From<u8> for Metric {
    // This function panics on error. It should only be used when the metric
    // has already been previously validated.
    fn from(metric: u8) -> Metric {
        Metric::new(metric).expect("Invalid metric value")
    }
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

//
// Copyright (c) The Ripd Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::{IpAddr, Ipv4Addr};

use futures::TryStreamExt;
use ipnetwork::Ipv4Network;
use ripd::southbound::{IfaceInfo, ModifyRouteError, RouteOpMsg};
use ripd_utils::UnboundedReceiver;
use rtnetlink::packet_route::address::AddressAttribute;
use rtnetlink::packet_route::link::{LinkAttribute, LinkFlags};
use rtnetlink::packet_route::route::{
    RouteAddress, RouteAttribute, RouteProtocol, RouteType,
};
use rtnetlink::{Handle, RouteMessageBuilder};

// Route protocol type as defined in the rtnetlink.h kernel header.
const NETLINK_PROTO_RIP: u8 = 189;

// The kernel main routing table.
const RT_TABLE_MAIN: u8 = 254;

pub(crate) fn connection() -> Result<Handle, std::io::Error> {
    let (conn, handle, _) = rtnetlink::new_connection()?;
    tokio::spawn(conn);
    Ok(handle)
}

// Enumerates the host interfaces, producing one entry per assigned IPv4
// address.
pub(crate) async fn list_interfaces(
    handle: &Handle,
) -> Result<Vec<IfaceInfo>, rtnetlink::Error> {
    let links: Vec<_> =
        handle.link().get().execute().try_collect().await?;
    let addresses: Vec<_> =
        handle.address().get().execute().try_collect().await?;

    let mut interfaces = vec![];
    for link in &links {
        let Some(name) = link.attributes.iter().find_map(|attr| match attr {
            LinkAttribute::IfName(name) => Some(name.clone()),
            _ => None,
        }) else {
            continue;
        };
        let up = link.header.flags.contains(LinkFlags::Up);

        for address in addresses
            .iter()
            .filter(|address| address.header.index == link.header.index)
        {
            let Some(ip) =
                address.attributes.iter().find_map(|attr| match attr {
                    AddressAttribute::Address(IpAddr::V4(ip)) => Some(*ip),
                    _ => None,
                })
            else {
                continue;
            };
            let Ok(addr) = Ipv4Network::new(ip, address.header.prefix_len)
            else {
                continue;
            };

            interfaces.push(IfaceInfo {
                name: name.clone(),
                ifindex: link.header.index,
                addr,
                up,
            });
        }
    }

    Ok(interfaces)
}

// Dumps the IPv4 unicast routes of the kernel main table, used to seed the
// routing database when `--import-routes` is given.
pub(crate) async fn local_routes(
    handle: &Handle,
) -> Result<Vec<Ipv4Network>, rtnetlink::Error> {
    let routes: Vec<_> = handle
        .route()
        .get(RouteMessageBuilder::<Ipv4Addr>::default().build())
        .execute()
        .try_collect()
        .await?;

    let mut prefixes = vec![];
    for route in &routes {
        if route.header.table != RT_TABLE_MAIN
            || route.header.kind != RouteType::Unicast
        {
            continue;
        }

        // Routes without a destination (e.g. the default route) aren't
        // imported.
        let Some(dest) = route.attributes.iter().find_map(|attr| match attr {
            RouteAttribute::Destination(RouteAddress::Inet(addr)) => {
                Some(*addr)
            }
            _ => None,
        }) else {
            continue;
        };
        let Ok(prefix) =
            Ipv4Network::new(dest, route.header.destination_prefix_length)
        else {
            continue;
        };

        prefixes.push(prefix);
    }

    Ok(prefixes)
}

// Host adapter worker: executes the kernel route operations requested by
// the protocol engine. Failures are logged and the protocol table advances
// regardless; reconciliation is the operator's business.
pub(crate) async fn process_route_ops(
    handle: Handle,
    mut route_opc: UnboundedReceiver<RouteOpMsg>,
) {
    while let Some(msg) = route_opc.recv().await {
        match msg {
            RouteOpMsg::Install {
                prefix,
                nexthop,
                metric,
            } => {
                route_replace(&handle, prefix, nexthop, metric, "install")
                    .await;
            }
            RouteOpMsg::Modify {
                prefix,
                nexthop,
                metric,
            } => {
                route_replace(&handle, prefix, nexthop, metric, "modify")
                    .await;
            }
            RouteOpMsg::Uninstall { prefix } => {
                route_del(&handle, prefix).await;
            }
        }
    }
}

async fn route_replace(
    handle: &Handle,
    prefix: Ipv4Network,
    nexthop: Ipv4Addr,
    metric: u8,
    operation: &'static str,
) {
    let route = RouteMessageBuilder::<Ipv4Addr>::default()
        .destination_prefix(prefix.ip(), prefix.prefix())
        .gateway(nexthop)
        .protocol(RouteProtocol::from(NETLINK_PROTO_RIP))
        .priority(u32::from(metric))
        .build();

    if let Err(error) = handle.route().add(route).replace().execute().await {
        ModifyRouteError {
            operation,
            prefix,
            reason: error.to_string(),
        }
        .log();
    }
}

async fn route_del(handle: &Handle, prefix: Ipv4Network) {
    let route = RouteMessageBuilder::<Ipv4Addr>::default()
        .destination_prefix(prefix.ip(), prefix.prefix())
        .build();

    if let Err(error) = handle.route().del(route).execute().await {
        ModifyRouteError {
            operation: "uninstall",
            prefix,
            reason: error.to_string(),
        }
        .log();
    }
}

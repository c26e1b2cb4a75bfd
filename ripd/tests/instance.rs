//
// Copyright (c) The Ripd Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::{Duration, Instant};

use ipnetwork::Ipv4Network;
use ripd::instance::{
    Instance, InstanceCfg, InstanceChannelsTx, InstanceSys,
    protocol_input_channels,
};
use ripd::network::SendDestination;
use ripd::packet::{Command, Pdu, Rte, RteIpv4};
use ripd::route::{Metric, Route, RouteFlags};
use ripd::southbound::{IfaceInfo, RouteOpMsg, SouthboundTx};
use ripd::tasks::messages::input::{
    RouteGcSweepMsg, RouteTimeoutScanMsg, TriggeredUpdTimeoutMsg, UdpRxPduMsg,
};
use ripd::tasks::messages::output::UdpTxPduMsg;
use ripd::tasks::messages::{ProtocolInputMsg, ProtocolOutputMsg};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;

//
// Test setup.
//
// The instance runs with two activated interfaces:
//
//   eth0 - 10.0.0.1/24
//   eth1 - 192.168.0.1/24
//
// Timer tasks are compiled out by the "testing" feature, so every timer
// event is injected explicitly and route timestamps are backdated by hand.
// Outbound PDUs are observed on the relayed protocol output channel, kernel
// route operations on the southbound channel.
//

const RIP_PORT: u16 = 520;

struct TestSetup {
    instance: Instance,
    southbound_rx: mpsc::UnboundedReceiver<RouteOpMsg>,
    output_rx: mpsc::Receiver<ProtocolOutputMsg>,
}

fn addr(s: &str) -> Ipv4Addr {
    s.parse().unwrap()
}

fn prefix(s: &str) -> Ipv4Network {
    s.parse().unwrap()
}

async fn setup(base_timer: u16) -> TestSetup {
    let (protocol_inputp, _protocol_inputc) = protocol_input_channels();
    let (route_opp, southbound_rx) = mpsc::unbounded_channel();
    let (protocol_outputp, output_rx) = mpsc::channel(64);

    let tx = InstanceChannelsTx {
        protocol_input: protocol_inputp,
        southbound: SouthboundTx::new(route_opp),
        protocol_output: protocol_outputp,
    };
    let config = InstanceCfg {
        rip_port: RIP_PORT,
        admin_port: 1520,
        update_interval: base_timer,
    };
    let system = InstanceSys {
        local_addrs: [addr("10.0.0.1"), addr("192.168.0.1")]
            .into_iter()
            .collect(),
    };

    let mut instance = Instance::new(config, system, tx);
    instance.add_interface(IfaceInfo {
        name: "eth0".to_owned(),
        ifindex: 2,
        addr: prefix("10.0.0.1/24"),
        up: true,
    });
    instance.add_interface(IfaceInfo {
        name: "eth1".to_owned(),
        ifindex: 3,
        addr: prefix("192.168.0.1/24"),
        up: true,
    });
    instance.start();

    let mut setup = TestSetup {
        instance,
        southbound_rx,
        output_rx,
    };

    // Interface startup multicasts one whole-table request per interface.
    let msgs = setup.recv_outputs(2).await;
    for ifname in ["eth0", "eth1"] {
        let msg = msgs
            .iter()
            .find(|msg| msg.ifname == ifname)
            .expect("missing startup request");
        assert_eq!(msg.dst, SendDestination::Multicast);
        assert!(msg.pdu.is_dump_request());
    }

    setup
}

impl TestSetup {
    // Injects a received datagram.
    fn recv_pdu(&mut self, src: SocketAddrV4, pdu: Pdu) {
        let msg = ProtocolInputMsg::UdpRxPdu(UdpRxPduMsg { src, pdu: Ok(pdu) });
        self.instance.process_protocol_msg(msg);
    }

    // Injects a RESPONSE from the RIP port carrying the given routes.
    fn recv_response(
        &mut self,
        src: &str,
        entries: &[(&str, u8, Option<&str>)],
    ) {
        let rtes = entries
            .iter()
            .map(|(dest, metric, nexthop)| {
                Rte::Ipv4(RteIpv4::new(
                    0,
                    prefix(dest),
                    nexthop.map(addr),
                    Metric::from(*metric),
                ))
            })
            .collect();
        let pdu = Pdu::new(Command::Response, rtes);
        self.recv_pdu(SocketAddrV4::new(addr(src), RIP_PORT), pdu);
    }

    async fn recv_output(&mut self) -> UdpTxPduMsg {
        match tokio::time::timeout(
            Duration::from_secs(1),
            self.output_rx.recv(),
        )
        .await
        {
            Ok(Some(ProtocolOutputMsg::UdpTxPdu(msg))) => msg,
            _ => panic!("expected an output PDU"),
        }
    }

    // Receives the given number of output PDUs. Messages from different
    // interfaces may interleave arbitrarily; per-interface order is
    // preserved.
    async fn recv_outputs(&mut self, count: usize) -> Vec<UdpTxPduMsg> {
        let mut msgs = vec![];
        for _ in 0..count {
            msgs.push(self.recv_output().await);
        }
        msgs
    }

    // Prevents triggered updates from firing mid-test.
    fn suppress_triggered_updates(&mut self) {
        self.instance.state.triggered_upd_suppressed = true;
    }

    async fn assert_no_output(&mut self) {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(matches!(
            self.output_rx.try_recv(),
            Err(TryRecvError::Empty)
        ));
    }

    fn recv_route_op(&mut self) -> RouteOpMsg {
        self.southbound_rx
            .try_recv()
            .expect("expected a kernel route operation")
    }

    fn assert_no_route_op(&mut self) {
        assert!(matches!(
            self.southbound_rx.try_recv(),
            Err(TryRecvError::Empty)
        ));
    }

    // Backdates a route timestamp by the given number of seconds.
    fn age_route(&mut self, dest: &str, seconds: u64) {
        let route = self
            .instance
            .state
            .routes
            .get_mut(&prefix(dest))
            .expect("route not found");
        route.timeout =
            Some(Instant::now() - Duration::from_secs(seconds));
    }

    fn route(&self, dest: &str) -> &Route {
        self.instance
            .state
            .routes
            .get(&prefix(dest))
            .expect("route not found")
    }
}

//
// Tests.
//

// A learned route ages into garbage collection and is eventually deleted
// and uninstalled.
#[tokio::test]
async fn test_learn_age_and_collect() {
    let mut t = setup(1).await;

    // Learn 192.168.1.0/24 via 10.0.0.2.
    t.recv_response("10.0.0.2", &[("192.168.1.0/24", 1, None)]);

    let route = t.route("192.168.1.0/24");
    assert_eq!(route.metric, Metric::from(2));
    assert_eq!(route.nexthop, Some(addr("10.0.0.2")));
    assert!(route.flags.contains(RouteFlags::CHANGED));
    assert!(!route.is_garbage());
    assert_eq!(
        t.recv_route_op(),
        RouteOpMsg::Install {
            prefix: prefix("192.168.1.0/24"),
            nexthop: addr("10.0.0.2"),
            metric: 2,
        }
    );

    // Let the route timeout expire (6 x base timer).
    t.age_route("192.168.1.0/24", 7);
    t.instance
        .process_protocol_msg(ProtocolInputMsg::RouteTimeoutScan(
            RouteTimeoutScanMsg {},
        ));

    let route = t.route("192.168.1.0/24");
    assert!(route.is_garbage());
    assert!(route.metric.is_infinite());
    assert_eq!(
        t.recv_route_op(),
        RouteOpMsg::Modify {
            prefix: prefix("192.168.1.0/24"),
            nexthop: addr("10.0.0.2"),
            metric: 16,
        }
    );

    // Let the garbage-collection window expire (4 x base timer).
    t.age_route("192.168.1.0/24", 5);
    t.instance
        .process_protocol_msg(ProtocolInputMsg::RouteGcSweep(
            RouteGcSweepMsg {},
        ));

    assert!(!t.instance.state.routes.contains_key(&prefix("192.168.1.0/24")));
    assert_eq!(
        t.recv_route_op(),
        RouteOpMsg::Uninstall {
            prefix: prefix("192.168.1.0/24"),
        }
    );
}

// Applying the same response twice leaves the routing table unchanged and
// produces no extra kernel operations.
#[tokio::test]
async fn test_response_idempotence() {
    let mut t = setup(30).await;

    t.recv_response("10.0.0.2", &[("192.168.1.0/24", 1, None)]);
    assert!(matches!(t.recv_route_op(), RouteOpMsg::Install { .. }));

    t.recv_response("10.0.0.2", &[("192.168.1.0/24", 1, None)]);
    t.assert_no_route_op();

    let route = t.route("192.168.1.0/24");
    assert_eq!(route.metric, Metric::from(2));
    assert_eq!(route.nexthop, Some(addr("10.0.0.2")));
}

// An unknown route advertised at metric 15 increments to infinity and is
// never admitted.
#[tokio::test]
async fn test_unreachable_route_not_admitted() {
    let mut t = setup(30).await;

    t.recv_response("10.0.0.2", &[("192.168.1.0/24", 15, None)]);

    assert!(!t.instance.state.routes.contains_key(&prefix("192.168.1.0/24")));
    t.assert_no_route_op();
}

// A metric-15 advertisement from the current nexthop poisons the route.
#[tokio::test]
async fn test_unreachable_route_starts_gc() {
    let mut t = setup(30).await;

    t.recv_response("10.0.0.2", &[("192.168.1.0/24", 1, None)]);
    assert!(matches!(t.recv_route_op(), RouteOpMsg::Install { .. }));

    t.recv_response("10.0.0.2", &[("192.168.1.0/24", 15, None)]);

    let route = t.route("192.168.1.0/24");
    assert!(route.is_garbage());
    assert!(route.metric.is_infinite());
    assert_eq!(
        t.recv_route_op(),
        RouteOpMsg::Modify {
            prefix: prefix("192.168.1.0/24"),
            nexthop: addr("10.0.0.2"),
            metric: 16,
        }
    );

    // A second poisoned advertisement is a no-op.
    t.recv_response("10.0.0.2", &[("192.168.1.0/24", 15, None)]);
    t.assert_no_route_op();
}

// A route under garbage collection is rescued by a reachable advertisement.
#[tokio::test]
async fn test_gc_route_rescued() {
    let mut t = setup(30).await;

    t.recv_response("10.0.0.2", &[("192.168.1.0/24", 1, None)]);
    assert!(matches!(t.recv_route_op(), RouteOpMsg::Install { .. }));
    t.recv_response("10.0.0.2", &[("192.168.1.0/24", 15, None)]);
    assert!(matches!(t.recv_route_op(), RouteOpMsg::Modify { .. }));

    // A different neighbor still reaches the network.
    t.recv_response("10.0.0.3", &[("192.168.1.0/24", 3, None)]);

    let route = t.route("192.168.1.0/24");
    assert!(!route.is_garbage());
    assert_eq!(route.metric, Metric::from(4));
    assert_eq!(route.nexthop, Some(addr("10.0.0.3")));
    assert!(route.timeout.is_some());
    assert_eq!(
        t.recv_route_op(),
        RouteOpMsg::Modify {
            prefix: prefix("192.168.1.0/24"),
            nexthop: addr("10.0.0.3"),
            metric: 4,
        }
    );
}

// A worse advertisement from a different nexthop is ignored.
#[tokio::test]
async fn test_worse_route_ignored() {
    let mut t = setup(30).await;

    t.recv_response("10.0.0.2", &[("192.168.1.0/24", 1, None)]);
    assert!(matches!(t.recv_route_op(), RouteOpMsg::Install { .. }));

    t.recv_response("10.0.0.3", &[("192.168.1.0/24", 5, None)]);

    let route = t.route("192.168.1.0/24");
    assert_eq!(route.metric, Metric::from(2));
    assert_eq!(route.nexthop, Some(addr("10.0.0.2")));
    t.assert_no_route_op();
}

// RESPONSEs not originating from the RIP port are dropped.
#[tokio::test]
async fn test_response_wrong_source_port() {
    let mut t = setup(30).await;

    let pdu = Pdu::new(
        Command::Response,
        vec![Rte::Ipv4(RteIpv4::new(
            0,
            prefix("192.168.1.0/24"),
            None,
            Metric::from(1),
        ))],
    );
    t.recv_pdu(SocketAddrV4::new(addr("10.0.0.2"), 33000), pdu);

    assert!(t.instance.state.routes.is_empty());
}

// Datagrams from non link-local sources, and from the host's own
// addresses, are dropped.
#[tokio::test]
async fn test_ingress_filter() {
    let mut t = setup(30).await;

    let pdu = Pdu::new(
        Command::Response,
        vec![Rte::Ipv4(RteIpv4::new(
            0,
            prefix("192.168.1.0/24"),
            None,
            Metric::from(1),
        ))],
    );
    t.recv_pdu(SocketAddrV4::new(addr("172.31.0.9"), RIP_PORT), pdu);
    assert!(t.instance.state.routes.is_empty());

    t.recv_response("10.0.0.1", &[("192.168.1.0/24", 1, None)]);
    assert!(t.instance.state.routes.is_empty());
}

// A whole-table request is answered on the receiving interface only, with
// split horizon applied.
#[tokio::test]
async fn test_whole_table_request() {
    let mut t = setup(30).await;
    t.suppress_triggered_updates();

    // One route learned through eth0, one local route.
    t.recv_response("10.0.0.2", &[("192.168.1.0/24", 1, None)]);
    assert!(matches!(t.recv_route_op(), RouteOpMsg::Install { .. }));
    t.instance.add_local_route(prefix("172.16.0.0/16"));

    let src = SocketAddrV4::new(addr("10.0.0.2"), 33000);
    t.recv_pdu(src, Pdu::new_dump_request());

    let msg = t.recv_output().await;
    assert_eq!(msg.ifname, "eth0");
    assert_eq!(msg.dst, SendDestination::Unicast(src));
    assert_eq!(msg.pdu.command, Command::Response);
    // 192.168.1.0/24 was learned from eth0's subnet and is suppressed.
    assert_eq!(
        msg.pdu.rtes,
        vec![Rte::Ipv4(RteIpv4::new(
            0,
            prefix("172.16.0.0/16"),
            None,
            Metric::from(1),
        ))]
    );
    t.assert_no_output().await;
}

// An empty request is dropped.
#[tokio::test]
async fn test_empty_request() {
    let mut t = setup(30).await;

    let src = SocketAddrV4::new(addr("10.0.0.2"), 33000);
    t.recv_pdu(src, Pdu::new(Command::Request, vec![]));

    t.assert_no_output().await;
}

// A specific request is echoed back with the metrics filled in, without
// split horizon.
#[tokio::test]
async fn test_specific_request() {
    let mut t = setup(30).await;
    t.suppress_triggered_updates();

    t.recv_response("10.0.0.2", &[("10.1.0.0/16", 1, None)]);
    assert!(matches!(t.recv_route_op(), RouteOpMsg::Install { .. }));

    let src = SocketAddrV4::new(addr("10.0.0.2"), 33101);
    let pdu = Pdu::new(
        Command::Request,
        vec![
            Rte::Ipv4(RteIpv4::new(
                0,
                prefix("10.1.0.0/16"),
                None,
                Metric::from(0),
            )),
            Rte::Ipv4(RteIpv4::new(
                0,
                prefix("10.2.0.0/16"),
                None,
                Metric::from(0),
            )),
        ],
    );
    t.recv_pdu(src, pdu);

    let msg = t.recv_output().await;
    assert_eq!(msg.ifname, "eth0");
    assert_eq!(msg.dst, SendDestination::Unicast(src));
    assert_eq!(msg.pdu.command, Command::Response);
    assert_eq!(
        msg.pdu.rtes,
        vec![
            // No split horizon: the local metric is reported even though the
            // route was learned from the requester's subnet.
            Rte::Ipv4(RteIpv4::new(
                0,
                prefix("10.1.0.0/16"),
                None,
                Metric::from(2),
            )),
            Rte::Ipv4(RteIpv4::new(
                0,
                prefix("10.2.0.0/16"),
                None,
                Metric::from(16),
            )),
        ]
    );
}

// Two route changes in close succession produce exactly one triggered
// update carrying both, and the change flags are cleared afterwards.
#[tokio::test]
async fn test_triggered_update_suppression() {
    let mut t = setup(30).await;

    // Make the last update old enough for the first change to be emitted
    // immediately.
    t.instance.state.last_update = Instant::now() - Duration::from_secs(10);
    t.recv_response("10.0.0.2", &[("192.168.1.0/24", 1, None)]);
    assert!(matches!(t.recv_route_op(), RouteOpMsg::Install { .. }));

    // Split horizon keeps the route out of eth0's update; only eth1 emits.
    let msg = t.recv_output().await;
    assert_eq!(msg.ifname, "eth1");
    assert_eq!(msg.pdu.rtes.len(), 1);
    t.assert_no_output().await;
    assert!(!t.instance.state.triggered_upd_suppressed);

    // Two more changes arrive back to back: both are covered by a single
    // pending triggered update.
    t.recv_response("10.0.0.2", &[("192.168.2.0/24", 1, None)]);
    assert!(matches!(t.recv_route_op(), RouteOpMsg::Install { .. }));
    assert!(t.instance.state.triggered_upd_suppressed);
    t.recv_response("10.0.0.3", &[("192.168.3.0/24", 1, None)]);
    assert!(matches!(t.recv_route_op(), RouteOpMsg::Install { .. }));
    t.assert_no_output().await;

    // Holddown expiry emits the pending update.
    t.instance
        .process_protocol_msg(ProtocolInputMsg::TriggeredUpdTimeout(
            TriggeredUpdTimeoutMsg {},
        ));

    let msg = t.recv_output().await;
    assert_eq!(msg.ifname, "eth1");
    let prefixes: Vec<_> = msg
        .pdu
        .rtes
        .iter()
        .map(|rte| rte.as_ipv4().unwrap().prefix)
        .collect();
    assert_eq!(
        prefixes,
        vec![prefix("192.168.2.0/24"), prefix("192.168.3.0/24")]
    );
    t.assert_no_output().await;

    assert!(!t.instance.state.triggered_upd_suppressed);
    assert!(!t.instance.state.route_change);
    for route in t.instance.state.routes.values() {
        assert!(!route.flags.contains(RouteFlags::CHANGED));
    }
}

// Periodic updates apply split horizon and are chunked at 25 entries per
// datagram.
#[tokio::test]
async fn test_split_horizon_chunking() {
    let mut t = setup(30).await;
    t.suppress_triggered_updates();

    // 60 routes learned through eth0, 30 through eth1, fed in 25-entry
    // batches.
    let nets: Vec<String> =
        (0..60).map(|i| format!("10.10.{}.0/24", i)).collect();
    for chunk in nets.chunks(25) {
        let entries: Vec<_> =
            chunk.iter().map(|net| (net.as_str(), 1, None)).collect();
        t.recv_response("10.0.0.2", &entries);
    }
    let nets: Vec<String> =
        (0..30).map(|i| format!("10.20.{}.0/24", i)).collect();
    for chunk in nets.chunks(25) {
        let entries: Vec<_> =
            chunk.iter().map(|net| (net.as_str(), 1, None)).collect();
        t.recv_response("192.168.0.9", &entries);
    }
    while t.southbound_rx.try_recv().is_ok() {}

    t.instance
        .process_protocol_msg(ProtocolInputMsg::UpdateInterval(
            ripd::tasks::messages::input::UpdateIntervalMsg {},
        ));

    let msgs = t.recv_outputs(5).await;
    for msg in &msgs {
        assert_eq!(msg.dst, SendDestination::Multicast);
    }

    // eth0: the 60 routes learned through it are suppressed, leaving 30
    // entries split across two datagrams.
    let eth0_sizes: Vec<_> = msgs
        .iter()
        .filter(|msg| msg.ifname == "eth0")
        .map(|msg| msg.pdu.rtes.len())
        .collect();
    assert_eq!(eth0_sizes, vec![25, 5]);

    // eth1: the 60 eth0-learned routes are advertised.
    let eth1_sizes: Vec<_> = msgs
        .iter()
        .filter(|msg| msg.ifname == "eth1")
        .map(|msg| msg.pdu.rtes.len())
        .collect();
    assert_eq!(eth1_sizes, vec![25, 25, 10]);
    t.assert_no_output().await;
}

// The advertised nexthop is rewritten per interface: kept when it lives on
// the egress subnet and differs from the interface address, zeroed
// otherwise.
#[tokio::test]
async fn test_nexthop_rewrite() {
    let mut t = setup(30).await;

    // A self-originated route whose nexthop is another router on eth0's
    // subnet. Self-originated routes are exempt from split horizon.
    let net = prefix("172.20.0.0/16");
    t.instance
        .state
        .routes
        .insert(net, Route::new(net, Some(addr("10.0.0.3")), Metric::from(1), 0, true));

    t.instance
        .process_protocol_msg(ProtocolInputMsg::UpdateInterval(
            ripd::tasks::messages::input::UpdateIntervalMsg {},
        ));

    let msgs = t.recv_outputs(2).await;

    let msg = msgs.iter().find(|msg| msg.ifname == "eth0").unwrap();
    assert_eq!(
        msg.pdu.rtes,
        vec![Rte::Ipv4(RteIpv4::new(
            0,
            net,
            Some(addr("10.0.0.3")),
            Metric::from(1),
        ))]
    );

    let msg = msgs.iter().find(|msg| msg.ifname == "eth1").unwrap();
    assert_eq!(
        msg.pdu.rtes,
        vec![Rte::Ipv4(RteIpv4::new(0, net, None, Metric::from(1)))]
    );
}

// Decode failures are dropped without touching the routing table.
#[tokio::test]
async fn test_malformed_pdu_dropped() {
    let mut t = setup(30).await;

    let src = SocketAddrV4::new(addr("10.0.0.2"), RIP_PORT);
    let msg = ProtocolInputMsg::UdpRxPdu(UdpRxPduMsg {
        src,
        pdu: Err(ripd::packet::DecodeError::InvalidLength(3)),
    });
    t.instance.process_protocol_msg(msg);

    assert!(t.instance.state.routes.is_empty());
    t.assert_no_output().await;
}

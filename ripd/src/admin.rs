//
// Copyright (c) The Ripd Contributors
//
// SPDX-License-Identifier: MIT
//

use std::fmt::Write;
use std::net::{Ipv4Addr, SocketAddr};

use ripd_utils::Sender;
use ripd_utils::task::Task;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;

use crate::error::IoError;
use crate::instance::MessageStatistics;
use crate::route::{RouteFlags, RouteTable};
use crate::tasks::messages::input::AdminRequestMsg;

const GREETING: &str =
    "ripd administrative interface. Commands: routes, stats, quit\n";

// Inspection commands the operator can issue.
#[derive(Clone, Copy, Debug)]
pub enum AdminCommand {
    Routes,
    Stats,
}

// ===== global functions =====

// Administrative interface task. Accepts TCP connections on the loopback
// address and serves line-oriented inspection commands. State queries are
// relayed to the instance task; nothing is read from protocol state
// directly.
pub fn listener(
    admin_port: u16,
    admin_requestp: &Sender<AdminRequestMsg>,
) -> Task<()> {
    let admin_requestp = admin_requestp.clone();
    Task::spawn(async move {
        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, admin_port));
        let listener = match TcpListener::bind(addr).await {
            Ok(listener) => listener,
            Err(error) => {
                IoError::TcpSocketError(error).log();
                return;
            }
        };

        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let admin_requestp = admin_requestp.clone();
                    let mut session = Task::spawn(async move {
                        let _ = serve_session(stream, admin_requestp).await;
                    });
                    session.detach();
                }
                Err(error) => {
                    IoError::TcpAcceptError(error).log();
                }
            }
        }
    })
}

async fn serve_session(
    stream: TcpStream,
    admin_requestp: Sender<AdminRequestMsg>,
) -> std::io::Result<()> {
    let (rd, mut wr) = stream.into_split();
    let mut lines = BufReader::new(rd).lines();

    wr.write_all(GREETING.as_bytes()).await?;
    while let Some(line) = lines.next_line().await? {
        let command = match line.trim() {
            "" => continue,
            "routes" => AdminCommand::Routes,
            "stats" => AdminCommand::Stats,
            "help" => {
                wr.write_all(GREETING.as_bytes()).await?;
                continue;
            }
            "quit" | "exit" => break,
            unknown => {
                let reply = format!("unknown command: {}\n", unknown);
                wr.write_all(reply.as_bytes()).await?;
                continue;
            }
        };

        // Relay the query to the instance task and wait for the reply.
        let (replyp, replyc) = oneshot::channel();
        let msg = AdminRequestMsg {
            command,
            reply: replyp,
        };
        if admin_requestp.send(msg).await.is_err() {
            break;
        }
        let Ok(output) = replyc.await else {
            break;
        };
        wr.write_all(output.as_bytes()).await?;
    }

    Ok(())
}

pub(crate) fn format_routes(routes: &RouteTable) -> String {
    let mut output = format!(
        "{:<19} {:<16} {:>6}  {:>5}  {:<5}  age\n",
        "prefix", "nexthop", "metric", "tag", "flags"
    );

    for route in routes.values() {
        let nexthop = match route.nexthop {
            Some(nexthop) => nexthop.to_string(),
            None => "self".to_owned(),
        };
        let mut flags = String::new();
        if route.flags.contains(RouteFlags::CHANGED) {
            flags.push('C');
        }
        if route.is_garbage() {
            flags.push('G');
        }
        if route.imported {
            flags.push('I');
        }
        let age = match route.timeout {
            Some(timestamp) => format!("{}s", timestamp.elapsed().as_secs()),
            None => "-".to_owned(),
        };

        let _ = writeln!(
            output,
            "{:<19} {:<16} {:>6}  {:>5}  {:<5}  {}",
            route.prefix.to_string(),
            nexthop,
            route.metric.get(),
            route.tag,
            flags,
            age
        );
    }

    output
}

pub(crate) fn format_stats(statistics: &MessageStatistics) -> String {
    format!(
        "requests received:  {}\n\
         requests sent:      {}\n\
         responses received: {}\n\
         responses sent:     {}\n",
        statistics.requests_rcvd,
        statistics.requests_sent,
        statistics.responses_rcvd,
        statistics.responses_sent,
    )
}

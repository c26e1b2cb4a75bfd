//
// Copyright (c) The Ripd Contributors
//
// SPDX-License-Identifier: MIT
//

mod config;
mod netlink;

use std::net::Ipv4Addr;
use std::str::FromStr;

use clap::{App, Arg, ArgMatches};
use config::{Config, ConfigError, LoggingFileRotation, LoggingFmtStyle};
use ipnetwork::Ipv4Network;
use nix::unistd::Uid;
use ripd::admin;
use ripd::instance::{
    Instance, InstanceCfg, InstanceChannelsTx, InstanceSys,
    protocol_input_channels,
};
use ripd::southbound::SouthboundTx;
use ripd_utils::task::Task;
use tokio::sync::mpsc;
use tracing::level_filters::LevelFilter;
use tracing::{error, info};
use tracing_appender::rolling;
use tracing_subscriber::Layer;
use tracing_subscriber::prelude::*;

struct DaemonArgs {
    instance_cfg: InstanceCfg,
    interfaces: Vec<Ipv4Addr>,
    routes: Vec<Ipv4Network>,
    import_routes: bool,
}

fn init_tracing(config: &config::Logging) {
    // Enable logging to a file.
    let file = config.file.enabled.then(|| {
        let file_appender = match config.file.rotation {
            LoggingFileRotation::Never => {
                rolling::never(&config.file.dir, &config.file.name)
            }
            LoggingFileRotation::Hourly => {
                rolling::hourly(&config.file.dir, &config.file.name)
            }
            LoggingFileRotation::Daily => {
                rolling::daily(&config.file.dir, &config.file.name)
            }
        };

        let log_level_filter = LevelFilter::from_level(tracing::Level::TRACE);
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(file_appender)
            .with_target(false)
            .with_thread_ids(config.file.show_thread_id)
            .with_file(config.file.show_source)
            .with_line_number(config.file.show_source)
            .with_ansi(false);
        let layer = match config.file.style {
            LoggingFmtStyle::Compact => layer.compact().boxed(),
            LoggingFmtStyle::Full => layer.boxed(),
            LoggingFmtStyle::Json => layer.json().boxed(),
            LoggingFmtStyle::Pretty => layer.pretty().boxed(),
        };
        layer.with_filter(log_level_filter)
    });

    // Enable logging to stdout.
    let stdout = config.stdout.enabled.then(|| {
        let log_level_filter = LevelFilter::from_level(tracing::Level::TRACE);
        let layer = tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_thread_ids(config.stdout.show_thread_id)
            .with_file(config.stdout.show_source)
            .with_line_number(config.stdout.show_source)
            .with_ansi(config.stdout.colors);
        let layer = match config.stdout.style {
            LoggingFmtStyle::Compact => layer.compact().boxed(),
            LoggingFmtStyle::Full => layer.boxed(),
            LoggingFmtStyle::Json => layer.json().boxed(),
            LoggingFmtStyle::Pretty => layer.pretty().boxed(),
        };
        layer.with_filter(log_level_filter)
    });

    // Configure the tracing fmt layer.
    let env_filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive("ripd=debug".parse().unwrap())
        .from_env_lossy();
    tracing_subscriber::registry()
        .with(env_filter)
        .with(file)
        .with(stdout)
        .init();
}

fn parse_value<T: FromStr>(
    matches: &ArgMatches<'_>,
    name: &'static str,
) -> Result<T, ConfigError> {
    let value = matches.value_of(name).unwrap_or_default();
    value
        .parse()
        .map_err(|_| ConfigError::InvalidArgument(name, value.to_owned()))
}

fn parse_args(matches: &ArgMatches<'_>) -> Result<DaemonArgs, ConfigError> {
    let rip_port = parse_value::<u16>(matches, "rip-port")?;
    let admin_port = parse_value::<u16>(matches, "admin-port")?;
    let update_interval = parse_value::<u16>(matches, "base-timer")?;

    let mut interfaces = vec![];
    for value in matches.values_of("interface").into_iter().flatten() {
        let addr = value.parse().map_err(|_| {
            ConfigError::InvalidArgument("interface", value.to_owned())
        })?;
        interfaces.push(addr);
    }
    if interfaces.is_empty() {
        return Err(ConfigError::NoInterfaces);
    }

    let mut routes = vec![];
    for value in matches.values_of("route").into_iter().flatten() {
        // Normalize to the network address.
        let prefix = value
            .parse::<Ipv4Network>()
            .and_then(|prefix| {
                Ipv4Network::new(prefix.network(), prefix.prefix())
            })
            .map_err(|_| {
                ConfigError::InvalidArgument("route", value.to_owned())
            })?;
        routes.push(prefix);
    }

    Ok(DaemonArgs {
        instance_cfg: InstanceCfg {
            rip_port,
            admin_port,
            update_interval,
        },
        interfaces,
        routes,
        import_routes: matches.is_present("import-routes"),
    })
}

async fn run(args: DaemonArgs) -> Result<(), ConfigError> {
    // RIP operation requires the Linux host adapter.
    if cfg!(not(target_os = "linux")) {
        return Err(ConfigError::NotSupported(std::env::consts::OS));
    }

    // Bring up the host adapter.
    let handle = netlink::connection()
        .map_err(|error| ConfigError::SystemError(error.to_string()))?;
    let system_ifaces = netlink::list_interfaces(&handle)
        .await
        .map_err(|error| ConfigError::SystemError(error.to_string()))?;

    // Create the instance channels.
    let (protocol_inputp, protocol_inputc) = protocol_input_channels();
    let (route_opp, route_opc) = mpsc::unbounded_channel();
    let admin_requestp = protocol_inputp.admin_request.clone();
    let tx = InstanceChannelsTx {
        protocol_input: protocol_inputp,
        southbound: SouthboundTx::new(route_opp),
    };

    // All host addresses, used to discard looped-back advertisements.
    let system = InstanceSys {
        local_addrs: system_ifaces
            .iter()
            .map(|iface| iface.addr.ip())
            .collect(),
    };

    let admin_port = args.instance_cfg.admin_port;
    let mut instance = Instance::new(args.instance_cfg, system, tx);

    // Activate the requested interfaces.
    for requested in &args.interfaces {
        let iface = system_ifaces
            .iter()
            .find(|iface| iface.addr.ip() == *requested && iface.up)
            .ok_or(ConfigError::UnusableInterface(*requested))?;
        instance.add_interface(iface.clone());
    }

    // Seed user-configured routes.
    for prefix in args.routes {
        instance.add_local_route(prefix);
    }

    // Import routes from the kernel routing table.
    if args.import_routes {
        for prefix in netlink::local_routes(&handle)
            .await
            .map_err(|error| ConfigError::SystemError(error.to_string()))?
        {
            instance.add_local_route(prefix);
        }
    }

    // Start the host adapter worker and the administrative interface.
    let southbound_task =
        Task::spawn(netlink::process_route_ops(handle, route_opc));
    let _admin_task = admin::listener(admin_port, &admin_requestp);

    // Run the protocol engine until shutdown.
    instance.run(protocol_inputc).await;

    // Let the host adapter finish reversing the kernel changes.
    let _ = southbound_task.await;

    Ok(())
}

fn main() {
    // Parse command-line parameters.
    let matches = App::new("ripd")
        .version(clap::crate_version!())
        .about("A RIPv2 routing daemon.")
        .arg(
            Arg::with_name("rip-port")
                .short("p")
                .long("rip-port")
                .value_name("port")
                .takes_value(true)
                .default_value("520")
                .help("RIP port number to use."),
        )
        .arg(
            Arg::with_name("admin-port")
                .short("P")
                .long("admin-port")
                .value_name("port")
                .takes_value(true)
                .default_value("1520")
                .help("Admin interface port number to use."),
        )
        .arg(
            Arg::with_name("interface")
                .short("i")
                .long("interface")
                .value_name("ip")
                .takes_value(true)
                .multiple(true)
                .number_of_values(1)
                .required(true)
                .help(
                    "An interface IP to use for RIP. \
                     Can be given multiple times.",
                ),
        )
        .arg(
            Arg::with_name("import-routes")
                .short("I")
                .long("import-routes")
                .help("Import local routes from the kernel upon startup."),
        )
        .arg(
            Arg::with_name("route")
                .short("r")
                .long("route")
                .value_name("cidr")
                .takes_value(true)
                .multiple(true)
                .number_of_values(1)
                .help(
                    "A route to advertise, in CIDR notation. \
                     Can be given multiple times.",
                ),
        )
        .arg(
            Arg::with_name("log-config")
                .short("l")
                .long("log-config")
                .value_name("file")
                .takes_value(true)
                .help("The logging configuration file."),
        )
        .arg(
            Arg::with_name("base-timer")
                .short("t")
                .long("base-timer")
                .value_name("seconds")
                .takes_value(true)
                .default_value("30")
                .help(
                    "Use non-default update/gc/timeout timers. The update \
                     timer is set to this value and the gc/timeout timers \
                     are derived from it.",
                ),
        )
        .get_matches();

    // Manipulating the kernel routing table requires elevated privileges.
    if !Uid::effective().is_root() {
        eprintln!("need privileged user");
        std::process::exit(1);
    }

    // Read the logging configuration file and initialize tracing.
    let config = match Config::load(matches.value_of("log-config")) {
        Ok(config) => config,
        Err(error) => {
            eprintln!("{}", error);
            std::process::exit(1);
        }
    };
    init_tracing(&config.logging);

    let args = match parse_args(&matches) {
        Ok(args) => args,
        Err(error) => {
            error!(%error, "invalid configuration");
            std::process::exit(1);
        }
    };

    // Set panic handler to abort the process if any child task panics.
    let default_panic = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        default_panic(info);
        std::process::exit(1);
    }));

    // We're ready to go!
    info!("starting up");

    // Single-threaded cooperative scheduling: the protocol instance owns all
    // mutable state and every callback runs to completion before the next
    // one is dispatched.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("failed to create async runtime");
    if let Err(error) = runtime.block_on(run(args)) {
        error!(%error, "fatal error");
        std::process::exit(1);
    }
}

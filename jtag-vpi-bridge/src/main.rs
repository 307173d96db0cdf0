//! # JTAG VPI Bridge
//!
//! Runs the poll-driven [`jtag_vpi_server`] stand-alone, with one of the built-in
//! signal models in place of a simulator.
//!
//! ## Overview
//!
//! The binary owns the scheduling loop a simulator would otherwise provide: on
//! every tick it polls the server, hands pending signal requests to the model and
//! reports what the model observed. OpenOCD (or any other JTAG VPI client) can
//! connect to it to exercise the transport without hardware.
mod backends;

use std::error::Error;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use clap::{Parser, ValueEnum};
use clap_num::maybe_hex;
use env_logger::Env;
use jtag_vpi_protocol::{Dialect, TapMode};
use jtag_vpi_server::{
    BitOrder, TapModel,
    server::{Builder, Server},
};
use tokio::time::MissedTickBehavior;

use crate::backends::{loopback::LoopbackModel, stuck::StuckModel};

const DEFAULT_IDCODE: u32 = 0x1000_0001;
const STATUS_INTERVAL: Duration = Duration::from_secs(10);

#[derive(ValueEnum, Debug, Clone, Copy, Eq, PartialEq)]
enum Proto {
    Auto,
    Minimal,
    Full,
    Legacy,
}

impl Proto {
    fn dialect(self) -> Option<Dialect> {
        match self {
            Proto::Auto => None,
            Proto::Minimal => Some(Dialect::OpenOcdMinimal),
            Proto::Full => Some(Dialect::OpenOcdFull),
            Proto::Legacy => Some(Dialect::Legacy),
        }
    }
}

#[derive(Parser, Debug, Eq, PartialEq, Clone)]
enum Model {
    /// TDO follows TDI
    Loopback {
        #[arg(long, value_parser = maybe_hex::<u32>, default_value_t = DEFAULT_IDCODE)]
        idcode: u32,
    },
    /// TDO stuck at a constant level
    Stuck {
        #[arg(long, help = "Drive TDO high instead of low")]
        high: bool,
        #[arg(long, value_parser = maybe_hex::<u32>, default_value_t = DEFAULT_IDCODE)]
        idcode: u32,
    },
}

impl Model {
    fn build(self) -> Box<dyn TapModel> {
        match self {
            Model::Loopback { idcode } => Box::new(LoopbackModel::new(idcode)),
            Model::Stuck { high, idcode } => Box::new(StuckModel::new(high, idcode)),
        }
    }
}

#[derive(Parser)]
#[command(about = "JTAG VPI bridge for simulated JTAG and cJTAG targets", long_about=None)]
struct Args {
    #[arg(short, long, default_value = "3333")]
    port: u16,

    #[arg(short, long, default_value = "127.0.0.1")]
    ip: IpAddr,

    #[arg(long, help = "Pack scan bits MSB first")]
    msb_first: bool,

    #[arg(long, value_enum, default_value_t = Proto::Auto)]
    proto: Proto,

    #[arg(long, help = "Start in two-wire cJTAG mode")]
    cjtag: bool,

    #[arg(long, help = "Stop after this many seconds, 0 runs forever", default_value = "300")]
    timeout: u64,

    #[arg(long, help = "Scheduling quantum in microseconds", default_value = "1000")]
    tick_us: u64,

    #[arg(long, help = "Driver steps run per quantum", default_value = "256")]
    steps_per_tick: u32,

    #[arg(long, help = "0: info, 1: debug, 2: trace", default_value = "0")]
    debug: u8,

    #[clap(subcommand)]
    model: Option<Model>,
}

fn log_level(debug: u8) -> &'static str {
    match debug {
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}

fn log_status(server: &Server) {
    let observed = server.observed();
    match server.dialect() {
        Some(dialect) => log::info!(
            "Client connected ({}), mode select {}, active mode {}, IDCODE {:#010x}",
            dialect,
            server.mode_select(),
            observed.active_mode,
            observed.idcode
        ),
        None if server.is_client_connected() => {
            log::info!("Client connected, dialect not yet detected")
        }
        None => log::info!(
            "Waiting for a client, active mode {}, IDCODE {:#010x}",
            observed.active_mode,
            observed.idcode
        ),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level(args.debug))).init();
    log::info!("Starting JTAG VPI bridge");

    let mut builder = Builder::new();
    if args.msb_first {
        builder = builder.bit_order(BitOrder::MsbFirst);
    }
    if let Some(dialect) = args.proto.dialect() {
        log::info!("Forcing dialect {}", dialect);
        builder = builder.dialect(dialect);
    }
    if args.cjtag {
        builder = builder.initial_mode(TapMode::Cjtag);
    }

    let addr = SocketAddr::new(args.ip, args.port);
    log::info!("Binding to address: {}", addr);
    let mut server = builder.bind(addr)?;

    let model = args.model.unwrap_or(Model::Loopback {
        idcode: DEFAULT_IDCODE,
    });
    log::debug!("Signal model: {:?}", model);
    let mut model = model.build();

    let mut tick = tokio::time::interval(Duration::from_micros(args.tick_us.max(1)));
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut status = tokio::time::interval(STATUS_INTERVAL);
    status.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let timeout_secs = args.timeout;
    let timeout = async move {
        match timeout_secs {
            0 => std::future::pending::<()>().await,
            secs => tokio::time::sleep(Duration::from_secs(secs)).await,
        }
    };
    tokio::pin!(timeout);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = tick.tick() => {
                for _ in 0..args.steps_per_tick {
                    server.step(&mut *model);
                }
            }
            _ = status.tick() => log_status(&server),
            _ = &mut timeout => {
                log::info!("Timeout of {} s reached, shutting down", timeout_secs);
                break;
            }
            result = &mut ctrl_c => {
                result?;
                log::info!("Received Ctrl-C, shutting down");
                break;
            }
        }
    }
    Ok(())
}

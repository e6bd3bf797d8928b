#[macro_use]
extern crate log;
extern crate log4rs;

extern crate log_panics;

extern crate tokio;

extern crate rust_ofp_ctl;

use std::net::SocketAddr;
use std::sync::Arc;

use log::LevelFilter;
use log4rs::append::console::ConsoleAppender;
use log4rs::config::{Appender, Config, Root};

use rust_ofp_ctl::config::DEFAULT_OPENFLOW_PORT;
use rust_ofp_ctl::{AlwaysMaster, Controller, ControllerConfig};

const LOG_CONFIG: &str = "log4rs.yml";

fn init_logging() {
    log_panics::init();
    if let Err(e) = log4rs::init_file(LOG_CONFIG, Default::default()) {
        let stdout = ConsoleAppender::builder().build();
        let config = Config::builder()
            .appender(Appender::builder().build("stdout", Box::new(stdout)))
            .build(Root::builder().appender("stdout").build(LevelFilter::Info));
        match config {
            Ok(config) => {
                if let Err(e) = log4rs::init_config(config) {
                    eprintln!("Failed to initialise logging: {}", e);
                }
            }
            Err(e) => eprintln!("Bad fallback logging config: {}", e),
        }
        warn!("Could not load {}: {}, logging to the console", LOG_CONFIG, e);
    }
}

/// Listen addresses from the command line, `0.0.0.0:6653` when none are given.
fn listen_addresses() -> Result<Vec<SocketAddr>, std::net::AddrParseError> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.is_empty() {
        return Ok(vec![SocketAddr::from(([0, 0, 0, 0], DEFAULT_OPENFLOW_PORT))]);
    }
    args.iter().map(|a| a.parse()).collect()
}

#[tokio::main]
async fn main() {
    init_logging();
    info!("rust_ofp_ctl starting");

    let addresses = match listen_addresses() {
        Ok(addresses) => addresses,
        Err(e) => {
            error!("Bad listen address: {}", e);
            std::process::exit(2);
        }
    };
    let config = ControllerConfig::default().with_listen_addresses(addresses);
    let controller = Controller::new(config, Arc::new(AlwaysMaster));

    match controller.listen().await {
        Ok(bound) => {
            for addr in bound {
                println!("OF controller running on {}", addr);
            }
        }
        Err(e) => {
            error!("Could not start listening: {}", e);
            std::process::exit(1);
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to wait for Ctrl-C: {}", e);
    }
    controller.shutdown();
}

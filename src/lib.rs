#![crate_name = "rust_ofp_ctl"]
#![crate_type = "lib"]
extern crate byteorder;
extern crate bytes;
extern crate futures;
extern crate parking_lot;
extern crate tokio;
extern crate tokio_util;

#[macro_use]
extern crate log;

extern crate failure;

#[macro_use]
extern crate failure_derive;

#[macro_use]
mod ofp_utils;

pub mod message;
pub mod ofp_header;
pub mod ofp_message;
pub mod ofp_serialization;
pub mod openflow;
pub mod openflow0x01;
pub mod openflow0x04;

pub mod config;
pub mod connection_manager;
pub mod datapath;
pub mod dispatch;
pub mod error;
pub mod handshake;
pub mod ofp_controller;
pub mod ofp_device;
pub mod pending;
pub mod port_state;
pub mod post_handshake;
pub mod role;
mod session;
pub mod stats;
pub mod testing;

pub use crate::config::ControllerConfig;
pub use crate::connection_manager::OutboundMessage;
pub use crate::datapath::{DatapathId, DatapathInfo};
pub use crate::dispatch::{
    DatapathEvent, DatapathEventKind, DatapathListener, Interest, ListenerId, MessageEvent, MessageListener,
    PacketSequencer,
};
pub use crate::error::ControllerError;
pub use crate::ofp_controller::{Controller, ControllerService};
pub use crate::pending::{FutureState, MessageFuture, Outcome};
pub use crate::role::{AlwaysMaster, RoleAdvisor};

//! Node lifecycle controller and inbound message dispatcher for the Boson
//! DHT (spec.md §4.9/§4.10 / C9, C10) — the top-level crate that wires
//! `boson-store`, `boson-routing`, `boson-rpc`, and `boson-lookup` into one
//! running node.

mod config;
mod constants;
mod controller;
mod dispatcher;
mod status;

pub use config::NodeControllerConfig;
pub use controller::NodeController;
pub use dispatcher::Dispatcher;
pub use status::{NodeStatus, StatusBroadcast};

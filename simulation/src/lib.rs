//! # COPE Simulation
//!
//! A discrete-time wireless simulation that runs real COPE engines over a
//! shared broadcast medium.
//!
//! ## Overview
//!
//! - **Named nodes** (A-Z): one radio each, addresses derived from the letter
//! - **Radio range**: a frame is heard by every node in range on its channel
//! - **Static routing**: relays forward along precomputed shortest paths
//! - **Measurement**: coded transmissions, coding gain, delivery and latency
//!
//! ## Architecture
//!
//! - **Types** (`types.rs`): node ids, flows and the simulated IPv4 packet
//! - **Topology** (`topology.rs`): range graphs and next-hop tables
//! - **Simulation** (`simulation.rs`): the slot loop and per-node hosts
//! - **Scenarios** (`scenarios.rs`): Alice-Bob, cross and chain layouts
//!
//! ## Example
//!
//! ```rust,ignore
//! use cope_simulation::*;
//!
//! let report = Scenario::AliceBob.run(3, SimConfig::default());
//! println!("{}", report.stats);
//! ```

pub mod scenarios;
pub mod simulation;
pub mod topology;
pub mod types;

pub use scenarios::Scenario;
pub use simulation::{NodeReport, SimConfig, SimHost, SimReport, SimStats, Simulation};
pub use topology::{Topology, TopologyBuilder};
pub use types::{Flow, NodeId, NodeSpec, SimPacket};

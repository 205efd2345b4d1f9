//! # COPE Engine
//!
//! Opportunistic XOR network coding for broadcast wireless links.
//!
//! Each node keeps a FIFO output queue plus, per neighbor, a virtual queue of
//! the entries bound for that neighbor. When the link frees up, the head of
//! the output queue is XOR-combined with the heads of other neighbors' virtual
//! queues whenever every intended receiver already holds all the other packets
//! in the mix. Receivers cancel what they know and recover their own packet.
//! Reception reports and acks ride piggyback on outgoing frames; unacked
//! unicast packets are retried up to a bounded number of times.
//!
//! ## Key Types
//!
//! - [`CopeEngine`]: the per-node state machine
//! - [`PacketQueue`], [`NeighborTable`], [`PacketPool`], [`ReceptionTracker`]:
//!   the state it is built from
//! - [`CopeConfig`]: tunables with presets
//!
//! ## Example
//!
//! ```rust,ignore
//! use cope_core::{InterfaceId, LinkAddr, MockHost};
//! use cope_engine::{CopeConfig, CopeEngine, LocalInterface};
//!
//! let iface = LocalInterface { id: InterfaceId(0), link: LinkAddr::from_index(1), channel: 1 };
//! let mut host = MockHost::new().with_interface(iface.id, "10.0.0.1".parse()?);
//! let mut engine = CopeEngine::new(CopeConfig::default(), vec![iface]);
//! engine.start(&mut host)?;
//! ```
//!
//! [`runtime::spawn_node`] drives an engine from a tokio task.

mod arq;
mod cache;
pub mod coding;
pub mod config;
mod discovery;
pub mod engine;
pub mod error;
pub mod neighbor;
pub mod pool;
pub mod queue;
pub mod runtime;
pub mod scheduler;
pub mod tracker;

pub use coding::{Decoded, LocalInterface, decode, xor_combine};
pub use config::{ConfigWarning, CopeConfig};
pub use engine::{CopeEngine, DeliveredPacket, EngineStats, ReceiveOutcome, restore_ipv4_ttl};
pub use error::{DecodeError, EngineError, NeighborError, QueueError};
pub use neighbor::{Neighbor, NeighborIndex, NeighborTable};
pub use pool::PacketPool;
pub use queue::{EntryClass, EntryHandle, OutboundPacket, PacketQueue, QueueEntry};
pub use runtime::{NodeCommand, NodeHandle, RuntimeHost, spawn_node};
pub use scheduler::SendState;
pub use tracker::ReceptionTracker;

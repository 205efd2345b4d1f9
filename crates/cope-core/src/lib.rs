//! # COPE Core
//!
//! Shared vocabulary for the COPE network-coding stack.
//!
//! ## Key Types
//!
//! - [`LinkAddr`], [`AddressTriple`], [`InterfaceId`]: radio addressing
//! - [`Fingerprint`]: content-derived packet identifier
//! - [`Frame`], [`CodingHeader`], [`HelloMessage`]: bit-exact wire codec
//!
//! ## Key Traits
//!
//! - [`Link`], [`AddressResolution`], [`Timers`], [`Clock`]: the engine's
//!   collaborators, bundled as [`Host`]
//!
//! [`TimerQueue`] and [`MockHost`] are ready-made building blocks for hosts
//! and tests.

pub mod address;
pub mod error;
pub mod fingerprint;
pub mod mock;
pub mod timer;
pub mod traits;
pub mod wire;

pub use address::*;
pub use error::*;
pub use fingerprint::*;
pub use mock::*;
pub use timer::*;
pub use traits::*;
pub use wire::*;

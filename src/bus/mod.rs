//! Length-framed message bus.
//!
//! A small Unix-socket bus: the broker routes frames between clients and
//! the object ids they register; payloads of typed method arguments use
//! the structural codec. The frame layer and the value layer are
//! independent; the broker only ever looks at frame headers.

pub mod broker;
pub mod client;
pub mod codec;
pub mod frame;

pub use broker::Broker;
pub use client::{BusError, Connection};
pub use frame::{FrameError, Message};

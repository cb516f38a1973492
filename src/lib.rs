//! vinit - minimal operating-system userspace core
//!
//! Four tightly coupled subsystems:
//! - a length-framed message bus: broker, per-process client, and a
//!   structural value codec
//! - an early-boot bring-up path that assembles the overlay root and
//!   pivots out of the initramfs
//! - a stage-ordered service supervisor with dependency waits and daemon
//!   monitoring
//! - a device-event responder that feeds kernel uevents through a worker
//!   pool to maintain /dev
//!
//! # Architecture
//!
//! ```text
//! /init ──exec──> initd (supervisor) ──spawns──> busd, devd, services
//!                     │                           │
//!                object 1 ───── busd ───── object 2
//!                                │
//!                        svcctl, devd trigger
//! ```

pub mod api;
pub mod boot;
pub mod bus;
pub mod supervisor;
pub mod udev;

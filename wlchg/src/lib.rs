#![no_std]
//! Wireless charging policy engine
//!
//! Drives a receiver chip, two cascaded charge pumps and the system charger
//! through a docked charging session: adapter negotiation, BPP/EPP charging,
//! charge pump fast charge with its startup sequencer, the finishing phase,
//! thermal and skin limits, and reverse (TX) charging.
//!
//! The engine is synchronous. A board wires its hardware into a
//! [`policy::Platform`], builds a [`policy::Wlchg`] and drives it either by
//! calling the tick functions directly or through the loops in [`runner`].

extern crate alloc;

pub mod chargepump;
pub mod charger;
pub mod config;
pub mod debug;
pub mod error;
pub mod mailbox;
pub mod policy;
pub mod regulation;
pub mod reverse;
pub mod runner;
pub mod rx;
pub mod session;
pub mod startup;
pub mod status;
pub mod thermal;
pub mod votable;

#[cfg(test)]
pub(crate) mod mock;

pub use config::{ChargeParam, ConfigSource, StaticConfig};
pub use error::{Error, Result};
pub use mailbox::WlchgDev;
pub use policy::{Context, Platform, Wlchg};
pub use session::{AdapterType, ChargeSession, ChargeStatus, TempRegion};
pub use status::SharedStatus;

//! `recut-pipeline`
//!
//! Filter-session surface consumed by the `recut` core.
//!
//! ## Design goals
//! - Capability traits (`PidInput`, `PidOutput`) so the core never branches
//!   on a concrete pid type.
//! - Value-type [`Packet`] with zero-copy payload sharing via `bytes::Bytes`.
//! - Rational [`MediaTime`] for cross-timescale comparisons without overflow.
//! - In-memory `mock` harness for driving the filter in tests.

#![forbid(unsafe_code)]

pub mod mock;
mod packet;
mod pid;
mod time;

pub use packet::{Packet, PacketProp, Sap};
pub use pid::{
    CodecKind, PidEvent, PidInfo, PidInput, PidOutput, PlaybackMode, StreamKind,
};
pub use time::MediaTime;

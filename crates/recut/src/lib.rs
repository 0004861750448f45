//! `recut`
//!
//! Multi-stream media reframer: extracts time/frame ranges from framed
//! media streams, splits them by SAP, duration or size, and rewrites
//! timestamps so successive chunks form a continuous output timeline.
//!
//! The filter is driven by a cooperative session: [`Recut::process`] is one
//! non-blocking tick that pulls as many input packets as it can, decides cut
//! points across all pids, and emits as much as pacing and the current range
//! allow. Pids are attached through the capability traits of
//! `recut-pipeline`; the core never sees a concrete pid type.

#![forbid(unsafe_code)]

mod config;
mod emit;
mod error;
mod extract;
mod filter;
mod pacer;
mod planner;
mod range;
mod stream;

pub use config::{RecutConfig, RtMode, StartRounding};
pub use error::{RecutError, RecutResult};
pub use filter::{Recut, Tick};
pub use pacer::{Clock, ManualClock, SystemClock, RT_PRECISION_US};

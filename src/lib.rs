//! Host-side device state mirror and focus engine for CUDA debugging.
//!
//! This crate is the layer between a low-level hardware debug API and a
//! debugger UI. It keeps a lazily-populated cached view of every device,
//! SM, warp, and lane ([`state`]), tracks GPU contexts, modules, and
//! kernels ([`contexts`], [`kernels`]), consumes the debug-API event stream
//! ([`api::CudaEvent`]), relays stop notifications between threads over
//! SIGTRAP ([`notify`]), and gives the UI a uniform coordinate system for
//! filtering, iteration, and focus switching ([`coords`], [`iter`],
//! [`focus`]).
//!
//! The crate performs no hardware access itself: the debug API is consumed
//! through the [`api::DebugApi`] port and everything host-side (breakpoints,
//! symbols, tables) goes through the [`host`] callback traits. A
//! [`Session`] owns one of each plus all mutable state, so there are no
//! process-wide globals.

pub mod api;
pub mod contexts;
pub mod coords;
pub mod error;
mod events;
pub mod focus;
pub mod host;
mod info;
pub mod iter;
pub mod kernels;
pub mod notify;
pub mod options;
pub mod session;
pub mod state;
mod utils;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{Error, Result};
pub use session::Session;

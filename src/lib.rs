//! ISA memory-expansion board emulation for PC-class machines.
//!
//! This crate re-exports the workspace members:
//! - [`mem`]: RAM arena and the guest-address mapping registry.
//! - [`platform`]: the I/O-port bus and device configuration options.
//! - [`boards`]: the board variants, layout construction, and EMS viewport
//!   control.

#![forbid(unsafe_code)]

pub use isabus_boards as boards;
pub use isabus_mem as mem;
pub use isabus_platform as platform;

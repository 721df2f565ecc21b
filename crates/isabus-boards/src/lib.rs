//! ISA-bus memory-expansion boards, including LIM 3.2 EMS bank switching.
//!
//! A board contributes configured RAM to the machine in up to four ways:
//! extending conventional memory below 640 KB, parking 384 KB in the shared
//! upper-memory remap window, adding extended memory above 1 MB, and serving
//! the rest as an EMS page pool reached through four bank-switched 16 KB
//! viewports in the upper-memory frame.
//!
//! [`MemoryBoard::attach`] builds the address-space layout once and wires the
//! board's mappings and I/O registers to the host buses; everything after
//! that is guest software reprogramming the viewports through the board's
//! page-select registers.

#![forbid(unsafe_code)]

pub mod board;
pub mod catalog;
pub mod ems;

pub use board::{
    BoardFlags, ConfigError, HostBus, MemoryBoard, RegionInfo, RegionKind, ViewportStatus,
    EMS_MAX_BYTES, EMS_PAGE_SIZE, EMS_VIEWPORTS, EXTENDED_BASE, TOP_OF_CONVENTIONAL, UMA_SIZE,
};
pub use catalog::{attach_boards, BoardDescriptor, BoardModel};
pub use ems::{EmsRegisterPort, ViewportController};

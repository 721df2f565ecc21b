//! Guest-address-space primitives for ISA memory-expansion boards.
//!
//! [`RamArena`] is the board-owned RAM buffer: contiguous, zero-filled,
//! addressed by byte offset. [`MemoryMap`] is the routing layer the host's
//! address decoder drives: boards register byte/word-addressable regions
//! backed by arena slices, and the map dispatches guest accesses to whichever
//! enabled region contains the address. Regions can be enabled, disabled and
//! retargeted (`rebind`) without re-registration, which is what EMS
//! bank-switching relies on.
//!
//! Addresses are `u32`: ISA-bus boards live in a 24-bit physical address
//! space at most.

#![forbid(unsafe_code)]

mod arena;
mod map;

pub use arena::{ArenaError, RamArena, SharedArena};
pub use map::{MapError, MappingHandle, MemoryMap, RegionWidth, OPEN_BUS_BYTE, OPEN_BUS_WORD};

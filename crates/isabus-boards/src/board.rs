//! Board instance lifecycle and attach-time address-space layout.
//!
//! Attaching a board allocates its RAM arena and carves it, in a fixed
//! priority order, into a conventional-memory extension, a 384 KB deposit in
//! the shared upper-memory remap window, extended memory above 1 MB, and the
//! EMS page pool. The carve runs exactly once per instance; afterwards the
//! only mutable state is the viewport registers.

use std::cell::RefCell;
use std::rc::Rc;

use isabus_mem::{
    ArenaError, MapError, MappingHandle, MemoryMap, RamArena, RegionWidth, SharedArena,
};
use isabus_platform::{DeviceOptions, IoPortBus};
use log::info;
use thiserror::Error;

use crate::catalog::{
    BoardModel, ContiguousPolicy, EmsCapability, FrameAddress, FrameRegister, OptionRange,
};
use crate::ems::{EmsRegisterPort, SharedController, ViewportController};

/// End of conventional (low) memory.
pub const TOP_OF_CONVENTIONAL: u32 = 640 << 10;
/// Size of the upper-memory block parked for later remapping.
pub const UMA_SIZE: u32 = 384 << 10;
/// Start of extended memory.
pub const EXTENDED_BASE: u32 = 1024 << 10;
/// LIM 3.2 allows at most 2 MB of expanded memory per board.
pub const EMS_MAX_BYTES: u32 = 2048 << 10;
/// One EMS page.
pub const EMS_PAGE_SIZE: u32 = 16 << 10;
/// Bank-switched viewports per board.
pub const EMS_VIEWPORTS: usize = 4;

/// Port spacing between consecutive viewport register pairs.
const VIEWPORT_PORT_STRIDE: u16 = 0x4000;

/// Host bus class the board is plugged into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostBus {
    /// 8-bit bus with 20-bit addressing: no RAM above 1 MB, no 16-bit
    /// transfers.
    Xt,
    /// 16-bit bus with addressing above 1 MB.
    At,
}

/// The board's option-derived capability bits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BoardFlags {
    /// Gate for page-select writes taking mapping effect.
    pub configured: bool,
    /// 16-bit transfers.
    pub wide: bool,
    /// Fast (<= 120 ns) chips. Stored and reported, not acted upon.
    pub fast: bool,
    pub ems_enabled: bool,
}

/// Errors attaching a board.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("option `{name}` value {value} outside supported range {min}..={max}")]
    OutOfRange {
        name: &'static str,
        value: u32,
        min: u32,
        max: u32,
    },
    #[error("contiguous length {length_kb}KB exceeds board size {size_kb}KB")]
    LengthExceedsSize { length_kb: u32, size_kb: u32 },
    #[error(transparent)]
    Arena(#[from] ArenaError),
    #[error(transparent)]
    Map(#[from] MapError),
}

fn option_in_range(
    options: &DeviceOptions,
    name: &'static str,
    range: &OptionRange,
) -> Result<u32, ConfigError> {
    let value = options.get_int(name).unwrap_or(range.default);
    if !range.contains(value) {
        return Err(ConfigError::OutOfRange {
            name,
            value,
            min: range.min,
            max: range.max,
        });
    }
    Ok(value)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionKind {
    /// Conventional-memory extension below 640 KB.
    Conventional,
    /// The shared upper-memory remap window (registered disabled).
    UpperRemap,
    /// Extended memory above 1 MB.
    Extended,
    /// One bank-switched 16 KB viewport window in the page frame.
    EmsWindow,
}

/// One mapped region a board contributed, for diagnostics and frontends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionInfo {
    pub kind: RegionKind,
    pub base: u32,
    pub size: u32,
}

/// Snapshot of one viewport's register state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewportStatus {
    pub enabled: bool,
    pub page: u8,
    pub frame_config: u8,
    /// Arena offset the window currently maps, if the window registration is
    /// still live.
    pub backing_offset: Option<usize>,
}

/// One attached memory-expansion board.
pub struct MemoryBoard {
    model: BoardModel,
    flags: BoardFlags,
    total_size_kb: u32,
    start_addr: u32,
    frame_addr: u32,
    base_port: u16,
    ems_start: usize,
    ems_size_kb: u32,
    ems_pages: u16,
    arena: SharedArena,
    memory: Rc<RefCell<MemoryMap>>,
    low: Option<(MappingHandle, u32, u32)>,
    remap: Option<(MappingHandle, u32, u32)>,
    high: Option<(MappingHandle, u32, u32)>,
    ems: Option<SharedController>,
}

impl core::fmt::Debug for MemoryBoard {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MemoryBoard")
            .field("model", &self.model)
            .field("flags", &self.flags)
            .field("total_size_kb", &self.total_size_kb)
            .field("start_addr", &self.start_addr)
            .field("frame_addr", &self.frame_addr)
            .field("base_port", &self.base_port)
            .field("ems_start", &self.ems_start)
            .field("ems_size_kb", &self.ems_size_kb)
            .field("ems_pages", &self.ems_pages)
            .finish_non_exhaustive()
    }
}

impl MemoryBoard {
    /// Construct the board from its options and wire it to the host buses.
    ///
    /// This runs the one-time layout construction; re-running it on a live
    /// instance is not possible because it consumes nothing and builds a new
    /// instance.
    pub fn attach(
        model: BoardModel,
        options: &DeviceOptions,
        memory: &Rc<RefCell<MemoryMap>>,
        io: &mut IoPortBus,
        host: HostBus,
    ) -> Result<Self, ConfigError> {
        let desc = model.descriptor();

        let total_size_kb = option_in_range(options, "size", &desc.size_kb)?;
        let start_kb = match &desc.start_kb {
            Some(range) => option_in_range(options, "start", range)?,
            None => 0,
        };
        let contiguous_kb = match desc.contiguous {
            ContiguousPolicy::WholeBoard => total_size_kb,
            ContiguousPolicy::None => 0,
            ContiguousPolicy::LengthOption => {
                let range = desc.length_kb.as_ref().expect("length policy needs a range");
                option_in_range(options, "length", range)?
            }
        };
        if contiguous_kb > total_size_kb {
            return Err(ConfigError::LengthExceedsSize {
                length_kb: contiguous_kb,
                size_kb: total_size_kb,
            });
        }

        let base_port = match &desc.io_base {
            Some(io_base) => options.get_hex16("base").unwrap_or(io_base.default),
            None => 0,
        };
        let frame_addr = match desc.frame {
            FrameAddress::None => 0,
            FrameAddress::Fixed(addr) => addr,
            FrameAddress::Selectable { default, .. } => {
                options.get_hex20("frame").unwrap_or(default)
            }
        };

        let mut flags = BoardFlags {
            configured: desc.configured_at_attach,
            wide: desc.wide
                || (desc.width_selectable && options.get_int("width").unwrap_or(0) != 0),
            fast: desc.speed_selectable && options.get_int("speed").unwrap_or(0) != 0,
            ems_enabled: match desc.ems {
                EmsCapability::None => false,
                EmsCapability::Always => true,
                EmsCapability::Selectable => options.get_int("ems").unwrap_or(0) != 0,
                EmsCapability::WhenFramed => frame_addr != 0,
            },
        };

        // A bus without 16-bit transfers silently forces the board back to
        // 8-bit mode.
        if host == HostBus::Xt && flags.wide {
            info!("{}: not an AT-class bus, forcing 8-bit transfers", desc.name);
            flags.wide = false;
        }

        info!(
            "{}: {}KB{}{}{}",
            desc.name,
            total_size_kb,
            if flags.fast { ", fast" } else { "" },
            if flags.wide { ", 16-bit" } else { "" },
            if flags.ems_enabled { ", EMS" } else { "" },
        );

        let arena = RamArena::new(total_size_kb)?.into_shared();
        let start_addr = start_kb << 10;

        let mut board = Self {
            model,
            flags,
            total_size_kb,
            start_addr,
            frame_addr,
            base_port,
            ems_start: 0,
            ems_size_kb: 0,
            ems_pages: 0,
            arena,
            memory: memory.clone(),
            low: None,
            remap: None,
            high: None,
            ems: None,
        };
        board.build_layout(contiguous_kb << 10, io, host)?;
        Ok(board)
    }

    fn build_layout(
        &mut self,
        contiguous_bytes: u32,
        io: &mut IoPortBus,
        host: HostBus,
    ) -> Result<(), ConfigError> {
        let desc = self.model.descriptor();
        let total_bytes = self.total_size_kb << 10;
        let narrow_width = if self.flags.wide {
            RegionWidth::Wide
        } else {
            RegionWidth::Byte
        };

        // The pool budget is whatever the contiguous allocation leaves over.
        let mut pool_budget = total_bytes;
        let mut contiguous = contiguous_bytes;
        let mut addr = self.start_addr;
        let mut offset: usize = 0;

        let mut memory = self.memory.borrow_mut();

        // The memory-start switch set to zero means the board adds no
        // contiguous memory at all.
        if addr > 0 && contiguous > 0 {
            pool_budget -= contiguous;

            // Extend the conventional (low) area, which ends at 640 KB.
            let take = if addr < TOP_OF_CONVENTIONAL {
                (TOP_OF_CONVENTIONAL - addr).min(contiguous)
            } else {
                0
            };
            if take > 0 {
                info!("{}: RAM at {}KB ({}KB)", desc.name, addr >> 10, take >> 10);
                let handle = memory.register(addr, take, narrow_width, true, &self.arena, offset)?;
                memory.set_external(addr, take);
                self.low = Some((handle, addr, take));
                offset += take as usize;
                contiguous -= take;
                addr += take;
            }

            // At the top of conventional RAM the next 384 KB skips the upper
            // memory area: it is parked, disabled, in the shared remap window
            // just above the extended span, for software to claim later. The
            // window is a system-wide singleton; claiming it displaces any
            // previous owner.
            if addr == TOP_OF_CONVENTIONAL && contiguous >= UMA_SIZE {
                let remap_base = addr + contiguous;
                info!(
                    "{}: RAM at {}KB ({}KB, remap window)",
                    desc.name,
                    remap_base >> 10,
                    UMA_SIZE >> 10
                );
                let handle = memory.register_remap(
                    remap_base,
                    UMA_SIZE,
                    RegionWidth::Wide,
                    false,
                    &self.arena,
                    offset,
                )?;
                memory.set_external(remap_base, UMA_SIZE);
                self.remap = Some((handle, remap_base, UMA_SIZE));
                offset += UMA_SIZE as usize;
                contiguous -= UMA_SIZE;
                addr += UMA_SIZE;
            }
        }

        // On buses that can address above 1 MB, the rest of the contiguous
        // allocation becomes extended memory.
        if host == HostBus::At && addr > 0 && contiguous > 0 {
            info!(
                "{}: RAM at {}KB ({}KB)",
                desc.name,
                addr >> 10,
                contiguous >> 10
            );
            let handle =
                memory.register(addr, contiguous, RegionWidth::Wide, true, &self.arena, offset)?;
            memory.set_external(addr, contiguous);
            self.high = Some((handle, addr, contiguous));
            offset += contiguous as usize;
        }

        // Whatever the contiguous allocation left over feeds the EMS pool,
        // capped at the per-board limit.
        if self.flags.ems_enabled {
            let pool = pool_budget.min(EMS_MAX_BYTES);
            self.ems_start = offset;
            self.ems_size_kb = pool >> 10;
            self.ems_pages = (pool / EMS_PAGE_SIZE) as u16;
            info!(
                "{}: EMS enabled, I/O {:04X}h, {}KB ({} pages), frame {:05X}h",
                desc.name, self.base_port, self.ems_size_kb, self.ems_pages, self.frame_addr
            );

            // The four viewport windows always exist, even over an empty
            // pool; they just can never be enabled then. An empty pool gets a
            // placeholder backing at offset zero until a page is selected.
            let initial_backing = if pool >= EMS_PAGE_SIZE { offset } else { 0 };
            let mut windows = Vec::with_capacity(EMS_VIEWPORTS);
            for i in 0..EMS_VIEWPORTS {
                let base = self.frame_addr + i as u32 * EMS_PAGE_SIZE;
                let handle = memory.register(
                    base,
                    EMS_PAGE_SIZE,
                    narrow_width,
                    false,
                    &self.arena,
                    initial_backing,
                )?;
                windows.push(handle);
            }
            drop(memory);

            let ctl = Rc::new(RefCell::new(ViewportController::new(
                self.memory.clone(),
                self.base_port,
                desc.frame_register == FrameRegister::ConfiguresBoard,
                self.flags.configured,
                self.ems_start,
                self.ems_pages,
                windows.try_into().expect("exactly four viewport windows"),
            )));
            for i in 0..EMS_VIEWPORTS {
                let pair_base = self
                    .base_port
                    .wrapping_add(i as u16 * VIEWPORT_PORT_STRIDE);
                io.register_shared_range(pair_base, 2, {
                    let ctl = ctl.clone();
                    move |port| Box::new(EmsRegisterPort::new(ctl.clone(), port))
                });
            }
            self.ems = Some(ctl);
        }

        Ok(())
    }

    /// Tear the board down: every mapping and I/O registration it owns is
    /// removed before the arena drops.
    pub fn detach(self, io: &mut IoPortBus) {
        let mut memory = self.memory.borrow_mut();
        for (handle, base, size) in [self.low, self.remap, self.high].into_iter().flatten() {
            memory.unregister(handle);
            memory.clear_external(base, size);
        }
        if let Some(ctl) = &self.ems {
            let ctl = ctl.borrow();
            for &handle in ctl.window_handles() {
                memory.unregister(handle);
            }
        }
        drop(memory);

        if self.ems.is_some() {
            for i in 0..EMS_VIEWPORTS {
                let pair_base = self
                    .base_port
                    .wrapping_add(i as u16 * VIEWPORT_PORT_STRIDE);
                io.unregister_range(pair_base, 2);
            }
        }
    }

    pub fn model(&self) -> BoardModel {
        self.model
    }

    /// Current flags. `configured` tracks the viewport controller on boards
    /// whose frame register configures them after attach.
    pub fn flags(&self) -> BoardFlags {
        let mut flags = self.flags;
        if let Some(ctl) = &self.ems {
            flags.configured = ctl.borrow().configured();
        }
        flags
    }

    pub fn total_size_kb(&self) -> u32 {
        self.total_size_kb
    }

    pub fn start_addr(&self) -> u32 {
        self.start_addr
    }

    pub fn frame_addr(&self) -> u32 {
        self.frame_addr
    }

    pub fn base_port(&self) -> u16 {
        self.base_port
    }

    /// Arena offset where the EMS pool begins.
    pub fn ems_start(&self) -> usize {
        self.ems_start
    }

    pub fn ems_size_kb(&self) -> u32 {
        self.ems_size_kb
    }

    pub fn ems_pages(&self) -> u16 {
        self.ems_pages
    }

    pub fn arena(&self) -> &SharedArena {
        &self.arena
    }

    /// Every region this board has registered, for diagnostics and frontends.
    pub fn regions(&self) -> Vec<RegionInfo> {
        let mut regions = Vec::new();
        if let Some((_, base, size)) = self.low {
            regions.push(RegionInfo {
                kind: RegionKind::Conventional,
                base,
                size,
            });
        }
        if let Some((_, base, size)) = self.remap {
            regions.push(RegionInfo {
                kind: RegionKind::UpperRemap,
                base,
                size,
            });
        }
        if let Some((_, base, size)) = self.high {
            regions.push(RegionInfo {
                kind: RegionKind::Extended,
                base,
                size,
            });
        }
        if self.ems.is_some() {
            for i in 0..EMS_VIEWPORTS {
                regions.push(RegionInfo {
                    kind: RegionKind::EmsWindow,
                    base: self.frame_addr + i as u32 * EMS_PAGE_SIZE,
                    size: EMS_PAGE_SIZE,
                });
            }
        }
        regions
    }

    /// Register state of viewport `index`, if this board has EMS viewports.
    pub fn viewport(&self, index: usize) -> Option<ViewportStatus> {
        let ctl = self.ems.as_ref()?;
        let ctl = ctl.borrow();
        if index >= EMS_VIEWPORTS {
            return None;
        }
        let (enabled, page, frame_config) = ctl.viewport_state(index);
        let backing_offset = self.memory.borrow().backing_offset(ctl.window_handle(index));
        Some(ViewportStatus {
            enabled,
            page,
            frame_config,
            backing_offset,
        })
    }
}

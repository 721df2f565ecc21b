//! The catalog of selectable board variants.
//!
//! Each variant is a tagged entry carrying its own configuration descriptor:
//! which options it understands, their ranges and defaults, its fixed
//! capabilities, and how its frame-config register behaves. Board
//! construction interprets the active descriptor instead of branching on a
//! numeric board id.

use std::cell::RefCell;
use std::rc::Rc;

use isabus_mem::MemoryMap;
use isabus_platform::{DeviceOptions, IoPortBus};

use crate::board::{ConfigError, HostBus, MemoryBoard};

/// Inclusive numeric range with a UI step and a default, for one option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptionRange {
    pub min: u32,
    pub max: u32,
    pub step: u32,
    pub default: u32,
}

impl OptionRange {
    pub fn contains(&self, value: u32) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Selectable I/O bases for a board's control registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoBaseChoices {
    pub choices: &'static [u16],
    pub default: u16,
}

/// Where a board's EMS page frame sits in the upper-memory area.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameAddress {
    /// The board has no page frame.
    None,
    /// Hardwired by the board.
    Fixed(u32),
    /// Strapped by the user.
    Selectable {
        choices: &'static [u32],
        default: u32,
    },
}

/// How much of the board participates in contiguous (conventional/extended)
/// allocation, as opposed to the EMS pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContiguousPolicy {
    /// Every configured byte.
    WholeBoard,
    /// Nothing; the board is pool-only.
    None,
    /// The separate `length` option decides (EV-159).
    LengthOption,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmsCapability {
    /// Plain RAM board.
    None,
    /// EMS mode is hardwired on.
    Always,
    /// The `ems` option decides.
    Selectable,
    /// EMS is active whenever the frame strap is not "disabled" (0).
    WhenFramed,
}

/// Behavior of the per-viewport frame-config register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameRegister {
    /// Stored only; the board is usable from attach.
    Inert,
    /// Stored, and a nonzero write is what first marks the board configured.
    ConfiguresBoard,
}

pub struct BoardDescriptor {
    pub name: &'static str,
    pub internal_name: &'static str,
    pub size_kb: OptionRange,
    pub start_kb: Option<OptionRange>,
    pub length_kb: Option<OptionRange>,
    pub contiguous: ContiguousPolicy,
    pub io_base: Option<IoBaseChoices>,
    pub frame: FrameAddress,
    /// Inherently 16-bit (no strap).
    pub wide: bool,
    pub width_selectable: bool,
    pub speed_selectable: bool,
    pub ems: EmsCapability,
    pub configured_at_attach: bool,
    pub frame_register: FrameRegister,
}

const EMS_IO_BASES: &[u16] = &[0x0208, 0x0218, 0x0258, 0x0268, 0x02A8, 0x02B8, 0x02E8];

static IBM_XT: BoardDescriptor = BoardDescriptor {
    name: "IBM PC/XT Memory Expansion",
    internal_name: "ibmxt",
    size_kb: OptionRange {
        min: 0,
        max: 512,
        step: 16,
        default: 128,
    },
    start_kb: Some(OptionRange {
        min: 0,
        max: 576,
        step: 64,
        default: 256,
    }),
    length_kb: None,
    contiguous: ContiguousPolicy::WholeBoard,
    io_base: None,
    frame: FrameAddress::None,
    wide: false,
    width_selectable: false,
    speed_selectable: false,
    ems: EmsCapability::None,
    configured_at_attach: false,
    frame_register: FrameRegister::Inert,
};

static IBM_AT: BoardDescriptor = BoardDescriptor {
    name: "IBM PC/AT Memory Expansion",
    internal_name: "ibmat",
    size_kb: OptionRange {
        min: 0,
        max: 4096,
        step: 512,
        default: 512,
    },
    start_kb: Some(OptionRange {
        min: 0,
        max: 16128,
        step: 128,
        default: 512,
    }),
    length_kb: None,
    contiguous: ContiguousPolicy::WholeBoard,
    io_base: None,
    frame: FrameAddress::None,
    wide: true,
    width_selectable: false,
    speed_selectable: false,
    ems: EmsCapability::None,
    configured_at_attach: false,
    frame_register: FrameRegister::Inert,
};

static P5PAK: BoardDescriptor = BoardDescriptor {
    name: "Paradise Systems 5-PAK",
    internal_name: "p5pak",
    size_kb: OptionRange {
        min: 0,
        max: 384,
        step: 64,
        default: 128,
    },
    start_kb: Some(OptionRange {
        min: 64,
        max: 576,
        step: 64,
        default: 512,
    }),
    length_kb: None,
    contiguous: ContiguousPolicy::WholeBoard,
    io_base: None,
    frame: FrameAddress::None,
    wide: false,
    width_selectable: false,
    speed_selectable: false,
    ems: EmsCapability::None,
    configured_at_attach: false,
    frame_register: FrameRegister::Inert,
};

static EMS_5150: BoardDescriptor = BoardDescriptor {
    name: "Micro Mainframe EMS-5150(T)",
    internal_name: "ems5150",
    size_kb: OptionRange {
        min: 0,
        max: 2048,
        step: 64,
        default: 256,
    },
    start_kb: None,
    length_kb: None,
    contiguous: ContiguousPolicy::None,
    io_base: Some(IoBaseChoices {
        choices: &[0x0208, 0x020A, 0x020C, 0x020E],
        default: 0x0208,
    }),
    frame: FrameAddress::Fixed(0xD0000),
    wide: false,
    width_selectable: false,
    speed_selectable: false,
    ems: EmsCapability::Always,
    configured_at_attach: true,
    frame_register: FrameRegister::Inert,
};

static EV_159: BoardDescriptor = BoardDescriptor {
    name: "Everex EV-159 RAM 3000 Deluxe",
    internal_name: "ev159",
    size_kb: OptionRange {
        min: 0,
        max: 3072,
        step: 512,
        default: 512,
    },
    start_kb: Some(OptionRange {
        min: 0,
        max: 16128,
        step: 128,
        default: 0,
    }),
    length_kb: Some(OptionRange {
        min: 0,
        max: 16384,
        step: 128,
        default: 0,
    }),
    contiguous: ContiguousPolicy::LengthOption,
    io_base: Some(IoBaseChoices {
        choices: EMS_IO_BASES,
        default: 0x0258,
    }),
    frame: FrameAddress::Fixed(0xE0000),
    wide: false,
    width_selectable: true,
    speed_selectable: true,
    ems: EmsCapability::Selectable,
    configured_at_attach: false,
    frame_register: FrameRegister::ConfiguresBoard,
};

static RAMPAGE_XT: BoardDescriptor = BoardDescriptor {
    name: "AST RAMpage/XT",
    internal_name: "rampage",
    size_kb: OptionRange {
        min: 0,
        max: 8192,
        step: 128,
        default: 128,
    },
    start_kb: None,
    length_kb: None,
    contiguous: ContiguousPolicy::None,
    io_base: Some(IoBaseChoices {
        choices: EMS_IO_BASES,
        default: 0x0258,
    }),
    frame: FrameAddress::Selectable {
        choices: &[0x00000, 0xC0000, 0xD0000, 0xE0000],
        default: 0x00000,
    },
    wide: false,
    width_selectable: true,
    speed_selectable: true,
    ems: EmsCapability::WhenFramed,
    configured_at_attach: true,
    frame_register: FrameRegister::Inert,
};

/// A selectable board variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BoardModel {
    IbmXt,
    IbmAt,
    Paradise5Pak,
    Ems5150,
    Ev159,
    RampageXt,
}

impl BoardModel {
    pub const ALL: [BoardModel; 6] = [
        BoardModel::IbmXt,
        BoardModel::IbmAt,
        BoardModel::Paradise5Pak,
        BoardModel::Ems5150,
        BoardModel::Ev159,
        BoardModel::RampageXt,
    ];

    pub fn descriptor(self) -> &'static BoardDescriptor {
        match self {
            BoardModel::IbmXt => &IBM_XT,
            BoardModel::IbmAt => &IBM_AT,
            BoardModel::Paradise5Pak => &P5PAK,
            BoardModel::Ems5150 => &EMS_5150,
            BoardModel::Ev159 => &EV_159,
            BoardModel::RampageXt => &RAMPAGE_XT,
        }
    }

    /// Display name, for a frontend's board picker.
    pub fn name(self) -> &'static str {
        self.descriptor().name
    }

    /// Stable identifier used in machine configuration files.
    pub fn internal_name(self) -> &'static str {
        self.descriptor().internal_name
    }

    pub fn from_internal_name(name: &str) -> Option<BoardModel> {
        Self::ALL
            .into_iter()
            .find(|m| m.internal_name() == name)
    }
}

/// Attach every selected board at machine reset.
///
/// Boards are attached in slot order; the machine owns the returned
/// instances and detaches them when it tears down.
pub fn attach_boards(
    selections: &[(BoardModel, DeviceOptions)],
    memory: &Rc<RefCell<MemoryMap>>,
    io: &mut IoPortBus,
    host: HostBus,
) -> Result<Vec<MemoryBoard>, ConfigError> {
    selections
        .iter()
        .map(|(model, options)| MemoryBoard::attach(*model, options, memory, io, host))
        .collect()
}

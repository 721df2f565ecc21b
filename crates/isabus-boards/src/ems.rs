//! EMS viewport control registers.
//!
//! Each of the four 16 KB viewports has a two-byte register pair on the I/O
//! bus: `page_select` picks which EMS page is visible through the viewport
//! (bit 7 = enable, bits 0..=6 = page number) and `frame_config` is the
//! board-variant-specific secondary register. The pairs sit at
//! `base + i * 0x4000` for `i = 0..=3`, wrapping around the 16-bit port
//! space, so the viewport index is recoverable from the port address alone.
//!
//! The controller is shared behind `Rc<RefCell<_>>` and registered on the
//! [`IoPortBus`](isabus_platform::IoPortBus) as one thin [`EmsRegisterPort`]
//! wrapper per port.

use std::cell::RefCell;
use std::rc::Rc;

use isabus_mem::{MappingHandle, MemoryMap};
use isabus_platform::PortIoDevice;
use log::{debug, warn};

use crate::board::{EMS_PAGE_SIZE, EMS_VIEWPORTS};

const REG_PAGE_SELECT: u16 = 0;
const REG_FRAME_CONFIG: u16 = 1;

#[derive(Debug, Clone, Copy, Default)]
struct Viewport {
    enabled: bool,
    /// Low 7 bits of the last page-select write. Advisory while disabled.
    page: u8,
    frame_config: u8,
}

/// Register-level state for the four bank-switched viewports.
pub struct ViewportController {
    memory: Rc<RefCell<MemoryMap>>,
    base_port: u16,
    /// On variants wired this way (EV-159), a nonzero frame-config write is
    /// what first marks the board configured.
    configure_on_frame_write: bool,
    configured: bool,
    /// Arena offset where the EMS pool begins.
    ems_start: usize,
    ems_pages: u16,
    viewports: [Viewport; EMS_VIEWPORTS],
    windows: [MappingHandle; EMS_VIEWPORTS],
}

pub type SharedController = Rc<RefCell<ViewportController>>;

impl ViewportController {
    pub(crate) fn new(
        memory: Rc<RefCell<MemoryMap>>,
        base_port: u16,
        configure_on_frame_write: bool,
        configured: bool,
        ems_start: usize,
        ems_pages: u16,
        windows: [MappingHandle; EMS_VIEWPORTS],
    ) -> Self {
        Self {
            memory,
            base_port,
            configure_on_frame_write,
            configured,
            ems_start,
            ems_pages,
            viewports: [Viewport::default(); EMS_VIEWPORTS],
            windows,
        }
    }

    pub fn configured(&self) -> bool {
        self.configured
    }

    pub fn base_port(&self) -> u16 {
        self.base_port
    }

    pub fn ems_pages(&self) -> u16 {
        self.ems_pages
    }

    pub(crate) fn window_handles(&self) -> &[MappingHandle; EMS_VIEWPORTS] {
        &self.windows
    }

    pub(crate) fn viewport_state(&self, index: usize) -> (bool, u8, u8) {
        let v = &self.viewports[index];
        (v.enabled, v.page, v.frame_config)
    }

    pub(crate) fn window_handle(&self, index: usize) -> MappingHandle {
        self.windows[index]
    }

    /// Recover `(viewport index, register offset)` from a port address.
    ///
    /// The pairs are spaced 0x4000 apart (mod 0x10000), so the viewport index
    /// is the high two bits of the port and the register offset is the
    /// distance from the base within the low 14 bits.
    fn decode(&self, port: u16) -> (usize, u16) {
        let viewport = usize::from(port >> 14);
        let reg = (port & 0x3FFF).wrapping_sub(self.base_port & 0x3FFF);
        (viewport, reg)
    }

    /// Read one control register. No side effects.
    pub fn register_read(&self, port: u16) -> u8 {
        let (vp, reg) = self.decode(port);
        match reg {
            REG_PAGE_SELECT => {
                let v = &self.viewports[vp];
                (v.page & 0x7F) | if v.enabled { 0x80 } else { 0x00 }
            }
            // frame_config is write-only; reads float.
            _ => 0xFF,
        }
    }

    pub fn register_write(&mut self, port: u16, value: u8) {
        let (vp, reg) = self.decode(port);
        match reg {
            REG_PAGE_SELECT => self.page_select_write(vp, value),
            REG_FRAME_CONFIG => self.frame_config_write(vp, value),
            _ => {}
        }
    }

    fn page_select_write(&mut self, vp: usize, value: u8) {
        let page = value & 0x7F;
        let enable = value & 0x80 != 0;
        self.viewports[vp].page = page;

        if !self.configured {
            // Recorded, but until the board is configured the viewport stays
            // disabled no matter what the enable bit asked for.
            self.viewports[vp].enabled = false;
            return;
        }

        let mut memory = self.memory.borrow_mut();
        let handle = self.windows[vp];
        if u16::from(page) < self.ems_pages {
            // Retarget the window at the selected page. Doing this on every
            // accepted write means a page change while enabled switches banks
            // without an observable disable/enable pulse.
            memory.rebind(
                handle,
                self.ems_start + usize::from(page) * EMS_PAGE_SIZE as usize,
            );
            if enable {
                memory.enable(handle);
            } else {
                memory.disable(handle);
            }
            self.viewports[vp].enabled = enable;
            debug!(
                "viewport {vp}: page {page} {}",
                if enable { "enabled" } else { "disabled" }
            );
        } else {
            // That page does not exist; the hardware ignores the strap and
            // keeps the window dark.
            warn!(
                "viewport {vp}: page {page} out of range ({} pages), forcing disabled",
                self.ems_pages
            );
            memory.disable(handle);
            self.viewports[vp].enabled = false;
        }
    }

    fn frame_config_write(&mut self, vp: usize, value: u8) {
        self.viewports[vp].frame_config = value;
        if self.configure_on_frame_write && value != 0 && !self.configured {
            debug!("frame register write 0x{value:02x}: board is now configured");
            self.configured = true;
        }
        // This register never disables an already-enabled viewport.
    }
}

/// I/O-port view of a shared [`ViewportController`].
///
/// The bus maps one port to one device instance; the controller answers to
/// eight ports (two per viewport), so one wrapper is registered per port.
/// Multi-byte accesses decompose into successive byte registers.
pub struct EmsRegisterPort {
    ctl: SharedController,
    port: u16,
}

impl EmsRegisterPort {
    pub fn new(ctl: SharedController, port: u16) -> Self {
        Self { ctl, port }
    }
}

impl PortIoDevice for EmsRegisterPort {
    fn read(&mut self, port: u16, size: u8) -> u32 {
        if size == 0 {
            return 0;
        }
        debug_assert_eq!(port, self.port);
        let ctl = self.ctl.borrow();
        match size {
            1 => u32::from(ctl.register_read(port)),
            2 => {
                let lo = u16::from(ctl.register_read(port));
                let hi = u16::from(ctl.register_read(port.wrapping_add(1)));
                u32::from(lo | (hi << 8))
            }
            4 => {
                let b0 = ctl.register_read(port);
                let b1 = ctl.register_read(port.wrapping_add(1));
                let b2 = ctl.register_read(port.wrapping_add(2));
                let b3 = ctl.register_read(port.wrapping_add(3));
                u32::from_le_bytes([b0, b1, b2, b3])
            }
            _ => u32::from(ctl.register_read(port)),
        }
    }

    fn write(&mut self, port: u16, size: u8, value: u32) {
        if size == 0 {
            return;
        }
        debug_assert_eq!(port, self.port);
        let mut ctl = self.ctl.borrow_mut();
        match size {
            1 => ctl.register_write(port, value as u8),
            2 => {
                let [b0, b1] = (value as u16).to_le_bytes();
                ctl.register_write(port, b0);
                ctl.register_write(port.wrapping_add(1), b1);
            }
            4 => {
                let [b0, b1, b2, b3] = value.to_le_bytes();
                ctl.register_write(port, b0);
                ctl.register_write(port.wrapping_add(1), b1);
                ctl.register_write(port.wrapping_add(2), b2);
                ctl.register_write(port.wrapping_add(3), b3);
            }
            _ => ctl.register_write(port, value as u8),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use isabus_mem::{RamArena, RegionWidth};

    const FRAME: u32 = 0xE0000;
    const BASE_PORT: u16 = 0x0258;

    struct Fixture {
        memory: Rc<RefCell<MemoryMap>>,
        ctl: ViewportController,
    }

    /// An EMS pool of `pages` pages starting at arena offset 0, with the four
    /// windows registered at the usual frame and all disabled.
    fn fixture(pages: u16, configured: bool, configure_on_frame_write: bool) -> Fixture {
        let arena = RamArena::new(u32::from(pages) * 16).unwrap().into_shared();
        let memory = Rc::new(RefCell::new(MemoryMap::new()));
        let mut windows = Vec::new();
        for i in 0..EMS_VIEWPORTS {
            let base = FRAME + i as u32 * EMS_PAGE_SIZE;
            let handle = memory
                .borrow_mut()
                .register(base, EMS_PAGE_SIZE, RegionWidth::Byte, false, &arena, 0)
                .unwrap();
            windows.push(handle);
        }
        let ctl = ViewportController::new(
            memory.clone(),
            BASE_PORT,
            configure_on_frame_write,
            configured,
            0,
            pages,
            windows.try_into().unwrap(),
        );
        Fixture { memory, ctl }
    }

    fn page_select_port(viewport: usize) -> u16 {
        BASE_PORT.wrapping_add(viewport as u16 * 0x4000)
    }

    #[test]
    fn enable_selects_page_and_lights_the_window() {
        let mut fx = fixture(32, true, false);
        let port = page_select_port(2);

        fx.ctl.register_write(port, 0x85);

        let (enabled, page, _) = fx.ctl.viewport_state(2);
        assert!(enabled);
        assert_eq!(page, 5);
        let handle = fx.ctl.window_handle(2);
        let memory = fx.memory.borrow();
        assert!(memory.is_enabled(handle));
        assert_eq!(
            memory.backing_offset(handle),
            Some(5 * EMS_PAGE_SIZE as usize)
        );
        drop(memory);

        assert_eq!(fx.ctl.register_read(port), 0x85);
    }

    #[test]
    fn out_of_range_page_forces_disabled_silently() {
        let mut fx = fixture(32, true, false);
        let port = page_select_port(0);

        fx.ctl.register_write(port, 0x80 | 32);

        let (enabled, page, _) = fx.ctl.viewport_state(0);
        assert!(!enabled);
        assert_eq!(page, 32);
        assert!(!fx.memory.borrow().is_enabled(fx.ctl.window_handle(0)));
        // Readback never reflects the forced-disabled write's enable bit.
        assert_eq!(fx.ctl.register_read(port), 32);
    }

    #[test]
    fn every_out_of_range_page_is_rejected() {
        let mut fx = fixture(32, true, false);
        let port = page_select_port(1);
        for page in 32u8..=127 {
            fx.ctl.register_write(port, 0x80 | page);
            let (enabled, _, _) = fx.ctl.viewport_state(1);
            assert!(!enabled, "page {page} must not enable the viewport");
        }
    }

    #[test]
    fn unconfigured_board_records_but_does_not_map() {
        let mut fx = fixture(32, false, true);
        let port = page_select_port(1);

        fx.ctl.register_write(port, 0x83);

        let (enabled, page, _) = fx.ctl.viewport_state(1);
        assert!(!enabled);
        assert_eq!(page, 3);
        assert!(!fx.memory.borrow().is_enabled(fx.ctl.window_handle(1)));
        assert_eq!(fx.ctl.register_read(port), 3);
    }

    #[test]
    fn nonzero_frame_write_configures_the_board() {
        let mut fx = fixture(32, false, true);
        let page_port = page_select_port(0);
        let frame_port = page_select_port(0).wrapping_add(1);

        // Writing zero never configures.
        fx.ctl.register_write(frame_port, 0x00);
        assert!(!fx.ctl.configured());

        fx.ctl.register_write(frame_port, 0xC0);
        assert!(fx.ctl.configured());
        let (_, _, frame_config) = fx.ctl.viewport_state(0);
        assert_eq!(frame_config, 0xC0);

        // Page selects have mapping effect from now on.
        fx.ctl.register_write(page_port, 0x81);
        assert!(fx.memory.borrow().is_enabled(fx.ctl.window_handle(0)));
    }

    #[test]
    fn frame_write_never_disables_an_enabled_viewport() {
        let mut fx = fixture(32, true, false);
        let page_port = page_select_port(3);
        let frame_port = page_port.wrapping_add(1);

        fx.ctl.register_write(page_port, 0x84);
        assert!(fx.memory.borrow().is_enabled(fx.ctl.window_handle(3)));

        fx.ctl.register_write(frame_port, 0x00);
        fx.ctl.register_write(frame_port, 0xFF);
        let (enabled, page, _) = fx.ctl.viewport_state(3);
        assert!(enabled);
        assert_eq!(page, 4);
        assert!(fx.memory.borrow().is_enabled(fx.ctl.window_handle(3)));
    }

    #[test]
    fn page_change_while_enabled_rebinds_without_a_pulse() {
        let mut fx = fixture(32, true, false);
        let port = page_select_port(0);
        let handle = fx.ctl.window_handle(0);

        fx.ctl.register_write(port, 0x82);
        assert_eq!(
            fx.memory.borrow().backing_offset(handle),
            Some(2 * EMS_PAGE_SIZE as usize)
        );

        fx.ctl.register_write(port, 0x87);
        let memory = fx.memory.borrow();
        assert!(memory.is_enabled(handle));
        assert_eq!(memory.backing_offset(handle), Some(7 * EMS_PAGE_SIZE as usize));
    }

    #[test]
    fn clearing_the_enable_bit_disables_the_window() {
        let mut fx = fixture(32, true, false);
        let port = page_select_port(0);
        let handle = fx.ctl.window_handle(0);

        fx.ctl.register_write(port, 0x86);
        assert!(fx.memory.borrow().is_enabled(handle));

        fx.ctl.register_write(port, 0x06);
        assert!(!fx.memory.borrow().is_enabled(handle));
        assert_eq!(fx.ctl.register_read(port), 0x06);
    }

    #[test]
    fn frame_config_reads_float() {
        let fx = fixture(32, true, false);
        assert_eq!(fx.ctl.register_read(page_select_port(0).wrapping_add(1)), 0xFF);
    }

    #[test]
    fn port_wrapper_decomposes_word_access() {
        let fx = fixture(32, true, false);
        let ctl = Rc::new(RefCell::new(fx.ctl));
        let port = page_select_port(0);
        let mut dev = EmsRegisterPort::new(ctl.clone(), port);

        dev.write(port, 2, 0xC085);
        // Low byte went to page_select, high byte to frame_config.
        let (enabled, page, frame_config) = ctl.borrow().viewport_state(0);
        assert!(enabled);
        assert_eq!(page, 5);
        assert_eq!(frame_config, 0xC0);

        // Word read: page_select in the low byte, floating frame_config high.
        assert_eq!(dev.read(port, 2), 0xFF85);
    }
}

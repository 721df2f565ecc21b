use std::collections::HashMap;

pub trait PortIoDevice {
    fn read(&mut self, port: u16, size: u8) -> u32;
    fn write(&mut self, port: u16, size: u8, value: u32);
}

/// I/O-port dispatch for the machine.
///
/// One device instance per port. Devices that respond to several ports share
/// their state behind `Rc<RefCell<_>>` and register one thin wrapper per port
/// (see [`Self::register_shared_range`]).
pub struct IoPortBus {
    devices: HashMap<u16, Box<dyn PortIoDevice>>,
}

impl IoPortBus {
    pub fn new() -> Self {
        Self {
            devices: HashMap::new(),
        }
    }

    pub fn register(&mut self, port: u16, device: Box<dyn PortIoDevice>) {
        self.devices.insert(port, device);
    }

    /// Unregister an I/O port handler, returning the removed device (if any).
    ///
    /// Boards unregister their register pairs at detach; the ports then float
    /// open-bus again without rebuilding the bus.
    pub fn unregister(&mut self, port: u16) -> Option<Box<dyn PortIoDevice>> {
        self.devices.remove(&port)
    }

    /// Unregister a contiguous range of I/O ports.
    ///
    /// Ports are computed using wrapping arithmetic (`start + offset`),
    /// matching x86 I/O port semantics.
    pub fn unregister_range(&mut self, start: u16, len: u16) {
        for offset in 0..len {
            let port = start.wrapping_add(offset);
            self.unregister(port);
        }
    }

    /// Register a device for a contiguous range of I/O ports.
    ///
    /// The provided factory is invoked once per port. It can be used to build
    /// per-port wrapper devices that share a single underlying implementation
    /// (e.g. via `Rc<RefCell<...>>`).
    pub fn register_shared_range<F>(&mut self, start: u16, len: u16, mut make: F)
    where
        F: FnMut(u16) -> Box<dyn PortIoDevice>,
    {
        for offset in 0..len {
            let port = start.wrapping_add(offset);
            self.register(port, make(port));
        }
    }

    pub fn read(&mut self, port: u16, size: u8) -> u32 {
        // Treat zero-sized accesses as true no-ops. (They are not representable
        // by the x86 ISA, but defensive callers may still attempt them.)
        if size == 0 {
            return 0;
        }

        // x86 port I/O instructions only support access sizes {1,2,4}. Treat
        // any other *non-zero* size as an invalid/unmapped access and float
        // the bus high (all ones), rather than forwarding an unexpected size
        // into device models.
        if !matches!(size, 1 | 2 | 4) {
            return 0xFFFF_FFFF;
        }

        if let Some(dev) = self.devices.get_mut(&port) {
            return dev.read(port, size);
        }

        match size {
            1 => 0xFF,
            2 => 0xFFFF,
            _ => 0xFFFF_FFFF,
        }
    }

    pub fn write(&mut self, port: u16, size: u8, value: u32) {
        if size == 0 {
            return;
        }
        if !matches!(size, 1 | 2 | 4) {
            return;
        }
        if let Some(device) = self.devices.get_mut(&port) {
            device.write(port, size, value);
        }
    }

    pub fn read_u8(&mut self, port: u16) -> u8 {
        self.read(port, 1) as u8
    }

    pub fn write_u8(&mut self, port: u16, value: u8) {
        self.write(port, 1, value as u32);
    }
}

impl Default for IoPortBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    #[derive(Debug, Default)]
    struct SharedState {
        value: u32,
    }

    #[derive(Debug)]
    struct SharedStatePort {
        state: Rc<RefCell<SharedState>>,
        base: u16,
        port: u16,
    }

    impl PortIoDevice for SharedStatePort {
        fn read(&mut self, port: u16, size: u8) -> u32 {
            debug_assert_eq!(port, self.port);
            debug_assert_eq!(size, 4);
            let state = self.state.borrow();
            // Include the offset so it's easy to spot stale mappings.
            state
                .value
                .wrapping_add(u32::from(port.wrapping_sub(self.base)))
        }

        fn write(&mut self, port: u16, size: u8, value: u32) {
            debug_assert_eq!(port, self.port);
            debug_assert_eq!(size, 4);
            self.state.borrow_mut().value = value;
        }
    }

    #[test]
    fn unregister_range_allows_clean_remap_without_stale_handlers() {
        let mut bus = IoPortBus::new();

        const LEN: u16 = 4;
        const BASE1: u16 = 0x1000;
        const BASE2: u16 = 0x2000;

        // Map a tiny 4-port window at BASE1.
        let state = Rc::new(RefCell::new(SharedState::default()));
        bus.register_shared_range(BASE1, LEN, {
            let state = state.clone();
            move |port| {
                Box::new(SharedStatePort {
                    state: state.clone(),
                    base: BASE1,
                    port,
                })
            }
        });

        // Writes should be visible across ports (shared backing state). Touch
        // every port in the window so stale handlers can't hide.
        for off in 0..LEN {
            let port = BASE1.wrapping_add(off);
            bus.write(port, 4, 0x1234_0000);
            assert_eq!(bus.read(port, 4), 0x1234_0000 + u32::from(off));
        }

        // Unmap the old window.
        bus.unregister_range(BASE1, LEN);
        for off in 0..LEN {
            let port = BASE1.wrapping_add(off);
            assert_eq!(bus.read(port, 1), 0xFF);
            assert_eq!(bus.read(port, 2), 0xFFFF);
            assert_eq!(bus.read(port, 4), 0xFFFF_FFFF);
            bus.write(port, 4, 0xFFFF_FFFF);
        }

        // Remap to a new base and ensure the old ports remain unmapped.
        let state2 = Rc::new(RefCell::new(SharedState::default()));
        bus.register_shared_range(BASE2, LEN, {
            let state2 = state2.clone();
            move |port| {
                Box::new(SharedStatePort {
                    state: state2.clone(),
                    base: BASE2,
                    port,
                })
            }
        });

        for off in 0..LEN {
            let port = BASE2.wrapping_add(off);
            bus.write(port, 4, 0xDEAD_BEEF);
            assert_eq!(bus.read(port, 4), 0xDEAD_BEEF + u32::from(off));
        }
        for off in 0..LEN {
            let port = BASE1.wrapping_add(off);
            assert_eq!(bus.read(port, 4), 0xFFFF_FFFF);
        }

        // Single-port unregister should return the removed device.
        assert!(bus.unregister(BASE2).is_some());
        assert_eq!(bus.read(BASE2, 4), 0xFFFF_FFFF);
        assert_eq!(bus.read(BASE2.wrapping_add(1), 4), 0xDEAD_BEEF + 1);
    }

    #[test]
    fn shared_range_wraps_past_the_top_of_the_port_space() {
        let mut bus = IoPortBus::new();
        let state = Rc::new(RefCell::new(SharedState::default()));
        bus.register_shared_range(0xFFFF, 2, {
            let state = state.clone();
            move |port| {
                Box::new(SharedStatePort {
                    state: state.clone(),
                    base: 0xFFFF,
                    port,
                })
            }
        });

        bus.write(0xFFFF, 4, 0x10);
        assert_eq!(bus.read(0xFFFF, 4), 0x10);
        // The second port wrapped to 0x0000.
        assert_eq!(bus.read(0x0000, 4), 0x11);
    }

    #[test]
    fn invalid_port_io_sizes_float_high_and_are_not_dispatched() {
        let mut bus = IoPortBus::new();

        #[derive(Clone)]
        struct SpyPort {
            state: Rc<RefCell<u32>>,
            port: u16,
        }

        impl PortIoDevice for SpyPort {
            fn read(&mut self, port: u16, size: u8) -> u32 {
                debug_assert_eq!(port, self.port);
                debug_assert_eq!(size, 4);
                *self.state.borrow()
            }

            fn write(&mut self, port: u16, size: u8, value: u32) {
                debug_assert_eq!(port, self.port);
                debug_assert_eq!(size, 4);
                *self.state.borrow_mut() = value;
            }
        }

        let state = Rc::new(RefCell::new(0u32));
        bus.register(
            0x1234,
            Box::new(SpyPort {
                state: state.clone(),
                port: 0x1234,
            }),
        );

        // Invalid-sized writes must be ignored.
        bus.write(0x1234, 3, 0xDEAD_BEEF);
        assert_eq!(*state.borrow(), 0);

        // Invalid-sized reads must float high even when a device is mapped.
        assert_eq!(bus.read(0x1234, 3), 0xFFFF_FFFF);

        // Valid accesses still dispatch.
        bus.write(0x1234, 4, 0x1234_5678);
        assert_eq!(bus.read(0x1234, 4), 0x1234_5678);
    }

    #[test]
    fn port_io_size0_is_noop() {
        #[derive(Debug)]
        struct SpyPort {
            reads: Rc<Cell<u32>>,
            writes: Rc<Cell<u32>>,
        }

        impl PortIoDevice for SpyPort {
            fn read(&mut self, _port: u16, _size: u8) -> u32 {
                self.reads.set(self.reads.get() + 1);
                0x1234_5678
            }

            fn write(&mut self, _port: u16, _size: u8, _value: u32) {
                self.writes.set(self.writes.get() + 1);
            }
        }

        let reads = Rc::new(Cell::new(0u32));
        let writes = Rc::new(Cell::new(0u32));
        let mut bus = IoPortBus::new();
        bus.register(
            0x1234,
            Box::new(SpyPort {
                reads: reads.clone(),
                writes: writes.clone(),
            }),
        );

        assert_eq!(bus.read(0x1234, 0), 0);
        bus.write(0x1234, 0, 0xDEAD_BEEF);
        assert_eq!(reads.get(), 0);
        assert_eq!(writes.get(), 0);

        // Valid access sizes still dispatch.
        assert_eq!(bus.read(0x1234, 4), 0x1234_5678);
        assert_eq!(reads.get(), 1);
    }
}

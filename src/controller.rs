//! Input controllers (§3 MMIO map, `CONTROLLER_BASE`).
//!
//! Unlike the NES's serial shift-register protocol, this console's
//! controller registers are plain bytes: one per port, read-only from
//! the CPU, written once per frame by the host's input poll step.

use crate::memory::MemoryBus;
use crate::registers;

/// Button bitmasks within a controller byte.
pub mod button {
    pub const A: u8 = 0x01;
    pub const B: u8 = 0x02;
    pub const SELECT: u8 = 0x04;
    pub const START: u8 = 0x08;
    pub const UP: u8 = 0x10;
    pub const DOWN: u8 = 0x20;
    pub const LEFT: u8 = 0x40;
    pub const RIGHT: u8 = 0x80;
}

/// Host-side button state for all `CONTROLLER_COUNT` ports, pushed
/// into MMIO by `poll`.
pub struct Controllers {
    state: [u8; registers::CONTROLLER_COUNT],
}

impl Controllers {
    pub fn new() -> Self {
        Controllers { state: [0; registers::CONTROLLER_COUNT] }
    }

    pub fn reset(&mut self) {
        self.state = [0; registers::CONTROLLER_COUNT];
    }

    pub fn set_button(&mut self, port: usize, button_mask: u8, pressed: bool) {
        if port >= registers::CONTROLLER_COUNT {
            return;
        }
        if pressed {
            self.state[port] |= button_mask;
        } else {
            self.state[port] &= !button_mask;
        }
    }

    pub fn set_state(&mut self, port: usize, buttons: u8) {
        if port < registers::CONTROLLER_COUNT {
            self.state[port] = buttons;
        }
    }

    /// Write all port states into their MMIO registers. Called once
    /// per frame by the render actor's input poll step (§4.5).
    pub fn poll(&self, bus: &MemoryBus) {
        for (port, &buttons) in self.state.iter().enumerate() {
            bus.write8((registers::CONTROLLER_BASE + port) as u16, buttons);
        }
    }
}

impl Default for Controllers {
    fn default() -> Self {
        Controllers::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::banked_store::BankedStore;
    use std::sync::Arc;

    #[test]
    fn poll_writes_each_port_to_its_register() {
        let bus = MemoryBus::new(Arc::new(BankedStore::new(0)));
        let mut controllers = Controllers::new();
        controllers.set_button(0, button::A, true);
        controllers.set_button(0, button::RIGHT, true);
        controllers.set_state(2, 0xFF);
        controllers.poll(&bus);

        assert_eq!(bus.read8(registers::CONTROLLER_BASE as u16), button::A | button::RIGHT);
        assert_eq!(bus.read8((registers::CONTROLLER_BASE + 1) as u16), 0);
        assert_eq!(bus.read8((registers::CONTROLLER_BASE + 2) as u16), 0xFF);
    }

    #[test]
    fn set_button_released_clears_only_that_bit() {
        let mut controllers = Controllers::new();
        controllers.set_button(0, button::A | button::B, true);
        controllers.set_button(0, button::A, false);
        let bus = MemoryBus::new(Arc::new(BankedStore::new(0)));
        controllers.poll(&bus);
        assert_eq!(bus.read8(registers::CONTROLLER_BASE as u16), button::B);
    }
}

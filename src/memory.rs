//! CPU-visible 64 KiB memory bus and MMIO write semantics (§4.2).
//!
//! `0x0000-0x7FFF` is lower memory; `0x8000-0xFFFF` is a window onto
//! whichever bank `BANK_REG` currently selects. All 16-bit bus access
//! is big-endian, per spec.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use log::trace;

use crate::banked_store::BankedStore;
use crate::registers;

const UPPER_WINDOW_BASE: u16 = 0x8000;

/// The CPU-visible bus. Cheap to clone: it shares the underlying
/// `BankedStore` via `Arc` but keeps its own bank-selection register,
/// matching how the render actor's bypass reads never care which
/// bank the CPU currently has windowed in.
pub struct MemoryBus {
    store: Arc<BankedStore>,
    current_bank: AtomicU8,
}

impl MemoryBus {
    pub fn new(store: Arc<BankedStore>) -> Self {
        MemoryBus { store, current_bank: AtomicU8::new(0) }
    }

    /// A second handle onto the same backing store with its own
    /// (independent) bank-selection register, for the render actor.
    pub fn clone_shared(&self) -> Self {
        MemoryBus { store: Arc::clone(&self.store), current_bank: AtomicU8::new(0) }
    }

    pub fn store(&self) -> &Arc<BankedStore> {
        &self.store
    }

    pub fn current_bank(&self) -> u8 {
        self.current_bank.load(Ordering::Relaxed)
    }

    /// Read a byte from the CPU's 64 KiB view.
    pub fn read8(&self, addr: u16) -> u8 {
        if addr < UPPER_WINDOW_BASE {
            self.store.lower_read(addr as usize)
        } else {
            let bank = self.current_bank.load(Ordering::Relaxed) as u16;
            self.store.read(bank, (addr - UPPER_WINDOW_BASE) as usize)
        }
    }

    /// Write a byte through the CPU's 64 KiB view, applying MMIO
    /// write-side effects.
    pub fn write8(&self, addr: u16, value: u8) {
        let a = addr as usize;
        match a {
            registers::BANK_REG => {
                self.current_bank.store(value, Ordering::Relaxed);
                self.store.lower_write(a, value);
            }
            registers::INT_STATUS | registers::COLLISION_FLAGS => {
                self.store.lower_clear_bits(a, value);
            }
            registers::SPRITE_OVERFLOW | registers::COLLISION_COUNT => {
                trace!("write to read-only MMIO register ${:04X} ignored", addr);
            }
            _ if addr < UPPER_WINDOW_BASE => {
                self.store.lower_write(a, value);
            }
            _ => {
                let bank = self.current_bank.load(Ordering::Relaxed) as u16;
                self.store.write(bank, a - UPPER_WINDOW_BASE as usize, value);
            }
        }
    }

    /// Big-endian 16-bit read: high byte at the lower address.
    pub fn read16(&self, addr: u16) -> u16 {
        let hi = self.read8(addr);
        let lo = self.read8(addr.wrapping_add(1));
        u16::from_be_bytes([hi, lo])
    }

    /// Big-endian 16-bit write.
    pub fn write16(&self, addr: u16, value: u16) {
        let [hi, lo] = value.to_be_bytes();
        self.write8(addr, hi);
        self.write8(addr.wrapping_add(1), lo);
    }

    /// Bypass of current bank selection, for renderer use.
    pub fn read_from_bank(&self, bank: u8, offset: usize) -> u8 {
        self.store.read(bank as u16, offset)
    }

    /// Write bypassing current bank selection, for the renderer's
    /// framebuffer writes (§4.5/§4.6's dedicated-bank addressing).
    pub fn write_to_bank(&self, bank: u8, offset: usize, value: u8) {
        self.store.write(bank as u16, offset, value);
    }

    /// Reset the bus: zero lower memory, reset RAM, select bank 0.
    /// Cartridge is left mounted.
    pub fn reset(&self) {
        self.store.reset_lower();
        self.store.reset_ram();
        self.current_bank.store(0, Ordering::Relaxed);
    }

    /// `reset()` plus unmounting the cartridge.
    pub fn full_reset(&self) {
        self.reset();
        self.store.unmount();
    }

    /// Test/engine-only escape hatch for pumping bits that are
    /// externally read-only (`SPRITE_OVERFLOW`, `COLLISION_COUNT`)
    /// but legitimately owned by the sprite engine's own finalize
    /// step. See the Open Questions resolution in DESIGN.md.
    pub(crate) fn debug_poke(&self, addr: usize, value: u8) {
        self.store.lower_write(addr, value);
    }

    /// Atomically OR `mask` into a lower-memory flag byte (e.g. the
    /// render actor pulsing VBlank into `INT_STATUS`).
    pub fn set_flag_bits(&self, addr: usize, mask: u8) {
        self.store.lower_fetch_or(addr, mask);
    }

    /// Atomic load of a lower-memory flag byte.
    pub fn load_flag_bits(&self, addr: usize) -> u8 {
        self.store.lower_load_flag(addr)
    }
}

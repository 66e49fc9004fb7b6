//! Banked byte store backing the machine's memory.
//!
//! A single linear array of bytes viewed as 32 KiB "lower memory"
//! followed by four 32 KiB RAM banks and up to 240 32 KiB cartridge
//! ROM banks. `MemoryBus` (see `memory.rs`) layers the CPU-visible
//! 64 KiB address space and MMIO write semantics on top of this.
//!
//! The backing bytes are `AtomicU8` so the store can be shared (via
//! `Arc`) between the CPU actor and the render actor without a lock.
//! Per §5/§9, only a handful of MMIO flag bytes need anything beyond
//! `Relaxed` ordering; those are the bytes `MemoryBus` routes through
//! `fetch_or`/compare-exchange helpers instead of plain loads/stores.

use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use log::{info, warn};

use crate::error::{CoreError, CoreResult};

/// Size of one bank, in bytes.
pub const BANK_SIZE: usize = 32 * 1024;

/// Number of always-present RAM banks (indices 0..3).
pub const RAM_BANK_COUNT: usize = 4;

/// Lower memory size (MMIO + framebuffer + tables).
pub const LOWER_MEMORY_SIZE: usize = BANK_SIZE;

/// `lower memory + RAM banks`; cartridge banks are appended after this.
pub const MIN_SHARED: usize = LOWER_MEMORY_SIZE + RAM_BANK_COUNT * BANK_SIZE;

/// Maximum number of cartridge ROM banks a store can host.
pub const MAX_CARTRIDGE_BANKS: usize = 240;

/// First absolute bank index backed by cartridge ROM.
pub const CARTRIDGE_BANK_BASE: usize = 16;

/// Byte returned for unpopulated banks and out-of-range reads.
pub const UNMAPPED_BYTE: u8 = 0xFF;

/// Owns the backing bytes and enforces the bank map described in §3.
pub struct BankedStore {
    bytes: Vec<AtomicU8>,
    cartridge_bank_count: AtomicUsize,
}

impl BankedStore {
    /// Create a store sized for `cartridge_capacity` ROM banks (up to
    /// [`MAX_CARTRIDGE_BANKS`]). No cartridge is mounted yet.
    pub fn new(cartridge_capacity: usize) -> Self {
        let capacity = cartridge_capacity.min(MAX_CARTRIDGE_BANKS);
        let total = MIN_SHARED + capacity * BANK_SIZE;
        BankedStore {
            bytes: (0..total).map(|_| AtomicU8::new(0)).collect(),
            cartridge_bank_count: AtomicUsize::new(0),
        }
    }

    /// Create a store from a caller-provided total byte budget rather
    /// than a bank count, e.g. when sizing a store to match a host's
    /// memory-mapped file. Fails if `total_bytes` can't even hold lower
    /// memory plus the RAM banks; any excess beyond a whole number of
    /// [`BANK_SIZE`] cartridge banks is dropped.
    pub fn with_total_bytes(total_bytes: usize) -> CoreResult<Self> {
        if total_bytes < MIN_SHARED {
            return Err(CoreError::BufferTooSmall { len: total_bytes, min: MIN_SHARED });
        }
        let cartridge_capacity = (total_bytes - MIN_SHARED) / BANK_SIZE;
        Ok(Self::new(cartridge_capacity))
    }

    /// Number of cartridge banks currently mounted.
    pub fn cartridge_bank_count(&self) -> usize {
        self.cartridge_bank_count.load(Ordering::Relaxed)
    }

    /// Read a byte from `bank` at `offset`. Unpopulated or out-of-range
    /// banks return `0xFF`; never fails. `offset` outside `[0,
    /// BANK_SIZE)` is a programmer error and panics.
    pub fn read(&self, bank: u16, offset: usize) -> u8 {
        assert_offset(offset);
        match self.physical_offset(bank) {
            Some(base) => self.bytes[base + offset].load(Ordering::Relaxed),
            None => UNMAPPED_BYTE,
        }
    }

    /// Write `value` to `bank` at `offset`. Writes to ROM banks and
    /// unpopulated banks are silently dropped; only RAM banks 0..3
    /// accept the write.
    pub fn write(&self, bank: u16, offset: usize, value: u8) {
        assert_offset(offset);
        if (bank as usize) < RAM_BANK_COUNT {
            let base = (bank as usize) * BANK_SIZE + LOWER_MEMORY_SIZE;
            self.bytes[base + offset].store(value, Ordering::Relaxed);
        }
        // ROM and unpopulated banks: write ignored.
    }

    /// Plain load from lower memory (`offset < LOWER_MEMORY_SIZE`).
    pub fn lower_read(&self, offset: usize) -> u8 {
        self.bytes[offset].load(Ordering::Relaxed)
    }

    /// Plain store into lower memory.
    pub fn lower_write(&self, offset: usize, value: u8) {
        self.bytes[offset].store(value, Ordering::Relaxed);
    }

    /// Atomic load of a lower-memory MMIO flag byte.
    pub fn lower_load_flag(&self, offset: usize) -> u8 {
        self.bytes[offset].load(Ordering::Acquire)
    }

    /// Atomically OR `mask` into a lower-memory flag byte (e.g. the
    /// render actor pulsing a bit into `INT_STATUS`). Returns the
    /// previous value.
    pub fn lower_fetch_or(&self, offset: usize, mask: u8) -> u8 {
        self.bytes[offset].fetch_or(mask, Ordering::AcqRel)
    }

    /// Write-1-to-clear a lower-memory flag byte: `byte &= !mask`,
    /// implemented as a compare-exchange loop so a concurrent
    /// `fetch_or` from the other actor is never lost (§5, §9).
    /// Returns the value immediately after clearing.
    pub fn lower_clear_bits(&self, offset: usize, mask: u8) -> u8 {
        let cell = &self.bytes[offset];
        let mut current = cell.load(Ordering::Acquire);
        loop {
            let next = current & !mask;
            match cell.compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => return next,
                Err(observed) => current = observed,
            }
        }
    }

    /// Copy `rom_bytes` into the cartridge region and set the bank
    /// count. Rejects sizes that aren't a positive multiple of
    /// `BANK_SIZE`, more banks than [`MAX_CARTRIDGE_BANKS`], or more
    /// banks than this store has room for.
    pub fn mount(&self, rom_bytes: &[u8]) -> CoreResult<()> {
        let len = rom_bytes.len();
        if len == 0 || len % BANK_SIZE != 0 {
            return Err(CoreError::InvalidRomSize { len, max: MAX_CARTRIDGE_BANKS });
        }
        let bank_count = len / BANK_SIZE;
        if bank_count > MAX_CARTRIDGE_BANKS {
            return Err(CoreError::InvalidRomSize { len, max: MAX_CARTRIDGE_BANKS });
        }
        let capacity_banks = (self.bytes.len() - MIN_SHARED) / BANK_SIZE;
        if bank_count > capacity_banks {
            warn!(
                "rejecting mount: {} banks requested but store only has room for {}",
                bank_count, capacity_banks
            );
            return Err(CoreError::InvalidRomSize { len, max: capacity_banks });
        }

        let cart_start = MIN_SHARED;
        for (i, &b) in rom_bytes.iter().enumerate() {
            self.bytes[cart_start + i].store(b, Ordering::Relaxed);
        }
        self.cartridge_bank_count.store(bank_count, Ordering::Relaxed);
        info!("mounted cartridge: {} bank(s) ({} KiB)", bank_count, len / 1024);
        Ok(())
    }

    /// Unmount the cartridge. Bytes stay in place but the bank map
    /// hides them: reads in the (now-empty) cartridge range fall back
    /// to `0xFF`.
    pub fn unmount(&self) {
        self.cartridge_bank_count.store(0, Ordering::Relaxed);
    }

    /// Zero all RAM banks. Never touches cartridge or lower memory.
    pub fn reset_ram(&self) {
        for cell in &self.bytes[LOWER_MEMORY_SIZE..MIN_SHARED] {
            cell.store(0, Ordering::Relaxed);
        }
    }

    /// Zero lower memory (MMIO, tables, framebuffer).
    pub fn reset_lower(&self) {
        for cell in &self.bytes[0..LOWER_MEMORY_SIZE] {
            cell.store(0, Ordering::Relaxed);
        }
    }

    /// Map an absolute bank index to a physical byte offset, or `None`
    /// if the bank is unpopulated/out of range.
    fn physical_offset(&self, bank: u16) -> Option<usize> {
        let bank = bank as usize;
        if bank < RAM_BANK_COUNT {
            Some(LOWER_MEMORY_SIZE + bank * BANK_SIZE)
        } else if bank < CARTRIDGE_BANK_BASE {
            None
        } else {
            let cart_index = bank - CARTRIDGE_BANK_BASE;
            if cart_index < self.cartridge_bank_count() {
                Some(MIN_SHARED + cart_index * BANK_SIZE)
            } else {
                None
            }
        }
    }
}

fn assert_offset(offset: usize) {
    if offset >= BANK_SIZE {
        panic!(
            "{}",
            CoreError::OutOfRangeBankOffset { offset, bank_size: BANK_SIZE }
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unpopulated_banks_read_ff_and_drop_writes() {
        let store = BankedStore::new(2);
        for bank in 4..=15u16 {
            assert_eq!(store.read(bank, 0), UNMAPPED_BYTE);
            assert_eq!(store.read(bank, BANK_SIZE - 1), UNMAPPED_BYTE);
            store.write(bank, 10, 0x42);
            assert_eq!(store.read(bank, 10), UNMAPPED_BYTE);
        }
    }

    #[test]
    fn unmounted_cartridge_banks_read_ff() {
        let store = BankedStore::new(4);
        assert_eq!(store.read(16, 0), UNMAPPED_BYTE);
        assert_eq!(store.read(19, 100), UNMAPPED_BYTE);
    }

    #[test]
    fn rom_banks_are_read_only() {
        let mut rom = vec![0u8; BANK_SIZE * 2];
        rom[0] = 0xAB;
        rom[BANK_SIZE] = 0xCD;

        let store = BankedStore::new(2);
        store.mount(&rom).unwrap();

        store.write(16, 0, 0x99);
        store.write(17, 0, 0x99);
        assert_eq!(store.read(16, 0), 0xAB);
        assert_eq!(store.read(17, 0), 0xCD);
    }

    #[test]
    fn mount_rejects_bad_size() {
        let store = BankedStore::new(4);
        assert!(store.mount(&[0u8; 100]).is_err());
        assert!(store.mount(&[]).is_err());
    }

    #[test]
    fn mount_rejects_too_many_banks_for_capacity() {
        let store = BankedStore::new(1);
        let rom = vec![0u8; BANK_SIZE * 2];
        assert!(store.mount(&rom).is_err());
    }

    #[test]
    fn with_total_bytes_rejects_buffer_smaller_than_min_shared() {
        let err = BankedStore::with_total_bytes(MIN_SHARED - 1).unwrap_err();
        assert_eq!(err, CoreError::BufferTooSmall { len: MIN_SHARED - 1, min: MIN_SHARED });
    }

    #[test]
    fn with_total_bytes_sizes_cartridge_capacity_from_remainder() {
        let store = BankedStore::with_total_bytes(MIN_SHARED + BANK_SIZE * 3).unwrap();
        let rom = vec![0u8; BANK_SIZE * 3];
        assert!(store.mount(&rom).is_ok());
        let too_big = vec![0u8; BANK_SIZE * 4];
        assert!(BankedStore::with_total_bytes(MIN_SHARED).unwrap().mount(&too_big).is_err());
    }

    #[test]
    fn unmount_hides_bytes_but_does_not_erase_them() {
        let mut rom = vec![0u8; BANK_SIZE];
        rom[5] = 0x7E;
        let store = BankedStore::new(1);
        store.mount(&rom).unwrap();
        assert_eq!(store.read(16, 5), 0x7E);
        store.unmount();
        assert_eq!(store.read(16, 5), UNMAPPED_BYTE);
    }

    #[test]
    fn ram_banks_read_write() {
        let store = BankedStore::new(0);
        store.write(2, 0x100, 0x55);
        assert_eq!(store.read(2, 0x100), 0x55);
        assert_eq!(store.read(0, 0x100), 0);
    }

    #[test]
    fn reset_ram_zeroes_ram_but_not_cartridge() {
        let mut rom = vec![0u8; BANK_SIZE];
        rom[0] = 0x11;
        let store = BankedStore::new(1);
        store.mount(&rom).unwrap();
        store.write(0, 0, 0x22);
        store.reset_ram();
        assert_eq!(store.read(0, 0), 0);
        assert_eq!(store.read(16, 0), 0x11);
    }

    #[test]
    fn write_1_to_clear_preserves_concurrent_set_bits() {
        let store = BankedStore::new(0);
        store.lower_fetch_or(0x114, 0b11);
        // CPU writes 0b01: clear bit 0 only.
        let result = store.lower_clear_bits(0x114, 0b01);
        assert_eq!(result, 0b10);
    }

    #[test]
    #[should_panic]
    fn offset_out_of_range_panics() {
        let store = BankedStore::new(0);
        store.read(0, BANK_SIZE);
    }
}

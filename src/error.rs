//! Error kinds shared across the core.
//!
//! One `thiserror`-derived enum per §7 of the design: mount failures,
//! decode failures, and the debug-only accessor failures. Runtime
//! memory access never raises (unmapped reads return `0xFF`, unmapped
//! writes are dropped) so those paths have no corresponding variant.

use thiserror::Error;

/// Errors surfaced to the host controller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// `BankedStore::mount` rejected a ROM: wrong multiple of
    /// `BANK_SIZE`, or more banks than the store has room for.
    #[error("invalid ROM size: {len} bytes (must be a positive multiple of 32768, at most {max} banks)")]
    InvalidRomSize { len: usize, max: usize },

    /// Unknown opcode or an addressing mode invalid for that opcode.
    /// Fatal to the CPU actor; the faulting PC is recorded.
    #[error("illegal instruction at ${pc:04X}: {detail}")]
    IllegalInstruction { pc: u16, detail: String },

    /// A debug accessor was given an out-of-range register index.
    #[error("illegal register index: {0}")]
    IllegalRegister(u8),

    /// A debug helper was given a bank offset outside `[0, BANK_SIZE)`.
    #[error("bank offset {offset:#06X} out of range (bank size is {bank_size:#06X})")]
    OutOfRangeBankOffset { offset: usize, bank_size: usize },

    /// A caller-supplied buffer was smaller than `MIN_SHARED`, the
    /// minimum size a `BankedStore` needs for lower memory plus its RAM
    /// banks.
    #[error("buffer too small: {len} bytes, need at least {min}")]
    BufferTooSmall { len: usize, min: usize },
}

pub type CoreResult<T> = Result<T, CoreError>;

//! MMIO register addresses in lower memory (§3).
//!
//! Named here once so `memory.rs`, `sprite_engine.rs`, `tilemap.rs` and
//! `frame_pipeline.rs` all agree on the map instead of repeating magic
//! numbers, in the same spirit as the `flags` module in `cpu.rs`.

pub const BANK_REG: usize = 0x0100;
pub const VIDEO_MODE: usize = 0x0101;

pub const SPRITE_ENABLE: usize = 0x0104;
pub const SPRITE_COUNT: usize = 0x0105;
pub const SPRITE_GRAPHICS_BANK: usize = 0x0106;
pub const SPRITE_OVERFLOW: usize = 0x0107;
pub const COLLISION_FLAGS: usize = 0x0108;
pub const COLLISION_COUNT: usize = 0x0109;
pub const COLLISION_MODE: usize = 0x010A;
pub const SPRITE_SCANLINE_LIMIT: usize = 0x010B;

pub const INT_STATUS: usize = 0x0114;
pub const INT_ENABLE: usize = 0x0115;
pub const VBLANK_VEC_HI: usize = 0x0132;
pub const VBLANK_VEC_LO: usize = 0x0133;
pub const SCANLINE_VEC_HI: usize = 0x0134;
pub const SCANLINE_VEC_LO: usize = 0x0135;

pub const CONTROLLER_BASE: usize = 0x0136;
pub const CONTROLLER_COUNT: usize = 4;

pub const TILEMAP_BANK: usize = 0x013D;
pub const TILEMAP_BASE_HI: usize = 0x013E;
pub const TILEMAP_BASE_LO: usize = 0x013F;
pub const TILEMAP_WIDTH: usize = 0x0140;
pub const TILEMAP_HEIGHT: usize = 0x0141;
pub const TILEMAP_SCROLL_X_HI: usize = 0x0142;
pub const TILEMAP_SCROLL_X_LO: usize = 0x0143;
pub const TILEMAP_SCROLL_Y_HI: usize = 0x0144;
pub const TILEMAP_SCROLL_Y_LO: usize = 0x0145;

pub const PALETTE_RAM_BASE: usize = 0x0200;
pub const PALETTE_RAM_END: usize = 0x0600;
pub const SCANLINE_PALETTE_SELECTOR_BASE: usize = 0x0600;

pub const SPRITE_ATTR_TABLE_BASE: usize = 0x0700;
pub const SPRITE_ATTR_STRIDE: usize = 5;
pub const SPRITE_ATTR_MAX: usize = 128;

pub const COLLISION_RING_BASE: usize = 0x0980;
pub const COLLISION_RING_STRIDE: usize = 3;
pub const COLLISION_RING_MAX: usize = 85;

pub const TILE_PROPERTIES_BASE: usize = 0x0A80;
pub const TILE_SOLID_BIT: u8 = 0x80;

/// CPU bus address of the framebuffer when `FRAMEBUFFER_BANK` is the
/// selected upper-window bank.
pub const FRAMEBUFFER_BASE: usize = 0xB000;

/// The framebuffer lives in the upper window (bank-switched), not
/// lower memory, so the renderer addresses it directly by bank rather
/// than through whichever bank the CPU currently has selected (the
/// same convention sprite/tile bitmaps use). See `DESIGN.md`.
pub const FRAMEBUFFER_BANK: u8 = 0;
pub const FRAMEBUFFER_BANK_OFFSET: usize = FRAMEBUFFER_BASE - 0x8000;

/// Interrupt bits within `INT_STATUS`/`INT_ENABLE`.
pub mod int_bit {
    pub const VBLANK: u8 = 0x01;
    pub const SCANLINE: u8 = 0x02;
}

/// Bits within `COLLISION_FLAGS`/`COLLISION_MODE`.
pub mod collision_bit {
    pub const SPRITE_SPRITE: u8 = 0x01;
    pub const SPRITE_TILE: u8 = 0x02;
    pub const PIXEL_PERFECT: u8 = 0x04;
}

/// Side mask bits within a collision record's `typeFlags` low nibble.
pub mod collision_side {
    pub const TOP: u8 = 0x8;
    pub const BOTTOM: u8 = 0x4;
    pub const LEFT: u8 = 0x2;
    pub const RIGHT: u8 = 0x1;
}

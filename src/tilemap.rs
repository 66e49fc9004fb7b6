//! Concrete `TilemapEngine` (§4.6, §6 collaborator contract).
//!
//! This engine's contract (`renderScanline`, `getTileAt`) is the part
//! that matters to its caller; the internals below are one concrete
//! way to satisfy it: a scrollable plane of 16x16,
//! 4bpp tiles read out of a dedicated cartridge bank, addressed the
//! same way sprite bitmaps are.

use crate::memory::MemoryBus;
use crate::registers;

pub(crate) const TILE_SIZE: u16 = 16;
const TILE_ENTRY_BYTES: u16 = 2;
const BITMAP_BYTES_PER_TILE: usize = 128;
const BITMAP_BYTES_PER_ROW: usize = 8;

/// A decoded tile entry (§3): index into the graphics bank plus
/// flip/priority/palette/bank-offset attribute bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileEntry {
    pub tile_index: u8,
    pub attributes: u8,
}

impl TileEntry {
    pub fn flip_h(&self) -> bool {
        self.attributes & 0x80 != 0
    }
    pub fn flip_v(&self) -> bool {
        self.attributes & 0x40 != 0
    }
    pub fn priority(&self) -> bool {
        self.attributes & 0x20 != 0
    }
    pub fn palette(&self) -> u8 {
        (self.attributes >> 3) & 0x3
    }
    pub fn bank_offset(&self) -> u8 {
        self.attributes & 0x3
    }
}

/// Reads tile data out of the cartridge bank named by `TILEMAP_BANK`;
/// carries no per-frame mutable state of its own.
pub struct TilemapEngine;

impl TilemapEngine {
    pub fn new() -> Self {
        TilemapEngine
    }

    /// No-op placeholder for symmetry with `SpriteEngine::reset_frame`.
    pub fn reset_frame(&mut self) {}

    fn width(&self, bus: &MemoryBus) -> u16 {
        bus.read8(registers::TILEMAP_WIDTH as u16).max(1) as u16
    }

    fn height(&self, bus: &MemoryBus) -> u16 {
        bus.read8(registers::TILEMAP_HEIGHT as u16).max(1) as u16
    }

    fn scroll_x(&self, bus: &MemoryBus) -> u16 {
        bus.read16(registers::TILEMAP_SCROLL_X_HI as u16)
    }

    fn scroll_y(&self, bus: &MemoryBus) -> u16 {
        bus.read16(registers::TILEMAP_SCROLL_Y_HI as u16)
    }

    fn tile_base_bank(&self, bus: &MemoryBus) -> u8 {
        bus.read8(registers::TILEMAP_BANK as u16)
    }

    /// Bank-relative offset (`[0, BANK_SIZE)`) of the tile table's
    /// first entry, matching the way sprite bitmaps are addressed
    /// (`readFromBank(bank, idx*128 + ...)`, never a full bus address).
    fn tile_table_offset(&self, bus: &MemoryBus) -> u16 {
        bus.read16(registers::TILEMAP_BASE_HI as u16)
    }

    /// Fetch the tile entry covering world pixel `(world_x, world_y)`,
    /// wrapping at the map edges (a scrolling plane has no hard edge).
    pub fn get_tile_at(&self, bus: &MemoryBus, world_x: u32, world_y: u32) -> Option<TileEntry> {
        let width = self.width(bus) as u32;
        let height = self.height(bus) as u32;
        let tile_x = (world_x / TILE_SIZE as u32) % width;
        let tile_y = (world_y / TILE_SIZE as u32) % height;
        let table = self.tile_table_offset(bus);
        let entry_offset = table.wrapping_add(((tile_y * width + tile_x) * TILE_ENTRY_BYTES as u32) as u16);
        let bank = self.tile_base_bank(bus);
        let tile_index = bus.read_from_bank(bank, entry_offset as usize);
        let attributes = bus.read_from_bank(bank, entry_offset as usize + 1);
        Some(TileEntry { tile_index, attributes })
    }

    /// Render one scanline of `width` pixels (master-palette indices,
    /// 0 = transparent), honoring horizontal/vertical scroll and each
    /// tile's flip/palette attribute bits.
    pub fn render_scanline(&mut self, bus: &MemoryBus, y: u16, width: usize) -> Vec<u8> {
        let scroll_x = self.scroll_x(bus);
        let scroll_y = self.scroll_y(bus);
        let world_y = y as u32 + scroll_y as u32;
        let bank = self.tile_base_bank(bus);

        let mut line = vec![0u8; width];
        for screen_x in 0..width {
            let world_x = screen_x as u32 + scroll_x as u32;
            let Some(tile) = self.get_tile_at(bus, world_x, world_y) else {
                continue;
            };

            let tile_row = (world_y % TILE_SIZE as u32) as u8;
            let row = if tile.flip_v() { 15 - tile_row } else { tile_row };
            let tile_col = (world_x % TILE_SIZE as u32) as u8;
            let col = if tile.flip_h() { 15 - tile_col } else { tile_col };

            let row_base = tile.tile_index as usize * BITMAP_BYTES_PER_TILE + row as usize * BITMAP_BYTES_PER_ROW;
            let byte = bus.read_from_bank(bank + tile.bank_offset(), row_base + (col / 2) as usize);
            let nibble = if col % 2 == 0 { byte >> 4 } else { byte & 0xF };
            if nibble == 0 {
                continue;
            }
            line[screen_x] = nibble + tile.palette() * 16;
        }
        line
    }
}

impl Default for TilemapEngine {
    fn default() -> Self {
        TilemapEngine::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::banked_store::BankedStore;
    use std::sync::Arc;

    fn new_bus() -> MemoryBus {
        MemoryBus::new(Arc::new(BankedStore::new(0)))
    }

    fn write_tile_entry(bus: &MemoryBus, bank: u8, table_offset: u16, x: u16, y: u16, width: u16, tile_index: u8, attrs: u8) {
        let offset = table_offset + (y * width + x) * 2;
        bus.write8(registers::BANK_REG as u16, bank);
        bus.write8(0x8000 + offset, tile_index);
        bus.write8(0x8000 + offset + 1, attrs);
    }

    fn setup(bus: &MemoryBus, bank: u8, table_offset: u16, width: u8, height: u8) {
        bus.write8(registers::TILEMAP_BANK as u16, bank);
        bus.write16(registers::TILEMAP_BASE_HI as u16, table_offset);
        bus.write8(registers::TILEMAP_WIDTH as u16, width);
        bus.write8(registers::TILEMAP_HEIGHT as u16, height);
    }

    #[test]
    fn get_tile_at_wraps_at_map_edges() {
        let bus = new_bus();
        setup(&bus, 0, 0x0000, 4, 4);
        write_tile_entry(&bus, 0, 0x0000, 0, 0, 4, 7, 0);

        let tilemap = TilemapEngine::new();
        let wrapped = tilemap.get_tile_at(&bus, 4 * 16, 4 * 16).unwrap();
        assert_eq!(wrapped.tile_index, 7);
    }

    #[test]
    fn render_scanline_is_transparent_with_no_pattern_data() {
        let bus = new_bus();
        setup(&bus, 0, 0x0000, 4, 4);
        write_tile_entry(&bus, 0, 0x0000, 0, 0, 4, 0, 0);

        let mut tilemap = TilemapEngine::new();
        let line = tilemap.render_scanline(&bus, 0, 32);
        assert!(line.iter().all(|&p| p == 0));
    }

    #[test]
    fn render_scanline_respects_horizontal_scroll() {
        let bus = new_bus();
        setup(&bus, 0, 0x0000, 4, 4);
        bus.write16(registers::TILEMAP_SCROLL_X_HI as u16, 16);
        write_tile_entry(&bus, 0, 0x0000, 1, 0, 4, 3, 0);

        let tilemap = TilemapEngine::new();
        // With scroll_x=16, screen x=0 maps to world x=16, which is tile (1,0).
        let tile = tilemap.get_tile_at(&bus, 16, 0).unwrap();
        assert_eq!(tile.tile_index, 3);
    }
}

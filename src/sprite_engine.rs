//! Scanline sprite engine (§4.4).
//!
//! Two passes per line, deliberately kept separate (§9): `evaluate`
//! walks sprite ids ascending so the first `limit` sprites on a line
//! win ("first N win the line"); `composite` walks the surviving list
//! descending so lower ids paint last and therefore win ties. Collapsing
//! these into one pass would change overflow and tie-break behavior.

use crate::memory::MemoryBus;
use crate::registers::{self, collision_bit, collision_side};
use crate::tilemap::TilemapEngine;

const SPRITE_WIDTH: u8 = 16;
const SPRITE_HEIGHT: u16 = 16;
const BITMAP_BYTES_PER_ROW: usize = 8;
const BITMAP_BYTES_PER_SPRITE: usize = 128;

#[derive(Debug, Clone, Copy)]
struct SpriteAttribute {
    x: u8,
    y: u8,
    idx: u8,
    flags: u8,
    bank: u8,
}

impl SpriteAttribute {
    fn flip_h(&self) -> bool {
        self.flags & 0x80 != 0
    }
    fn flip_v(&self) -> bool {
        self.flags & 0x40 != 0
    }
    fn behind_bg(&self) -> bool {
        self.flags & 0x20 != 0
    }
    fn palette_offset(&self) -> u8 {
        (self.flags >> 3) & 0x3
    }
}

struct ActiveSprite {
    id: u8,
    attr: SpriteAttribute,
    row: [u8; BITMAP_BYTES_PER_ROW],
}

#[derive(Debug, Clone, Copy)]
struct CollisionRecord {
    sprite_id: u8,
    data: u8,
    type_flags: u8,
}

/// Per-frame sprite evaluation, compositing, and collision bookkeeping.
/// Holds no pixel data across frames; the line buffers it produces are
/// consumed by `FramePipeline` as it composites each scanline.
pub struct SpriteEngine {
    collisions: Vec<CollisionRecord>,
    overflow: bool,
}

impl SpriteEngine {
    pub fn new() -> Self {
        SpriteEngine { collisions: Vec::with_capacity(registers::COLLISION_RING_MAX), overflow: false }
    }

    /// Clear per-frame state: collision ring, overflow flag, and the
    /// CPU-visible read-only mirrors of both.
    pub fn reset_frame(&mut self, bus: &MemoryBus) {
        self.collisions.clear();
        self.overflow = false;
        bus.write8(registers::COLLISION_FLAGS as u16, 0xFF);
        bus.debug_poke(registers::COLLISION_COUNT, 0);
        bus.debug_poke(registers::SPRITE_OVERFLOW, 0);
    }

    /// Render one scanline of `width` pixels (master-palette indices,
    /// 0 = transparent). `background` is the tilemap/framebuffer line
    /// already composited underneath, consulted only for `behindBG`
    /// sprites; `None` is treated as fully transparent background.
    pub fn render_scanline(&mut self, bus: &MemoryBus, y: u8, width: usize, background: Option<&[u8]>) -> Vec<u8> {
        if bus.read8(registers::SPRITE_ENABLE as u16) & 0x1 == 0 {
            return vec![0u8; width];
        }

        let sprite_count = bus.read8(registers::SPRITE_COUNT as u16).min(128);
        let raw_limit = bus.read8(registers::SPRITE_SCANLINE_LIMIT as u16);
        let limit = if raw_limit == 0 { 8 } else { raw_limit.min(16) } as usize;

        let mode = bus.read8(registers::COLLISION_MODE as u16);
        let pixel_perfect_ss = mode & collision_bit::SPRITE_SPRITE != 0 && mode & collision_bit::PIXEL_PERFECT != 0;

        let active = self.evaluate(bus, y, sprite_count, limit);
        self.composite(&active, width, background, pixel_perfect_ss)
    }

    fn evaluate(&mut self, bus: &MemoryBus, y: u8, sprite_count: u8, limit: usize) -> Vec<ActiveSprite> {
        let mut active = Vec::with_capacity(limit);
        for id in 0..sprite_count {
            let attr = self.read_attribute(bus, id);
            let y16 = y as u16;
            let sprite_top = attr.y as u16;
            if y16 < sprite_top || y16 >= sprite_top + SPRITE_HEIGHT {
                continue;
            }
            // This candidate is on the line; if the list is already
            // full it's the overflow sprite, not one of the limit
            // winners, so it doesn't get appended either.
            if active.len() == limit {
                self.overflow = true;
                break;
            }
            let mut row = (y16 - sprite_top) as u8;
            if attr.flip_v() {
                row = 15 - row;
            }
            let row_base = attr.idx as usize * BITMAP_BYTES_PER_SPRITE + row as usize * BITMAP_BYTES_PER_ROW;
            let mut bytes = [0u8; BITMAP_BYTES_PER_ROW];
            for (i, b) in bytes.iter_mut().enumerate() {
                *b = bus.read_from_bank(attr.bank, row_base + i);
            }
            active.push(ActiveSprite { id, attr, row: bytes });
        }
        active
    }

    fn composite(&mut self, active: &[ActiveSprite], width: usize, background: Option<&[u8]>, record_ss_collisions: bool) -> Vec<u8> {
        let mut line = vec![0u8; width];
        let mut owner: Vec<Option<u8>> = vec![None; width];

        for sprite in active.iter().rev() {
            for cx in 0..SPRITE_WIDTH {
                let sx = sprite.attr.x as u16 + cx as u16;
                if sx as usize >= width {
                    continue;
                }
                let source_col = if sprite.attr.flip_h() { 15 - cx } else { cx };
                let byte = sprite.row[(source_col / 2) as usize];
                let nibble = if source_col % 2 == 0 { byte >> 4 } else { byte & 0xF };
                if nibble == 0 {
                    continue;
                }
                if sprite.attr.behind_bg() {
                    if let Some(bg) = background {
                        if bg[sx as usize] != 0 {
                            continue;
                        }
                    }
                }
                let sx = sx as usize;
                if record_ss_collisions {
                    if let Some(existing) = owner[sx] {
                        if existing != sprite.id {
                            self.record_ss_collision(existing, sprite.id);
                        }
                    }
                }
                line[sx] = nibble + sprite.attr.palette_offset() * 16;
                owner[sx] = Some(sprite.id);
            }
        }
        line
    }

    /// Alternative to pixel-perfect compositing collisions: one pass
    /// over all `i < j` sprite pairs checking 16x16 AABB overlap.
    /// Called by the pipeline when `COLLISION_MODE` selects it.
    pub fn detect_bounding_box_collisions(&mut self, bus: &MemoryBus, sprite_count: u8) {
        let attrs: Vec<SpriteAttribute> = (0..sprite_count).map(|id| self.read_attribute(bus, id)).collect();
        for i in 0..attrs.len() {
            for j in (i + 1)..attrs.len() {
                if aabb_overlap(&attrs[i], &attrs[j]) {
                    self.record_ss_collision(i as u8, j as u8);
                }
            }
        }
    }

    /// Consult the tilemap and the tile-properties table at
    /// `TILE_PROPERTIES_BASE` for every sprite this frame, recording a
    /// sprite-tile collision against the first solid tile each
    /// sprite's bounding box overlaps. Called once per frame by the
    /// pipeline; a no-op unless `COLLISION_MODE` bit 1 is set (checked
    /// again in `record_tile_collision`).
    pub fn detect_tile_collisions(&mut self, bus: &MemoryBus, tilemap: &TilemapEngine, sprite_count: u8) {
        let mode = bus.read8(registers::COLLISION_MODE as u16);
        if mode & collision_bit::SPRITE_TILE == 0 {
            return;
        }
        let tile_size = crate::tilemap::TILE_SIZE as i32;
        for id in 0..sprite_count {
            let attr = self.read_attribute(bus, id);
            let (sx, sy) = (attr.x as i32, attr.y as i32);
            let (sw, sh) = (SPRITE_WIDTH as i32, SPRITE_HEIGHT as i32);
            let tile_x0 = sx.div_euclid(tile_size);
            let tile_x1 = (sx + sw - 1).div_euclid(tile_size);
            let tile_y0 = sy.div_euclid(tile_size);
            let tile_y1 = (sy + sh - 1).div_euclid(tile_size);

            'tiles: for ty in tile_y0..=tile_y1 {
                for tx in tile_x0..=tile_x1 {
                    if tx < 0 || ty < 0 {
                        continue;
                    }
                    let world_x = (tx * tile_size) as u32;
                    let world_y = (ty * tile_size) as u32;
                    let Some(tile) = tilemap.get_tile_at(bus, world_x, world_y) else { continue };
                    let solid = bus.read8((registers::TILE_PROPERTIES_BASE + tile.tile_index as usize) as u16) & registers::TILE_SOLID_BIT != 0;
                    if !solid {
                        continue;
                    }
                    let side = calculate_collision_side(sx, sy, sw, sh, tx * tile_size, ty * tile_size, tile_size, tile_size);
                    self.record_tile_collision(bus, id, tile.tile_index, side);
                    break 'tiles;
                }
            }
        }
    }

    fn record_ss_collision(&mut self, i: u8, j: u8) {
        if self.collisions.len() >= registers::COLLISION_RING_MAX {
            return;
        }
        let (lo, hi) = if i < j { (i, j) } else { (j, i) };
        let already = self
            .collisions
            .iter()
            .any(|c| c.type_flags & 0x80 == 0 && c.sprite_id == lo && c.data == hi);
        if already {
            return;
        }
        self.collisions.push(CollisionRecord { sprite_id: lo, data: hi, type_flags: 0 });
    }

    /// Called by the pipeline after consulting the tilemap and the
    /// tile-properties table at `TILE_PROPERTIES_BASE`. Only records
    /// when `COLLISION_MODE` bit 1 (sprite-tile) is set.
    pub fn record_tile_collision(&mut self, bus: &MemoryBus, sprite_id: u8, tile_type: u8, sides: u8) {
        let mode = bus.read8(registers::COLLISION_MODE as u16);
        if mode & collision_bit::SPRITE_TILE == 0 {
            return;
        }
        if self.collisions.len() >= registers::COLLISION_RING_MAX {
            return;
        }
        self.collisions.push(CollisionRecord { sprite_id, data: tile_type, type_flags: 0x80 | (sides & 0xF) });
    }

    /// Write accumulated per-frame results to the CPU-visible MMIO
    /// surface: overflow flag, collision ring, count, and flag bits.
    pub fn finalize_frame(&mut self, bus: &MemoryBus) {
        bus.debug_poke(registers::SPRITE_OVERFLOW, self.overflow as u8);

        let count = self.collisions.len().min(registers::COLLISION_RING_MAX);
        for (i, rec) in self.collisions.iter().take(registers::COLLISION_RING_MAX).enumerate() {
            let base = registers::COLLISION_RING_BASE + i * registers::COLLISION_RING_STRIDE;
            bus.debug_poke(base, rec.sprite_id);
            bus.debug_poke(base + 1, rec.data);
            bus.debug_poke(base + 2, rec.type_flags);
        }
        bus.debug_poke(registers::COLLISION_COUNT, count as u8);

        let mut flag_bits = 0u8;
        if self.collisions.iter().any(|c| c.type_flags & 0x80 == 0) {
            flag_bits |= collision_bit::SPRITE_SPRITE;
        }
        if self.collisions.iter().any(|c| c.type_flags & 0x80 != 0) {
            flag_bits |= collision_bit::SPRITE_TILE;
        }
        if flag_bits != 0 {
            bus.set_flag_bits(registers::COLLISION_FLAGS, flag_bits);
        }
    }

    fn read_attribute(&self, bus: &MemoryBus, id: u8) -> SpriteAttribute {
        let base = registers::SPRITE_ATTR_TABLE_BASE + id as usize * registers::SPRITE_ATTR_STRIDE;
        SpriteAttribute {
            x: bus.read8(base as u16),
            y: bus.read8(base as u16 + 1),
            idx: bus.read8(base as u16 + 2),
            flags: bus.read8(base as u16 + 3),
            bank: bus.read8(base as u16 + 4),
        }
    }
}

impl Default for SpriteEngine {
    fn default() -> Self {
        SpriteEngine::new()
    }
}

fn aabb_overlap(a: &SpriteAttribute, b: &SpriteAttribute) -> bool {
    let (ax0, ay0) = (a.x as i32, a.y as i32);
    let (ax1, ay1) = (ax0 + SPRITE_WIDTH as i32, ay0 + SPRITE_HEIGHT as i32);
    let (bx0, by0) = (b.x as i32, b.y as i32);
    let (bx1, by1) = (bx0 + SPRITE_WIDTH as i32, by0 + SPRITE_HEIGHT as i32);
    ax0 < bx1 && bx0 < ax1 && ay0 < by1 && by0 < ay1
}

/// Which side of the tile rect `(sx,sy,sw,sh)` overlaps
/// `(tx,ty,tw,th)` from. Compares horizontal vs. vertical overlap
/// depth and prefers a vertical side (top/bottom) on an exact tie.
fn calculate_collision_side(sx: i32, sy: i32, sw: i32, sh: i32, tx: i32, ty: i32, tw: i32, th: i32) -> u8 {
    let overlap_x = (sx + sw).min(tx + tw) - sx.max(tx);
    let overlap_y = (sy + sh).min(ty + th) - sy.max(ty);
    if overlap_y <= overlap_x {
        if sy + sh / 2 < ty + th / 2 {
            collision_side::TOP
        } else {
            collision_side::BOTTOM
        }
    } else if sx + sw / 2 < tx + tw / 2 {
        collision_side::LEFT
    } else {
        collision_side::RIGHT
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

    fn write_attr(bus: &MemoryBus, id: u8, x: u8, y: u8, idx: u8, flags: u8, bank: u8) {
        let base = registers::SPRITE_ATTR_TABLE_BASE as u16 + id as u16 * registers::SPRITE_ATTR_STRIDE as u16;
        bus.write8(base, x);
        bus.write8(base + 1, y);
        bus.write8(base + 2, idx);
        bus.write8(base + 3, flags);
        bus.write8(base + 4, bank);
    }

    fn opaque_pattern(bus: &MemoryBus, bank: u8, idx: u8) {
        // Every nibble of every row set to 0xF so the sprite is fully opaque.
        for row in 0..16u16 {
            for i in 0..8u16 {
                let offset = idx as usize * BITMAP_BYTES_PER_SPRITE + row as usize * 8 + i as usize;
                bus.write8(0x8000 + offset as u16, 0xFF);
            }
        }
        let _ = bank;
    }

    fn setup_sprite_enable(bus: &MemoryBus, count: u8) {
        bus.write8(registers::SPRITE_ENABLE as u16, 0x1);
        bus.write8(registers::SPRITE_COUNT as u16, count);
    }

    #[test]
    fn scanline_overflow_caps_active_list_and_sets_flag() {
        let bus = new_bus();
        bus.write8(registers::BANK_REG as u16, 0);
        setup_sprite_enable(&bus, 12);
        bus.write8(registers::SPRITE_SCANLINE_LIMIT as u16, 8);
        opaque_pattern(&bus, 0, 0);
        for id in 0..12 {
            write_attr(&bus, id, id * 4, 50, 0, 0, 0);
        }

        let mut engine = SpriteEngine::new();
        engine.reset_frame(&bus);
        let active = engine.evaluate(&bus, 55, 12, 8);
        assert_eq!(active.len(), 8);
        assert!(engine.overflow);

        engine.finalize_frame(&bus);
        assert_eq!(bus.read8(registers::SPRITE_OVERFLOW as u16), 1);
    }

    #[test]
    fn exact_limit_sprites_on_line_does_not_set_overflow() {
        let bus = new_bus();
        bus.write8(registers::BANK_REG as u16, 0);
        setup_sprite_enable(&bus, 8);
        bus.write8(registers::SPRITE_SCANLINE_LIMIT as u16, 8);
        opaque_pattern(&bus, 0, 0);
        for id in 0..8 {
            write_attr(&bus, id, id * 4, 50, 0, 0, 0);
        }

        let mut engine = SpriteEngine::new();
        engine.reset_frame(&bus);
        let active = engine.evaluate(&bus, 55, 8, 8);
        assert_eq!(active.len(), 8);
        assert!(!engine.overflow);

        engine.finalize_frame(&bus);
        assert_eq!(bus.read8(registers::SPRITE_OVERFLOW as u16), 0);
    }

    #[test]
    fn ss_collision_records_lower_id_first() {
        let bus = new_bus();
        bus.write8(registers::BANK_REG as u16, 0);
        setup_sprite_enable(&bus, 8);
        bus.write8(registers::SPRITE_SCANLINE_LIMIT as u16, 8);
        opaque_pattern(&bus, 0, 0);
        write_attr(&bus, 3, 10, 20, 0, 0, 0);
        write_attr(&bus, 7, 12, 20, 0, 0, 0);

        let mut engine = SpriteEngine::new();
        engine.reset_frame(&bus);
        let active = engine.evaluate(&bus, 20, 8, 8);
        // Sprites 0..2 and 4..6 are absent from the scanline (y mismatch
        // handled by evaluate's range check against unset attrs at y=0).
        let overlapping: Vec<_> = active.into_iter().filter(|s| s.attr.y == 20).collect();
        assert_eq!(overlapping.len(), 2);
        engine.composite(&overlapping, 32, None, true);
        engine.finalize_frame(&bus);

        assert_eq!(bus.read8(registers::COLLISION_COUNT as u16), 1);
        assert_eq!(bus.read8(registers::COLLISION_FLAGS as u16) & collision_bit::SPRITE_SPRITE, collision_bit::SPRITE_SPRITE);
        let base = registers::COLLISION_RING_BASE as u16;
        assert_eq!(bus.read8(base), 3);
        assert_eq!(bus.read8(base + 1), 7);
        assert_eq!(bus.read8(base + 2), 0);
    }

    #[test]
    fn disabled_sprites_produce_transparent_line() {
        let bus = new_bus();
        bus.write8(registers::SPRITE_ENABLE as u16, 0);
        let mut engine = SpriteEngine::new();
        let line = engine.render_scanline(&bus, 10, 64, None);
        assert!(line.iter().all(|&p| p == 0));
    }

    #[test]
    fn tile_collision_only_recorded_when_mode_bit_set() {
        let bus = new_bus();
        let mut engine = SpriteEngine::new();
        engine.record_tile_collision(&bus, 2, 5, collision_bit::SPRITE_SPRITE);
        assert_eq!(engine.collisions.len(), 0);

        bus.write8(registers::COLLISION_MODE as u16, collision_bit::SPRITE_TILE);
        engine.record_tile_collision(&bus, 2, 5, 0x8);
        assert_eq!(engine.collisions.len(), 1);
        assert_eq!(engine.collisions[0].type_flags, 0x88);
    }

    #[test]
    fn detect_tile_collisions_records_against_overlapping_solid_tile() {
        let bus = new_bus();
        bus.write8(registers::COLLISION_MODE as u16, collision_bit::SPRITE_TILE);
        bus.write8(registers::TILEMAP_BANK as u16, 0);
        bus.write16(registers::TILEMAP_BASE_HI as u16, 0x0000);
        bus.write8(registers::TILEMAP_WIDTH as u16, 4);
        bus.write8(registers::TILEMAP_HEIGHT as u16, 4);
        bus.write8(registers::BANK_REG as u16, 0);
        bus.write8(0x8000, 2); // tile_index
        bus.write8(0x8001, 0); // attributes
        bus.write8((registers::TILE_PROPERTIES_BASE + 2) as u16, registers::TILE_SOLID_BIT);

        write_attr(&bus, 0, 0, 0, 0, 0, 0);

        let mut engine = SpriteEngine::new();
        let tilemap = TilemapEngine::new();
        engine.detect_tile_collisions(&bus, &tilemap, 1);

        assert_eq!(engine.collisions.len(), 1);
        assert_eq!(engine.collisions[0].sprite_id, 0);
        assert_eq!(engine.collisions[0].data, 2);
        // Sprite and tile are exactly coincident (16x16 vs 16x16): overlap
        // on both axes ties, and the center-y comparison picks BOTTOM.
        assert_eq!(engine.collisions[0].type_flags, 0x80 | collision_side::BOTTOM);
    }

    #[test]
    fn ss_dedup_drops_repeated_pair() {
        let mut engine = SpriteEngine::new();
        engine.record_ss_collision(3, 7);
        engine.record_ss_collision(7, 3);
        assert_eq!(engine.collisions.len(), 1);
    }
}

//! 60 Hz frame coordinator (§4.5).
//!
//! Ties `SpriteEngine` and `TilemapEngine` together into one composited
//! scanline per tick, pulses VBlank, and polls input. Visibility and
//! cooperative-stop are `Arc<AtomicBool>` so the host controller can
//! flip them from another thread without the render actor needing a
//! lock (§5).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::controller::Controllers;
use crate::memory::MemoryBus;
use crate::registers::{self, collision_bit};
use crate::sprite_engine::SpriteEngine;
use crate::tilemap::TilemapEngine;

/// Mode 0 framebuffer dimensions (§3).
pub const FRAME_WIDTH: usize = 256;
pub const FRAME_HEIGHT: usize = 160;

const FRAME_BUDGET: Duration = Duration::from_micros(1_000_000 / 60);

/// Coordinates one frame's worth of work: sprite/tilemap compositing,
/// VBlank pulse, and input poll. Runs on the render actor's thread.
pub struct FramePipeline {
    sprite_engine: SpriteEngine,
    tilemap_engine: TilemapEngine,
    controllers: Controllers,
    visible: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    frame_counter: u64,
    last_frame_overran: bool,
}

impl FramePipeline {
    pub fn new(visible: Arc<AtomicBool>, stop: Arc<AtomicBool>) -> Self {
        FramePipeline {
            sprite_engine: SpriteEngine::new(),
            tilemap_engine: TilemapEngine::new(),
            controllers: Controllers::new(),
            visible,
            stop,
            frame_counter: 0,
            last_frame_overran: false,
        }
    }

    pub fn controllers_mut(&mut self) -> &mut Controllers {
        &mut self.controllers
    }

    /// Cooperative cancellation: prevents scheduling the next frame.
    /// Any frame already in progress (this call) still runs to
    /// completion.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    pub fn should_stop(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    pub fn set_visible(&self, visible: bool) {
        self.visible.store(visible, Ordering::Relaxed);
    }

    pub fn frame_counter(&self) -> u64 {
        self.frame_counter
    }

    /// Run exactly one frame: reset, per-scanline composite, collision
    /// detection, finalize, input poll, VBlank pulse. Whether a frame
    /// overran its budget can only be known after it finishes, so
    /// backpressure applies one frame late: it's the frame *after* an
    /// overrun that skips GPU work, never the overrunning frame itself.
    /// VBlank pulse and input poll always run regardless, so CPU timing
    /// stays consistent even while GPU work is being skipped.
    pub fn run_frame(&mut self, bus: &MemoryBus) {
        let start = Instant::now();
        let visible = self.visible.load(Ordering::Relaxed);

        if visible && !self.last_frame_overran {
            self.sprite_engine.reset_frame(bus);
            self.tilemap_engine.reset_frame();
            for y in 0..FRAME_HEIGHT {
                let tile_line = self.tilemap_engine.render_scanline(bus, y as u16, FRAME_WIDTH);
                let sprite_line = self.sprite_engine.render_scanline(bus, y as u8, FRAME_WIDTH, Some(&tile_line));
                composite_scanline(bus, y, &sprite_line, &tile_line);
            }

            let sprite_count = bus.read8(registers::SPRITE_COUNT as u16).min(128);
            let mode = bus.read8(registers::COLLISION_MODE as u16);
            if mode & collision_bit::SPRITE_SPRITE != 0 && mode & collision_bit::PIXEL_PERFECT == 0 {
                self.sprite_engine.detect_bounding_box_collisions(bus, sprite_count);
            }
            self.sprite_engine.detect_tile_collisions(bus, &self.tilemap_engine, sprite_count);

            self.sprite_engine.finalize_frame(bus);
        } else if visible {
            debug!("frame {} skipping GPU work: previous frame overran budget", self.frame_counter + 1);
        }

        self.controllers.poll(bus);
        bus.set_flag_bits(registers::INT_STATUS, registers::int_bit::VBLANK);

        self.frame_counter += 1;
        let elapsed = start.elapsed();
        self.last_frame_overran = elapsed > FRAME_BUDGET;
        if self.last_frame_overran {
            warn!("frame {} overran budget: {:?} (budget {:?})", self.frame_counter, elapsed, FRAME_BUDGET);
        }
        debug!("frame {} composited in {:?}", self.frame_counter, elapsed);
    }
}

/// Merge one scanline into the framebuffer: sprite pixel wins if
/// non-zero, else tilemap pixel, else whatever was already there
/// (§4.5 priority rule). Two 4-bit pixels are packed per byte, high
/// nibble first. The framebuffer lives in `FRAMEBUFFER_BANK`,
/// addressed directly rather than through the CPU's current bank
/// selection (see `registers::FRAMEBUFFER_BANK`).
fn composite_scanline(bus: &MemoryBus, y: usize, sprite_line: &[u8], tile_line: &[u8]) {
    let row_base = registers::FRAMEBUFFER_BANK_OFFSET + y * (FRAME_WIDTH / 2);
    for x in 0..FRAME_WIDTH {
        let pixel = if sprite_line[x] != 0 {
            sprite_line[x]
        } else if tile_line[x] != 0 {
            tile_line[x]
        } else {
            continue;
        };
        let offset = row_base + x / 2;
        let current = bus.read_from_bank(registers::FRAMEBUFFER_BANK, offset);
        let updated = if x % 2 == 0 { (pixel << 4) | (current & 0xF) } else { (current & 0xF0) | (pixel & 0xF) };
        bus.write_to_bank(registers::FRAMEBUFFER_BANK, offset, updated);
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

    fn pipeline() -> FramePipeline {
        FramePipeline::new(Arc::new(AtomicBool::new(true)), Arc::new(AtomicBool::new(false)))
    }

    #[test]
    fn run_frame_always_pulses_vblank_and_polls_input() {
        let bus = new_bus();
        let mut pipeline = pipeline();
        pipeline.controllers_mut().set_button(0, crate::controller::button::A, true);
        pipeline.run_frame(&bus);

        assert_eq!(bus.load_flag_bits(registers::INT_STATUS) & registers::int_bit::VBLANK, registers::int_bit::VBLANK);
        assert_eq!(bus.read8(registers::CONTROLLER_BASE as u16), crate::controller::button::A);
        assert_eq!(pipeline.frame_counter(), 1);
    }

    #[test]
    fn invisible_frame_still_pulses_vblank_but_skips_compositing() {
        let bus = new_bus();
        let visible = Arc::new(AtomicBool::new(false));
        let mut pipeline = FramePipeline::new(visible, Arc::new(AtomicBool::new(false)));
        bus.write8(registers::SPRITE_ENABLE as u16, 0x1);
        bus.write8(registers::SPRITE_COUNT as u16, 1);

        pipeline.run_frame(&bus);

        assert_eq!(bus.load_flag_bits(registers::INT_STATUS) & registers::int_bit::VBLANK, registers::int_bit::VBLANK);
        // Nothing touched the framebuffer since the composite step was skipped.
        assert_eq!(bus.read_from_bank(registers::FRAMEBUFFER_BANK, registers::FRAMEBUFFER_BANK_OFFSET), 0);
    }

    #[test]
    fn overrun_skips_gpu_work_on_the_following_frame_only() {
        let bus = new_bus();
        let mut pipeline = pipeline();
        bus.write8(registers::SPRITE_ENABLE as u16, 0x1);
        bus.write8(registers::SPRITE_COUNT as u16, 1);

        pipeline.last_frame_overran = true;
        pipeline.run_frame(&bus);

        assert_eq!(bus.load_flag_bits(registers::INT_STATUS) & registers::int_bit::VBLANK, registers::int_bit::VBLANK);
        assert_eq!(bus.read_from_bank(registers::FRAMEBUFFER_BANK, registers::FRAMEBUFFER_BANK_OFFSET), 0);
        assert_eq!(pipeline.frame_counter(), 1);
    }

    #[test]
    fn stop_is_cooperative_and_observable_after_set() {
        let pipeline = pipeline();
        assert!(!pipeline.should_stop());
        pipeline.stop();
        assert!(pipeline.should_stop());
    }
}

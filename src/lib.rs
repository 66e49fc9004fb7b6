//! Core VM for a retro fantasy console.
//!
//! `banked_store`/`memory` are the bottom layer (§4.1/4.2); `cpu`
//! executes instructions against a `MemoryBus` (§4.3); `sprite_engine`
//! and `tilemap` render scanlines that `frame_pipeline` composites at
//! 60 Hz (§4.4/4.5/4.6); `controller` feeds input in; `cartridge` loads
//! ROM files from disk; `host` is the explicit third actor tying the
//! CPU and render actors together behind the CLI surface in `main.rs`.

pub mod banked_store;
pub mod cartridge;
pub mod controller;
pub mod cpu;
pub mod error;
pub mod frame_pipeline;
pub mod host;
pub mod memory;
pub mod registers;
pub mod sprite_engine;
pub mod tilemap;

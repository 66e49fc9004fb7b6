//! Host controller (§5, §6): the third, explicit actor.
//!
//! Owns the CPU actor and render actor threads and issues them commands
//! over `std::sync::mpsc`, realizing "two concurrent actors plus one
//! cooperative controller" literally instead of leaving it implicit.
//! `run`/`pause`/`step`/`reset`/`fullReset`/`setPC`/`setBreakpoints`/
//! `snapshot`/`mount`/`unmount` (§6) are all methods here.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{error, info};

use crate::banked_store::BankedStore;
use crate::cpu::{Cpu, CpuSnapshot};
use crate::error::{CoreError, CoreResult};
use crate::frame_pipeline::FramePipeline;
use crate::memory::MemoryBus;

const RENDER_TICK: Duration = Duration::from_micros(1_000_000 / 60);

/// Point-in-time view of the whole machine, backing the `snapshot()`
/// CLI verb.
#[derive(Debug, Clone)]
pub struct MachineSnapshot {
    pub cpu: CpuSnapshot,
    pub current_bank: u8,
    pub frame_counter: u64,
    pub halted: Option<CoreError>,
}

enum CpuCommand {
    Run,
    Pause,
    Step(Sender<CoreResult<u32>>),
    Reset,
    FullReset,
    SetPc(u16),
    SetBreakpoints(Vec<u16>),
    Snapshot(Sender<(CpuSnapshot, u8, Option<CoreError>)>),
    Shutdown,
}

/// Owns the CPU actor and render actor threads for one machine
/// instance and the `MemoryBus` handle the host itself uses for
/// mount/unmount.
pub struct HostController {
    command_tx: Sender<CpuCommand>,
    cpu_thread: Option<JoinHandle<()>>,
    render_thread: Option<JoinHandle<()>>,
    visible: Arc<AtomicBool>,
    render_stop: Arc<AtomicBool>,
    frame_counter: Arc<AtomicU64>,
    bus: MemoryBus,
}

impl HostController {
    pub fn spawn(cartridge_capacity: usize) -> Self {
        let store = Arc::new(BankedStore::new(cartridge_capacity));
        let cpu_bus = MemoryBus::new(Arc::clone(&store));
        let render_bus = cpu_bus.clone_shared();
        let host_bus = cpu_bus.clone_shared();

        let (command_tx, command_rx) = mpsc::channel();
        let cpu_thread = thread::spawn(move || cpu_actor_loop(cpu_bus, command_rx));

        let visible = Arc::new(AtomicBool::new(true));
        let render_stop = Arc::new(AtomicBool::new(false));
        let frame_counter = Arc::new(AtomicU64::new(0));
        let render_thread = {
            let visible = Arc::clone(&visible);
            let stop = Arc::clone(&render_stop);
            let counter = Arc::clone(&frame_counter);
            thread::spawn(move || render_actor_loop(render_bus, visible, stop, counter))
        };

        info!("spawned CPU actor and render actor threads");
        HostController {
            command_tx,
            cpu_thread: Some(cpu_thread),
            render_thread: Some(render_thread),
            visible,
            render_stop,
            frame_counter,
            bus: host_bus,
        }
    }

    pub fn run(&self) {
        let _ = self.command_tx.send(CpuCommand::Run);
    }

    pub fn pause(&self) {
        let _ = self.command_tx.send(CpuCommand::Pause);
    }

    pub fn step(&self) -> CoreResult<u32> {
        let (tx, rx) = mpsc::channel();
        if self.command_tx.send(CpuCommand::Step(tx)).is_err() {
            return Err(CoreError::IllegalInstruction { pc: 0, detail: "CPU actor is not running".into() });
        }
        rx.recv().unwrap_or_else(|_| Err(CoreError::IllegalInstruction { pc: 0, detail: "CPU actor disconnected".into() }))
    }

    pub fn reset(&self) {
        let _ = self.command_tx.send(CpuCommand::Reset);
    }

    pub fn full_reset(&self) {
        let _ = self.command_tx.send(CpuCommand::FullReset);
    }

    pub fn set_pc(&self, pc: u16) {
        let _ = self.command_tx.send(CpuCommand::SetPc(pc));
    }

    pub fn set_breakpoints(&self, breakpoints: Vec<u16>) {
        let _ = self.command_tx.send(CpuCommand::SetBreakpoints(breakpoints));
    }

    pub fn mount(&self, rom_bytes: &[u8]) -> CoreResult<()> {
        self.bus.store().mount(rom_bytes)
    }

    pub fn unmount(&self) {
        self.bus.store().unmount();
    }

    pub fn set_visible(&self, visible: bool) {
        self.visible.store(visible, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MachineSnapshot {
        let (tx, rx) = mpsc::channel();
        let _ = self.command_tx.send(CpuCommand::Snapshot(tx));
        let (cpu, current_bank, halted) = rx.recv().unwrap_or((
            CpuSnapshot { r: [0; 6], sp: 0, pc: 0, status: 0, cycles: 0 },
            0,
            Some(CoreError::IllegalInstruction { pc: 0, detail: "CPU actor disconnected".into() }),
        ));
        MachineSnapshot { cpu, current_bank, frame_counter: self.frame_counter.load(Ordering::Relaxed), halted }
    }

    /// Stop both actors and join their threads. Consumes `self`.
    pub fn shutdown(mut self) {
        self.render_stop.store(true, Ordering::Relaxed);
        let _ = self.command_tx.send(CpuCommand::Shutdown);
        if let Some(handle) = self.cpu_thread.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.render_thread.take() {
            let _ = handle.join();
        }
    }
}

fn cpu_actor_loop(bus: MemoryBus, rx: Receiver<CpuCommand>) {
    let mut cpu = Cpu::new();
    let mut running = false;
    let mut breakpoints: Vec<u16> = Vec::new();

    loop {
        let command = if running { rx.try_recv().ok() } else { rx.recv().ok() };

        if let Some(command) = command {
            match command {
                CpuCommand::Run => running = true,
                CpuCommand::Pause => running = false,
                CpuCommand::Step(reply) => {
                    let _ = reply.send(cpu.step(&bus));
                }
                CpuCommand::Reset => {
                    cpu.reset();
                    bus.reset();
                }
                CpuCommand::FullReset => {
                    cpu.reset();
                    bus.full_reset();
                }
                CpuCommand::SetPc(pc) => cpu.pc = pc,
                CpuCommand::SetBreakpoints(bps) => breakpoints = bps,
                CpuCommand::Snapshot(reply) => {
                    let _ = reply.send((cpu.snapshot(), bus.current_bank(), cpu.halt_reason().cloned()));
                }
                CpuCommand::Shutdown => return,
            }
        } else if !running {
            // `recv` only returns `None` when the sender is gone.
            return;
        }

        if running {
            if breakpoints.contains(&cpu.pc) {
                running = false;
                continue;
            }
            if let Err(err) = cpu.step(&bus) {
                error!("CPU actor halted: {err}");
                running = false;
            }
        }
    }
}

fn render_actor_loop(bus: MemoryBus, visible: Arc<AtomicBool>, stop: Arc<AtomicBool>, frame_counter: Arc<AtomicU64>) {
    let mut pipeline = FramePipeline::new(visible, Arc::clone(&stop));
    loop {
        if pipeline.should_stop() {
            return;
        }
        let tick_start = std::time::Instant::now();
        pipeline.run_frame(&bus);
        frame_counter.store(pipeline.frame_counter(), Ordering::Relaxed);

        if stop.load(Ordering::Relaxed) {
            return;
        }
        let elapsed = tick_start.elapsed();
        if elapsed < RENDER_TICK {
            thread::sleep(RENDER_TICK - elapsed);
        }
    }
}

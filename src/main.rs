//! Command-line host surface (§6).
//!
//! One-shot subcommands (`step`, `reset`, `full-reset`, `mount`,
//! `snapshot`) build a fresh machine, do one thing, print the result,
//! and exit: there is no session persistence between invocations
//! (that's an explicit non-goal). `run` is the one subcommand that
//! actually spins up the two-actor `HostController` model and lets it
//! free-run until the process is killed.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;

use retrocore::banked_store::{BankedStore, BANK_SIZE};
use retrocore::cartridge;
use retrocore::host::HostController;

/// A fantasy-console core: mount a ROM, step or run it, inspect state.
#[derive(Parser)]
#[command(name = "retrocore", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Mount `rom` and free-run both actors until the process is killed.
    Run {
        rom: PathBuf,
        /// Hex PC address (e.g. `0x0300`) to pause at; may be repeated.
        #[arg(long = "breakpoint")]
        breakpoints: Vec<String>,
    },
    /// Mount `rom` and execute a single instruction, then print the snapshot.
    Step { rom: PathBuf },
    /// Mount `rom`, reset (cartridge stays mounted), print the snapshot.
    Reset { rom: PathBuf },
    /// Mount `rom`, full-reset (cartridge unmounted), print the snapshot.
    FullReset { rom: PathBuf },
    /// Validate that `rom` mounts cleanly and print its bank count.
    Mount { rom: PathBuf },
    /// Mount `rom` and print its initial machine snapshot without stepping.
    Snapshot { rom: PathBuf },
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Command::Run { rom, breakpoints } => run(&rom, &breakpoints),
        Command::Step { rom } => {
            let host = mount_host(&rom)?;
            let cycles = host.step().context("stepping CPU")?;
            println!("stepped {cycles} cycle(s)");
            print_snapshot(&host);
            host.shutdown();
            Ok(())
        }
        Command::Reset { rom } => {
            let host = mount_host(&rom)?;
            host.reset();
            print_snapshot(&host);
            host.shutdown();
            Ok(())
        }
        Command::FullReset { rom } => {
            let host = mount_host(&rom)?;
            host.full_reset();
            print_snapshot(&host);
            host.shutdown();
            Ok(())
        }
        Command::Mount { rom } => {
            let bytes = cartridge::read_rom(&rom)?;
            let store = BankedStore::new(bytes.len() / BANK_SIZE);
            store.mount(&bytes)?;
            println!("mounted {} bank(s)", store.cartridge_bank_count());
            Ok(())
        }
        Command::Snapshot { rom } => {
            let host = mount_host(&rom)?;
            print_snapshot(&host);
            host.shutdown();
            Ok(())
        }
    }
}

fn mount_host(rom: &PathBuf) -> Result<HostController> {
    let bytes = cartridge::read_rom(rom)?;
    let bank_count = bytes.len() / BANK_SIZE;
    let host = HostController::spawn(bank_count);
    host.mount(&bytes).context("mounting ROM")?;
    Ok(host)
}

fn print_snapshot(host: &HostController) {
    let snap = host.snapshot();
    println!(
        "pc=${:04X} sp=${:04X} status=${:02X} cycles={} bank={} frame={}",
        snap.cpu.pc, snap.cpu.sp, snap.cpu.status, snap.cpu.cycles, snap.current_bank, snap.frame_counter
    );
    if let Some(err) = snap.halted {
        println!("halted: {err}");
    }
}

fn parse_breakpoint(raw: &str) -> Result<u16> {
    let trimmed = raw.trim_start_matches("0x").trim_start_matches('$');
    u16::from_str_radix(trimmed, 16).with_context(|| format!("parsing breakpoint address {raw}"))
}

fn run(rom: &PathBuf, breakpoints: &[String]) -> Result<()> {
    let host = mount_host(rom)?;
    let breakpoints = breakpoints.iter().map(|s| parse_breakpoint(s)).collect::<Result<Vec<_>>>()?;
    host.set_breakpoints(breakpoints);

    info!("running; send SIGINT to stop");
    host.run();
    // One-shot CLI invocation: block here for the process lifetime.
    // A SIGINT terminates the process via the default handler, same
    // as any other long-running Unix CLI tool.
    loop {
        std::thread::sleep(Duration::from_secs(60));
    }
}

//! # Apple-1 Emulator
//!
//! An Apple-1 in Rust: an NMOS 6502 core, the memory-mapped PIA that
//! connects the keyboard and the display, the Woz monitor ROM, and versioned
//! save states.
//!
//! ## Features
//!
//! - Full documented 6502 instruction set, including NMOS decimal mode
//! - Undocumented opcodes run as one-byte no-ops
//! - RESET/BRK/NMI/IRQ latches with the real one-instruction IRQ mask delay
//! - Keyboard and display handshakes at the register level
//! - Gzip JSON snapshots with a migration chain for older versions
//!
//! ## Example
//!
//! ```rust
//! use apple1_emulator::{Input, Machine, MachineConfig};
//!
//! let config = MachineConfig {
//!     auto_type: "FF00\n".to_string(),
//!     ..MachineConfig::default()
//! };
//! let mut machine = Machine::new(&config).unwrap();
//!
//! let mut output = String::new();
//! for _ in 0..20_000 {
//!     machine.update_input(&Input::default());
//!     machine.step().unwrap();
//!     if let Some(byte) = machine.take_display_byte() {
//!         output.push(byte as char);
//!     }
//! }
//!
//! // The monitor greets with a backslash, then dumps the requested byte
//! assert!(output.starts_with('\\'));
//! assert!(output.contains("FF00: D8"));
//! ```

pub mod bus;
pub mod config;
pub mod cpu;
pub mod error;
pub mod machine;
pub mod memory;
pub mod opcodes;
pub mod pia;
pub mod rom;
pub mod snapshot;

pub use bus::{Apple1Bus, Bus, BusFault};
pub use config::MachineConfig;
pub use cpu::CPU;
pub use error::{ConfigError, EmulatorError, EmulatorResult, SnapshotError};
pub use machine::Machine;
pub use memory::Memory;
pub use pia::Input;
pub use snapshot::{MachineState, CURRENT_VERSION};

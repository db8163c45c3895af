//! Address decoding for the Apple-1.
//!
//! The CPU never holds a reference to the machine it runs on. It is handed a
//! `&mut impl Bus` for the duration of each step, which keeps the ownership
//! acyclic and lets the instruction engine run against a flat test memory.

use std::fmt;

use log::error;
use serde::{Deserialize, Serialize};

use crate::pia::{Display, Keyboard};

pub const KBD: u16 = 0xD010;
pub const KBDCR: u16 = 0xD011;
pub const DSP: u16 = 0xD012;
pub const DSPCR: u16 = 0xD013;

pub const ROM_START: u16 = 0xF000;
pub const ROM_SIZE: usize = 0x1000;

/// Largest RAM bank that still fits below the PIA.
pub const RAM_LIMIT: usize = 0xD000;
pub const RAM_BANK: usize = 0x1000;

/// Memory access capability the CPU executes through.
pub trait Bus {
    fn read(&mut self, address: u16) -> u8;

    fn write(&mut self, address: u16, value: u8);

    /// Side-effect free read, for disassembly and trace output.
    fn peek(&self, address: u16) -> u8;

    fn read_u16(&mut self, address: u16) -> u16 {
        let low = self.read(address) as u16;
        let high = self.read(address.wrapping_add(1)) as u16;
        (high << 8) | low
    }

    /// Called when the CPU services a RESET.
    fn reset_devices(&mut self) {}
}

/// An access to an address nothing is mapped at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BusFault {
    UnmappedRead { address: u16 },
    UnmappedWrite { address: u16, value: u8 },
}

impl fmt::Display for BusFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusFault::UnmappedRead { address } => {
                write!(f, "unimplemented read: ${address:04X}")
            }
            BusFault::UnmappedWrite { address, value } => {
                write!(f, "unimplemented write: ${address:04X} <- ${value:02X}")
            }
        }
    }
}

/// RAM bank at $0000, the PIA at $D010-$D013 and the ROM slot at $F000.
///
/// The ROM image ends at $FFFF. Reads from the slot below the image are
/// unmapped; writes anywhere in the slot are discarded.
#[derive(Debug, Clone)]
pub struct Apple1Bus {
    pub ram: Vec<u8>,
    rom: Box<[u8]>,
    pub keyboard: Keyboard,
    pub display: Display,
    fault: Option<BusFault>,
}

impl Apple1Bus {
    /// `rom` holds at most [`ROM_SIZE`] bytes (see [`crate::rom::build_rom`]).
    pub fn new(ram_size: usize, rom: Box<[u8]>) -> Self {
        debug_assert!(rom.len() <= ROM_SIZE);
        Apple1Bus {
            ram: vec![0; ram_size],
            rom,
            keyboard: Keyboard::new(),
            display: Display::new(),
            fault: None,
        }
    }

    pub fn rom(&self) -> &[u8] {
        &self.rom
    }

    /// Takes the first fault raised since the last call.
    pub fn take_fault(&mut self) -> Option<BusFault> {
        self.fault.take()
    }

    fn raise(&mut self, fault: BusFault) {
        if self.fault.is_none() {
            error!("{fault}");
            self.fault = Some(fault);
        }
    }

    fn in_ram(&self, address: u16) -> bool {
        (address as usize) < self.ram.len()
    }

    fn rom_start(&self) -> usize {
        0x10000 - self.rom.len()
    }

    fn in_rom(&self, address: u16) -> bool {
        (address as usize) >= self.rom_start()
    }

    fn rom_byte(&self, address: u16) -> u8 {
        self.rom[address as usize - self.rom_start()]
    }
}

impl Bus for Apple1Bus {
    fn read(&mut self, address: u16) -> u8 {
        match address {
            a if self.in_ram(a) => self.ram[a as usize],
            KBD => self.keyboard.read_data(),
            KBDCR => self.keyboard.read_status(),
            DSP => self.display.read_status(),
            a if self.in_rom(a) => self.rom_byte(a),
            _ => {
                self.raise(BusFault::UnmappedRead { address });
                0
            }
        }
    }

    fn write(&mut self, address: u16, value: u8) {
        match address {
            a if self.in_ram(a) => self.ram[a as usize] = value,
            // PIA control setup after RESET, nothing to model
            KBDCR | DSPCR => {}
            DSP => self.display.write_data(value),
            ROM_START..=0xFFFF => {}
            _ => self.raise(BusFault::UnmappedWrite { address, value }),
        }
    }

    fn peek(&self, address: u16) -> u8 {
        match address {
            a if self.in_ram(a) => self.ram[a as usize],
            KBD => 0x80 | self.keyboard.last_key(),
            KBDCR => self.keyboard.read_status(),
            DSP => self.display.read_status(),
            a if self.in_rom(a) => self.rom_byte(a),
            _ => 0,
        }
    }

    fn reset_devices(&mut self) {
        self.display.reset();
    }
}

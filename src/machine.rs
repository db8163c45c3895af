use log::{debug, info, log_enabled, trace, Level};

use crate::bus::{Apple1Bus, BusFault};
use crate::config::{check_ram_size, MachineConfig};
use crate::cpu::CPU;
use crate::error::{ConfigError, EmulatorError, EmulatorResult, SnapshotError};
use crate::pia::Input;
use crate::rom::{build_rom, monitor_rom};
use crate::snapshot::{self, MachineState};

/// A complete Apple-1: CPU, RAM, ROM and the PIA.
///
/// The host drives it by calling [`Machine::step`] once per instruction,
/// polling [`Machine::update_input`] and draining the display with
/// [`Machine::take_display_byte`].
#[derive(Debug, Clone)]
pub struct Machine {
    cpu: CPU,
    bus: Apple1Bus,
    fault: Option<BusFault>,
}

impl Machine {
    pub fn new(config: &MachineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let rom = match &config.rom_image {
            Some(image) => build_rom(image)?,
            None => monitor_rom(),
        };
        let mut bus = Apple1Bus::new(config.ram_size, rom);
        bus.keyboard.queue_text(&config.auto_type)?;
        info!("machine built with {:#x} bytes of RAM", config.ram_size);
        Ok(Machine {
            cpu: CPU::new(),
            bus,
            fault: None,
        })
    }

    /// Runs one instruction and clocks the display for the cycles it took.
    ///
    /// An unmapped access is fatal: the fault is returned now and on every
    /// later call.
    pub fn step(&mut self) -> EmulatorResult<u32> {
        if let Some(fault) = self.fault {
            return Err(EmulatorError::Bus(fault));
        }
        if log_enabled!(Level::Trace) {
            trace!("{}", self.cpu.debug_status_line(&self.bus));
        }

        let cycles = self.cpu.step(&mut self.bus);
        if let Some(fault) = self.bus.take_fault() {
            self.fault = Some(fault);
            return Err(EmulatorError::Bus(fault));
        }
        self.bus.display.run_cycles(cycles);
        Ok(cycles)
    }

    pub fn update_input(&mut self, input: &Input) {
        self.bus.keyboard.update(&input.keys);
        if input.reset_button {
            debug!("reset button held");
            self.cpu.request_reset();
        }
        if input.clear_screen_button {
            self.bus.display.request_clear();
        }
    }

    pub fn queue_auto_type(&mut self, text: &str) -> Result<(), ConfigError> {
        self.bus.keyboard.queue_text(text)
    }

    /// Accepts the character the display has drained, if any.
    pub fn take_display_byte(&mut self) -> Option<u8> {
        self.bus.display.take_output()
    }

    pub fn pending_display_byte(&self) -> Option<u8> {
        self.bus.display.pending_output()
    }

    pub fn display_ready(&self) -> bool {
        self.bus.display.is_ready()
    }

    pub fn take_clear_request(&mut self) -> bool {
        self.bus.display.take_clear_request()
    }

    pub fn cpu(&self) -> &CPU {
        &self.cpu
    }

    pub fn cpu_mut(&mut self) -> &mut CPU {
        &mut self.cpu
    }

    pub fn bus(&self) -> &Apple1Bus {
        &self.bus
    }

    pub fn ram(&self) -> &[u8] {
        &self.bus.ram
    }

    pub fn fault(&self) -> Option<BusFault> {
        self.fault
    }

    pub fn state(&self) -> MachineState {
        MachineState {
            cpu: self.cpu.clone(),
            ram: self.bus.ram.clone(),
            keyboard: self.bus.keyboard.clone(),
            display: self.bus.display.clone(),
        }
    }

    /// Rebuilds a machine from `state`, keeping `rom` as the ROM slot.
    pub fn from_state(state: MachineState, rom: Box<[u8]>) -> Result<Self, SnapshotError> {
        check_ram_size(state.ram.len())
            .map_err(|err| SnapshotError::Corrupt(err.to_string()))?;
        let mut bus = Apple1Bus::new(state.ram.len(), rom);
        bus.ram = state.ram;
        bus.keyboard = state.keyboard;
        bus.display = state.display;
        Ok(Machine {
            cpu: state.cpu,
            bus,
            fault: None,
        })
    }

    /// Refused once the machine has faulted, since the fault is not part of
    /// the saved state.
    pub fn make_snapshot(&self) -> Result<Vec<u8>, SnapshotError> {
        if let Some(fault) = self.fault {
            return Err(SnapshotError::Faulted(fault));
        }
        snapshot::encode(&self.state())
    }

    /// Decodes `bytes` into a new machine sharing this machine's ROM. `self`
    /// is left untouched whether or not decoding succeeds.
    pub fn load_snapshot(&self, bytes: &[u8]) -> Result<Machine, SnapshotError> {
        let state = snapshot::decode(bytes)?;
        let machine = Machine::from_state(state, self.bus.rom().into())?;
        info!("snapshot loaded, PC=${:04X}", machine.cpu.pc);
        Ok(machine)
    }
}

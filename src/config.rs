use serde::{Deserialize, Serialize};

use crate::bus::{RAM_BANK, RAM_LIMIT, ROM_SIZE};
use crate::error::ConfigError;
use crate::pia::key_code;

pub const DEFAULT_RAM_SIZE: usize = 0x1000;

/// Build-time description of a machine.
///
/// Only `ram_size` and `auto_type` come from config files; the ROM image is
/// raw bytes and is supplied by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MachineConfig {
    pub ram_size: usize,
    /// Replaces the built-in monitor. Right-aligned in the ROM slot.
    #[serde(skip)]
    pub rom_image: Option<Vec<u8>>,
    /// Typed at the keyboard after power-on.
    pub auto_type: String,
}

impl Default for MachineConfig {
    fn default() -> Self {
        MachineConfig {
            ram_size: DEFAULT_RAM_SIZE,
            rom_image: None,
            auto_type: String::new(),
        }
    }
}

impl MachineConfig {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_ram_size(self.ram_size)?;
        if let Some(image) = &self.rom_image {
            if image.len() > ROM_SIZE {
                return Err(ConfigError::RomTooLarge(image.len()));
            }
        }
        if let Some(c) = self.auto_type.chars().find(|&c| key_code(c).is_none()) {
            return Err(ConfigError::UntypeableChar(c));
        }
        Ok(())
    }
}

/// RAM comes in whole 4K banks and must end below the PIA.
pub fn check_ram_size(size: usize) -> Result<(), ConfigError> {
    if size == 0 || size % RAM_BANK != 0 || size > RAM_LIMIT {
        return Err(ConfigError::BadRamSize(size));
    }
    Ok(())
}

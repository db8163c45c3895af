use crate::bus::Bus;

/// Flat 64KB of RAM with no devices. Useful for running bare 6502 code and
/// for exercising the CPU in isolation.
#[derive(Clone)]
pub struct Memory {
    data: Box<[u8; 65536]>,
}

impl Default for Memory {
    fn default() -> Self {
        Memory::new()
    }
}

impl Memory {
    pub fn new() -> Self {
        Memory {
            data: Box::new([0; 65536]),
        }
    }

    pub fn read(&self, address: u16) -> u8 {
        self.data[address as usize]
    }

    pub fn write(&mut self, address: u16, value: u8) {
        self.data[address as usize] = value;
    }

    // Load a program image into memory
    pub fn load(&mut self, data: &[u8], start_address: u16) {
        let start = start_address as usize;
        let end = (start + data.len()).min(65536);
        let len = end - start;
        self.data[start..end].copy_from_slice(&data[..len]);
    }

    // Write a 16-bit value in little-endian format
    pub fn write_u16(&mut self, address: u16, value: u16) {
        self.write(address, (value & 0xFF) as u8);
        self.write(address.wrapping_add(1), (value >> 8) as u8);
    }
}

impl Bus for Memory {
    fn read(&mut self, address: u16) -> u8 {
        self.data[address as usize]
    }

    fn write(&mut self, address: u16, value: u8) {
        self.data[address as usize] = value;
    }

    fn peek(&self, address: u16) -> u8 {
        self.data[address as usize]
    }
}

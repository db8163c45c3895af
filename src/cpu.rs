use log::{debug, trace};
use serde::{Deserialize, Serialize};

use crate::bus::Bus;
use crate::opcodes::{decode, get_instruction_name, AddressingMode, Instruction};

/// NMOS 6502 core.
///
/// The CPU owns no memory. Every step borrows a [`Bus`] for the duration of
/// one instruction, so the same core runs against the Apple-1 address map or
/// a flat [`crate::memory::Memory`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CPU {
    // Registers
    pub a: u8,      // Accumulator
    pub x: u8,      // X Index Register
    pub y: u8,      // Y Index Register
    pub pc: u16,    // Program Counter
    pub sp: u8,     // Stack Pointer
    pub status: u8, // Status Register

    // One-shot interrupt requests, cleared when checked
    pub reset_pending: bool,
    pub brk_pending: bool,
    pub nmi_pending: bool,
    pub irq_pending: bool,

    /// Flags as they were at the previous interrupt check. IRQ masking lags
    /// the I flag by one step.
    pub prior_status: u8,

    pub steps: u64,
    pub cycles: u64,
}

// Status register flags
pub const CARRY_FLAG: u8 = 0x01;
pub const ZERO_FLAG: u8 = 0x02;
pub const INTERRUPT_DISABLE: u8 = 0x04;
pub const DECIMAL_MODE: u8 = 0x08;
pub const BREAK_COMMAND: u8 = 0x10;
/// Not a real register bit; always set in pushed copies of the flags.
pub const ON_STACK_FLAG: u8 = 0x20;
pub const OVERFLOW_FLAG: u8 = 0x40;
pub const NEGATIVE_FLAG: u8 = 0x80;

pub const NMI_VECTOR: u16 = 0xFFFA;
pub const RESET_VECTOR: u16 = 0xFFFC;
pub const IRQ_VECTOR: u16 = 0xFFFE;

const STACK_PAGE: u16 = 0x0100;
const INTERRUPT_CYCLES: u32 = 7;

impl Default for CPU {
    fn default() -> Self {
        CPU::new()
    }
}

impl CPU {
    /// Power-on state: everything zero with RESET pending, so the first step
    /// loads the reset vector.
    pub fn new() -> Self {
        CPU {
            a: 0,
            x: 0,
            y: 0,
            pc: 0,
            sp: 0,
            status: 0,
            reset_pending: true,
            brk_pending: false,
            nmi_pending: false,
            irq_pending: false,
            prior_status: 0,
            steps: 0,
            cycles: 0,
        }
    }

    /// Executes one instruction, servicing at most one pending interrupt
    /// first. Returns the cycles consumed.
    pub fn step<B: Bus>(&mut self, bus: &mut B) -> u32 {
        let mut cycles = self.handle_interrupts(bus);
        self.steps += 1;
        cycles += self.execute(bus);
        self.cycles += cycles as u64;
        cycles
    }

    pub fn request_reset(&mut self) {
        self.reset_pending = true;
    }

    pub fn request_nmi(&mut self) {
        self.nmi_pending = true;
    }

    pub fn request_irq(&mut self) {
        self.irq_pending = true;
    }

    // Getters
    pub fn get_register_a(&self) -> u8 { self.a }
    pub fn get_register_x(&self) -> u8 { self.x }
    pub fn get_register_y(&self) -> u8 { self.y }
    pub fn get_pc(&self) -> u16 { self.pc }
    pub fn get_sp(&self) -> u8 { self.sp }
    pub fn get_status(&self) -> u8 { self.status }

    // Flag operations
    pub fn set_flag(&mut self, flag: u8, value: bool) {
        if value {
            self.status |= flag;
        } else {
            self.status &= !flag;
        }
    }

    pub fn get_flag(&self, flag: u8) -> bool {
        (self.status & flag) != 0
    }

    fn update_zero_and_negative_flags(&mut self, value: u8) {
        self.set_flag(ZERO_FLAG, value == 0);
        self.set_flag(NEGATIVE_FLAG, (value & 0x80) != 0);
    }

    /// Priority is RESET, BRK, NMI, IRQ; the first pending one wins.
    fn handle_interrupts<B: Bus>(&mut self, bus: &mut B) -> u32 {
        let mut cycles = 0;
        if self.reset_pending {
            self.reset_pending = false;
            self.pc = bus.read_u16(RESET_VECTOR);
            // three aborted pushes
            self.sp = self.sp.wrapping_sub(3);
            self.set_flag(INTERRUPT_DISABLE, true);
            bus.reset_devices();
            debug!("RESET, PC=${:04X}", self.pc);
            cycles = INTERRUPT_CYCLES;
        } else if self.brk_pending {
            // the BRK opcode already paid for its cycles
            self.brk_pending = false;
            let return_addr = self.pc.wrapping_add(1);
            self.interrupt(bus, return_addr, self.status | BREAK_COMMAND, IRQ_VECTOR);
        } else if self.nmi_pending {
            self.nmi_pending = false;
            self.interrupt(bus, self.pc, self.status, NMI_VECTOR);
            cycles = INTERRUPT_CYCLES;
        } else if self.irq_pending {
            // dropped, not re-queued, when masked
            self.irq_pending = false;
            if self.prior_status & INTERRUPT_DISABLE == 0 {
                self.interrupt(bus, self.pc, self.status, IRQ_VECTOR);
                cycles = INTERRUPT_CYCLES;
            } else {
                trace!("IRQ dropped at ${:04X}, interrupts disabled", self.pc);
            }
        }
        self.prior_status = self.status;
        cycles
    }

    fn interrupt<B: Bus>(&mut self, bus: &mut B, return_addr: u16, flags: u8, vector: u16) {
        self.push_u16(bus, return_addr);
        self.push(bus, flags | ON_STACK_FLAG);
        self.set_flag(INTERRUPT_DISABLE, true);
        self.pc = bus.read_u16(vector);
    }

    fn execute<B: Bus>(&mut self, bus: &mut B) -> u32 {
        use Instruction::*;

        let pc = self.pc;
        let opcode = bus.read(pc);
        let op = decode(opcode);
        self.pc = pc.wrapping_add(op.len());

        let mode = op.mode;
        let address = self.operand_address(bus, mode, pc);
        let mut cycles = op.cycles as u32;

        match op.instruction {
            // Loads and stores
            Lda => {
                self.a = bus.read(address);
                self.update_zero_and_negative_flags(self.a);
            }
            Ldx => {
                self.x = bus.read(address);
                self.update_zero_and_negative_flags(self.x);
            }
            Ldy => {
                self.y = bus.read(address);
                self.update_zero_and_negative_flags(self.y);
            }
            Sta => bus.write(address, self.a),
            Stx => bus.write(address, self.x),
            Sty => bus.write(address, self.y),

            // Arithmetic
            Adc => {
                let value = bus.read(address);
                self.adc(value);
            }
            Sbc => {
                let value = bus.read(address);
                self.sbc(value);
            }
            Cmp => {
                let value = bus.read(address);
                self.compare(self.a, value);
            }
            Cpx => {
                let value = bus.read(address);
                self.compare(self.x, value);
            }
            Cpy => {
                let value = bus.read(address);
                self.compare(self.y, value);
            }

            // Logic
            And => {
                self.a &= bus.read(address);
                self.update_zero_and_negative_flags(self.a);
            }
            Ora => {
                self.a |= bus.read(address);
                self.update_zero_and_negative_flags(self.a);
            }
            Eor => {
                self.a ^= bus.read(address);
                self.update_zero_and_negative_flags(self.a);
            }
            Bit => {
                let value = bus.read(address);
                self.set_flag(ZERO_FLAG, self.a & value == 0);
                self.set_flag(NEGATIVE_FLAG, value & 0x80 != 0);
                self.set_flag(OVERFLOW_FLAG, value & 0x40 != 0);
            }

            // Shifts and rotates
            Asl => {
                let value = self.load(bus, mode, address);
                self.set_flag(CARRY_FLAG, value & 0x80 != 0);
                let result = value << 1;
                self.update_zero_and_negative_flags(result);
                self.store(bus, mode, address, result);
            }
            Lsr => {
                let value = self.load(bus, mode, address);
                self.set_flag(CARRY_FLAG, value & 0x01 != 0);
                let result = value >> 1;
                self.update_zero_and_negative_flags(result);
                self.store(bus, mode, address, result);
            }
            Rol => {
                let value = self.load(bus, mode, address);
                let carry_in = self.get_flag(CARRY_FLAG) as u8;
                self.set_flag(CARRY_FLAG, value & 0x80 != 0);
                let result = (value << 1) | carry_in;
                self.update_zero_and_negative_flags(result);
                self.store(bus, mode, address, result);
            }
            Ror => {
                let value = self.load(bus, mode, address);
                let carry_in = self.get_flag(CARRY_FLAG) as u8;
                self.set_flag(CARRY_FLAG, value & 0x01 != 0);
                let result = (value >> 1) | (carry_in << 7);
                self.update_zero_and_negative_flags(result);
                self.store(bus, mode, address, result);
            }

            // Increment/Decrement operations
            Inc => {
                let value = bus.read(address).wrapping_add(1);
                bus.write(address, value);
                self.update_zero_and_negative_flags(value);
            }
            Dec => {
                let value = bus.read(address).wrapping_sub(1);
                bus.write(address, value);
                self.update_zero_and_negative_flags(value);
            }
            Inx => {
                self.x = self.x.wrapping_add(1);
                self.update_zero_and_negative_flags(self.x);
            }
            Iny => {
                self.y = self.y.wrapping_add(1);
                self.update_zero_and_negative_flags(self.y);
            }
            Dex => {
                self.x = self.x.wrapping_sub(1);
                self.update_zero_and_negative_flags(self.x);
            }
            Dey => {
                self.y = self.y.wrapping_sub(1);
                self.update_zero_and_negative_flags(self.y);
            }

            // Transfer operations
            Tax => {
                self.x = self.a;
                self.update_zero_and_negative_flags(self.x);
            }
            Tay => {
                self.y = self.a;
                self.update_zero_and_negative_flags(self.y);
            }
            Txa => {
                self.a = self.x;
                self.update_zero_and_negative_flags(self.a);
            }
            Tya => {
                self.a = self.y;
                self.update_zero_and_negative_flags(self.a);
            }
            Tsx => {
                self.x = self.sp;
                self.update_zero_and_negative_flags(self.x);
            }
            Txs => self.sp = self.x,

            // Stack
            Pha => self.push(bus, self.a),
            Php => self.push(bus, self.status | BREAK_COMMAND | ON_STACK_FLAG),
            Pla => {
                self.a = self.pop(bus);
                self.update_zero_and_negative_flags(self.a);
            }
            Plp => self.status = self.pop(bus) & !(BREAK_COMMAND | ON_STACK_FLAG),

            // Jumps, calls and returns
            Jmp => self.pc = address,
            Jsr => {
                let return_addr = self.pc.wrapping_sub(1);
                self.push_u16(bus, return_addr);
                self.pc = address;
            }
            Rts => self.pc = self.pop_u16(bus).wrapping_add(1),
            Rti => {
                self.status = self.pop(bus) & !(BREAK_COMMAND | ON_STACK_FLAG);
                self.pc = self.pop_u16(bus);
            }
            // Serviced by the next step's interrupt check
            Brk => self.brk_pending = true,

            // Branches
            Bcc => cycles += self.branch_if(!self.get_flag(CARRY_FLAG), address),
            Bcs => cycles += self.branch_if(self.get_flag(CARRY_FLAG), address),
            Beq => cycles += self.branch_if(self.get_flag(ZERO_FLAG), address),
            Bne => cycles += self.branch_if(!self.get_flag(ZERO_FLAG), address),
            Bmi => cycles += self.branch_if(self.get_flag(NEGATIVE_FLAG), address),
            Bpl => cycles += self.branch_if(!self.get_flag(NEGATIVE_FLAG), address),
            Bvc => cycles += self.branch_if(!self.get_flag(OVERFLOW_FLAG), address),
            Bvs => cycles += self.branch_if(self.get_flag(OVERFLOW_FLAG), address),

            // Flag manipulation instructions
            Clc => self.set_flag(CARRY_FLAG, false),
            Sec => self.set_flag(CARRY_FLAG, true),
            Cli => self.set_flag(INTERRUPT_DISABLE, false),
            Sei => self.set_flag(INTERRUPT_DISABLE, true),
            Cld => self.set_flag(DECIMAL_MODE, false),
            Sed => self.set_flag(DECIMAL_MODE, true),
            Clv => self.set_flag(OVERFLOW_FLAG, false),

            Nop => {}
            Illegal => trace!("illegal opcode ${opcode:02X} at ${pc:04X} treated as NOP"),
        }

        cycles
    }

    /// Effective address for `mode`, reading operand bytes after `pc`.
    /// `self.pc` must already point at the next instruction.
    fn operand_address<B: Bus>(&mut self, bus: &mut B, mode: AddressingMode, pc: u16) -> u16 {
        let arg = pc.wrapping_add(1);
        match mode {
            AddressingMode::Implied | AddressingMode::Accumulator => 0,
            AddressingMode::Immediate => arg,
            AddressingMode::ZeroPage => bus.read(arg) as u16,
            AddressingMode::ZeroPageX => bus.read(arg).wrapping_add(self.x) as u16,
            AddressingMode::ZeroPageY => bus.read(arg).wrapping_add(self.y) as u16,
            AddressingMode::Relative => {
                let offset = bus.read(arg) as i8;
                self.pc.wrapping_add(offset as u16)
            }
            AddressingMode::Absolute => bus.read_u16(arg),
            AddressingMode::AbsoluteX => bus.read_u16(arg).wrapping_add(self.x as u16),
            AddressingMode::AbsoluteY => bus.read_u16(arg).wrapping_add(self.y as u16),
            AddressingMode::Indirect => {
                let ptr = bus.read_u16(arg);
                // 6502 bug: the high byte is fetched without carrying into the page
                let low = bus.read(ptr) as u16;
                let high = bus.read((ptr & 0xFF00) | (ptr.wrapping_add(1) & 0x00FF)) as u16;
                (high << 8) | low
            }
            AddressingMode::IndexedIndirect => {
                let zp = bus.read(arg).wrapping_add(self.x);
                self.read_zero_page_u16(bus, zp)
            }
            AddressingMode::IndirectIndexed => {
                let zp = bus.read(arg);
                self.read_zero_page_u16(bus, zp).wrapping_add(self.y as u16)
            }
        }
    }

    fn read_zero_page_u16<B: Bus>(&self, bus: &mut B, zp: u8) -> u16 {
        let low = bus.read(zp as u16) as u16;
        let high = bus.read(zp.wrapping_add(1) as u16) as u16;
        (high << 8) | low
    }

    fn load<B: Bus>(&self, bus: &mut B, mode: AddressingMode, address: u16) -> u8 {
        match mode {
            AddressingMode::Accumulator => self.a,
            _ => bus.read(address),
        }
    }

    fn store<B: Bus>(&mut self, bus: &mut B, mode: AddressingMode, address: u16, value: u8) {
        match mode {
            AddressingMode::Accumulator => self.a = value,
            _ => bus.write(address, value),
        }
    }

    /// Returns the extra cycle a taken branch costs.
    fn branch_if(&mut self, condition: bool, target: u16) -> u32 {
        if condition {
            self.pc = target;
            1
        } else {
            0
        }
    }

    pub(crate) fn adc(&mut self, value: u8) {
        let carry = self.get_flag(CARRY_FLAG) as u16;
        let a = self.a as u16;
        let v = value as u16;
        let binary = a + v + carry;

        if self.get_flag(DECIMAL_MODE) {
            let mut low = (a & 0x0F) + (v & 0x0F) + carry;
            if low > 0x09 {
                low = ((low + 0x06) & 0x0F) + 0x10;
            }
            let mut sum = (a & 0xF0) + (v & 0xF0) + low;
            // N and V come from the sum before the high nibble is corrected,
            // Z from the plain binary sum
            self.set_flag(NEGATIVE_FLAG, sum & 0x80 != 0);
            self.set_flag(OVERFLOW_FLAG, !(a ^ v) & (a ^ sum) & 0x80 != 0);
            self.set_flag(ZERO_FLAG, binary & 0xFF == 0);
            if sum >= 0xA0 {
                sum += 0x60;
            }
            self.set_flag(CARRY_FLAG, sum > 0xFF);
            self.a = sum as u8;
        } else {
            let result = binary as u8;
            let overflow = (self.a ^ result) & (value ^ result) & 0x80 != 0;

            self.set_flag(CARRY_FLAG, binary > 0xFF);
            self.set_flag(OVERFLOW_FLAG, overflow);

            self.a = result;
            self.update_zero_and_negative_flags(self.a);
        }
    }

    pub(crate) fn sbc(&mut self, value: u8) {
        // carry set means no borrow
        let carry = self.get_flag(CARRY_FLAG) as i16;
        let a = self.a as i16;
        let v = value as i16;
        let binary = a - v - (1 - carry);

        // flags always follow the binary subtraction
        let overflow = (a ^ binary) & (a ^ v) & 0x80 != 0;
        self.set_flag(CARRY_FLAG, binary >= 0);
        self.set_flag(OVERFLOW_FLAG, overflow);
        self.update_zero_and_negative_flags(binary as u8);

        if self.get_flag(DECIMAL_MODE) {
            let mut low = (a & 0x0F) - (v & 0x0F) + carry - 1;
            if low < 0 {
                low = ((low - 0x06) & 0x0F) - 0x10;
            }
            let mut diff = (a & 0xF0) - (v & 0xF0) + low;
            if diff < 0 {
                diff -= 0x60;
            }
            self.a = diff as u8;
        } else {
            self.a = binary as u8;
        }
    }

    fn compare(&mut self, register: u8, value: u8) {
        let result = register.wrapping_sub(value);
        self.set_flag(CARRY_FLAG, register >= value);
        self.update_zero_and_negative_flags(result);
    }

    // Stack operations, always inside page 1
    pub fn push<B: Bus>(&mut self, bus: &mut B, value: u8) {
        bus.write(STACK_PAGE | self.sp as u16, value);
        self.sp = self.sp.wrapping_sub(1);
    }

    pub fn pop<B: Bus>(&mut self, bus: &mut B) -> u8 {
        self.sp = self.sp.wrapping_add(1);
        bus.read(STACK_PAGE | self.sp as u16)
    }

    fn push_u16<B: Bus>(&mut self, bus: &mut B, value: u16) {
        self.push(bus, (value >> 8) as u8);
        self.push(bus, (value & 0xFF) as u8);
    }

    fn pop_u16<B: Bus>(&mut self, bus: &mut B) -> u16 {
        let low = self.pop(bus) as u16;
        let high = self.pop(bus) as u16;
        (high << 8) | low
    }

    /// One-line register and stack dump, for trace logs.
    pub fn debug_status_line<B: Bus>(&self, bus: &B) -> String {
        let opcode = bus.peek(self.pc);
        let b2 = bus.peek(self.pc.wrapping_add(1));
        let b3 = bus.peek(self.pc.wrapping_add(2));
        let sp = STACK_PAGE | self.sp as u16;
        let s1 = bus.peek(sp);
        let s2 = bus.peek(sp.wrapping_add(1));
        let s3 = bus.peek(sp.wrapping_add(2));
        format!(
            "Steps: {:09} PC:{:04x} *PC[:3]:{:02x}{:02x}{:02x} *S[:3]:{:02x}{:02x}{:02x} opcode:{} A:{:02x} X:{:02x} Y:{:02x} P:{:02x} S:{:02x}",
            self.steps,
            self.pc,
            opcode,
            b2,
            b3,
            s1,
            s2,
            s3,
            get_instruction_name(opcode),
            self.a,
            self.x,
            self.y,
            self.status,
            self.sp,
        )
    }
}

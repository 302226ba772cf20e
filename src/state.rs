use bitvec::{BitArr, array::BitArray};
use thiserror::Error;

pub type Address = usize;

pub const MEM_SIZE: usize = 4096;
pub const FONT_ADDR: Address = 0x000;
pub const FONT_HEIGHT: usize = 5;
pub const PC_START_ADDR: Address = 0x200;
pub const NUM_REGISTERS: usize = 16;
pub const NUM_KEYS: usize = 16;
pub const STACK_DEPTH: usize = 16;
pub const DISPLAY_WIDTH: usize = 64;
pub const DISPLAY_HEIGHT: usize = 32;

/// Index of VF, repurposed as the carry/borrow/collision flag.
pub const FLAG_REGISTER: usize = 0xF;

/// Bounds violations detected by the state accessors. The decoder is total
/// over the 16-bit instruction space, so none of these can arise from a
/// well-formed decode; they exist so a malformed program faults the session
/// instead of corrupting adjacent state.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Fault {
    #[error("register index {index} out of range")]
    RegisterOutOfRange { index: usize },
    #[error("memory address {addr:#05X} out of range")]
    MemoryOutOfRange { addr: Address },
    #[error("key index {index} out of range")]
    KeyOutOfRange { index: usize },
    #[error("call stack overflow: more than {STACK_DEPTH} nested calls")]
    StackOverflow,
    #[error("call stack underflow: return with no saved address")]
    StackUnderflow,
    #[error("ROM is too large ({size} bytes), limit is {limit} bytes")]
    RomTooLarge { size: usize, limit: usize },
}

pub struct Memory {
    data: [u8; MEM_SIZE],
}

impl Memory {
    pub fn new() -> Self {
        let font_data = [
            0xF0, 0x90, 0x90, 0x90, 0xF0, // 0
            0x20, 0x60, 0x20, 0x20, 0x70, // 1
            0xF0, 0x10, 0xF0, 0x80, 0xF0, // 2
            0xF0, 0x10, 0xF0, 0x10, 0xF0, // 3
            0x90, 0x90, 0xF0, 0x10, 0x10, // 4
            0xF0, 0x80, 0xF0, 0x10, 0xF0, // 5
            0xF0, 0x80, 0xF0, 0x90, 0xF0, // 6
            0xF0, 0x10, 0x20, 0x40, 0x40, // 7
            0xF0, 0x90, 0xF0, 0x90, 0xF0, // 8
            0xF0, 0x90, 0xF0, 0x10, 0xF0, // 9
            0xF0, 0x90, 0xF0, 0x90, 0x90, // A
            0xE0, 0x90, 0xE0, 0x90, 0xE0, // B
            0xF0, 0x80, 0x80, 0x80, 0xF0, // C
            0xE0, 0x90, 0x90, 0x90, 0xE0, // D
            0xF0, 0x80, 0xF0, 0x80, 0xF0, // E
            0xF0, 0x80, 0xF0, 0x80, 0x80, // F
        ];
        let data = {
            let mut data = [0; MEM_SIZE];
            data[FONT_ADDR..FONT_ADDR + font_data.len()].copy_from_slice(&font_data);
            data
        };

        Memory { data }
    }

    pub fn read(&self, addr: Address) -> Result<u8, Fault> {
        self.data
            .get(addr)
            .copied()
            .ok_or(Fault::MemoryOutOfRange { addr })
    }

    pub fn write(&mut self, addr: Address, value: u8) -> Result<(), Fault> {
        *self
            .data
            .get_mut(addr)
            .ok_or(Fault::MemoryOutOfRange { addr })? = value;
        Ok(())
    }

    /// Copy a program image to 0x200. The reserved region below is never
    /// touched by a load.
    pub fn load_rom(&mut self, rom: &[u8]) -> Result<(), Fault> {
        let limit = MEM_SIZE - PC_START_ADDR;
        if rom.len() > limit {
            return Err(Fault::RomTooLarge {
                size: rom.len(),
                limit,
            });
        }
        self.data[PC_START_ADDR..PC_START_ADDR + rom.len()].copy_from_slice(rom);
        Ok(())
    }

    pub fn read_sprite(&self, addr: Address, rows: u8) -> Result<&[u8], Fault> {
        let end = addr + rows as usize;
        if end > MEM_SIZE {
            return Err(Fault::MemoryOutOfRange { addr: end - 1 });
        }
        Ok(&self.data[addr..end])
    }
}

pub struct RegisterBank {
    v: [u8; NUM_REGISTERS],
}

impl RegisterBank {
    pub fn new() -> Self {
        RegisterBank {
            v: [0; NUM_REGISTERS],
        }
    }

    pub fn read(&self, index: usize) -> Result<u8, Fault> {
        self.v
            .get(index)
            .copied()
            .ok_or(Fault::RegisterOutOfRange { index })
    }

    pub fn write(&mut self, index: usize, value: u8) -> Result<(), Fault> {
        *self
            .v
            .get_mut(index)
            .ok_or(Fault::RegisterOutOfRange { index })? = value;
        Ok(())
    }
}

/// Fixed-depth return address stack. Depth 16 is part of the machine
/// definition; exceeding it faults rather than growing or wrapping.
pub struct CallStack {
    frames: [Address; STACK_DEPTH],
    sp: usize,
}

impl CallStack {
    pub fn new() -> Self {
        CallStack {
            frames: [0; STACK_DEPTH],
            sp: 0,
        }
    }

    pub fn push(&mut self, addr: Address) -> Result<(), Fault> {
        if self.sp >= STACK_DEPTH {
            return Err(Fault::StackOverflow);
        }
        self.frames[self.sp] = addr;
        self.sp += 1;
        Ok(())
    }

    pub fn pop(&mut self) -> Result<Address, Fault> {
        if self.sp == 0 {
            return Err(Fault::StackUnderflow);
        }
        self.sp -= 1;
        Ok(self.frames[self.sp])
    }

    pub fn depth(&self) -> usize {
        self.sp
    }
}

/// 64x32 monochrome bitmap. Coordinates wrap on both axes, so pixel access
/// never fails.
pub struct Display {
    pixels: BitArr!(for DISPLAY_WIDTH * DISPLAY_HEIGHT),
}

impl Display {
    pub fn new() -> Self {
        Display {
            pixels: BitArray::ZERO,
        }
    }

    fn index(x: usize, y: usize) -> usize {
        (y % DISPLAY_HEIGHT) * DISPLAY_WIDTH + (x % DISPLAY_WIDTH)
    }

    pub fn is_lit(&self, x: usize, y: usize) -> bool {
        self.pixels[Self::index(x, y)]
    }

    /// XOR one pixel, returning true if a lit pixel was toggled off.
    pub fn toggle(&mut self, x: usize, y: usize) -> bool {
        let index = Self::index(x, y);
        let was_lit = self.pixels[index];
        self.pixels.set(index, !was_lit);
        was_lit
    }

    pub fn clear(&mut self) {
        self.pixels.fill(false);
    }
}

/// Physical up/down state of the 16 logical keys. Written only by the
/// input collaborator, read once per scheduler tick.
pub struct Keypad {
    keys: [bool; NUM_KEYS],
}

impl Keypad {
    pub fn new() -> Self {
        Keypad {
            keys: [false; NUM_KEYS],
        }
    }

    pub fn press(&mut self, index: usize) {
        if let Some(key) = self.keys.get_mut(index) {
            *key = true;
        }
    }

    pub fn release(&mut self, index: usize) {
        if let Some(key) = self.keys.get_mut(index) {
            *key = false;
        }
    }

    pub fn is_pressed(&self, index: usize) -> Result<bool, Fault> {
        self.keys
            .get(index)
            .copied()
            .ok_or(Fault::KeyOutOfRange { index })
    }

    /// Copy of the current up/down state of all 16 keys, taken once per
    /// scheduler tick so wait-for-key can compare against it later.
    pub fn snapshot(&self) -> [bool; NUM_KEYS] {
        self.keys
    }
}

/// The whole machine state, owned as one aggregate so independent
/// instances can run side by side in tests.
pub struct Chip8State {
    pub memory: Memory,
    pub registers: RegisterBank,
    pub pc: Address,
    pub index: Address,
    pub stack: CallStack,
    pub delay_timer: u8,
    pub sound_timer: u8,
    pub display: Display,
    pub keypad: Keypad,
    /// Destination register of a pending wait-for-key, if any.
    pub key_wait: Option<usize>,
}

impl Chip8State {
    pub fn new() -> Self {
        Chip8State {
            memory: Memory::new(),
            registers: RegisterBank::new(),
            pc: PC_START_ADDR,
            index: 0,
            stack: CallStack::new(),
            delay_timer: 0,
            sound_timer: 0,
            display: Display::new(),
            keypad: Keypad::new(),
            key_wait: None,
        }
    }

    pub fn advance_pc(&mut self) {
        self.pc += 2;
    }

    /// Advance past the next instruction when `cond` holds, else to it.
    pub fn skip_if(&mut self, cond: bool) {
        self.pc += if cond { 4 } else { 2 };
    }

    /// One 60 Hz decrement of both timers, floored at zero.
    pub fn tick_timers(&mut self) {
        self.delay_timer = self.delay_timer.saturating_sub(1);
        self.sound_timer = self.sound_timer.saturating_sub(1);
    }

    pub fn clear_display(&mut self) {
        self.display.clear();
    }

    /// XOR-composite an n-row sprite read from memory at the index register
    /// onto the display at (x, y), wrapping on both axes. Returns true if
    /// any lit pixel was toggled off.
    pub fn draw_sprite(&mut self, x: u8, y: u8, rows: u8) -> Result<bool, Fault> {
        let sprite = self.memory.read_sprite(self.index, rows)?;
        let mut collision = false;

        for (row, &byte) in sprite.iter().enumerate() {
            for bit in 0..8 {
                if (byte >> (7 - bit)) & 1 == 0 {
                    continue;
                }
                let turned_off = self.display.toggle(x as usize + bit, y as usize + row);
                collision |= turned_off;
            }
        }
        Ok(collision)
    }
}

impl Default for Chip8State {
    fn default() -> Self {
        Self::new()
    }
}

use crate::state::{Address, Chip8State, FLAG_REGISTER, FONT_ADDR, FONT_HEIGHT, Fault};

/// One of the 35 recognized instruction forms, with only the operand
/// fields that form carries. The legacy SYS form and unrecognized
/// sub-opcodes in the 0x8/0xE/0xF groups all decode to `NoOp`, so decoding
/// is total over the 16-bit word space.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Opcode {
    /// SYS addr and unknown sub-opcodes: advance the PC, touch nothing else.
    NoOp,
    /// 00E0
    ClearScreen,
    /// 00EE
    Return,
    /// 1NNN
    Jump { nnn: Address },
    /// 2NNN
    Call { nnn: Address },
    /// 3XKK
    SkipEqImm { x: usize, kk: u8 },
    /// 4XKK
    SkipNeImm { x: usize, kk: u8 },
    /// 5XY0
    SkipEqReg { x: usize, y: usize },
    /// 6XKK
    LoadImm { x: usize, kk: u8 },
    /// 7XKK, no carry flag
    AddImm { x: usize, kk: u8 },
    /// 8XY0
    LoadReg { x: usize, y: usize },
    /// 8XY1
    Or { x: usize, y: usize },
    /// 8XY2
    And { x: usize, y: usize },
    /// 8XY3
    Xor { x: usize, y: usize },
    /// 8XY4, VF = carry
    AddReg { x: usize, y: usize },
    /// 8XY5, VF = 1 iff Vx > Vy before the subtraction
    Sub { x: usize, y: usize },
    /// 8XY6, VF = bit shifted out
    ShiftRight { x: usize },
    /// 8XY7, VF = 1 iff Vy > Vx before the subtraction
    SubReverse { x: usize, y: usize },
    /// 8XYE, VF = bit shifted out
    ShiftLeft { x: usize },
    /// 9XY0
    SkipNeReg { x: usize, y: usize },
    /// ANNN
    LoadIndex { nnn: Address },
    /// BNNN
    JumpIndexed { nnn: Address },
    /// CXKK
    Random { x: usize, kk: u8 },
    /// DXYN, VF = collision
    Draw { x: usize, y: usize, n: u8 },
    /// EX9E
    SkipKeyPressed { x: usize },
    /// EXA1
    SkipKeyNotPressed { x: usize },
    /// FX07
    LoadDelay { x: usize },
    /// FX0A
    WaitKey { x: usize },
    /// FX15
    SetDelay { x: usize },
    /// FX18
    SetSound { x: usize },
    /// FX1E, no overflow flag
    AddIndex { x: usize },
    /// FX29
    LoadFont { x: usize },
    /// FX33
    StoreBcd { x: usize },
    /// FX55
    StoreRegs { x: usize },
    /// FX65
    LoadRegs { x: usize },
}

/// Side effect the scheduler needs to observe after executing an operation.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Effect {
    None,
    /// The display bitmap changed; the presenter should repaint.
    Redraw,
    /// Execution is paused until a key is pressed.
    AwaitKey,
}

/// Decode a 16-bit instruction word. Dispatch is on the top nibble, with a
/// second dispatch on the low byte or nibble for groups 0x0, 0x8, 0xE and
/// 0xF. Never fails.
pub fn decode(word: u16) -> Opcode {
    let x = ((word >> 8) & 0x0F) as usize;
    let y = ((word >> 4) & 0x0F) as usize;
    let n = (word & 0x0F) as u8;
    let kk = (word & 0xFF) as u8;
    let nnn = (word & 0x0FFF) as Address;

    match word >> 12 {
        0x0 => match word & 0x0FFF {
            0x0E0 => Opcode::ClearScreen,
            0x0EE => Opcode::Return,
            _ => Opcode::NoOp,
        },
        0x1 => Opcode::Jump { nnn },
        0x2 => Opcode::Call { nnn },
        0x3 => Opcode::SkipEqImm { x, kk },
        0x4 => Opcode::SkipNeImm { x, kk },
        0x5 => Opcode::SkipEqReg { x, y },
        0x6 => Opcode::LoadImm { x, kk },
        0x7 => Opcode::AddImm { x, kk },
        0x8 => match n {
            0x0 => Opcode::LoadReg { x, y },
            0x1 => Opcode::Or { x, y },
            0x2 => Opcode::And { x, y },
            0x3 => Opcode::Xor { x, y },
            0x4 => Opcode::AddReg { x, y },
            0x5 => Opcode::Sub { x, y },
            0x6 => Opcode::ShiftRight { x },
            0x7 => Opcode::SubReverse { x, y },
            0xE => Opcode::ShiftLeft { x },
            _ => Opcode::NoOp,
        },
        0x9 => Opcode::SkipNeReg { x, y },
        0xA => Opcode::LoadIndex { nnn },
        0xB => Opcode::JumpIndexed { nnn },
        0xC => Opcode::Random { x, kk },
        0xD => Opcode::Draw { x, y, n },
        0xE => match kk {
            0x9E => Opcode::SkipKeyPressed { x },
            0xA1 => Opcode::SkipKeyNotPressed { x },
            _ => Opcode::NoOp,
        },
        0xF => match kk {
            0x07 => Opcode::LoadDelay { x },
            0x0A => Opcode::WaitKey { x },
            0x15 => Opcode::SetDelay { x },
            0x18 => Opcode::SetSound { x },
            0x1E => Opcode::AddIndex { x },
            0x29 => Opcode::LoadFont { x },
            0x33 => Opcode::StoreBcd { x },
            0x55 => Opcode::StoreRegs { x },
            0x65 => Opcode::LoadRegs { x },
            _ => Opcode::NoOp,
        },
        _ => unreachable!(),
    }
}

/// Apply one decoded operation to the machine state. Every operation other
/// than the jumps, call and return advances the program counter by 2 as its
/// last step; `WaitKey` leaves it in place until the scheduler resolves the
/// latch.
pub fn execute(op: Opcode, state: &mut Chip8State) -> Result<Effect, Fault> {
    match op {
        Opcode::NoOp => state.advance_pc(),
        Opcode::ClearScreen => {
            state.clear_display();
            state.advance_pc();
            return Ok(Effect::Redraw);
        }
        Opcode::Return => {
            let addr = state.stack.pop()?;
            state.pc = addr + 2;
        }
        Opcode::Jump { nnn } => state.pc = nnn,
        Opcode::Call { nnn } => {
            state.stack.push(state.pc)?;
            state.pc = nnn;
        }
        Opcode::SkipEqImm { x, kk } => {
            let cond = state.registers.read(x)? == kk;
            state.skip_if(cond);
        }
        Opcode::SkipNeImm { x, kk } => {
            let cond = state.registers.read(x)? != kk;
            state.skip_if(cond);
        }
        Opcode::SkipEqReg { x, y } => {
            let cond = state.registers.read(x)? == state.registers.read(y)?;
            state.skip_if(cond);
        }
        Opcode::LoadImm { x, kk } => {
            state.registers.write(x, kk)?;
            state.advance_pc();
        }
        Opcode::AddImm { x, kk } => {
            let vx = state.registers.read(x)?;
            state.registers.write(x, vx.wrapping_add(kk))?;
            state.advance_pc();
        }
        Opcode::LoadReg { x, y } => {
            let vy = state.registers.read(y)?;
            state.registers.write(x, vy)?;
            state.advance_pc();
        }
        Opcode::Or { x, y } => {
            let value = state.registers.read(x)? | state.registers.read(y)?;
            state.registers.write(x, value)?;
            state.advance_pc();
        }
        Opcode::And { x, y } => {
            let value = state.registers.read(x)? & state.registers.read(y)?;
            state.registers.write(x, value)?;
            state.advance_pc();
        }
        Opcode::Xor { x, y } => {
            let value = state.registers.read(x)? ^ state.registers.read(y)?;
            state.registers.write(x, value)?;
            state.advance_pc();
        }
        Opcode::AddReg { x, y } => {
            let (sum, carry) = state
                .registers
                .read(x)?
                .overflowing_add(state.registers.read(y)?);
            state.registers.write(x, sum)?;
            state.registers.write(FLAG_REGISTER, carry as u8)?;
            state.advance_pc();
        }
        Opcode::Sub { x, y } => {
            let vx = state.registers.read(x)?;
            let vy = state.registers.read(y)?;
            state.registers.write(x, vx.wrapping_sub(vy))?;
            state.registers.write(FLAG_REGISTER, (vx > vy) as u8)?;
            state.advance_pc();
        }
        Opcode::SubReverse { x, y } => {
            let vx = state.registers.read(x)?;
            let vy = state.registers.read(y)?;
            state.registers.write(x, vy.wrapping_sub(vx))?;
            state.registers.write(FLAG_REGISTER, (vy > vx) as u8)?;
            state.advance_pc();
        }
        Opcode::ShiftRight { x } => {
            let vx = state.registers.read(x)?;
            state.registers.write(x, vx >> 1)?;
            state.registers.write(FLAG_REGISTER, vx & 0x01)?;
            state.advance_pc();
        }
        Opcode::ShiftLeft { x } => {
            let vx = state.registers.read(x)?;
            state.registers.write(x, vx << 1)?;
            state.registers.write(FLAG_REGISTER, vx >> 7)?;
            state.advance_pc();
        }
        Opcode::SkipNeReg { x, y } => {
            let cond = state.registers.read(x)? != state.registers.read(y)?;
            state.skip_if(cond);
        }
        Opcode::LoadIndex { nnn } => {
            state.index = nnn;
            state.advance_pc();
        }
        Opcode::JumpIndexed { nnn } => {
            state.pc = nnn + state.registers.read(0)? as Address;
        }
        Opcode::Random { x, kk } => {
            let byte: u8 = rand::random();
            state.registers.write(x, byte & kk)?;
            state.advance_pc();
        }
        Opcode::Draw { x, y, n } => {
            let px = state.registers.read(x)?;
            let py = state.registers.read(y)?;
            let collision = state.draw_sprite(px, py, n)?;
            state.registers.write(FLAG_REGISTER, collision as u8)?;
            state.advance_pc();
            return Ok(Effect::Redraw);
        }
        Opcode::SkipKeyPressed { x } => {
            let key = state.registers.read(x)? as usize;
            let cond = state.keypad.is_pressed(key)?;
            state.skip_if(cond);
        }
        Opcode::SkipKeyNotPressed { x } => {
            let key = state.registers.read(x)? as usize;
            let cond = !state.keypad.is_pressed(key)?;
            state.skip_if(cond);
        }
        Opcode::LoadDelay { x } => {
            state.registers.write(x, state.delay_timer)?;
            state.advance_pc();
        }
        Opcode::WaitKey { x } => {
            state.key_wait = Some(x);
            return Ok(Effect::AwaitKey);
        }
        Opcode::SetDelay { x } => {
            state.delay_timer = state.registers.read(x)?;
            state.advance_pc();
        }
        Opcode::SetSound { x } => {
            state.sound_timer = state.registers.read(x)?;
            state.advance_pc();
        }
        Opcode::AddIndex { x } => {
            let vx = state.registers.read(x)?;
            state.index = state.index.wrapping_add(vx as Address);
            state.advance_pc();
        }
        Opcode::LoadFont { x } => {
            let digit = state.registers.read(x)? & 0x0F;
            state.index = FONT_ADDR + digit as Address * FONT_HEIGHT;
            state.advance_pc();
        }
        Opcode::StoreBcd { x } => {
            let vx = state.registers.read(x)?;
            state.memory.write(state.index, vx / 100)?;
            state.memory.write(state.index + 1, (vx / 10) % 10)?;
            state.memory.write(state.index + 2, vx % 10)?;
            state.advance_pc();
        }
        Opcode::StoreRegs { x } => {
            for i in 0..=x {
                let value = state.registers.read(i)?;
                state.memory.write(state.index + i, value)?;
            }
            state.advance_pc();
        }
        Opcode::LoadRegs { x } => {
            for i in 0..=x {
                let value = state.memory.read(state.index + i)?;
                state.registers.write(i, value)?;
            }
            state.advance_pc();
        }
    }
    Ok(Effect::None)
}

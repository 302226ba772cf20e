use std::time::{Duration, Instant};

use crate::instruction::{Effect, decode, execute};
use crate::state::{Chip8State, Fault, NUM_KEYS};

/// Instructions executed per frame while running. Nominal budget; the
/// front end owns the frame pacing itself.
pub const DEFAULT_CYCLES_PER_FRAME: u32 = 10;

/// Both timers decay at 60 Hz regardless of how fast instructions run.
pub const TIMER_INTERVAL: Duration = Duration::from_nanos(1_000_000_000 / 60);

/// Time source for the 60 Hz timer cadence. Injected so tests advance time
/// without sleeping.
pub trait Clock {
    /// Monotonic time elapsed since some fixed origin.
    fn now(&self) -> Duration;
}

pub struct SystemClock {
    start: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        SystemClock {
            start: Instant::now(),
        }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.start.elapsed()
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Mode {
    Running,
    AwaitingKey,
}

/// Drives fetch-decode-execute against a machine state, enforcing the
/// cycles-per-frame budget, the wait-for-key state machine and the
/// wall-clock timer cadence.
pub struct Scheduler<C: Clock> {
    clock: C,
    cycles_per_frame: u32,
    next_timer_tick: Duration,
    /// Keys already down when the wait-for-key latch was set. Only a key
    /// transitioning to pressed after latch entry may resolve the wait.
    held_at_wait: Option<[bool; NUM_KEYS]>,
}

impl<C: Clock> Scheduler<C> {
    pub fn new(clock: C) -> Self {
        Self::with_budget(clock, DEFAULT_CYCLES_PER_FRAME)
    }

    pub fn with_budget(clock: C, cycles_per_frame: u32) -> Self {
        let next_timer_tick = clock.now() + TIMER_INTERVAL;
        Scheduler {
            clock,
            cycles_per_frame,
            next_timer_tick,
            held_at_wait: None,
        }
    }

    pub fn mode(&self, state: &Chip8State) -> Mode {
        if state.key_wait.is_some() {
            Mode::AwaitingKey
        } else {
            Mode::Running
        }
    }

    /// One fetch-decode-execute pass. The executor owns all program
    /// counter movement.
    pub fn step(&mut self, state: &mut Chip8State) -> Result<Effect, Fault> {
        let high = state.memory.read(state.pc)?;
        let low = state.memory.read(state.pc + 1)?;
        let word = u16::from(high) << 8 | u16::from(low);
        let op = decode(word);
        log::trace!("pc={:#05X} word={word:#06X} {op:?}", state.pc);
        execute(op, state)
    }

    /// Advance the machine by one frame's worth of work: either resolve a
    /// pending key wait, or execute up to the cycle budget and then apply
    /// any due 60 Hz timer decrements. Returns whether the display changed.
    pub fn run_frame(&mut self, state: &mut Chip8State) -> Result<bool, Fault> {
        if state.key_wait.is_some() {
            self.resolve_key_wait(state)?;
            // Timer cadence is suspended while awaiting a key; re-anchor so
            // the pause is not repaid as a burst of decrements on resume.
            self.next_timer_tick = self.clock.now() + TIMER_INTERVAL;
            return Ok(false);
        }

        let mut redraw = false;
        for _ in 0..self.cycles_per_frame {
            match self.step(state)? {
                Effect::Redraw => redraw = true,
                Effect::AwaitKey => {
                    self.held_at_wait = Some(state.keypad.snapshot());
                    break;
                }
                Effect::None => {}
            }
        }
        self.tick_timers(state);
        Ok(redraw)
    }

    /// A key transitioning to pressed resolves the latch; keys already
    /// held when the wait began do not count until they are released and
    /// pressed again. The lowest-indexed new press wins: its index lands
    /// in the destination register and the PC finally moves past the
    /// wait instruction.
    fn resolve_key_wait(&mut self, state: &mut Chip8State) -> Result<(), Fault> {
        let Some(dest) = state.key_wait else {
            return Ok(());
        };
        let now = state.keypad.snapshot();
        let held = self
            .held_at_wait
            .get_or_insert_with(|| state.keypad.snapshot());
        // Forget held keys once they are seen up, so a re-press counts.
        for (held_key, &down) in held.iter_mut().zip(now.iter()) {
            *held_key &= down;
        }
        let new_press = now
            .iter()
            .zip(held.iter())
            .position(|(&down, &was_held)| down && !was_held);
        if let Some(key) = new_press {
            state.registers.write(dest, key as u8)?;
            state.advance_pc();
            state.key_wait = None;
            self.held_at_wait = None;
            log::debug!("key wait resolved: key {key:#X} -> V{dest:X}");
        }
        Ok(())
    }

    fn tick_timers(&mut self, state: &mut Chip8State) {
        let now = self.clock.now();
        while now >= self.next_timer_tick {
            state.tick_timers();
            self.next_timer_tick += TIMER_INTERVAL;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::PC_START_ADDR;
    use std::cell::Cell;
    use std::rc::Rc;

    #[derive(Clone, Default)]
    struct ManualClock {
        now: Rc<Cell<Duration>>,
    }

    impl ManualClock {
        fn advance(&self, d: Duration) {
            self.now.set(self.now.get() + d);
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Duration {
            self.now.get()
        }
    }

    fn machine_with(rom: &[u8]) -> Chip8State {
        let mut state = Chip8State::new();
        state.memory.load_rom(rom).unwrap();
        state
    }

    #[test]
    fn two_instruction_program_runs_in_two_cycles() {
        let mut state = machine_with(&[0x6A, 0x05, 0x7A, 0x10]);
        let mut scheduler = Scheduler::with_budget(ManualClock::default(), 2);

        scheduler.run_frame(&mut state).unwrap();
        assert_eq!(state.registers.read(0xA).unwrap(), 0x15);
        assert_eq!(state.pc, 0x204);
    }

    #[test]
    fn tight_loop_still_honors_budget_and_timer_cadence() {
        // JP 0x200 forever
        let mut state = machine_with(&[0x12, 0x00]);
        state.delay_timer = 10;
        state.sound_timer = 1;
        let clock = ManualClock::default();
        let mut scheduler = Scheduler::new(clock.clone());

        clock.advance(3 * TIMER_INTERVAL);
        scheduler.run_frame(&mut state).unwrap(); // returns despite the loop
        assert_eq!(state.pc, PC_START_ADDR);
        assert_eq!(state.delay_timer, 7);
        assert_eq!(state.sound_timer, 0); // floored
    }

    #[test]
    fn timers_do_not_decay_faster_than_the_clock() {
        let mut state = machine_with(&[0x12, 0x00]);
        state.delay_timer = 5;
        let clock = ManualClock::default();
        let mut scheduler = Scheduler::new(clock.clone());

        // many frames, no clock movement: no decrements
        for _ in 0..100 {
            scheduler.run_frame(&mut state).unwrap();
        }
        assert_eq!(state.delay_timer, 5);

        clock.advance(TIMER_INTERVAL);
        scheduler.run_frame(&mut state).unwrap();
        assert_eq!(state.delay_timer, 4);
    }

    #[test]
    fn wait_for_key_freezes_until_a_press() {
        // LD V5, K
        let mut state = machine_with(&[0xF5, 0x0A]);
        let mut scheduler = Scheduler::new(ManualClock::default());

        scheduler.run_frame(&mut state).unwrap();
        assert_eq!(scheduler.mode(&state), Mode::AwaitingKey);
        assert_eq!(state.pc, PC_START_ADDR);

        // still frozen with no key down
        scheduler.run_frame(&mut state).unwrap();
        assert_eq!(scheduler.mode(&state), Mode::AwaitingKey);

        state.keypad.press(0x3);
        scheduler.run_frame(&mut state).unwrap();
        assert_eq!(scheduler.mode(&state), Mode::Running);
        assert_eq!(state.registers.read(5).unwrap(), 0x3);
        assert_eq!(state.pc, PC_START_ADDR + 2);
    }

    #[test]
    fn key_already_held_at_wait_entry_does_not_resolve() {
        // LD V2, K with key 7 already down when the wait begins
        let mut state = machine_with(&[0xF2, 0x0A]);
        state.keypad.press(0x7);
        let mut scheduler = Scheduler::new(ManualClock::default());

        scheduler.run_frame(&mut state).unwrap();
        assert_eq!(scheduler.mode(&state), Mode::AwaitingKey);

        // no new transition: the held key must not satisfy the wait
        scheduler.run_frame(&mut state).unwrap();
        assert_eq!(scheduler.mode(&state), Mode::AwaitingKey);
        assert_eq!(state.pc, PC_START_ADDR);

        // release and press again: now it is a transition and resolves
        state.keypad.release(0x7);
        scheduler.run_frame(&mut state).unwrap();
        assert_eq!(scheduler.mode(&state), Mode::AwaitingKey);

        state.keypad.press(0x7);
        scheduler.run_frame(&mut state).unwrap();
        assert_eq!(scheduler.mode(&state), Mode::Running);
        assert_eq!(state.registers.read(2).unwrap(), 0x7);
        assert_eq!(state.pc, PC_START_ADDR + 2);
    }

    #[test]
    fn held_key_does_not_mask_a_new_press_on_another_key() {
        let mut state = machine_with(&[0xF0, 0x0A]);
        state.keypad.press(0x2);
        let mut scheduler = Scheduler::new(ManualClock::default());
        scheduler.run_frame(&mut state).unwrap();
        assert_eq!(scheduler.mode(&state), Mode::AwaitingKey);

        // key 5 is the only *new* press, even though 2 < 5 is still down
        state.keypad.press(0x5);
        scheduler.run_frame(&mut state).unwrap();
        assert_eq!(scheduler.mode(&state), Mode::Running);
        assert_eq!(state.registers.read(0).unwrap(), 0x5);
    }

    #[test]
    fn simultaneous_presses_resolve_to_lowest_index() {
        let mut state = machine_with(&[0xF0, 0x0A]);
        let mut scheduler = Scheduler::new(ManualClock::default());
        scheduler.run_frame(&mut state).unwrap();

        state.keypad.press(0xC);
        state.keypad.press(0x4);
        state.keypad.press(0x9);
        scheduler.run_frame(&mut state).unwrap();
        assert_eq!(state.registers.read(0).unwrap(), 0x4);
    }

    #[test]
    fn timer_cadence_is_suspended_while_awaiting_key() {
        let mut state = machine_with(&[0xF0, 0x0A]);
        state.delay_timer = 5;
        let clock = ManualClock::default();
        let mut scheduler = Scheduler::new(clock.clone());
        scheduler.run_frame(&mut state).unwrap();
        assert_eq!(scheduler.mode(&state), Mode::AwaitingKey);

        clock.advance(20 * TIMER_INTERVAL);
        scheduler.run_frame(&mut state).unwrap();
        assert_eq!(state.delay_timer, 5);

        // resume and make sure the pause is not repaid in a burst
        state.keypad.press(0x1);
        scheduler.run_frame(&mut state).unwrap();
        assert_eq!(scheduler.mode(&state), Mode::Running);
        state.memory.write(PC_START_ADDR + 2, 0x12).unwrap();
        state.memory.write(PC_START_ADDR + 3, 0x02).unwrap();
        scheduler.run_frame(&mut state).unwrap();
        assert_eq!(state.delay_timer, 5);
    }

    #[test]
    fn fetch_at_memory_end_faults() {
        let mut state = Chip8State::new();
        state.pc = 0xFFF;
        let mut scheduler = Scheduler::new(ManualClock::default());
        assert_eq!(
            scheduler.step(&mut state),
            Err(Fault::MemoryOutOfRange { addr: 0x1000 })
        );
    }

    #[test]
    fn wait_key_consumes_the_rest_of_the_frame_budget() {
        // LD V1, K then an instruction that must not run this frame
        let mut state = machine_with(&[0xF1, 0x0A, 0x6B, 0xFF]);
        let mut scheduler = Scheduler::new(ManualClock::default());
        scheduler.run_frame(&mut state).unwrap();
        assert_eq!(state.registers.read(0xB).unwrap(), 0x00);
    }
}

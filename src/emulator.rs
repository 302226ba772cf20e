use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::Context;
use crossterm::event::{self, Event, KeyCode};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::Alignment;
use ratatui::style::{Color, Style};
use ratatui::widgets::{Block, Borders, Paragraph};

use crate::scheduler::{Scheduler, SystemClock};
use crate::state::{Chip8State, DISPLAY_HEIGHT, DISPLAY_WIDTH, NUM_KEYS};

const FRAME_RATE: u64 = 60;

/// Frames a key stays latched after a terminal key event. Plain terminals
/// deliver no release events, so a short hold window stands in for the
/// physical key-down interval.
const KEY_HOLD_FRAMES: u8 = 6;

/// Map a physical terminal key to a logical CHIP-8 key index, using the
/// classic 4x4 layout:
///
/// ```text
/// 1 2 3 4        1 2 3 C
/// Q W E R   ->   4 5 6 D
/// A S D F        7 8 9 E
/// Z X C V        A 0 B F
/// ```
fn map_key(code: KeyCode) -> Option<usize> {
    match code {
        KeyCode::Char('1') => Some(0x1),
        KeyCode::Char('2') => Some(0x2),
        KeyCode::Char('3') => Some(0x3),
        KeyCode::Char('4') => Some(0xC),
        KeyCode::Char('q') => Some(0x4),
        KeyCode::Char('w') => Some(0x5),
        KeyCode::Char('e') => Some(0x6),
        KeyCode::Char('r') => Some(0xD),
        KeyCode::Char('a') => Some(0x7),
        KeyCode::Char('s') => Some(0x8),
        KeyCode::Char('d') => Some(0x9),
        KeyCode::Char('f') => Some(0xE),
        KeyCode::Char('z') => Some(0xA),
        KeyCode::Char('x') => Some(0x0),
        KeyCode::Char('c') => Some(0xB),
        KeyCode::Char('v') => Some(0xF),
        _ => None,
    }
}

pub struct Emulator {
    state: Chip8State,
    scheduler: Scheduler<SystemClock>,
    rom: PathBuf,
    key_hold: [u8; NUM_KEYS],
}

impl Emulator {
    pub fn new(rom: PathBuf) -> Self {
        Emulator {
            state: Chip8State::new(),
            scheduler: Scheduler::new(SystemClock::new()),
            rom,
            key_hold: [0; NUM_KEYS],
        }
    }

    pub fn run(&mut self) -> anyhow::Result<()> {
        let rom_data = std::fs::read(&self.rom)
            .with_context(|| format!("failed to read ROM {}", self.rom.display()))?;
        self.state
            .memory
            .load_rom(&rom_data)
            .with_context(|| format!("failed to load ROM {}", self.rom.display()))?;
        log::info!("loaded {} byte ROM from {}", rom_data.len(), self.rom.display());

        enable_raw_mode()?;
        let backend = CrosstermBackend::new(std::io::stdout());
        let mut terminal = Terminal::new(backend)?;
        terminal.clear()?;

        let result = self.session(&mut terminal);
        disable_raw_mode()?;
        result
    }

    fn session(
        &mut self,
        terminal: &mut Terminal<CrosstermBackend<std::io::Stdout>>,
    ) -> anyhow::Result<()> {
        let frame_duration = Duration::from_secs_f64(1.0 / FRAME_RATE as f64);
        let rom_stem: String = self
            .rom
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "Unknown ROM".to_string());

        'mainloop: loop {
            let frame_start = Instant::now();

            while event::poll(Duration::ZERO)? {
                if let Event::Key(key) = event::read()? {
                    if key.code == KeyCode::Esc {
                        terminal.clear()?;
                        break 'mainloop;
                    }
                    if let Some(index) = map_key(key.code) {
                        self.key_hold[index] = KEY_HOLD_FRAMES;
                    }
                }
            }
            self.update_keypad();

            self.scheduler
                .run_frame(&mut self.state)
                .context("emulation session halted")?;

            terminal.draw(|frame| self.render(frame, &rom_stem))?;

            let elapsed = frame_start.elapsed();
            if elapsed < frame_duration {
                std::thread::sleep(frame_duration - elapsed);
            }
        }

        Ok(())
    }

    /// Publish the held keys into the core's key state, the single-writer
    /// side of the keypad contract.
    fn update_keypad(&mut self) {
        for (index, frames) in self.key_hold.iter_mut().enumerate() {
            if *frames > 0 {
                *frames -= 1;
                self.state.keypad.press(index);
            } else {
                self.state.keypad.release(index);
            }
        }
    }

    fn render(&self, frame: &mut ratatui::Frame, rom_name: &str) {
        use ratatui::layout::{Constraint, Direction, Layout};

        let game_width = (DISPLAY_WIDTH as u16) + 2; // borders
        let game_height = (DISPLAY_HEIGHT as u16) + 2;

        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(game_height),
                Constraint::Length(7),
                Constraint::Min(0),
            ])
            .split(frame.area());

        let game_area = if chunks[0].width > game_width {
            let horizontal = Layout::default()
                .direction(Direction::Horizontal)
                .constraints([
                    Constraint::Min(0),
                    Constraint::Length(game_width),
                    Constraint::Min(0),
                ])
                .split(chunks[0]);
            horizontal[1]
        } else {
            chunks[0]
        };

        let mut rows = String::with_capacity(DISPLAY_WIDTH * DISPLAY_HEIGHT + DISPLAY_HEIGHT);
        for y in 0..DISPLAY_HEIGHT {
            for x in 0..DISPLAY_WIDTH {
                rows.push(if self.state.display.is_lit(x, y) {
                    '█'
                } else {
                    ' '
                });
            }
            rows.push('\n');
        }
        // The sound timer only drives an indicator; no audio is synthesized.
        let title = if self.state.sound_timer > 0 {
            format!("{rom_name} ♪")
        } else {
            rom_name.to_string()
        };
        let game = Paragraph::new(rows)
            .block(Block::default().borders(Borders::ALL).title(title))
            .style(Style::default().fg(Color::White));
        frame.render_widget(game, game_area);

        let key_mapping = "Key Mapping (Esc quits):\n\
    1 2 3 4    →    1 2 3 C\n\
    Q W E R    →    4 5 6 D\n\
    A S D F    →    7 8 9 E\n\
    Z X C V    →    A 0 B F";
        let keys = Paragraph::new(key_mapping)
            .alignment(Alignment::Center)
            .block(Block::default().borders(Borders::ALL).title("Keypad"))
            .style(Style::default().fg(Color::Yellow));
        frame.render_widget(keys, chunks[1]);
    }
}

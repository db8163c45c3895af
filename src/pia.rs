//! The Apple-1 PIA: keyboard latch on port A, display latch on port B.

use std::collections::VecDeque;

use log::{debug, trace};
use serde::{Deserialize, Serialize};
use serde_big_array::BigArray;

use crate::error::ConfigError;

/// Written to DSP by the monitor right after RESET to set up the port.
pub const DISPLAY_CALIBRATION: u8 = 0x7F;

/// Backspace is delivered as the monitor's rubout key.
pub const RUBOUT: u8 = 0x5F;

pub const CARRIAGE_RETURN: u8 = 0x0D;

/// Everything the host reports to the machine once per poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Input {
    /// Key-down state indexed by character code.
    pub keys: [bool; 256],
    pub reset_button: bool,
    pub clear_screen_button: bool,
}

impl Default for Input {
    fn default() -> Self {
        Input {
            keys: [false; 256],
            reset_button: false,
            clear_screen_button: false,
        }
    }
}

impl Input {
    pub fn with_keys(codes: &[u8]) -> Self {
        let mut input = Input::default();
        for &code in codes {
            input.keys[code as usize] = true;
        }
        input
    }
}

/// Maps a character to the code the keyboard would latch for it.
pub fn key_code(c: char) -> Option<u8> {
    match c {
        '\n' | '\r' => Some(CARRIAGE_RETURN),
        '\u{8}' => Some(RUBOUT),
        '\u{1b}' => Some(0x1B),
        ' '..='~' => Some((c as u8).to_ascii_uppercase()),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Keyboard {
    #[serde(with = "BigArray")]
    last_key_state: [bool; 256],
    new_key_pending: bool,
    new_key: u8,
    /// Synthetic keystrokes, fed one per poll while no key is pending.
    auto_type: VecDeque<u8>,
}

impl Default for Keyboard {
    fn default() -> Self {
        Keyboard::new()
    }
}

impl Keyboard {
    pub fn new() -> Self {
        Keyboard {
            last_key_state: [false; 256],
            new_key_pending: false,
            new_key: 0,
            auto_type: VecDeque::new(),
        }
    }

    /// KBD: the last key with bit 7 set. Reading acknowledges it.
    pub fn read_data(&mut self) -> u8 {
        self.new_key_pending = false;
        0x80 | self.new_key
    }

    /// KBDCR: bit 7 set while a key is waiting.
    pub fn read_status(&self) -> u8 {
        if self.new_key_pending {
            0x80
        } else {
            0x00
        }
    }

    pub fn last_key(&self) -> u8 {
        self.new_key
    }

    pub fn is_key_pending(&self) -> bool {
        self.new_key_pending
    }

    /// Latches `code` as a freshly pressed key.
    pub fn press(&mut self, code: u8) {
        self.new_key = code & 0x7F;
        self.new_key_pending = true;
    }

    /// Edge-detects key-downs against the previous poll, then feeds the
    /// auto-type queue if nothing is pending.
    pub fn update(&mut self, keys: &[bool; 256]) {
        let mut folded = [false; 256];
        for (code, &down) in keys.iter().enumerate().take(128) {
            let code = code as u8;
            let code = match code {
                // only the lower-case slots are honoured
                b'A'..=b'Z' => continue,
                b'a'..=b'z' => code & !0x20,
                0x08 => RUBOUT,
                _ => code,
            };
            folded[code as usize] |= down;
        }

        for (code, &down) in folded.iter().enumerate() {
            if down && !self.last_key_state[code] {
                self.press(code as u8);
            }
            self.last_key_state[code] = down;
        }

        if !self.new_key_pending {
            if let Some(code) = self.auto_type.pop_front() {
                self.press(code);
            }
        }
    }

    /// Appends `text` to the auto-type queue. Nothing is queued if any
    /// character cannot be typed.
    pub fn queue_text(&mut self, text: &str) -> Result<(), ConfigError> {
        let codes = text
            .chars()
            .map(|c| key_code(c).ok_or(ConfigError::UntypeableChar(c)))
            .collect::<Result<Vec<u8>, _>>()?;
        debug!("queued {} auto-type keystrokes", codes.len());
        self.auto_type.extend(codes);
        Ok(())
    }

    pub fn auto_type_remaining(&self) -> usize {
        self.auto_type.len()
    }
}

/// Display latch and the single-slot mailbox towards the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Display {
    next_char: u8,
    requested: bool,
    ready: bool,
    /// Drained character the host has not accepted yet.
    output: Option<u8>,
    initialized: bool,
    clear_requested: bool,
}

impl Default for Display {
    fn default() -> Self {
        Display::new()
    }
}

impl Display {
    pub fn new() -> Self {
        Display {
            next_char: 0,
            requested: false,
            ready: true,
            output: None,
            initialized: false,
            clear_requested: false,
        }
    }

    /// DSP read: bit 7 set while busy, low bits echo the last character.
    pub fn read_status(&self) -> u8 {
        let busy = if self.ready { 0x00 } else { 0x80 };
        busy | self.next_char
    }

    pub fn write_data(&mut self, value: u8) {
        if !self.initialized {
            if value == DISPLAY_CALIBRATION {
                debug!("display calibrated");
                self.initialized = true;
            } else {
                trace!("display write ${value:02X} before calibration dropped");
            }
            return;
        }
        self.next_char = value & 0x7F;
        self.requested = true;
        self.ready = false;
    }

    /// One clock of the display side of the handshake.
    pub fn tick(&mut self) {
        if self.requested && self.ready {
            self.requested = false;
            self.output = Some(self.next_char);
        }
        if self.output.is_none() {
            self.ready = true;
        }
    }

    pub fn run_cycles(&mut self, cycles: u32) {
        for _ in 0..cycles {
            self.tick();
        }
    }

    /// Hands the drained character to the host, freeing the mailbox.
    pub fn take_output(&mut self) -> Option<u8> {
        self.output.take()
    }

    pub fn pending_output(&self) -> Option<u8> {
        self.output
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// RESET: the port has to be calibrated again.
    pub fn reset(&mut self) {
        self.initialized = false;
    }

    pub fn request_clear(&mut self) {
        self.clear_requested = true;
    }

    pub fn take_clear_request(&mut self) -> bool {
        std::mem::take(&mut self.clear_requested)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calibrated() -> Display {
        let mut display = Display::new();
        display.write_data(DISPLAY_CALIBRATION);
        display
    }

    #[test]
    fn test_held_key_reported_once() {
        let mut keyboard = Keyboard::new();
        let held = Input::with_keys(b"q");

        keyboard.update(&held.keys);
        assert!(keyboard.is_key_pending());
        assert_eq!(keyboard.read_data(), 0x80 | b'Q');

        keyboard.update(&held.keys);
        assert!(!keyboard.is_key_pending());

        keyboard.update(&Input::default().keys);
        keyboard.update(&held.keys);
        assert!(keyboard.is_key_pending());
    }

    #[test]
    fn test_upper_case_slots_ignored() {
        let mut keyboard = Keyboard::new();
        keyboard.update(&Input::with_keys(b"Q").keys);
        assert!(!keyboard.is_key_pending());
    }

    #[test]
    fn test_high_codes_ignored() {
        let mut keyboard = Keyboard::new();
        keyboard.update(&Input::with_keys(&[0x80, 0xC1]).keys);
        assert!(!keyboard.is_key_pending());
    }

    #[test]
    fn test_backspace_is_rubout() {
        let mut keyboard = Keyboard::new();
        keyboard.update(&Input::with_keys(&[0x08]).keys);
        assert_eq!(keyboard.read_data(), 0x80 | RUBOUT);

        // Holding backspace together with '_' is still one held key
        keyboard.update(&Input::with_keys(&[0x08, b'_']).keys);
        assert!(!keyboard.is_key_pending());
    }

    #[test]
    fn test_auto_type_waits_for_pending_key() {
        let mut keyboard = Keyboard::new();
        keyboard.queue_text("ab\n").unwrap();

        keyboard.update(&Input::default().keys);
        assert_eq!(keyboard.last_key(), b'A');
        assert_eq!(keyboard.auto_type_remaining(), 2);

        // Not acknowledged yet, so nothing more is fed
        keyboard.update(&Input::default().keys);
        assert_eq!(keyboard.auto_type_remaining(), 2);

        keyboard.read_data();
        keyboard.update(&Input::default().keys);
        assert_eq!(keyboard.last_key(), b'B');
        keyboard.read_data();
        keyboard.update(&Input::default().keys);
        assert_eq!(keyboard.last_key(), CARRIAGE_RETURN);
        assert_eq!(keyboard.auto_type_remaining(), 0);
    }

    #[test]
    fn test_live_key_goes_before_auto_type() {
        let mut keyboard = Keyboard::new();
        keyboard.queue_text("x").unwrap();
        keyboard.update(&Input::with_keys(b"z").keys);
        assert_eq!(keyboard.last_key(), b'Z');
        assert_eq!(keyboard.auto_type_remaining(), 1);
    }

    #[test]
    fn test_queue_rejects_untypeable_text() {
        let mut keyboard = Keyboard::new();
        assert_eq!(
            keyboard.queue_text("ok\u{e9}"),
            Err(ConfigError::UntypeableChar('\u{e9}'))
        );
        assert_eq!(keyboard.auto_type_remaining(), 0);
    }

    #[test]
    fn test_display_ignores_writes_before_calibration() {
        let mut display = Display::new();
        display.write_data(0xC1);
        assert!(display.is_ready());
        display.run_cycles(4);
        assert_eq!(display.take_output(), None);
        assert!(!display.is_initialized());
    }

    #[test]
    fn test_display_handshake() {
        let mut display = calibrated();
        display.write_data(0xC1);
        assert_eq!(display.read_status(), 0x80 | 0x41);

        // first clock only re-arms ready, second drains
        display.tick();
        assert!(display.is_ready());
        assert_eq!(display.pending_output(), None);
        display.tick();
        assert_eq!(display.pending_output(), Some(0x41));
        assert_eq!(display.read_status() & 0x80, 0);

        assert_eq!(display.take_output(), Some(0x41));
        assert_eq!(display.take_output(), None);
    }

    #[test]
    fn test_display_stays_busy_until_host_accepts() {
        let mut display = calibrated();
        display.write_data(b'A');
        display.run_cycles(2);
        display.write_data(b'B');
        display.run_cycles(10);
        assert!(!display.is_ready());
        assert_eq!(display.pending_output(), Some(b'A'));

        assert_eq!(display.take_output(), Some(b'A'));
        display.run_cycles(2);
        assert_eq!(display.take_output(), Some(b'B'));
    }

    #[test]
    fn test_display_last_write_wins() {
        let mut display = calibrated();
        display.write_data(b'A');
        display.write_data(b'B');
        display.run_cycles(2);
        assert_eq!(display.take_output(), Some(b'B'));
        display.run_cycles(4);
        assert_eq!(display.take_output(), None);
    }

    #[test]
    fn test_display_reset_requires_recalibration() {
        let mut display = calibrated();
        display.reset();
        display.write_data(b'A');
        display.run_cycles(4);
        assert_eq!(display.take_output(), None);
        display.write_data(DISPLAY_CALIBRATION);
        assert!(display.is_initialized());
    }

    #[test]
    fn test_clear_request_is_one_shot() {
        let mut display = Display::new();
        display.request_clear();
        assert!(display.take_clear_request());
        assert!(!display.take_clear_request());
    }
}

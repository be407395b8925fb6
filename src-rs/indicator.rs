//! Host-side model of the indicator firmware.
//!
//! The board polls its UART and button once per tick. A line that is exactly
//! `flash`, or a pressed button, plays one throb: eight spoke glyphs with a
//! fading two-frame trail. Otherwise it shows the static ready glyph.

use std::time::Duration;

use crate::config::FLASH_PAYLOAD;

pub const TICK: Duration = Duration::from_millis(100);
pub const MAX_BRIGHTNESS: u8 = 9;

const HEAD: u8 = 9;
const TRAIL_1: u8 = 6;
const TRAIL_2: u8 = 4;

pub type Frame = [[u8; 5]; 5];

const GLYPHS: [[&str; 5]; 8] = [
    ["00100", "00100", "00100", "00000", "00000"],
    ["10000", "01000", "00100", "00000", "00000"],
    ["00000", "00000", "11100", "00000", "00000"],
    ["00000", "00000", "00100", "01000", "10000"],
    ["00000", "00000", "00100", "00100", "00100"],
    ["00000", "00000", "00100", "00010", "00001"],
    ["00000", "00000", "00111", "00000", "00000"],
    ["00001", "00010", "00100", "00000", "00000"],
];

pub const THROB_FRAMES: usize = GLYPHS.len();

fn glyph(index: usize, level: u8) -> Frame {
    let mut frame = [[0u8; 5]; 5];
    for (row, bits) in frame.iter_mut().zip(GLYPHS[index % THROB_FRAMES]) {
        for (led, bit) in row.iter_mut().zip(bits.bytes()) {
            if bit == b'1' {
                *led = level;
            }
        }
    }
    frame
}

fn overlay(frames: &[Frame]) -> Frame {
    let mut out = [[0u8; 5]; 5];
    for frame in frames {
        for (out_row, row) in out.iter_mut().zip(frame) {
            for (led, level) in out_row.iter_mut().zip(row) {
                *led = led.saturating_add(*level).min(MAX_BRIGHTNESS);
            }
        }
    }
    out
}

pub fn ready_frame() -> Frame {
    glyph(0, HEAD)
}

/// Frame `n` of the throb; trail indices wrap, so frame 0 trails glyphs 7 and 6.
pub fn throb_frame(n: usize) -> Frame {
    let n = n % THROB_FRAMES;
    let prev = (n + THROB_FRAMES - 1) % THROB_FRAMES;
    let prev2 = (n + THROB_FRAMES - 2) % THROB_FRAMES;
    overlay(&[glyph(n, HEAD), glyph(prev, TRAIL_1), glyph(prev2, TRAIL_2)])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndicatorState {
    IdleDisplay,
    ThrobAnimation { frame: usize },
}

#[derive(Debug)]
pub struct Indicator {
    state: IndicatorState,
    rx: Vec<u8>,
    button: bool,
}

impl Default for Indicator {
    fn default() -> Self {
        Self::new()
    }
}

impl Indicator {
    pub fn new() -> Self {
        Self {
            state: IndicatorState::IdleDisplay,
            rx: Vec::new(),
            button: false,
        }
    }

    pub fn state(&self) -> IndicatorState {
        self.state
    }

    /// Bytes arriving on the UART; buffered until the next idle poll.
    pub fn receive(&mut self, bytes: &[u8]) {
        self.rx.extend_from_slice(bytes);
    }

    pub fn set_button(&mut self, pressed: bool) {
        self.button = pressed;
    }

    /// Advances one tick and returns what the matrix shows during it.
    ///
    /// Input is only read while idle; the animation itself does not poll. All
    /// buffered bytes are consumed as one line, so two payloads that arrive
    /// back to back read as `flashflash` and are ignored.
    pub fn tick(&mut self) -> Frame {
        match self.state {
            IndicatorState::IdleDisplay => {
                let line = std::mem::take(&mut self.rx);
                if line.as_slice() == FLASH_PAYLOAD || self.button {
                    self.start_throb()
                } else {
                    ready_frame()
                }
            }
            IndicatorState::ThrobAnimation { frame } => {
                let next = frame + 1;
                if next < THROB_FRAMES {
                    self.state = IndicatorState::ThrobAnimation { frame: next };
                    throb_frame(next)
                } else {
                    self.state = IndicatorState::IdleDisplay;
                    self.tick()
                }
            }
        }
    }

    fn start_throb(&mut self) -> Frame {
        self.state = IndicatorState::ThrobAnimation { frame: 0 };
        throb_frame(0)
    }
}

pub fn render_ascii(frame: &Frame) -> String {
    frame
        .iter()
        .map(|row| row.iter().map(|level| char::from(b'0' + level)).collect::<String>())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_ticks(indicator: &mut Indicator, n: usize) -> Vec<(IndicatorState, Frame)> {
        (0..n)
            .map(|_| {
                let frame = indicator.tick();
                (indicator.state(), frame)
            })
            .collect()
    }

    #[test]
    fn idle_shows_ready_glyph() {
        let mut indicator = Indicator::new();
        let frame = indicator.tick();
        assert_eq!(frame, ready_frame());
        assert_eq!(
            render_ascii(&frame),
            "00900\n00900\n00900\n00000\n00000"
        );
        assert_eq!(indicator.state(), IndicatorState::IdleDisplay);
    }

    #[test]
    fn flash_plays_one_full_throb_then_returns_to_ready() {
        let mut indicator = Indicator::new();
        indicator.receive(b"flash");
        let ticks = run_ticks(&mut indicator, THROB_FRAMES + 1);

        for (n, (state, frame)) in ticks.iter().take(THROB_FRAMES).enumerate() {
            assert_eq!(*state, IndicatorState::ThrobAnimation { frame: n });
            assert_eq!(*frame, throb_frame(n));
        }
        let (state, frame) = ticks[THROB_FRAMES];
        assert_eq!(state, IndicatorState::IdleDisplay);
        assert_eq!(frame, ready_frame());
    }

    #[test]
    fn throb_frame_layers_head_and_fading_trail() {
        // frame 2: head is the west spoke, trail is NW at 6 and N at 4; centre saturates
        assert_eq!(
            render_ascii(&throb_frame(2)),
            "60400\n06400\n99900\n00000\n00000"
        );
    }

    #[test]
    fn first_throb_frame_wraps_trail() {
        let frame = throb_frame(0);
        // head N spoke, trail NE (glyph 7) at 6, E (glyph 6) at 4
        assert_eq!(render_ascii(&frame), "00906\n00960\n00944\n00000\n00000");
    }

    #[test]
    fn button_triggers_throb() {
        let mut indicator = Indicator::new();
        indicator.set_button(true);
        indicator.tick();
        assert_eq!(
            indicator.state(),
            IndicatorState::ThrobAnimation { frame: 0 }
        );
    }

    #[test]
    fn button_held_through_a_throb_starts_another() {
        let mut indicator = Indicator::new();
        indicator.receive(b"flash");
        indicator.set_button(true);
        indicator.tick();
        run_ticks(&mut indicator, THROB_FRAMES - 1);
        assert_eq!(
            indicator.state(),
            IndicatorState::ThrobAnimation {
                frame: THROB_FRAMES - 1
            }
        );

        // the idle poll after the last frame sees the button still down
        indicator.tick();
        assert_eq!(
            indicator.state(),
            IndicatorState::ThrobAnimation { frame: 0 }
        );

        indicator.set_button(false);
        run_ticks(&mut indicator, THROB_FRAMES);
        assert_eq!(indicator.state(), IndicatorState::IdleDisplay);
    }

    #[test]
    fn other_bytes_are_ignored() {
        let mut indicator = Indicator::new();
        indicator.receive(b"flas");
        assert_eq!(indicator.tick(), ready_frame());
        indicator.receive(b"flashflash");
        assert_eq!(indicator.tick(), ready_frame());
        assert_eq!(indicator.state(), IndicatorState::IdleDisplay);
    }

    #[test]
    fn bytes_during_throb_are_read_after_it() {
        let mut indicator = Indicator::new();
        indicator.receive(b"flash");
        indicator.tick();
        indicator.receive(b"flash");
        run_ticks(&mut indicator, THROB_FRAMES - 1);
        // the queued payload is picked up on the first idle poll
        indicator.tick();
        assert_eq!(
            indicator.state(),
            IndicatorState::ThrobAnimation { frame: 0 }
        );
    }
}

//! Controller register map
//!
//! Holding-register layout of the stepper controllers (SMCD14 family).
//! Floating point values occupy two consecutive registers holding an
//! IEEE-754 single, low word first.
//!
//! | address | name             | access | encoding                 |
//! |---------|------------------|--------|--------------------------|
//! | 0       | MOVE_TYPE        | write  | 1 absolute, 2 relative   |
//! | 2       | TARGET_POSITION  | write  | f32, mm                  |
//! | 8       | TARGET_SPEED     | write  | f32, mm/s                |
//! | 14      | MOTOR_ON         | write  | 1 energise               |
//! | 15      | START            | pulse  | rising edge starts move  |
//! | 16      | STOP             | pulse  | decelerate and halt      |
//! | 17      | STATUS           | read   | bit 0 running, bit 4 in position |
//! | 18      | ACTUAL_POSITION  | read   | f32, mm                  |
//! | 20      | ERROR_CODE       | read   | u16                      |
//! | 22      | CLEAR_ERROR      | pulse  | clears ERROR_CODE        |
//! | 24      | HOME             | pulse  | runs the homing sequence |
//! | 72      | BACKLASH         | write  | f32, mm                  |

use std::fmt;

/// Move type selector
pub const MOVE_TYPE: u16 = 0;
/// Target position, two registers
pub const TARGET_POSITION: u16 = 2;
/// Target speed, two registers
pub const TARGET_SPEED: u16 = 8;
/// Motor enable
pub const MOTOR_ON: u16 = 14;
/// Start trigger
pub const START: u16 = 15;
/// Stop trigger
pub const STOP: u16 = 16;
/// Status word
pub const STATUS: u16 = 17;
/// Actual position, two registers
pub const ACTUAL_POSITION: u16 = 18;
/// Last error code
pub const ERROR_CODE: u16 = 20;
/// Error clear trigger
pub const CLEAR_ERROR: u16 = 22;
/// Homing trigger
pub const HOME: u16 = 24;
/// Backlash compensation, two registers
pub const BACKLASH: u16 = 72;

/// Register name for traffic logs
pub fn name(address: u16) -> &'static str {
    match address {
        MOVE_TYPE => "MOVE_TYPE",
        TARGET_POSITION => "TARGET_POSITION",
        TARGET_SPEED => "TARGET_SPEED",
        MOTOR_ON => "MOTOR_ON",
        START => "START",
        STOP => "STOP",
        STATUS => "STATUS",
        ACTUAL_POSITION => "ACTUAL_POSITION",
        ERROR_CODE => "ERROR_CODE",
        CLEAR_ERROR => "CLEAR_ERROR",
        HOME => "HOME",
        BACKLASH => "BACKLASH",
        _ => "UNKNOWN",
    }
}

/// Encode a value as two registers, low word first
pub fn encode_f32(value: f64) -> [u16; 2] {
    let bits = (value as f32).to_bits();
    [(bits & 0xFFFF) as u16, (bits >> 16) as u16]
}

/// Decode two registers, low word first
pub fn decode_f32(words: [u16; 2]) -> f64 {
    let bits = (u32::from(words[1]) << 16) | u32::from(words[0]);
    f64::from(f32::from_bits(bits))
}

/// Decode the first two words of a slice, `None` if it is too short
pub fn decode_f32_slice(words: &[u16]) -> Option<f64> {
    match words {
        [lo, hi, ..] => Some(decode_f32([*lo, *hi])),
        _ => None,
    }
}

/// MOVE_TYPE values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum MoveType {
    /// Target is an absolute position.
    Absolute = 1,
    /// Target is a distance from the current position.
    Relative = 2,
}

impl From<MoveType> for u16 {
    fn from(value: MoveType) -> Self {
        value as u16
    }
}

/// STATUS register contents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatusWord(pub u16);

impl StatusWord {
    /// Running flag
    pub const RUNNING: u16 = 1 << 0;
    /// In-position flag
    pub const IN_POSITION: u16 = 1 << 4;

    /// Whether the axis is executing a move
    pub fn running(&self) -> bool {
        self.0 & Self::RUNNING != 0
    }

    /// Whether the axis reached its target
    pub fn in_position(&self) -> bool {
        self.0 & Self::IN_POSITION != 0
    }
}

impl fmt::Display for StatusWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "0x{:04X} (running={}, in_position={})",
            self.0,
            self.running(),
            self.in_position()
        )
    }
}

//! MCB macro/micro status code tables carried in `$E` records.

/// Macro codes that qualify the micro code as a command-error detail.
pub const SYNTAX_ERROR: u16 = 129;
pub const EXECUTION_ERROR: u16 = 131;
pub const INVALID_COMMAND: u16 = 132;

/// Micro code reported by START/STOP on an input already in that state.
pub const ALREADY_STARTED_STOPPED: u16 = 1;

pub fn macro_message(code: u16) -> &'static str {
    match code {
        0 => "success",
        1 => "power-up just occurred",
        2 => "battery-backed data lost",
        SYNTAX_ERROR => "command syntax error",
        EXECUTION_ERROR => "command execution error",
        INVALID_COMMAND => "invalid command",
        _ => "unknown macro code",
    }
}

/// Micro-code description; its meaning depends on the macro code.
pub fn micro_message(macro_code: u16, code: u16) -> &'static str {
    if matches!(macro_code, SYNTAX_ERROR | EXECUTION_ERROR) {
        return match code {
            1 => "invalid verb",
            2 => "invalid noun",
            4 => "invalid modifier",
            128 => "invalid first parameter",
            129 => "invalid second parameter",
            130 => "invalid third parameter",
            131 => "invalid fourth parameter",
            132 => "invalid number of parameters",
            133 => "invalid command",
            134 => "response buffer too small",
            135 => "not applicable while active",
            136 => "invalid command in this mode",
            137 => "hardware error",
            138 => "requested data not found",
            _ => "unknown command error",
        };
    }
    match code {
        0 => "success",
        ALREADY_STARTED_STOPPED => "input already started/stopped",
        2 => "preset already exceeded",
        4 => "input not started/stopped",
        64 => "parameter was rounded",
        128 => "no sample data available",
        _ => "unknown micro code",
    }
}

pub mod list;
pub mod watch;

use std::process::ExitCode;

/// Configuration or strict-mode load error
pub const EXIT_CONFIG_ERROR: u8 = 2;

/// Map a suite exit code (0 or 1) onto the process exit code
pub fn exit_code(code: i32) -> ExitCode {
    u8::try_from(code).map_or(ExitCode::FAILURE, ExitCode::from)
}

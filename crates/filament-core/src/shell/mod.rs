//! Custom-shell support: the bridge adapting a [`CustomShell`] to the
//! byte-I/O contract of a pseudo-terminal, plus the built-in echo shell.
//!
//! [`CustomShell`]: filament_common::shell::CustomShell

mod bridge;
mod echo;

pub use bridge::{ExitStatus, ShellBridge};
pub use echo::EchoShell;

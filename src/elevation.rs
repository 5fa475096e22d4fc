//! Privilege elevation for engine commands
//!
//! Chain rotation needs root. At boot chainrot normally already runs as
//! root and executes `iptables`/`ip6tables` directly; from an operator shell
//! it elevates only the engine binaries.
//!
//! # Elevation Strategy
//!
//! - **Root**: the engine binary is executed directly
//! - **Preferred**: `run0` when available (systemd v256+, no SUID)
//! - **Terminal fallback**: `sudo`
//! - **No terminal**: `pkexec`
//!
//! # Environment Variables
//!
//! - `CHAINROT_ELEVATION_METHOD`: Force a specific elevation method (`sudo`, `run0`, or `pkexec`).
//!   Useful for scripts with sudoers NOPASSWD rules where you want to bypass run0/polkit.
//! - `CHAINROT_TEST_NO_ELEVATION`: Bypass elevation entirely (for testing only).
//!
//! # Security
//!
//! - Only iptables-family binaries are ever elevated
//! - Arguments are passed as an argv vector, never through a shell

use std::io;
use std::path::Path;
use tokio::process::Command;

/// Error type for privilege elevation operations
#[derive(Debug, thiserror::Error)]
pub enum ElevationError {
    /// pkexec binary not found in PATH
    #[error("pkexec not found - please install PolicyKit")]
    PkexecNotFound,

    /// Requested elevation method is not available (binary not found)
    #[error("Elevation method '{0}' is not available (binary not found)")]
    MethodNotAvailable(String),

    /// Invalid value for `CHAINROT_ELEVATION_METHOD`
    #[error("Invalid CHAINROT_ELEVATION_METHOD '{0}'. Valid options: sudo, run0, pkexec")]
    InvalidMethod(String),

    /// Program is not an iptables-family binary
    #[error("Refusing to elevate '{0}': only iptables/ip6tables binaries may be elevated")]
    DisallowedProgram(String),

    /// Generic I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Checks if a binary exists in PATH
fn binary_exists(name: &str) -> bool {
    std::env::var_os("PATH")
        .and_then(|paths| {
            std::env::split_paths(&paths).find_map(|dir| {
                let full_path = dir.join(name);
                if full_path.is_file() {
                    Some(full_path)
                } else {
                    None
                }
            })
        })
        .is_some()
}

/// Whether `program` names an iptables-family binary (`iptables`, `ip6tables-legacy`, ...)
pub fn is_engine_binary(program: &str) -> bool {
    Path::new(program)
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with("iptables") || n.starts_with("ip6tables"))
}

fn wrapped(elevator: &str, program: &str, args: &[String]) -> Command {
    let mut cmd = Command::new(elevator);
    cmd.arg(program).args(args);
    cmd
}

/// Builds a command running the engine binary `program` with root privileges.
///
/// # Errors
///
/// Returns `Err` if elevation is needed but `program` is not an iptables-family
/// binary, the forced method is invalid, or no elevation binary is available.
pub fn create_elevated_engine_command(
    program: &str,
    args: &[String],
) -> Result<Command, ElevationError> {
    use std::os::fd::AsFd;

    // 1. Strict Test Mode Override (Highest Priority)
    if std::env::var("CHAINROT_TEST_NO_ELEVATION").is_ok() {
        let mut cmd = Command::new(program);
        cmd.args(args);
        return Ok(cmd);
    }

    // 2. Direct Root Execution (the boot-time path)
    if nix::unistd::getuid().is_root() {
        let mut cmd = Command::new(program);
        cmd.args(args);
        return Ok(cmd);
    }

    if !is_engine_binary(program) {
        return Err(ElevationError::DisallowedProgram(program.to_string()));
    }

    // 3. Explicit elevation method override
    if let Ok(method) = std::env::var("CHAINROT_ELEVATION_METHOD") {
        let method = method.to_lowercase();
        if !method.is_empty() {
            return match method.as_str() {
                "sudo" | "run0" | "pkexec" => {
                    if binary_exists(&method) {
                        Ok(wrapped(&method, program, args))
                    } else {
                        Err(ElevationError::MethodNotAvailable(method))
                    }
                }
                _ => Err(ElevationError::InvalidMethod(method)),
            };
        }
    }

    // 4. Automatic detection - prefer run0, fall back to sudo/pkexec
    if binary_exists("run0") {
        return Ok(wrapped("run0", program, args));
    }

    let is_atty = nix::unistd::isatty(std::io::stdin().as_fd()).unwrap_or(false);
    if is_atty {
        Ok(wrapped("sudo", program, args))
    } else {
        if !binary_exists("pkexec") {
            return Err(ElevationError::PkexecNotFound);
        }
        Ok(wrapped("pkexec", program, args))
    }
}

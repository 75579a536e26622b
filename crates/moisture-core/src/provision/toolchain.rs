//! Build/upload toolchain.
//!
//! arduino-cli is treated as an opaque command: arguments in, combined
//! output lines and an exit code out.

use std::ffi::OsStr;
use std::fmt;
use std::io::{BufRead, BufReader, Read};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::mpsc::{self, Sender};
use std::thread;

use thiserror::Error;
use tracing::{debug, info, instrument};

/// Standard arduino-cli install locations, probed in order.
pub const TOOLCHAIN_CANDIDATES: [&str; 2] = ["/usr/local/bin/arduino-cli", "/usr/bin/arduino-cli"];

#[derive(Error, Debug)]
pub enum ToolchainError {
    #[error("arduino-cli not found")]
    NotFound,

    #[error("Failed to run {program}: {message}")]
    SpawnFailed { program: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Exit status of a toolchain command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandStatus {
    /// Exit code; `None` when killed by a signal.
    pub code: Option<i32>,
}

impl CommandStatus {
    pub const SUCCESS: Self = Self { code: Some(0) };

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "rc={}", code),
            None => write!(f, "terminated by signal"),
        }
    }
}

/// Compiler/uploader used by the provisioning workflow.
///
/// Output lines are handed to `output` as they arrive.
pub trait Toolchain: Send + Sync {
    fn compile(
        &self,
        fqbn: &str,
        source: &Path,
        output: &mut dyn FnMut(&str),
    ) -> Result<CommandStatus, ToolchainError>;

    fn upload(
        &self,
        fqbn: &str,
        port: &Path,
        source: &Path,
        output: &mut dyn FnMut(&str),
    ) -> Result<CommandStatus, ToolchainError>;
}

/// arduino-cli driven as a subprocess.
#[derive(Debug, Clone)]
pub struct ArduinoCli {
    program: PathBuf,
}

impl ArduinoCli {
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Use `explicit` if given, else the first executable candidate.
    pub fn discover(explicit: Option<&Path>) -> Result<Self, ToolchainError> {
        let found = match explicit {
            Some(path) => is_executable(path).then(|| path.to_path_buf()),
            None => TOOLCHAIN_CANDIDATES
                .iter()
                .map(Path::new)
                .find(|p| is_executable(p))
                .map(Path::to_path_buf),
        };

        let program = found.ok_or(ToolchainError::NotFound)?;
        info!(program = %program.display(), "Using arduino-cli");
        Ok(Self { program })
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    #[instrument(level = "debug", skip(self, args, output), fields(program = %self.program.display()))]
    fn run(
        &self,
        args: &[&OsStr],
        output: &mut dyn FnMut(&str),
    ) -> Result<CommandStatus, ToolchainError> {
        let mut child = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ToolchainError::SpawnFailed {
                program: self.program.display().to_string(),
                message: e.to_string(),
            })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let (tx, rx) = mpsc::channel();

        thread::scope(|scope| {
            if let Some(stdout) = stdout {
                let tx = tx.clone();
                scope.spawn(move || forward_lines(stdout, tx));
            }
            if let Some(stderr) = stderr {
                let tx = tx.clone();
                scope.spawn(move || forward_lines(stderr, tx));
            }
            drop(tx);

            for line in rx {
                output(&line);
            }
        });

        let status = child.wait()?;
        debug!(code = ?status.code(), "Command exited");
        Ok(CommandStatus {
            code: status.code(),
        })
    }
}

impl Toolchain for ArduinoCli {
    fn compile(
        &self,
        fqbn: &str,
        source: &Path,
        output: &mut dyn FnMut(&str),
    ) -> Result<CommandStatus, ToolchainError> {
        self.run(
            &[
                OsStr::new("compile"),
                OsStr::new("--fqbn"),
                OsStr::new(fqbn),
                source.as_os_str(),
            ],
            output,
        )
    }

    fn upload(
        &self,
        fqbn: &str,
        port: &Path,
        source: &Path,
        output: &mut dyn FnMut(&str),
    ) -> Result<CommandStatus, ToolchainError> {
        self.run(
            &[
                OsStr::new("upload"),
                OsStr::new("-p"),
                port.as_os_str(),
                OsStr::new("--fqbn"),
                OsStr::new(fqbn),
                source.as_os_str(),
            ],
            output,
        )
    }
}

/// Send each line of `reader` (lossily decoded) until EOF.
fn forward_lines<R: Read>(reader: R, tx: Sender<String>) {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                if tx.send(line.trim_end_matches(['\r', '\n']).to_string()).is_err() {
                    break;
                }
            }
        }
    }
}

fn is_executable(path: &Path) -> bool {
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

//! External collaborators the controller is driven by.
//!
//! Everything in §6 that is explicitly out of scope for the core — serial
//! transport, persisted macro storage, file monitoring, task execution —
//! is a trait here. The controller is constructed with `Arc<dyn Trait>`
//! instances (or a fake, in tests) rather than reaching for ambient
//! singletons (§9 "Global singletons").

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::io;
use std::pin::Pin;

/// Boxed future returned by the async collaborator traits below. These
/// traits are used as trait objects (`Arc<dyn FileMonitor>`), and stable
/// Rust does not yet support `async fn` in that position, so the return
/// type is spelled out by hand rather than pulling in an extra crate for it.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A configured macro: an id/name pair and the G-code body to feed when run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Macro {
    pub id: String,
    pub name: String,
    pub content: String,
}

/// Read-only access to the persisted macro set. The actual store (file,
/// database, ...) lives outside the core (§1 Non-goals).
pub trait MacroStore: Send + Sync {
    fn macros(&self) -> Vec<Macro>;

    fn find(&self, id: &str) -> Option<Macro> {
        self.macros().into_iter().find(|m| m.id == id)
    }
}

/// An in-memory macro store, useful for tests and for embedders that
/// configure macros programmatically rather than from a file.
#[derive(Clone, Debug, Default)]
pub struct InMemoryMacroStore {
    macros: Vec<Macro>,
}

impl InMemoryMacroStore {
    pub fn new(macros: Vec<Macro>) -> Self {
        Self { macros }
    }
}

impl MacroStore for InMemoryMacroStore {
    fn macros(&self) -> Vec<Macro> {
        self.macros.clone()
    }
}

/// Reads G-code files from disk on behalf of a watch-directory feature.
/// The actual filesystem watch lives outside the core (§1 Non-goals); the
/// core only needs to read a path it was told about.
pub trait FileMonitor: Send + Sync {
    fn read_file<'a>(&'a self, path: &'a str) -> BoxFuture<'a, io::Result<String>>;
}

/// Reads files straight off the local filesystem via `tokio::fs`.
#[derive(Clone, Debug, Default)]
pub struct TokioFileMonitor;

impl FileMonitor for TokioFileMonitor {
    fn read_file<'a>(&'a self, path: &'a str) -> BoxFuture<'a, io::Result<String>> {
        Box::pin(async move { tokio::fs::read_to_string(path).await })
    }
}

/// Runs an external shell command string for `system`-kind event triggers.
pub trait TaskRunner: Send + Sync {
    fn run<'a>(&'a self, command: &'a str) -> BoxFuture<'a, io::Result<()>>;
}

/// Runs the command through the platform shell.
#[derive(Clone, Debug, Default)]
pub struct ShellTaskRunner;

impl TaskRunner for ShellTaskRunner {
    fn run<'a>(&'a self, command: &'a str) -> BoxFuture<'a, io::Result<()>> {
        Box::pin(async move {
            let status = tokio::process::Command::new("sh")
                .arg("-c")
                .arg(command)
                .status()
                .await?;
            if status.success() {
                Ok(())
            } else {
                Err(io::Error::new(
                    io::ErrorKind::Other,
                    format!("task exited with {status}"),
                ))
            }
        })
    }
}

/// Monotonic millisecond time source, so stall-recovery timers are
/// testable with a fake clock (§8 scenario 6).
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

/// Wall-clock time since the clock was constructed, backed by
/// `tokio::time::Instant`.
#[derive(Debug)]
pub struct MonotonicClock {
    start: tokio::time::Instant,
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self {
            start: tokio::time::Instant::now(),
        }
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

/// Byte-level transport to the firmware. Opening/closing/port discovery is
/// out of scope for the core (§1); the core only writes bytes and is fed
/// bytes back through [`LineParser`](crate::parser::LineParser).
pub trait SerialTransport: Send + Sync {
    fn write(&self, data: &[u8]) -> io::Result<()>;
    fn is_open(&self) -> bool;
}

/// Real transport over a system serial port, via the `serialport` crate.
/// Behind the `serial` feature: the teacher gates its own port access the
/// same way (its `Cargo.toml` comment cites `port.rs`, requiring `libudev`
/// on Linux), though that file itself wasn't present in the retrieved
/// source, so this is grounded on `serialport`'s own blocking `SerialPort`
/// API rather than a specific teacher implementation.
#[cfg(feature = "serial")]
pub struct SerialPortTransport {
    port: std::sync::Mutex<Box<dyn serialport::SerialPort>>,
}

#[cfg(feature = "serial")]
impl SerialPortTransport {
    pub fn open(options: &crate::controller::SerialOptions) -> io::Result<Self> {
        let port = serialport::new(&options.port, options.baudrate)
            .timeout(std::time::Duration::from_millis(50))
            .open()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
        Ok(Self {
            port: std::sync::Mutex::new(port),
        })
    }
}

#[cfg(feature = "serial")]
impl SerialTransport for SerialPortTransport {
    fn write(&self, data: &[u8]) -> io::Result<()> {
        use std::io::Write;
        self.port.lock().unwrap().write_all(data)
    }

    fn is_open(&self) -> bool {
        true
    }
}

/// Fakes for the collaborator traits above. Not behind `#[cfg(test)]`
/// because the integration tests in `tests/` need them too, and those
/// compile against the library's normal (non-`cfg(test)`) build.
pub mod test_support {
    use super::*;
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    pub struct RecordingTransport {
        pub written: Mutex<Vec<Vec<u8>>>,
        pub open: Mutex<bool>,
    }

    impl RecordingTransport {
        pub fn new_open() -> Self {
            Self {
                written: Mutex::new(Vec::new()),
                open: Mutex::new(true),
            }
        }

        pub fn writes_as_strings(&self) -> Vec<String> {
            self.written
                .lock()
                .unwrap()
                .iter()
                .map(|b| String::from_utf8_lossy(b).into_owned())
                .collect()
        }
    }

    impl SerialTransport for RecordingTransport {
        fn write(&self, data: &[u8]) -> io::Result<()> {
            self.written.lock().unwrap().push(data.to_vec());
            Ok(())
        }

        fn is_open(&self) -> bool {
            *self.open.lock().unwrap()
        }
    }

    #[derive(Debug)]
    pub struct FakeClock {
        pub now: Mutex<u64>,
    }

    impl FakeClock {
        pub fn new() -> Self {
            Self { now: Mutex::new(0) }
        }

        pub fn advance(&self, ms: u64) {
            *self.now.lock().unwrap() += ms;
        }
    }

    impl Clock for FakeClock {
        fn now_ms(&self) -> u64 {
            *self.now.lock().unwrap()
        }
    }

    #[derive(Debug, Default)]
    pub struct FakeFileMonitor {
        pub files: std::collections::HashMap<String, String>,
    }

    impl FileMonitor for FakeFileMonitor {
        fn read_file<'a>(&'a self, path: &'a str) -> BoxFuture<'a, io::Result<String>> {
            let result = self
                .files
                .get(path)
                .cloned()
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, path.to_string()));
            Box::pin(async move { result })
        }
    }

    #[derive(Debug, Default)]
    pub struct FakeTaskRunner {
        pub ran: Mutex<Vec<String>>,
    }

    impl TaskRunner for FakeTaskRunner {
        fn run<'a>(&'a self, command: &'a str) -> BoxFuture<'a, io::Result<()>> {
            self.ran.lock().unwrap().push(command.to_string());
            Box::pin(async { Ok(()) })
        }
    }
}

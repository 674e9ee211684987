//! Log sink and line format.
//!
//! Linux and friends log to stdout; error and debug lines carry their
//! source location:
//!
//! ```text
//! ERROR agent.rs:82 failed to set service state
//! GCE Agent Started version=0.1.11
//! ```
//!
//! Windows writes to the first serial port so the lines show up in the
//! instance's serial console:
//!
//! ```text
//! 2024/01/02 15:04:05 GCEGuestAgent: GCE Agent Started version=0.1.11
//! ```
//!
//! The subscriber is installed once per process. [`reinit_with_project`]
//! only updates the shared formatter state.

use std::fmt;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::sync::{Arc, Mutex, RwLock};

use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::format::{self, FormatEvent, FormatFields};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::fmt::FmtContext;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

use agent_core::Platform;

use crate::error::AgentError;
use crate::paths::{PROGRAM_NAME, WINDOWS_SERIAL_PORT};

/// Non-empty value turns on debug logging.
pub const DEBUG_ENV: &str = "GUEST_AGENT_DEBUG";

type ProjectSlot = Arc<RwLock<Option<String>>>;

static INSTALLED: Mutex<Option<ProjectSlot>> = Mutex::new(None);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogOptions {
    pub platform: Platform,
    pub debug: bool,
}

impl LogOptions {
    pub fn from_env(platform: Platform) -> Self {
        Self {
            platform,
            debug: std::env::var_os(DEBUG_ENV).is_some_and(|v| !v.is_empty()),
        }
    }

    /// Default directive; `RUST_LOG` overrides it when set.
    pub fn level(&self) -> &'static str {
        if self.debug {
            "debug"
        } else {
            "info"
        }
    }
}

/// Install the global subscriber. Later calls are no-ops.
pub fn init(opts: &LogOptions) -> Result<(), AgentError> {
    let mut installed = INSTALLED.lock().unwrap_or_else(|e| e.into_inner());
    if installed.is_some() {
        return Ok(());
    }

    let project = ProjectSlot::default();
    let format = AgentFormat::new(opts.platform.is_windows(), project.clone());
    let writer = if opts.platform.is_windows() {
        BoxMakeWriter::new(|| SerialPort::new(WINDOWS_SERIAL_PORT))
    } else {
        BoxMakeWriter::new(io::stdout)
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(opts.level()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .event_format(format)
        .with_writer(writer)
        .try_init()
        .map_err(|e| AgentError::Logging(e.to_string()))?;

    *installed = Some(project);
    Ok(())
}

/// Attach `project` to every subsequent line.
pub fn reinit_with_project(project: &str) -> Result<(), AgentError> {
    let installed = INSTALLED.lock().unwrap_or_else(|e| e.into_inner());
    let slot = installed
        .as_ref()
        .ok_or_else(|| AgentError::Logging("logger is not initialized".to_string()))?;
    *slot.write().unwrap_or_else(|e| e.into_inner()) = Some(project.to_string());
    Ok(())
}

// ---------------------------------------------------------------------------
// Format
// ---------------------------------------------------------------------------

pub struct AgentFormat {
    windows: bool,
    project: ProjectSlot,
}

impl AgentFormat {
    fn new(windows: bool, project: ProjectSlot) -> Self {
        Self { windows, project }
    }
}

impl<S, N> FormatEvent<S, N> for AgentFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let meta = event.metadata();
        let level = *meta.level();
        if self.windows {
            let now = chrono::Local::now().format("%Y/%m/%d %H:%M:%S");
            write!(writer, "{now} {PROGRAM_NAME}: ")?;
        } else if level == Level::ERROR || level == Level::DEBUG {
            let file = meta.file().unwrap_or("unknown");
            let file = file.rsplit(['/', '\\']).next().unwrap_or(file);
            write!(writer, "{} {}:{} ", level, file, meta.line().unwrap_or(0))?;
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;

        let project = self.project.read().unwrap_or_else(|e| e.into_inner());
        if let Some(project) = project.as_deref() {
            write!(writer, " project={project}")?;
        }
        writeln!(writer)
    }
}

// ---------------------------------------------------------------------------
// Serial port
// ---------------------------------------------------------------------------

/// Serial console writer. The port is opened per line.
struct SerialPort {
    port: &'static str,
}

impl SerialPort {
    fn new(port: &'static str) -> Self {
        Self { port }
    }
}

impl Write for SerialPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut port = OpenOptions::new().write(true).open(self.port)?;
        port.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tracing_subscriber::fmt::MakeWriter;

    use super::*;

    #[derive(Clone, Default)]
    struct TestWriter {
        buffer: Arc<Mutex<Vec<u8>>>,
    }

    struct TestWriterGuard {
        buffer: Arc<Mutex<Vec<u8>>>,
    }

    impl<'a> MakeWriter<'a> for TestWriter {
        type Writer = TestWriterGuard;

        fn make_writer(&'a self) -> Self::Writer {
            TestWriterGuard {
                buffer: self.buffer.clone(),
            }
        }
    }

    impl Write for TestWriterGuard {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.buffer.lock().expect("log buffer").extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn capture(windows: bool, project: Option<&str>, emit: impl FnOnce()) -> String {
        let writer = TestWriter::default();
        let slot = ProjectSlot::new(RwLock::new(project.map(str::to_string)));
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(Level::DEBUG)
            .event_format(AgentFormat::new(windows, slot))
            .with_writer(writer.clone())
            .finish();
        tracing::subscriber::with_default(subscriber, emit);
        let bytes = writer.buffer.lock().expect("log buffer").clone();
        String::from_utf8(bytes).expect("utf8")
    }

    #[test]
    fn info_lines_are_bare() {
        let out = capture(false, None, || tracing::info!(user = %"alice", "creating user"));
        assert_eq!(out, "creating user user=alice\n");
    }

    #[test]
    fn error_and_debug_lines_carry_location() {
        let out = capture(false, None, || {
            tracing::error!("boom");
            tracing::debug!("detail");
            tracing::warn!("careful");
        });
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("ERROR logging.rs:"), "{}", lines[0]);
        assert!(lines[0].ends_with(" boom"));
        assert!(lines[1].starts_with("DEBUG logging.rs:"), "{}", lines[1]);
        assert_eq!(lines[2], "careful");
    }

    #[test]
    fn windows_lines_are_timestamped() {
        let out = capture(true, None, || tracing::error!("hello"));
        // 2024/01/02 15:04:05 GCEGuestAgent: hello
        let (stamp, rest) = out.split_at(19);
        assert_eq!(rest, " GCEGuestAgent: hello\n");
        assert_eq!(&stamp[4..5], "/");
        assert_eq!(&stamp[10..11], " ");
    }

    #[test]
    fn project_is_appended_once_set() {
        let out = capture(false, Some("my-project"), || tracing::info!("ready"));
        assert_eq!(out, "ready project=my-project\n");
    }

    #[test]
    fn debug_switch_picks_level() {
        let quiet = LogOptions { platform: Platform::Linux, debug: false };
        let loud = LogOptions { platform: Platform::Linux, debug: true };
        assert_eq!(quiet.level(), "info");
        assert_eq!(loud.level(), "debug");
    }
}

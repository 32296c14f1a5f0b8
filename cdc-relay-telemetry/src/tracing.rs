use std::io::{Error, Write};
use std::sync::{Once, OnceLock};
use std::{
    backtrace::{Backtrace, BacktraceStatus},
    panic::PanicHookInfo,
};

use cdc_relay_config::Environment;
use thiserror::Error;
use tracing::subscriber::{SetGlobalDefaultError, set_global_default};
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling::{self, InitError},
};
use tracing_log::{LogTracer, log_tracer::SetLoggerError};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{EnvFilter, FmtSubscriber, Registry, fmt, layer::SubscriberExt};

/// JSON field name identifying the relay instance in logs.
const RELAY_KEY_IN_LOG: &str = "relay";

/// Errors that can occur during tracing initialization.
#[derive(Debug, Error)]
pub enum TracingError {
    #[error("failed to build rolling file appender: {0}")]
    InitAppender(#[from] InitError),

    #[error("failed to init log tracer: {0}")]
    InitLogTracer(#[from] SetLoggerError),

    #[error("failed to set global default subscriber: {0}")]
    SetGlobalDefault(#[from] SetGlobalDefaultError),

    #[error("an io error occurred: {0}")]
    Io(#[from] Error),
}

/// Log flusher handle for ensuring logs are written before shutdown.
///
/// Production mode returns a [`WorkerGuard`] that must be kept alive to ensure
/// logs are flushed. Development mode doesn't require flushing.
#[must_use]
pub enum LogFlusher {
    Flusher(WorkerGuard),
    NullFlusher,
}

static INIT_TEST_TRACING: Once = Once::new();

/// Initializes tracing for tests.
///
/// Set `ENABLE_TRACING=1` to view tracing output:
/// ```bash
/// ENABLE_TRACING=1 cargo test test_name
/// ```
pub fn init_test_tracing() {
    INIT_TEST_TRACING.call_once(|| {
        if std::env::var("ENABLE_TRACING").is_ok() {
            // Without an explicit environment we would default to prod and log to files.
            Environment::Dev.set();
            let _log_flusher =
                init_tracing("test").expect("Failed to initialize tracing for tests");
        }
    });
}

static RELAY_NAME: OnceLock<String> = OnceLock::new();

/// Sets the relay name injected into every JSON log entry.
pub fn set_global_relay_name(relay_name: String) {
    let _ = RELAY_NAME.set(relay_name);
}

pub fn get_global_relay_name() -> Option<&'static str> {
    RELAY_NAME.get().map(|s| s.as_str())
}

/// Writer wrapper that injects the relay name into JSON log entries.
struct RelayInjectingWriter<W> {
    inner: W,
}

impl<W> RelayInjectingWriter<W> {
    fn new(inner: W) -> Self {
        Self { inner }
    }
}

/// Returns `line` with the relay name added, or `None` when nothing has to change.
fn inject_relay_name(line: &str, relay_name: &str) -> Option<String> {
    let serde_json::Value::Object(mut map) = serde_json::from_str::<serde_json::Value>(line).ok()?
    else {
        return None;
    };

    if map.contains_key(RELAY_KEY_IN_LOG) {
        return None;
    }

    map.insert(
        RELAY_KEY_IN_LOG.to_string(),
        serde_json::Value::String(relay_name.to_string()),
    );

    let modified = serde_json::to_string(&map).ok()?;
    if line.ends_with('\n') {
        Some(format!("{modified}\n"))
    } else {
        Some(modified)
    }
}

impl<W> Write for RelayInjectingWriter<W>
where
    W: Write,
{
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if let (Some(relay_name), Ok(line)) = (get_global_relay_name(), std::str::from_utf8(buf))
            && let Some(output) = inject_relay_name(line, relay_name)
        {
            // The caller only knows about the original buffer.
            self.inner.write_all(output.as_bytes())?;
            return Ok(buf.len());
        }

        self.inner.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

/// Initializes tracing for the application.
///
/// Production environments log JSON to rotating files, development pretty-prints to the console.
pub fn init_tracing(app_name: &str) -> Result<LogFlusher, TracingError> {
    init_tracing_with_relay_name(app_name, None)
}

/// Like [`init_tracing`], additionally tagging every production log line with `relay_name`.
pub fn init_tracing_with_relay_name(
    app_name: &str,
    relay_name: Option<String>,
) -> Result<LogFlusher, TracingError> {
    if let Some(relay_name) = relay_name {
        set_global_relay_name(relay_name);
    }

    // Captures logs emitted through the `log` crate by dependencies.
    LogTracer::init()?;

    let is_prod = Environment::load()?.is_prod();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());

    let log_flusher = if is_prod {
        configure_prod_tracing(filter, app_name)?
    } else {
        configure_dev_tracing(filter)?
    };

    set_tracing_panic_hook();

    Ok(log_flusher)
}

fn configure_prod_tracing(filter: EnvFilter, app_name: &str) -> Result<LogFlusher, TracingError> {
    let file_appender = rolling::Builder::new()
        .filename_prefix(app_name)
        .filename_suffix("log")
        .rotation(rolling::Rotation::DAILY)
        .max_log_files(5)
        .build("logs")?;

    let (file_appender, guard) = tracing_appender::non_blocking(file_appender);

    let format = fmt::format()
        .with_level(true)
        .with_ansi(false)
        .with_target(false);

    let subscriber = Registry::default().with(filter).with(
        fmt::layer()
            .event_format(format)
            .with_writer(move || RelayInjectingWriter::new(file_appender.make_writer()))
            .json()
            .with_current_span(true)
            .with_span_list(true),
    );

    set_global_default(subscriber)?;

    Ok(LogFlusher::Flusher(guard))
}

fn configure_dev_tracing(filter: EnvFilter) -> Result<LogFlusher, TracingError> {
    let format = fmt::format()
        .with_level(true)
        .with_ansi(true)
        .pretty()
        .with_line_number(false)
        .with_file(false)
        .with_target(true);

    let subscriber = FmtSubscriber::builder()
        .event_format(format)
        .with_env_filter(filter)
        .finish();

    set_global_default(subscriber)?;

    Ok(LogFlusher::NullFlusher)
}

/// Routes panics through `tracing` before running the previously installed hook.
fn set_tracing_panic_hook() {
    let prev_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        panic_hook(info);
        prev_hook(info);
    }));
}

fn panic_hook(panic_info: &PanicHookInfo) {
    let backtrace = Backtrace::capture();
    let (backtrace, note) = match backtrace.status() {
        BacktraceStatus::Captured => (Some(backtrace), None),
        BacktraceStatus::Disabled => (
            None,
            Some("run with RUST_BACKTRACE=1 to display backtraces"),
        ),
        BacktraceStatus::Unsupported => {
            (None, Some("backtraces are not supported on this platform"))
        }
        _ => (None, Some("backtrace status is unknown")),
    };

    let payload = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
        s
    } else {
        "unknown panic payload"
    };

    let location = panic_info.location().map(|location| location.to_string());

    tracing::error!(
        panic.payload = payload,
        panic.location = location,
        panic.backtrace = backtrace.map(tracing::field::display),
        panic.note = note,
        "a panic occurred",
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relay_name_is_injected_into_json_lines() {
        let line = "{\"level\":\"INFO\",\"message\":\"hello\"}\n";

        let output = inject_relay_name(line, "orders").unwrap();

        assert!(output.ends_with('\n'));
        let value: serde_json::Value = serde_json::from_str(output.trim_end()).unwrap();
        assert_eq!(value[RELAY_KEY_IN_LOG], "orders");
        assert_eq!(value["message"], "hello");
    }

    #[test]
    fn existing_relay_field_and_plain_text_are_left_alone() {
        assert!(inject_relay_name("{\"relay\":\"other\"}", "orders").is_none());
        assert!(inject_relay_name("not json", "orders").is_none());
    }
}

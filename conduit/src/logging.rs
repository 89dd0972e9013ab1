// Logging for Conduit
//
// The library only emits `tracing` events. Binaries and tests pick one of
// the installers below to decide where those events go.
//
// ```rust
// use conduit::logging;
//
// logging::init_default();
//
// logging::init(logging::LogConfig {
//     level: tracing::Level::DEBUG,
//     targets: Some("conduit::pool=trace".to_string()),
//     ..Default::default()
// });
// ```
//
// Event shapes used across the crate:
//
// ```rust
// conduit::log_context!("3f0c…", "ready");
// conduit::log_call!("fn0", "c-17", "dispatched");
// conduit::log_thread!("ab12cd34", "killed");
// ```

use std::io;
use std::sync::Once;

use conduit_api::message::LogLevel;
use tracing::{Level, Subscriber};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

// Macro plumbing: lets the exported macros expand in crates that do not
// depend on `tracing` themselves.
#[doc(hidden)]
pub use tracing::{debug as __debug, error as __error, info as __info};

/// Subscriber settings.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Floor for every target not named in `targets`
    pub level: Level,
    /// One JSON object per event instead of text lines
    pub json: bool,
    /// Source file and line of the emitting call site
    pub source_location: bool,
    /// Name and id of the OS thread; useful with worker contexts
    pub thread_names: bool,
    /// Extra `target=level` directives, comma separated
    pub targets: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            json: false,
            source_location: true,
            thread_names: true,
            targets: None,
        }
    }
}

static INSTALLED: Once = Once::new();

/// `RUST_LOG` first, then the configured floor and per-target directives.
fn build_filter(config: &LogConfig) -> EnvFilter {
    let mut filter = EnvFilter::from_default_env().add_directive(config.level.into());
    for raw in config.targets.iter().flat_map(|targets| targets.split(',')) {
        match raw.trim().parse() {
            Ok(directive) => filter = filter.add_directive(directive),
            Err(err) => eprintln!("conduit: skipping log directive {raw:?}: {err}"),
        }
    }
    filter
}

fn console_layer<S>(config: &LogConfig) -> impl tracing_subscriber::Layer<S>
where
    S: Subscriber + for<'span> tracing_subscriber::registry::LookupSpan<'span>,
{
    fmt::layer()
        .with_ansi(atty::is(atty::Stream::Stdout))
        .with_file(config.source_location)
        .with_line_number(config.source_location)
        .with_thread_names(config.thread_names)
        .with_thread_ids(config.thread_names)
}

fn install<S>(subscriber: S)
where
    S: Subscriber + Send + Sync + 'static,
{
    // Another subscriber (usually a test harness) got there first.
    if let Err(err) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("conduit: tracing subscriber not installed: {err}");
    }
}

/// Installs the process-wide subscriber. Later calls are ignored.
pub fn init(config: LogConfig) {
    INSTALLED.call_once(|| {
        let registry = tracing_subscriber::registry().with(build_filter(&config));
        if config.json {
            install(registry.with(fmt::layer().json().flatten_event(true)));
        } else {
            install(registry.with(console_layer(&config)));
        }
    });
}

/// Opens `path` for appending, creating it if needed.
pub fn file_writer(path: &str) -> io::Result<Box<dyn io::Write + Send + Sync + 'static>> {
    let file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
    Ok(Box::new(file))
}

/// Like [`init`], but every event is also appended to `log_file`.
///
/// Fails up front when `log_file` cannot be opened.
pub fn init_with_file(config: LogConfig, log_file: &str) -> io::Result<()> {
    drop(file_writer(log_file)?);

    INSTALLED.call_once(|| {
        let path = log_file.to_string();
        let file_layer = fmt::layer()
            .with_ansi(false)
            .with_writer(move || file_writer(&path).unwrap_or_else(|_| Box::new(io::stderr())))
            .with_file(true)
            .with_line_number(true)
            .with_thread_names(true);

        install(
            tracing_subscriber::registry()
                .with(build_filter(&config))
                .with(console_layer(&config))
                .with(file_layer),
        );
    });

    Ok(())
}

pub fn init_default() {
    init(LogConfig::default());
}

/// Debug output, with call correlation at trace.
pub fn init_development() {
    init(LogConfig {
        level: Level::DEBUG,
        targets: Some("conduit=debug,conduit::call=trace".to_string()),
        ..Default::default()
    });
}

/// JSON events without source locations.
pub fn init_production() {
    init(LogConfig {
        json: true,
        source_location: false,
        ..Default::default()
    });
}

/// Warnings and errors only.
pub fn init_test() {
    init(LogConfig {
        level: Level::WARN,
        thread_names: false,
        ..Default::default()
    });
}

/// Re-emits a `log` envelope received from a context at the matching level.
pub fn forward_remote_log(context_id: &str, level: LogLevel, text: &str) {
    match level {
        LogLevel::Trace => tracing::trace!(target: "conduit::remote", context_id, "{}", text),
        LogLevel::Debug => tracing::debug!(target: "conduit::remote", context_id, "{}", text),
        LogLevel::Info => tracing::info!(target: "conduit::remote", context_id, "{}", text),
        LogLevel::Warn => tracing::warn!(target: "conduit::remote", context_id, "{}", text),
        LogLevel::Error => tracing::error!(target: "conduit::remote", context_id, "{}", text),
    }
}

/// Context lifecycle: added, ready, exited, stop requested.
#[macro_export]
macro_rules! log_context {
    ($context_id:expr, $event:expr) => {
        $crate::logging::__info!(context_id = %$context_id, event = $event)
    };
    ($context_id:expr, $event:expr, $($fields:tt)*) => {
        $crate::logging::__info!(context_id = %$context_id, event = $event, $($fields)*)
    };
}

/// Per-call flow, at debug.
#[macro_export]
macro_rules! log_call {
    ($function:expr, $call_id:expr, $status:expr) => {
        $crate::logging::__debug!(function = %$function, call_id = %$call_id, status = $status)
    };
    ($function:expr, $call_id:expr, $status:expr, $($fields:tt)*) => {
        $crate::logging::__debug!(function = %$function, call_id = %$call_id, status = $status, $($fields)*)
    };
}

#[macro_export]
macro_rules! log_thread {
    ($thread_id:expr, $event:expr) => {
        $crate::logging::__debug!(thread_id = %$thread_id, event = $event)
    };
    ($thread_id:expr, $event:expr, $($fields:tt)*) => {
        $crate::logging::__debug!(thread_id = %$thread_id, event = $event, $($fields)*)
    };
}

#[macro_export]
macro_rules! log_error {
    ($error:expr) => {
        $crate::logging::__error!(error = %$error)
    };
    ($error:expr, $($fields:tt)*) => {
        $crate::logging::__error!(error = %$error, $($fields)*)
    };
}

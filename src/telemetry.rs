//! Telemetry initialization.
//!
//! Controlled by `BRAMBLE_TRACE`:
//! - unset or empty → no subscriber (tracing disabled, zero overhead)
//! - `"stderr"` → JSON spans/events to stderr
//! - `"pretty"` → human-readable compact events to stderr
//!
//! Filtering follows `RUST_LOG`, defaulting to `info`.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

/// Environment variable selecting the trace output.
pub const TRACE_ENV: &str = "BRAMBLE_TRACE";

/// Where trace output goes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TraceMode {
    Off,
    JsonStderr,
    PrettyStderr,
}

impl TraceMode {
    /// Interpret a `BRAMBLE_TRACE` value. Unknown values disable tracing.
    #[must_use]
    pub fn from_env_value(value: Option<&str>) -> Self {
        match value {
            Some("stderr") => Self::JsonStderr,
            Some("pretty") => Self::PrettyStderr,
            _ => Self::Off,
        }
    }
}

/// Install the global subscriber selected by `BRAMBLE_TRACE`.
///
/// Returns whether a subscriber was installed. A second call, or a call
/// after another subscriber was set, installs nothing.
pub fn init() -> bool {
    let value = std::env::var(TRACE_ENV).ok();
    let mode = TraceMode::from_env_value(value.as_deref());
    if value.is_some() && mode == TraceMode::Off && value.as_deref() != Some("") {
        eprintln!("warning: {TRACE_ENV} must be \"stderr\" or \"pretty\"; tracing disabled");
    }
    init_with(mode)
}

/// Install a subscriber for an explicit mode.
pub fn init_with(mode: TraceMode) -> bool {
    let filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match mode {
        TraceMode::Off => false,
        TraceMode::JsonStderr => tracing_subscriber::registry()
            .with(filter())
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_span_events(tracing_subscriber::fmt::format::FmtSpan::CLOSE),
            )
            .try_init()
            .is_ok(),
        TraceMode::PrettyStderr => tracing_subscriber::registry()
            .with(filter())
            .with(
                tracing_subscriber::fmt::layer()
                    .compact()
                    .with_writer(std::io::stderr),
            )
            .try_init()
            .is_ok(),
    }
}

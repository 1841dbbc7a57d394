//! Logging setup with a runtime-toggleable filter.
//!
//! The daemon swaps between its configured filter and full debug output
//! on SIGUSR2, without restarting. The reload handle is created at init
//! and handed to the server, which flips it from the signal path.

use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, reload, EnvFilter, Registry};

/// Handle for replacing the active filter.
pub type FilterHandle = reload::Handle<EnvFilter, Registry>;

/// Runtime control over the log filter.
pub struct LogControl {
    handle: FilterHandle,
    base: String,
    verbose: bool,
}

impl std::fmt::Debug for LogControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogControl")
            .field("base", &self.base)
            .field("verbose", &self.verbose)
            .finish()
    }
}

impl LogControl {
    /// Wraps an existing reload handle.
    pub fn new(handle: FilterHandle, base: impl Into<String>) -> Self {
        Self {
            handle,
            base: base.into(),
            verbose: false,
        }
    }

    /// Flips between the base filter and `debug`.
    pub fn toggle(&mut self) {
        self.verbose = !self.verbose;
        let directive = if self.verbose {
            "debug"
        } else {
            self.base.as_str()
        };
        match EnvFilter::try_new(directive) {
            Ok(filter) => {
                if let Err(err) = self.handle.reload(filter) {
                    warn!(error = %err, "failed to reload log filter");
                    return;
                }
                info!(verbose = self.verbose, "log filter toggled");
            }
            Err(err) => warn!(error = %err, "bad log directive"),
        }
    }

    /// True while verbose output is active.
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// Initializes the global subscriber and returns the toggle control.
///
/// `RUST_LOG` overrides `base` when set.
pub fn init(base: &str) -> anyhow::Result<LogControl> {
    let directive = std::env::var("RUST_LOG").unwrap_or_else(|_| base.to_string());
    let filter = EnvFilter::try_new(&directive)?;
    let (filter, handle) = reload::Layer::new(filter);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .init();

    Ok(LogControl::new(handle, directive))
}

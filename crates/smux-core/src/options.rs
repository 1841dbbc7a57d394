//! Server options.
//!
//! The full option system (per-session and per-window tables, user
//! options) is out of scope; the control loop reads these few globals.

/// Global server options.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Exit when no sessions remain. When disabled the server keeps
    /// running empty until an explicit exit is requested.
    pub exit_empty: bool,
    /// Exit even while sessions exist once no client is attached. Off by
    /// default: existing sessions keep the server up.
    pub exit_unattached: bool,
    /// Maximum number of entries retained in the message log.
    pub message_limit: usize,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            exit_empty: true,
            exit_unattached: false,
            message_limit: 1000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let opts = ServerOptions::default();
        assert!(opts.exit_empty);
        assert!(!opts.exit_unattached);
        assert_eq!(opts.message_limit, 1000);
    }
}

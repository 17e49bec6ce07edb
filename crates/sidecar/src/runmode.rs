//! Which halves of the sidecar run: secret files, the proxy, or both.

/// Operating mode selected by `VAULT_RUN_MODE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Write preconfigured secrets to disk and serve the proxy.
    Default,
    /// Write preconfigured secrets to disk only.
    File,
    /// Serve the proxy only.
    Proxy,
}

impl RunMode {
    /// Parse a mode name case-insensitively. Unknown values fall back to
    /// [`RunMode::Default`].
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "file" => RunMode::File,
            "proxy" => RunMode::Proxy,
            _ => RunMode::Default,
        }
    }

    pub fn has_file(self) -> bool {
        matches!(self, RunMode::Default | RunMode::File)
    }

    pub fn has_proxy(self) -> bool {
        matches!(self, RunMode::Default | RunMode::Proxy)
    }
}

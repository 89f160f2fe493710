//! Tracing/logging initialization.
//!
//! JSON lines by default; `FISCAL_LOG_FORMAT=pretty` switches to the
//! human-readable formatter. Filtering follows `RUST_LOG` (default `info`).

use tracing_subscriber::EnvFilter;

/// Output format of the process logger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Json,
    Pretty,
}

impl Format {
    /// Anything other than `pretty` is JSON.
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(|s| s.trim().to_ascii_lowercase()) {
            Some(s) if s == "pretty" => Format::Pretty,
            _ => Format::Json,
        }
    }

    fn from_env() -> Self {
        Self::parse(std::env::var("FISCAL_LOG_FORMAT").ok().as_deref())
    }
}

/// Initialize tracing/logging for the process.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init() {
    init_with(Format::from_env());
}

pub fn init_with(format: Format) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false);
    let _ = match format {
        Format::Json => builder.json().try_init(),
        Format::Pretty => builder.pretty().try_init(),
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_defaults_to_json() {
        assert_eq!(Format::parse(None), Format::Json);
        assert_eq!(Format::parse(Some("text")), Format::Json);
        assert_eq!(Format::parse(Some(" Pretty ")), Format::Pretty);
    }

    #[test]
    fn init_twice_is_harmless() {
        init_with(Format::Json);
        init_with(Format::Pretty);
    }
}

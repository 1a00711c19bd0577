use std::str::FromStr;

use anyhow::Result;
use once_cell::sync::OnceCell;
use tracing_subscriber::EnvFilter;

static INITIALIZED: OnceCell<()> = OnceCell::new();

/// Output format for the subscriber.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Mode {
    #[default]
    Default,
    Json,
    Compact,
}

impl FromStr for Mode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "" | "default" | "pretty" => Ok(Self::Default),
            "json" => Ok(Self::Json),
            "compact" => Ok(Self::Compact),
            _ => Err(anyhow::anyhow!("unknown logging mode: {s}")),
        }
    }
}

/// Installs the global tracing subscriber. Calling this more than once is a
/// no-op so test binaries can initialize logging from any entry point.
pub fn init(level: &str, mode: Mode) -> Result<()> {
    INITIALIZED.get_or_try_init(|| {
        let filter = EnvFilter::from_str(level)
            .map_err(|err| anyhow::anyhow!("failed to parse log level {level:?}: {err}"))?;

        let builder = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_file(true)
            .with_line_number(true);

        match mode {
            Mode::Default => builder.pretty().try_init(),
            Mode::Json => builder.json().try_init(),
            Mode::Compact => builder.compact().try_init(),
        }
        .map_err(|err| anyhow::anyhow!("failed to install subscriber: {err}"))?;

        Ok::<_, anyhow::Error>(())
    })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_from_str() {
        assert_eq!(Mode::from_str("json").unwrap(), Mode::Json);
        assert_eq!(Mode::from_str("Pretty").unwrap(), Mode::Default);
        assert_eq!(Mode::from_str("").unwrap(), Mode::Default);
        assert!(Mode::from_str("yaml").is_err());
    }

    #[test]
    fn init_is_idempotent() {
        init("info", Mode::Compact).expect("first init");
        init("debug", Mode::Json).expect("second init");
    }
}

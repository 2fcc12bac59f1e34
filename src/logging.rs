use crate::{Error, Result};
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

fn filter(verbose: bool) -> EnvFilter {
    if verbose {
        EnvFilter::new("nova_vault=debug")
    } else {
        EnvFilter::new("nova_vault=info")
    }
}

/// Install a console subscriber. Fails if one is already installed.
pub fn init_logging(verbose: bool) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(filter(verbose))
        .with_target(false)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .try_init()
        .map_err(|e| Error::Logging {
            reason: e.to_string(),
        })
}

/// Install a subscriber that appends plain-text records to `log_file`
pub fn init_file_logging(log_file: &Path, verbose: bool) -> Result<()> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)?;

    tracing_subscriber::fmt()
        .with_env_filter(filter(verbose))
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .try_init()
        .map_err(|e| Error::Logging {
            reason: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_initialization_is_reported() {
        // Whichever call wins, at most one global subscriber can be set.
        let first = init_logging(false);
        let second = init_logging(true);
        assert!(first.is_err() || second.is_err());
        assert!(matches!(second, Err(Error::Logging { .. })));
    }
}

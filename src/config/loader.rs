// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::Result;

pub const CONFIG_ENV: &str = "PILOT_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "Pilot.toml";

/// Read and deserialize a config file. Every field has a default, so an
/// empty file parses; semantic checks happen in [`load_and_validate`].
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawConfigFile> {
    let contents = fs::read_to_string(path.as_ref())?;
    Ok(toml::from_str(&contents)?)
}

pub fn load_and_validate(path: impl AsRef<Path>) -> Result<ConfigFile> {
    ConfigFile::try_from(load_from_path(path)?)
}

/// `$PILOT_CONFIG` when set, else `Pilot.toml` in the current directory.
pub fn default_config_path() -> PathBuf {
    std::env::var_os(CONFIG_ENV)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::PilotError;
    use crate::types::{JobSource, Workflow};
    use std::io::Write;

    fn write_config(body: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(body.as_bytes()).unwrap();
        file
    }

    #[test]
    fn minimal_file_gets_defaults() {
        let file = write_config(
            r#"
            [pilot]
            site = "BNL"
            queue = "BNL_PROD"
            "#,
        );
        let cfg = load_and_validate(file.path()).unwrap();
        assert_eq!(cfg.pilot.site, "BNL");
        assert_eq!(cfg.pilot.workflow, Workflow::Generic);
        assert_eq!(cfg.acquisition.source, JobSource::Dispatcher);
        assert_eq!(cfg.acquisition.max_getjob_failures, 5);
        assert_eq!(cfg.payload.stdout, "payload.stdout");
    }

    #[test]
    fn missing_site_is_rejected() {
        let file = write_config("[pilot]\nqueue = \"Q\"\n");
        let err = load_and_validate(file.path()).unwrap_err();
        assert!(matches!(err, PilotError::ConfigError(_)), "{err}");
    }

    #[test]
    fn bad_toml_is_reported() {
        let file = write_config("[pilot\nsite = ");
        assert!(matches!(load_from_path(file.path()), Err(PilotError::TomlError(_))));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        assert!(matches!(
            load_from_path("/nonexistent/Pilot.toml"),
            Err(PilotError::IoError(_))
        ));
    }
}

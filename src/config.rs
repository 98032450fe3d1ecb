use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::{env, fs};

use crate::finder::PrimitiveKind;
use crate::prelude::*;
use nestify::nest;
use serde::{Deserialize, Serialize};

nest! {
    #[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize, Serialize)]*
    #[serde(rename_all = "kebab-case", deny_unknown_fields)]*
    /// User configuration of the finder.
    ///
    /// Stored in YAML, by default at `~/.config/deadlock-finder/config.yaml`
    /// following the XDG Base Directory Specification, and loaded with
    /// [`FinderConfig::load`].
    pub struct FinderConfig {
        /// Extra blocking functions, or new handlers for default ones.
        #[serde(default)]
        pub blocking_functions: BTreeMap<String, PrimitiveKind>,
        /// Default blocking functions to ignore.
        #[serde(default)]
        pub disabled_functions: Vec<String>,
    }
}

/// Get the path to the configuration file, following the XDG Base Directory Specification
/// at https://specifications.freedesktop.org/basedir-spec/basedir-spec-latest.html
fn get_configuration_file_path() -> Result<PathBuf> {
    let config_dir = match env::var("XDG_CONFIG_HOME") {
        Ok(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => {
            let home = env::var("HOME").context("Neither XDG_CONFIG_HOME nor HOME is set")?;
            PathBuf::from(home).join(".config")
        }
    };

    Ok(config_dir.join("deadlock-finder").join("config.yaml"))
}

impl FinderConfig {
    /// Load the configuration.
    ///
    /// An explicit `config_path_override` must exist. Without one, the default
    /// location is tried and a missing file yields the default configuration.
    pub fn load(config_path_override: Option<&Path>) -> Result<Self> {
        if let Some(config_path) = config_path_override {
            return Self::load_from_path(config_path)
                .with_context(|| format!("Failed to load config from {}", config_path.display()));
        }

        let config_path = get_configuration_file_path()?;
        match fs::read(&config_path) {
            Ok(config_content) => {
                let config = Self::parse(&config_content, &config_path)?;
                debug!("Config loaded from {}", config_path.display());
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Config file not found at {}", config_path.display());
                Ok(Self::default())
            }
            Err(e) => bail!("Failed to load config: {e}"),
        }
    }

    fn load_from_path(path: &Path) -> Result<Self> {
        let config_content = fs::read(path)
            .with_context(|| format!("Failed to read config file at {}", path.display()))?;
        Self::parse(&config_content, path)
    }

    fn parse(config_content: &[u8], path: &Path) -> Result<Self> {
        let config: Self = serde_yaml::from_slice(config_content)
            .with_context(|| format!("Failed to parse config at {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        let names = self
            .blocking_functions
            .keys()
            .chain(self.disabled_functions.iter());
        for name in names {
            ensure!(
                !name.trim().is_empty(),
                "Function names in the config must not be empty"
            );
        }

        if let Some(name) = self
            .disabled_functions
            .iter()
            .find(|name| self.blocking_functions.contains_key(*name))
        {
            bail!("`{name}` cannot be both registered as a blocking function and disabled");
        }

        Ok(())
    }
}

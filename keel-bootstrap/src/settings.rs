use serde::{Deserialize, Serialize};

use crate::{
    config::{Config, ConfigPrefix},
    de::non_empty,
    error::BootstrapError,
};

/// Identity of the running application, read from the `[app]` table.
///
/// Both values are required and must not be blank.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppSettings {
    #[serde(deserialize_with = "non_empty")]
    name: String,
    #[serde(deserialize_with = "non_empty")]
    version: String,
}

impl AppSettings {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }

    pub fn from_config(config: &Config) -> Result<Self, BootstrapError> {
        config
            .get::<Self>()
            .map_err(|source| BootstrapError::InvalidSettingsError {
                prefix: Self::PREFIX,
                source,
            })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }
}

impl ConfigPrefix for AppSettings {
    const PREFIX: &'static str = "app";
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("TestApp", "1.0.0")]
    #[case("CustomApp", "2.3.4")]
    fn reads_app_table(#[case] name: &str, #[case] version: &str) {
        let toml = format!("[app]\nname = \"{name}\"\nversion = \"{version}\"");
        let settings = AppSettings::from_config(&Config::from_toml(&toml).unwrap()).unwrap();
        assert_eq!(settings, AppSettings::new(name, version));
    }

    #[rstest]
    #[case::missing_table("")]
    #[case::missing_version("[app]\nname = \"TestApp\"")]
    #[case::blank_name("[app]\nname = \" \"\nversion = \"1.0.0\"")]
    fn rejects_incomplete_settings(#[case] toml: &str) {
        let err = AppSettings::from_config(&Config::from_toml(toml).unwrap()).unwrap_err();
        assert!(matches!(
            err,
            BootstrapError::InvalidSettingsError { prefix: "app", .. }
        ));
    }
}

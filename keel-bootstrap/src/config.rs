use std::{
    collections::BTreeMap,
    env,
    ffi::OsString,
    path::{Path, PathBuf},
    sync::LazyLock,
};

use config::{ConfigError, Environment, File, FileFormat, Map, Value, ValueKind};
use serde::Deserialize;

/// Environment variable naming the folder that holds `config.toml`.
pub const CONFIG_FOLDER_ENV: &str = "KEEL_CONFIG";
/// Name of the config file looked up inside the config folder.
pub const CONFIG_FILE_NAME: &str = "config.toml";

static DEFAULT_CONFIG_FOLDER: LazyLock<PathBuf> = LazyLock::new(|| {
    resolve_config_folder(
        env::var_os(CONFIG_FOLDER_ENV),
        env::var_os("CARGO_MANIFEST_DIR"),
        env::current_exe().ok(),
    )
});

/// Picks the config folder: the explicit env folder, then the crate's own `etc`
/// folder when running under cargo, then `etc` next to the executable.
fn resolve_config_folder(
    config_env: Option<OsString>,
    manifest_dir: Option<OsString>,
    current_exe: Option<PathBuf>,
) -> PathBuf {
    if let Some(dir) = config_env {
        return PathBuf::from(dir);
    }
    if let Some(dir) = manifest_dir {
        return PathBuf::from(dir).join("etc");
    }
    match current_exe {
        Some(mut current_exe) => {
            current_exe.pop();
            current_exe.push("etc");
            current_exe
        }
        None => PathBuf::from("etc"),
    }
}

/// Config is the layered configuration of the application.
///
/// Values are resolved from programmatic defaults, then the `config.toml`
/// file of the config folder, then environment variables.
///
/// # Example
/// ```
/// use keel_bootstrap::config::{Config, ConfigPrefix};
/// use serde::Deserialize;
///
/// #[derive(Deserialize)]
/// struct PortConfig {
///     port: u16,
/// }
/// impl ConfigPrefix for PortConfig {
///     const PREFIX: &'static str = "server";
/// }
///
/// let config = Config::from_toml("[server]\nport = 8080").unwrap();
/// assert_eq!(config.get::<PortConfig>().unwrap().port, 8080);
/// ```
#[derive(Clone)]
pub struct Config {
    inner: config::Config,
    source_file: Option<PathBuf>,
}

impl Config {
    pub fn new(inner: config::Config) -> Self {
        Self {
            inner,
            source_file: None,
        }
    }

    /// The folder searched when no explicit folder is given.
    pub fn default_folder() -> &'static Path {
        DEFAULT_CONFIG_FOLDER.as_path()
    }

    pub fn from_folder(
        path: &Path,
        defaults: &[(&str, &str)],
        env_config_prefix: Option<&str>,
        env_config_split: &str,
    ) -> Result<Self, ConfigError> {
        let cfg = path.join(CONFIG_FILE_NAME);
        let mut builder = config::Config::builder();
        for (key, value) in defaults {
            builder = builder.set_default(*key, *value)?;
        }

        let source_file = if cfg.is_file() {
            builder = builder.add_source(File::from(cfg.as_path()).required(true));
            Some(cfg)
        } else {
            None
        };

        // add environment variables to config
        let environment = match env_config_prefix {
            Some(prefix) => Environment::with_prefix(prefix).prefix_separator("_"),
            None => Environment::default(),
        };
        builder = builder.add_source(environment.separator(env_config_split));
        let config = builder.build()?;

        Ok(Self {
            inner: config,
            source_file,
        })
    }

    /// Builds a config from an in-memory TOML document.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let inner = config::Config::builder()
            .add_source(File::from_str(content, FileFormat::Toml))
            .build()?;
        Ok(Self::new(inner))
    }

    /// The `config.toml` the values were read from, if one existed.
    pub fn source_file(&self) -> Option<&Path> {
        self.source_file.as_deref()
    }

    pub fn get<'de, T>(&self) -> Result<T, ConfigError>
    where
        T: ConfigPrefix + Deserialize<'de>,
    {
        match self.inner.get::<T>(T::PREFIX) {
            Ok(o) => Ok(o),
            Err(e) => {
                let ConfigError::NotFound(_) = &e else {
                    return Err(e);
                };
                // a missing section may still be satisfied by field defaults
                let v = Value::new(None, ValueKind::Table(Map::new()));

                match T::deserialize(v) {
                    Ok(o) => Ok(o),
                    Err(_) => Err(e),
                }
            }
        }
    }

    pub fn to_properties(&self) -> Result<Properties, ConfigError> {
        Properties::from_config(self)
    }

    #[cfg(test)]
    pub(crate) fn inner(&self) -> &config::Config {
        &self.inner
    }
}

/// ConfigPrefix names the table a configuration struct is read from.
///
/// # Example
/// ```
/// use keel_bootstrap::config::ConfigPrefix;
///
/// struct PortConfig;
/// impl ConfigPrefix for PortConfig {
///     const PREFIX: &'static str = "port";
/// }
/// ```
pub trait ConfigPrefix {
    const PREFIX: &'static str;
}

/// A flat, sorted `dotted.key -> value` view of a config tree.
pub struct Properties {
    properties: BTreeMap<String, String>,
}

pub struct PropertiesConfig {
    array_split: bool,
    separator: char,
}

impl Default for PropertiesConfig {
    fn default() -> Self {
        PropertiesConfig {
            array_split: true,
            separator: '.',
        }
    }
}

impl PropertiesConfig {
    pub fn new(array_split: bool, separator: char) -> Self {
        Self {
            array_split,
            separator,
        }
    }
}

impl Properties {
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        Self::from_config_opt(config, &PropertiesConfig::default())
    }

    pub fn from_config_opt(
        config: &Config,
        properties_config: &PropertiesConfig,
    ) -> Result<Self, ConfigError> {
        let mut properties = BTreeMap::new();
        let config_map: Map<String, Value> = config.inner.clone().try_deserialize()?;
        Self::flatten("", &config_map, &mut properties, properties_config);
        Ok(Self { properties })
    }

    fn flatten(
        prefix: &str,
        map: &Map<String, Value>,
        properties: &mut BTreeMap<String, String>,
        properties_config: &PropertiesConfig,
    ) {
        for (key, value) in map {
            let full_key = if prefix.is_empty() {
                key.clone()
            } else {
                format!("{}{}{}", prefix, properties_config.separator, key)
            };
            Self::handle_value(&full_key, value, properties, properties_config);
        }
    }

    fn handle_value(
        key: &str,
        value: &Value,
        properties: &mut BTreeMap<String, String>,
        properties_config: &PropertiesConfig,
    ) {
        let rendered = match &value.kind {
            ValueKind::Table(nested_map) => {
                return Self::flatten(key, nested_map, properties, properties_config);
            }
            ValueKind::Array(arr) if properties_config.array_split => {
                for (index, item) in arr.iter().enumerate() {
                    Self::handle_value(
                        &format!("{}[{}]", key, index),
                        item,
                        properties,
                        properties_config,
                    );
                }
                return;
            }
            ValueKind::Array(arr) => arr
                .iter()
                .map(|v| v.to_string())
                .collect::<Vec<String>>()
                .join(","),
            ValueKind::Float(f) => format!("{:.2}", f),
            ValueKind::String(s) => s.clone(),
            ValueKind::Nil => "Null".to_string(),
            // booleans and integers
            _ => value.to_string(),
        };
        properties.insert(key.to_string(), rendered);
    }

    pub fn get_properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use rstest::rstest;
    use serde::Deserialize;

    use super::*;

    const UNSET_PREFIX: Option<&str> = Some("KEEL_TEST_NEVER_SET");

    #[derive(Debug, Deserialize, PartialEq)]
    #[serde(default)]
    struct ServerConfig {
        host: String,
        port: u16,
    }

    impl Default for ServerConfig {
        fn default() -> Self {
            Self {
                host: "localhost".to_string(),
                port: 80,
            }
        }
    }

    impl ConfigPrefix for ServerConfig {
        const PREFIX: &'static str = "server";
    }

    #[derive(Debug, Deserialize)]
    struct Required {
        #[allow(dead_code)]
        value: String,
    }

    impl ConfigPrefix for Required {
        const PREFIX: &'static str = "required";
    }

    #[test]
    fn get_reads_prefixed_section() {
        let config = Config::from_toml("[server]\nhost = \"example.org\"\nport = 8080").unwrap();
        let server = config.get::<ServerConfig>().unwrap();
        assert_eq!(server.host, "example.org");
        assert_eq!(server.port, 8080);
    }

    #[test]
    fn get_falls_back_to_defaults_for_missing_section() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.get::<ServerConfig>().unwrap(), ServerConfig::default());
    }

    #[test]
    fn get_reports_missing_section_without_defaults() {
        let config = Config::from_toml("").unwrap();
        let err = config.get::<Required>().unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn from_folder_layers_file_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(CONFIG_FILE_NAME), "[server]\nport = 9000\n").unwrap();

        let config = Config::from_folder(
            dir.path(),
            &[("server.host", "fallback"), ("server.port", "1")],
            UNSET_PREFIX,
            "__",
        )
        .unwrap();

        let server = config.get::<ServerConfig>().unwrap();
        assert_eq!(server.host, "fallback");
        assert_eq!(server.port, 9000);
        assert_eq!(
            config.source_file(),
            Some(dir.path().join(CONFIG_FILE_NAME).as_path())
        );
    }

    #[test]
    fn from_folder_without_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config =
            Config::from_folder(dir.path(), &[("server.host", "fallback")], UNSET_PREFIX, "__")
                .unwrap();
        assert!(config.source_file().is_none());
        assert_eq!(config.get::<ServerConfig>().unwrap().host, "fallback");
    }

    #[rstest]
    #[case(true, "list[0]", "a")]
    #[case(true, "list[1]", "b")]
    #[case(false, "list", "a,b")]
    fn properties_flatten_arrays(
        #[case] array_split: bool,
        #[case] key: &str,
        #[case] expected: &str,
    ) {
        let config = Config::from_toml("list = [\"a\", \"b\"]").unwrap();
        let properties =
            Properties::from_config_opt(&config, &PropertiesConfig::new(array_split, '.')).unwrap();
        assert_eq!(properties.get_properties().get(key).unwrap(), expected);
    }

    #[rstest]
    #[case::env_wins(Some("/opt/keel/conf"), Some("/src/keel"), "/opt/keel/conf")]
    #[case::cargo_manifest(None, Some("/src/keel"), "/src/keel/etc")]
    #[case::next_to_executable(None, None, "/usr/bin/etc")]
    fn resolves_config_folder(
        #[case] config_env: Option<&str>,
        #[case] manifest_dir: Option<&str>,
        #[case] expected: &str,
    ) {
        let folder = resolve_config_folder(
            config_env.map(OsString::from),
            manifest_dir.map(OsString::from),
            Some(PathBuf::from("/usr/bin/keel")),
        );
        assert_eq!(folder, PathBuf::from(expected));
    }

    #[test]
    fn resolves_relative_etc_without_executable() {
        assert_eq!(resolve_config_folder(None, None, None), PathBuf::from("etc"));
    }

    #[test]
    fn environment_overrides_file_and_defaults() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            "[server]\nhost = \"from-file\"\nport = 9000\n",
        )
        .unwrap();
        // the variable name is unique to this test
        unsafe { env::set_var("KEEL_CFGTEST_ENV_SERVER__HOST", "from-env") };

        let config = Config::from_folder(
            dir.path(),
            &[("server.host", "from-default"), ("server.port", "1")],
            Some("KEEL_CFGTEST_ENV"),
            "__",
        );
        unsafe { env::remove_var("KEEL_CFGTEST_ENV_SERVER__HOST") };

        let server = config.unwrap().get::<ServerConfig>().unwrap();
        assert_eq!(server.host, "from-env");
        assert_eq!(server.port, 9000);
    }

    #[test]
    fn properties_flatten_nested_tables_in_order() {
        let config = Config::from_toml(
            "[app]\nname = \"keel\"\nratio = 0.5\n[app.limits]\nmax = 3\nenabled = true",
        )
        .unwrap();
        let properties = config.to_properties().unwrap();
        let flat: Vec<(&str, &str)> = properties
            .get_properties()
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        assert_eq!(
            flat,
            vec![
                ("app.limits.enabled", "true"),
                ("app.limits.max", "3"),
                ("app.name", "keel"),
                ("app.ratio", "0.50"),
            ]
        );
    }
}

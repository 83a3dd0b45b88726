use config::{Config, ConfigError, File};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use strum_macros::{AsRefStr, Display, EnumString};
use typed_builder::TypedBuilder;

const DEFAULT_LOG_FILTER: &str = "info";

lazy_static::lazy_static! {
    pub(crate) static ref ENVIRONMENT: ExecutionEnvironment = mode();
}

#[derive(Debug, Deserialize, Serialize, Clone, TypedBuilder, PartialEq, Eq)]
pub struct Tracing {
    /// The service name. Attached to every log line as the target prefix.
    ///
    /// Service Name should contain the following pattern:
    ///
    /// ```text
    /// <service_name> := <alpha>_<service_name> | <alpha>
    /// <alpha> := [a-z]*
    /// ```
    #[builder(setter(into))]
    service_name: String,

    // All the following settings are optional.
    /// If this is set, the logs are written as json.
    #[builder(default, setter(strip_option))]
    json_logs: Option<bool>,

    /// Filter directives in the `RUST_LOG` syntax. `RUST_LOG` takes precedence when set.
    #[builder(default, setter(strip_option, into))]
    filter: Option<String>,

    /// If this is set, logs are also appended to this file.
    #[builder(default, setter(strip_option, into))]
    log_file: Option<PathBuf>,
}

impl Tracing {
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn json_logs(&self) -> bool {
        self.json_logs.unwrap_or(false)
    }

    pub fn filter(&self) -> &str {
        self.filter.as_deref().unwrap_or(DEFAULT_LOG_FILTER)
    }

    pub fn log_file(&self) -> Option<&PathBuf> {
        self.log_file.as_ref()
    }

    /// Validates the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_name.is_empty()
            || !self
                .service_name
                .chars()
                .all(|c| c.is_ascii_lowercase() || c == '_')
        {
            return Err(ConfigError::Message(format!(
                "service_name {:?} must consist of lowercase letters and underscores",
                self.service_name
            )));
        }
        if let Some(filter) = &self.filter {
            if filter.trim().is_empty() {
                return Err(ConfigError::Message(
                    "filter must not be empty if specified".to_string(),
                ));
            }
        }
        if let Some(path) = &self.log_file {
            if path.file_name().is_none() {
                return Err(ConfigError::Message(format!(
                    "log_file {} does not name a file",
                    path.display()
                )));
            }
        }
        Ok(())
    }
}

#[derive(
    Default, Display, Deserialize, Serialize, Clone, EnumString, AsRefStr, Eq, PartialEq, Debug,
)]
#[strum(serialize_all = "snake_case")]
pub enum ExecutionEnvironment {
    #[default]
    Local,
    #[strum(serialize = "dev")]
    Development,
    Integration,
}

pub fn environment() -> ExecutionEnvironment {
    ENVIRONMENT.clone()
}

#[derive(TypedBuilder, Debug)]
pub struct Settings<'a> {
    #[builder(setter(strip_option), default = None)]
    path: Option<&'a str>,
    env_prefix: &'a str,
    #[builder(default = "config")]
    config_dir: &'a str,
}

fn mode() -> ExecutionEnvironment {
    env::var("RUN_MODE")
        .map(|enum_str| ExecutionEnvironment::from_str(enum_str.as_str()).unwrap_or_default())
        .unwrap_or_else(|_| ExecutionEnvironment::Local)
}

impl Settings<'_> {
    /// Layers the configuration sources, later ones overriding earlier ones:
    /// `<dir>/default`, `<dir>/<prefix>`, `<dir>/<prefix>-<run mode>`, the explicit
    /// path if any, and finally `<PREFIX>__SECTION__KEY` environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be created or deserialized.
    pub fn init_conf<'de, T: Deserialize<'de> + std::fmt::Debug>(&self) -> Result<T, ConfigError> {
        let env_conf = config::Environment::with_prefix(self.env_prefix)
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true);
        let prefix = self.env_prefix.to_lowercase();
        let mut config_builder = Config::builder()
            .add_source(File::with_name(&format!("{}/default", self.config_dir)).required(false))
            .add_source(File::with_name(&format!("{}/{prefix}", self.config_dir)).required(false))
            .add_source(
                File::with_name(&format!("{}/{prefix}-{}", self.config_dir, *ENVIRONMENT))
                    .required(false),
            );

        if let Some(path) = self.path {
            config_builder = config_builder.add_source(File::with_name(path).required(true))
        };

        let config = config_builder.add_source(env_conf).build()?;

        let settings: T = config.try_deserialize()?;

        tracing::debug!("Loaded settings: {:?}", settings);

        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Demo {
        name: String,
        port: u16,
        #[serde(default)]
        tracing: Option<Tracing>,
    }

    fn write_toml(dir: &tempfile::TempDir, name: &str, body: &str) -> String {
        let path = dir.path().join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(body.as_bytes()).unwrap();
        path.to_string_lossy().to_string()
    }

    #[test]
    #[serial]
    fn test_layered_sources() {
        let dir = tempfile::tempdir().unwrap();
        write_toml(&dir, "default.toml", "name = \"base\"\nport = 1\n");
        let explicit = write_toml(
            &dir,
            "explicit.toml",
            "port = 2\n[tracing]\nservice_name = \"demo\"\njson_logs = true\n",
        );
        let config_dir = dir.path().to_string_lossy().to_string();
        let demo: Demo = Settings::builder()
            .env_prefix("DEMOCONF")
            .config_dir(&config_dir)
            .path(&explicit)
            .build()
            .init_conf()
            .unwrap();
        assert_eq!(demo.name, "base");
        assert_eq!(demo.port, 2);
        let tracing = demo.tracing.unwrap();
        assert_eq!(tracing.service_name(), "demo");
        assert!(tracing.json_logs());
        assert_eq!(tracing.filter(), "info");
    }

    #[test]
    #[serial]
    fn test_env_overrides_files() {
        let dir = tempfile::tempdir().unwrap();
        let explicit = write_toml(&dir, "explicit.toml", "name = \"file\"\nport = 2\n");
        env::set_var("DEMOENV__PORT", "3");
        let demo: Result<Demo, _> = Settings::builder()
            .env_prefix("DEMOENV")
            .config_dir("does-not-exist")
            .path(&explicit)
            .build()
            .init_conf();
        env::remove_var("DEMOENV__PORT");
        let demo = demo.unwrap();
        assert_eq!(demo.name, "file");
        assert_eq!(demo.port, 3);
    }

    #[test]
    #[serial]
    fn test_missing_explicit_path() {
        let res: Result<Demo, _> = Settings::builder()
            .env_prefix("DEMOMISSING")
            .path("/nonexistent/session.toml")
            .build()
            .init_conf();
        assert!(res.is_err());
    }

    #[test]
    fn test_tracing_validation() {
        assert!(Tracing::builder()
            .service_name("fhevm_session")
            .build()
            .validate()
            .is_ok());
        assert!(Tracing::builder()
            .service_name("Session-1")
            .build()
            .validate()
            .is_err());
        assert!(Tracing::builder()
            .service_name("session")
            .filter(" ")
            .build()
            .validate()
            .is_err());
        assert!(Tracing::builder()
            .service_name("session")
            .log_file("/")
            .build()
            .validate()
            .is_err());
    }

    #[test]
    fn test_execution_environment_strings() {
        assert_eq!(
            ExecutionEnvironment::from_str("dev").unwrap(),
            ExecutionEnvironment::Development
        );
        assert_eq!(ExecutionEnvironment::Integration.to_string(), "integration");
        assert!(ExecutionEnvironment::from_str("prod").is_err());
    }
}

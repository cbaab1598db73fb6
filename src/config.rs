//! Configuration loading via `ortho-config`.
//!
//! Each concern owns a prefix so operators can target a single driver from
//! the environment: `HOSTVOL_*` for the daemon, `HOSTVOL_LINUX_*` for the OS
//! driver and `HOSTVOL_ISILON_*` for the NFS export backend. In
//! `hostvol.toml` every field is a top-level key named after the field
//! (`pid_file`, `volume_root_path`, `endpoint`, ...); the key sets of the
//! three structs do not overlap, so one file serves them all.

use std::ffi::OsString;
use std::fmt;
use std::time::Duration;

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::{Deserialize, Deserializer};
use thiserror::Error;

/// Default location of the PID file.
pub const DEFAULT_PID_FILE: &str = "/var/run/hostvol.pid";

/// Default sub-directory created inside every mounted volume.
pub const DEFAULT_VOLUME_ROOT_PATH: &str = "/data";

/// Default permission bits applied to the volume root sub-directory.
pub const DEFAULT_VOLUME_FILE_MODE: u32 = 0o700;

/// Daemon-level settings shared by the supervisor and the service.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "HOSTVOL",
    discovery(
        app_name = "hostvol",
        env_var = "HOSTVOL_CONFIG_PATH",
        config_file_name = "hostvol.toml",
        dotfile_name = ".hostvol.toml",
        project_file_name = "hostvol.toml"
    )
)]
pub struct DaemonConfig {
    /// Location of the PID file that guards single-instance execution.
    #[ortho_config(default = DEFAULT_PID_FILE.to_owned())]
    pub pid_file: String,
    /// Name of the OS driver to construct at start-up.
    #[ortho_config(default = "linux".to_owned())]
    pub os_driver: String,
    /// Storage drivers to construct at start-up, comma-separated. The file
    /// layer also accepts a TOML array.
    #[ortho_config(default = "isilon".to_owned())]
    #[serde(deserialize_with = "driver_list")]
    pub storage_drivers: String,
    /// Upper bound, in seconds, on the background start handshake. Unset
    /// means the parent waits for the child indefinitely.
    pub handshake_timeout_secs: Option<u64>,
    /// Whether start, stop and restart insist on an effective UID of zero.
    #[ortho_config(default = true)]
    pub require_root: bool,
}

impl DaemonConfig {
    /// Loads daemon configuration without parsing CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when merging sources fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("hostvol")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Returns the PID file location as a UTF-8 path.
    #[must_use]
    pub fn pid_file_path(&self) -> Utf8PathBuf {
        Utf8PathBuf::from(self.pid_file.trim())
    }

    /// Returns the configured storage driver names, lowercased, without
    /// empty entries.
    #[must_use]
    pub fn storage_driver_names(&self) -> Vec<String> {
        self.storage_drivers
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_lowercase)
            .collect()
    }

    /// Returns the handshake timeout, if one is configured.
    #[must_use]
    pub fn handshake_timeout(&self) -> Option<Duration> {
        self.handshake_timeout_secs.map(Duration::from_secs)
    }

    /// Performs semantic validation on required fields.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty
    /// and [`ConfigError::Invalid`] when the handshake timeout is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_field(
            &self.pid_file,
            &FieldMetadata::new("PID file path", "HOSTVOL_PID_FILE", "pid_file"),
        )?;
        require_field(
            &self.os_driver,
            &FieldMetadata::new("OS driver name", "HOSTVOL_OS_DRIVER", "os_driver"),
        )?;
        if self.handshake_timeout_secs == Some(0) {
            return Err(ConfigError::Invalid(String::from(
                "handshake_timeout_secs must be greater than zero; unset it to wait indefinitely",
            )));
        }
        Ok(())
    }
}

/// Accepts either a single comma-separated string or a sequence of names.
/// The environment layer hands over a sequence whenever the value holds a
/// comma.
fn driver_list<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum DriverList {
        Joined(String),
        Names(Vec<String>),
    }

    Ok(match DriverList::deserialize(deserializer)? {
        DriverList::Joined(names) => names,
        DriverList::Names(names) => names.join(","),
    })
}

/// Settings for the Linux OS driver.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "HOSTVOL_LINUX",
    discovery(
        app_name = "hostvol",
        env_var = "HOSTVOL_CONFIG_PATH",
        config_file_name = "hostvol.toml",
        dotfile_name = ".hostvol.toml",
        project_file_name = "hostvol.toml"
    )
)]
pub struct LinuxConfig {
    /// Sub-path created inside each mounted volume after a successful mount.
    #[ortho_config(default = DEFAULT_VOLUME_ROOT_PATH.to_owned())]
    pub volume_root_path: String,
    /// Permission bits applied to the volume root sub-path.
    #[ortho_config(default = DEFAULT_VOLUME_FILE_MODE)]
    pub volume_file_mode: u32,
}

impl LinuxConfig {
    /// Loads OS driver configuration without parsing CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when merging sources fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("hostvol")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Returns the built-in defaults without consulting any source.
    #[must_use]
    pub fn builtin() -> Self {
        Self {
            volume_root_path: DEFAULT_VOLUME_ROOT_PATH.to_owned(),
            volume_file_mode: DEFAULT_VOLUME_FILE_MODE,
        }
    }
}

/// Settings for the Isilon NFS export driver.
#[derive(Clone, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "HOSTVOL_ISILON",
    discovery(
        app_name = "hostvol",
        env_var = "HOSTVOL_CONFIG_PATH",
        config_file_name = "hostvol.toml",
        dotfile_name = ".hostvol.toml",
        project_file_name = "hostvol.toml"
    )
)]
pub struct IsilonConfig {
    /// Base URL of the cluster's Platform API, for example
    /// `https://isilon.example.com:8080`.
    #[ortho_config(default = String::new())]
    pub endpoint: String,
    /// Skip TLS certificate verification when talking to the cluster.
    #[ortho_config(default = false)]
    pub insecure: bool,
    /// API user name.
    #[ortho_config(default = String::new())]
    pub user_name: String,
    /// API password.
    #[ortho_config(default = String::new())]
    pub password: String,
    /// Directory on the cluster under which volumes are created.
    #[ortho_config(default = "/ifs/volumes".to_owned())]
    pub volume_path: String,
    /// Host name or address clients use to mount exports.
    #[ortho_config(default = String::new())]
    pub nfs_host: String,
    /// Optional CIDR restricting which local addresses identify this host.
    pub subnet: Option<String>,
}

impl fmt::Debug for IsilonConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IsilonConfig")
            .field("endpoint", &self.endpoint)
            .field("insecure", &self.insecure)
            .field("user_name", &self.user_name)
            .field("password", &"<redacted>")
            .field("volume_path", &self.volume_path)
            .field("nfs_host", &self.nfs_host)
            .field("subnet", &self.subnet)
            .finish()
    }
}

impl IsilonConfig {
    /// Loads backend configuration without parsing CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when merging sources fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("hostvol")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation on required fields. Error messages name
    /// both the environment variable and the TOML key that supply the value.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_field(
            &self.endpoint,
            &FieldMetadata::new(
                "Isilon API endpoint",
                "HOSTVOL_ISILON_ENDPOINT",
                "endpoint",
            ),
        )?;
        require_field(
            &self.user_name,
            &FieldMetadata::new(
                "Isilon API user name",
                "HOSTVOL_ISILON_USER_NAME",
                "user_name",
            ),
        )?;
        require_field(
            &self.password,
            &FieldMetadata::new(
                "Isilon API password",
                "HOSTVOL_ISILON_PASSWORD",
                "password",
            ),
        )?;
        require_field(
            &self.volume_path,
            &FieldMetadata::new(
                "Isilon volume path",
                "HOSTVOL_ISILON_VOLUME_PATH",
                "volume_path",
            ),
        )?;
        require_field(
            &self.nfs_host,
            &FieldMetadata::new(
                "NFS host",
                "HOSTVOL_ISILON_NFS_HOST",
                "nfs_host",
            ),
        )?;
        Ok(())
    }
}

/// Every configuration section, handed to driver constructors.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Settings {
    /// Daemon settings.
    pub daemon: DaemonConfig,
    /// OS driver settings.
    pub linux: LinuxConfig,
    /// Isilon driver settings.
    pub isilon: IsilonConfig,
}

impl Settings {
    /// Loads every section from defaults, configuration files and the
    /// environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when any section fails to load or the daemon
    /// section fails validation.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        let daemon = DaemonConfig::load_without_cli_args()?;
        daemon.validate()?;
        Ok(Self {
            daemon,
            linux: LinuxConfig::load_without_cli_args()?,
            isilon: IsilonConfig::load_without_cli_args()?,
        })
    }
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(
        description: &'static str,
        env_var: &'static str,
        toml_key: &'static str,
    ) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }
}

fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::MissingField(format!(
            "missing {}: set {} or add a top-level {} key to hostvol.toml",
            metadata.description, metadata.env_var, metadata.toml_key
        )));
    }
    Ok(())
}

/// Errors raised during configuration loading and validation.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a field holds a value outside its accepted range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}

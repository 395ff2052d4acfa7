//! # Harness Configuration
//!
//! Describes the container to provision and how to reach the database inside
//! it. Values come from, in increasing priority:
//!
//! 1. built-in defaults (`postgres:12`, `POSTGRES_PASSWORD=root`, `5432/tcp`)
//! 2. an optional TOML file (`HARNESS_CONFIG`, default `harness.toml`)
//! 3. environment variables prefixed `HARNESS__` (`HARNESS__IMAGE=postgres:16`)
//!
//! ```toml
//! image = "postgres:16"
//! exposed_port = "5432/tcp"
//! startup_timeout_secs = 90
//!
//! [env]
//! POSTGRES_PASSWORD = "root"
//!
//! [credentials]
//! user = "postgres"
//! password = "root"
//! sslmode = "disable"
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

use crate::error::{HarnessError, HarnessResult};
use crate::readiness::ReadinessPredicate;

pub const DEFAULT_CONFIG_FILE: &str = "harness.toml";
pub const CONFIG_PATH_ENV: &str = "HARNESS_CONFIG";
pub const ENV_PREFIX: &str = "HARNESS";

/// Container image reference, `name[:tag]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ImageRef {
    pub name: String,
    pub tag: String,
}

impl ImageRef {
    pub fn new(name: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tag: tag.into(),
        }
    }
}

impl FromStr for ImageRef {
    type Err = HarnessError;

    fn from_str(reference: &str) -> HarnessResult<Self> {
        let invalid = |reason: &str| HarnessError::InvalidImageReference {
            reference: reference.to_string(),
            reason: reason.to_string(),
        };

        let reference = reference.trim();
        if reference.is_empty() {
            return Err(invalid("empty reference"));
        }
        if reference.contains(char::is_whitespace) {
            return Err(invalid("contains whitespace"));
        }

        // A colon before the last '/' belongs to a registry host (host:5000/img).
        let name_start = reference.rfind('/').map_or(0, |i| i + 1);
        let (name, tag) = match reference[name_start..].rfind(':') {
            Some(i) => {
                let split = name_start + i;
                (&reference[..split], &reference[split + 1..])
            }
            None => (reference, "latest"),
        };

        if name.is_empty() || name.ends_with('/') {
            return Err(invalid("missing image name"));
        }
        if tag.is_empty() {
            return Err(invalid("empty tag"));
        }

        Ok(Self::new(name, tag))
    }
}

impl TryFrom<String> for ImageRef {
    type Error = HarnessError;

    fn try_from(value: String) -> HarnessResult<Self> {
        value.parse()
    }
}

impl From<ImageRef> for String {
    fn from(image: ImageRef) -> Self {
        image.to_string()
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.tag)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => f.write_str("tcp"),
            Protocol::Udp => f.write_str("udp"),
        }
    }
}

/// Exposed container port, `port[/protocol]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PortSpec {
    pub port: u16,
    pub protocol: Protocol,
}

impl PortSpec {
    pub const fn tcp(port: u16) -> Self {
        Self {
            port,
            protocol: Protocol::Tcp,
        }
    }
}

impl FromStr for PortSpec {
    type Err = HarnessError;

    fn from_str(spec: &str) -> HarnessResult<Self> {
        let invalid = |reason: String| HarnessError::InvalidPortSpec {
            spec: spec.to_string(),
            reason,
        };

        let (port, protocol) = match spec.trim().split_once('/') {
            Some((port, proto)) => (port, proto),
            None => (spec.trim(), "tcp"),
        };

        let protocol = match protocol.to_ascii_lowercase().as_str() {
            "tcp" => Protocol::Tcp,
            "udp" => Protocol::Udp,
            other => return Err(invalid(format!("unsupported protocol '{other}'"))),
        };
        let port: u16 = port
            .parse()
            .map_err(|e| invalid(format!("invalid port number: {e}")))?;
        if port == 0 {
            return Err(invalid("port must be non-zero".to_string()));
        }

        Ok(Self { port, protocol })
    }
}

impl TryFrom<String> for PortSpec {
    type Error = HarnessError;

    fn try_from(value: String) -> HarnessResult<Self> {
        value.parse()
    }
}

impl From<PortSpec> for String {
    fn from(spec: PortSpec) -> Self {
        spec.to_string()
    }
}

impl fmt::Display for PortSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.port, self.protocol)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SslMode {
    #[default]
    Disable,
    Prefer,
    Require,
}

impl fmt::Display for SslMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SslMode::Disable => f.write_str("disable"),
            SslMode::Prefer => f.write_str("prefer"),
            SslMode::Require => f.write_str("require"),
        }
    }
}

impl FromStr for SslMode {
    type Err = HarnessError;

    fn from_str(value: &str) -> HarnessResult<Self> {
        match value {
            "disable" => Ok(SslMode::Disable),
            "prefer" => Ok(SslMode::Prefer),
            "require" => Ok(SslMode::Require),
            other => Err(HarnessError::InvalidDataSource {
                reason: format!("unsupported sslmode '{other}'"),
            }),
        }
    }
}

/// Static credentials used to build the data source.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Credentials {
    pub user: String,
    pub password: String,
    pub sslmode: SslMode,
    pub database: Option<String>,
}

impl Default for Credentials {
    fn default() -> Self {
        Self {
            user: "postgres".to_string(),
            password: "root".to_string(),
            sslmode: SslMode::Disable,
            database: None,
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("sslmode", &self.sslmode)
            .field("database", &self.database)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    pub image: ImageRef,
    pub env: BTreeMap<String, String>,
    pub exposed_port: PortSpec,
    pub readiness: Vec<ReadinessPredicate>,
    pub startup_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub credentials: Credentials,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        let mut env = BTreeMap::new();
        env.insert("POSTGRES_PASSWORD".to_string(), "root".to_string());

        let exposed_port = PortSpec::tcp(5432);

        Self {
            image: ImageRef::new("postgres", "12"),
            env,
            exposed_port,
            readiness: default_readiness(exposed_port),
            startup_timeout_secs: 60,
            connect_timeout_secs: 10,
            credentials: Credentials::default(),
        }
    }
}

/// Postgres logs the port once the final server is listening; the host-side
/// poll then confirms the mapped port accepts connections.
pub fn default_readiness(exposed_port: PortSpec) -> Vec<ReadinessPredicate> {
    vec![
        ReadinessPredicate::stderr_message(format!("port {}", exposed_port.port)),
        ReadinessPredicate::ListeningPort { port: exposed_port },
    ]
}

impl HarnessConfig {
    /// Load from `HARNESS_CONFIG` (or `harness.toml`) and `HARNESS__*` variables.
    pub fn load() -> HarnessResult<Self> {
        let path = std::env::var(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE));
        Self::load_from(path)
    }

    pub fn load_from(path: impl AsRef<Path>) -> HarnessResult<Self> {
        Self::load_with_env(path, environment_source())
    }

    /// Load with an explicit environment source, so tests don't have to touch
    /// process-wide variables.
    pub fn load_with_env(
        path: impl AsRef<Path>,
        environment: config::Environment,
    ) -> HarnessResult<Self> {
        let path = path.as_ref();
        debug!(path = %path.display(), "loading harness configuration");

        let settings = config::Config::builder()
            .add_source(
                config::File::from(path)
                    .format(config::FileFormat::Toml)
                    .required(false),
            )
            .add_source(environment)
            .build()?;
        let readiness_configured = settings.get_array("readiness").is_ok();
        let mut config: HarnessConfig = settings.try_deserialize()?;

        if !readiness_configured {
            config.readiness = default_readiness(config.exposed_port);
        }

        // Keys are case-folded on load; container variables are upper case.
        config.env = config
            .env
            .into_iter()
            .map(|(key, value)| (key.to_ascii_uppercase(), value))
            .collect();

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> HarnessResult<()> {
        if self.startup_timeout_secs == 0 {
            return Err(HarnessError::configuration(
                "startup_timeout_secs must be greater than zero",
            ));
        }
        if self.connect_timeout_secs == 0 {
            return Err(HarnessError::configuration(
                "connect_timeout_secs must be greater than zero",
            ));
        }
        for predicate in &self.readiness {
            if let ReadinessPredicate::ListeningPort { port } = predicate {
                if *port != self.exposed_port {
                    return Err(HarnessError::configuration(format!(
                        "readiness port {port} is not the exposed port {}",
                        self.exposed_port
                    )));
                }
            }
        }
        if self.credentials.user.is_empty() {
            return Err(HarnessError::configuration("credentials.user is empty"));
        }
        if let Some(password) = self.env.get("POSTGRES_PASSWORD") {
            if password != &self.credentials.password {
                return Err(HarnessError::configuration(
                    "credentials.password does not match POSTGRES_PASSWORD",
                ));
            }
        }
        if let Some(user) = self.env.get("POSTGRES_USER") {
            if user != &self.credentials.user {
                return Err(HarnessError::configuration(
                    "credentials.user does not match POSTGRES_USER",
                ));
            }
        }
        Ok(())
    }

    pub fn with_image(mut self, image: ImageRef) -> Self {
        self.image = image;
        self
    }

    pub fn with_env_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    /// Change the exposed port and move the default readiness checks with it.
    pub fn with_exposed_port(mut self, port: PortSpec) -> Self {
        if self.readiness == default_readiness(self.exposed_port) {
            self.readiness = default_readiness(port);
        }
        self.exposed_port = port;
        self
    }

    pub fn with_readiness(mut self, readiness: Vec<ReadinessPredicate>) -> Self {
        self.readiness = readiness;
        self
    }

    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout_secs = timeout.as_secs().max(1);
        self
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

fn environment_source() -> config::Environment {
    config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("__")
        .separator("__")
        .try_parsing(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env_source(vars: &[(&str, &str)]) -> config::Environment {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        environment_source().source(Some(vars))
    }

    #[test]
    fn test_default_config_matches_postgres_12_scenario() {
        let config = HarnessConfig::default();
        assert_eq!(config.image.to_string(), "postgres:12");
        assert_eq!(config.env.get("POSTGRES_PASSWORD"), Some(&"root".to_string()));
        assert_eq!(config.exposed_port.to_string(), "5432/tcp");
        assert_eq!(config.credentials.user, "postgres");
        assert_eq!(config.credentials.sslmode, SslMode::Disable);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_image_ref_parsing() {
        assert_eq!(
            "postgres:12".parse::<ImageRef>().unwrap(),
            ImageRef::new("postgres", "12")
        );
        assert_eq!(
            "postgres".parse::<ImageRef>().unwrap(),
            ImageRef::new("postgres", "latest")
        );
        assert_eq!(
            "localhost:5000/team/pg".parse::<ImageRef>().unwrap(),
            ImageRef::new("localhost:5000/team/pg", "latest")
        );
        assert_eq!(
            "localhost:5000/team/pg:16-alpine".parse::<ImageRef>().unwrap(),
            ImageRef::new("localhost:5000/team/pg", "16-alpine")
        );
        assert!("".parse::<ImageRef>().is_err());
        assert!("postgres:".parse::<ImageRef>().is_err());
        assert!(":12".parse::<ImageRef>().is_err());
        assert!("post gres:12".parse::<ImageRef>().is_err());
    }

    #[test]
    fn test_port_spec_parsing() {
        assert_eq!("5432/tcp".parse::<PortSpec>().unwrap(), PortSpec::tcp(5432));
        assert_eq!("5432".parse::<PortSpec>().unwrap(), PortSpec::tcp(5432));
        assert_eq!(
            "53/UDP".parse::<PortSpec>().unwrap(),
            PortSpec {
                port: 53,
                protocol: Protocol::Udp
            }
        );
        assert!("0/tcp".parse::<PortSpec>().is_err());
        assert!("70000/tcp".parse::<PortSpec>().is_err());
        assert!("5432/sctp".parse::<PortSpec>().is_err());
    }

    #[test]
    fn test_validate_rejects_mismatched_password() {
        let config = HarnessConfig::default().with_env_var("POSTGRES_PASSWORD", "other");
        assert!(matches!(
            config.validate(),
            Err(HarnessError::Configuration { .. })
        ));
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let rendered = format!("{:?}", Credentials::default());
        assert!(rendered.contains("[REDACTED]"));
        assert!(!rendered.contains("root"));
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config =
            HarnessConfig::load_with_env(dir.path().join("absent.toml"), env_source(&[]))
                .unwrap();
        assert_eq!(config, HarnessConfig::default());
    }

    #[test]
    fn test_load_from_file_and_environment() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
image = "postgres:16-alpine"
startup_timeout_secs = 90

[env]
POSTGRES_PASSWORD = "secret"
POSTGRES_DB = "app"

[credentials]
password = "secret"
database = "app"
"#
        )
        .unwrap();

        let config = HarnessConfig::load_with_env(
            file.path(),
            env_source(&[("HARNESS__CONNECT_TIMEOUT_SECS", "3")]),
        )
        .unwrap();

        assert_eq!(config.image, ImageRef::new("postgres", "16-alpine"));
        assert_eq!(config.startup_timeout_secs, 90);
        assert_eq!(config.connect_timeout_secs, 3);
        assert_eq!(config.env.get("POSTGRES_DB"), Some(&"app".to_string()));
        assert_eq!(config.credentials.user, "postgres");
        assert_eq!(config.credentials.database.as_deref(), Some("app"));
    }

    #[test]
    fn test_readiness_defaults_follow_exposed_port() {
        let dir = tempfile::tempdir().unwrap();
        let config = HarnessConfig::load_with_env(
            dir.path().join("absent.toml"),
            env_source(&[("HARNESS__EXPOSED_PORT", "6543/tcp")]),
        )
        .unwrap();

        assert_eq!(config.exposed_port, PortSpec::tcp(6543));
        assert_eq!(
            config.readiness,
            vec![
                ReadinessPredicate::stderr_message("port 6543"),
                ReadinessPredicate::ListeningPort {
                    port: PortSpec::tcp(6543)
                },
            ]
        );

        let built = HarnessConfig::default().with_exposed_port(PortSpec::tcp(6543));
        assert_eq!(built.readiness, config.readiness);
    }

    #[test]
    fn test_explicit_readiness_is_kept() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
exposed_port = "6543/tcp"

[[readiness]]
kind = "log_message"
stream = "stdout"
message = "ready to accept connections"
"#
        )
        .unwrap();

        let config = HarnessConfig::load_with_env(file.path(), env_source(&[])).unwrap();
        assert_eq!(
            config.readiness,
            vec![ReadinessPredicate::stdout_message("ready to accept connections")]
        );
    }

    #[test]
    fn test_validate_rejects_listening_port_that_is_not_exposed() {
        let config = HarnessConfig::default().with_readiness(vec![ReadinessPredicate::ListeningPort {
            port: PortSpec::tcp(6543),
        }]);
        assert!(matches!(
            config.validate(),
            Err(HarnessError::Configuration { message }) if message.contains("6543/tcp")
        ));
    }

    #[test]
    fn test_load_rejects_zero_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let result = HarnessConfig::load_with_env(
            dir.path().join("absent.toml"),
            env_source(&[("HARNESS__STARTUP_TIMEOUT_SECS", "0")]),
        );
        assert!(matches!(result, Err(HarnessError::Configuration { .. })));
    }

    proptest! {
        #[test]
        fn prop_image_ref_display_parses_back(
            name in "[a-z][a-z0-9]{0,10}(/[a-z][a-z0-9]{0,10})?",
            tag in "[a-z0-9][a-z0-9.-]{0,8}",
        ) {
            let image = ImageRef::new(name, tag);
            let parsed: ImageRef = image.to_string().parse().unwrap();
            prop_assert_eq!(parsed, image);
        }
    }
}

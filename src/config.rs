use std::{env, error::Error, fmt, path::PathBuf, str::FromStr};

use serde::Deserialize;
use serde_json::Value;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_JOB_RETENTION: usize = 16;

/// An environment variable holding an unusable value.
#[derive(Debug)]
pub struct ConfigErr {
    var: &'static str,
    msg: String,
}

impl fmt::Display for ConfigErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {}: {}", self.var, self.msg)
    }
}

impl Error for ConfigErr {}

/// The daemon's settings.
#[derive(Debug, Clone, PartialEq)]
pub struct DaemonConfig {
    pub host: String,
    pub port: u16,
    /// The amount of terminal jobs kept per service.
    pub job_retention: usize,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            job_retention: DEFAULT_JOB_RETENTION,
        }
    }
}

impl DaemonConfig {
    /// Reads `SERVE_HOST`, `SERVE_PORT` and `SERVE_JOB_RETENTION`, unset ones keep their default.
    pub fn from_env() -> Result<Self, ConfigErr> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, ConfigErr>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        Ok(Self {
            host: lookup("SERVE_HOST").unwrap_or(defaults.host),
            port: parse_var(&lookup, "SERVE_PORT")?.unwrap_or(defaults.port),
            job_retention: parse_var(&lookup, "SERVE_JOB_RETENTION")?
                .unwrap_or(defaults.job_retention),
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_var<F, T>(lookup: &F, var: &'static str) -> Result<Option<T>, ConfigErr>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: fmt::Display,
{
    lookup(var)
        .map(|value| {
            value.trim().parse().map_err(|e: T::Err| ConfigErr {
                var,
                msg: format!("{value:?}: {e}"),
            })
        })
        .transpose()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelSection {
    pub repository: PathBuf,
}

/// The body of a service creation call.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// The model library, e.g. `softmax`.
    pub mllib: String,
    #[serde(default)]
    pub description: String,
    pub model: ModelSection,
    /// Default `{input, mllib, output}` parameters of every call.
    #[serde(default)]
    pub parameters: Value,
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use serde_json::json;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var| vars.get(var).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = DaemonConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, DaemonConfig::default());
        assert_eq!(config.addr(), "127.0.0.1:8080");
    }

    #[test]
    fn test_values_are_read() {
        let config = DaemonConfig::from_lookup(lookup(&[
            ("SERVE_HOST", "0.0.0.0"),
            ("SERVE_PORT", "9000"),
            ("SERVE_JOB_RETENTION", "2"),
        ]))
        .unwrap();

        assert_eq!(config.addr(), "0.0.0.0:9000");
        assert_eq!(config.job_retention, 2);
    }

    #[test]
    fn test_bad_port_is_rejected() {
        let err = DaemonConfig::from_lookup(lookup(&[("SERVE_PORT", "http")])).unwrap_err();
        assert!(err.to_string().starts_with("invalid SERVE_PORT"));
    }

    #[test]
    fn test_service_config_from_json() {
        let config: ServiceConfig = serde_json::from_value(json!({
            "mllib": "softmax",
            "description": "my classifier",
            "type": "supervised",
            "model": {"repository": "/tmp/repo"},
            "parameters": {"input": {"connector": "csv"}}
        }))
        .unwrap();

        assert_eq!(config.mllib, "softmax");
        assert_eq!(config.model.repository, PathBuf::from("/tmp/repo"));
        assert_eq!(config.parameters["input"]["connector"], "csv");
    }
}

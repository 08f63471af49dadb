use std::{env, path::PathBuf, time::Duration};

use once_cell::sync::Lazy;
use regex::Regex;
use snafu::{ResultExt, Snafu};

use crate::sampler::{SampleRule, Sampler};

const SAMPLE_KEY_PREFIX: &str = "MOBYSTASH_SAMPLE_KEY_";

static TRUTHY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(yes|y|1|on|true|t)$").expect("truthy pattern"));

/// Shared truthiness test for boolean-ish labels and environment variables.
pub fn truthy(value: &str) -> bool {
    TRUTHY.is_match(value)
}

#[derive(Debug, Snafu)]
pub enum ConfigError {
    #[snafu(display("LOGSTASH_SERVER must be set"))]
    MissingLogstashServer,
    #[snafu(display("Invalid {} `{}`: {}", variable, value, source))]
    InvalidInteger {
        variable: &'static str,
        value: String,
        source: std::num::ParseIntError,
    },
    #[snafu(display("{} must be at least 1, got {}", variable, value))]
    OutOfRange {
        variable: &'static str,
        value: String,
    },
    #[snafu(display("Invalid sample key regex `{}`: {}", key, source))]
    InvalidSampleRegex { key: String, source: regex::Error },
}

/// Resolved process configuration. Everything comes from the environment;
/// unrecognized variables are ignored, invalid values abort startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub docker_host: String,
    pub logstash_server: String,
    pub state_file: PathBuf,
    pub state_checkpoint_interval: Duration,
    pub enable_metrics: bool,
    pub sample_ratio: u64,
    pub sample_keys: Vec<(String, Regex)>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_iter(env::vars())
    }

    pub fn from_iter(vars: impl IntoIterator<Item = (String, String)>) -> Result<Self, ConfigError> {
        let mut docker_host = crate::engine::DEFAULT_HOST.to_string();
        let mut logstash_server = None;
        let mut state_file = PathBuf::from("./mobystash_state.json");
        let mut checkpoint_seconds = 60u64;
        let mut enable_metrics = false;
        let mut sample_ratio = 1u64;
        let mut sample_keys = Vec::new();

        for (name, value) in vars {
            match name.as_str() {
                "DOCKER_HOST" => docker_host = value,
                "LOGSTASH_SERVER" => logstash_server = Some(value),
                "MOBYSTASH_STATE_FILE" => state_file = PathBuf::from(value),
                "MOBYSTASH_STATE_CHECKPOINT_INTERVAL" => {
                    checkpoint_seconds = parse_positive("MOBYSTASH_STATE_CHECKPOINT_INTERVAL", &value)?;
                }
                "MOBYSTASH_ENABLE_METRICS" => enable_metrics = truthy(&value),
                "MOBYSTASH_SAMPLE_RATIO" => {
                    sample_ratio = parse_positive("MOBYSTASH_SAMPLE_RATIO", &value)?;
                }
                name => {
                    if let Some(key) = name.strip_prefix(SAMPLE_KEY_PREFIX) {
                        let pattern = Regex::new(&value).context(InvalidSampleRegexSnafu {
                            key: key.to_string(),
                        })?;
                        sample_keys.push((key.to_lowercase(), pattern));
                    }
                }
            }
        }

        // Rule order must not depend on environment iteration order.
        sample_keys.sort_by(|(a, _), (b, _)| a.cmp(b));

        Ok(Config {
            docker_host,
            logstash_server: logstash_server.ok_or(ConfigError::MissingLogstashServer)?,
            state_file,
            state_checkpoint_interval: Duration::from_secs(checkpoint_seconds),
            enable_metrics,
            sample_ratio,
            sample_keys,
        })
    }

    /// A fresh sampler over the configured ratio and rules.
    pub fn sampler(&self) -> Sampler {
        let rules = self
            .sample_keys
            .iter()
            .map(|(key, pattern)| SampleRule::new(key.clone(), pattern.clone()))
            .collect();
        Sampler::new(self.sample_ratio, rules)
    }
}

fn parse_positive(variable: &'static str, value: &str) -> Result<u64, ConfigError> {
    let parsed: u64 = value.parse().context(InvalidIntegerSnafu {
        variable,
        value: value.to_string(),
    })?;
    if parsed == 0 {
        return OutOfRangeSnafu {
            variable,
            value: value.to_string(),
        }
        .fail();
    }
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect()
    }

    #[test]
    fn minimal_environment_uses_defaults() {
        let config =
            Config::from_iter(vars(&[("LOGSTASH_SERVER", "logstash.example.com:5151")])).unwrap();
        assert_eq!(config.docker_host, "unix:///var/run/docker.sock");
        assert_eq!(config.logstash_server, "logstash.example.com:5151");
        assert_eq!(config.state_file, PathBuf::from("./mobystash_state.json"));
        assert_eq!(config.state_checkpoint_interval, Duration::from_secs(60));
        assert!(!config.enable_metrics);
        assert_eq!(config.sample_ratio, 1);
        assert!(config.sample_keys.is_empty());
    }

    #[test]
    fn missing_logstash_server_is_fatal() {
        assert!(matches!(
            Config::from_iter(vars(&[])),
            Err(ConfigError::MissingLogstashServer)
        ));
    }

    #[test]
    fn recognized_variables_override_defaults() {
        let config = Config::from_iter(vars(&[
            ("LOGSTASH_SERVER", "127.0.0.1:5151"),
            ("DOCKER_HOST", "tcp://127.0.0.1:2375"),
            ("MOBYSTASH_STATE_FILE", "/var/lib/mobystash/state.json"),
            ("MOBYSTASH_STATE_CHECKPOINT_INTERVAL", "5"),
            ("MOBYSTASH_ENABLE_METRICS", "on"),
            ("MOBYSTASH_SAMPLE_RATIO", "10"),
        ]))
        .unwrap();
        assert_eq!(config.docker_host, "tcp://127.0.0.1:2375");
        assert_eq!(
            config.state_file,
            PathBuf::from("/var/lib/mobystash/state.json")
        );
        assert_eq!(config.state_checkpoint_interval, Duration::from_secs(5));
        assert!(config.enable_metrics);
        assert_eq!(config.sample_ratio, 10);
    }

    #[test]
    fn invalid_interval_aborts() {
        assert!(Config::from_iter(vars(&[
            ("LOGSTASH_SERVER", "127.0.0.1:5151"),
            ("MOBYSTASH_STATE_CHECKPOINT_INTERVAL", "soon"),
        ]))
        .is_err());
        assert!(Config::from_iter(vars(&[
            ("LOGSTASH_SERVER", "127.0.0.1:5151"),
            ("MOBYSTASH_STATE_CHECKPOINT_INTERVAL", "0"),
        ]))
        .is_err());
    }

    #[test]
    fn sample_keys_collect_and_sort() {
        let config = Config::from_iter(vars(&[
            ("LOGSTASH_SERVER", "127.0.0.1:5151"),
            ("MOBYSTASH_SAMPLE_KEY_ZEBRA", "^z"),
            ("MOBYSTASH_SAMPLE_KEY_ALPHA", "^a"),
        ]))
        .unwrap();
        let keys: Vec<&str> = config
            .sample_keys
            .iter()
            .map(|(key, _)| key.as_str())
            .collect();
        assert_eq!(keys, vec!["alpha", "zebra"]);
    }

    #[test]
    fn invalid_sample_regex_aborts() {
        assert!(matches!(
            Config::from_iter(vars(&[
                ("LOGSTASH_SERVER", "127.0.0.1:5151"),
                ("MOBYSTASH_SAMPLE_KEY_BAD", "(["),
            ])),
            Err(ConfigError::InvalidSampleRegex { .. })
        ));
    }

    #[test]
    fn unknown_variables_are_ignored() {
        let config = Config::from_iter(vars(&[
            ("LOGSTASH_SERVER", "127.0.0.1:5151"),
            ("MOBYSTASH_TYPO", "whatever"),
            ("PATH", "/usr/bin"),
        ]))
        .unwrap();
        assert_eq!(config.logstash_server, "127.0.0.1:5151");
    }

    #[test]
    fn truthy_values() {
        for value in ["yes", "Y", "1", "on", "TRUE", "t"] {
            assert!(truthy(value), "{:?}", value);
        }
        for value in ["no", "0", "off", "false", "", "yess"] {
            assert!(!truthy(value), "{:?}", value);
        }
    }
}

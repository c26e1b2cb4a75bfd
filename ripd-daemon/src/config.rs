//
// Copyright (c) The Ripd Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;

use serde::Deserialize;

// Daemon configuration, currently holding only the logging setup. Loaded
// from the file given by `--log-config`, with sensible defaults when the
// flag is omitted.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub logging: Logging,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Logging {
    pub stdout: LoggingStdout,
    pub file: LoggingFile,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingStdout {
    pub enabled: bool,
    pub style: LoggingFmtStyle,
    pub colors: bool,
    pub show_source: bool,
    pub show_thread_id: bool,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingFile {
    pub enabled: bool,
    pub dir: String,
    pub name: String,
    pub rotation: LoggingFileRotation,
    pub style: LoggingFmtStyle,
    pub show_source: bool,
    pub show_thread_id: bool,
}

#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LoggingFmtStyle {
    Compact,
    Full,
    Json,
    Pretty,
}

#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LoggingFileRotation {
    Never,
    Hourly,
    Daily,
}

// Fatal startup errors.
#[derive(Debug)]
pub enum ConfigError {
    NotSupported(&'static str),
    NoInterfaces,
    UnusableInterface(Ipv4Addr),
    InvalidArgument(&'static str, String),
    LoadError(String, std::io::Error),
    ParseError(toml::de::Error),
    SystemError(String),
}

// ===== impl Config =====

impl Config {
    pub fn load(path: Option<&str>) -> Result<Config, ConfigError> {
        match path {
            Some(path) => {
                let contents = std::fs::read_to_string(path).map_err(
                    |error| ConfigError::LoadError(path.to_owned(), error),
                )?;
                toml::from_str(&contents).map_err(ConfigError::ParseError)
            }
            None => Ok(Config::default()),
        }
    }
}

impl Default for LoggingStdout {
    fn default() -> LoggingStdout {
        LoggingStdout {
            enabled: true,
            style: LoggingFmtStyle::Full,
            colors: true,
            show_source: false,
            show_thread_id: false,
        }
    }
}

impl Default for LoggingFile {
    fn default() -> LoggingFile {
        LoggingFile {
            enabled: false,
            dir: "/var/log".to_owned(),
            name: "ripd.log".to_owned(),
            rotation: LoggingFileRotation::Never,
            style: LoggingFmtStyle::Full,
            show_source: false,
            show_thread_id: false,
        }
    }
}

impl Default for LoggingFmtStyle {
    fn default() -> LoggingFmtStyle {
        LoggingFmtStyle::Full
    }
}

impl Default for LoggingFileRotation {
    fn default() -> LoggingFileRotation {
        LoggingFileRotation::Never
    }
}

// ===== impl ConfigError =====

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::NotSupported(platform) => {
                write!(f, "no support for the current OS: {}", platform)
            }
            ConfigError::NoInterfaces => {
                write!(f, "at least one interface IP is required (-i)")
            }
            ConfigError::UnusableInterface(addr) => {
                write!(
                    f,
                    "requested IP {} is unusable (is it assigned to this \
                     machine on an interface that is up?)",
                    addr
                )
            }
            ConfigError::InvalidArgument(name, value) => {
                write!(f, "invalid value for --{}: {}", name, value)
            }
            ConfigError::LoadError(path, error) => {
                write!(f, "failed to read {}: {}", path, error)
            }
            ConfigError::ParseError(error) => {
                write!(f, "failed to parse configuration: {}", error)
            }
            ConfigError::SystemError(reason) => {
                write!(f, "system error: {}", reason)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::LoadError(_, error) => Some(error),
            ConfigError::ParseError(error) => Some(error),
            _ => None,
        }
    }
}

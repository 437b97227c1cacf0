use std::{
    fs,
    path::{Path, PathBuf},
};

use dynamic_networks_core::cri::{RuntimeError, RuntimeType};
use serde::Deserialize;
use thiserror::Error;

pub const DEFAULT_MULTUS_RUN_DIR: &str = "/var/run/multus-cni/";
pub const DELEGATE_SOCKET_NAME: &str = "multus.sock";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Couldn't read the config file '{}'! Reason: {}", .0.display(), .1)]
    Read(PathBuf, std::io::Error),
    #[error("Couldn't parse the config file! Reason: {}", .0)]
    Parse(serde_json::Error),
    #[error("Invalid CRI type! {}", .0)]
    InvalidRuntimeType(RuntimeError),
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
struct RawControllerConfig {
    #[serde(default)]
    cri_socket_path: String,
    #[serde(default)]
    cri_type: String,
    #[serde(default)]
    multus_socket_path: String,
}

/// Runtime and delegate endpoints, read from the shared multus daemon config.
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerConfig {
    pub cri_socket_path: PathBuf,
    pub cri_type: RuntimeType,
    pub multus_socket_path: PathBuf,
}

impl ControllerConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read(path).map_err(|err| ConfigError::Read(path.to_owned(), err))?;

        Self::from_slice(&raw)
    }

    pub fn from_slice(raw: &[u8]) -> Result<Self, ConfigError> {
        let raw = serde_json::from_slice::<RawControllerConfig>(raw).map_err(ConfigError::Parse)?;

        let cri_type = match raw.cri_type.is_empty() {
            true => RuntimeType::default(),
            false => raw
                .cri_type
                .parse::<RuntimeType>()
                .map_err(ConfigError::InvalidRuntimeType)?,
        };

        let cri_socket_path = match raw.cri_socket_path.is_empty() {
            true => PathBuf::from(cri_type.default_socket_path()),
            false => PathBuf::from(raw.cri_socket_path),
        };

        let multus_socket_path = match raw.multus_socket_path.is_empty() {
            true => PathBuf::from(DEFAULT_MULTUS_RUN_DIR),
            false => PathBuf::from(raw.multus_socket_path),
        };

        Ok(Self {
            cri_socket_path,
            cri_type,
            multus_socket_path,
        })
    }

    /// The delegate's socket; a directory resolves to the `multus.sock` inside it.
    pub fn delegate_socket_path(&self) -> PathBuf {
        match self.multus_socket_path.extension() {
            Some(extension) if extension == "sock" => self.multus_socket_path.to_owned(),
            _ => self.multus_socket_path.join(DELEGATE_SOCKET_NAME),
        }
    }
}

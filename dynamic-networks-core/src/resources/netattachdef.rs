use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::helpers::{namespaced_name, RequireMetadata};

#[derive(Debug, Error)]
pub enum NetAttachDefError {
    #[error("Network attachment definition is missing a name!")]
    MissingName,
    #[error("Network attachment definition '{}' has an empty config!", .0)]
    EmptyConfig(String),
    #[error("Network attachment definition '{}' has an invalid config! Reason: {}", .0, .1)]
    MalformedConfig(String, serde_json::Error),
}

#[derive(CustomResource, Deserialize, Serialize, Clone, Default, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
#[kube(
    group = "k8s.cni.cncf.io",
    version = "v1",
    kind = "NetworkAttachmentDefinition",
    plural = "network-attachment-definitions",
    shortname = "net-attach-def",
    namespaced,
    derive = "Default"
)]
pub struct NetworkAttachmentDefinitionSpec {
    /// CNI plugin configuration, as a JSON document
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<String>,
}

impl NetworkAttachmentDefinition {
    pub fn namespaced_name(&self) -> String {
        namespaced_name(
            self.metadata.namespace.as_deref().unwrap_or_default(),
            self.metadata.name.as_deref().unwrap_or_default(),
        )
    }

    /// The CNI config handed to the delegate, with the definition's name filled in when the
    /// config doesn't carry one.
    pub fn cni_config_with_defaults(&self) -> Result<Vec<u8>, NetAttachDefError> {
        let name = self.require_name_or(NetAttachDefError::MissingName)?;
        let raw = self
            .spec
            .config
            .as_deref()
            .filter(|config| !config.trim().is_empty())
            .ok_or_else(|| NetAttachDefError::EmptyConfig(self.namespaced_name()))?;

        let mut config = serde_json::from_str::<Map<String, Value>>(raw)
            .map_err(|err| NetAttachDefError::MalformedConfig(self.namespaced_name(), err))?;

        let has_name = config
            .get("name")
            .and_then(Value::as_str)
            .map(|name| !name.is_empty())
            .unwrap_or(false);

        if !has_name {
            config.insert("name".to_owned(), Value::String(name.to_owned()));
        }

        serde_json::to_vec(&config)
            .map_err(|err| NetAttachDefError::MalformedConfig(self.namespaced_name(), err))
    }
}

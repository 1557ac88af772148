use serde::{Deserialize, Serialize};

use crate::error::SelectionError;

/// Model id that runs offline and needs no API key
pub const LOCAL_MODEL_ID: &str = "local";

/// Role used when the backend cannot be reached
pub const DEFAULT_ROLE_ID: &str = "default";

/// A model the backend can answer with
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelItem {
    pub id: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ModelItem {
    pub fn new(id: &str, label: &str) -> Self {
        Self {
            id: id.to_string(),
            label: label.to_string(),
            description: None,
        }
    }

    /// Cloud models need the user's API key
    pub fn requires_api_key(&self) -> bool {
        is_cloud_model(&self.id)
    }
}

/// A persona the assistant speaks as
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleItem {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub prompt: String,
}

/// `GET /presets`
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresetsResponse {
    #[serde(default)]
    pub models: Vec<ModelItem>,
    #[serde(default)]
    pub roles: Vec<RoleItem>,
}

impl PresetsResponse {
    /// Options offered while the backend is unreachable
    pub fn fallback() -> Self {
        Self {
            models: vec![ModelItem::new(LOCAL_MODEL_ID, "Local (offline)")],
            roles: vec![RoleItem {
                id: DEFAULT_ROLE_ID.to_string(),
                label: "Default".to_string(),
                prompt: String::new(),
            }],
        }
    }

    pub fn default_model(&self) -> Option<&ModelItem> {
        self.models.first()
    }

    pub fn default_role(&self) -> Option<&RoleItem> {
        self.roles.first()
    }

    pub fn model(&self, id: &str) -> Option<&ModelItem> {
        self.models.iter().find(|m| m.id == id)
    }

    pub fn role(&self, id: &str) -> Option<&RoleItem> {
        self.roles.iter().find(|r| r.id == id)
    }

    /// Like [`SelectionRequest::validate`], but also rejects ids this list
    /// does not offer
    pub fn check(&self, request: &SelectionRequest) -> Result<(), SelectionError> {
        request.validate()?;
        let model_id = request.model_id.as_deref().unwrap_or_default();
        if self.model(model_id).is_none() {
            return Err(SelectionError::UnknownModel(model_id.to_string()));
        }
        let role_id = request.role_id.as_deref().unwrap_or_default();
        if self.role(role_id).is_none() {
            return Err(SelectionError::UnknownRole(role_id.to_string()));
        }
        Ok(())
    }
}

pub fn is_cloud_model(model_id: &str) -> bool {
    !model_id.is_empty() && model_id != LOCAL_MODEL_ID
}

/// `POST /presets/select` body
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_id: Option<String>,
    /// Only sent for cloud models
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl SelectionRequest {
    pub fn is_cloud(&self) -> bool {
        self.model_id.as_deref().is_some_and(is_cloud_model)
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.as_ref().is_some_and(|k| !k.trim().is_empty())
    }

    /// Checks in the order the user is asked: model, role, API key.
    pub fn validate(&self) -> Result<(), SelectionError> {
        if self.model_id.as_deref().map_or(true, str::is_empty) {
            return Err(SelectionError::MissingModel);
        }
        if self.role_id.as_deref().map_or(true, str::is_empty) {
            return Err(SelectionError::MissingRole);
        }
        if self.is_cloud() && !self.has_api_key() {
            return Err(SelectionError::MissingApiKey);
        }
        Ok(())
    }

    /// Trimmed username (blank dropped) and no API key for the local model.
    pub fn normalized(&self) -> Self {
        let username = self
            .username
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .map(str::to_string);
        let api_key = if self.is_cloud() {
            self.api_key.clone().filter(|k| !k.trim().is_empty())
        } else {
            None
        };
        Self {
            username,
            model_id: self.model_id.clone(),
            role_id: self.role_id.clone(),
            api_key,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentSelection {
    #[serde(default)]
    pub username: String,
    pub model: ModelItem,
    pub role: RoleItem,
}

/// `POST /presets/select` reply
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionResponse {
    #[serde(default)]
    pub message: String,
    pub current: CurrentSelection,
}

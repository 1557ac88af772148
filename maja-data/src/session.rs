//! Who is talking, to which model, in which role.
//!
//! Held in memory only; a fresh process always starts at the welcome page.

use crate::error::SelectionError;
use crate::presets::SelectionRequest;

/// Name shown on the user's bubbles when none was given
pub const DEFAULT_DISPLAY_NAME: &str = "You";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    username: Option<String>,
    model_id: Option<String>,
    role_id: Option<String>,
    api_key: Option<String>,
    started: bool,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget everything. Called once at start-up.
    pub fn init(&mut self) {
        *self = Self::default();
    }

    /// Record a validated selection and mark the session started.
    pub fn start(&mut self, request: &SelectionRequest) -> Result<(), SelectionError> {
        request.validate()?;
        let request = request.normalized();
        self.username = request.username;
        self.model_id = request.model_id;
        self.role_id = request.role_id;
        self.api_key = request.api_key;
        self.started = true;
        log::info!(
            "Session: started with model {:?}, role {:?}",
            self.model_id,
            self.role_id
        );
        Ok(())
    }

    pub fn end(&mut self) {
        if self.started {
            log::info!("Session: ended");
        }
        self.init();
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn display_name(&self) -> &str {
        self.username.as_deref().unwrap_or(DEFAULT_DISPLAY_NAME)
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn model_id(&self) -> Option<&str> {
        self.model_id.as_deref()
    }

    pub fn role_id(&self) -> Option<&str> {
        self.role_id.as_deref()
    }

    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }

    /// The selection this session was started with
    pub fn selection(&self) -> SelectionRequest {
        SelectionRequest {
            username: self.username.clone(),
            model_id: self.model_id.clone(),
            role_id: self.role_id.clone(),
            api_key: self.api_key.clone(),
        }
    }
}

// Session Configuration

use crate::radio::{ServiceId, INSECURE_SERVICE_ID, SERVICE_NAME};
use crate::session::SessionError;
use serde::{Deserialize, Serialize};

/// Read buffer used by the pump unless configured otherwise
pub const DEFAULT_READ_BUFFER_SIZE: usize = 1024;

/// Configuration for a [`ConnectionManager`](crate::session::ConnectionManager)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Name advertised with the service record
    pub service_name: String,
    /// Service record the listener advertises and connects default to
    pub service_id: ServiceId,
    /// Size of the pump's read buffer in bytes
    pub read_buffer_size: usize,
    /// Stop device discovery before every outbound connect
    pub cancel_discovery: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            service_name: SERVICE_NAME.to_string(),
            service_id: INSECURE_SERVICE_ID,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            cancel_discovery: true,
        }
    }
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_service_name(mut self, name: &str) -> Self {
        self.service_name = name.to_string();
        self
    }

    pub fn with_service_id(mut self, service: ServiceId) -> Self {
        self.service_id = service;
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    pub fn with_cancel_discovery(mut self, enabled: bool) -> Self {
        self.cancel_discovery = enabled;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.service_name.is_empty() {
            return Err(SessionError::InvalidConfig(
                "service_name cannot be empty".to_string(),
            ));
        }
        if self.read_buffer_size == 0 {
            return Err(SessionError::InvalidConfig(
                "read_buffer_size cannot be 0".to_string(),
            ));
        }
        Ok(())
    }
}

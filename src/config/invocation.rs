use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

#[derive(Debug, Serialize, Deserialize, Clone, Copy)]
pub struct InvocationConfig {
    /// Resend non read-only operations whose connection died while they were in flight.
    /// Enabling this may apply a write twice.
    /// Default: false
    #[serde(default)]
    pub redo_operation: bool,

    /// Upper bound for queued plus in-flight operations
    /// Default: 10000
    #[serde(default = "default_max_pending_invocations")]
    pub max_pending_invocations: usize,
}

impl Default for InvocationConfig {
    fn default() -> Self {
        Self {
            redo_operation: false,
            max_pending_invocations: default_max_pending_invocations(),
        }
    }
}

impl InvocationConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_pending_invocations == 0 {
            return Err(Error::Configuration(
                "max_pending_invocations must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

fn default_max_pending_invocations() -> usize {
    10_000
}

//! Wire types and the store trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::StoreResult;

/// A service as reported by the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteService {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub scale: i64,
    /// `"no"` when the service is settled; anything else (`"yes"`,
    /// `"error"`) means a change is still rolling out.
    #[serde(default = "settled")]
    pub transitioning: String,
}

fn settled() -> String {
    "no".to_string()
}

impl RemoteService {
    pub fn new(id: &str, name: &str, scale: i64) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            scale,
            transitioning: settled(),
        }
    }

    /// Whether the service is mid-change and must not be targeted.
    pub fn is_transitioning(&self) -> bool {
        self.transitioning != "no"
    }
}

/// Body of a scale write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScaleRequest {
    pub scale: i64,
}

/// Read and write access to the authoritative instance counts.
#[async_trait]
pub trait ScaleStore: Send + Sync {
    /// Fetch the current scale and transition state of a service.
    async fn get_service(&self, id: &str) -> StoreResult<RemoteService>;

    /// Set the desired instance count of a service.
    async fn set_scale(&self, id: &str, scale: i64) -> StoreResult<()>;
}

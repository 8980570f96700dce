//! Durable component-state persistence.

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::error::StoreError;

/// Stores one serialized state blob per component name.
///
/// Each stateful component is a singleton; its whole state lives under a
/// fixed key and is written back in full on every mutation. Writes must be
/// atomic per key. The blob format is JSON produced by the component's
/// serde model.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Load the blob for a component, `None` if it has never persisted.
    async fn load(&self, component: &str) -> Result<Option<Value>, StoreError>;

    /// Replace the blob for a component.
    async fn save(&self, component: &str, state: &Value) -> Result<(), StoreError>;
}

use super::Client;
use crate::Operation;
use crate::Result;

/// Handle on a named distributed map
///
/// All operations are retryable: issued while the client is reconnecting
/// they wait for the cluster instead of failing.
#[derive(Debug, Clone)]
pub struct MapProxy {
    name: String,
    client: Client,
}

impl MapProxy {
    pub const SERVICE_NAME: &'static str = "map";

    pub(crate) fn new(
        name: &str,
        client: Client,
    ) -> Self {
        Self {
            name: name.to_string(),
            client,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stores a value and returns the previous one
    pub async fn put(
        &self,
        key: impl AsRef<[u8]>,
        value: impl AsRef<[u8]>,
    ) -> Result<Option<Vec<u8>>> {
        let operation = Operation::MapPut {
            name: self.name.clone(),
            key: key.as_ref().to_vec(),
            value: value.as_ref().to_vec(),
        };
        Ok(self.client.submit(operation, true).await?.into_value())
    }

    pub async fn get(
        &self,
        key: impl AsRef<[u8]>,
    ) -> Result<Option<Vec<u8>>> {
        let operation = Operation::MapGet {
            name: self.name.clone(),
            key: key.as_ref().to_vec(),
        };
        Ok(self.client.submit(operation, true).await?.into_value())
    }

    /// Deletes a key and returns the value it held
    pub async fn remove(
        &self,
        key: impl AsRef<[u8]>,
    ) -> Result<Option<Vec<u8>>> {
        let operation = Operation::MapRemove {
            name: self.name.clone(),
            key: key.as_ref().to_vec(),
        };
        Ok(self.client.submit(operation, true).await?.into_value())
    }
}

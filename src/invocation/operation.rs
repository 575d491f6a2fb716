use serde::Deserialize;
use serde::Serialize;

/// Request executed by a member on behalf of a proxy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    /// Makes sure the distributed object exists on the cluster
    CreateProxy { service: String, name: String },
    MapPut {
        name: String,
        key: Vec<u8>,
        value: Vec<u8>,
    },
    MapGet { name: String, key: Vec<u8> },
    MapRemove { name: String, key: Vec<u8> },
}

impl Operation {
    /// Read-only operations may be resent after a lost response without side effects
    pub fn is_read_only(&self) -> bool {
        matches!(
            self,
            Operation::MapGet { .. } | Operation::CreateProxy { .. }
        )
    }

    /// Key whose operations must reach the cluster in submission order
    pub fn routing_key(&self) -> Option<&[u8]> {
        match self {
            Operation::MapPut { key, .. }
            | Operation::MapGet { key, .. }
            | Operation::MapRemove { key, .. } => Some(key),
            Operation::CreateProxy { .. } => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Operation::CreateProxy { .. } => "create_proxy",
            Operation::MapPut { .. } => "map_put",
            Operation::MapGet { .. } => "map_get",
            Operation::MapRemove { .. } => "map_remove",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationResult {
    Done,
    Value(Option<Vec<u8>>),
}

impl OperationResult {
    pub fn into_value(self) -> Option<Vec<u8>> {
        match self {
            OperationResult::Value(v) => v,
            OperationResult::Done => None,
        }
    }
}

//! Client operations the OPC-UA driver needs beyond the common interface.

use async_trait::async_trait;

use fieldgate_driver_framework::{ClientResult, ProtocolClient};

use crate::coerce::DataType;

#[async_trait]
pub trait OpcUaClient: ProtocolClient {
    /// Data type of a variable node, used to coerce written values.
    async fn data_type(&self, node: &str) -> ClientResult<DataType>;

    /// Server details included in the info reply.
    fn server_info(&self) -> serde_json::Value {
        serde_json::Value::Null
    }
}

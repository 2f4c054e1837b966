//! Item-level PLC client over a register transport.

use std::sync::Arc;

use async_trait::async_trait;

use fieldgate_driver_framework::{
    Capabilities, ClientError, ClientFactory, ClientResult, DataValue, ProtocolClient, StatusCode, Variant,
    WriteValue,
};

use crate::address::{Area, PlcAddress, to_bits};

/// Raw access to the data areas of one device.
///
/// Device-reported errors (e.g. an illegal address) are `ClientError::Status`
/// and affect one item; any other error fails the whole request.
#[async_trait]
pub trait RegisterIo: Send + Sync + 'static {
    async fn open(&self) -> ClientResult<()>;

    async fn close(&self);

    fn is_open(&self) -> bool;

    async fn read_bits(&self, area: Area, start: u16, count: u16) -> ClientResult<Vec<bool>>;

    async fn read_words(&self, area: Area, start: u16, count: u16) -> ClientResult<Vec<u16>>;

    async fn write_coils(&self, start: u16, values: &[bool]) -> ClientResult<()>;

    async fn write_registers(&self, start: u16, values: &[u16]) -> ClientResult<()>;
}

/// Reads and writes addressed items through a [`RegisterIo`].
pub struct PlcClient<R: RegisterIo> {
    io: Arc<R>,
}

impl<R: RegisterIo> PlcClient<R> {
    pub fn new(io: Arc<R>) -> Self {
        Self { io }
    }

    pub fn io(&self) -> &Arc<R> {
        &self.io
    }

    async fn read_item(&self, address: &PlcAddress) -> ClientResult<Variant> {
        let mut values: Vec<Variant> = if address.area.is_bits() {
            self.io
                .read_bits(address.area, address.index, address.quantity())
                .await?
                .into_iter()
                .map(Variant::Boolean)
                .collect()
        } else {
            let words = self
                .io
                .read_words(address.area, address.index, address.quantity())
                .await?;
            address.format.decode(&words)
        };

        if address.count == 1 {
            values
                .pop()
                .ok_or(ClientError::Status(StatusCode::BAD_UNEXPECTED_ERROR))
        } else {
            Ok(Variant::Array(values))
        }
    }

    async fn write_item(&self, address: &PlcAddress, value: &Variant) -> ClientResult<()> {
        match address.area {
            Area::Coil => {
                let bits = to_bits(value).map_err(ClientError::TypeMismatch)?;
                self.io.write_coils(address.index, &bits).await
            }
            Area::HoldingRegister => {
                let words = address.format.encode(value).map_err(ClientError::TypeMismatch)?;
                self.io.write_registers(address.index, &words).await
            }
            Area::DiscreteInput | Area::InputRegister => {
                Err(ClientError::Status(StatusCode::BAD_NOT_WRITABLE))
            }
        }
    }
}

/// Whether an error belongs to one item rather than the connection.
fn is_item_error(error: &ClientError) -> bool {
    !error.is_transient()
}

#[async_trait]
impl<R: RegisterIo> ProtocolClient for PlcClient<R> {
    async fn connect(&self) -> ClientResult<()> {
        self.io.open().await
    }

    async fn disconnect(&self) -> ClientResult<()> {
        self.io.close().await;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.io.is_open()
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            browse: false,
            read: true,
            write: true,
            subscribe: false,
        }
    }

    async fn read_values(&self, addresses: &[String]) -> ClientResult<Vec<DataValue>> {
        let mut values = Vec::with_capacity(addresses.len());
        for text in addresses {
            let Ok(address) = PlcAddress::parse(text) else {
                values.push(DataValue::bad(StatusCode::BAD_NODE_ID_INVALID));
                continue;
            };
            match self.read_item(&address).await {
                Ok(value) => values.push(DataValue::good(value)),
                Err(e) if is_item_error(&e) => {
                    tracing::debug!(address = %text, error = %e, "Read failed");
                    values.push(DataValue::bad(e.status()));
                }
                Err(e) => return Err(e),
            }
        }
        Ok(values)
    }

    async fn write_values(&self, values: &[WriteValue]) -> ClientResult<Vec<StatusCode>> {
        let mut statuses = Vec::with_capacity(values.len());
        for write in values {
            let Ok(address) = PlcAddress::parse(&write.address) else {
                statuses.push(StatusCode::BAD_NODE_ID_INVALID);
                continue;
            };
            match self.write_item(&address, &write.value).await {
                Ok(()) => statuses.push(StatusCode::GOOD),
                Err(e) if is_item_error(&e) => {
                    tracing::debug!(address = %write.address, error = %e, "Write failed");
                    statuses.push(e.status());
                }
                Err(e) => return Err(e),
            }
        }
        Ok(statuses)
    }
}

/// Creates clients sharing one transport.
pub struct PlcClientFactory<R: RegisterIo> {
    io: Arc<R>,
}

impl<R: RegisterIo> PlcClientFactory<R> {
    pub fn new(io: Arc<R>) -> Self {
        Self { io }
    }
}

#[async_trait]
impl<R: RegisterIo> ClientFactory<PlcClient<R>> for PlcClientFactory<R> {
    async fn create(&self) -> ClientResult<Arc<PlcClient<R>>> {
        Ok(Arc::new(PlcClient::new(self.io.clone())))
    }
}

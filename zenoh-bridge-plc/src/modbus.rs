//! Modbus TCP/RTU transport.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::error::Elapsed;
use tokio_modbus::client::Context;
use tokio_modbus::prelude::*;

use fieldgate_driver_framework::{ClientError, ClientResult, StatusCode};

use crate::address::Area;
use crate::client::RegisterIo;
use crate::config::ConnectionConfig;

/// A Modbus connection to one unit.
pub struct ModbusIo {
    connection: ConnectionConfig,
    unit_id: u8,
    timeout: Duration,
    context: Mutex<Option<Context>>,
    open: AtomicBool,
}

impl ModbusIo {
    pub fn new(connection: ConnectionConfig, unit_id: u8, timeout: Duration) -> Self {
        Self {
            connection,
            unit_id,
            timeout,
            context: Mutex::new(None),
            open: AtomicBool::new(false),
        }
    }

    async fn connect_context(&self) -> ClientResult<Context> {
        let slave = Slave(self.unit_id);

        match &self.connection {
            ConnectionConfig::Tcp { host, port } => {
                let target = format!("{}:{}", host, port);
                let addr = tokio::net::lookup_host(&target)
                    .await
                    .map_err(|e| ClientError::Connect(format!("cannot resolve {}: {}", target, e)))?
                    .next()
                    .ok_or_else(|| ClientError::Connect(format!("no address for {}", target)))?;

                tokio::time::timeout(self.timeout, tcp::connect_slave(addr, slave))
                    .await
                    .map_err(|_| ClientError::Connect("connection timeout".to_string()))?
                    .map_err(|e| ClientError::Connect(e.to_string()))
            }
            ConnectionConfig::Rtu {
                port,
                baud_rate,
                data_bits,
                parity,
                stop_bits,
            } => {
                let builder = serial_builder(port, *baud_rate, *data_bits, parity, *stop_bits);
                let serial = tokio_serial::SerialStream::open(&builder)
                    .map_err(|e| ClientError::Connect(format!("serial open failed: {}", e)))?;
                Ok(rtu::attach_slave(serial, slave))
            }
            ConnectionConfig::Memory { .. } => Err(ClientError::InvalidEndpoint(
                "memory connections have no Modbus transport".to_string(),
            )),
        }
    }

    /// Map a request outcome; transport failures drop the connection.
    fn settle<T>(
        &self,
        context: &mut Option<Context>,
        outcome: Result<tokio_modbus::Result<T>, Elapsed>,
    ) -> ClientResult<T> {
        match outcome {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(code))) => Err(ClientError::Status(exception_status(code))),
            Ok(Err(e)) => {
                tracing::warn!(unit = self.unit_id, error = %e, "Modbus transport error");
                self.drop_context(context);
                Err(ClientError::Communication(e.to_string()))
            }
            Err(_) => {
                self.drop_context(context);
                Err(ClientError::Timeout(self.timeout))
            }
        }
    }

    fn drop_context(&self, context: &mut Option<Context>) {
        *context = None;
        self.open.store(false, Ordering::SeqCst);
    }
}

/// Serial port settings, as validated by the configuration.
fn serial_builder(
    port: &str,
    baud_rate: u32,
    data_bits: u8,
    parity: &str,
    stop_bits: u8,
) -> tokio_serial::SerialPortBuilder {
    let parity = match parity.to_lowercase().as_str() {
        "even" => tokio_serial::Parity::Even,
        "odd" => tokio_serial::Parity::Odd,
        _ => tokio_serial::Parity::None,
    };

    let stop_bits = match stop_bits {
        2 => tokio_serial::StopBits::Two,
        _ => tokio_serial::StopBits::One,
    };

    let data_bits = match data_bits {
        5 => tokio_serial::DataBits::Five,
        6 => tokio_serial::DataBits::Six,
        7 => tokio_serial::DataBits::Seven,
        _ => tokio_serial::DataBits::Eight,
    };

    tokio_serial::new(port, baud_rate)
        .parity(parity)
        .stop_bits(stop_bits)
        .data_bits(data_bits)
}

/// Status reported for a Modbus exception response.
fn exception_status(code: ExceptionCode) -> StatusCode {
    match code {
        ExceptionCode::IllegalFunction => StatusCode::BAD_NOT_SUPPORTED,
        ExceptionCode::IllegalDataAddress => StatusCode::BAD_NODE_ID_UNKNOWN,
        ExceptionCode::IllegalDataValue => StatusCode::BAD_OUT_OF_RANGE,
        _ => StatusCode::BAD_COMMUNICATION_ERROR,
    }
}

#[async_trait]
impl RegisterIo for ModbusIo {
    async fn open(&self) -> ClientResult<()> {
        let context = self.connect_context().await?;
        *self.context.lock().await = Some(context);
        self.open.store(true, Ordering::SeqCst);
        tracing::debug!(unit = self.unit_id, connection = %self.connection.describe(), "Modbus connection open");
        Ok(())
    }

    async fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
        let context = self.context.lock().await.take();
        if let Some(mut context) = context
            && let Err(e) = context.disconnect().await
        {
            tracing::debug!(unit = self.unit_id, error = %e, "Modbus disconnect failed");
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn read_bits(&self, area: Area, start: u16, count: u16) -> ClientResult<Vec<bool>> {
        let mut guard = self.context.lock().await;
        let context = guard.as_mut().ok_or(ClientError::NotConnected)?;
        let outcome = match area {
            Area::Coil => tokio::time::timeout(self.timeout, context.read_coils(start, count)).await,
            Area::DiscreteInput => {
                tokio::time::timeout(self.timeout, context.read_discrete_inputs(start, count)).await
            }
            _ => return Err(ClientError::Status(StatusCode::BAD_NOT_SUPPORTED)),
        };
        self.settle(&mut guard, outcome)
    }

    async fn read_words(&self, area: Area, start: u16, count: u16) -> ClientResult<Vec<u16>> {
        let mut guard = self.context.lock().await;
        let context = guard.as_mut().ok_or(ClientError::NotConnected)?;
        let outcome = match area {
            Area::InputRegister => {
                tokio::time::timeout(self.timeout, context.read_input_registers(start, count)).await
            }
            Area::HoldingRegister => {
                tokio::time::timeout(self.timeout, context.read_holding_registers(start, count))
                    .await
            }
            _ => return Err(ClientError::Status(StatusCode::BAD_NOT_SUPPORTED)),
        };
        self.settle(&mut guard, outcome)
    }

    async fn write_coils(&self, start: u16, values: &[bool]) -> ClientResult<()> {
        let mut guard = self.context.lock().await;
        let context = guard.as_mut().ok_or(ClientError::NotConnected)?;
        let outcome = match values {
            [value] => tokio::time::timeout(self.timeout, context.write_single_coil(start, *value)).await,
            _ => tokio::time::timeout(self.timeout, context.write_multiple_coils(start, values)).await,
        };
        self.settle(&mut guard, outcome)
    }

    async fn write_registers(&self, start: u16, values: &[u16]) -> ClientResult<()> {
        let mut guard = self.context.lock().await;
        let context = guard.as_mut().ok_or(ClientError::NotConnected)?;
        let outcome = match values {
            [value] => {
                tokio::time::timeout(self.timeout, context.write_single_register(start, *value))
                    .await
            }
            _ => {
                tokio::time::timeout(self.timeout, context.write_multiple_registers(start, values))
                    .await
            }
        };
        self.settle(&mut guard, outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exception_status() {
        assert_eq!(
            exception_status(ExceptionCode::IllegalDataAddress),
            StatusCode::BAD_NODE_ID_UNKNOWN
        );
        assert_eq!(
            exception_status(ExceptionCode::IllegalFunction),
            StatusCode::BAD_NOT_SUPPORTED
        );
        assert_eq!(
            exception_status(ExceptionCode::ServerDeviceBusy),
            StatusCode::BAD_COMMUNICATION_ERROR
        );
    }

    #[tokio::test]
    async fn test_not_open_until_connected() {
        let io = ModbusIo::new(
            ConnectionConfig::Tcp {
                host: "127.0.0.1".into(),
                port: 502,
            },
            1,
            Duration::from_millis(50),
        );
        assert!(!io.is_open());
        assert_eq!(
            io.read_words(Area::HoldingRegister, 0, 1).await,
            Err(ClientError::NotConnected)
        );
    }

    #[tokio::test]
    async fn test_memory_connection_is_rejected() {
        let io = ModbusIo::new(ConnectionConfig::Memory { size: 8 }, 1, Duration::from_millis(50));
        assert!(matches!(io.open().await, Err(ClientError::InvalidEndpoint(_))));
    }
}

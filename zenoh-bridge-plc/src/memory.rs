//! In-process register bank behaving like a Modbus unit.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;

use fieldgate_driver_framework::{ClientError, ClientResult, StatusCode};

use crate::address::Area;
use crate::client::RegisterIo;

pub struct MemoryRegisters {
    coils: RwLock<Vec<bool>>,
    discrete_inputs: RwLock<Vec<bool>>,
    input_registers: RwLock<Vec<u16>>,
    holding_registers: RwLock<Vec<u16>>,
    open: AtomicBool,
    online: AtomicBool,
    reads: AtomicUsize,
}

impl MemoryRegisters {
    /// A bank with `size` zeroed entries per area.
    pub fn new(size: u16) -> Self {
        let size = usize::from(size);
        Self {
            coils: RwLock::new(vec![false; size]),
            discrete_inputs: RwLock::new(vec![false; size]),
            input_registers: RwLock::new(vec![0; size]),
            holding_registers: RwLock::new(vec![0; size]),
            open: AtomicBool::new(false),
            online: AtomicBool::new(true),
            reads: AtomicUsize::new(0),
        }
    }

    /// Set bits of a coil or discrete input area.
    pub fn set_bits(&self, area: Area, start: u16, values: &[bool]) -> ClientResult<()> {
        let mut bits = match area {
            Area::Coil => self.coils.write(),
            Area::DiscreteInput => self.discrete_inputs.write(),
            _ => return Err(ClientError::Status(StatusCode::BAD_NOT_SUPPORTED)),
        };
        let range = span(start, values.len(), bits.len())?;
        bits[range].copy_from_slice(values);
        Ok(())
    }

    /// Set words of an input or holding register area.
    pub fn set_words(&self, area: Area, start: u16, values: &[u16]) -> ClientResult<()> {
        let mut words = match area {
            Area::InputRegister => self.input_registers.write(),
            Area::HoldingRegister => self.holding_registers.write(),
            _ => return Err(ClientError::Status(StatusCode::BAD_NOT_SUPPORTED)),
        };
        let range = span(start, values.len(), words.len())?;
        words[range].copy_from_slice(values);
        Ok(())
    }

    pub fn holding_registers(&self, start: u16, count: u16) -> Vec<u16> {
        let words = self.holding_registers.read();
        span(start, count.into(), words.len())
            .map(|range| words[range].to_vec())
            .unwrap_or_default()
    }

    pub fn coil(&self, index: u16) -> Option<bool> {
        self.coils.read().get(usize::from(index)).copied()
    }

    /// Number of read requests served.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Break the link; requests fail until [`go_online`](Self::go_online) and a reconnect.
    pub fn go_offline(&self) {
        self.online.store(false, Ordering::SeqCst);
        self.open.store(false, Ordering::SeqCst);
    }

    pub fn go_online(&self) {
        self.online.store(true, Ordering::SeqCst);
    }

    fn check_open(&self) -> ClientResult<()> {
        if !self.online.load(Ordering::SeqCst) {
            return Err(ClientError::Communication("link down".to_string()));
        }
        if !self.open.load(Ordering::SeqCst) {
            return Err(ClientError::NotConnected);
        }
        Ok(())
    }
}

/// Index range of `count` entries from `start`, or the illegal-address status.
fn span(start: u16, count: usize, len: usize) -> ClientResult<std::ops::Range<usize>> {
    let start = usize::from(start);
    let end = start + count;
    if count == 0 || end > len {
        return Err(ClientError::Status(StatusCode::BAD_NODE_ID_UNKNOWN));
    }
    Ok(start..end)
}

#[async_trait]
impl RegisterIo for MemoryRegisters {
    async fn open(&self) -> ClientResult<()> {
        if !self.online.load(Ordering::SeqCst) {
            return Err(ClientError::Connect("link down".to_string()));
        }
        self.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst) && self.online.load(Ordering::SeqCst)
    }

    async fn read_bits(&self, area: Area, start: u16, count: u16) -> ClientResult<Vec<bool>> {
        self.check_open()?;
        self.reads.fetch_add(1, Ordering::SeqCst);
        let bits = match area {
            Area::Coil => self.coils.read(),
            Area::DiscreteInput => self.discrete_inputs.read(),
            _ => return Err(ClientError::Status(StatusCode::BAD_NOT_SUPPORTED)),
        };
        Ok(bits[span(start, count.into(), bits.len())?].to_vec())
    }

    async fn read_words(&self, area: Area, start: u16, count: u16) -> ClientResult<Vec<u16>> {
        self.check_open()?;
        self.reads.fetch_add(1, Ordering::SeqCst);
        let words = match area {
            Area::InputRegister => self.input_registers.read(),
            Area::HoldingRegister => self.holding_registers.read(),
            _ => return Err(ClientError::Status(StatusCode::BAD_NOT_SUPPORTED)),
        };
        Ok(words[span(start, count.into(), words.len())?].to_vec())
    }

    async fn write_coils(&self, start: u16, values: &[bool]) -> ClientResult<()> {
        self.check_open()?;
        self.set_bits(Area::Coil, start, values)
    }

    async fn write_registers(&self, start: u16, values: &[u16]) -> ClientResult<()> {
        self.check_open()?;
        self.set_words(Area::HoldingRegister, start, values)
    }
}

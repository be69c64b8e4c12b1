//! Test doubles for the transport, timer, storage and indicator contracts.

use crate::indicator::Indicator;
use crate::proxy::{ChannelMode, ProxyEvent, ProxyObserver};
use crate::signal::{Work, WorkQueue};
use crate::storage::Memory;
use crate::transport::{BusMode, CanTransport, MonotonicTimer, SerialTransport, SystemControl};
use crate::CanFrame;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::vec::Vec;

#[derive(Debug, Default)]
pub struct MockSerial {
    pub rx: VecDeque<u8>,
    pub tx: Vec<u8>,
    pub tx_capacity: usize,
    /// Cap on bytes accepted by a single write.
    pub max_write: usize,
    pub ready: Vec<bool>,
    pub reads: usize,
}

impl MockSerial {
    pub fn new() -> Self {
        MockSerial {
            tx_capacity: 4096,
            max_write: usize::MAX,
            ..Default::default()
        }
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.rx.extend(bytes.iter().copied());
    }

    pub fn take(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.tx)
    }
}

impl SerialTransport for MockSerial {
    fn read(&mut self, buffer: &mut [u8]) -> usize {
        self.reads += 1;
        let count = buffer.len().min(self.rx.len());
        for slot in buffer.iter_mut().take(count) {
            *slot = self.rx.pop_front().unwrap();
        }
        count
    }

    fn write(&mut self, buffer: &[u8]) -> usize {
        let count = buffer.len().min(self.tx_available()).min(self.max_write);
        self.tx.extend_from_slice(&buffer[..count]);
        count
    }

    fn rx_available(&self) -> usize {
        self.rx.len()
    }

    fn tx_available(&self) -> usize {
        self.tx_capacity.saturating_sub(self.tx.len())
    }

    fn set_ready(&mut self, ready: bool) {
        self.ready.push(ready);
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Refused;

#[derive(Debug, Default)]
pub struct MockCan {
    pub rx: VecDeque<CanFrame>,
    pub tx: Vec<CanFrame>,
    pub tx_capacity: usize,
    pub mode: Option<BusMode>,
    pub bitrate: Option<u32>,
    pub refuse_config: bool,
    pub fault: bool,
    pub write_attempts: usize,
}

impl MockCan {
    pub fn new() -> Self {
        MockCan {
            tx_capacity: 64,
            ..Default::default()
        }
    }
}

impl CanTransport for MockCan {
    type Error = Refused;

    fn read(&mut self, frames: &mut [CanFrame]) -> usize {
        let count = frames.len().min(self.rx.len());
        for slot in frames.iter_mut().take(count) {
            *slot = self.rx.pop_front().unwrap();
        }
        count
    }

    fn write(&mut self, frame: &CanFrame) -> Result<(), Refused> {
        self.write_attempts += 1;
        if self.tx.len() < self.tx_capacity {
            self.tx.push(*frame);
            Ok(())
        } else {
            Err(Refused)
        }
    }

    fn rx_available(&self) -> usize {
        self.rx.len()
    }

    fn tx_available(&self) -> usize {
        self.tx_capacity.saturating_sub(self.tx.len())
    }

    fn set_mode(&mut self, mode: BusMode) -> Result<(), Refused> {
        if self.refuse_config {
            return Err(Refused);
        }
        self.mode = Some(mode);
        Ok(())
    }

    fn set_bitrate(&mut self, bitrate: u32) -> Result<(), Refused> {
        if self.refuse_config || bitrate == 0 {
            return Err(Refused);
        }
        self.bitrate = Some(bitrate);
        Ok(())
    }

    fn bitrate(&self) -> Option<u32> {
        self.bitrate
    }

    fn take_bus_fault(&mut self) -> bool {
        std::mem::take(&mut self.fault)
    }
}

/// Advances by `step` microseconds every time it is read.
#[derive(Debug)]
pub struct FakeTimer {
    pub now: Cell<u32>,
    pub step: u32,
}

impl FakeTimer {
    pub fn new(step: u32) -> Self {
        FakeTimer {
            now: Cell::new(0),
            step,
        }
    }
}

impl MonotonicTimer for FakeTimer {
    fn now(&self) -> u32 {
        let now = self.now.get();
        self.now.set(now.wrapping_add(self.step));
        now
    }
}

#[derive(Debug, Default)]
pub struct MockSystem {
    pub resets: Cell<usize>,
}

impl SystemControl for MockSystem {
    fn reset_to_bootloader(&self) {
        self.resets.set(self.resets.get() + 1);
    }
}

#[derive(Debug)]
pub struct MockEeprom {
    pub bytes: [u8; 64],
    pub fail: bool,
    pub writes: usize,
}

impl MockEeprom {
    pub fn blank() -> Self {
        MockEeprom {
            bytes: [0xFF; 64],
            fail: false,
            writes: 0,
        }
    }
}

impl Memory for MockEeprom {
    type Error = Refused;

    fn read(&mut self, address: u32, buffer: &mut [u8]) -> Result<(), Refused> {
        let start = address as usize;
        let source = self.bytes.get(start..start + buffer.len()).ok_or(Refused)?;
        buffer.copy_from_slice(source);
        Ok(())
    }

    fn write(&mut self, address: u32, buffer: &[u8]) -> Result<(), Refused> {
        if self.fail {
            return Err(Refused);
        }
        let start = address as usize;
        let target = self
            .bytes
            .get_mut(start..start + buffer.len())
            .ok_or(Refused)?;
        target.copy_from_slice(buffer);
        self.writes += 1;
        Ok(())
    }
}

/// Records every submitted item; refuses once `capacity` items are held.
#[derive(Debug)]
pub struct CountingQueue {
    items: RefCell<Vec<Work>>,
    capacity: usize,
}

impl CountingQueue {
    pub fn new(capacity: usize) -> Self {
        CountingQueue {
            items: RefCell::new(Vec::new()),
            capacity,
        }
    }

    pub fn submitted(&self) -> Vec<Work> {
        self.items.borrow().clone()
    }
}

impl WorkQueue for CountingQueue {
    fn submit(&self, work: Work) -> Result<(), Work> {
        let mut items = self.items.borrow_mut();
        if items.len() >= self.capacity {
            return Err(work);
        }
        items.push(work);
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct Recorder {
    pub events: Vec<(ChannelMode, ProxyEvent)>,
}

impl Recorder {
    pub fn kinds(&self) -> Vec<ProxyEvent> {
        self.events.iter().map(|(_, event)| *event).collect()
    }
}

impl ProxyObserver for Recorder {
    fn on_proxy_event(&mut self, mode: ChannelMode, event: ProxyEvent) {
        self.events.push((mode, event));
    }
}

/// Counts calls instead of driving hardware.
#[derive(Debug, Default)]
pub struct MockIndicator {
    pub increments: Cell<usize>,
    pub spins: Cell<usize>,
    pub relaxed: RefCell<Vec<bool>>,
    pub set: RefCell<Vec<u32>>,
}

impl Indicator for MockIndicator {
    fn increment(&self) {
        self.increments.set(self.increments.get() + 1);
    }

    fn relax(&self, phase: bool) {
        self.relaxed.borrow_mut().push(phase);
    }

    fn set(&self, value: u32) {
        self.set.borrow_mut().push(value);
    }

    fn spin(&self) {
        self.spins.set(self.spins.get() + 1);
    }
}

/// Output pin whose level is observable from outside the indicator.
#[derive(Debug, Clone, Default)]
pub struct MockPin {
    pub level: Rc<Cell<Option<bool>>>,
}

impl embedded_hal_02::digital::v2::OutputPin for MockPin {
    type Error = core::convert::Infallible;

    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.level.set(Some(false));
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.level.set(Some(true));
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct MockPwm {
    pub duty: Rc<Cell<u16>>,
    pub enabled: Rc<Cell<bool>>,
}

impl embedded_hal_02::PwmPin for MockPwm {
    type Duty = u16;

    fn disable(&mut self) {
        self.enabled.set(false);
    }

    fn enable(&mut self) {
        self.enabled.set(true);
    }

    fn get_duty(&self) -> u16 {
        self.duty.get()
    }

    fn get_max_duty(&self) -> u16 {
        1000
    }

    fn set_duty(&mut self, duty: u16) {
        self.duty.set(duty);
    }
}

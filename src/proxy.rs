//! The SLCAN engine: moves frames from the CAN transport to the serial transport and
//! executes command lines arriving from the serial transport.
//!
//! Both handlers run on the worker that drains the work queue, never in interrupt
//! context, so the line arena and the channel mode need no locking. Nothing here blocks
//! except the self-test burst and blocking-mode transmits, which spin on the monotonic
//! timer up to a deadline derived from the bus bitrate.

use crate::codec::{
    self, transmit_time_us, SERIALIZED_FRAME_MTU, SERIALIZED_QUEUE_SIZE, SERIAL_MTU,
};
use crate::command::{Command, Reply, TestGroup, TEST_GROUPS, TEST_GROUP_SIZE};
use crate::parser::LineAccumulator;
use crate::signal::{ProxySignals, WorkKind};
use crate::storage::{is_serial_number_valid, ParamStore};
use crate::transport::{BusMode, CanTransport, MonotonicTimer, SerialTransport, SystemControl};
use crate::version::BoardVersion;
use crate::CanFrame;
use log::*;

/// Operating mode of one SLCAN channel.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ChannelMode {
    #[default]
    Disabled,
    Active,
    Listener,
    Loopback,
}

impl ChannelMode {
    /// Controller mode backing this channel mode. A closed channel stays bus-passive.
    pub const fn bus_mode(self) -> BusMode {
        match self {
            ChannelMode::Active => BusMode::Active,
            ChannelMode::Loopback => BusMode::Loopback,
            ChannelMode::Listener | ChannelMode::Disabled => BusMode::Listener,
        }
    }
}

/// Notifications delivered to a [`ProxyObserver`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ProxyEvent {
    /// Mode changed, no traffic involved
    None,
    /// Frames were forwarded to the serial side
    Rx,
    /// A frame was queued on the bus
    Tx,
    BusFault,
    /// The CAN transmit queue refused a frame
    CanOverrun,
    /// A malformed frame line arrived
    SerialError,
    /// The serial side accepted less than was produced
    SerialOverrun,
}

impl ProxyEvent {
    pub const fn is_traffic(self) -> bool {
        matches!(self, ProxyEvent::Rx | ProxyEvent::Tx)
    }

    pub const fn is_error(self) -> bool {
        !matches!(self, ProxyEvent::None | ProxyEvent::Rx | ProxyEvent::Tx)
    }
}

/// Receives engine notifications. Called from the worker, never from an interrupt.
pub trait ProxyObserver {
    fn on_proxy_event(&mut self, mode: ChannelMode, event: ProxyEvent);
}

impl ProxyObserver for () {
    fn on_proxy_event(&mut self, _mode: ChannelMode, _event: ProxyEvent) {}
}

/// Collaborators and constants an engine is built with.
#[derive(Copy, Clone, Default)]
pub struct ProxyConfig<'a> {
    pub version: BoardVersion,
    /// Needed by the self-test and blocking transmits
    pub chrono: Option<&'a dyn MonotonicTimer>,
    /// Serial number storage, `N` reports `FFFF` without it
    pub storage: Option<&'a dyn ParamStore>,
    pub system: Option<&'a dyn SystemControl>,
}

impl core::fmt::Debug for ProxyConfig<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ProxyConfig")
            .field("version", &self.version)
            .field("chrono", &self.chrono.is_some())
            .field("storage", &self.storage.is_some())
            .field("system", &self.system.is_some())
            .finish()
    }
}

/// One SLCAN channel bound to a CAN transport and a serial transport.
pub struct ProxyEngine<'a, C, S> {
    can: C,
    serial: S,
    config: ProxyConfig<'a>,
    signals: &'a ProxySignals,
    mode: ChannelMode,
    line: LineAccumulator,
    blocking: bool,
}

impl<'a, C, S> ProxyEngine<'a, C, S>
where
    C: CanTransport,
    S: SerialTransport,
{
    /// Takes already opened transports. The channel starts disabled.
    pub fn new(can: C, serial: S, signals: &'a ProxySignals, config: ProxyConfig<'a>) -> Self {
        ProxyEngine {
            can,
            serial,
            config,
            signals,
            mode: ChannelMode::Disabled,
            line: LineAccumulator::new(),
            blocking: false,
        }
    }

    pub fn mode(&self) -> ChannelMode {
        self.mode
    }

    pub fn is_blocking(&self) -> bool {
        self.blocking
    }

    pub fn signals(&self) -> &'a ProxySignals {
        self.signals
    }

    pub fn can(&self) -> &C {
        &self.can
    }

    pub fn can_mut(&mut self) -> &mut C {
        &mut self.can
    }

    pub fn serial(&self) -> &S {
        &self.serial
    }

    pub fn serial_mut(&mut self) -> &mut S {
        &mut self.serial
    }

    /// Give the transports back.
    pub fn release(self) -> (C, S) {
        (self.can, self.serial)
    }

    /// Run the handler a dequeued work item asks for.
    pub fn handle(&mut self, kind: WorkKind, observer: &mut dyn ProxyObserver) {
        match kind {
            WorkKind::Can => self.handle_can_event(observer),
            WorkKind::Serial => self.handle_serial_event(observer),
        }
    }

    /// Forward received frames, then take more commands if the bus has room for them.
    pub fn handle_can_event(&mut self, observer: &mut dyn ProxyObserver) {
        self.signals.acknowledge(WorkKind::Can);

        if self.can.take_bus_fault() {
            warn!("bus fault");
            observer.on_proxy_event(self.mode, ProxyEvent::BusFault);
        }

        if self.can.rx_available() > 0 {
            self.can_to_serial(observer);
        }

        if self.can.tx_available() >= SERIALIZED_QUEUE_SIZE {
            self.serial.set_ready(true);
            self.read_serial_input(observer);
        }
    }

    /// Execute pending command lines, then use the freed transmit space for frames.
    pub fn handle_serial_event(&mut self, observer: &mut dyn ProxyObserver) {
        self.signals.acknowledge(WorkKind::Serial);

        if self.serial.rx_available() > 0 {
            self.read_serial_input(observer);
        }

        if self.serial.tx_available() > 0 {
            self.can_to_serial(observer);
        }
    }

    fn can_to_serial(&mut self, observer: &mut dyn ProxyObserver) {
        let capacity =
            (self.serial.tx_available() / SERIALIZED_FRAME_MTU).min(SERIALIZED_QUEUE_SIZE);
        if capacity == 0 {
            return;
        }

        let mut frames = [CanFrame::empty(); SERIALIZED_QUEUE_SIZE];
        let count = self.can.read(&mut frames[..capacity]).min(capacity);
        if count > 0 {
            self.serialize_frames(&frames[..count], observer);
        }
    }

    fn serialize_frames(&mut self, frames: &[CanFrame], observer: &mut dyn ProxyObserver) {
        let mut response = [0u8; SERIALIZED_FRAME_MTU * SERIALIZED_QUEUE_SIZE];
        let mut length = 0;

        for frame in frames {
            trace!("rx {}", frame);
            match codec::pack_frame(frame, &mut response[length..]) {
                Ok(packed) => length += packed,
                Err(error) => {
                    warn!("cannot pack {}: {}", frame, error);
                    break;
                }
            }
        }

        let written = self.serial.write(&response[..length]);
        let event = if written == length {
            ProxyEvent::Rx
        } else {
            warn!("serial overrun, {} of {} bytes written", written, length);
            ProxyEvent::SerialOverrun
        };
        observer.on_proxy_event(self.mode, event);
    }

    fn read_serial_input(&mut self, observer: &mut dyn ProxyObserver) {
        loop {
            let ready = self.can.tx_available() >= SERIALIZED_QUEUE_SIZE;
            self.serial.set_ready(ready);

            let mut chunk = [0u8; SERIAL_MTU];
            let count = self.serial.read(&mut chunk).min(SERIAL_MTU);
            if count == 0 {
                break;
            }

            for &byte in &chunk[..count] {
                if let Some(line) = self.line.feed(byte) {
                    let reply = self.process_command(&line, observer);
                    self.send_reply(reply, observer);
                }
            }
        }
    }

    fn send_reply(&mut self, reply: Reply, observer: &mut dyn ProxyObserver) {
        let response = reply.encode();
        if response.is_empty() {
            return;
        }
        let written = self.serial.write(&response);
        if written != response.len() {
            warn!("reply {:?} truncated to {} bytes", reply, written);
            observer.on_proxy_event(self.mode, ProxyEvent::SerialOverrun);
        }
    }

    /// Execute one command line, terminator stripped, and produce its reply.
    pub fn process_command(&mut self, line: &[u8], observer: &mut dyn ProxyObserver) -> Reply {
        let command = match Command::decode(line) {
            Ok(Some(command)) => command,
            Ok(None) => return Reply::Silent,
            Err(error) => {
                debug!("rejected line {:?}: {}", line, error);
                if Command::is_frame(line) {
                    observer.on_proxy_event(self.mode, ProxyEvent::SerialError);
                }
                return Reply::Bell;
            }
        };
        debug!("command {:?}", command);

        match command {
            Command::SetBitrate(rate) => Reply::from_success(self.set_bitrate(rate)),
            Command::Transmit(frame) => self.transmit(&frame, observer),
            Command::SetMode(mode) => self.change_mode(mode, observer),
            Command::SelfTest(group) => Reply::from_success(self.send_test_messages(group)),
            Command::ReadHardwareVersion => Reply::Number(b'V', self.config.version.hardware()),
            Command::ReadSoftwareVersion => Reply::Number(b'v', self.config.version.software()),
            Command::ReadSerialNumber => {
                let serial = self
                    .config
                    .storage
                    .and_then(|storage| storage.load())
                    .map_or(0xFFFF, |serial| serial as u16);
                Reply::Number(b'N', serial)
            }
            Command::WriteSerialNumber(value) => {
                Reply::from_success(self.write_serial_number(value))
            }
            Command::EnterBootloader => {
                if let Some(system) = self.config.system {
                    info!("restarting into bootloader");
                    system.reset_to_bootloader();
                }
                Reply::Bell
            }
            Command::ReadStatus => Reply::Status,
            Command::SetFilterMode => Reply::Ack,
            Command::SetTimestamp => Reply::Silent,
            Command::SetBlocking(blocking) => {
                self.blocking = blocking;
                Reply::Ack
            }
        }
    }

    fn set_bitrate(&mut self, rate: u32) -> bool {
        match self.can.set_bitrate(rate) {
            Ok(()) => {
                debug!("bitrate {}", rate);
                true
            }
            Err(error) => {
                warn!("bitrate {} refused: {:?}", rate, error);
                false
            }
        }
    }

    fn change_mode(&mut self, mode: ChannelMode, observer: &mut dyn ProxyObserver) -> Reply {
        if let Err(error) = self.can.set_mode(mode.bus_mode()) {
            warn!("mode {:?} refused: {:?}", mode, error);
            return Reply::Bell;
        }
        self.mode = mode;
        observer.on_proxy_event(mode, ProxyEvent::None);
        Reply::Ack
    }

    fn write_serial_number(&mut self, value: u16) -> bool {
        let storage = match self.config.storage {
            Some(storage) => storage,
            None => return false,
        };
        if storage.load().is_some() || !is_serial_number_valid(u64::from(value)) {
            return false;
        }
        match storage.save(u64::from(value)) {
            Ok(()) => true,
            Err(error) => {
                warn!("serial number not saved: {}", error);
                false
            }
        }
    }

    fn transmit(&mut self, frame: &CanFrame, observer: &mut dyn ProxyObserver) -> Reply {
        trace!("tx {}", frame);
        let sent = if self.blocking {
            self.write_blocking(frame)
        } else {
            self.can.write(frame).is_ok()
        };

        if sent {
            observer.on_proxy_event(self.mode, ProxyEvent::Tx);
            Reply::Transmitted
        } else {
            observer.on_proxy_event(self.mode, ProxyEvent::CanOverrun);
            Reply::Bell
        }
    }

    /// Retry a refused frame for as long as a full transmit queue of such frames takes to
    /// drain. Without a timer or a bitrate only one attempt is made.
    fn write_blocking(&mut self, frame: &CanFrame) -> bool {
        let (chrono, rate) = match (self.config.chrono, self.can.bitrate()) {
            (Some(chrono), Some(rate)) if rate > 0 => (chrono, rate),
            _ => return self.can.write(frame).is_ok(),
        };
        let timeout = transmit_time_us(
            frame.flags(),
            frame.dlc(),
            rate,
            SERIALIZED_QUEUE_SIZE as u32,
        );
        let start = chrono.now();
        self.write_until(chrono, frame, start, timeout)
    }

    fn write_until(
        &mut self,
        chrono: &dyn MonotonicTimer,
        frame: &CanFrame,
        start: u32,
        timeout: u32,
    ) -> bool {
        while self.can.write(frame).is_err() {
            if chrono.now().wrapping_sub(start) > timeout {
                return false;
            }
        }
        true
    }

    fn send_message_group(&mut self, group: TestGroup, count: usize) -> bool {
        let chrono = match self.config.chrono {
            Some(chrono) => chrono,
            None => return false,
        };
        let rate = match self.can.bitrate() {
            Some(rate) if rate > 0 => rate,
            _ => return false,
        };

        const PAYLOAD: [u8; 8] = [1, 2, 3, 4, 5, 6, 7, 8];
        let payload = match PAYLOAD.get(..group.length) {
            Some(payload) => payload,
            None => {
                warn!("self-test group {:?} is longer than a frame", group);
                return false;
            }
        };

        let timeout = transmit_time_us(group.flags, group.length, rate, count as u32);
        let start = chrono.now();

        for index in 0..count {
            let frame = match CanFrame::from_parts(index as u32, group.flags, payload) {
                Ok(frame) => frame,
                Err(error) => {
                    warn!("self-test frame {}: {}", index, error);
                    return false;
                }
            };
            if !self.write_until(chrono, &frame, start, timeout) {
                warn!("self-test group {:?} timed out after {} frames", group, index);
                return false;
            }
        }

        true
    }

    /// Burst [`TEST_GROUP_SIZE`] frames of one shape, or of every shape in turn.
    pub fn send_test_messages(&mut self, group: Option<TestGroup>) -> bool {
        match group {
            Some(group) => self.send_message_group(group, TEST_GROUP_SIZE),
            None => TEST_GROUPS
                .iter()
                .all(|group| self.send_message_group(*group, TEST_GROUP_SIZE)),
        }
    }
}

impl<C, S> core::fmt::Debug for ProxyEngine<'_, C, S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ProxyEngine")
            .field("port", &self.signals.port())
            .field("mode", &self.mode)
            .field("blocking", &self.blocking)
            .field("line", &self.line)
            .finish()
    }
}

//! Ports tie an engine to its indicators; a hub owns a fixed set of ports.

use crate::indicator::Indicator;
use crate::proxy::{ChannelMode, ProxyEngine, ProxyEvent, ProxyObserver};
use crate::signal::{Work, WorkKind};
use crate::transport::{CanTransport, SerialTransport};
use log::*;

/// Ticks between two blink phase changes.
pub const DEFAULT_BLINK_PERIOD: u32 = 25;

/// Mode shown by the indicators and the mode last reported by the engine.
///
/// `current` only catches up with `next` on a blink, so a mode change never cuts a
/// blink short.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ModePair {
    pub current: ChannelMode,
    pub next: ChannelMode,
}

/// Indicator handles and mode bookkeeping of one port.
#[derive(Copy, Clone, Default)]
pub struct PortState<'a> {
    pub error: Option<&'a dyn Indicator>,
    pub status: Option<&'a dyn Indicator>,
    pub mode: ModePair,
}

impl core::fmt::Debug for PortState<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PortState")
            .field("error", &self.error.is_some())
            .field("status", &self.status.is_some())
            .field("mode", &self.mode)
            .finish()
    }
}

impl ProxyObserver for PortState<'_> {
    fn on_proxy_event(&mut self, mode: ChannelMode, event: ProxyEvent) {
        if event.is_traffic() {
            if let Some(status) = self.status {
                status.increment();
            }
        } else if event.is_error() {
            if let Some(error) = self.error {
                error.increment();
            }
        }

        if self.mode.next != mode {
            if let Some(status) = self.status {
                if mode != ChannelMode::Disabled {
                    // one half cycle flags the change
                    status.set(1);
                }
            }
            debug!("mode {:?} requested", mode);
            self.mode.next = mode;
        }
    }
}

/// One SLCAN channel with its indicators.
pub struct ProxyPort<'a, C, S> {
    engine: ProxyEngine<'a, C, S>,
    state: PortState<'a>,
}

impl<'a, C, S> ProxyPort<'a, C, S>
where
    C: CanTransport,
    S: SerialTransport,
{
    pub fn new(
        engine: ProxyEngine<'a, C, S>,
        error: Option<&'a dyn Indicator>,
        status: Option<&'a dyn Indicator>,
    ) -> Self {
        ProxyPort {
            engine,
            state: PortState {
                error,
                status,
                mode: ModePair::default(),
            },
        }
    }

    pub fn handle(&mut self, kind: WorkKind) {
        self.engine.handle(kind, &mut self.state);
    }

    /// Mode the indicators currently follow.
    pub fn current_mode(&self) -> ChannelMode {
        self.state.mode.current
    }

    /// Mode most recently applied by the engine.
    pub fn requested_mode(&self) -> ChannelMode {
        self.state.mode.next
    }

    pub fn modes(&self) -> ModePair {
        self.state.mode
    }

    /// Let the indicators follow the requested mode. Returns true on a change.
    pub fn sync_mode(&mut self) -> bool {
        let mode = &mut self.state.mode;
        if mode.current == mode.next {
            return false;
        }
        mode.current = mode.next;
        true
    }

    pub fn status(&self) -> Option<&'a dyn Indicator> {
        self.state.status
    }

    pub fn error(&self) -> Option<&'a dyn Indicator> {
        self.state.error
    }

    pub fn engine(&self) -> &ProxyEngine<'a, C, S> {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut ProxyEngine<'a, C, S> {
        &mut self.engine
    }

    pub fn release(self) -> ProxyEngine<'a, C, S> {
        self.engine
    }
}

/// Fixed set of ports created at startup, plus the blink clock driving their indicators.
pub struct ProxyHub<'a, C, S, const N: usize> {
    ports: [ProxyPort<'a, C, S>; N],
    blink_period: u32,
    iteration: u32,
    phase: bool,
}

impl<'a, C, S, const N: usize> ProxyHub<'a, C, S, N>
where
    C: CanTransport,
    S: SerialTransport,
{
    pub fn new(ports: [ProxyPort<'a, C, S>; N]) -> Self {
        ProxyHub {
            ports,
            blink_period: DEFAULT_BLINK_PERIOD,
            iteration: 0,
            phase: true,
        }
    }

    /// Ticks per blink phase; a phase lasts `period + 1` ticks.
    pub fn with_blink_period(mut self, period: u32) -> Self {
        self.blink_period = period;
        self
    }

    pub const fn len(&self) -> usize {
        N
    }

    pub const fn is_empty(&self) -> bool {
        N == 0
    }

    pub fn phase(&self) -> bool {
        self.phase
    }

    pub fn port(&self, index: usize) -> Option<&ProxyPort<'a, C, S>> {
        self.ports.get(index)
    }

    pub fn port_mut(&mut self, index: usize) -> Option<&mut ProxyPort<'a, C, S>> {
        self.ports.get_mut(index)
    }

    pub fn ports(&self) -> &[ProxyPort<'a, C, S>] {
        &self.ports
    }

    /// Run one dequeued work item. Returns false when it names no port of this hub.
    pub fn run(&mut self, work: Work) -> bool {
        match self.ports.get_mut(work.port) {
            Some(port) => {
                port.handle(work.kind);
                true
            }
            None => {
                warn!("work for unknown port {}", work.port);
                false
            }
        }
    }

    /// Periodic indicator update.
    ///
    /// Every `blink_period + 1` ticks the blink phase flips; when it flips to set, ports
    /// adopt their requested mode. Disabled ports show the phase, the others play their
    /// pending activity blinks. `error` is the indicator shared by all ports.
    ///
    /// Status indicators of disabled ports relax once per phase flip, so a
    /// [`PwmIndicator`](crate::indicator::PwmIndicator) breath lasts
    /// `(blink_period + 1) * 100 / stride` ticks. With the default period and stride that is
    /// 2600 ticks; pick the stride to suit the tick rate.
    pub fn tick(&mut self, error: Option<&dyn Indicator>) {
        let blink = self.iteration == 0;
        if blink {
            self.iteration = self.blink_period;
            self.phase = !self.phase;
        } else {
            self.iteration -= 1;
        }

        for port in self.ports.iter_mut() {
            if blink && self.phase && port.sync_mode() {
                trace!("port now {:?}", port.current_mode());
            }

            if let Some(status) = port.status() {
                if port.current_mode() == ChannelMode::Disabled {
                    if blink {
                        status.relax(self.phase);
                    }
                } else {
                    status.spin();
                }
            }
        }

        if let Some(error) = error {
            error.spin();
        }
    }
}

impl<C, S> core::fmt::Debug for ProxyPort<'_, C, S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ProxyPort")
            .field("engine", &self.engine)
            .field("state", &self.state)
            .finish()
    }
}

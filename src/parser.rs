use crate::codec::SERIALIZED_FRAME_MTU;
use heapless::Vec;
use log::*;

/// Size of the line arena. One slot is never filled, so the longest line kept is
/// `LINE_CAPACITY - 1` bytes: an extended frame with eight data bytes.
pub const LINE_CAPACITY: usize = SERIALIZED_FRAME_MTU;

/// A complete line, terminator stripped.
pub type Line = Vec<u8, LINE_CAPACITY>;

// Define the machine states
machine!(
    #[derive(Clone, Debug, PartialEq)]
    enum LineState {
        Collecting { position: usize },
        Discarding,
    }
);

/// A byte other than a line terminator
#[derive(Clone, Debug, PartialEq)]
pub struct Append;

/// `\r` or `\n`
#[derive(Clone, Debug, PartialEq)]
pub struct Terminate;

// the allowed state, transition pairs
transitions!(LineState,
             [
                 (Collecting, Append) => [Collecting, Discarding],
                 (Discarding, Append) => Discarding,
                 (Collecting, Terminate) => Collecting,
                 (Discarding, Terminate) => Collecting
             ]
);

methods!(LineState,
         [
             Collecting => get position: usize
         ]
);

/// Keep appending while a slot is left, otherwise drop the rest of the line
impl Collecting {
    pub fn on_append(self, _: Append) -> LineState {
        if self.position < LINE_CAPACITY - 1 {
            LineState::collecting(self.position + 1)
        } else {
            LineState::discarding()
        }
    }

    pub fn on_terminate(self, _: Terminate) -> Collecting {
        Collecting { position: 0 }
    }
}

/// Overflowed line, swallow everything up to the terminator
impl Discarding {
    pub fn on_append(self, _: Append) -> Discarding {
        Discarding {}
    }

    pub fn on_terminate(self, _: Terminate) -> Collecting {
        Collecting { position: 0 }
    }
}

/// Splits a serial byte stream into command lines.
///
/// Lines that outgrow the arena are dropped whole: the overflowing tail is discarded up to
/// the next terminator and nothing of the line is ever returned.
#[derive(Debug)]
pub struct LineAccumulator {
    state: LineState,
    arena: [u8; LINE_CAPACITY],
}

impl LineAccumulator {
    pub const fn new() -> Self {
        LineAccumulator {
            state: LineState::Collecting(Collecting { position: 0 }),
            arena: [0; LINE_CAPACITY],
        }
    }

    /// Forget any partial line.
    pub fn reset(&mut self) {
        self.state = LineState::collecting(0);
    }

    /// Bytes held for the line in progress.
    pub fn position(&self) -> usize {
        self.state.position().copied().unwrap_or(0)
    }

    /// True while the rest of an overflowed line is being thrown away.
    pub fn is_skipping(&self) -> bool {
        self.state.position().is_none()
    }

    /// Feed one byte.
    ///
    /// Returns the finished line when `byte` terminates one that fit the arena. Empty lines
    /// are returned too; only overflowed lines are swallowed.
    pub fn feed(&mut self, byte: u8) -> Option<Line> {
        if byte == b'\r' || byte == b'\n' {
            let finished = self.state.position().copied();
            self.state = self.state.clone().on_terminate(Terminate);
            match finished {
                Some(len) => Vec::from_slice(&self.arena[..len]).ok(),
                None => {
                    warn!("dropped line longer than {} bytes", LINE_CAPACITY - 1);
                    None
                }
            }
        } else {
            if let Some(&position) = self.state.position() {
                if position < LINE_CAPACITY - 1 {
                    self.arena[position] = byte;
                }
            }
            self.state = self.state.clone().on_append(Append);
            None
        }
    }
}

impl Default for LineAccumulator {
    fn default() -> Self {
        LineAccumulator::new()
    }
}

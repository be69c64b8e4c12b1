use super::*;
use embedded_hal_02::can as hal;

impl hal::Error for SlcanError {
    fn kind(&self) -> hal::ErrorKind {
        hal::ErrorKind::Other
    }
}

fn from_hal_id(id: hal::Id) -> Id {
    match id {
        // note(unsafe) the Id has to be ok, unless it was itself created unsafely
        hal::Id::Standard(si) => Id::Standard(unsafe { StandardId::new_unchecked(si.as_raw()) }),
        // note(unsafe) the Id has to be ok, unless it was itself created unsafely
        hal::Id::Extended(ei) => Id::Extended(unsafe { ExtendedId::new_unchecked(ei.as_raw()) }),
    }
}

fn to_hal_id(id: Id) -> hal::Id {
    match id {
        // note(unsafe) the Id has to be ok as it was checked when creating the frame
        Id::Standard(si) => hal::Id::Standard(unsafe { hal::StandardId::new_unchecked(si.as_raw()) }),
        // note(unsafe) the Id has to be ok as it was checked when creating the frame
        Id::Extended(ei) => hal::Id::Extended(unsafe { hal::ExtendedId::new_unchecked(ei.as_raw()) }),
    }
}

impl hal::Frame for CanFrame {
    /// Creates a new frame.
    ///
    /// This will return `None` if the data slice is too long.
    fn new(id: impl Into<hal::Id>, data: &[u8]) -> Option<Self> {
        CanFrame::new_frame(from_hal_id(id.into()), data).ok()
    }

    /// Creates a new remote frame (RTR bit set).
    ///
    /// This will return `None` if the data length code (DLC) is not valid.
    fn new_remote(id: impl Into<hal::Id>, dlc: usize) -> Option<Self> {
        CanFrame::new_remote_frame(from_hal_id(id.into()), dlc).ok()
    }

    fn is_extended(&self) -> bool {
        CanFrame::is_extended(self)
    }

    fn is_remote_frame(&self) -> bool {
        CanFrame::is_remote_frame(self)
    }

    fn id(&self) -> hal::Id {
        to_hal_id(CanFrame::id(self))
    }

    fn dlc(&self) -> usize {
        CanFrame::dlc(self)
    }

    /// Empty for remote frames.
    fn data(&self) -> &[u8] {
        CanFrame::data(self)
    }
}

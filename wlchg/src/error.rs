use core::fmt::{self, Display, Formatter};

use drivers::bq2597x::Bq2597xError;
use drivers::op20a::Op20aError;
use drivers::p9415::P9415Error;

/// Errors surfaced by the policy's collaborators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Chip absent, unpowered or the dock is gone
    NoDevice,
    /// Value not updated since the last read
    NoData,
    /// Argument or property not supported
    Invalid,
    /// Single-slot mailbox still holds an unconsumed entry
    Busy,
    /// Bus transaction failed on a present chip
    Bus,
}

pub type Result<T> = core::result::Result<T, Error>;

impl Display for Error {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Error::NoDevice => write!(f, "no device"),
            Error::NoData => write!(f, "no data"),
            Error::Invalid => write!(f, "invalid"),
            Error::Busy => write!(f, "busy"),
            Error::Bus => write!(f, "bus error"),
        }
    }
}

impl From<P9415Error> for Error {
    fn from(e: P9415Error) -> Self {
        match e {
            P9415Error::InvalidArgument => Error::Invalid,
            // the receiver is only powered while docked
            P9415Error::I2CError => Error::NoDevice,
        }
    }
}

impl From<Op20aError> for Error {
    fn from(e: Op20aError) -> Self {
        match e {
            Op20aError::UnknownDevice(_) => Error::NoDevice,
            Op20aError::I2CError => Error::Bus,
        }
    }
}

impl From<Bq2597xError> for Error {
    fn from(e: Bq2597xError) -> Self {
        match e {
            Bq2597xError::Init => Error::NoDevice,
            Bq2597xError::I2CError => Error::Bus,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::format;

    #[test]
    fn test_error_display() {
        assert_eq!(format!("{}", Error::NoDevice), "no device");
        assert_eq!(format!("{}", Error::Busy), "busy");
    }

    #[test]
    fn test_driver_error_mapping() {
        assert_eq!(Error::from(P9415Error::I2CError), Error::NoDevice);
        assert_eq!(Error::from(Op20aError::I2CError), Error::Bus);
        assert_eq!(Error::from(Bq2597xError::Init), Error::NoDevice);
    }
}

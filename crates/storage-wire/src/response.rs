use crate::error::WireError;

/// First byte of every response frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ResponseCode {
    Ok = 0,
    NotRecognizedOp = 1,
    TooLongPath = 2,
    TooLongContent = 3,
    InvalidPath = 4,
    FileNotExists = 5,
    FileAlreadyExists = 6,
    FileAlreadyOpen = 7,
    FileAlreadyLocked = 8,
    OperationNotPermitted = 9,
    TemporarilyUnavailable = 10,
    CouldNotEvict = 11,
}

impl ResponseCode {
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    pub const fn is_ok(self) -> bool {
        matches!(self, Self::Ok)
    }
}

impl TryFrom<u8> for ResponseCode {
    type Error = WireError;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        match byte {
            0 => Ok(Self::Ok),
            1 => Ok(Self::NotRecognizedOp),
            2 => Ok(Self::TooLongPath),
            3 => Ok(Self::TooLongContent),
            4 => Ok(Self::InvalidPath),
            5 => Ok(Self::FileNotExists),
            6 => Ok(Self::FileAlreadyExists),
            7 => Ok(Self::FileAlreadyOpen),
            8 => Ok(Self::FileAlreadyLocked),
            9 => Ok(Self::OperationNotPermitted),
            10 => Ok(Self::TemporarilyUnavailable),
            11 => Ok(Self::CouldNotEvict),
            other => Err(WireError::UnrecognizedResponseCode(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_all_valid_values() {
        for byte in 0u8..=11 {
            let code = ResponseCode::try_from(byte).expect("valid response code");
            assert_eq!(code.as_u8(), byte);
        }
    }

    #[test]
    fn only_ok_reports_is_ok() {
        assert!(ResponseCode::Ok.is_ok());
        assert!(!ResponseCode::FileNotExists.is_ok());
    }

    #[test]
    fn rejects_out_of_range_values() {
        assert!(matches!(ResponseCode::try_from(12), Err(WireError::UnrecognizedResponseCode(12))));
    }
}

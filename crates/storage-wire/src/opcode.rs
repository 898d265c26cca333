use crate::error::WireError;

/// First byte of every request frame.
///
/// Numeric values match the original protocol's `request_code_t` so that a
/// capture of the wire traffic reads the same way regardless of which side
/// produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    OpenNoFlags = 0,
    OpenCreate = 1,
    OpenLock = 2,
    OpenCreateLock = 3,
    Write = 4,
    Append = 5,
    Read = 6,
    ReadMany = 7,
    Lock = 8,
    Unlock = 9,
    Remove = 10,
    Close = 11,
}

impl Opcode {
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Whether this open variant should create the file if it does not exist.
    pub const fn opens_with_create(self) -> bool {
        matches!(self, Self::OpenCreate | Self::OpenCreateLock)
    }

    /// Whether this open variant should acquire the lock as part of opening.
    pub const fn opens_with_lock(self) -> bool {
        matches!(self, Self::OpenLock | Self::OpenCreateLock)
    }
}

impl TryFrom<u8> for Opcode {
    type Error = WireError;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        match byte {
            0 => Ok(Self::OpenNoFlags),
            1 => Ok(Self::OpenCreate),
            2 => Ok(Self::OpenLock),
            3 => Ok(Self::OpenCreateLock),
            4 => Ok(Self::Write),
            5 => Ok(Self::Append),
            6 => Ok(Self::Read),
            7 => Ok(Self::ReadMany),
            8 => Ok(Self::Lock),
            9 => Ok(Self::Unlock),
            10 => Ok(Self::Remove),
            11 => Ok(Self::Close),
            other => Err(WireError::UnrecognizedOpcode(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_all_valid_values() {
        for byte in 0u8..=11 {
            let op = Opcode::try_from(byte).expect("valid opcode");
            assert_eq!(op.as_u8(), byte);
        }
    }

    #[test]
    fn rejects_out_of_range_values() {
        assert!(matches!(Opcode::try_from(12), Err(WireError::UnrecognizedOpcode(12))));
        assert!(matches!(Opcode::try_from(255), Err(WireError::UnrecognizedOpcode(255))));
    }

    #[test]
    fn create_and_lock_flags() {
        assert!(!Opcode::OpenNoFlags.opens_with_create());
        assert!(!Opcode::OpenNoFlags.opens_with_lock());
        assert!(Opcode::OpenCreate.opens_with_create());
        assert!(!Opcode::OpenCreate.opens_with_lock());
        assert!(!Opcode::OpenLock.opens_with_create());
        assert!(Opcode::OpenLock.opens_with_lock());
        assert!(Opcode::OpenCreateLock.opens_with_create());
        assert!(Opcode::OpenCreateLock.opens_with_lock());
    }
}

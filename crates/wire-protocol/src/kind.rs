use crate::error::CodecError;

/// Discriminates the ~7 wire operations described in the external interface table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    Ping = 0,
    MetaGet = 1,
    DataCreate = 2,
    DataDelete = 3,
    DataRead = 4,
    DataWrite = 5,
    DataStatus = 6,
}

impl MessageKind {
    pub(crate) fn to_wire(self) -> u8 {
        self as u8
    }

    pub(crate) fn from_wire(byte: u8) -> Result<Self, CodecError> {
        match byte {
            0 => Ok(Self::Ping),
            1 => Ok(Self::MetaGet),
            2 => Ok(Self::DataCreate),
            3 => Ok(Self::DataDelete),
            4 => Ok(Self::DataRead),
            5 => Ok(Self::DataWrite),
            6 => Ok(Self::DataStatus),
            other => Err(CodecError::UnknownKind(other)),
        }
    }
}

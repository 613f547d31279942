use thiserror::Error;

/// Errors raised while encoding or decoding the canonical format.
#[derive(Debug, Error)]
pub enum BencodeError {
    #[error("unexpected end of input at byte {0}")]
    UnexpectedEof(usize),

    #[error("malformed integer: {0}")]
    MalformedInteger(String),

    #[error("malformed string length at byte {0}")]
    MalformedLength(usize),

    #[error("unexpected byte {byte:#04x} at offset {at}")]
    UnexpectedByte { byte: u8, at: usize },

    #[error("dictionary key is not a byte string")]
    NonStringKey,

    #[error("nesting deeper than {0} levels")]
    NestingTooDeep(usize),

    #[error("trailing data after value")]
    TrailingData,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

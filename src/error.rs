use thiserror::Error;

/// Engine-level errors. Each variant's `Display` is exactly the RESP error
/// line sent to the client, including its prefix.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
    WrongType,

    #[error("ERR value is not an integer or out of range")]
    NotInteger,

    #[error("ERR value is not a valid float")]
    NotFloat,

    #[error("ERR increment or decrement would overflow")]
    IntegerOverflow,

    #[error("ERR increment would produce NaN or Infinity")]
    FloatNanOrInfinity,

    #[error("ERR syntax error")]
    Syntax,

    #[error("ERR no such key")]
    NoSuchKey,

    #[error("ERR index out of range")]
    IndexOutOfRange,

    #[error("ERR value is out of range, must be positive")]
    NegativeCount,

    #[error("ERR offset is out of range")]
    OffsetOutOfRange,

    #[error("ERR bit offset is not an integer or out of range")]
    BitOffsetNotInteger,

    #[error("ERR bit is not an integer or out of range")]
    BitNotInteger,

    #[error("ERR min or max is not a float")]
    ScoreRangeItem,

    #[error("ERR min or max not valid string range item")]
    LexRangeItem,

    #[error("ERR timeout is not a float or out of range")]
    TimeoutNotFloat,

    #[error("ERR timeout is negative")]
    TimeoutNegative,

    #[error("ERR invalid expire time in '{0}' command")]
    InvalidExpireTime(String),

    #[error("ERR string exceeds maximum allowed size (proto-max-bulk-len)")]
    StringTooLong,

    #[error("ERR invalid cursor")]
    InvalidCursor,

    #[error("ERR DB index is out of range")]
    DbIndexOutOfRange,

    #[error("ERR source and destination objects are the same")]
    SameObject,

    #[error("BUSYGROUP Consumer Group name already exists")]
    BusyGroup,

    #[error("NOGROUP No such consumer group '{group}' for key name '{key}'")]
    NoGroup { group: String, key: String },

    #[error("ERR The ID specified in XADD is equal or smaller than the target stream top item")]
    StreamIdTooSmall,

    #[error("ERR The ID specified in XSETID is smaller than the target stream top item")]
    XsetidTooSmall,

    #[error("ERR Invalid stream ID specified as stream command argument")]
    InvalidStreamId,

    #[error("WRONGTYPE Key is not a valid HyperLogLog string value.")]
    InvalidHll,

    #[error("NOSCRIPT No matching script. Please use EVAL.")]
    NoScript,

    #[error("NOAUTH Authentication required.")]
    NoAuth,

    #[error("WRONGPASS invalid username-password pair or user is disabled.")]
    WrongPass,

    #[error("EXECABORT Transaction discarded because of previous errors.")]
    ExecAbort,

    #[error("ERR {0}")]
    Other(String),

    /// Message already carries its error-code prefix.
    #[error("{0}")]
    Raw(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    pub fn other(msg: impl Into<String>) -> Self {
        EngineError::Other(msg.into())
    }

    pub fn raw(msg: impl Into<String>) -> Self {
        EngineError::Raw(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_messages_carry_prefix() {
        assert_eq!(
            EngineError::WrongType.to_string(),
            "WRONGTYPE Operation against a key holding the wrong kind of value"
        );
        assert_eq!(
            EngineError::NotInteger.to_string(),
            "ERR value is not an integer or out of range"
        );
        assert_eq!(
            EngineError::NoGroup {
                group: "g".into(),
                key: "s".into()
            }
            .to_string(),
            "NOGROUP No such consumer group 'g' for key name 's'"
        );
        assert_eq!(
            EngineError::InvalidExpireTime("set".into()).to_string(),
            "ERR invalid expire time in 'set' command"
        );
    }
}

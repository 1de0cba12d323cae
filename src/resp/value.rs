use crate::error::EngineError;
use crate::num::format_f64;

/// A reply frame. Handlers build protocol-agnostic values; the encoder
/// downgrades RESP3-only shapes (maps, sets, doubles, pushes) to their RESP2
/// spellings when the connection negotiated the older protocol.
#[derive(Debug, Clone, PartialEq)]
pub enum RespValue {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(Option<Vec<u8>>),
    Array(Option<Vec<RespValue>>),
    Map(Vec<(RespValue, RespValue)>),
    Set(Vec<RespValue>),
    Double(f64),
    Boolean(bool),
    BigNumber(String),
    Verbatim(String),
    Push(Vec<RespValue>),
    /// Several frames written back to back (e.g. `SUBSCRIBE a b` confirms
    /// each channel with its own frame). Internal to the server.
    Seq(Vec<RespValue>),
}

impl RespValue {
    pub fn ok() -> Self {
        RespValue::Simple("OK".to_string())
    }

    pub fn pong() -> Self {
        RespValue::Simple("PONG".to_string())
    }

    pub fn null() -> Self {
        RespValue::Bulk(None)
    }

    pub fn null_array() -> Self {
        RespValue::Array(None)
    }

    pub fn bulk(bytes: impl Into<Vec<u8>>) -> Self {
        RespValue::Bulk(Some(bytes.into()))
    }

    pub fn simple(s: impl Into<String>) -> Self {
        RespValue::Simple(s.into())
    }

    pub fn array(items: Vec<RespValue>) -> Self {
        RespValue::Array(Some(items))
    }

    pub fn error(msg: impl Into<String>) -> Self {
        RespValue::Error(msg.into())
    }

    pub fn wrong_type() -> Self {
        RespValue::Error(EngineError::WrongType.to_string())
    }

    pub fn is_error(&self) -> bool {
        matches!(self, RespValue::Error(_))
    }

    pub fn encode(&self, proto: u8) -> Vec<u8> {
        let mut out = Vec::new();
        self.write(&mut out, proto);
        out
    }

    fn write(&self, out: &mut Vec<u8>, proto: u8) {
        match self {
            RespValue::Simple(s) => {
                out.push(b'+');
                out.extend_from_slice(s.as_bytes());
                out.extend_from_slice(b"\r\n");
            }
            RespValue::Error(s) => {
                out.push(b'-');
                out.extend_from_slice(s.as_bytes());
                out.extend_from_slice(b"\r\n");
            }
            RespValue::Integer(n) => {
                out.extend_from_slice(format!(":{n}\r\n").as_bytes());
            }
            RespValue::Bulk(None) => {
                out.extend_from_slice(if proto >= 3 { b"_\r\n" } else { b"$-1\r\n" });
            }
            RespValue::Bulk(Some(data)) => {
                out.extend_from_slice(format!("${}\r\n", data.len()).as_bytes());
                out.extend_from_slice(data);
                out.extend_from_slice(b"\r\n");
            }
            RespValue::Array(None) => {
                out.extend_from_slice(if proto >= 3 { b"_\r\n" } else { b"*-1\r\n" });
            }
            RespValue::Array(Some(items)) => {
                out.extend_from_slice(format!("*{}\r\n", items.len()).as_bytes());
                for item in items {
                    item.write(out, proto);
                }
            }
            RespValue::Map(pairs) => {
                if proto >= 3 {
                    out.extend_from_slice(format!("%{}\r\n", pairs.len()).as_bytes());
                    for (k, v) in pairs {
                        k.write(out, proto);
                        v.write(out, proto);
                    }
                } else {
                    out.extend_from_slice(format!("*{}\r\n", pairs.len() * 2).as_bytes());
                    for (k, v) in pairs {
                        k.write(out, proto);
                        v.write(out, proto);
                    }
                }
            }
            RespValue::Set(items) => {
                let lead = if proto >= 3 { '~' } else { '*' };
                out.extend_from_slice(format!("{lead}{}\r\n", items.len()).as_bytes());
                for item in items {
                    item.write(out, proto);
                }
            }
            RespValue::Double(d) => {
                if proto >= 3 {
                    out.extend_from_slice(format!(",{}\r\n", format_f64(*d)).as_bytes());
                } else {
                    RespValue::bulk(format_f64(*d).into_bytes()).write(out, proto);
                }
            }
            RespValue::Boolean(b) => {
                if proto >= 3 {
                    out.extend_from_slice(if *b { b"#t\r\n" } else { b"#f\r\n" });
                } else {
                    out.extend_from_slice(if *b { b":1\r\n" } else { b":0\r\n" });
                }
            }
            RespValue::BigNumber(s) => {
                if proto >= 3 {
                    out.push(b'(');
                    out.extend_from_slice(s.as_bytes());
                    out.extend_from_slice(b"\r\n");
                } else {
                    RespValue::bulk(s.clone().into_bytes()).write(out, proto);
                }
            }
            RespValue::Verbatim(text) => {
                if proto >= 3 {
                    out.extend_from_slice(format!("={}\r\ntxt:", text.len() + 4).as_bytes());
                    out.extend_from_slice(text.as_bytes());
                    out.extend_from_slice(b"\r\n");
                } else {
                    RespValue::bulk(text.clone().into_bytes()).write(out, proto);
                }
            }
            RespValue::Push(items) => {
                let lead = if proto >= 3 { '>' } else { '*' };
                out.extend_from_slice(format!("{lead}{}\r\n", items.len()).as_bytes());
                for item in items {
                    item.write(out, proto);
                }
            }
            RespValue::Seq(frames) => {
                for frame in frames {
                    frame.write(out, proto);
                }
            }
        }
    }
}

impl From<i64> for RespValue {
    fn from(n: i64) -> Self {
        RespValue::Integer(n)
    }
}

impl From<bool> for RespValue {
    fn from(b: bool) -> Self {
        RespValue::Integer(if b { 1 } else { 0 })
    }
}

impl From<Vec<u8>> for RespValue {
    fn from(bytes: Vec<u8>) -> Self {
        RespValue::Bulk(Some(bytes))
    }
}

impl From<Option<Vec<u8>>> for RespValue {
    fn from(opt: Option<Vec<u8>>) -> Self {
        RespValue::Bulk(opt)
    }
}

impl From<String> for RespValue {
    fn from(s: String) -> Self {
        RespValue::Bulk(Some(s.into_bytes()))
    }
}

impl From<EngineError> for RespValue {
    fn from(e: EngineError) -> Self {
        RespValue::Error(e.to_string())
    }
}

impl<T: Into<RespValue>> From<crate::error::Result<T>> for RespValue {
    fn from(r: crate::error::Result<T>) -> Self {
        match r {
            Ok(v) => v.into(),
            Err(e) => e.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_resp2_basics() {
        assert_eq!(RespValue::ok().encode(2), b"+OK\r\n");
        assert_eq!(
            RespValue::error("ERR boom").encode(2),
            b"-ERR boom\r\n".to_vec()
        );
        assert_eq!(RespValue::Integer(42).encode(2), b":42\r\n");
        assert_eq!(RespValue::bulk(b"hello".to_vec()).encode(2), b"$5\r\nhello\r\n");
        assert_eq!(RespValue::null().encode(2), b"$-1\r\n");
        assert_eq!(RespValue::null_array().encode(2), b"*-1\r\n");
        assert_eq!(
            RespValue::array(vec![RespValue::bulk(b"a".to_vec())]).encode(2),
            b"*1\r\n$1\r\na\r\n"
        );
    }

    #[test]
    fn encode_resp3_nulls_and_doubles() {
        assert_eq!(RespValue::null().encode(3), b"_\r\n");
        assert_eq!(RespValue::null_array().encode(3), b"_\r\n");
        assert_eq!(RespValue::Double(1.5).encode(3), b",1.5\r\n");
        assert_eq!(RespValue::Double(1.5).encode(2), b"$3\r\n1.5\r\n");
        assert_eq!(RespValue::Boolean(true).encode(3), b"#t\r\n");
        assert_eq!(RespValue::Boolean(true).encode(2), b":1\r\n");
    }

    #[test]
    fn encode_map_downgrade() {
        let map = RespValue::Map(vec![(
            RespValue::bulk(b"k".to_vec()),
            RespValue::bulk(b"v".to_vec()),
        )]);
        assert_eq!(map.encode(3), b"%1\r\n$1\r\nk\r\n$1\r\nv\r\n");
        assert_eq!(map.encode(2), b"*2\r\n$1\r\nk\r\n$1\r\nv\r\n");
    }

    #[test]
    fn encode_push_downgrade() {
        let push = RespValue::Push(vec![
            RespValue::bulk(b"message".to_vec()),
            RespValue::bulk(b"ch".to_vec()),
        ]);
        assert_eq!(push.encode(3), b">2\r\n$7\r\nmessage\r\n$2\r\nch\r\n");
        assert_eq!(push.encode(2), b"*2\r\n$7\r\nmessage\r\n$2\r\nch\r\n");
    }

    #[test]
    fn encode_seq_concatenates() {
        let seq = RespValue::Seq(vec![RespValue::ok(), RespValue::Integer(1)]);
        assert_eq!(seq.encode(2), b"+OK\r\n:1\r\n");
    }
}

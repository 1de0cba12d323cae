use bytes::{Buf, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Hard protocol limits. Oversized frames are fatal: the connection is
/// closed without a reply.
pub const MAX_BULK_LEN: u64 = 512 * 1024 * 1024;
pub const MAX_MULTIBULK_LEN: u64 = 1024 * 1024;
pub const MAX_INLINE_LEN: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum ReadError {
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("connection reset while reading a request")]
    UnexpectedEof,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Try to decode one client request from `buf`.
///
/// Returns the argument vector and the number of bytes consumed, or `None`
/// when the buffer does not yet hold a complete request. A zero-length
/// multibulk or blank inline line decodes to an empty argument vector the
/// caller should skip.
pub fn parse_request(buf: &[u8]) -> Result<Option<(Vec<Vec<u8>>, usize)>, ReadError> {
    if buf.is_empty() {
        return Ok(None);
    }
    if buf[0] == b'*' {
        parse_multibulk(buf)
    } else {
        parse_inline(buf)
    }
}

fn parse_multibulk(buf: &[u8]) -> Result<Option<(Vec<Vec<u8>>, usize)>, ReadError> {
    let Some((line, mut pos)) = read_line(buf, 0) else {
        return Ok(None);
    };
    let count = parse_signed(&line[1..])
        .ok_or_else(|| ReadError::Protocol("invalid multibulk length".into()))?;
    if count > MAX_MULTIBULK_LEN as i64 {
        return Err(ReadError::Protocol("invalid multibulk length".into()));
    }
    if count <= 0 {
        return Ok(Some((Vec::new(), pos)));
    }

    let mut args = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let Some((header, next)) = read_line(buf, pos) else {
            return Ok(None);
        };
        if header.first() != Some(&b'$') {
            let got = header.first().map(|&b| b as char).unwrap_or(' ');
            return Err(ReadError::Protocol(format!("expected '$', got '{got}'")));
        }
        let len = parse_signed(&header[1..])
            .filter(|&n| n >= 0 && n as u64 <= MAX_BULK_LEN)
            .ok_or_else(|| ReadError::Protocol("invalid bulk length".into()))? as usize;
        pos = next;
        if buf.len() < pos + len + 2 {
            return Ok(None);
        }
        if &buf[pos + len..pos + len + 2] != b"\r\n" {
            return Err(ReadError::Protocol("invalid bulk length".into()));
        }
        args.push(buf[pos..pos + len].to_vec());
        pos += len + 2;
    }
    Ok(Some((args, pos)))
}

/// Inline commands: whitespace-separated words terminated by a newline.
fn parse_inline(buf: &[u8]) -> Result<Option<(Vec<Vec<u8>>, usize)>, ReadError> {
    let Some(nl) = buf.iter().position(|&b| b == b'\n') else {
        if buf.len() > MAX_INLINE_LEN {
            return Err(ReadError::Protocol("too big inline request".into()));
        }
        return Ok(None);
    };
    let mut line = &buf[..nl];
    if line.last() == Some(&b'\r') {
        line = &line[..line.len() - 1];
    }
    let args = line
        .split(|&b| b == b' ' || b == b'\t')
        .filter(|w| !w.is_empty())
        .map(<[u8]>::to_vec)
        .collect();
    Ok(Some((args, nl + 1)))
}

fn read_line(buf: &[u8], start: usize) -> Option<(&[u8], usize)> {
    let rest = &buf[start..];
    let nl = rest.iter().position(|&b| b == b'\n')?;
    if nl == 0 || rest[nl - 1] != b'\r' {
        return None;
    }
    Some((&rest[..nl - 1], start + nl + 1))
}

fn parse_signed(bytes: &[u8]) -> Option<i64> {
    if bytes.is_empty() {
        return None;
    }
    std::str::from_utf8(bytes).ok()?.parse().ok()
}

/// Buffered request decoder over an async byte stream.
pub struct RequestReader<R> {
    inner: R,
    buf: BytesMut,
}

impl<R: AsyncRead + Unpin> RequestReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(4 * 1024),
        }
    }

    /// Read the next request. `Ok(None)` means the peer closed the
    /// connection cleanly between requests.
    pub async fn next_request(&mut self) -> Result<Option<Vec<Vec<u8>>>, ReadError> {
        loop {
            match parse_request(&self.buf)? {
                Some((args, consumed)) => {
                    self.buf.advance(consumed);
                    if args.is_empty() {
                        continue;
                    }
                    return Ok(Some(args));
                }
                None => {
                    let n = self.inner.read_buf(&mut self.buf).await?;
                    if n == 0 {
                        if self.buf.is_empty() {
                            return Ok(None);
                        }
                        return Err(ReadError::UnexpectedEof);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_multibulk() {
        let (args, consumed) = parse_request(b"*2\r\n$3\r\nGET\r\n$1\r\nk\r\n")
            .unwrap()
            .unwrap();
        assert_eq!(args, vec![b"GET".to_vec(), b"k".to_vec()]);
        assert_eq!(consumed, 20);
    }

    #[test]
    fn incomplete_returns_none() {
        assert!(parse_request(b"*2\r\n$3\r\nGE").unwrap().is_none());
        assert!(parse_request(b"*2\r\n").unwrap().is_none());
        assert!(parse_request(b"").unwrap().is_none());
    }

    #[test]
    fn binary_safe_arguments() {
        let (args, _) = parse_request(b"*1\r\n$3\r\na\x00b\r\n").unwrap().unwrap();
        assert_eq!(args, vec![b"a\x00b".to_vec()]);
    }

    #[test]
    fn inline_commands() {
        let (args, consumed) = parse_request(b"PING\r\n").unwrap().unwrap();
        assert_eq!(args, vec![b"PING".to_vec()]);
        assert_eq!(consumed, 6);

        let (args, _) = parse_request(b"SET  k   v\n").unwrap().unwrap();
        assert_eq!(args, vec![b"SET".to_vec(), b"k".to_vec(), b"v".to_vec()]);

        let (args, consumed) = parse_request(b"\r\nPING\r\n").unwrap().unwrap();
        assert!(args.is_empty());
        assert_eq!(consumed, 2);
    }

    #[test]
    fn malformed_frames_are_fatal() {
        assert!(parse_request(b"*x\r\n").is_err());
        assert!(parse_request(b"*1\r\n%3\r\nfoo\r\n").is_err());
        assert!(parse_request(b"*1\r\n$-5\r\n").is_err());
        assert!(parse_request(b"*1\r\n$3\r\nfooXY").is_err());
    }

    #[test]
    fn oversized_bulk_rejected() {
        let req = format!("*1\r\n${}\r\n", MAX_BULK_LEN + 1);
        assert!(parse_request(req.as_bytes()).is_err());
    }

    #[test]
    fn multibulk_zero_is_skippable() {
        let (args, consumed) = parse_request(b"*0\r\n").unwrap().unwrap();
        assert!(args.is_empty());
        assert_eq!(consumed, 4);
    }
}

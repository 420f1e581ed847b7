//! RESP framing.
//!
//! ```text
//! +OK\r\n                     simple string
//! -ERR message\r\n            error
//! :42\r\n                     integer
//! $5\r\nhello\r\n             bulk string ($-1 is nil)
//! *2\r\n$3\r\nGET\r\n$1\r\nk\r\n   array (*-1 is nil)
//! ```

use crate::error::{HarnessError, Result};
use std::io::{BufRead, Read, Write};

/// Largest bulk string or array accepted from a peer.
pub const MAX_BULK_LEN: usize = 512 * 1024 * 1024;

/// A decoded RESP value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(Option<Vec<u8>>),
    Array(Option<Vec<Value>>),
}

impl Value {
    /// Bulk string from anything byte-like.
    pub fn bulk(data: impl Into<Vec<u8>>) -> Self {
        Value::Bulk(Some(data.into()))
    }

    /// Shorthand for the `+OK` reply.
    pub fn ok() -> Self {
        Value::Simple("OK".to_string())
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Bulk(None) | Value::Array(None))
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Text of a simple or bulk string.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Value::Simple(s) => Some(s.clone()),
            Value::Bulk(Some(data)) => Some(String::from_utf8_lossy(data).into_owned()),
            _ => None,
        }
    }

    /// Turn an error reply into `HarnessError::Server`.
    pub fn into_result(self) -> Result<Value> {
        match self {
            Value::Error(message) => Err(HarnessError::Server(message)),
            other => Ok(other),
        }
    }
}

/// Encode a command as an array of bulk strings.
pub fn encode_command<I, S>(args: I) -> Vec<u8>
where
    I: IntoIterator<Item = S>,
    S: AsRef<[u8]>,
{
    let args: Vec<S> = args.into_iter().collect();
    let mut buf = Vec::with_capacity(16 + args.len() * 16);
    buf.extend_from_slice(format!("*{}\r\n", args.len()).as_bytes());
    for arg in &args {
        let arg = arg.as_ref();
        buf.extend_from_slice(format!("${}\r\n", arg.len()).as_bytes());
        buf.extend_from_slice(arg);
        buf.extend_from_slice(b"\r\n");
    }
    buf
}

/// Serialize a value onto a writer.
pub fn write_value<W: Write>(writer: &mut W, value: &Value) -> Result<()> {
    match value {
        Value::Simple(s) => write!(writer, "+{}\r\n", s)?,
        Value::Error(s) => write!(writer, "-{}\r\n", s)?,
        Value::Integer(n) => write!(writer, ":{}\r\n", n)?,
        Value::Bulk(None) => writer.write_all(b"$-1\r\n")?,
        Value::Bulk(Some(data)) => {
            write!(writer, "${}\r\n", data.len())?;
            writer.write_all(data)?;
            writer.write_all(b"\r\n")?;
        }
        Value::Array(None) => writer.write_all(b"*-1\r\n")?,
        Value::Array(Some(items)) => {
            write!(writer, "*{}\r\n", items.len())?;
            for item in items {
                write_value(writer, item)?;
            }
        }
    }
    Ok(())
}

/// Read one value from a buffered reader.
///
/// Returns `None` on clean EOF before the first byte (peer closed).
pub fn read_value<R: BufRead>(reader: &mut R) -> Result<Option<Value>> {
    let line = match read_line(reader)? {
        Some(line) => line,
        None => return Ok(None),
    };

    let (prefix, rest) = match line.split_first() {
        Some((prefix, rest)) => (*prefix, rest),
        None => return Err(HarnessError::protocol("empty line")),
    };
    let text = String::from_utf8_lossy(rest).into_owned();

    let value = match prefix {
        b'+' => Value::Simple(text),
        b'-' => Value::Error(text),
        b':' => Value::Integer(parse_int(&text)?),
        b'$' => match parse_len(&text)? {
            None => Value::Bulk(None),
            Some(len) => {
                let mut data = vec![0u8; len + 2];
                reader.read_exact(&mut data)?;
                if &data[len..] != b"\r\n" {
                    return Err(HarnessError::protocol("bulk string missing CRLF terminator"));
                }
                data.truncate(len);
                Value::Bulk(Some(data))
            }
        },
        b'*' => match parse_len(&text)? {
            None => Value::Array(None),
            Some(len) => {
                let mut items = Vec::with_capacity(len.min(1024));
                for _ in 0..len {
                    let item = read_value(reader)?
                        .ok_or_else(|| HarnessError::protocol("connection closed inside array"))?;
                    items.push(item);
                }
                Value::Array(Some(items))
            }
        },
        other => {
            return Err(HarnessError::protocol(format!(
                "unexpected type byte {:?}",
                other as char
            )))
        }
    };

    Ok(Some(value))
}

/// Read a CRLF-terminated line, without the terminator.
fn read_line<R: BufRead>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut line = Vec::new();
    let n = reader.read_until(b'\n', &mut line)?;
    if n == 0 {
        return Ok(None);
    }
    if !line.ends_with(b"\r\n") {
        return Err(HarnessError::protocol("line missing CRLF terminator"));
    }
    line.truncate(line.len() - 2);
    Ok(Some(line))
}

fn parse_int(text: &str) -> Result<i64> {
    text.parse::<i64>()
        .map_err(|_| HarnessError::protocol(format!("invalid integer {:?}", text)))
}

/// Parse a bulk/array length; -1 means nil.
fn parse_len(text: &str) -> Result<Option<usize>> {
    let len = parse_int(text)?;
    if len == -1 {
        return Ok(None);
    }
    if len < 0 || len as u64 > MAX_BULK_LEN as u64 {
        return Err(HarnessError::protocol(format!(
            "length {} out of range (max {})",
            len, MAX_BULK_LEN
        )));
    }
    Ok(Some(len as usize))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn decode(bytes: &[u8]) -> Result<Option<Value>> {
        read_value(&mut Cursor::new(bytes.to_vec()))
    }

    #[test]
    fn test_encode_command() {
        let bytes = encode_command(["SET", "key", ""]);
        assert_eq!(bytes, b"*3\r\n$3\r\nSET\r\n$3\r\nkey\r\n$0\r\n\r\n".to_vec());
    }

    #[test]
    fn test_decode_scalar_replies() {
        assert_eq!(decode(b"+PONG\r\n").unwrap(), Some(Value::Simple("PONG".into())));
        assert_eq!(
            decode(b"-ERR unknown command\r\n").unwrap(),
            Some(Value::Error("ERR unknown command".into()))
        );
        assert_eq!(decode(b":-7\r\n").unwrap(), Some(Value::Integer(-7)));
        assert_eq!(decode(b"$-1\r\n").unwrap(), Some(Value::Bulk(None)));
        assert_eq!(decode(b"$0\r\n\r\n").unwrap(), Some(Value::bulk("")));
    }

    #[test]
    fn test_decode_nested_array() {
        let value = decode(b"*2\r\n$3\r\nfoo\r\n*1\r\n:1\r\n").unwrap().unwrap();
        assert_eq!(
            value,
            Value::Array(Some(vec![
                Value::bulk("foo"),
                Value::Array(Some(vec![Value::Integer(1)])),
            ]))
        );
    }

    #[test]
    fn test_decode_request_matches_encoding() {
        let request = encode_command(["DEBUG", "RELOAD"]);
        let value = decode(&request).unwrap().unwrap();
        assert_eq!(
            value,
            Value::Array(Some(vec![Value::bulk("DEBUG"), Value::bulk("RELOAD")]))
        );
    }

    #[test]
    fn test_decode_empty_stream_returns_none() {
        assert!(decode(b"").unwrap().is_none());
    }

    #[test]
    fn test_decode_malformed_input() {
        assert!(decode(b"?what\r\n").is_err());
        assert!(decode(b"+OK\n").is_err());
        assert!(decode(b"$3\r\nabcd\r\n").is_err());
        assert!(decode(b"*2\r\n:1\r\n").is_err());
        assert!(decode(b"$-5\r\n").is_err());
    }

    #[test]
    fn test_error_reply_into_result() {
        let err = Value::Error("ERR boom".into()).into_result().unwrap_err();
        assert_eq!(err.server_message(), Some("ERR boom"));
        assert_eq!(Value::ok().into_result().unwrap(), Value::ok());
    }

    #[test]
    fn test_write_value_bulk_and_nil() {
        let mut buf = Vec::new();
        write_value(&mut buf, &Value::Array(Some(vec![Value::bulk("v"), Value::Bulk(None)])))
            .unwrap();
        assert_eq!(buf, b"*2\r\n$1\r\nv\r\n$-1\r\n".to_vec());
    }
}

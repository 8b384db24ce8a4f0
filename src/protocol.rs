/// Metadata dump protocol parsing and generation
///
/// The metadata service speaks a line-oriented tabular protocol. A
/// stored procedure is invoked with `CALL <procedure>()` and answers
/// with a sequence of result sets followed by a lone `.` terminator:
///
/// ```text
/// *1
/// instance-uuid<TAB>5<TAB>ok
/// *2
/// s1<TAB>g1<TAB>10.0.0.1<TAB>3306<TAB>3<TAB>3<TAB>2.5
/// s2<TAB>g1<TAB>10.0.0.2<TAB>3306<TAB>1<TAB>2<TAB>1.0
/// .
/// ```
///
/// Each result set is a `*<row-count>` header followed by exactly that
/// many rows of tab-separated fields. A `-ERR <message>` line in place
/// of the response reports a server-side failure; handshake and
/// liveness exchanges (`AUTH`, `PING`) answer with a single `+`/`-`
/// status line.

use bytes::{Buf, BytesMut};
use std::str;

/// A single materialized result set: rows of tab-separated fields
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    pub rows: Vec<Vec<String>>,
}

/// A complete response to a `CALL`: all result sets up to the terminator
#[derive(Debug, Clone, PartialEq)]
pub struct DumpResponse {
    pub result_sets: Vec<ResultSet>,
}

/// Reply to a single-line exchange (`AUTH`, `PING`)
#[derive(Debug, Clone, PartialEq)]
pub enum StatusReply {
    /// `+OK`, `+PONG`
    Ok(String),
    /// `-ERR message`
    Err(String),
}

/// Parse error types
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Invalid frame: {0}")]
    InvalidFormat(String),

    #[error("Invalid UTF-8: {0}")]
    InvalidUtf8(#[from] str::Utf8Error),

    #[error("Server reported error: {0}")]
    ServerError(String),
}

/// Encode the authentication handshake line
pub fn encode_auth(user: &str, password: &str) -> String {
    format!("AUTH {} {}\n", user, password)
}

/// Encode a liveness probe line
pub fn encode_ping() -> String {
    "PING\n".to_string()
}

/// Encode a stored procedure invocation
pub fn encode_call(procedure: &str) -> String {
    format!("CALL {}()\n", procedure)
}

/// Parser for metadata dump responses
///
/// Both entry points parse incrementally from a `BytesMut`: they return
/// `Ok(None)` without consuming anything until a complete frame is
/// buffered, so callers can keep appending reads from the socket.
pub struct DumpParser;

impl DumpParser {
    /// Parse a single `+`/`-` status line
    pub fn parse_status(buf: &mut BytesMut) -> Result<Option<StatusReply>, ProtocolError> {
        let Some((line, next)) = peek_line(buf, 0) else {
            return Ok(None);
        };

        let reply = match line.first() {
            Some(b'+') => StatusReply::Ok(str::from_utf8(&line[1..])?.to_string()),
            Some(b'-') => StatusReply::Err(str::from_utf8(&line[1..])?.to_string()),
            _ => {
                return Err(ProtocolError::InvalidFormat(format!(
                    "expected status line, got {:?}",
                    String::from_utf8_lossy(line)
                )))
            }
        };

        buf.advance(next);
        Ok(Some(reply))
    }

    /// Parse a complete `CALL` response (all result sets up to `.`)
    pub fn parse_response(buf: &mut BytesMut) -> Result<Option<DumpResponse>, ProtocolError> {
        let mut pos = 0;
        let mut result_sets = Vec::new();

        loop {
            let Some((line, next)) = peek_line(buf, pos) else {
                return Ok(None);
            };

            if line == b"." {
                pos = next;
                break;
            }

            match line.first() {
                Some(b'-') => {
                    let message = str::from_utf8(&line[1..])?.to_string();
                    buf.advance(next);
                    return Err(ProtocolError::ServerError(message));
                }
                Some(b'*') => {
                    let count: usize = str::from_utf8(&line[1..])?.parse().map_err(|_| {
                        ProtocolError::InvalidFormat(format!(
                            "bad result set header: {:?}",
                            String::from_utf8_lossy(line)
                        ))
                    })?;
                    pos = next;

                    // the count is server-controlled; cap the
                    // pre-allocation and let the vector grow
                    let mut rows = Vec::with_capacity(count.min(1024));
                    for _ in 0..count {
                        let Some((row, row_next)) = peek_line(buf, pos) else {
                            return Ok(None);
                        };
                        let fields = str::from_utf8(row)?
                            .split('\t')
                            .map(str::to_string)
                            .collect();
                        rows.push(fields);
                        pos = row_next;
                    }
                    result_sets.push(ResultSet { rows });
                }
                _ => {
                    return Err(ProtocolError::InvalidFormat(format!(
                        "unexpected line: {:?}",
                        String::from_utf8_lossy(line)
                    )))
                }
            }
        }

        buf.advance(pos);
        Ok(Some(DumpResponse { result_sets }))
    }
}

/// Find the next `\n`-terminated line starting at `pos`.
///
/// Returns the line without its terminator (a trailing `\r` is
/// tolerated and stripped) and the offset just past it, or `None` if
/// the buffer holds no complete line yet.
fn peek_line(buf: &[u8], pos: usize) -> Option<(&[u8], usize)> {
    let rest = &buf[pos..];
    let newline = rest.iter().position(|&b| b == b'\n')?;
    let mut line = &rest[..newline];
    if line.ends_with(b"\r") {
        line = &line[..line.len() - 1];
    }
    Some((line, pos + newline + 1))
}

/// Permissive integer conversion with C `atoi` semantics.
///
/// Parses the longest leading numeric prefix after trimming
/// whitespace; malformed text yields 0 instead of an error.
pub fn lenient_i64(text: &str) -> i64 {
    let text = text.trim();
    for end in (1..=text.len()).rev() {
        if !text.is_char_boundary(end) {
            continue;
        }
        if let Ok(value) = text[..end].parse() {
            return value;
        }
    }
    0
}

/// Permissive float conversion with C `strtof` semantics
pub fn lenient_f32(text: &str) -> f32 {
    let text = text.trim();
    for end in (1..=text.len()).rev() {
        if !text.is_char_boundary(end) {
            continue;
        }
        if let Ok(value) = text[..end].parse() {
            return value;
        }
    }
    0.0
}

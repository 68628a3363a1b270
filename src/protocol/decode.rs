//! Protocol message decoding

use super::constants::{auth, tags};
use super::message::{
    AuthenticationMessage, BackendMessage, ErrorFields, FieldDescription, TransactionStatus,
};
use bytes::{Bytes, BytesMut};
use std::io;

/// Largest message body accepted (1 GB, PostgreSQL's `PQ_LARGE_MESSAGE_LIMIT`).
///
/// Length headers above this are rejected before any allocation.
const MAX_MESSAGE_LENGTH: usize = 1_073_741_824;

/// Decode one backend message from the front of `data`.
///
/// Returns the message and the number of bytes it occupied; the caller
/// advances the buffer. An `UnexpectedEof` error means more bytes are needed.
pub fn decode_message(data: &mut BytesMut) -> io::Result<(BackendMessage, usize)> {
    if data.len() < 5 {
        return Err(eof("incomplete message header"));
    }

    let tag = data[0];
    let len = i32::from_be_bytes([data[1], data[2], data[3], data[4]]);
    if len < 4 {
        return Err(invalid(format!("message length {} is too small", len)));
    }
    let len = len as usize;
    if len > MAX_MESSAGE_LENGTH {
        return Err(invalid(format!(
            "message length {} exceeds maximum allowed {}",
            len, MAX_MESSAGE_LENGTH
        )));
    }
    if data.len() < len + 1 {
        return Err(eof("incomplete message body"));
    }

    let mut body = Reader::new(&data[5..len + 1]);
    let msg = match tag {
        tags::AUTHENTICATION => decode_authentication(&mut body)?,
        tags::BACKEND_KEY_DATA => BackendMessage::BackendKeyData {
            process_id: body.i32("process id")?,
            secret_key: body.i32("secret key")?,
        },
        tags::COMMAND_COMPLETE => BackendMessage::CommandComplete(body.cstr("command tag")?),
        tags::DATA_ROW => decode_data_row(&mut body)?,
        tags::EMPTY_QUERY_RESPONSE => BackendMessage::EmptyQueryResponse,
        tags::ERROR_RESPONSE => BackendMessage::ErrorResponse(decode_error_fields(&mut body)?),
        tags::NOTICE_RESPONSE => BackendMessage::NoticeResponse(decode_error_fields(&mut body)?),
        tags::PARAMETER_STATUS => BackendMessage::ParameterStatus {
            name: body.cstr("parameter name")?,
            value: body.cstr("parameter value")?,
        },
        tags::READY_FOR_QUERY => {
            let byte = body.u8("status byte")?;
            let status = TransactionStatus::from_byte(byte)
                .ok_or_else(|| invalid(format!("unknown transaction status 0x{:02X}", byte)))?;
            BackendMessage::ReadyForQuery { status }
        }
        tags::ROW_DESCRIPTION => decode_row_description(&mut body)?,
        _ => return Err(invalid(format!("unknown message tag: {}", tag))),
    };

    Ok((msg, len + 1))
}

/// Bounds-checked cursor over one message body
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }

    fn take(&mut self, n: usize, what: &str) -> io::Result<&'a [u8]> {
        if self.buf.len() - self.pos < n {
            return Err(eof(what));
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn u8(&mut self, what: &str) -> io::Result<u8> {
        Ok(self.take(1, what)?[0])
    }

    fn i16(&mut self, what: &str) -> io::Result<i16> {
        let b = self.take(2, what)?;
        Ok(i16::from_be_bytes([b[0], b[1]]))
    }

    fn i32(&mut self, what: &str) -> io::Result<i32> {
        let b = self.take(4, what)?;
        Ok(i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn cstr(&mut self, what: &str) -> io::Result<String> {
        let rest = self.remaining();
        let end = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| invalid(format!("missing null terminator in {}", what)))?;
        let s = String::from_utf8_lossy(&rest[..end]).into_owned();
        self.pos += end + 1;
        Ok(s)
    }
}

fn decode_authentication(body: &mut Reader<'_>) -> io::Result<BackendMessage> {
    let auth_type = body.i32("auth type")?;

    let auth_msg = match auth_type {
        auth::OK => AuthenticationMessage::Ok,
        auth::CLEARTEXT_PASSWORD => AuthenticationMessage::CleartextPassword,
        auth::MD5_PASSWORD => {
            let mut salt = [0u8; 4];
            salt.copy_from_slice(body.take(4, "salt data")?);
            AuthenticationMessage::Md5Password { salt }
        }
        auth::SASL => {
            let mut mechanisms = Vec::new();
            while !body.remaining().is_empty() {
                let mechanism = body.cstr("SASL mechanism")?;
                if mechanism.is_empty() {
                    break;
                }
                mechanisms.push(mechanism);
            }
            AuthenticationMessage::Sasl { mechanisms }
        }
        auth::SASL_CONTINUE => AuthenticationMessage::SaslContinue {
            data: body.remaining().to_vec(),
        },
        auth::SASL_FINAL => AuthenticationMessage::SaslFinal {
            data: body.remaining().to_vec(),
        },
        _ => {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                format!("unsupported auth type: {}", auth_type),
            ))
        }
    };

    Ok(BackendMessage::Authentication(auth_msg))
}

fn decode_data_row(body: &mut Reader<'_>) -> io::Result<BackendMessage> {
    let count = body.i16("field count")?.max(0) as usize;
    let mut fields = Vec::with_capacity(count);

    for _ in 0..count {
        let len = body.i32("field length")?;
        let field = if len < 0 {
            None
        } else {
            Some(Bytes::copy_from_slice(body.take(len as usize, "field data")?))
        };
        fields.push(field);
    }

    Ok(BackendMessage::DataRow(fields))
}

fn decode_error_fields(body: &mut Reader<'_>) -> io::Result<ErrorFields> {
    let mut fields = ErrorFields::default();

    loop {
        let field_type = match body.u8("error field type") {
            Ok(0) | Err(_) => break,
            Ok(t) => t,
        };
        let value = body.cstr("error field")?;
        match field_type {
            b'S' => fields.severity = Some(value),
            b'C' => fields.code = Some(value),
            b'M' => fields.message = Some(value),
            b'D' => fields.detail = Some(value),
            b'H' => fields.hint = Some(value),
            _ => {}
        }
    }

    Ok(fields)
}

fn decode_row_description(body: &mut Reader<'_>) -> io::Result<BackendMessage> {
    let count = body.i16("field count")?.max(0) as usize;
    let mut fields = Vec::with_capacity(count);

    for _ in 0..count {
        fields.push(FieldDescription {
            name: body.cstr("field name")?,
            table_oid: body.i32("table oid")?,
            column_attr: body.i16("column attribute")?,
            type_oid: body.i32("type oid")? as u32,
            type_size: body.i16("type size")?,
            type_modifier: body.i32("type modifier")?,
            format_code: body.i16("format code")?,
        });
    }

    Ok(BackendMessage::RowDescription(fields))
}

fn eof(what: &str) -> io::Error {
    io::Error::new(io::ErrorKind::UnexpectedEof, what.to_string())
}

fn invalid(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BufMut;

    fn frame(tag: u8, body: &[u8]) -> BytesMut {
        let mut buf = BytesMut::new();
        buf.put_u8(tag);
        buf.put_i32(body.len() as i32 + 4);
        buf.put_slice(body);
        buf
    }

    #[test]
    fn test_decode_authentication_ok() {
        let mut data = frame(b'R', &[0, 0, 0, 0]);
        let (msg, consumed) = decode_message(&mut data).unwrap();
        assert!(matches!(
            msg,
            BackendMessage::Authentication(AuthenticationMessage::Ok)
        ));
        assert_eq!(consumed, 9);
    }

    #[test]
    fn test_decode_sasl_mechanisms() {
        let mut body = vec![0, 0, 0, 10];
        body.extend_from_slice(b"SCRAM-SHA-256\0SCRAM-SHA-256-PLUS\0\0");
        let mut data = frame(b'R', &body);
        let (msg, _) = decode_message(&mut data).unwrap();
        match msg {
            BackendMessage::Authentication(AuthenticationMessage::Sasl { mechanisms }) => {
                assert_eq!(mechanisms, vec!["SCRAM-SHA-256", "SCRAM-SHA-256-PLUS"]);
            }
            other => panic!("expected SASL, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_rejects_oversized_message() {
        let oversized = (MAX_MESSAGE_LENGTH as i32) + 1;
        let len = oversized.to_be_bytes();
        let mut data = BytesMut::from(&[b'D', len[0], len[1], len[2], len[3]][..]);

        let err = decode_message(&mut data).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert!(err.to_string().contains("exceeds maximum"));
    }

    #[test]
    fn test_decode_incomplete_body_needs_more() {
        let mut data = frame(b'Z', b"I");
        data.truncate(5);
        let err = decode_message(&mut data).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_decode_ready_for_query_in_transaction() {
        let mut data = frame(b'Z', b"T");
        let (msg, consumed) = decode_message(&mut data).unwrap();
        match msg {
            BackendMessage::ReadyForQuery { status } => {
                assert_eq!(status, TransactionStatus::InTransaction)
            }
            other => panic!("expected ReadyForQuery, got {:?}", other),
        }
        assert_eq!(consumed, 6);
    }

    #[test]
    fn test_decode_data_row_with_null() {
        let mut body = BytesMut::new();
        body.put_i16(2);
        body.put_i32(2);
        body.put_slice(b"42");
        body.put_i32(-1);
        let mut data = frame(b'D', &body);

        let (msg, _) = decode_message(&mut data).unwrap();
        match msg {
            BackendMessage::DataRow(fields) => {
                assert_eq!(fields.len(), 2);
                assert_eq!(fields[0].as_deref(), Some(&b"42"[..]));
                assert!(fields[1].is_none());
            }
            other => panic!("expected DataRow, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_row_description() {
        let mut body = BytesMut::new();
        body.put_i16(1);
        body.put_slice(b"id\0");
        body.put_i32(16384);
        body.put_i16(1);
        body.put_i32(23);
        body.put_i16(4);
        body.put_i32(-1);
        body.put_i16(0);
        let mut data = frame(b'T', &body);

        let (msg, _) = decode_message(&mut data).unwrap();
        match msg {
            BackendMessage::RowDescription(fields) => {
                assert_eq!(fields[0].name, "id");
                assert_eq!(fields[0].type_oid, 23);
            }
            other => panic!("expected RowDescription, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_error_response_fields() {
        let mut data = frame(
            b'E',
            b"SERROR\0C23505\0Mduplicate key value\0Dkey (id)=(1)\0\0",
        );
        let (msg, _) = decode_message(&mut data).unwrap();
        match msg {
            BackendMessage::ErrorResponse(fields) => {
                assert_eq!(fields.code.as_deref(), Some("23505"));
                assert!(!fields.is_fatal());
                assert_eq!(
                    fields.to_string(),
                    "duplicate key value (23505): key (id)=(1)"
                );
            }
            other => panic!("expected ErrorResponse, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_empty_query_response() {
        let mut data = frame(b'I', &[]);
        let (msg, consumed) = decode_message(&mut data).unwrap();
        assert!(matches!(msg, BackendMessage::EmptyQueryResponse));
        assert_eq!(consumed, 5);
    }
}

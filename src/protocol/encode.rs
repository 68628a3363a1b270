//! Protocol message encoding

use super::constants::{frontend, SSL_REQUEST_CODE};
use super::message::FrontendMessage;
use bytes::{BufMut, BytesMut};

/// Encode a frontend message into bytes
pub fn encode_message(msg: &FrontendMessage) -> BytesMut {
    let mut buf = BytesMut::new();

    match msg {
        FrontendMessage::Startup { version, params } => {
            // Startup carries no tag byte
            with_length(&mut buf, |b| {
                b.put_i32(*version);
                for (key, value) in params {
                    put_cstr(b, key);
                    put_cstr(b, value);
                }
                b.put_u8(0);
            });
        }
        FrontendMessage::Password(password) => {
            buf.put_u8(frontend::PASSWORD);
            with_length(&mut buf, |b| put_cstr(b, password));
        }
        FrontendMessage::Query(query) => {
            buf.put_u8(frontend::QUERY);
            with_length(&mut buf, |b| put_cstr(b, query));
        }
        FrontendMessage::Terminate => {
            buf.put_u8(frontend::TERMINATE);
            buf.put_i32(4);
        }
        FrontendMessage::SaslInitialResponse { mechanism, data } => {
            buf.put_u8(frontend::PASSWORD);
            with_length(&mut buf, |b| {
                put_cstr(b, mechanism);
                b.put_i32(data.len() as i32);
                b.put_slice(data);
            });
        }
        FrontendMessage::SaslResponse { data } => {
            buf.put_u8(frontend::PASSWORD);
            with_length(&mut buf, |b| b.put_slice(data));
        }
        FrontendMessage::SslRequest => {
            buf.put_i32(8);
            buf.put_i32(SSL_REQUEST_CODE);
        }
    }

    buf
}

/// Write a length-prefixed section; the length includes itself
fn with_length(buf: &mut BytesMut, body: impl FnOnce(&mut BytesMut)) {
    let len_pos = buf.len();
    buf.put_i32(0);
    body(buf);
    let len = (buf.len() - len_pos) as i32;
    buf[len_pos..len_pos + 4].copy_from_slice(&len.to_be_bytes());
}

fn put_cstr(buf: &mut BytesMut, s: &str) {
    buf.put_slice(s.as_bytes());
    buf.put_u8(0);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_query() {
        let buf = encode_message(&FrontendMessage::Query("SELECT 1".to_string()));

        assert_eq!(buf[0], b'Q');
        let len = i32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]);
        assert_eq!(len, (buf.len() - 1) as i32);
        assert_eq!(buf[buf.len() - 1], 0);
    }

    #[test]
    fn test_encode_terminate() {
        let buf = encode_message(&FrontendMessage::Terminate);
        assert_eq!(&buf[..], &[b'X', 0, 0, 0, 4]);
    }

    #[test]
    fn test_encode_ssl_request() {
        let buf = encode_message(&FrontendMessage::SslRequest);
        assert_eq!(&buf[..], &[0x00, 0x00, 0x00, 0x08, 0x04, 0xD2, 0x16, 0x2F]);
    }

    #[test]
    fn test_encode_startup_has_no_tag() {
        let msg = FrontendMessage::Startup {
            version: crate::protocol::constants::PROTOCOL_VERSION,
            params: vec![("user".into(), "app".into())],
        };
        let buf = encode_message(&msg);

        let len = i32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
        assert_eq!(len as usize, buf.len());
        assert_eq!(&buf[4..8], &[0, 3, 0, 0]);
        assert!(buf.ends_with(b"user\0app\0\0"));
    }

    #[test]
    fn test_encode_sasl_initial_response() {
        let msg = FrontendMessage::SaslInitialResponse {
            mechanism: "SCRAM-SHA-256".into(),
            data: b"n,,n=,r=abc".to_vec(),
        };
        let buf = encode_message(&msg);
        assert_eq!(buf[0], b'p');
        assert!(buf.ends_with(b"n,,n=,r=abc"));
    }
}

//! Wire session over one transport

use super::state::SessionState;
use super::tls::{SslMode, TlsConfig};
use super::transport::Transport;
use crate::auth::{ScramSha256, SCRAM_MECHANISM};
use crate::protocol::{
    constants, decode_message, encode_message, AuthenticationMessage, BackendMessage,
    FrontendMessage, TransactionStatus,
};
use crate::{Error, Result};
use bytes::{Buf, BytesMut};
use tracing::Instrument;

/// Parameters sent in the startup packet and used for authentication
#[derive(Debug, Clone)]
pub struct SessionParams {
    /// Role name
    pub user: String,
    /// Database name
    pub database: String,
    /// Password (optional)
    pub password: Option<String>,
    /// Extra run-time parameters (`application_name`, `search_path`, ...)
    pub options: Vec<(String, String)>,
    /// Transport security mode
    pub sslmode: SslMode,
}

impl SessionParams {
    /// Minimal parameters: plaintext, no password
    pub fn new(database: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            database: database.into(),
            password: None,
            options: Vec::new(),
            sslmode: SslMode::Disable,
        }
    }
}

/// One authenticated Postgres session
pub struct Connection {
    transport: Option<Transport>,
    state: SessionState,
    tx_status: TransactionStatus,
    read_buf: BytesMut,
    process_id: Option<i32>,
}

impl Connection {
    /// Create connection from transport
    pub fn new(transport: Transport) -> Self {
        Self {
            transport: Some(transport),
            state: SessionState::Initial,
            tx_status: TransactionStatus::Idle,
            read_buf: BytesMut::with_capacity(8192),
            process_id: None,
        }
    }

    /// Current session state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Transaction status from the last ReadyForQuery
    pub fn transaction_status(&self) -> TransactionStatus {
        self.tx_status
    }

    /// Backend process id, once startup finished
    pub fn process_id(&self) -> Option<i32> {
        self.process_id
    }

    /// Send SSLRequest and upgrade the transport if the server answers `S`
    async fn negotiate_tls(&mut self, tls_config: &TlsConfig, hostname: &str) -> Result<()> {
        self.state.transition(SessionState::NegotiatingTls)?;
        self.send_message(&FrontendMessage::SslRequest).await?;

        while self.read_buf.is_empty() {
            let transport = self.transport.as_mut().ok_or(Error::ConnectionClosed)?;
            if transport.read_buf(&mut self.read_buf).await? == 0 {
                return Err(Error::ConnectionClosed);
            }
        }
        let response = self.read_buf[0];
        self.read_buf.advance(1);

        match response {
            b'S' => {
                tracing::debug!("server accepted TLS, upgrading connection");
                let transport = self.transport.take().ok_or(Error::ConnectionClosed)?;
                self.transport = Some(transport.upgrade_to_tls(tls_config, hostname).await?);
                tracing::info!(mode = %tls_config.mode(), "TLS session established");
                Ok(())
            }
            b'N' => Err(Error::Tls(format!(
                "server does not support TLS (sslmode={})",
                tls_config.mode()
            ))),
            other => Err(Error::Protocol(format!(
                "unexpected SSLRequest response byte: 0x{:02X}",
                other
            ))),
        }
    }

    /// Perform startup and authentication
    pub async fn startup(
        &mut self,
        params: &SessionParams,
        tls_config: Option<&TlsConfig>,
        hostname: Option<&str>,
    ) -> Result<()> {
        let result = async {
            if params.sslmode.is_secure() {
                let tls = tls_config.ok_or_else(|| {
                    Error::Config(format!(
                        "sslmode={} requires a TLS profile but none was provided",
                        params.sslmode
                    ))
                })?;
                let host = hostname
                    .ok_or_else(|| Error::Config("TLS negotiation requires a hostname".into()))?;
                self.negotiate_tls(tls, host).await?;
            }

            self.state.transition(SessionState::AwaitingAuth)?;

            let mut startup_params = vec![
                ("user".to_string(), params.user.clone()),
                ("database".to_string(), params.database.clone()),
            ];
            startup_params.extend(params.options.iter().cloned());

            self.send_message(&FrontendMessage::Startup {
                version: constants::PROTOCOL_VERSION,
                params: startup_params,
            })
            .await?;

            self.state.transition(SessionState::Authenticating)?;
            self.authenticate(params).await?;

            self.state.transition(SessionState::Idle)?;
            tracing::debug!(process_id = ?self.process_id, "startup complete");
            Ok(())
        }
        .instrument(tracing::debug_span!(
            "startup",
            user = %params.user,
            database = %params.database
        ))
        .await;

        if result.is_err() {
            self.mark_broken();
        }
        result
    }

    /// Authentication loop, runs until the first ReadyForQuery
    async fn authenticate(&mut self, params: &SessionParams) -> Result<()> {
        let started = std::time::Instant::now();
        let mut mechanism = crate::metrics::labels::MECHANISM_TRUST;

        loop {
            match self.receive_message().await? {
                BackendMessage::Authentication(auth) => match auth {
                    AuthenticationMessage::Ok => {
                        tracing::debug!(mechanism, "authentication successful");
                        crate::metrics::counters::auth_successful(mechanism);
                        crate::metrics::histograms::auth_duration(
                            mechanism,
                            started.elapsed().as_millis() as u64,
                        );
                    }
                    AuthenticationMessage::CleartextPassword => {
                        mechanism = crate::metrics::labels::MECHANISM_CLEARTEXT;
                        crate::metrics::counters::auth_attempted(mechanism);
                        let password = required_password(params)?;
                        self.send_message(&FrontendMessage::Password(password.to_string()))
                            .await?;
                    }
                    AuthenticationMessage::Md5Password { .. } => {
                        return Err(Error::Authentication(
                            "MD5 authentication not supported. Use SCRAM-SHA-256 or cleartext password"
                                .into(),
                        ));
                    }
                    AuthenticationMessage::Sasl { mechanisms } => {
                        mechanism = crate::metrics::labels::MECHANISM_SCRAM;
                        crate::metrics::counters::auth_attempted(mechanism);
                        self.authenticate_scram(&mechanisms, params).await?;
                    }
                    other => {
                        return Err(Error::Protocol(format!(
                            "unexpected authentication message: {:?}",
                            other
                        )))
                    }
                },
                BackendMessage::BackendKeyData { process_id, .. } => {
                    self.process_id = Some(process_id);
                }
                BackendMessage::ParameterStatus { name, value } => {
                    tracing::trace!("parameter status: {} = {}", name, value);
                }
                BackendMessage::NoticeResponse(notice) => {
                    tracing::debug!(%notice, "notice during startup");
                }
                BackendMessage::ReadyForQuery { status } => {
                    self.tx_status = status;
                    return Ok(());
                }
                BackendMessage::ErrorResponse(err) => {
                    crate::metrics::counters::auth_failed(mechanism, "server_error");
                    return Err(Error::Authentication(err.to_string()));
                }
                other => {
                    return Err(Error::Protocol(format!(
                        "unexpected message during auth: {:?}",
                        other
                    )))
                }
            }
        }
    }

    /// SCRAM-SHA-256 exchange (SASLInitialResponse → SASLContinue → SASLResponse → SASLFinal)
    async fn authenticate_scram(
        &mut self,
        mechanisms: &[String],
        params: &SessionParams,
    ) -> Result<()> {
        if !mechanisms.iter().any(|m| m == SCRAM_MECHANISM) {
            return Err(Error::Authentication(format!(
                "server does not offer SCRAM-SHA-256. Available: {}",
                mechanisms.join(", ")
            )));
        }

        let mut scram = ScramSha256::new(required_password(params)?);
        self.send_message(&FrontendMessage::SaslInitialResponse {
            mechanism: SCRAM_MECHANISM.to_string(),
            data: scram.client_first().into_bytes(),
        })
        .await?;

        let server_first = match self.receive_message().await? {
            BackendMessage::Authentication(AuthenticationMessage::SaslContinue { data }) => data,
            BackendMessage::ErrorResponse(err) => {
                return Err(Error::Authentication(err.to_string()))
            }
            other => {
                return Err(Error::Protocol(format!(
                    "expected SASLContinue, got {:?}",
                    other
                )))
            }
        };
        let server_first = String::from_utf8(server_first)
            .map_err(|_| Error::Authentication("server-first message is not UTF-8".into()))?;

        let client_final = scram.client_final(&server_first)?;
        self.send_message(&FrontendMessage::SaslResponse {
            data: client_final.into_bytes(),
        })
        .await?;

        let server_final = match self.receive_message().await? {
            BackendMessage::Authentication(AuthenticationMessage::SaslFinal { data }) => data,
            BackendMessage::ErrorResponse(err) => {
                return Err(Error::Authentication(err.to_string()))
            }
            other => {
                return Err(Error::Protocol(format!(
                    "expected SASLFinal, got {:?}",
                    other
                )))
            }
        };
        let server_final = String::from_utf8(server_final)
            .map_err(|_| Error::Authentication("server-final message is not UTF-8".into()))?;

        scram.verify_server_final(&server_final)
    }

    /// Run a simple query and return every backend message up to and
    /// including ReadyForQuery.
    ///
    /// Server-side statement errors arrive as `ErrorResponse` in the list;
    /// only transport or protocol failures are returned as `Err`, and they
    /// leave the session broken.
    pub async fn simple_query(&mut self, query: &str) -> Result<Vec<BackendMessage>> {
        if !self.state.is_usable() {
            return Err(match self.state {
                SessionState::Broken | SessionState::Closed => Error::ConnectionClosed,
                other => Error::InvalidState {
                    expected: SessionState::Idle.to_string(),
                    actual: other.to_string(),
                },
            });
        }

        self.state.transition(SessionState::Busy)?;
        let result = self.exchange(query).await;
        match &result {
            Ok(_) => self.state.transition(SessionState::Idle)?,
            Err(_) => self.mark_broken(),
        }
        result
    }

    async fn exchange(&mut self, query: &str) -> Result<Vec<BackendMessage>> {
        self.send_message(&FrontendMessage::Query(query.to_string()))
            .await?;

        let mut messages = Vec::new();
        loop {
            let msg = self.receive_message().await?;
            if let BackendMessage::ReadyForQuery { status } = msg {
                self.tx_status = status;
                messages.push(msg);
                return Ok(messages);
            }
            messages.push(msg);
        }
    }

    fn transport_mut(&mut self) -> Result<&mut Transport> {
        self.transport.as_mut().ok_or(Error::ConnectionClosed)
    }

    fn mark_broken(&mut self) {
        if self.state.can_transition_to(SessionState::Broken) {
            self.state = SessionState::Broken;
        }
    }

    /// Send a frontend message
    async fn send_message(&mut self, msg: &FrontendMessage) -> Result<()> {
        let buf = encode_message(msg);
        self.transport_mut()?.send(&buf).await
    }

    /// Receive a backend message
    async fn receive_message(&mut self) -> Result<BackendMessage> {
        loop {
            match decode_message(&mut self.read_buf) {
                Ok((msg, consumed)) => {
                    self.read_buf.advance(consumed);
                    return Ok(msg);
                }
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {}
                Err(e) => return Err(Error::Protocol(e.to_string())),
            }

            let transport = self.transport.as_mut().ok_or(Error::ConnectionClosed)?;
            let n = transport.read_buf(&mut self.read_buf).await?;
            if n == 0 {
                return Err(Error::ConnectionClosed);
            }
        }
    }

    /// Send Terminate and shut the transport down
    pub async fn close(mut self) -> Result<()> {
        let was_usable = self.state.is_usable();
        self.state.transition(SessionState::Closed)?;
        if was_usable {
            let _ = self.send_message(&FrontendMessage::Terminate).await;
        }
        if let Some(transport) = self.transport.as_mut() {
            transport.shutdown().await?;
        }
        Ok(())
    }
}

fn required_password(params: &SessionParams) -> Result<&str> {
    params
        .password
        .as_deref()
        .ok_or_else(|| Error::Authentication("password required".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BufMut;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn frame(tag: u8, body: &[u8]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_u8(tag);
        buf.put_i32(body.len() as i32 + 4);
        buf.put_slice(body);
        buf.to_vec()
    }

    /// Accepts one client, trusts it, answers one query with a single row
    async fn fake_server(listener: TcpListener) {
        let (mut sock, _) = listener.accept().await.unwrap();

        let mut len = [0u8; 4];
        sock.read_exact(&mut len).await.unwrap();
        let mut startup = vec![0u8; i32::from_be_bytes(len) as usize - 4];
        sock.read_exact(&mut startup).await.unwrap();

        let mut reply = frame(b'R', &[0, 0, 0, 0]);
        reply.extend(frame(b'K', &[0, 0, 0, 7, 0, 0, 0, 1]));
        reply.extend(frame(b'Z', b"I"));
        sock.write_all(&reply).await.unwrap();

        let mut header = [0u8; 5];
        sock.read_exact(&mut header).await.unwrap();
        assert_eq!(header[0], b'Q');
        let body_len = i32::from_be_bytes([header[1], header[2], header[3], header[4]]) as usize;
        let mut body = vec![0u8; body_len - 4];
        sock.read_exact(&mut body).await.unwrap();

        let mut desc = BytesMut::new();
        desc.put_i16(1);
        desc.put_slice(b"one\0");
        desc.put_i32(0);
        desc.put_i16(0);
        desc.put_i32(23);
        desc.put_i16(4);
        desc.put_i32(-1);
        desc.put_i16(0);
        let mut row = BytesMut::new();
        row.put_i16(1);
        row.put_i32(1);
        row.put_slice(b"1");

        let mut reply = frame(b'T', &desc);
        reply.extend(frame(b'D', &row));
        reply.extend(frame(b'C', b"SELECT 1\0"));
        reply.extend(frame(b'Z', b"I"));
        sock.write_all(&reply).await.unwrap();
    }

    #[tokio::test]
    async fn test_startup_and_simple_query() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(fake_server(listener));

        let transport = Transport::connect_tcp("127.0.0.1", port, None).await.unwrap();
        let mut conn = Connection::new(transport);
        conn.startup(&SessionParams::new("postgres", "postgres"), None, None)
            .await
            .unwrap();
        assert_eq!(conn.state(), SessionState::Idle);
        assert_eq!(conn.process_id(), Some(7));

        let messages = conn.simple_query("SELECT 1").await.unwrap();
        assert_eq!(messages.len(), 4);
        assert!(matches!(messages[0], BackendMessage::RowDescription(_)));
        assert!(matches!(messages[3], BackendMessage::ReadyForQuery { .. }));
        assert_eq!(conn.transaction_status(), TransactionStatus::Idle);

        server.await.unwrap();
        let err = conn.simple_query("SELECT 1").await.unwrap_err();
        assert!(err.is_connection_error());
        assert_eq!(conn.state(), SessionState::Broken);
    }

    #[tokio::test]
    async fn test_secure_mode_requires_tls_profile() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let transport = Transport::connect_tcp("127.0.0.1", port, None).await.unwrap();
        let mut conn = Connection::new(transport);
        let mut params = SessionParams::new("postgres", "postgres");
        params.sslmode = SslMode::Require;

        let err = conn.startup(&params, None, None).await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert_eq!(conn.state(), SessionState::Broken);
    }
}

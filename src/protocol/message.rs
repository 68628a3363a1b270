//! Protocol message types

use super::constants::tx_status;
use bytes::Bytes;

/// Frontend message (client → server)
#[derive(Debug, Clone)]
pub enum FrontendMessage {
    /// Startup message
    Startup {
        /// Protocol version
        version: i32,
        /// Connection parameters
        params: Vec<(String, String)>,
    },

    /// Cleartext password
    Password(String),

    /// Simple query (may carry several `;`-separated statements)
    Query(String),

    /// Terminate message
    Terminate,

    /// SASL initial response
    SaslInitialResponse {
        /// SASL mechanism name
        mechanism: String,
        /// Client first message
        data: Vec<u8>,
    },

    /// SASL response
    SaslResponse {
        /// Client final message
        data: Vec<u8>,
    },

    /// SSLRequest (TLS negotiation)
    SslRequest,
}

/// Backend message (server → client)
#[derive(Debug, Clone)]
pub enum BackendMessage {
    /// Authentication request
    Authentication(AuthenticationMessage),

    /// Backend key data (for cancellation)
    BackendKeyData {
        /// Process ID
        process_id: i32,
        /// Secret key
        secret_key: i32,
    },

    /// Command complete with its tag (e.g. `INSERT 0 3`)
    CommandComplete(String),

    /// Data row, one entry per column, `None` for SQL NULL
    DataRow(Vec<Option<Bytes>>),

    /// Response to an empty query string
    EmptyQueryResponse,

    /// Error response
    ErrorResponse(ErrorFields),

    /// Notice response
    NoticeResponse(ErrorFields),

    /// Parameter status
    ParameterStatus {
        /// Parameter name
        name: String,
        /// Parameter value
        value: String,
    },

    /// Ready for query
    ReadyForQuery {
        /// Transaction status of the session
        status: TransactionStatus,
    },

    /// Row description
    RowDescription(Vec<FieldDescription>),
}

/// Authentication message types
#[derive(Debug, Clone)]
pub enum AuthenticationMessage {
    /// Authentication OK
    Ok,

    /// Cleartext password required
    CleartextPassword,

    /// MD5 password required
    Md5Password {
        /// Salt for MD5 hash
        salt: [u8; 4],
    },

    /// SASL mechanisms offered by the server
    Sasl {
        /// Mechanism names (e.g. `SCRAM-SHA-256`)
        mechanisms: Vec<String>,
    },

    /// SASL server challenge
    SaslContinue {
        /// Server first message
        data: Vec<u8>,
    },

    /// SASL server verification
    SaslFinal {
        /// Server final message
        data: Vec<u8>,
    },
}

/// Session transaction status reported by ReadyForQuery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionStatus {
    /// Not inside a transaction block
    #[default]
    Idle,
    /// Inside a transaction block
    InTransaction,
    /// Inside a failed transaction block
    Failed,
}

impl TransactionStatus {
    /// Map the status byte; unknown bytes are rejected by the decoder
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            tx_status::IDLE => Some(Self::Idle),
            tx_status::IN_TRANSACTION => Some(Self::InTransaction),
            tx_status::FAILED => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Field description (column metadata)
#[derive(Debug, Clone)]
pub struct FieldDescription {
    /// Column name
    pub name: String,
    /// Table OID (0 if not a table column)
    pub table_oid: i32,
    /// Column attribute number (0 if not a table column)
    pub column_attr: i16,
    /// Data type OID
    pub type_oid: u32,
    /// Data type size
    pub type_size: i16,
    /// Type modifier
    pub type_modifier: i32,
    /// Format code (0 = text, 1 = binary)
    pub format_code: i16,
}

/// Error/notice fields
#[derive(Debug, Clone, Default)]
pub struct ErrorFields {
    /// Severity (ERROR, FATAL, ...)
    pub severity: Option<String>,
    /// SQLSTATE code
    pub code: Option<String>,
    /// Human-readable message
    pub message: Option<String>,
    /// Additional detail
    pub detail: Option<String>,
    /// Hint
    pub hint: Option<String>,
}

impl ErrorFields {
    /// FATAL/PANIC errors end the session
    pub fn is_fatal(&self) -> bool {
        matches!(self.severity.as_deref(), Some("FATAL") | Some("PANIC"))
    }
}

impl std::fmt::Display for ErrorFields {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.message {
            Some(msg) => write!(f, "{}", msg)?,
            None => write!(f, "unknown server error")?,
        }
        if let Some(code) = &self.code {
            write!(f, " ({})", code)?;
        }
        if let Some(detail) = &self.detail {
            write!(f, ": {}", detail)?;
        }
        Ok(())
    }
}

//! Postgres protocol constants

/// Protocol version 3.0
pub const PROTOCOL_VERSION: i32 = 0x0003_0000;

/// SSLRequest code (80877103 = 1234 << 16 | 5679)
pub const SSL_REQUEST_CODE: i32 = 0x04D2_162F;

/// Backend message type tags
pub mod tags {
    /// Authentication request
    pub const AUTHENTICATION: u8 = b'R';
    /// Backend key data
    pub const BACKEND_KEY_DATA: u8 = b'K';
    /// Command complete
    pub const COMMAND_COMPLETE: u8 = b'C';
    /// Data row
    pub const DATA_ROW: u8 = b'D';
    /// Empty query response
    pub const EMPTY_QUERY_RESPONSE: u8 = b'I';
    /// Error response
    pub const ERROR_RESPONSE: u8 = b'E';
    /// Notice response
    pub const NOTICE_RESPONSE: u8 = b'N';
    /// Parameter status
    pub const PARAMETER_STATUS: u8 = b'S';
    /// Ready for query
    pub const READY_FOR_QUERY: u8 = b'Z';
    /// Row description
    pub const ROW_DESCRIPTION: u8 = b'T';
}

/// Frontend message type tags
pub mod frontend {
    /// Password / SASL response
    pub const PASSWORD: u8 = b'p';
    /// Simple query
    pub const QUERY: u8 = b'Q';
    /// Terminate
    pub const TERMINATE: u8 = b'X';
}

/// Authentication request codes
pub mod auth {
    /// Authentication successful
    pub const OK: i32 = 0;
    /// Cleartext password required
    pub const CLEARTEXT_PASSWORD: i32 = 3;
    /// MD5 password required
    pub const MD5_PASSWORD: i32 = 5;
    /// SASL mechanisms available (Postgres 10+)
    pub const SASL: i32 = 10;
    /// SASL server challenge
    pub const SASL_CONTINUE: i32 = 11;
    /// SASL server final message
    pub const SASL_FINAL: i32 = 12;
}

/// Transaction status bytes carried by ReadyForQuery
pub mod tx_status {
    /// Idle (not in transaction)
    pub const IDLE: u8 = b'I';
    /// In transaction block
    pub const IN_TRANSACTION: u8 = b'T';
    /// Failed transaction (queries rejected until the block ends)
    pub const FAILED: u8 = b'E';
}

/// Type OIDs the row decoder understands
pub mod oid {
    /// boolean
    pub const BOOL: u32 = 16;
    /// bytea
    pub const BYTEA: u32 = 17;
    /// bigint
    pub const INT8: u32 = 20;
    /// smallint
    pub const INT2: u32 = 21;
    /// integer
    pub const INT4: u32 = 23;
    /// oid
    pub const OID: u32 = 26;
    /// real
    pub const FLOAT4: u32 = 700;
    /// double precision
    pub const FLOAT8: u32 = 701;
}

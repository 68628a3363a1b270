//! Postgres frontend/backend protocol (simple-query subset)
//!
//! Only what a single supervised session needs: startup, authentication,
//! simple queries and termination.

pub mod constants;
pub mod decode;
pub mod encode;
pub mod message;

pub use decode::decode_message;
pub use encode::encode_message;
pub use message::{
    AuthenticationMessage, BackendMessage, ErrorFields, FieldDescription, FrontendMessage,
    TransactionStatus,
};

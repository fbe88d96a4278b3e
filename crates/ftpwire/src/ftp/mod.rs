//! # ftpwire: FTP / explicit FTPS client
//!
//! Implementation of the FTP protocol (RFC 959) with extensions:
//! - **RFC 4217** — AUTH TLS, PBSZ/PROT, CCC
//! - **RFC 2428** — EPSV / EPRT (IPv6-ready)
//! - **RFC 3659** — SIZE, REST, MLSD
//!
//! Architecture:
//! - `types` — config, session state, reply model
//! - `error` — FTP-specific error type
//! - `protocol` — low-level command/response codec
//! - `connection` — TCP connect/listen and timeouts
//! - `tls` — rustls configuration, AUTH TLS upgrade, CCC downgrade
//! - `client` — stateful session (connect, login, TLS overlay, ABOR, QUIT)
//! - `parser` — 227/229/150/257 extractors and MLSD facts
//! - `transfer` — data channel negotiation (PASV/EPSV/PORT/EPRT)
//! - `file_ops` — binary/line transfer engine, download/upload, FXP copy
//! - `directory` — cwd, mkd, rmd, rename, delete, size, listings

pub mod types;
pub mod error;
pub mod protocol;
pub mod connection;
pub mod tls;
pub mod client;
pub mod parser;
pub mod transfer;
pub mod file_ops;
pub mod directory;

pub use client::FtpClient;
pub use error::{FtpError, FtpErrorKind, FtpResult};
pub use file_ops::copy_between;
pub use parser::{MlsdEntries, MlsdEntry, MlsdKind};
pub use transfer::{DataConnection, DataStream};
pub use types::*;

//! **ftpwire**: async FTP client with an explicit FTPS (AUTH TLS) overlay.
//!
//! ```no_run
//! # async fn demo() -> ftpwire::FtpResult<()> {
//! use ftpwire::{FtpClient, FtpConnectionConfig};
//!
//! let mut ftp = FtpClient::new(FtpConnectionConfig::new("ftp.example.com", 21));
//! ftp.connect().await?;
//! ftp.login("", "", "").await?;
//! let mut data = Vec::new();
//! ftp.retrieve_binary("RETR README", None, |chunk| {
//!     data.extend_from_slice(chunk);
//!     Ok(())
//! })
//! .await?;
//! ftp.quit().await?;
//! # Ok(())
//! # }
//! ```

pub mod ftp;

pub use ftp::*;

//! Low-level FTP command/response codec (RFC 959 §4).
//!
//! Handles:
//! - Sending FTP commands terminated with `\r\n`
//! - Reading single-line and multi-line replies, tolerant of bare CR/LF
//! - Parsing and classifying the 3-digit reply code
//! - Out-of-band delivery for `ABOR`

use crate::ftp::connection::with_timeout;
use crate::ftp::error::{FtpError, FtpErrorKind, FtpResult};
use crate::ftp::types::{FtpResponse, ReplyClass, TextEncoding};
use socket2::SockRef;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;

/// How long to wait for the LF half of a CRLF split across reads.
const LF_GRACE: Duration = Duration::from_millis(250);

/// Plain TCP or TLS-wrapped control stream.
pub enum ControlStream {
    Plain(BufReader<TcpStream>),
    Tls(BufReader<TlsStream<TcpStream>>),
}

/// One physical line read off a stream.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct RawLine {
    pub bytes: Vec<u8>,
    /// False when the stream ended before CR or LF.
    pub terminated: bool,
}

/// Read one line. CRLF and bare LF always end a line; a bare CR does so
/// only with `cr_terminates` (the control channel). Without it, one CR
/// right before the LF is stripped and any other CR is line content.
///
/// `skip_lf` carries a CR seen at the end of the previous buffer so the
/// LF of a split CRLF is not reported as an empty line. Returns `None` on
/// a clean end-of-stream.
pub(crate) async fn read_bounded_line<R>(
    reader: &mut R,
    skip_lf: &mut bool,
    max_len: usize,
    cr_terminates: bool,
) -> FtpResult<Option<RawLine>>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    loop {
        let (consumed, done) = {
            let available = reader.fill_buf().await?;
            if available.is_empty() {
                if line.is_empty() {
                    return Ok(None);
                }
                return Ok(Some(RawLine {
                    bytes: line,
                    terminated: false,
                }));
            }
            if *skip_lf {
                *skip_lf = false;
                if available[0] == b'\n' {
                    (1, false)
                } else {
                    (0, false)
                }
            } else {
                let end = if cr_terminates {
                    available.iter().position(|&b| b == b'\r' || b == b'\n')
                } else {
                    available.iter().position(|&b| b == b'\n')
                };
                match end {
                    Some(i) => {
                        line.extend_from_slice(&available[..i]);
                        if available[i] == b'\n' && line.last() == Some(&b'\r') {
                            line.pop();
                        }
                        let mut used = i + 1;
                        if available[i] == b'\r' {
                            match available.get(i + 1) {
                                Some(b'\n') => used += 1,
                                Some(_) => {}
                                None => *skip_lf = true,
                            }
                        }
                        (used, true)
                    }
                    None => {
                        line.extend_from_slice(available);
                        (available.len(), false)
                    }
                }
            }
        };
        reader.consume(consumed);
        if line.len() > max_len {
            return Err(FtpError::protocol_error(format!(
                "line too long: got more than {} bytes",
                max_len
            )));
        }
        if done {
            return Ok(Some(RawLine {
                bytes: line,
                terminated: true,
            }));
        }
    }
}

/// Parse the 3-digit reply code from the start of a line.
fn parse_code(line: &str) -> FtpResult<u16> {
    let head = line.as_bytes().get(..3).ok_or_else(|| {
        FtpError::protocol_error(format!("reply too short to contain a code: '{}'", line))
    })?;
    if !head.iter().all(u8::is_ascii_digit) {
        return Err(FtpError::protocol_error(format!(
            "invalid reply code in: '{}'",
            line
        )));
    }
    let code = (head[0] - b'0') as u16 * 100 + (head[1] - b'0') as u16 * 10 + (head[2] - b'0') as u16;
    ReplyClass::from_code(code)
        .map_err(|_| FtpError::protocol_error(format!("malformed reply: '{}'", line)))?;
    Ok(code)
}

/// Mask the argument of credential-bearing commands for logging.
pub(crate) fn sanitize(cmd: &str) -> String {
    let upper = cmd.get(..5).map(|s| s.to_ascii_uppercase());
    match upper.as_deref() {
        Some("PASS ") | Some("ACCT ") => format!("{}{}", &cmd[..5], "*".repeat(cmd.len() - 5)),
        _ => cmd.to_string(),
    }
}

/// Codec settings that survive a change of the underlying stream.
#[derive(Debug, Clone, Copy)]
pub(crate) struct CodecOptions {
    encoding: TextEncoding,
    max_line: usize,
    timeout: Option<Duration>,
}

impl CodecOptions {
    pub(crate) fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

/// The FTP command/response codec over one control connection.
pub struct FtpCodec {
    stream: ControlStream,
    skip_lf: bool,
    encoding: TextEncoding,
    max_line: usize,
    timeout: Option<Duration>,
}

impl FtpCodec {
    /// Create a codec from a plain TCP stream.
    pub fn from_tcp(
        stream: TcpStream,
        encoding: TextEncoding,
        max_line: usize,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            stream: ControlStream::Plain(BufReader::new(stream)),
            skip_lf: false,
            encoding,
            max_line,
            timeout,
        }
    }

    /// Split off the stream so it can be rewrapped (TLS upgrade or CCC).
    pub(crate) fn into_parts(self) -> (ControlStream, CodecOptions) {
        let opts = CodecOptions {
            encoding: self.encoding,
            max_line: self.max_line,
            timeout: self.timeout,
        };
        (self.stream, opts)
    }

    pub(crate) fn from_parts(stream: ControlStream, opts: CodecOptions) -> Self {
        Self {
            stream,
            skip_lf: false,
            encoding: opts.encoding,
            max_line: opts.max_line,
            timeout: opts.timeout,
        }
    }

    async fn write_raw(&mut self, bytes: &[u8]) -> FtpResult<()> {
        let limit = self.timeout;
        match &mut self.stream {
            ControlStream::Plain(r) => {
                let w = r.get_mut();
                with_timeout(limit, "control write", async {
                    w.write_all(bytes).await?;
                    w.flush().await
                })
                .await
            }
            ControlStream::Tls(r) => {
                let w = r.get_mut();
                with_timeout(limit, "control write", async {
                    w.write_all(bytes).await?;
                    w.flush().await
                })
                .await
            }
        }
    }

    /// Send a raw FTP command (CRLF is appended here).
    pub async fn send_command(&mut self, cmd: &str) -> FtpResult<()> {
        if cmd.contains('\r') || cmd.contains('\n') {
            return Err(FtpError::invalid_config("command must not contain CR or LF"));
        }
        let mut line = self.encoding.encode(cmd)?;
        line.extend_from_slice(b"\r\n");
        self.write_raw(&line).await?;
        log::trace!(">>> {}", sanitize(cmd));
        Ok(())
    }

    /// Send `bytes` as TCP urgent data when the control channel is a plain
    /// socket; TLS channels and failed OOB sends use an ordinary write.
    pub async fn send_urgent(&mut self, bytes: &[u8]) -> FtpResult<()> {
        if let ControlStream::Plain(r) = &self.stream {
            match SockRef::from(r.get_ref()).send_out_of_band(bytes) {
                Ok(n) if n == bytes.len() => {
                    log::trace!(">>> (urgent) {}", String::from_utf8_lossy(bytes).trim_end());
                    return Ok(());
                }
                Ok(n) => {
                    log::debug!("urgent send wrote {} of {} bytes, finishing in-band", n, bytes.len());
                    return self.write_raw(&bytes[n..]).await;
                }
                Err(e) => log::debug!("urgent send unavailable ({}), sending in-band", e),
            }
        }
        self.write_raw(bytes).await
    }

    /// Read a single physical line, terminator stripped.
    async fn read_line(&mut self) -> FtpResult<String> {
        let limit = self.timeout;
        let max = self.max_line;
        let skip_lf = &mut self.skip_lf;
        let raw = match &mut self.stream {
            ControlStream::Plain(r) => {
                with_timeout(limit, "control read", read_bounded_line(r, skip_lf, max, true)).await?
            }
            ControlStream::Tls(r) => {
                with_timeout(limit, "control read", read_bounded_line(r, skip_lf, max, true)).await?
            }
        };
        match raw {
            Some(RawLine {
                bytes,
                terminated: true,
            }) => Ok(self.encoding.decode(&bytes)),
            _ => Err(FtpError::connection_closed("server closed the control connection")),
        }
    }

    /// Read a complete FTP reply (possibly multi-line).
    ///
    /// Multi-line replies look like:
    /// ```text
    /// 220-Welcome to my FTP server
    /// 220-This is line 2
    /// 220 End of greeting
    /// ```
    /// Only a line starting with the opening code and not followed by `-`
    /// closes the reply; every other line is continuation text.
    pub async fn read_response(&mut self) -> FtpResult<FtpResponse> {
        let first = self.read_line().await?;
        let code = parse_code(&first)?;
        let is_multi = first.as_bytes().get(3) == Some(&b'-');
        let mut lines = vec![first];

        if is_multi {
            let opener = lines[0][..3].to_string();
            loop {
                let next = self.read_line().await?;
                let closes = next.starts_with(&opener) && next.as_bytes().get(3) != Some(&b'-');
                lines.push(next);
                if closes {
                    break;
                }
            }
        }

        let resp = FtpResponse { code, lines };
        log::trace!("<<< {}", resp.text());
        Ok(resp)
    }

    /// Consume an LF still pending from a CR that ended the last buffer.
    ///
    /// Waits at most `LF_GRACE`: a server that ends lines with a bare CR
    /// sends nothing more here.
    pub(crate) async fn drain_pending_lf(&mut self) -> FtpResult<()> {
        if !self.skip_lf {
            return Ok(());
        }
        self.skip_lf = false;
        let peeked = match &mut self.stream {
            ControlStream::Plain(r) => with_timeout(Some(LF_GRACE), "control read", r.fill_buf())
                .await
                .map(|b| b.first() == Some(&b'\n')),
            ControlStream::Tls(r) => with_timeout(Some(LF_GRACE), "control read", r.fill_buf())
                .await
                .map(|b| b.first() == Some(&b'\n')),
        };
        match peeked {
            Ok(true) => match &mut self.stream {
                ControlStream::Plain(r) => r.consume(1),
                ControlStream::Tls(r) => r.consume(1),
            },
            Ok(false) => {}
            Err(e) if e.kind == FtpErrorKind::Timeout => {}
            Err(e) => return Err(e),
        }
        Ok(())
    }

    /// Shut the control stream down (TLS close_notify first when wrapped).
    pub async fn shutdown(&mut self) -> FtpResult<()> {
        let limit = self.timeout;
        match &mut self.stream {
            ControlStream::Plain(r) => with_timeout(limit, "control shutdown", r.get_mut().shutdown()).await,
            ControlStream::Tls(r) => with_timeout(limit, "control shutdown", r.get_mut().shutdown()).await,
        }
    }
}

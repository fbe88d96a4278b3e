//! Transfer engine: binary and line transfers over a negotiated data
//! connection, the file-level download/upload helpers, and server-to-server
//! copy.
//!
//! Every transfer ends the same way: the data connection is shut down
//! (TLS close_notify first when wrapped) and the final reply is read from
//! the control channel. On any error the data connection is dropped,
//! which closes it.

use crate::ftp::client::FtpClient;
use crate::ftp::connection::with_timeout;
use crate::ftp::error::{FtpError, FtpResult};
use crate::ftp::parser;
use crate::ftp::protocol::read_bounded_line;
use crate::ftp::transfer::{port_argument, DataConnection};
use crate::ftp::types::{FtpResponse, TransferType};
use log::debug;
use tokio::fs;
use tokio::io::{AsyncBufRead, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Splits `a/b/c` into (`a/b`, `c`); `/c` gives (`/`, `c`).
pub fn split_remote_path(path: &str) -> (&str, &str) {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rsplit_once('/') {
        Some(("", name)) => ("/", name),
        Some((dir, name)) => (dir, name),
        None => ("", trimmed),
    }
}

impl FtpClient {
    /// Close a data connection handed out by `transfer_command` and read
    /// the final reply. The peer may already have closed its side, so a
    /// failed shutdown is only logged.
    pub async fn finish_transfer(&mut self, conn: DataConnection) -> FtpResult<FtpResponse> {
        let mut stream = conn.stream;
        if let Err(e) = with_timeout(self.config.timeout(), "data shutdown", stream.shutdown()).await {
            debug!("data channel shutdown: {}", e);
        }
        drop(stream);
        self.void_response().await
    }

    /// After an upload the shutdown must reach the server (it ends the
    /// file, and under TLS carries close_notify), so failures propagate.
    async fn finish_store(&mut self, conn: DataConnection) -> FtpResult<FtpResponse> {
        let mut stream = conn.stream;
        with_timeout(self.config.timeout(), "data shutdown", stream.shutdown()).await?;
        drop(stream);
        self.void_response().await
    }

    // ─── Binary ──────────────────────────────────────────────────

    /// `TYPE I`, then hand every received block to `on_chunk`.
    pub async fn retrieve_binary<F>(&mut self, cmd: &str, rest: Option<u64>, mut on_chunk: F) -> FtpResult<FtpResponse>
    where
        F: FnMut(&[u8]) -> FtpResult<()>,
    {
        self.void_command(TransferType::Binary.command()).await?;
        let mut conn = self.transfer_command(cmd, rest).await?;
        let limit = self.config.timeout();
        let mut buf = vec![0u8; self.config.block_size.max(1)];

        loop {
            let n = with_timeout(limit, "data read", conn.stream.read(&mut buf)).await?;
            if n == 0 {
                break;
            }
            on_chunk(&buf[..n])?;
            self.bytes_downloaded += n as u64;
        }
        self.finish_transfer(conn).await
    }

    /// `TYPE I`, then copy every received block into `sink`.
    pub async fn retrieve_into<W>(&mut self, cmd: &str, rest: Option<u64>, sink: &mut W) -> FtpResult<u64>
    where
        W: AsyncWrite + Unpin,
    {
        self.void_command(TransferType::Binary.command()).await?;
        let mut conn = self.transfer_command(cmd, rest).await?;
        let limit = self.config.timeout();
        let mut buf = vec![0u8; self.config.block_size.max(1)];
        let mut total = 0u64;

        loop {
            let n = with_timeout(limit, "data read", conn.stream.read(&mut buf)).await?;
            if n == 0 {
                break;
            }
            sink.write_all(&buf[..n]).await?;
            total += n as u64;
            self.bytes_downloaded += n as u64;
        }
        sink.flush().await?;
        self.finish_transfer(conn).await?;
        Ok(total)
    }

    /// `TYPE I`, then send `source` to the end in blocks. `on_block` sees
    /// each block after it has been written.
    pub async fn store_binary<R, F>(
        &mut self,
        cmd: &str,
        source: &mut R,
        rest: Option<u64>,
        mut on_block: F,
    ) -> FtpResult<FtpResponse>
    where
        R: AsyncRead + Unpin,
        F: FnMut(&[u8]) -> FtpResult<()>,
    {
        self.void_command(TransferType::Binary.command()).await?;
        let mut conn = self.transfer_command(cmd, rest).await?;
        let limit = self.config.timeout();
        let mut buf = vec![0u8; self.config.block_size.max(1)];

        loop {
            let n = source.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            with_timeout(limit, "data write", conn.stream.write_all(&buf[..n])).await?;
            self.bytes_uploaded += n as u64;
            on_block(&buf[..n])?;
        }
        self.finish_store(conn).await
    }

    // ─── Lines ───────────────────────────────────────────────────

    /// `TYPE A`, then hand each line to `on_line` with its LF or CRLF
    /// stripped. A CR elsewhere in the line is kept.
    pub async fn retrieve_lines<F>(&mut self, cmd: &str, mut on_line: F) -> FtpResult<FtpResponse>
    where
        F: FnMut(String) -> FtpResult<()>,
    {
        self.void_command(TransferType::Ascii.command()).await?;
        let conn = self.transfer_command(cmd, None).await?;
        let limit = self.config.timeout();
        let max = self.config.max_line_len;
        let encoding = self.config.encoding;
        let expected_size = conn.expected_size;
        let mut reader = BufReader::new(conn.stream);
        let mut skip_lf = false;

        while let Some(line) = with_timeout(
            limit,
            "data read",
            read_bounded_line(&mut reader, &mut skip_lf, max, false),
        )
        .await?
        {
            self.bytes_downloaded += line.bytes.len() as u64;
            on_line(encoding.decode(&line.bytes))?;
        }

        let conn = DataConnection {
            stream: reader.into_inner(),
            expected_size,
        };
        self.finish_transfer(conn).await
    }

    /// `TYPE A`, then send every line of `source` ending in CRLF. Lines
    /// are split at LF; a local CRLF or a missing terminator on the last
    /// line both become CRLF.
    pub async fn store_lines<R>(&mut self, cmd: &str, source: &mut R) -> FtpResult<FtpResponse>
    where
        R: AsyncBufRead + Unpin,
    {
        self.void_command(TransferType::Ascii.command()).await?;
        let mut conn = self.transfer_command(cmd, None).await?;
        let limit = self.config.timeout();
        let max = self.config.max_line_len;
        let mut skip_lf = false;

        while let Some(line) = read_bounded_line(source, &mut skip_lf, max, false).await? {
            let mut wire = line.bytes;
            wire.extend_from_slice(b"\r\n");
            with_timeout(limit, "data write", conn.stream.write_all(&wire)).await?;
            self.bytes_uploaded += wire.len() as u64;
        }
        self.finish_store(conn).await
    }

    // ─── Files ───────────────────────────────────────────────────

    /// Download `remote` into `local_path`. With `rest` the local file is
    /// appended to, starting at that remote offset.
    pub async fn download(&mut self, remote: &str, local_path: &str, rest: Option<u64>) -> FtpResult<u64> {
        let mut file = match rest {
            Some(_) => {
                fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(local_path)
                    .await?
            }
            None => fs::File::create(local_path).await?,
        };
        let n = self
            .retrieve_into(&format!("RETR {}", remote), rest, &mut file)
            .await?;
        file.sync_all().await?;
        debug!("downloaded {} bytes from {} to {}", n, remote, local_path);
        Ok(n)
    }

    /// Upload `local_path`. A directory part in `remote` is entered with
    /// `cwd` first; an empty `remote` uses the local file name.
    pub async fn upload(&mut self, local_path: &str, remote: &str, rest: Option<u64>) -> FtpResult<u64> {
        let (dir, mut name) = split_remote_path(remote);
        if !dir.is_empty() {
            self.cwd(dir).await?;
        }
        if name.is_empty() {
            name = split_remote_path(local_path).1;
        }
        if name.is_empty() {
            return Err(FtpError::invalid_config("no remote file name to upload to"));
        }

        let mut file = fs::File::open(local_path).await?;
        if let Some(offset) = rest {
            use tokio::io::AsyncSeekExt;
            file.seek(std::io::SeekFrom::Start(offset)).await?;
        }
        let mut n = 0u64;
        self.store_binary(&format!("STOR {}", name), &mut file, rest, |block| {
            n += block.len() as u64;
            Ok(())
        })
        .await?;
        debug!("uploaded {} bytes from {} to {}", n, local_path, name);
        Ok(n)
    }
}

/// Server-to-server copy: `target` connects to a passive port opened by
/// `source`, so no data passes through this process.
///
/// An empty `target_name` keeps `source_name`.
pub async fn copy_between(
    source: &mut FtpClient,
    source_name: &str,
    target: &mut FtpClient,
    target_name: &str,
    transfer_type: TransferType,
) -> FtpResult<()> {
    let target_name = if target_name.is_empty() { source_name } else { target_name };

    source.void_command(transfer_type.command()).await?;
    target.void_command(transfer_type.command()).await?;

    let resp = source.send_command("PASV").await?;
    let (ip, port) = parser::parse_pasv(&resp.text())?;
    target
        .void_command(&format!("PORT {}", port_argument(ip, port)))
        .await?;

    // The target must be listening before the source starts sending.
    let treply = target.send_command(&format!("STOR {}", target_name)).await?;
    if !matches!(treply.code, 125 | 150) {
        return Err(FtpError::bad_reply(&treply, "target refused STOR"));
    }
    let sreply = source.send_command(&format!("RETR {}", source_name)).await?;
    if !matches!(sreply.code, 125 | 150) {
        return Err(FtpError::bad_reply(&sreply, "source refused RETR"));
    }

    source.void_response().await?;
    target.void_response().await?;
    Ok(())
}

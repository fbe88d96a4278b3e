//! Directory operations: cwd, pwd, mkd, rmd, rename, delete, size, and
//! the NLST / LIST / MLSD listings.

use crate::ftp::client::FtpClient;
use crate::ftp::error::{FtpError, FtpResult};
use crate::ftp::parser::{self, MlsdEntries};
use crate::ftp::types::FtpResponse;

/// Joins a verb with its optional argument.
fn with_arg(verb: &str, arg: Option<&str>) -> String {
    match arg {
        Some(a) if !a.is_empty() => format!("{} {}", verb, a),
        _ => verb.to_string(),
    }
}

impl FtpClient {
    // ─── CWD / PWD ───────────────────────────────────────────────

    /// Change directory. `..` is sent as `CDUP`; a plain `500` to that is
    /// taken as "already at the top". An empty name means `.`.
    pub async fn cwd(&mut self, dirname: &str) -> FtpResult<()> {
        if dirname == ".." {
            let resp = self.send_command("CDUP").await?;
            if resp.is_completion() || resp.code == 500 {
                return Ok(());
            }
            return Err(FtpError::rejected(&resp));
        }
        let dirname = if dirname.is_empty() { "." } else { dirname };
        self.void_command(&format!("CWD {}", dirname)).await?;
        Ok(())
    }

    /// Current directory, or an empty string when a 2xx reply is not `257`.
    pub async fn pwd(&mut self) -> FtpResult<String> {
        let resp = self.void_command("PWD").await?;
        Ok(if resp.code == 257 {
            parser::parse_pathname(&resp.lines[0])
        } else {
            String::new()
        })
    }

    // ─── MKD / RMD ───────────────────────────────────────────────

    /// Create a directory; returns the server's name for it (may be empty).
    pub async fn mkd(&mut self, dirname: &str) -> FtpResult<String> {
        let resp = self.void_command(&format!("MKD {}", dirname)).await?;
        Ok(if resp.code == 257 {
            parser::parse_pathname(&resp.lines[0])
        } else {
            String::new()
        })
    }

    pub async fn rmd(&mut self, dirname: &str) -> FtpResult<()> {
        self.void_command(&format!("RMD {}", dirname)).await?;
        Ok(())
    }

    // ─── RNFR/RNTO ───────────────────────────────────────────────

    /// Rename `from` to `to`.
    pub async fn rename(&mut self, from: &str, to: &str) -> FtpResult<()> {
        let resp = self.send_command(&format!("RNFR {}", from)).await?;
        if !resp.is_intermediate() {
            return Err(FtpError::rejected(&resp));
        }
        self.void_command(&format!("RNTO {}", to)).await?;
        Ok(())
    }

    // ─── DELE ────────────────────────────────────────────────────

    /// Delete a file. Only `250` and `200` count as success.
    pub async fn delete(&mut self, filename: &str) -> FtpResult<()> {
        let resp = self.send_command(&format!("DELE {}", filename)).await?;
        match resp.code {
            250 | 200 => Ok(()),
            _ => Err(FtpError::rejected(&resp)),
        }
    }

    // ─── SIZE ────────────────────────────────────────────────────

    /// File size from a `213` reply; `None` for any other answer.
    pub async fn size(&mut self, filename: &str) -> FtpResult<Option<u64>> {
        let resp = self.send_command(&format!("SIZE {}", filename)).await?;
        if resp.code != 213 {
            return Ok(None);
        }
        let value = resp.lines[0].get(3..).unwrap_or("").trim();
        value
            .parse::<u64>()
            .map(Some)
            .map_err(|_| FtpError::bad_reply(&resp, "unparseable SIZE reply"))
    }

    // ─── Listings ────────────────────────────────────────────────

    /// Names from `NLST`.
    pub async fn nlst(&mut self, path: Option<&str>) -> FtpResult<Vec<String>> {
        self.retrieve_lines_vec(&with_arg("NLST", path)).await
    }

    /// Raw `LIST` output, exactly as the server formats it, one line per
    /// call of `on_line`.
    pub async fn dir<F>(&mut self, path: Option<&str>, on_line: F) -> FtpResult<FtpResponse>
    where
        F: FnMut(String) -> FtpResult<()>,
    {
        self.retrieve_lines(&with_arg("LIST", path), on_line).await
    }

    /// `MLSD` entries. Non-empty `facts` are announced with `OPTS MLST`.
    pub async fn mlsd(&mut self, path: Option<&str>, facts: &[&str]) -> FtpResult<MlsdEntries> {
        if !facts.is_empty() {
            self.void_command(&format!("OPTS MLST {};", facts.join(";")))
                .await?;
        }
        let lines = self.retrieve_lines_vec(&with_arg("MLSD", path)).await?;
        Ok(MlsdEntries::new(lines))
    }

    async fn retrieve_lines_vec(&mut self, cmd: &str) -> FtpResult<Vec<String>> {
        let mut lines = Vec::new();
        self.retrieve_lines(cmd, |line| {
            lines.push(line);
            Ok(())
        })
        .await?;
        Ok(lines)
    }
}

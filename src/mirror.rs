//! Incremental mirroring of a remote directory tree.
//!
//! The walk lists each remote directory with MLSD facts, recurses into
//! directories and downloads files whose local copy is missing or stale.
//! Per-file failures are logged and recorded in the [`SyncReport`]; a partial
//! mirror is a valid result.

use std::fs::{self, File};
use std::io::{self, ErrorKind, Write};
use std::path::Path;
use std::thread;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;
use suppaftp::types::FileType;
use suppaftp::{FtpError, FtpStream, Mode, Status};

use crate::config::RetryPolicy;
use crate::error::TaxrefError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Dir,
    /// A symlink the server presents as a file. It may still point at a directory.
    Symlink,
    CurrentDir,
    ParentDir,
    Other,
}

impl EntryKind {
    fn from_fact(value: &str) -> Self {
        let value = value.to_ascii_lowercase();
        match value.as_str() {
            "file" => EntryKind::File,
            "dir" => EntryKind::Dir,
            "cdir" => EntryKind::CurrentDir,
            "pdir" => EntryKind::ParentDir,
            other if other.starts_with("os.unix=symlink") || other.starts_with("os.unix=slink") => {
                EntryKind::Symlink
            }
            _ => EntryKind::Other,
        }
    }
}

/// One entry of a remote directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub name: String,
    pub kind: EntryKind,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
}

impl RemoteEntry {
    /// Parses an MLSD line such as
    /// `type=file;size=1024;modify=20240125225739;perm=r; taxid.list`.
    pub fn parse_mlsd(line: &str) -> Option<Self> {
        let line = line.trim_end_matches(['\r', '\n']);
        let (facts, name) = line.split_once(' ')?;
        if name.is_empty() {
            return None;
        }

        let mut kind = EntryKind::Other;
        let mut size = 0;
        let mut modified = None;
        for fact in facts.split(';').filter(|fact| !fact.is_empty()) {
            let Some((key, value)) = fact.split_once('=') else {
                continue;
            };
            match key.to_ascii_lowercase().as_str() {
                "type" => kind = EntryKind::from_fact(value),
                "size" | "sizd" => size = value.parse().unwrap_or(0),
                "modify" => modified = parse_timestamp(value),
                _ => {}
            }
        }

        Some(Self {
            name: name.to_string(),
            kind,
            size,
            modified,
        })
    }
}

/// Parses an MLSD `YYYYMMDDHHMMSS[.sss]` timestamp as UTC.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let digits = value.get(..14)?;
    NaiveDateTime::parse_from_str(digits, "%Y%m%d%H%M%S")
        .ok()
        .map(|dt| dt.and_utc())
}

/// Decides whether `local` must be (re)downloaded for `entry`.
///
/// A path whose metadata cannot be read (missing, or a parent that is not a
/// directory) is always stale.
pub fn is_stale(entry: &RemoteEntry, local: &Path) -> bool {
    let metadata = match fs::metadata(local) {
        Ok(metadata) => metadata,
        Err(_) => return true,
    };
    let local_size = metadata.len();
    match entry.kind {
        EntryKind::File if entry.size != local_size => return true,
        EntryKind::Symlink if entry.size >= local_size => return true,
        _ => {}
    }
    match (entry.modified, metadata.modified()) {
        (Some(remote), Ok(local_time)) => remote > DateTime::<Utc>::from(local_time),
        _ => false,
    }
}

/// Failure classes of a single remote retrieval.
#[derive(Debug)]
pub enum TransferError {
    /// The stream ended early; the session must be reconnected.
    EndOfStream(String),
    BrokenConnection(String),
    /// The server refused the path as a plain file, typically a symlink to a directory.
    NotARegularFile(String),
    Other(String),
}

/// A stateful connection to the remote file server. Not shareable across threads.
pub trait MirrorSession {
    fn list(&mut self, path: &str) -> Result<Vec<RemoteEntry>, TaxrefError>;
    fn retrieve(&mut self, path: &str, destination: &mut dyn Write) -> Result<u64, TransferError>;
    fn reconnect(&mut self) -> Result<(), TaxrefError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    LocalUnavailable,
    BrokenConnection,
    RetriesExhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadOutcome {
    Downloaded(u64),
    Skipped(SkipReason),
    /// The path is a directory; walk it instead.
    RedirectAsDirectory,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedFile {
    pub path: String,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub downloaded: usize,
    pub bytes: u64,
    pub up_to_date: usize,
    pub redirected: usize,
    pub skipped: Vec<SkippedFile>,
}

impl SyncReport {
    pub fn absorb(&mut self, other: SyncReport) {
        self.downloaded += other.downloaded;
        self.bytes += other.bytes;
        self.up_to_date += other.up_to_date;
        self.redirected += other.redirected;
        self.skipped.extend(other.skipped);
    }
}

pub struct MirrorSynchronizer<S: MirrorSession> {
    session: S,
    retry: RetryPolicy,
}

impl<S: MirrorSession> MirrorSynchronizer<S> {
    pub fn new(session: S, retry: RetryPolicy) -> Self {
        Self { session, retry }
    }

    pub fn into_session(self) -> S {
        self.session
    }

    /// Mirrors the remote directory `remote` into `local`.
    pub fn sync_tree(&mut self, remote: &str, local: &Path) -> Result<SyncReport, TaxrefError> {
        let mut report = SyncReport::default();
        self.sync_dir(remote, local, &mut report)?;
        tracing::info!(
            remote,
            downloaded = report.downloaded,
            up_to_date = report.up_to_date,
            skipped = report.skipped.len(),
            "mirror pass complete"
        );
        Ok(report)
    }

    fn sync_dir(
        &mut self,
        remote: &str,
        local: &Path,
        report: &mut SyncReport,
    ) -> Result<(), TaxrefError> {
        tracing::debug!(remote, local = %local.display(), "syncing directory");
        fs::create_dir_all(local)
            .map_err(|err| TaxrefError::Filesystem(format!("{}: {err}", local.display())))?;

        for entry in self.session.list(remote)? {
            let remote_path = format!("{remote}/{}", entry.name);
            let local_path = local.join(&entry.name);
            match entry.kind {
                EntryKind::Dir => self.sync_dir(&remote_path, &local_path, report)?,
                EntryKind::File | EntryKind::Symlink => {
                    self.sync_file(&entry, &remote_path, &local_path, report)?
                }
                EntryKind::CurrentDir | EntryKind::ParentDir => {}
                EntryKind::Other => {
                    tracing::debug!(remote = %remote_path, "ignoring entry of unknown type");
                }
            }
        }
        Ok(())
    }

    fn sync_file(
        &mut self,
        entry: &RemoteEntry,
        remote: &str,
        local: &Path,
        report: &mut SyncReport,
    ) -> Result<(), TaxrefError> {
        let outcome = if local.is_dir() {
            DownloadOutcome::RedirectAsDirectory
        } else if !is_stale(entry, local) {
            report.up_to_date += 1;
            return Ok(());
        } else {
            self.download(remote, local, entry.modified)?
        };

        match outcome {
            DownloadOutcome::Downloaded(bytes) => {
                report.downloaded += 1;
                report.bytes += bytes;
            }
            DownloadOutcome::Skipped(reason) => report.skipped.push(SkippedFile {
                path: remote.to_string(),
                reason,
            }),
            DownloadOutcome::RedirectAsDirectory => {
                tracing::debug!(remote, "entry is a directory, descending");
                report.redirected += 1;
                self.sync_dir(remote, local, report)?;
            }
        }
        Ok(())
    }

    /// Downloads one remote file to `local`.
    ///
    /// End-of-stream failures reconnect the session and retry up to the
    /// policy's attempt limit. When `modified` is given it becomes the local
    /// file's modification time.
    pub fn download(
        &mut self,
        remote: &str,
        local: &Path,
        modified: Option<DateTime<Utc>>,
    ) -> Result<DownloadOutcome, TaxrefError> {
        if let Some(parent) = local.parent() {
            fs::create_dir_all(parent)
                .map_err(|err| TaxrefError::Filesystem(format!("{}: {err}", parent.display())))?;
        }
        if local.is_dir() {
            return Ok(DownloadOutcome::RedirectAsDirectory);
        }

        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut file = match File::create(local) {
                Ok(file) => file,
                Err(err) if err.kind() == ErrorKind::IsADirectory => {
                    return Ok(DownloadOutcome::RedirectAsDirectory);
                }
                Err(err) if err.kind() == ErrorKind::NotFound => {
                    tracing::warn!(local = %local.display(), "cannot open destination: {err}");
                    return Ok(DownloadOutcome::Skipped(SkipReason::LocalUnavailable));
                }
                Err(err) => {
                    return Err(TaxrefError::Filesystem(format!("{}: {err}", local.display())));
                }
            };

            match self.session.retrieve(remote, &mut file) {
                Ok(bytes) => {
                    if let Some(modified) = modified {
                        if let Err(err) = file.set_modified(modified.into()) {
                            tracing::debug!(local = %local.display(), "cannot set mtime: {err}");
                        }
                    }
                    tracing::debug!(remote, bytes, "downloaded");
                    return Ok(DownloadOutcome::Downloaded(bytes));
                }
                Err(TransferError::EndOfStream(message)) => {
                    tracing::warn!(remote, attempt, "transfer ended early: {message}");
                    if attempt >= self.retry.max_attempts {
                        return Ok(DownloadOutcome::Skipped(SkipReason::RetriesExhausted));
                    }
                    thread::sleep(self.retry.delay);
                    self.session.reconnect()?;
                    tracing::info!(remote, "reconnected, retrying");
                }
                Err(TransferError::BrokenConnection(message)) => {
                    tracing::warn!(remote, "connection broke during transfer: {message}");
                    return Ok(DownloadOutcome::Skipped(SkipReason::BrokenConnection));
                }
                Err(TransferError::NotARegularFile(message)) => {
                    drop(file);
                    tracing::debug!(remote, "not a regular file: {message}");
                    match fs::remove_file(local) {
                        Ok(()) => {}
                        Err(err) if err.kind() == ErrorKind::NotFound => {}
                        Err(err) => {
                            return Err(TaxrefError::Filesystem(format!(
                                "{}: {err}",
                                local.display()
                            )));
                        }
                    }
                    return Ok(DownloadOutcome::RedirectAsDirectory);
                }
                Err(TransferError::Other(message)) => {
                    return Err(TaxrefError::Transfer {
                        path: remote.to_string(),
                        message,
                    });
                }
            }
        }
    }
}

/// Anonymous FTP session over `suppaftp`.
pub struct FtpSession {
    host: String,
    stream: FtpStream,
}

impl FtpSession {
    pub fn connect(host: &str) -> Result<Self, TaxrefError> {
        let stream = Self::open(host)?;
        Ok(Self {
            host: host.to_string(),
            stream,
        })
    }

    fn open(host: &str) -> Result<FtpStream, TaxrefError> {
        let address = if host.contains(':') {
            host.to_string()
        } else {
            format!("{host}:21")
        };
        let connect_err = |err: FtpError| TaxrefError::FtpConnect {
            host: host.to_string(),
            message: err.to_string(),
        };

        tracing::debug!(%address, "connecting");
        let mut stream = FtpStream::connect(&address).map_err(connect_err)?;
        stream.set_mode(Mode::ExtendedPassive);
        stream
            .login("anonymous", "anonymous@")
            .map_err(connect_err)?;
        stream
            .transfer_type(FileType::Binary)
            .map_err(connect_err)?;
        Ok(stream)
    }
}

impl MirrorSession for FtpSession {
    fn list(&mut self, path: &str) -> Result<Vec<RemoteEntry>, TaxrefError> {
        let lines = self
            .stream
            .mlsd(Some(path))
            .map_err(|err| TaxrefError::Listing {
                path: path.to_string(),
                message: err.to_string(),
            })?;
        Ok(lines
            .iter()
            .filter_map(|line| RemoteEntry::parse_mlsd(line))
            .collect())
    }

    fn retrieve(&mut self, path: &str, destination: &mut dyn Write) -> Result<u64, TransferError> {
        self.stream
            .retr(path, |reader| {
                io::copy(reader, &mut *destination).map_err(FtpError::ConnectionError)
            })
            .map_err(classify_ftp_error)
    }

    fn reconnect(&mut self) -> Result<(), TaxrefError> {
        let _ = self.stream.quit();
        self.stream = Self::open(&self.host)?;
        Ok(())
    }
}

impl Drop for FtpSession {
    fn drop(&mut self) {
        if let Err(err) = self.stream.quit() {
            tracing::debug!("FTP session did not close cleanly: {err}");
        }
    }
}

fn classify_ftp_error(err: FtpError) -> TransferError {
    match err {
        FtpError::ConnectionError(io_err) => match io_err.kind() {
            ErrorKind::UnexpectedEof => TransferError::EndOfStream(io_err.to_string()),
            ErrorKind::BrokenPipe | ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted => {
                TransferError::BrokenConnection(io_err.to_string())
            }
            _ => TransferError::Other(io_err.to_string()),
        },
        FtpError::UnexpectedResponse(response) => {
            let message = String::from_utf8_lossy(&response.body).trim().to_string();
            match response.status {
                Status::FileUnavailable => TransferError::NotARegularFile(message),
                Status::NotAvailable => TransferError::EndOfStream(message),
                _ => TransferError::Other(message),
            }
        }
        FtpError::BadResponse => {
            TransferError::EndOfStream("invalid response from server".to_string())
        }
        other => TransferError::Other(other.to_string()),
    }
}

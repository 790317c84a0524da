//! FTP source
//!
//! `suppaftp` exposes a blocking client, so every command runs on the blocking
//! pool. The control connection is opened lazily, reused for the whole import
//! session and closed by [`RemoteByteSource::close`].
//!
//! File contents are read on a blocking thread and forwarded in blocks through
//! a bounded channel, which the async side consumes as an `AsyncRead`.
//!
//! ```rust,ignore
//! let source = FtpSource::new(FtpConfig {
//!     host: "ftp.example.org".to_string(),
//!     ..FtpConfig::default()
//! });
//! let stat = source.stat("/exports/samples.csv").await?;
//! ```

use async_trait::async_trait;
use bytes::Bytes;
use import_common::{FileStat, ImportError, Result};
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::sync::{Arc, Mutex, MutexGuard};
use suppaftp::{types::FileType, FtpStream, Mode};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::io::StreamReader;
use tracing::{debug, info, warn};

use super::{ByteReader, RemoteByteSource};

/// Size of the blocks forwarded from the FTP data connection
const READ_BLOCK_SIZE: usize = 64 * 1024;

/// Number of blocks buffered between the blocking reader and its consumer
const READ_AHEAD_BLOCKS: usize = 16;

/// Configuration for FTP connection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FtpConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_username")]
    pub username: String,
    #[serde(default = "default_password")]
    pub password: String,
}

fn default_port() -> u16 {
    21
}

fn default_username() -> String {
    "anonymous".to_string()
}

fn default_password() -> String {
    "anonymous@example.com".to_string()
}

impl Default for FtpConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: default_port(),
            username: default_username(),
            password: default_password(),
        }
    }
}

type Session = Arc<Mutex<Option<FtpStream>>>;

/// FTP-backed [`RemoteByteSource`]
pub struct FtpSource {
    config: FtpConfig,
    session: Session,
}

impl FtpSource {
    pub fn new(config: FtpConfig) -> Self {
        Self {
            config,
            session: Arc::new(Mutex::new(None)),
        }
    }

    fn ftp_error(action: &str, path: &str, err: impl std::fmt::Display) -> ImportError {
        ImportError::Source(format!("FTP {} failed for {}: {}", action, path, err))
    }

    fn lock_session(session: &Session) -> Result<MutexGuard<'_, Option<FtpStream>>> {
        session
            .lock()
            .map_err(|_| ImportError::Source("FTP session mutex poisoned".to_string()))
    }

    /// Connect and log in unless the session is already open
    fn ensure_connected<'a>(
        config: &FtpConfig,
        slot: &'a mut Option<FtpStream>,
    ) -> Result<&'a mut FtpStream> {
        if slot.is_none() {
            debug!("Connecting to FTP server: {}:{}", config.host, config.port);

            let mut stream = FtpStream::connect(format!("{}:{}", config.host, config.port))
                .map_err(|e| Self::ftp_error("connect", &config.host, e))?;

            // Extended Passive Mode behaves better behind NAT
            stream.set_mode(Mode::ExtendedPassive);

            stream
                .login(&config.username, &config.password)
                .map_err(|e| Self::ftp_error("login", &config.host, e))?;
            stream
                .transfer_type(FileType::Binary)
                .map_err(|e| Self::ftp_error("TYPE I", &config.host, e))?;

            info!("Connected to FTP server {}:{}", config.host, config.port);
            *slot = Some(stream);
        }

        slot.as_mut()
            .ok_or_else(|| ImportError::Source("FTP session unavailable".to_string()))
    }

    fn stat_sync(config: &FtpConfig, session: &Session, path: &str) -> Result<FileStat> {
        let mut guard = Self::lock_session(session)?;
        let stream = Self::ensure_connected(config, &mut guard)?;

        let size = stream
            .size(path)
            .map_err(|e| Self::ftp_error("SIZE", path, e))?;
        let modified = stream
            .mdtm(path)
            .map_err(|e| Self::ftp_error("MDTM", path, e))?;

        Ok(FileStat::new(size as u64, modified.and_utc()))
    }

    fn retrieve_sync(
        config: &FtpConfig,
        session: &Session,
        path: &str,
        tx: mpsc::Sender<std::io::Result<Bytes>>,
    ) -> Result<u64> {
        let mut guard = Self::lock_session(session)?;
        let stream = Self::ensure_connected(config, &mut guard)?;

        let mut data = stream
            .retr_as_stream(path)
            .map_err(|e| Self::ftp_error("RETR", path, e))?;

        let mut total = 0u64;
        let mut block = vec![0u8; READ_BLOCK_SIZE];
        loop {
            let n = match data.read(&mut block) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    let message = format!("FTP read failed for {}: {}", path, e);
                    let _ = tx.blocking_send(Err(e));
                    return Err(ImportError::Source(message));
                },
            };
            total += n as u64;
            if tx.blocking_send(Ok(Bytes::copy_from_slice(&block[..n]))).is_err() {
                warn!(path, "FTP reader dropped before end of file");
                break;
            }
        }

        stream
            .finalize_retr_stream(data)
            .map_err(|e| Self::ftp_error("finalize RETR", path, e))?;

        Ok(total)
    }
}

#[async_trait]
impl RemoteByteSource for FtpSource {
    async fn stat(&self, path: &str) -> Result<FileStat> {
        let config = self.config.clone();
        let session = self.session.clone();
        let path = path.to_string();

        tokio::task::spawn_blocking(move || Self::stat_sync(&config, &session, &path))
            .await
            .map_err(|e| ImportError::Source(format!("FTP stat task panicked: {}", e)))?
    }

    async fn open_read(&self, path: &str) -> Result<ByteReader> {
        let (tx, rx) = mpsc::channel(READ_AHEAD_BLOCKS);
        let config = self.config.clone();
        let session = self.session.clone();
        let path = path.to_string();

        tokio::task::spawn_blocking(move || {
            match Self::retrieve_sync(&config, &session, &path, tx.clone()) {
                Ok(bytes) => debug!(path = %path, bytes, "FTP retrieve finished"),
                Err(e) => {
                    warn!(path = %path, error = %e, "FTP retrieve failed");
                    let _ = tx.blocking_send(Err(std::io::Error::other(e.to_string())));
                },
            }
        });

        Ok(Box::new(StreamReader::new(ReceiverStream::new(rx))))
    }

    async fn close(&self) -> Result<()> {
        let session = self.session.clone();

        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut guard = Self::lock_session(&session)?;
            if let Some(mut stream) = guard.take() {
                if let Err(e) = stream.quit() {
                    warn!("Failed to quit FTP session gracefully: {}", e);
                }
            }
            Ok(())
        })
        .await
        .map_err(|e| ImportError::Source(format!("FTP close task panicked: {}", e)))?
    }
}

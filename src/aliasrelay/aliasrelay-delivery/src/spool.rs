/*
 * aliasrelay email alias relay
 * Copyright (C) 2022 viridIT SAS
 *
 * This program is free software: you can redistribute it and/or modify it under
 * the terms of the GNU General Public License as published by the Free Software
 * Foundation, either version 3 of the License, or any later version.
 *
 * This program is distributed in the hope that it will be useful, but WITHOUT
 * ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
 * FOR A PARTICULAR PURPOSE.  See the GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License along with
 * this program. If not, see https://www.gnu.org/licenses/.
 *
*/
use crate::{DeliveryError, SendRequest};

/// Directory of the requests which could not be delivered.
///
/// ```text
/// {dir}/DeliveryFail-{unix}-{uuid}.sendrequest          waiting for a resend
/// {dir}/failed/DeliveryRetryFail-{unix}-{uuid}.sendrequest  given up
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Spool {
    dir: std::path::PathBuf,
}

impl Spool {
    /// Extension of the spooled requests, other files are ignored.
    pub const EXTENSION: &'static str = "sendrequest";
    const FAILED_DIR: &'static str = "failed";

    ///
    #[must_use]
    pub fn new(dir: impl Into<std::path::PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    ///
    #[must_use]
    pub fn dir(&self) -> &std::path::Path {
        &self.dir
    }

    fn file_name(prefix: &str) -> String {
        format!(
            "{prefix}-{}-{}.{}",
            time::OffsetDateTime::now_utc().unix_timestamp(),
            uuid::Uuid::new_v4(),
            Self::EXTENSION
        )
    }

    /// Save a request waiting to be sent again.
    ///
    /// # Errors
    ///
    /// * the directory cannot be created or written
    pub async fn save(&self, request: &SendRequest) -> Result<std::path::PathBuf, DeliveryError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(Self::file_name("DeliveryFail"));
        Self::write(&path, request).await?;
        tracing::info!(path = %path.display(), "Saved unsent message.");
        Ok(path)
    }

    /// Save a request which will not be sent again.
    ///
    /// # Errors
    ///
    /// * the directory cannot be created or written
    pub async fn save_failed(
        &self,
        request: &SendRequest,
    ) -> Result<std::path::PathBuf, DeliveryError> {
        let dir = self.dir.join(Self::FAILED_DIR);
        tokio::fs::create_dir_all(&dir).await?;
        let path = dir.join(Self::file_name("DeliveryRetryFail"));
        Self::write(&path, request).await?;
        Ok(path)
    }

    /// Overwrite the file of a spooled request.
    ///
    /// # Errors
    ///
    /// * the file cannot be written
    pub async fn write(path: &std::path::Path, request: &SendRequest) -> Result<(), DeliveryError> {
        tokio::fs::write(path, serde_json::to_vec(request)?).await?;
        Ok(())
    }

    ///
    /// # Errors
    ///
    /// * the file cannot be read
    /// * the content is not a request
    pub async fn load(path: &std::path::Path) -> Result<SendRequest, DeliveryError> {
        Ok(serde_json::from_slice(&tokio::fs::read(path).await?)?)
    }

    /// The files of the requests waiting for a resend, sorted by name.
    ///
    /// # Errors
    ///
    /// * the directory cannot be read, a missing directory is empty
    pub async fn entries(&self) -> Result<Vec<std::path::PathBuf>, DeliveryError> {
        let mut dir = match tokio::fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
            Err(error) => return Err(error.into()),
        };

        let mut entries = vec![];
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if !entry.file_type().await?.is_file() {
                tracing::debug!(path = %path.display(), "Skipping, not a file.");
                continue;
            }
            if path.extension().and_then(std::ffi::OsStr::to_str) != Some(Self::EXTENSION) {
                tracing::info!(path = %path.display(), "Skipping, not a send request.");
                continue;
            }
            entries.push(path);
        }
        entries.sort();
        Ok(entries)
    }

    /// The requests given up on.
    ///
    /// # Errors
    ///
    /// * see [`Spool::entries`]
    pub async fn failed_entries(&self) -> Result<Vec<std::path::PathBuf>, DeliveryError> {
        Self::new(self.dir.join(Self::FAILED_DIR)).entries().await
    }
}

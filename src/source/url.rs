use std::io;

use reqwest::blocking::Client;
use reqwest::header::{CONTENT_LENGTH, RANGE};

use super::{SourceHandle, SourceResult};
use crate::error::IoError;

/// A read-only source backed by HTTP range requests.
///
/// The concurrency model for this crate is synchronous (§5 of the design),
/// so this wraps `reqwest`'s blocking client rather than pulling in an
/// async runtime just for this one source kind.
#[derive(Debug)]
pub struct UrlSource {
    client: Client,
    url: String,
    len: Option<u64>,
}

impl UrlSource {
    pub fn new(url: impl Into<String>) -> SourceResult<Self> {
        Ok(UrlSource {
            client: Client::new(),
            url: url.into(),
            len: None,
        })
    }

    fn fetch_len(&mut self) -> SourceResult<u64> {
        if let Some(len) = self.len {
            return Ok(len);
        }
        let response = self
            .client
            .head(&self.url)
            .send()
            .map_err(reqwest_to_io)?;
        // §4.1: "length() returns HTTP Content-Length or 0 if unavailable" -
        // a server omitting the header isn't a fetch failure, just an
        // unknown length.
        let len = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0);
        self.len = Some(len);
        Ok(len)
    }
}

fn reqwest_to_io(e: reqwest::Error) -> IoError {
    IoError::Other(io::Error::new(io::ErrorKind::Other, e))
}

impl SourceHandle for UrlSource {
    fn len(&mut self) -> SourceResult<u64> {
        Ok(self.fetch_len()?)
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> SourceResult<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let total_len = self.fetch_len()?;
        if offset >= total_len {
            return Ok(0);
        }
        let last = offset + (buf.len() as u64).min(total_len - offset) - 1;
        let range = format!("bytes={offset}-{last}");
        let response = self
            .client
            .get(&self.url)
            .header(RANGE, range)
            .send()
            .map_err(reqwest_to_io)?;
        let bytes = response.bytes().map_err(reqwest_to_io)?;
        let n = bytes.len().min(buf.len());
        buf[..n].copy_from_slice(&bytes[..n]);
        Ok(n)
    }

    fn write_at(&mut self, _offset: u64, _buf: &[u8]) -> SourceResult<()> {
        Err(IoError::ReadOnly.into())
    }

    fn set_len(&mut self, _len: u64) -> SourceResult<()> {
        Err(IoError::ReadOnly.into())
    }

    fn is_read_only(&self) -> bool {
        true
    }
}

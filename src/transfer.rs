//! Remote file exchange over an established provisioning session.
//!
//! After the bootstrap secret, some provisioning servers keep serving the
//! session: the client can ask for the size of a protected file, fetch a
//! byte range of it, or upload a result file. Every request and response is
//! a regular session message:
//!
//! ```text
//! request:  kind:u8 | name_len:u16 | name | offset:u64 | len:u64
//! response: status:u8 | value:u64
//! ```
//!
//! Integers are big-endian; status 0 means success. File contents travel as
//! additional messages after the request (upload) or the response
//! (download).

use bytes::{Buf, BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncWrite};
use zeroize::Zeroizing;

use crate::error::{Error, Result, TransferError};
use crate::secret::Secret;
use crate::session::ProvisionSession;

/// Longest file name a request may carry.
pub const MAX_NAME_LEN: usize = 256;

/// Size of a response message.
pub const RESPONSE_LEN: usize = 1 + 8;

/// Default upload chunk: 64 KiB per message.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

const STATUS_SUCCESS: u8 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RequestKind {
    GetData = 0x01,
    GetDataSize = 0x02,
    PutResult = 0x03,
}

impl RequestKind {
    fn op(self) -> &'static str {
        match self {
            Self::GetData => "get-data",
            Self::GetDataSize => "get-data-size",
            Self::PutResult => "put-result",
        }
    }
}

fn encode_request(kind: RequestKind, name: &str, offset: u64, len: u64) -> Result<BytesMut> {
    if name.len() > MAX_NAME_LEN {
        return Err(TransferError::NameTooLong {
            len: name.len(),
            max: MAX_NAME_LEN,
        }
        .into());
    }
    let mut buf = BytesMut::with_capacity(1 + 2 + name.len() + 8 + 8);
    buf.put_u8(kind as u8);
    buf.put_u16(name.len() as u16);
    buf.put_slice(name.as_bytes());
    buf.put_u64(offset);
    buf.put_u64(len);
    Ok(buf)
}

fn decode_response(kind: RequestKind, raw: &[u8]) -> Result<u64> {
    if raw.len() != RESPONSE_LEN {
        return Err(TransferError::MalformedResponse {
            op: kind.op(),
            reason: format!("expected {RESPONSE_LEN} bytes, got {}", raw.len()),
        }
        .into());
    }
    let mut cursor = raw;
    let status = cursor.get_u8();
    let value = cursor.get_u64();
    if status != STATUS_SUCCESS {
        return Err(TransferError::RemoteFailure {
            op: kind.op(),
            status,
        }
        .into());
    }
    Ok(value)
}

/// File operations served by the provisioning server.
pub struct RemoteFiles<'a, S> {
    session: &'a mut ProvisionSession<S>,
    chunk_size: usize,
}

impl<'a, S: AsyncRead + AsyncWrite + Unpin> RemoteFiles<'a, S> {
    pub fn new(session: &'a mut ProvisionSession<S>) -> Self {
        Self {
            session,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Upload in messages of at most `chunk_size` bytes.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    async fn request(&mut self, kind: RequestKind, name: &str, offset: u64, len: u64) -> Result<()> {
        let req = encode_request(kind, name, offset, len)?;
        self.session.write(&req).await?;
        Ok(())
    }

    async fn response(&mut self, kind: RequestKind) -> Result<u64> {
        let raw = self.session.read(RESPONSE_LEN).await?;
        decode_response(kind, raw.expose())
    }

    /// Size in bytes of the remote file `name`.
    pub async fn data_size(&mut self, name: &str) -> Result<u64> {
        self.request(RequestKind::GetDataSize, name, 0, 0).await?;
        self.response(RequestKind::GetDataSize).await
    }

    /// Fetch up to `len` bytes of `name` starting at `offset`. The server
    /// announces how many bytes it sends, which may be fewer near the end of
    /// the file.
    pub async fn fetch(&mut self, name: &str, offset: u64, len: u64) -> Result<Secret> {
        let kind = RequestKind::GetData;
        self.request(kind, name, offset, len).await?;
        let announced = self.response(kind).await?;
        if announced > len {
            return Err(TransferError::MalformedResponse {
                op: kind.op(),
                reason: format!("server announced {announced} bytes, {len} requested"),
            }
            .into());
        }

        let total = usize::try_from(announced).map_err(|_| TransferError::MalformedResponse {
            op: kind.op(),
            reason: format!("announced length {announced} does not fit in memory"),
        })?;
        let mut data = Zeroizing::new(Vec::with_capacity(total.min(self.chunk_size)));
        while data.len() < total {
            let chunk = self.session.read(total - data.len()).await?;
            if chunk.is_empty() {
                return Err(TransferError::MalformedResponse {
                    op: kind.op(),
                    reason: "empty data message".into(),
                }
                .into());
            }
            data.extend_from_slice(chunk.expose());
        }

        tracing::debug!(name, offset, len = total, "fetched remote data");
        Ok(Secret::new(std::mem::take(&mut *data)))
    }

    /// Upload `data` into `name` at `offset`. Returns the number of bytes the
    /// server reports as received.
    pub async fn put_result(&mut self, name: &str, offset: u64, data: &[u8]) -> Result<u64> {
        let kind = RequestKind::PutResult;
        self.request(kind, name, offset, data.len() as u64).await?;
        for chunk in data.chunks(self.chunk_size) {
            self.session.write(chunk).await?;
        }

        let received = self.response(kind).await?;
        if received != data.len() as u64 {
            return Err(Error::UnexpectedLength {
                expected: data.len(),
                actual: received as usize,
            });
        }
        tracing::debug!(name, offset, len = data.len(), "uploaded result");
        Ok(received)
    }
}

//! Remote namespace handle.
//!
//! Implements the core [`Namespace`] contract over the RPC transport,
//! so the listing engine and metastore run unchanged on the worker
//! side. The handle carries its refcount guard; dropping it releases
//! the reference no matter how the operation ended.

use crate::session::RefGuard;
use crate::transport::Transport;
use async_trait::async_trait;
use cellar_common::{Error, Result};
use cellar_core::kv::{Namespace, Scan, SCAN_BATCH};
use cellar_proto::{Request, Response, ScanEntry, ScanRange};
use std::collections::VecDeque;

/// Refcounted handle on one namespace of the master's store.
pub struct NsHandle {
    namespace: String,
    transport: Transport,
    _guard: RefGuard,
}

impl NsHandle {
    pub(crate) fn new(namespace: String, transport: Transport, guard: RefGuard) -> Self {
        Self {
            namespace,
            transport,
            _guard: guard,
        }
    }
}

#[async_trait]
impl Namespace for NsHandle {
    fn name(&self) -> &str {
        &self.namespace
    }

    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        match self
            .transport
            .call(Request::Get {
                namespace: self.namespace.clone(),
                key: key.to_vec(),
            })
            .await?
        {
            Response::Value { value } => Ok(value),
            other => Err(Error::wire(format!("unexpected response to get: {other:?}"))),
        }
    }

    async fn put(&self, key: &[u8], value: &[u8], sync: bool) -> Result<()> {
        match self
            .transport
            .call(Request::Put {
                namespace: self.namespace.clone(),
                key: key.to_vec(),
                value: value.to_vec(),
                sync,
            })
            .await?
        {
            Response::Done => Ok(()),
            other => Err(Error::wire(format!("unexpected response to put: {other:?}"))),
        }
    }

    async fn del(&self, key: &[u8], sync: bool) -> Result<()> {
        match self
            .transport
            .call(Request::Del {
                namespace: self.namespace.clone(),
                key: key.to_vec(),
                sync,
            })
            .await?
        {
            Response::Done => Ok(()),
            other => Err(Error::wire(format!("unexpected response to del: {other:?}"))),
        }
    }

    async fn scan(&self, range: ScanRange) -> Result<Box<dyn Scan>> {
        match self
            .transport
            .call(Request::ScanOpen {
                namespace: self.namespace.clone(),
                range,
            })
            .await?
        {
            Response::ScanOpened { scan_id } => Ok(Box::new(RemoteScan {
                transport: self.transport.clone(),
                scan_id,
                buf: VecDeque::new(),
                end: false,
                closed: false,
            })),
            other => Err(Error::wire(format!(
                "unexpected response to scanOpen: {other:?}"
            ))),
        }
    }
}

/// Client view of a server-side cursor.
///
/// Callers must `close` the scan when they stop consuming it early;
/// the server otherwise keeps the cursor until the connection drops.
pub struct RemoteScan {
    transport: Transport,
    scan_id: u64,
    buf: VecDeque<ScanEntry>,
    end: bool,
    closed: bool,
}

#[async_trait]
impl Scan for RemoteScan {
    async fn next(&mut self) -> Result<Option<ScanEntry>> {
        if self.closed {
            return Ok(None);
        }
        if self.buf.is_empty() && !self.end {
            match self
                .transport
                .call(Request::ScanPull {
                    scan_id: self.scan_id,
                    max: SCAN_BATCH as u32,
                })
                .await?
            {
                Response::ScanBatch { entries, end } => {
                    self.buf.extend(entries);
                    self.end = end;
                }
                other => {
                    return Err(Error::wire(format!(
                        "unexpected response to scanPull: {other:?}"
                    )))
                }
            }
        }
        Ok(self.buf.pop_front())
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.buf.clear();
        match self
            .transport
            .call(Request::ScanClose {
                scan_id: self.scan_id,
            })
            .await?
        {
            Response::Done => Ok(()),
            other => Err(Error::wire(format!(
                "unexpected response to scanClose: {other:?}"
            ))),
        }
    }
}

//! Master-side RPC server.
//!
//! Exactly one server lives in the master process; it owns the root
//! store and the namespace registry. Each worker connection is served
//! by its own task that handles requests strictly in arrival order, so
//! responses are delivered in the order requests were issued.
//!
//! Scan cursors are connection-local: they are addressed by an opaque
//! id, survive `end` until closed, and die with the connection.

use crate::kv::{BatchCursor, RootDb};
use crate::metastore::Metastore;
use crate::namespace::{compose_range, LocalNamespace, Registry};
use cellar_common::{
    Clock, Error, MasterConfig, Result, BucketInfo, USERS_BUCKET, USERS_BUCKET_OWNER,
};
use cellar_proto::{read_frame, write_frame, Request, Response, WireError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

/// Largest batch a single `ScanPull` may request.
const MAX_PULL: usize = 4096;

/// State owned by the master: the root store and the registry.
pub struct ServerState {
    pub root: Arc<RootDb>,
    pub registry: Mutex<Registry>,
}

/// Open the store, rebuild the registry and create the well-known
/// namespaces idempotently.
pub async fn bootstrap(config: &MasterConfig, clock: &dyn Clock) -> Result<Arc<ServerState>> {
    std::fs::create_dir_all(&config.metadata_path)?;
    let root = Arc::new(RootDb::open(&config.metadata_path)?);
    let mut registry = Registry::bootstrap(&config.metadata_path, &root)?;

    let metastore = Metastore::new(LocalNamespace::new(
        Arc::clone(&root),
        cellar_common::METASTORE_NAMESPACE,
    )?);
    if !metastore.has_bucket(USERS_BUCKET).await? {
        registry.create_namespace(USERS_BUCKET)?;
        let info = BucketInfo::new(USERS_BUCKET_OWNER, clock);
        metastore
            .put_bucket_attrs(USERS_BUCKET, &info.to_bytes()?)
            .await?;
        info!(bucket = USERS_BUCKET, "created well-known bucket");
    }

    Ok(Arc::new(ServerState {
        root,
        registry: Mutex::new(registry),
    }))
}

/// Accept worker connections until the listener fails.
pub async fn serve(state: Arc<ServerState>, listener: TcpListener) -> Result<()> {
    info!(addr = %listener.local_addr()?, "metadata RPC server listening");
    loop {
        let (stream, peer) = listener.accept().await?;
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            debug!(%peer, "worker connected");
            if let Err(e) = handle_conn(state, stream).await {
                warn!(%peer, error = %e, "worker connection failed");
            }
            debug!(%peer, "worker disconnected");
        });
    }
}

struct ConnCursor {
    cursor: BatchCursor,
    strip: usize,
}

struct ConnState {
    cursors: HashMap<u64, ConnCursor>,
    next_scan_id: u64,
}

async fn handle_conn(state: Arc<ServerState>, stream: TcpStream) -> Result<()> {
    stream.set_nodelay(true).ok();
    let (mut reader, mut writer) = stream.into_split();
    let mut conn = ConnState {
        cursors: HashMap::new(),
        next_scan_id: 1,
    };

    while let Some(request) = read_frame::<_, Request>(&mut reader).await? {
        let response = match handle_request(&state, &mut conn, request) {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, code = e.api_error_code(), "request failed");
                Response::Error(WireError::from(&e))
            }
        };
        write_frame(&mut writer, &response).await?;
    }
    Ok(())
}

fn handle_request(
    state: &ServerState,
    conn: &mut ConnState,
    request: Request,
) -> Result<Response> {
    match request {
        Request::Get { namespace, key } => {
            let raw = raw_key(state, &namespace, &key)?;
            Ok(Response::Value {
                value: state.root.get(&raw)?,
            })
        }
        Request::Put {
            namespace,
            key,
            value,
            sync,
        } => {
            let raw = raw_key(state, &namespace, &key)?;
            state.root.put(&raw, &value, sync)?;
            Ok(Response::Done)
        }
        Request::Del { namespace, key, sync } => {
            let raw = raw_key(state, &namespace, &key)?;
            state.root.del(&raw, sync)?;
            Ok(Response::Done)
        }
        Request::ScanOpen { namespace, range } => {
            let prefix = prefix_of(state, &namespace)?;
            let resolved = compose_range(&prefix, &range);
            let scan_id = conn.next_scan_id;
            conn.next_scan_id += 1;
            conn.cursors.insert(
                scan_id,
                ConnCursor {
                    cursor: BatchCursor::new(resolved),
                    strip: prefix.len(),
                },
            );
            Ok(Response::ScanOpened { scan_id })
        }
        Request::ScanPull { scan_id, max } => {
            let entry = conn
                .cursors
                .get_mut(&scan_id)
                .ok_or_else(|| Error::wire(format!("unknown scan id: {scan_id}")))?;
            let max = (max as usize).clamp(1, MAX_PULL);
            let (mut entries, end) = entry.cursor.pull(&state.root, max)?;
            for record in &mut entries {
                record.key.drain(..entry.strip);
            }
            Ok(Response::ScanBatch { entries, end })
        }
        Request::ScanClose { scan_id } => {
            // idempotent, honored even after end
            conn.cursors.remove(&scan_id);
            Ok(Response::Done)
        }
        Request::CreateNamespace { name } => {
            state.registry.lock().create_namespace(&name)?;
            Ok(Response::Done)
        }
    }
}

fn prefix_of(state: &ServerState, namespace: &str) -> Result<Vec<u8>> {
    state
        .registry
        .lock()
        .prefix(namespace)
        .map(<[u8]>::to_vec)
        .ok_or_else(|| Error::internal(format!("unknown namespace: {namespace}")))
}

fn raw_key(state: &ServerState, namespace: &str, key: &[u8]) -> Result<Vec<u8>> {
    let mut raw = prefix_of(state, namespace)?;
    raw.extend_from_slice(key);
    Ok(raw)
}

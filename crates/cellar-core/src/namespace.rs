//! Namespace registry and manifest
//!
//! Buckets map to namespaces inside the one shared store. A namespace is
//! realized as a key prefix using a reversible length-prefixed encoding
//! (`u16` big-endian name length, name bytes, then the caller's key), so
//! keys of one namespace can never alias another's.
//!
//! The set of known namespaces is advertised to workers through
//! `manifest.json`, staged as `manifest.json.tmp` and renamed into place
//! so readers always observe a complete document.

use crate::kv::{BatchCursor, LocalScan, Namespace, ResolvedRange, RootDb, Scan, SCAN_BATCH};
use async_trait::async_trait;
use cellar_common::{Error, Result, METASTORE_NAMESPACE};
use cellar_proto::ScanRange;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Manifest file name under the metadata path.
pub const MANIFEST_FILE: &str = "manifest.json";

/// Staging copy written before the atomic rename.
pub const MANIFEST_TMP_FILE: &str = "manifest.json.tmp";

/// Compute the key prefix for a namespace name.
pub fn namespace_prefix(name: &str) -> Result<Vec<u8>> {
    let len = u16::try_from(name.len())
        .map_err(|_| Error::internal(format!("namespace name too long: {} bytes", name.len())))?;
    let mut prefix = Vec::with_capacity(2 + name.len());
    prefix.extend_from_slice(&len.to_be_bytes());
    prefix.extend_from_slice(name.as_bytes());
    Ok(prefix)
}

/// Smallest byte string greater than every key carrying `prefix`, or
/// `None` when no such string exists (all bytes `0xFF`).
pub fn prefix_upper_bound(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut bound = prefix.to_vec();
    while let Some(last) = bound.pop() {
        if last != 0xFF {
            bound.push(last + 1);
            return Some(bound);
        }
    }
    None
}

/// Compose a caller-level range with a namespace prefix into raw store
/// bounds. An open lower bound becomes the prefix itself; an open upper
/// bound becomes the prefix's successor so the scan can never cross
/// into a neighboring namespace.
pub(crate) fn compose_range(prefix: &[u8], range: &ScanRange) -> ResolvedRange {
    let user = ResolvedRange::from_range(range);
    let concat = |key: &[u8]| {
        let mut raw = Vec::with_capacity(prefix.len() + key.len());
        raw.extend_from_slice(prefix);
        raw.extend_from_slice(key);
        raw
    };
    let lower = match &user.lower {
        Some((key, exclusive)) => Some((concat(key), *exclusive)),
        None => Some((prefix.to_vec(), false)),
    };
    let upper = match &user.upper {
        Some((key, exclusive)) => Some((concat(key), *exclusive)),
        None => prefix_upper_bound(prefix).map(|bound| (bound, true)),
    };
    ResolvedRange {
        lower,
        upper,
        limit: user.limit,
        reverse: user.reverse,
    }
}

/// On-disk manifest advertising namespaces and server methods.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Manifest {
    pub version: u64,
    pub namespaces: Vec<String>,
    pub methods: Vec<MethodDescriptor>,
}

/// Descriptor of an RPC method exposed by the server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MethodDescriptor {
    pub name: String,
    pub kind: String,
}

impl Manifest {
    /// Read and parse the manifest under `metadata_path`.
    pub fn load(metadata_path: &Path) -> Result<Self> {
        let path = metadata_path.join(MANIFEST_FILE);
        let bytes = std::fs::read(&path)?;
        serde_json::from_slice(&bytes)
            .map_err(|e| Error::Manifest(format!("failed to parse {}: {e}", path.display())))
    }

    /// Whether the manifest lists the namespace.
    pub fn advertises(&self, name: &str) -> bool {
        self.namespaces.iter().any(|ns| ns == name)
    }
}

/// In-memory registry of namespaces, owned by the master.
pub struct Registry {
    metadata_path: PathBuf,
    version: u64,
    namespaces: BTreeMap<String, Vec<u8>>,
}

impl Registry {
    /// Rebuild the registry at master startup.
    ///
    /// The metastore namespace always exists; every bucket recorded in
    /// it gets its namespace re-registered. The manifest is published
    /// before the registry is handed to the server, so a fresh start
    /// always leaves a readable manifest behind.
    pub fn bootstrap(metadata_path: &Path, root: &RootDb) -> Result<Self> {
        let version = match Manifest::load(metadata_path) {
            Ok(manifest) => manifest.version,
            Err(_) => 0,
        };
        let mut registry = Self {
            metadata_path: metadata_path.to_path_buf(),
            version,
            namespaces: BTreeMap::new(),
        };
        registry.insert(METASTORE_NAMESPACE)?;

        let buckets = metastore_bucket_names(root)?;
        for bucket in &buckets {
            registry.insert(bucket)?;
        }
        registry.publish()?;

        info!(
            namespaces = registry.namespaces.len(),
            "rebuilt namespace registry"
        );
        Ok(registry)
    }

    fn insert(&mut self, name: &str) -> Result<bool> {
        if self.namespaces.contains_key(name) {
            return Ok(false);
        }
        let prefix = namespace_prefix(name)?;
        self.namespaces.insert(name.to_string(), prefix);
        Ok(true)
    }

    /// Create a namespace and publish the updated manifest.
    ///
    /// Idempotent: creating an existing namespace is a no-op. If the
    /// manifest cannot be published the creation is rolled back and the
    /// error surfaces to the caller.
    pub fn create_namespace(&mut self, name: &str) -> Result<()> {
        if !self.insert(name)? {
            debug!(namespace = name, "namespace already exists");
            return Ok(());
        }
        if let Err(e) = self.publish() {
            self.namespaces.remove(name);
            return Err(e);
        }
        info!(namespace = name, "created namespace");
        Ok(())
    }

    /// Serialize the registry to the manifest and rename it into place.
    pub fn publish(&mut self) -> Result<()> {
        self.version += 1;
        let manifest = Manifest {
            version: self.version,
            namespaces: self.namespaces.keys().cloned().collect(),
            methods: vec![MethodDescriptor {
                name: "createNamespace".to_string(),
                kind: "async".to_string(),
            }],
        };
        let body = serde_json::to_vec_pretty(&manifest)?;

        let tmp = self.metadata_path.join(MANIFEST_TMP_FILE);
        let path = self.metadata_path.join(MANIFEST_FILE);
        std::fs::write(&tmp, body)?;
        std::fs::rename(&tmp, &path)?;
        debug!(version = self.version, "published manifest");
        Ok(())
    }

    /// Raw key prefix of a namespace.
    pub fn prefix(&self, name: &str) -> Option<&[u8]> {
        self.namespaces.get(name).map(Vec::as_slice)
    }

    /// Whether the namespace is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.namespaces.contains_key(name)
    }

    /// Registered namespace names, in order.
    pub fn namespaces(&self) -> Vec<String> {
        self.namespaces.keys().cloned().collect()
    }
}

/// List bucket names recorded in the metastore by scanning its keys.
fn metastore_bucket_names(root: &RootDb) -> Result<Vec<String>> {
    let prefix = namespace_prefix(METASTORE_NAMESPACE)?;
    let range = compose_range(&prefix, &ScanRange::default());
    let mut cursor = BatchCursor::new(range);
    let mut names = Vec::new();
    loop {
        let (entries, end) = cursor.pull(root, SCAN_BATCH)?;
        for entry in &entries {
            match std::str::from_utf8(&entry.key[prefix.len()..]) {
                Ok(name) => names.push(name.to_string()),
                Err(_) => warn!("skipping non-utf8 bucket name in metastore"),
            }
        }
        if end {
            break;
        }
    }
    Ok(names)
}

/// Direct, in-process view of one namespace. Used by the master and by
/// tests; workers get the same contract over RPC.
pub struct LocalNamespace {
    name: String,
    prefix: Vec<u8>,
    root: Arc<RootDb>,
}

impl LocalNamespace {
    pub fn new(root: Arc<RootDb>, name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let prefix = namespace_prefix(&name)?;
        Ok(Self { name, prefix, root })
    }

    fn raw_key(&self, key: &[u8]) -> Vec<u8> {
        let mut raw = Vec::with_capacity(self.prefix.len() + key.len());
        raw.extend_from_slice(&self.prefix);
        raw.extend_from_slice(key);
        raw
    }
}

#[async_trait]
impl Namespace for LocalNamespace {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.root.get(&self.raw_key(key))
    }

    async fn put(&self, key: &[u8], value: &[u8], sync: bool) -> Result<()> {
        self.root.put(&self.raw_key(key), value, sync)
    }

    async fn del(&self, key: &[u8], sync: bool) -> Result<()> {
        self.root.del(&self.raw_key(key), sync)
    }

    async fn scan(&self, range: ScanRange) -> Result<Box<dyn Scan>> {
        let raw: ResolvedRange = compose_range(&self.prefix, &range);
        Ok(Box::new(LocalScan::new(
            Arc::clone(&self.root),
            raw,
            self.prefix.len(),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_namespace_prefix_is_reversible_and_alias_free() {
        // ("a", "bc") and ("ab", "c") must land on different raw keys
        let mut k1 = namespace_prefix("a").unwrap();
        k1.extend_from_slice(b"bc");
        let mut k2 = namespace_prefix("ab").unwrap();
        k2.extend_from_slice(b"c");
        assert_ne!(k1, k2);

        let prefix = namespace_prefix("bucket").unwrap();
        assert_eq!(&prefix[..2], &(6u16).to_be_bytes());
        assert_eq!(&prefix[2..], b"bucket");
    }

    #[test]
    fn test_prefix_upper_bound() {
        assert_eq!(prefix_upper_bound(b"ab"), Some(b"ac".to_vec()));
        assert_eq!(prefix_upper_bound(&[0x61, 0xFF]), Some(vec![0x62]));
        assert_eq!(prefix_upper_bound(&[0xFF, 0xFF]), None);
    }

    #[tokio::test]
    async fn test_local_namespace_isolation() {
        let dir = tempdir().unwrap();
        let root = Arc::new(RootDb::open(dir.path()).unwrap());

        let ns_a = LocalNamespace::new(Arc::clone(&root), "a").unwrap();
        let ns_ab = LocalNamespace::new(Arc::clone(&root), "ab").unwrap();

        ns_a.put(b"bc", b"from-a", true).await.unwrap();
        ns_ab.put(b"c", b"from-ab", true).await.unwrap();

        assert_eq!(ns_a.get(b"bc").await.unwrap(), Some(b"from-a".to_vec()));
        assert_eq!(ns_ab.get(b"c").await.unwrap(), Some(b"from-ab".to_vec()));

        // scanning one namespace never leaks the other's keys
        let mut scan = ns_a.scan(ScanRange::default()).await.unwrap();
        let mut seen = Vec::new();
        while let Some(entry) = scan.next().await.unwrap() {
            seen.push((entry.key, entry.value));
        }
        assert_eq!(seen, vec![(b"bc".to_vec(), b"from-a".to_vec())]);
    }

    #[tokio::test]
    async fn test_local_namespace_scan_bounds_and_strip() {
        let dir = tempdir().unwrap();
        let root = Arc::new(RootDb::open(dir.path()).unwrap());
        let ns = LocalNamespace::new(root, "b1").unwrap();

        for key in ["a/1", "a/2", "b/1"] {
            ns.put(key.as_bytes(), b"{}", false).await.unwrap();
        }

        let mut scan = ns
            .scan(ScanRange {
                gte: Some(b"a/".to_vec()),
                lt: Some(b"a0".to_vec()),
                ..Default::default()
            })
            .await
            .unwrap();

        let mut keys = Vec::new();
        while let Some(entry) = scan.next().await.unwrap() {
            keys.push(String::from_utf8(entry.key).unwrap());
        }
        assert_eq!(keys, vec!["a/1", "a/2"]);
    }

    #[test]
    fn test_registry_create_is_idempotent_and_publishes() {
        let dir = tempdir().unwrap();
        let root = RootDb::open(dir.path()).unwrap();
        let mut registry = Registry::bootstrap(dir.path(), &root).unwrap();

        assert!(registry.contains(METASTORE_NAMESPACE));
        let v1 = Manifest::load(dir.path()).unwrap().version;

        registry.create_namespace("alpha").unwrap();
        let manifest = Manifest::load(dir.path()).unwrap();
        assert!(manifest.advertises("alpha"));
        assert!(manifest.version > v1);
        assert!(!dir.path().join(MANIFEST_TMP_FILE).exists());

        // creating again neither fails nor republishes
        let v2 = manifest.version;
        registry.create_namespace("alpha").unwrap();
        assert_eq!(Manifest::load(dir.path()).unwrap().version, v2);
    }

    #[test]
    fn test_registry_rebuild_from_metastore() {
        let dir = tempdir().unwrap();
        let root = RootDb::open(dir.path()).unwrap();

        // record two buckets the way the metastore does
        let prefix = namespace_prefix(METASTORE_NAMESPACE).unwrap();
        for bucket in ["alpha", "beta"] {
            let mut key = prefix.clone();
            key.extend_from_slice(bucket.as_bytes());
            root.put(&key, b"{}", true).unwrap();
        }

        let registry = Registry::bootstrap(dir.path(), &root).unwrap();
        assert!(registry.contains("alpha"));
        assert!(registry.contains("beta"));
        let manifest = Manifest::load(dir.path()).unwrap();
        assert!(manifest.advertises("alpha"));
        assert!(manifest.advertises(METASTORE_NAMESPACE));
        assert_eq!(manifest.methods[0].name, "createNamespace");
    }

    #[test]
    fn test_manifest_load_failures() {
        let dir = tempdir().unwrap();
        assert!(Manifest::load(dir.path()).is_err());

        std::fs::write(dir.path().join(MANIFEST_FILE), b"not json").unwrap();
        let err = Manifest::load(dir.path()).unwrap_err();
        assert!(matches!(err, Error::Manifest(_)));
    }
}

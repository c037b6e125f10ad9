//! Listing engine
//!
//! Streams a ranged scan from a bucket namespace through a pluggable
//! filter. The filter decides when the scan can stop early; the driver
//! owns the cursor and always closes it, so completion happens exactly
//! once no matter how the scan ends.

mod delimiter;
mod multipart;

pub use delimiter::{DelimiterFilter, ObjectEntry, ObjectListing};
pub use multipart::{MultipartUploadsFilter, UploadEntry, UploadListing};

use crate::kv::Namespace;
use cellar_common::Result;
use cellar_proto::{ScanEntry, ScanRange};
use tracing::warn;

/// Default cap on returned keys, matching the layer above.
pub const DEFAULT_MAX_KEYS: u64 = 10_000;

/// Section of a bucket namespace holding multipart upload overviews.
pub const MPU_SECTION: &str = "overview";

/// Default separator between overview key components.
pub const DEFAULT_SPLITTER: &str = "..|..";

/// Listing kind selector.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ListingType {
    #[default]
    Delimiter,
    MultipartUploads,
}

/// Parameters recognized by the listing engine.
#[derive(Clone, Debug, Default)]
pub struct ListingParams {
    pub listing_type: ListingType,
    /// Restrict the scan to keys with this prefix.
    pub prefix: Option<String>,
    /// Plain listing only: scan begins strictly after this key.
    pub marker: Option<String>,
    /// Groups keys sharing a common prefix up to the delimiter.
    pub delimiter: Option<String>,
    /// Upper bound on returned keys.
    pub max_keys: Option<u64>,
    /// Multipart listing: resume strictly after this object key.
    pub key_marker: Option<String>,
    /// Multipart listing: resume strictly after this upload id.
    pub upload_id_marker: Option<String>,
    /// Multipart listing: separator between overview key components.
    pub splitter: Option<String>,
}

/// Smallest string greater than `key` with the same length, obtained by
/// incrementing the last byte. Yields the half-open prefix upper bound
/// `[key, advance(key))`.
///
/// Returns `None` for an empty key or a trailing `0xFF` byte, where no
/// same-length successor exists; callers fall back to an unbounded scan
/// and rely on the filter's prefix check to stop.
pub fn advance(key: &[u8]) -> Option<Vec<u8>> {
    let mut out = key.to_vec();
    let last = out.last_mut()?;
    if *last == 0xFF {
        return None;
    }
    *last += 1;
    Some(out)
}

/// Streaming filter: `filter` returns `false` to terminate the scan.
pub trait ListFilter {
    fn filter(&mut self, entry: &ScanEntry) -> bool;
}

/// List the objects of a bucket namespace.
pub async fn list_objects<N>(ns: &N, params: &ListingParams) -> Result<ObjectListing>
where
    N: Namespace + ?Sized,
{
    let max_keys = params.max_keys.unwrap_or(DEFAULT_MAX_KEYS);
    let mut filter =
        DelimiterFilter::new(params.prefix.clone(), params.delimiter.clone(), max_keys);
    if max_keys == 0 {
        return Ok(filter.into_result());
    }

    let mut range = ScanRange::default();
    if let Some(prefix) = &params.prefix {
        range.start = Some(prefix.as_bytes().to_vec());
        range.lt = advance(prefix.as_bytes());
    }
    if let Some(marker) = &params.marker {
        range.gt = Some(marker.as_bytes().to_vec());
    }

    drive(ns, range, &mut filter).await?;
    Ok(filter.into_result())
}

/// List the in-progress multipart uploads of a bucket namespace.
pub async fn list_multipart_uploads<N>(ns: &N, params: &ListingParams) -> Result<UploadListing>
where
    N: Namespace + ?Sized,
{
    let splitter = params
        .splitter
        .clone()
        .unwrap_or_else(|| DEFAULT_SPLITTER.to_string());
    let section = format!("{MPU_SECTION}{splitter}");
    let max_keys = params.max_keys.unwrap_or(DEFAULT_MAX_KEYS);
    let mut filter = MultipartUploadsFilter::new(
        section.clone(),
        splitter.clone(),
        params.prefix.clone(),
        params.delimiter.clone(),
        max_keys,
    );
    if max_keys == 0 {
        return Ok(filter.into_result());
    }

    let query_prefix = match &params.prefix {
        Some(prefix) => format!("{section}{prefix}"),
        None => section,
    };
    let mut range = ScanRange {
        start: Some(query_prefix.as_bytes().to_vec()),
        lt: advance(query_prefix.as_bytes()),
        ..Default::default()
    };
    if let Some(key_marker) = &params.key_marker {
        let mut mark = format!("{MPU_SECTION}{splitter}{key_marker}{splitter}");
        if let Some(upload_id_marker) = &params.upload_id_marker {
            mark.push_str(upload_id_marker);
        }
        range.gte = advance(mark.as_bytes());
    }

    drive(ns, range, &mut filter).await?;
    Ok(filter.into_result())
}

/// Pump the scan through the filter. The cursor is closed on every exit
/// path; an early terminate closes it before the result is built.
async fn drive<N, F>(ns: &N, range: ScanRange, filter: &mut F) -> Result<()>
where
    N: Namespace + ?Sized,
    F: ListFilter,
{
    let mut scan = ns.scan(range).await?;
    loop {
        match scan.next().await {
            Ok(Some(entry)) => {
                if !filter.filter(&entry) {
                    scan.close().await?;
                    return Ok(());
                }
            }
            Ok(None) => {
                if let Err(e) = scan.close().await {
                    warn!(error = %e, "closing exhausted scan failed");
                }
                return Ok(());
            }
            Err(e) => {
                let _ = scan.close().await;
                return Err(e);
            }
        }
    }
}

//! Multipart-upload listing extension.
//!
//! Upload overviews are stored under keys of the form
//! `overview<splitter><objectKey><splitter><uploadId>`; the filter
//! parses them back into `(key, uploadId)` pairs and applies the same
//! prefix/delimiter grouping as the plain listing, on the object key.

use super::ListFilter;
use cellar_proto::ScanEntry;

/// One in-progress upload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadEntry {
    pub key: String,
    pub upload_id: String,
    /// Serialized upload overview (JSON text).
    pub value: String,
}

/// Payload of a multipart-upload listing.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UploadListing {
    pub uploads: Vec<UploadEntry>,
    pub common_prefixes: Vec<String>,
    pub is_truncated: bool,
    pub next_key_marker: Option<String>,
    pub next_upload_id_marker: Option<String>,
}

/// Streaming filter for multipart-upload listings.
pub struct MultipartUploadsFilter {
    /// Fixed query prefix every overview key carries
    /// (`overview<splitter>`), stripped before parsing.
    query_prefix: String,
    splitter: String,
    prefix: Option<String>,
    delimiter: Option<String>,
    max_keys: u64,
    count: u64,
    uploads: Vec<UploadEntry>,
    common_prefixes: Vec<String>,
    is_truncated: bool,
    next_key_marker: Option<String>,
    next_upload_id_marker: Option<String>,
}

impl MultipartUploadsFilter {
    pub fn new(
        query_prefix: String,
        splitter: String,
        prefix: Option<String>,
        delimiter: Option<String>,
        max_keys: u64,
    ) -> Self {
        Self {
            query_prefix,
            splitter,
            prefix,
            delimiter,
            max_keys,
            count: 0,
            uploads: Vec::new(),
            common_prefixes: Vec::new(),
            is_truncated: false,
            next_key_marker: None,
            next_upload_id_marker: None,
        }
    }

    /// Build the listing payload.
    pub fn into_result(self) -> UploadListing {
        let truncated = self.is_truncated;
        UploadListing {
            uploads: self.uploads,
            common_prefixes: self.common_prefixes,
            is_truncated: truncated,
            next_key_marker: if truncated { self.next_key_marker } else { None },
            next_upload_id_marker: if truncated { self.next_upload_id_marker } else { None },
        }
    }
}

impl ListFilter for MultipartUploadsFilter {
    fn filter(&mut self, entry: &ScanEntry) -> bool {
        let key = String::from_utf8_lossy(&entry.key).into_owned();

        // leaving the overview section ends the listing
        let Some(rest) = key.strip_prefix(self.query_prefix.as_str()) else {
            return false;
        };
        // object keys may themselves contain the splitter; the upload id
        // never does, so split from the right
        let Some((obj_key, upload_id)) = rest.rsplit_once(self.splitter.as_str()) else {
            return false;
        };

        if let Some(prefix) = &self.prefix {
            if !obj_key.starts_with(prefix.as_str()) {
                return false;
            }
        }
        if self.count >= self.max_keys {
            self.is_truncated = true;
            return false;
        }

        if let Some(delimiter) = &self.delimiter {
            let offset = self.prefix.as_ref().map_or(0, String::len);
            if let Some(idx) = obj_key[offset..].find(delimiter.as_str()) {
                let common = obj_key[..offset + idx + delimiter.len()].to_string();
                if self.common_prefixes.last() == Some(&common) {
                    return true;
                }
                self.next_key_marker = Some(common.clone());
                self.next_upload_id_marker = None;
                self.common_prefixes.push(common);
                self.count += 1;
                return true;
            }
        }

        self.next_key_marker = Some(obj_key.to_string());
        self.next_upload_id_marker = Some(upload_id.to_string());
        self.uploads.push(UploadEntry {
            key: obj_key.to_string(),
            upload_id: upload_id.to_string(),
            value: String::from_utf8_lossy(&entry.value).into_owned(),
        });
        self.count += 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listing::DEFAULT_SPLITTER;

    fn filter_with(prefix: Option<&str>, delimiter: Option<&str>, max_keys: u64) -> MultipartUploadsFilter {
        MultipartUploadsFilter::new(
            format!("overview{DEFAULT_SPLITTER}"),
            DEFAULT_SPLITTER.to_string(),
            prefix.map(str::to_string),
            delimiter.map(str::to_string),
            max_keys,
        )
    }

    fn entry(obj_key: &str, upload_id: &str) -> ScanEntry {
        ScanEntry {
            key: format!("overview{DEFAULT_SPLITTER}{obj_key}{DEFAULT_SPLITTER}{upload_id}")
                .into_bytes(),
            value: b"{}".to_vec(),
        }
    }

    #[test]
    fn test_parses_overview_keys() {
        let mut filter = filter_with(None, None, 100);
        assert!(filter.filter(&entry("doc.txt", "upload-1")));
        assert!(filter.filter(&entry("img.png", "upload-2")));
        // keys outside the overview section terminate the scan
        assert!(!filter.filter(&ScanEntry {
            key: b"doc.txt".to_vec(),
            value: b"{}".to_vec(),
        }));

        let listing = filter.into_result();
        assert_eq!(listing.uploads.len(), 2);
        assert_eq!(listing.uploads[0].key, "doc.txt");
        assert_eq!(listing.uploads[0].upload_id, "upload-1");
        assert!(!listing.is_truncated);
    }

    #[test]
    fn test_object_key_containing_splitter() {
        let mut filter = filter_with(None, None, 100);
        let odd_key = format!("weird{DEFAULT_SPLITTER}name");
        assert!(filter.filter(&entry(&odd_key, "upload-1")));
        let listing = filter.into_result();
        assert_eq!(listing.uploads[0].key, odd_key);
        assert_eq!(listing.uploads[0].upload_id, "upload-1");
    }

    #[test]
    fn test_delimiter_groups_object_keys() {
        let mut filter = filter_with(None, Some("/"), 100);
        assert!(filter.filter(&entry("a/1", "u1")));
        assert!(filter.filter(&entry("a/2", "u2")));
        assert!(filter.filter(&entry("b", "u3")));
        let listing = filter.into_result();
        assert_eq!(listing.common_prefixes, vec!["a/"]);
        assert_eq!(listing.uploads.len(), 1);
        assert_eq!(listing.uploads[0].key, "b");
    }

    #[test]
    fn test_max_keys_sets_markers() {
        let mut filter = filter_with(None, None, 2);
        assert!(filter.filter(&entry("a", "u1")));
        assert!(filter.filter(&entry("b", "u2")));
        assert!(!filter.filter(&entry("c", "u3")));
        let listing = filter.into_result();
        assert!(listing.is_truncated);
        assert_eq!(listing.next_key_marker.as_deref(), Some("b"));
        assert_eq!(listing.next_upload_id_marker.as_deref(), Some("u2"));
    }
}

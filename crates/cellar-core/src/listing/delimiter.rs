//! Plain delimiter listing extension.
//!
//! Groups keys sharing a common prefix up to the delimiter, the way the
//! S3 `ListObjects` call expects. Keys arrive in byte-ascending order,
//! so grouped keys are contiguous and deduplication only needs to look
//! at the last emitted common prefix.

use super::ListFilter;
use cellar_proto::ScanEntry;

/// One listed object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectEntry {
    pub key: String,
    /// Serialized object record (JSON text).
    pub value: String,
}

/// Payload of a plain listing.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ObjectListing {
    pub contents: Vec<ObjectEntry>,
    pub common_prefixes: Vec<String>,
    pub is_truncated: bool,
    /// Key to resume from, present only when truncated.
    pub next_marker: Option<String>,
}

/// Streaming filter for plain listings.
pub struct DelimiterFilter {
    prefix: Option<String>,
    delimiter: Option<String>,
    max_keys: u64,
    count: u64,
    contents: Vec<ObjectEntry>,
    common_prefixes: Vec<String>,
    is_truncated: bool,
    next_marker: Option<String>,
}

impl DelimiterFilter {
    pub fn new(prefix: Option<String>, delimiter: Option<String>, max_keys: u64) -> Self {
        Self {
            prefix,
            delimiter,
            max_keys,
            count: 0,
            contents: Vec::new(),
            common_prefixes: Vec::new(),
            is_truncated: false,
            next_marker: None,
        }
    }

    /// Build the listing payload.
    pub fn into_result(self) -> ObjectListing {
        ObjectListing {
            contents: self.contents,
            common_prefixes: self.common_prefixes,
            is_truncated: self.is_truncated,
            next_marker: if self.is_truncated { self.next_marker } else { None },
        }
    }
}

impl ListFilter for DelimiterFilter {
    fn filter(&mut self, entry: &ScanEntry) -> bool {
        let key = String::from_utf8_lossy(&entry.key).into_owned();

        // The scan may run without an upper bound; leaving the prefix
        // ends the listing.
        if let Some(prefix) = &self.prefix {
            if !key.starts_with(prefix.as_str()) {
                return false;
            }
        }
        if self.count >= self.max_keys {
            self.is_truncated = true;
            return false;
        }

        if let Some(delimiter) = &self.delimiter {
            let offset = self.prefix.as_ref().map_or(0, String::len);
            if let Some(idx) = key[offset..].find(delimiter.as_str()) {
                let common = key[..offset + idx + delimiter.len()].to_string();
                if self.common_prefixes.last() == Some(&common) {
                    return true;
                }
                self.next_marker = Some(common.clone());
                self.common_prefixes.push(common);
                self.count += 1;
                return true;
            }
        }

        self.next_marker = Some(key.clone());
        self.contents.push(ObjectEntry {
            key,
            value: String::from_utf8_lossy(&entry.value).into_owned(),
        });
        self.count += 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(key: &str) -> ScanEntry {
        ScanEntry {
            key: key.as_bytes().to_vec(),
            value: b"{}".to_vec(),
        }
    }

    fn feed(filter: &mut DelimiterFilter, keys: &[&str]) -> bool {
        keys.iter().all(|k| filter.filter(&entry(k)))
    }

    #[test]
    fn test_groups_common_prefixes() {
        let mut filter = DelimiterFilter::new(None, Some("/".into()), 100);
        assert!(feed(
            &mut filter,
            &["photos/2021/a", "photos/2021/b", "photos/2022/c", "readme"],
        ));
        let listing = filter.into_result();
        assert_eq!(listing.common_prefixes, vec!["photos/"]);
        assert_eq!(listing.contents.len(), 1);
        assert_eq!(listing.contents[0].key, "readme");
    }

    #[test]
    fn test_prefix_and_delimiter() {
        let mut filter = DelimiterFilter::new(Some("photos/".into()), Some("/".into()), 100);
        assert!(feed(
            &mut filter,
            &["photos/2021/a", "photos/2021/b", "photos/2022/c"],
        ));
        // leaving the prefix terminates
        assert!(!filter.filter(&entry("videos/x")));
        let listing = filter.into_result();
        assert_eq!(listing.common_prefixes, vec!["photos/2021/", "photos/2022/"]);
        assert!(listing.contents.is_empty());
        assert!(!listing.is_truncated);
    }

    #[test]
    fn test_common_prefixes_count_toward_max_keys() {
        let mut filter = DelimiterFilter::new(None, Some("/".into()), 2);
        assert!(filter.filter(&entry("a/1")));
        assert!(filter.filter(&entry("b/1")));
        // a third group trips the cap
        assert!(!filter.filter(&entry("c/1")));
        let listing = filter.into_result();
        assert_eq!(listing.common_prefixes, vec!["a/", "b/"]);
        assert!(listing.is_truncated);
        assert_eq!(listing.next_marker.as_deref(), Some("b/"));
    }

    #[test]
    fn test_no_delimiter_returns_raw_keys() {
        let mut filter = DelimiterFilter::new(None, None, 100);
        assert!(feed(&mut filter, &["a/1", "a/2"]));
        let listing = filter.into_result();
        assert_eq!(listing.contents.len(), 2);
        assert!(listing.common_prefixes.is_empty());
        assert_eq!(listing.next_marker, None);
    }
}

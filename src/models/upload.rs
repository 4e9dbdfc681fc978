//! Request-scoped upload records: decoded candidates and sanitized batches.

use bytes::Bytes;
use serde::Serialize;

/// A file part decoded from a multipart body. Nothing in it is trusted.
#[derive(Clone, Debug)]
pub struct UploadCandidate {
    /// Client-supplied filename from `Content-Disposition`.
    pub declared_name: String,

    /// Raw file content.
    pub bytes: Bytes,

    /// Form field name, when the part carried one. Diagnostic only.
    pub field_name: Option<String>,

    /// Part-level `Content-Type`. Logged, never used for classification.
    pub declared_content_type: Option<String>,
}

/// What the byte signature says a buffer is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClassificationResult {
    /// `None` means no recognizable signature.
    pub detected_type: Option<&'static str>,
}

/// A candidate that passed the accept policy and has a storage name.
#[derive(Clone, Debug)]
pub struct ClearedFile {
    pub original_name: String,
    pub unique_name: String,
    pub mime_type: &'static str,
    pub bytes: Bytes,
}

/// Outcome of one sanitize call. Each named candidate appears in exactly one list.
#[derive(Clone, Debug, Default)]
pub struct SanitizedBatch {
    pub cleared: Vec<ClearedFile>,
    pub rejected: Vec<String>,
}

impl SanitizedBatch {
    /// True when the request carried no file parts at all.
    pub fn is_empty(&self) -> bool {
        self.cleared.is_empty() && self.rejected.is_empty()
    }

    pub fn unique_names(&self) -> Vec<String> {
        self.cleared.iter().map(|f| f.unique_name.clone()).collect()
    }

    /// Keep only the first cleared file; the rest move to `rejected`.
    pub fn limit_to_first(&mut self) {
        if self.cleared.len() > 1 {
            let extra = self.cleared.split_off(1);
            self.rejected
                .extend(extra.into_iter().map(|f| f.original_name));
        }
    }

    pub fn summary(&self) -> BatchSummary {
        BatchSummary {
            cleared: self
                .cleared
                .iter()
                .map(|f| ClearedName {
                    original: f.original_name.clone(),
                    unique: f.unique_name.clone(),
                })
                .collect(),
            rejected: self.rejected.clone(),
        }
    }
}

/// Client-facing view of a batch: names only, no bytes.
#[derive(Serialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub cleared: Vec<ClearedName>,
    pub rejected: Vec<String>,
}

#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct ClearedName {
    pub original: String,
    pub unique: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cleared(name: &str) -> ClearedFile {
        ClearedFile {
            original_name: name.into(),
            unique_name: format!("{}-0011223344556677.png", name),
            mime_type: "image/png",
            bytes: Bytes::new(),
        }
    }

    #[test]
    fn limit_to_first_moves_extras_to_rejected() {
        let mut batch = SanitizedBatch {
            cleared: vec![cleared("a"), cleared("b"), cleared("c")],
            rejected: vec!["x.txt".into()],
        };
        batch.limit_to_first();
        assert_eq!(batch.cleared.len(), 1);
        assert_eq!(batch.cleared[0].original_name, "a");
        assert_eq!(batch.rejected, vec!["x.txt", "b", "c"]);
    }

    #[test]
    fn empty_batch_means_nothing_submitted() {
        assert!(SanitizedBatch::default().is_empty());
        let batch = SanitizedBatch {
            cleared: vec![],
            rejected: vec!["x.txt".into()],
        };
        assert!(!batch.is_empty());
    }
}

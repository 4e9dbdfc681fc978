//! src/services/sanitizer.rs
//!
//! Sanitizer: turns decoded candidates into a `SanitizedBatch`.
//!
//! Each candidate is sniffed on the blocking pool, checked against the
//! configured accept pattern and, when cleared, given a storage name of the
//! form `<stem>-<hex token>.<ext>`. Client-supplied names only ever contribute
//! a cleaned-up stem and (when it agrees with the sniffed type) an extension.

use crate::{
    models::upload::{ClassificationResult, ClearedFile, SanitizedBatch, UploadCandidate},
    services::classifier,
};
use futures::future::join_all;
use rand::RngCore;
use regex::Regex;
use std::collections::HashSet;
use tracing::{debug, warn};

/// Random bytes per storage name token (hex-encoded to twice as many chars).
const TOKEN_BYTES: usize = 8;
const MAX_STEM_LEN: usize = 64;
const FALLBACK_STEM: &str = "file";

/// Which sniffed media types are accepted, e.g. `^image/(jpeg|png)$`.
#[derive(Clone, Debug)]
pub struct AcceptPolicy {
    pattern: Regex,
}

impl AcceptPolicy {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
        })
    }

    pub fn accepts(&self, mime_type: &str) -> bool {
        self.pattern.is_match(mime_type)
    }

    pub fn as_str(&self) -> &str {
        self.pattern.as_str()
    }
}

#[derive(Clone, Debug)]
pub struct Sanitizer {
    policy: AcceptPolicy,
}

impl Sanitizer {
    pub fn new(policy: AcceptPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &AcceptPolicy {
        &self.policy
    }

    /// Classify every candidate concurrently and partition the results.
    ///
    /// Output order follows input order within both partitions. A candidate
    /// whose classification task fails is rejected on its own.
    pub async fn sanitize(&self, candidates: Vec<UploadCandidate>) -> SanitizedBatch {
        let tasks = candidates.iter().map(|candidate| {
            let bytes = candidate.bytes.clone();
            tokio::task::spawn_blocking(move || classifier::classify(&bytes))
        });
        let results = join_all(tasks).await;

        let mut batch = SanitizedBatch::default();
        let mut minted = HashSet::new();
        for (candidate, result) in candidates.into_iter().zip(results) {
            match result {
                Ok(ClassificationResult {
                    detected_type: Some(mime_type),
                }) if self.policy.accepts(mime_type) => {
                    let unique_name = mint_unique_name(&candidate.declared_name, mime_type, &mut minted);
                    debug!(
                        "cleared `{}` as {} -> {}",
                        candidate.declared_name, mime_type, unique_name
                    );
                    batch.cleared.push(ClearedFile {
                        original_name: candidate.declared_name,
                        unique_name,
                        mime_type,
                        bytes: candidate.bytes,
                    });
                }
                Ok(ClassificationResult { detected_type }) => {
                    debug!(
                        "rejected `{}`: detected {:?}, declared {:?}",
                        candidate.declared_name, detected_type, candidate.declared_content_type
                    );
                    batch.rejected.push(candidate.declared_name);
                }
                Err(err) => {
                    warn!(
                        "classification of `{}` failed, rejecting: {}",
                        candidate.declared_name, err
                    );
                    batch.rejected.push(candidate.declared_name);
                }
            }
        }

        batch
    }
}

/// Build a storage name that has not been handed out in this batch yet.
fn mint_unique_name(declared_name: &str, mime_type: &str, minted: &mut HashSet<String>) -> String {
    loop {
        let name = unique_name(declared_name, mime_type);
        if minted.insert(name.clone()) {
            return name;
        }
    }
}

/// `<stem>-<token>.<ext>` for a declared name and its sniffed type.
pub fn unique_name(declared_name: &str, mime_type: &str) -> String {
    let (stem, extension) = split_declared_name(declared_name);
    let extension = match extension {
        Some(ext) if classifier::extension_matches(mime_type, ext) => ext.to_ascii_lowercase(),
        _ => classifier::canonical_extension(mime_type).to_string(),
    };
    format!("{}-{}.{}", clean_stem(stem), random_token(), extension)
}

fn random_token() -> String {
    let mut raw = [0u8; TOKEN_BYTES];
    rand::rng().fill_bytes(&mut raw);
    hex::encode(raw)
}

/// Final path component of a client filename, split into stem and extension.
fn split_declared_name(declared_name: &str) -> (&str, Option<&str>) {
    let base = declared_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(declared_name);
    match base.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => (stem, Some(ext)),
        _ => (base, None),
    }
}

fn clean_stem(stem: &str) -> String {
    let cleaned: String = stem
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .take(MAX_STEM_LEN)
        .collect();
    let cleaned = cleaned.trim_matches(|c| c == '_' || c == '-');
    if cleaned.is_empty() {
        FALLBACK_STEM.to_string()
    } else {
        cleaned.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::classifier::fixtures::{GIF, JPEG, PNG, TEXT};
    use bytes::Bytes;

    fn candidate(name: &str, bytes: &'static [u8]) -> UploadCandidate {
        UploadCandidate {
            declared_name: name.into(),
            bytes: Bytes::from_static(bytes),
            field_name: None,
            declared_content_type: Some("image/png".into()),
        }
    }

    fn sanitizer() -> Sanitizer {
        Sanitizer::new(AcceptPolicy::new("^image/(jpeg|png)$").unwrap())
    }

    fn token_of(unique: &str, stem: &str, ext: &str) -> String {
        unique
            .strip_prefix(&format!("{}-", stem))
            .and_then(|rest| rest.strip_suffix(&format!(".{}", ext)))
            .unwrap_or_else(|| panic!("`{}` is not {}-<token>.{}", unique, stem, ext))
            .to_string()
    }

    #[tokio::test]
    async fn genuine_png_is_cleared_with_hex_token() {
        let batch = sanitizer().sanitize(vec![candidate("a.png", PNG)]).await;

        assert!(batch.rejected.is_empty());
        assert_eq!(batch.cleared.len(), 1);
        let cleared = &batch.cleared[0];
        assert_eq!(cleared.original_name, "a.png");
        assert_eq!(cleared.mime_type, "image/png");
        let token = token_of(&cleared.unique_name, "a", "png");
        assert_eq!(token.len(), TOKEN_BYTES * 2);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn renamed_text_is_rejected() {
        let batch = sanitizer().sanitize(vec![candidate("photo.png", TEXT)]).await;
        assert!(batch.cleared.is_empty());
        assert_eq!(batch.rejected, vec!["photo.png"]);
    }

    #[tokio::test]
    async fn type_outside_pattern_is_rejected() {
        let batch = sanitizer().sanitize(vec![candidate("anim.gif", GIF)]).await;
        assert_eq!(batch.rejected, vec!["anim.gif"]);
    }

    #[tokio::test]
    async fn partitions_keep_input_order() {
        let batch = sanitizer()
            .sanitize(vec![
                candidate("1.jpg", JPEG),
                candidate("2.txt", TEXT),
                candidate("3.png", PNG),
                candidate("4.png", b""),
                candidate("5.jpeg", JPEG),
            ])
            .await;

        let cleared: Vec<_> = batch.cleared.iter().map(|f| f.original_name.as_str()).collect();
        assert_eq!(cleared, vec!["1.jpg", "3.png", "5.jpeg"]);
        assert_eq!(batch.rejected, vec!["2.txt", "4.png"]);
        assert_eq!(batch.cleared.len() + batch.rejected.len(), 5);
    }

    #[tokio::test]
    async fn identical_names_get_distinct_storage_names() {
        let batch = sanitizer()
            .sanitize(vec![candidate("dup.png", PNG), candidate("dup.png", PNG)])
            .await;
        assert_eq!(batch.cleared.len(), 2);
        assert_ne!(batch.cleared[0].unique_name, batch.cleared[1].unique_name);
    }

    #[test]
    fn extension_comes_from_sniffed_type_when_declared_one_disagrees() {
        let name = unique_name("holiday.png", "image/jpeg");
        token_of(&name, "holiday", "jpg");

        let name = unique_name("holiday.JPEG", "image/jpeg");
        token_of(&name, "holiday", "jpeg");
    }

    #[test]
    fn hostile_names_are_flattened() {
        let name = unique_name("../../etc/pass wd.png", "image/png");
        token_of(&name, "pass_wd", "png");

        let name = unique_name("C:\\Users\\me\\.png", "image/png");
        token_of(&name, "png", "png");

        let name = unique_name("", "image/png");
        token_of(&name, FALLBACK_STEM, "png");
    }

    #[test]
    fn invalid_pattern_is_an_error() {
        assert!(AcceptPolicy::new("image/(png").is_err());
    }
}

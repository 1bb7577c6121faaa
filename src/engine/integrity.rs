// Ownership check for artifacts produced in the shared working area.
//
// Concurrent fetches share one directory, so each writes under a name that
// encodes requester, request and key digest. Only a file carrying this
// request's name is trusted as its artifact.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::config::{ARTIFACT_PREFIX, KEY_HASH_LEN};

/// Short digest of a resource key used in artifact names.
pub fn key_hash(key: &str) -> String {
    let digest = Sha256::digest(key.as_bytes());
    let mut hash = hex::encode(digest);
    hash.truncate(KEY_HASH_LEN);
    hash
}

/// The partitioned output name for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactName {
    pub requester: i64,
    pub request_id: String,
    pub key_hash: String,
}

impl ArtifactName {
    pub fn new(requester: i64, request_id: &str, key: &str) -> Self {
        Self {
            requester,
            request_id: request_id.to_string(),
            key_hash: key_hash(key),
        }
    }

    /// File stem without extension, e.g. `media_user42_<request>_<hash>`.
    pub fn stem(&self) -> String {
        expected_stem(self.requester, &self.request_id, &self.key_hash)
    }

    pub fn path_in(&self, dir: &Path, extension: &str) -> PathBuf {
        dir.join(format!("{}.{}", self.stem(), extension))
    }

    pub fn verify(&self, artifact: &Path) -> bool {
        verify(artifact, self.requester, &self.request_id, &self.key_hash)
    }
}

pub fn expected_stem(requester: i64, request_id: &str, key_hash: &str) -> String {
    format!("{}{}_{}_{}", ARTIFACT_PREFIX, requester, request_id, key_hash)
}

/// True only if `artifact` is an existing regular file whose stem is exactly
/// the name expected for this requester, request and key.
pub fn verify(artifact: &Path, requester: i64, request_id: &str, key_hash: &str) -> bool {
    let expected = expected_stem(requester, request_id, key_hash);
    let stem_matches = artifact
        .file_stem()
        .and_then(|stem| stem.to_str())
        .map(|stem| stem == expected)
        .unwrap_or(false);
    stem_matches && artifact.is_file()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_hash_is_stable_and_short() {
        let a = key_hash("https://v/1");
        assert_eq!(a.len(), KEY_HASH_LEN);
        assert_eq!(a, key_hash("https://v/1"));
        assert_ne!(a, key_hash("https://v/2"));
    }

    #[test]
    fn test_verify_accepts_own_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let name = ArtifactName::new(42, "req1", "https://v/1");
        let path = name.path_in(dir.path(), "mkv");
        std::fs::write(&path, b"data").unwrap();
        assert!(name.verify(&path));
    }

    #[test]
    fn test_verify_rejects_foreign_or_missing() {
        let dir = tempfile::tempdir().unwrap();
        let mine = ArtifactName::new(42, "req1", "https://v/1");
        let other_request = ArtifactName::new(42, "req2", "https://v/1");
        let other_key = ArtifactName::new(42, "req1", "https://v/2");
        let other_user = ArtifactName::new(7, "req1", "https://v/1");

        for foreign in [&other_request, &other_key, &other_user] {
            let path = foreign.path_in(dir.path(), "mp4");
            std::fs::write(&path, b"data").unwrap();
            assert!(!mine.verify(&path));
        }

        assert!(!mine.verify(&mine.path_in(dir.path(), "mp4")));
    }

    #[test]
    fn test_verify_rejects_prefix_extension() {
        let dir = tempfile::tempdir().unwrap();
        let mine = ArtifactName::new(4, "req1", "https://v/1");
        // media_user42_... must not pass for requester 4.
        let path = dir.path().join(format!("{}2_req1_{}.mp4", ARTIFACT_PREFIX, mine.key_hash));
        std::fs::write(&path, b"data").unwrap();
        assert!(!mine.verify(&path));
    }
}

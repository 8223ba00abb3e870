use md5::Md5;
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};

/// Hex digests of one attachment payload across all supported algorithms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigestSet {
    pub md5: String,
    pub sha1: String,
    pub sha256: String,
    pub sha512: String,
}

impl DigestSet {
    pub fn compute(data: &[u8]) -> Self {
        Self {
            md5: hex::encode(Md5::digest(data)),
            sha1: hex::encode(Sha1::digest(data)),
            sha256: hex::encode(Sha256::digest(data)),
            sha512: hex::encode(Sha512::digest(data)),
        }
    }

    /// Names of algorithms whose value differs from `original`.
    pub fn drift_from(&self, original: &DigestSet) -> Vec<&'static str> {
        let mut drifted = Vec::new();
        if self.md5 != original.md5 {
            drifted.push("md5");
        }
        if self.sha1 != original.sha1 {
            drifted.push("sha1");
        }
        if self.sha256 != original.sha256 {
            drifted.push("sha256");
        }
        if self.sha512 != original.sha512 {
            drifted.push("sha512");
        }
        drifted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_digests() {
        let digests = DigestSet::compute(b"abc");
        assert_eq!(digests.md5, "900150983cd24fb0d6963f7d28e17f72");
        assert_eq!(digests.sha1, "a9993e364706816aba3e25717850c26c9cd0d89d");
        assert_eq!(
            digests.sha256,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert!(digests.sha512.starts_with("ddaf35a193617aba"));
    }

    #[test]
    fn test_drift_detection() {
        let original = DigestSet::compute(b"invoice body");
        let same = DigestSet::compute(b"invoice body");
        assert!(same.drift_from(&original).is_empty());

        let modified = DigestSet::compute(b"invoice body, modified in transit");
        let drifted = modified.drift_from(&original);
        assert_eq!(drifted, vec!["md5", "sha1", "sha256", "sha512"]);
    }
}

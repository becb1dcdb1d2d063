//! Cache fingerprint derivation.

use crate::types::{AttachedFile, RequestOptions};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Deterministic digest identifying a logical request.
///
/// Fixed-width (SHA-256, hex-encoded). The same prompt, file list and
/// output-affecting options always produce the same fingerprint, regardless
/// of option ordering at the call site.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint {
    pub hash: String,
}

impl Fingerprint {
    pub fn new(hash: impl Into<String>) -> Self {
        Self { hash: hash.into() }
    }

    pub fn as_str(&self) -> &str {
        &self.hash
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.hash)
    }
}

impl From<&str> for Fingerprint {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Fingerprint {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// Pure fingerprint generator. No I/O, no side effects.
///
/// Normalization rules:
/// - prompt text is hashed verbatim (case- and whitespace-sensitive)
/// - file contents are hashed in declared order
/// - only output-affecting options participate (`model`, `temperature`,
///   `max_tokens`), encoded sorted-by-key; delivery controls such as
///   `bypass_cache` and exclusion lists never reach the digest
pub struct Fingerprinter {
    salt: Option<String>,
}

impl Fingerprinter {
    pub fn new() -> Self {
        Self { salt: None }
    }

    /// Namespace fingerprints, e.g. to keep two deployments sharing one
    /// durable store from reading each other's entries.
    pub fn with_salt(mut self, salt: impl Into<String>) -> Self {
        self.salt = Some(salt.into());
        self
    }

    pub fn fingerprint(
        &self,
        prompt: &str,
        files: &[AttachedFile],
        options: &RequestOptions,
    ) -> Fingerprint {
        let mut hasher = Sha256::new();
        hasher.update(b"prompt:");
        hasher.update(prompt.as_bytes());

        for file in files {
            // Length-prefixed so adjacent contents cannot collide by
            // shifting bytes across a file boundary.
            hasher.update(b"file:");
            hasher.update(file.content.len().to_be_bytes());
            hasher.update(file.content.as_bytes());
        }

        let mut opts: BTreeMap<&str, String> = BTreeMap::new();
        if let Some(ref model) = options.model {
            opts.insert("model", model.clone());
        }
        if let Some(t) = options.temperature {
            opts.insert("temperature", format!("{:.4}", t));
        }
        if let Some(m) = options.max_tokens {
            opts.insert("max_tokens", m.to_string());
        }
        if let Some(ref s) = self.salt {
            opts.insert("salt", s.clone());
        }
        let canonical = serde_json::to_string(&opts).unwrap_or_default();
        hasher.update(b"options:");
        hasher.update(canonical.as_bytes());

        let hash: String = hasher
            .finalize()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect();
        Fingerprint::new(hash)
    }
}

impl Default for Fingerprinter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts() -> RequestOptions {
        RequestOptions::new()
            .with_model("gpt-4o")
            .with_temperature(0.7)
            .with_max_tokens(256)
    }

    #[test]
    fn test_same_request_same_fingerprint() {
        let fp = Fingerprinter::new();
        let a = fp.fingerprint("What is 2+2?", &[], &opts());
        let b = fp.fingerprint("What is 2+2?", &[], &opts());
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn test_prompt_is_whitespace_sensitive() {
        let fp = Fingerprinter::new();
        let a = fp.fingerprint("What is 2+2?", &[], &opts());
        let b = fp.fingerprint("What is 2+2? ", &[], &opts());
        let c = fp.fingerprint("what is 2+2?", &[], &opts());
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_file_order_matters() {
        let fp = Fingerprinter::new();
        let one = AttachedFile::new("a.txt", "alpha");
        let two = AttachedFile::new("b.txt", "beta");
        let ab = fp.fingerprint("p", &[one.clone(), two.clone()], &opts());
        let ba = fp.fingerprint("p", &[two, one], &opts());
        assert_ne!(ab, ba);
    }

    #[test]
    fn test_file_boundaries_are_prefixed() {
        let fp = Fingerprinter::new();
        let split = vec![
            AttachedFile::new("a", "ab"),
            AttachedFile::new("b", "c"),
        ];
        let joined = vec![AttachedFile::new("a", "a"), AttachedFile::new("b", "bc")];
        assert_ne!(
            fp.fingerprint("p", &split, &opts()),
            fp.fingerprint("p", &joined, &opts())
        );
    }

    #[test]
    fn test_output_affecting_options_change_fingerprint() {
        let fp = Fingerprinter::new();
        let base = fp.fingerprint("p", &[], &opts());
        let hotter = fp.fingerprint("p", &[], &opts().with_temperature(1.0));
        let other_model = fp.fingerprint("p", &[], &opts().with_model("gpt-4o-mini"));
        assert_ne!(base, hotter);
        assert_ne!(base, other_model);
    }

    #[test]
    fn test_cache_controls_do_not_change_fingerprint() {
        let fp = Fingerprinter::new();
        let plain = fp.fingerprint("p", &[], &opts());
        let mut bypassing = opts();
        bypassing.bypass_cache = true;
        bypassing.exclude_backends.push("alpha".into());
        assert_eq!(plain, fp.fingerprint("p", &[], &bypassing));
    }

    #[test]
    fn test_salt_namespaces_keys() {
        let plain = Fingerprinter::new();
        let salted = Fingerprinter::new().with_salt("deploy-a");
        assert_ne!(
            plain.fingerprint("p", &[], &opts()),
            salted.fingerprint("p", &[], &opts())
        );
    }
}

// steplog-core/src/fingerprint.rs
use sha2::{Digest, Sha256};

/// Short, stable identifier for a secret so it can be referred to in logs
/// without printing it.
pub fn mask_fingerprint(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("sha256:{}", &digest[..12])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_is_stable_and_hides_secret() {
        let a = mask_fingerprint("hunter2");
        assert_eq!(a, mask_fingerprint("hunter2"));
        assert_ne!(a, mask_fingerprint("hunter3"));
        assert!(!a.contains("hunter2"));
        assert_eq!(a.len(), "sha256:".len() + 12);
    }
}

use sha2::{Digest, Sha256};

pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

pub fn sha256v(data: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for val in data {
        hasher.update(val)
    }
    hasher.finalize().into()
}

/// Per-epoch seed derived from a long-lived seed, so one seed reproduces
/// the draw of every epoch.
pub fn epoch_seed(seed: &[u8; 32], epoch: u64) -> [u8; 32] {
    sha256v(&[seed, &epoch.to_le_bytes()])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256() {
        let data = b"Hello, world!";
        let hash = sha256(data);
        assert_eq!(
            hash,
            [
                0x31, 0x5f, 0x5b, 0xdb, 0x76, 0xd0, 0x78, 0xc4, 0x3b, 0x8a, 0xc0, 0x06, 0x4e, 0x4a,
                0x01, 0x64, 0x61, 0x2b, 0x1f, 0xce, 0x77, 0xc8, 0x69, 0x34, 0x5b, 0xfc, 0x94, 0xc7,
                0x58, 0x94, 0xed, 0xd3
            ]
        );
    }

    #[test]
    fn test_sha256v_matches_concatenation() {
        assert_eq!(sha256v(&[b"Hello, ", b"world!"]), sha256(b"Hello, world!"));
    }

    #[test]
    fn test_epoch_seed_differs_per_epoch() {
        let seed = [7u8; 32];
        assert_eq!(epoch_seed(&seed, 3), epoch_seed(&seed, 3));
        assert_ne!(epoch_seed(&seed, 3), epoch_seed(&seed, 4));
    }
}

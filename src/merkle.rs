//! Merkle roots over ordered chunk hashes
//!
//! Binary tree over the raw digests; a level with an odd node count pairs its
//! last node with itself. The empty list hashes to SHA-256 of the empty string.
//!
//! Duplicate-last padding means `[a, b, c]` and `[a, b, c, c]` share a root;
//! file entries also pin `size` and the whole-file hash, which tell them apart.

use crate::chunk::ChunkHash;
use sha2::{Digest, Sha256};

/// Compute the Merkle root of an ordered list of hashes
pub fn merkle_root(hashes: &[ChunkHash]) -> ChunkHash {
    if hashes.is_empty() {
        return ChunkHash::digest(b"");
    }

    let mut level: Vec<ChunkHash> = hashes.to_vec();

    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| {
                let left = &pair[0];
                let right = pair.get(1).unwrap_or(left);
                hash_pair(left, right)
            })
            .collect();
    }

    level[0]
}

fn hash_pair(left: &ChunkHash, right: &ChunkHash) -> ChunkHash {
    let mut hasher = Sha256::new();
    hasher.update(left.as_bytes());
    hasher.update(right.as_bytes());

    let mut digest = [0u8; 32];
    digest.copy_from_slice(&hasher.finalize());
    ChunkHash::from_digest(digest)
}

//! Binary Merkle tree over span hashes.
//!
//! Leaves and internal nodes are domain-separated, so a leaf can never be
//! reinterpreted as an internal node. Levels with an odd element count
//! duplicate their last element before pairing. The tree commits to the
//! ordered span list; per-leaf inclusion proofs let a holder disclose one
//! span without revealing the rest.

use poi_enc::{constant_time_eq_hex, domains, sha256_hex, HexHash};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Merkle tree errors
#[derive(Error, Debug)]
pub enum MerkleError {
    /// Proof requested for a leaf outside the tree
    #[error("Index out of bounds: {index} >= {len}")]
    IndexOutOfBounds { index: usize, len: usize },
}

/// Result type for Merkle operations
pub type MerkleResult<T> = Result<T, MerkleError>;

/// Which side of the pair a proof sibling sits on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SiblingPosition {
    Left,
    Right,
}

/// One step of an inclusion proof
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofSibling {
    pub hash: HexHash,
    pub position: SiblingPosition,
}

/// Inclusion proof for a single leaf
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MerkleProof {
    pub leaf_hash: HexHash,
    pub leaf_index: usize,
    pub siblings: Vec<ProofSibling>,
    pub root_hash: HexHash,
}

impl MerkleProof {
    /// Fold the siblings into the leaf and compare against the stated root.
    pub fn verify(&self) -> bool {
        self.verify_against(&self.root_hash)
    }

    /// Fold the siblings into the leaf and compare against an external root.
    pub fn verify_against(&self, root: &str) -> bool {
        let mut current = self.leaf_hash.clone();
        for sibling in &self.siblings {
            current = match sibling.position {
                SiblingPosition::Left => node_hash(&sibling.hash, &current),
                SiblingPosition::Right => node_hash(&current, &sibling.hash),
            };
        }
        constant_time_eq_hex(&current, root)
    }
}

/// Hash a span hash into a leaf
pub fn leaf_hash(span_hash: &str) -> HexHash {
    sha256_hex(&format!("{}{}", domains::LEAF, span_hash))
}

/// Hash two child hashes into an internal node
pub fn node_hash(left: &str, right: &str) -> HexHash {
    sha256_hex(&format!("{}{}|{}", domains::NODE, left, right))
}

/// Binary Merkle tree over an ordered list of span hashes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MerkleTree {
    /// Leaf hashes in span order
    pub leaf_hashes: Vec<HexHash>,
    /// Every level of the tree; level 0 is the leaves, the last is the root
    levels: Vec<Vec<HexHash>>,
    /// Root hash, empty string for an empty tree
    pub root_hash: HexHash,
    /// Tree depth, `ceil(log2(leaf_count))`
    pub depth: u32,
    /// Number of real leaves (duplicates excluded)
    pub leaf_count: usize,
}

impl MerkleTree {
    /// Build a tree from ordered span hashes.
    ///
    /// An empty list produces the empty tree with an empty-string root; a
    /// single span's leaf is its own root at depth 0.
    pub fn from_span_hashes<S: AsRef<str>>(span_hashes: &[S]) -> Self {
        if span_hashes.is_empty() {
            return Self {
                leaf_hashes: Vec::new(),
                levels: Vec::new(),
                root_hash: String::new(),
                depth: 0,
                leaf_count: 0,
            };
        }

        let leaves: Vec<HexHash> = span_hashes
            .iter()
            .map(|h| leaf_hash(h.as_ref()))
            .collect();
        let leaf_count = leaves.len();

        let mut levels = vec![leaves.clone()];
        let mut current = leaves.clone();
        while current.len() > 1 {
            if current.len() % 2 == 1 {
                // odd level: duplicate the last element before pairing
                current.push(current.last().cloned().unwrap_or_default());
            }
            let next: Vec<HexHash> = current
                .chunks(2)
                .map(|pair| node_hash(&pair[0], &pair[1]))
                .collect();
            levels.push(next.clone());
            current = next;
        }

        let root_hash = current.first().cloned().unwrap_or_default();
        let depth = (levels.len() - 1) as u32;

        Self {
            leaf_hashes: leaves,
            levels,
            root_hash,
            depth,
            leaf_count,
        }
    }

    /// Generate the inclusion proof for the leaf at `index`.
    ///
    /// Walks each level recording the sibling's hash and side; a duplicated
    /// last element serves as its own sibling. A single-leaf tree yields an
    /// empty sibling list.
    pub fn generate_proof(&self, index: usize) -> MerkleResult<MerkleProof> {
        if index >= self.leaf_count {
            return Err(MerkleError::IndexOutOfBounds {
                index,
                len: self.leaf_count,
            });
        }

        let mut siblings = Vec::with_capacity(self.depth as usize);
        let mut pos = index;
        for level in &self.levels[..self.levels.len() - 1] {
            let sibling_index = pos ^ 1;
            let sibling = level
                .get(sibling_index)
                .cloned()
                // the last element of an odd level pairs with itself
                .unwrap_or_else(|| level[pos].clone());
            let position = if pos % 2 == 0 {
                SiblingPosition::Right
            } else {
                SiblingPosition::Left
            };
            siblings.push(ProofSibling {
                hash: sibling,
                position,
            });
            pos /= 2;
        }

        Ok(MerkleProof {
            leaf_hash: self.leaf_hashes[index].clone(),
            leaf_index: index,
            siblings,
            root_hash: self.root_hash.clone(),
        })
    }

    /// Number of real leaves
    pub fn len(&self) -> usize {
        self.leaf_count
    }

    /// True when the tree has no leaves
    pub fn is_empty(&self) -> bool {
        self.leaf_count == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use poi_enc::sha256_hex;
    use proptest::prelude::*;

    fn span_hashes(n: usize) -> Vec<HexHash> {
        (0..n).map(|i| sha256_hex(&format!("span-{}", i))).collect()
    }

    #[test]
    fn test_empty_tree() {
        let tree = MerkleTree::from_span_hashes::<String>(&[]);
        assert_eq!(tree.root_hash, "");
        assert_eq!(tree.depth, 0);
        assert_eq!(tree.leaf_count, 0);
        assert!(tree.is_empty());
    }

    #[test]
    fn test_single_leaf_is_root() {
        let hashes = span_hashes(1);
        let tree = MerkleTree::from_span_hashes(&hashes);
        assert_eq!(tree.root_hash, leaf_hash(&hashes[0]));
        assert_eq!(tree.depth, 0);

        let proof = tree.generate_proof(0).unwrap();
        assert!(proof.siblings.is_empty());
        assert!(proof.verify());
    }

    #[test]
    fn test_two_leaves() {
        let hashes = span_hashes(2);
        let tree = MerkleTree::from_span_hashes(&hashes);
        assert_eq!(tree.depth, 1);
        assert_eq!(
            tree.root_hash,
            node_hash(&leaf_hash(&hashes[0]), &leaf_hash(&hashes[1]))
        );
        for i in 0..2 {
            assert!(tree.generate_proof(i).unwrap().verify());
        }
    }

    #[test]
    fn test_three_leaves_duplicates_last() {
        let hashes = span_hashes(3);
        let tree = MerkleTree::from_span_hashes(&hashes);
        assert_eq!(tree.depth, 2);
        assert_eq!(tree.leaf_count, 3);

        // leaf 2 pairs with a duplicate of itself at the first level
        let l0 = leaf_hash(&hashes[0]);
        let l1 = leaf_hash(&hashes[1]);
        let l2 = leaf_hash(&hashes[2]);
        let expected_root = node_hash(&node_hash(&l0, &l1), &node_hash(&l2, &l2));
        assert_eq!(tree.root_hash, expected_root);

        let proof = tree.generate_proof(2).unwrap();
        assert_eq!(proof.siblings[0].hash, l2);
        assert!(proof.verify());
    }

    #[test]
    fn test_proof_matches_independent_reconstruction() {
        for n in 1..=9 {
            let hashes = span_hashes(n);
            let tree = MerkleTree::from_span_hashes(&hashes);
            // rebuild the root by brute force, without the stored levels
            let mut level: Vec<HexHash> = hashes.iter().map(|h| leaf_hash(h)).collect();
            while level.len() > 1 {
                if level.len() % 2 == 1 {
                    level.push(level.last().unwrap().clone());
                }
                level = level
                    .chunks(2)
                    .map(|p| node_hash(&p[0], &p[1]))
                    .collect();
            }
            assert_eq!(tree.root_hash, level[0], "root mismatch at n={}", n);
            for i in 0..n {
                let proof = tree.generate_proof(i).unwrap();
                assert!(proof.verify_against(&level[0]), "proof {} of {}", i, n);
            }
        }
    }

    #[test]
    fn test_tampered_leaf_fails() {
        let hashes = span_hashes(4);
        let tree = MerkleTree::from_span_hashes(&hashes);
        let mut proof = tree.generate_proof(1).unwrap();
        proof.leaf_hash = sha256_hex("tampered");
        assert!(!proof.verify());
    }

    #[test]
    fn test_tampered_root_fails() {
        let hashes = span_hashes(4);
        let tree = MerkleTree::from_span_hashes(&hashes);
        let proof = tree.generate_proof(0).unwrap();
        assert!(!proof.verify_against(&sha256_hex("not-the-root")));
    }

    #[test]
    fn test_tampered_sibling_hash_fails() {
        let hashes = span_hashes(5);
        let tree = MerkleTree::from_span_hashes(&hashes);
        let mut proof = tree.generate_proof(3).unwrap();
        proof.siblings[1].hash = sha256_hex("wrong");
        assert!(!proof.verify());
    }

    #[test]
    fn test_tampered_sibling_position_fails() {
        let hashes = span_hashes(4);
        let tree = MerkleTree::from_span_hashes(&hashes);
        let mut proof = tree.generate_proof(2).unwrap();
        let flipped = match proof.siblings[0].position {
            SiblingPosition::Left => SiblingPosition::Right,
            SiblingPosition::Right => SiblingPosition::Left,
        };
        proof.siblings[0].position = flipped;
        assert!(!proof.verify());
    }

    #[test]
    fn test_out_of_bounds_proof() {
        let hashes = span_hashes(2);
        let tree = MerkleTree::from_span_hashes(&hashes);
        assert!(matches!(
            tree.generate_proof(2),
            Err(MerkleError::IndexOutOfBounds { index: 2, len: 2 })
        ));
    }

    #[test]
    fn test_depth_is_ceil_log2() {
        for (n, expected) in [(1usize, 0u32), (2, 1), (3, 2), (4, 2), (5, 3), (8, 3), (9, 4)] {
            let tree = MerkleTree::from_span_hashes(&span_hashes(n));
            assert_eq!(tree.depth, expected, "depth for {} leaves", n);
        }
    }

    proptest! {
        #[test]
        fn prop_all_proofs_verify(n in 1usize..40) {
            let hashes = span_hashes(n);
            let tree = MerkleTree::from_span_hashes(&hashes);
            for i in 0..n {
                let proof = tree.generate_proof(i).unwrap();
                prop_assert!(proof.verify_against(&tree.root_hash));
            }
        }

        #[test]
        fn prop_different_spans_different_roots(a in 1usize..20, b in 1usize..20) {
            prop_assume!(a != b);
            let ta = MerkleTree::from_span_hashes(&span_hashes(a));
            let tb = MerkleTree::from_span_hashes(&span_hashes(b));
            prop_assert_ne!(ta.root_hash, tb.root_hash);
        }
    }
}

//! Deterministic closest-node selection over a known node set
//!
//! There is no routing table or peer gossip: every provider holds the same
//! directory snapshot and picks the `k` nodes whose identifiers are closest to
//! a lookup key by XOR distance.

use crate::directory::{Node, NodeId};
use crate::error::{JodiError, Result};

/// XOR distance between a node id and a 32-byte lookup key.
///
/// Only the first 20 key bytes take part. The result is compared
/// lexicographically, which matches big-endian integer order.
pub fn distance(id: &NodeId, key: &[u8; 32]) -> NodeId {
    let mut out = [0u8; 20];
    for (i, byte) in out.iter_mut().enumerate() {
        *byte = id[i] ^ key[i];
    }
    out
}

/// Return the `k` nodes closest to `key`, nearest first.
///
/// Ties keep directory order. Fails when the directory is empty.
pub fn select(directory: &[Node], key: &[u8; 32], k: usize) -> Result<Vec<Node>> {
    if directory.is_empty() {
        return Err(JodiError::ProtocolFailure("node directory is empty".to_string()));
    }
    if k == 0 {
        return Err(JodiError::InvalidParameter("k must be at least 1".to_string()));
    }

    let mut ranked: Vec<(NodeId, &Node)> = directory
        .iter()
        .map(|node| (distance(&node.id, key), node))
        .collect();
    // stable sort keeps list order on equal distances
    ranked.sort_by(|a, b| a.0.cmp(&b.0));

    Ok(ranked.into_iter().take(k).map(|(_, node)| node.clone()).collect())
}

/// `"."`-joined hex ids of the selected nodes, as bound into billing hashes.
pub fn peers_string(nodes: &[Node]) -> String {
    nodes.iter().map(Node::id_hex).collect::<Vec<_>>().join(".")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::sha256;

    fn nodes(n: usize) -> Vec<Node> {
        (0..n)
            .map(|i| Node::new(format!("ms-{}.jodi.local", i), format!("10.0.0.{}:10431", i)))
            .collect()
    }

    #[test]
    fn test_select_is_deterministic() {
        let dir = nodes(8);
        let key = sha256(&[b"call id"]);
        let a = select(&dir, &key, 3).unwrap();
        let b = select(&dir, &key, 3).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 3);
    }

    #[test]
    fn test_select_returns_closest() {
        let dir = nodes(10);
        let key = sha256(&[b"lookup"]);
        let chosen = select(&dir, &key, 4).unwrap();

        let worst_chosen = chosen.iter().map(|n| distance(&n.id, &key)).max().unwrap();
        for node in dir.iter().filter(|n| !chosen.contains(n)) {
            assert!(distance(&node.id, &key) > worst_chosen);
        }
        for pair in chosen.windows(2) {
            assert!(distance(&pair[0].id, &key) <= distance(&pair[1].id, &key));
        }
    }

    #[test]
    fn test_select_independent_of_directory_order_without_ties() {
        let dir = nodes(6);
        let mut reversed = dir.clone();
        reversed.reverse();
        let key = sha256(&[b"k"]);
        assert_eq!(select(&dir, &key, 3).unwrap(), select(&reversed, &key, 3).unwrap());
    }

    #[test]
    fn test_ties_keep_list_order() {
        let mut twin = Node::new("ms-0.jodi.local", "first");
        let mut other = twin.clone();
        other.address = "second".to_string();
        twin.available = true;
        let dir = vec![twin, other];
        let chosen = select(&dir, &[0u8; 32], 1).unwrap();
        assert_eq!(chosen[0].address, "first");
    }

    #[test]
    fn test_k_larger_than_directory() {
        let dir = nodes(2);
        assert_eq!(select(&dir, &[7u8; 32], 5).unwrap().len(), 2);
    }

    #[test]
    fn test_empty_directory_fails() {
        let err = select(&[], &[0u8; 32], 3).unwrap_err();
        assert!(matches!(err, JodiError::ProtocolFailure(_)));
    }

    #[test]
    fn test_peers_string() {
        let dir = nodes(2);
        let peers = peers_string(&dir);
        assert_eq!(peers, format!("{}.{}", dir[0].id_hex(), dir[1].id_hex()));
    }
}

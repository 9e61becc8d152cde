//! On-disk storage of the node's private key.
//!
//! The key is kept in its protobuf encoding, the same blob
//! [`overlay_p2p::Node::create`] accepts.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use overlay_p2p::NodeIdentity;
use tracing::info;

/// Read the key at `path`, or generate one and write it there.
///
/// An existing file is never overwritten; if it holds garbage, node
/// construction reports it.
pub fn load_or_generate(path: &Path) -> Result<Vec<u8>> {
    if path.exists() {
        let key = fs::read(path)
            .with_context(|| format!("Failed to read identity from {}", path.display()))?;
        info!(path = %path.display(), "Loaded node identity");
        return Ok(key);
    }

    let identity = NodeIdentity::generate();
    let key = identity.to_bytes()?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    fs::write(path, &key)
        .with_context(|| format!("Failed to write identity to {}", path.display()))?;

    info!(path = %path.display(), peer = %identity.peer_id(), "Generated node identity");
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generates_then_reloads_same_identity() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys").join("identity.key");

        let first = load_or_generate(&path).unwrap();
        assert!(path.exists());
        let second = load_or_generate(&path).unwrap();

        assert_eq!(first, second);
        let a = NodeIdentity::from_bytes(&first).unwrap();
        let b = NodeIdentity::from_bytes(&second).unwrap();
        assert_eq!(a.peer_id(), b.peer_id());
    }

    #[test]
    fn test_existing_file_is_not_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.key");
        fs::write(&path, b"garbage").unwrap();

        assert_eq!(load_or_generate(&path).unwrap(), b"garbage".to_vec());
    }
}

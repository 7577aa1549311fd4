//! Build identifier used as the stable half of the `/index` ETag
//! (`"<BuildId>-<modification-time>"`, §4.5): a short digest over this
//! build's package identity, so the ETag also changes across deployments
//! of a different binary even when the database hasn't.

use sha2::{Digest, Sha256};

pub fn compute() -> String {
    let mut hasher = Sha256::new();
    hasher.update(env!("CARGO_PKG_NAME").as_bytes());
    hasher.update(b"@");
    hasher.update(env!("CARGO_PKG_VERSION").as_bytes());
    let digest = hasher.finalize();
    digest[..6].iter().map(|b| format!("{b:02x}")).collect()
}

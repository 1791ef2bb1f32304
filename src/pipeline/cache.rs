//! Cache keys and volume names.
//!
//! Keys are sha256 over length-prefixed parts, so moving bytes between
//! parts changes the key.

use crate::config::CacheStrategy;
use crate::source::InputFile;
use sha2::{Digest, Sha256};

/// Where the package manager keeps its download cache.
pub const CACHE_MOUNT: &str = "/root/.bun";

/// Volume name used by [`CacheStrategy::Fixed`].
pub const FIXED_CACHE_VOLUME: &str = "bun";

const KEY_PREFIX_LEN: usize = 16;

fn hash_parts(parts: &[&[u8]]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update((part.len() as u64).to_be_bytes());
        hasher.update(part);
    }
    hex::encode(hasher.finalize())
}

/// Leading characters of a key, used in image tags and volume names.
pub fn short_key(key: &str) -> &str {
    &key[..KEY_PREFIX_LEN.min(key.len())]
}

pub fn cache_volume_name(strategy: CacheStrategy, lockfile: &InputFile) -> String {
    match strategy {
        CacheStrategy::Content => format!("sitepack-bun-{}", lockfile.short_digest()),
        CacheStrategy::Fixed => FIXED_CACHE_VOLUME.to_string(),
    }
}

/// Identifies a build environment: same base image, manifest, lockfile and
/// install command means the same installed dependencies.
pub fn environment_key(
    base_image: &str,
    manifest: &InputFile,
    lockfile: &InputFile,
    install_command: &[&str],
) -> String {
    let command = install_command.join(" ");
    hash_parts(&[
        base_image.as_bytes(),
        manifest.name.as_bytes(),
        &manifest.contents,
        lockfile.name.as_bytes(),
        &lockfile.contents,
        command.as_bytes(),
    ])
}

/// Identifies a packaged image.
pub fn production_key(
    server_image: &str,
    output_digest: &str,
    caddyfile: &InputFile,
    port: u16,
    source_label: &str,
) -> String {
    hash_parts(&[
        server_image.as_bytes(),
        output_digest.as_bytes(),
        &caddyfile.contents,
        &port.to_be_bytes(),
        source_label.as_bytes(),
    ])
}

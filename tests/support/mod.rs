//! Shared fixtures for integration tests

#![allow(dead_code)]

use sitepack::engine::{CommandOutcome, ImageConfig, MockEngine};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

pub const LOCKFILE_V1: &str = r#"{"lockfileVersion":1,"packages":{"astro":["astro@4.0.0"]}}"#;
pub const LOCKFILE_V2: &str = r#"{"lockfileVersion":1,"packages":{"astro":["astro@4.1.0"]}}"#;
pub const CADDYFILE: &str = ":1313 {\n\troot * /var/www/html\n\tfile_server\n}\n";

pub fn write(root: &Path, path: &str, contents: &str) {
    let full = root.join(path);
    if let Some(parent) = full.parent() {
        fs::create_dir_all(parent).expect("Failed to create fixture directory");
    }
    fs::write(full, contents).expect("Failed to write fixture file");
}

/// A small Astro blog with a few files that must never reach the build.
pub fn create_blog(dir: &TempDir) {
    let root = dir.path();
    write(root, "package.json", r#"{"name":"blog","scripts":{"build":"astro build"}}"#);
    write(root, "bun.lock", LOCKFILE_V1);
    write(root, "astro.config.mjs", "export default {}\n");
    write(root, "tsconfig.json", "{}\n");
    write(root, "src/pages/index.astro", "<h1>kgb33</h1>\n");
    write(root, "src/content/posts/hello.md", "# Hello\n");
    write(root, "public/favicon.svg", "<svg/>\n");
    write(root, "Caddyfile", CADDYFILE);
    write(root, "node_modules/astro/index.js", "host modules\n");
    write(root, "dist/index.html", "stale host build\n");
    write(root, ".envrc", "export TOKEN=secret\n");
}

/// The parts of the caddy image config the packaging stage carries over.
pub fn caddy_image() -> ImageConfig {
    ImageConfig {
        id: "sha256:caddy".to_string(),
        cmd: vec![
            "caddy".to_string(),
            "run".to_string(),
            "--config".to_string(),
            "/etc/caddy/Caddyfile".to_string(),
            "--adapter".to_string(),
            "caddyfile".to_string(),
        ],
        env: vec!["XDG_CONFIG_HOME=/config".to_string()],
        working_dir: Some("/srv".to_string()),
        labels: BTreeMap::from([(
            "org.opencontainers.image.title".to_string(),
            "Caddy".to_string(),
        )]),
        exposed_ports: BTreeSet::from([
            "80/tcp".to_string(),
            "443/tcp".to_string(),
            "443/udp".to_string(),
            "2019/tcp".to_string(),
        ]),
        ..Default::default()
    }
}

/// Engine with both base images pullable and install and build scripted
/// to succeed.
pub fn mock_engine() -> MockEngine {
    MockEngine::new()
        .with_remote_image("oven/bun:1", ImageConfig::default())
        .with_remote_image("caddy", caddy_image())
        .on_command(
            &["bun", "install"],
            CommandOutcome::success()
                .with_stdout("1 package installed")
                .writes_file("/app/node_modules/astro/index.js", "export {}")
                .writes_file("/root/.bun/install/cache/astro@4.0.0.tgz", "tarball"),
        )
        .on_command(
            &["bun", "run", "build"],
            CommandOutcome::success()
                .with_stdout("Complete!")
                .writes_file("/app/dist/index.html", "<h1>kgb33</h1>")
                .writes_file("/app/dist/posts/hello/index.html", "<h1>Hello</h1>"),
        )
}

//! End-to-end run against a real Docker daemon
//!
//! Ignored by default: it pulls oven/bun:1 and caddy. Run with
//! `cargo test --test docker_e2e -- --ignored`.

mod support;

use sitepack::engine::ContainerEngine;
use sitepack::{DockerEngine, InputFile, Pipeline, ProjectInputs, SitepackConfig};
use std::sync::Arc;
use support::write;
use tempfile::TempDir;

/// A site whose "build" is a shell script, so no packages are fetched.
fn create_script_site(dir: &TempDir) {
    let root = dir.path();
    write(
        root,
        "package.json",
        r#"{"name":"e2e","private":true,"scripts":{"build":"sh src/build.sh"}}"#,
    );
    write(root, "bun.lock", "{\n  \"lockfileVersion\": 1,\n  \"workspaces\": {\n    \"\": {\n      \"name\": \"e2e\"\n    }\n  },\n  \"packages\": {}\n}\n");
    write(
        root,
        "src/build.sh",
        "mkdir -p dist/posts\necho '<h1>e2e</h1>' > dist/index.html\necho post > dist/posts/one.html\n",
    );
    write(root, "Caddyfile", ":1313 {\n\troot * /var/www/html\n\tfile_server\n}\n");
}

#[tokio::test]
#[ignore]
async fn test_prod_against_docker() {
    let dir = TempDir::new().unwrap();
    create_script_site(&dir);

    let mut config = SitepackConfig::builtin(dir.path().to_path_buf());
    config.reuse_environment = false;
    let inputs = ProjectInputs::load(&config).unwrap();
    let caddyfile = InputFile::read(&config.caddyfile_path()).unwrap();
    let engine = Arc::new(
        DockerEngine::connect(config.engine_timeout_secs)
            .await
            .expect("Docker daemon required"),
    );

    let pipeline = Pipeline::new(engine.clone(), config, inputs).with_caddyfile(caddyfile);

    let first = pipeline.build().await.unwrap();
    let second = pipeline.build().await.unwrap();
    assert_eq!(first.digest(), second.digest());
    assert_eq!(first.len(), 2);

    let image = pipeline.prod().await.unwrap();
    assert_eq!(image.exposed_ports, vec!["1313/tcp"]);

    let inspected = engine.inspect_image(&image.image).await.unwrap();
    assert_eq!(
        inspected
            .labels
            .get("org.opencontainers.image.source")
            .map(String::as_str),
        Some("https://github.com/kgb33/blog.kgb33.dev")
    );
    assert!(!inspected.cmd.is_empty());
}

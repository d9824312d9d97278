//! End-to-end pipeline tests.
//!
//! These tests run the named graphs against a small site and inspect the
//! build directory.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use kiln::server::LiveReload;

use crate::fixtures::{photo_jpeg, snapshot, wait_for, TestSite};

/// Test: Scenario build
/// Given a stylesheet with a partial, a page with an include, two icons and a photo
/// When the build graph runs
/// Then every expected artifact exists with transformed content
#[tokio::test]
async fn test_build_scenario_outputs() {
    let site = TestSite::scenario();
    let pipeline = site.pipeline();

    pipeline.run(&pipeline.build()).await.unwrap();

    let css = site.read_output("css/style.min.css");
    assert!(css.contains(".header{padding:16px}"), "css: {}", css);
    assert!(css.contains(".header .title{"));
    assert!(css.contains("#c0392b"));
    assert!(css.contains("-webkit-user-select:none"));
    assert!(css.trim_end().ends_with("/*# sourceMappingURL=style.min.css.map */"));

    let map: serde_json::Value =
        serde_json::from_str(&site.read_output("css/style.min.css.map")).unwrap();
    assert_eq!(map["version"], 3);
    assert!(map["sources"][0].as_str().unwrap().ends_with("scss/style.css"));

    assert_eq!(
        site.read_output("index.html"),
        "<!DOCTYPE html><html><head><title>Home</title></head><body><header><h1>Welcome</h1></header><p>Hello world</p></body></html>"
    );

    let sprite = site.read_output("img/sprite.svg");
    assert!(sprite.starts_with("<svg xmlns=\"http://www.w3.org/2000/svg\">"));
    assert!(sprite.contains("<symbol id=\"cart-icon\" viewBox=\"0 0 16 16\"><circle cx=\"8\" cy=\"8\" r=\"6\"/></symbol>"));
    assert!(sprite.contains("<symbol id=\"home-icon\" viewBox=\"0 0 24 24\">"));
    assert!(!sprite.contains("<?xml"));

    let build = site.build_dir();
    let photo = std::fs::read(build.join("img/photo.jpg")).unwrap();
    assert!(photo.len() <= photo_jpeg().len());
    assert_eq!(image::guess_format(&photo).unwrap(), image::ImageFormat::Jpeg);
    let webp = std::fs::read(build.join("img/photo.webp")).unwrap();
    assert_eq!(image::guess_format(&webp).unwrap(), image::ImageFormat::WebP);

    // Images ran after copy, so icons are the minified versions.
    assert_eq!(
        site.read_output("img/icons/cart-icon.svg"),
        "<svg xmlns=\"http://www.w3.org/2000/svg\" viewBox=\"0 0 16 16\"><circle cx=\"8\" cy=\"8\" r=\"6\"/></svg>"
    );
}

/// Test: Deterministic builds
/// Given unchanged sources
/// When the build runs twice
/// Then both output trees are byte-identical
#[tokio::test]
async fn test_build_is_deterministic() {
    let site = TestSite::scenario();
    let pipeline = site.pipeline();

    pipeline.run(&pipeline.build()).await.unwrap();
    let first = snapshot(&site.build_dir());
    pipeline.run(&pipeline.build()).await.unwrap();
    let second = snapshot(&site.build_dir());

    assert!(first.contains_key("css/style.min.css.map"));
    assert_eq!(first.keys().collect::<Vec<_>>(), second.keys().collect::<Vec<_>>());
    assert!(first == second, "build output differs between runs");
}

/// Test: Clean removes stale output
/// Given a build directory with a file no task produces
/// When the build runs
/// Then the stale file is gone
#[tokio::test]
async fn test_build_cleans_stale_output() {
    let site = TestSite::scenario();
    site.write("build/old.html", "stale");

    let pipeline = site.pipeline();
    pipeline.run(&pipeline.build()).await.unwrap();

    assert!(!site.build_dir().join("old.html").exists());
    assert!(site.build_dir().join("index.html").exists());
}

#[tokio::test]
async fn test_clean_twice_succeeds() {
    let site = TestSite::empty();
    let pipeline = site.pipeline();
    let clean: kiln::core::Node = pipeline.clean().into();

    pipeline.run(&clean).await.unwrap();
    pipeline.run(&clean).await.unwrap();
    assert!(!site.build_dir().exists());
}

/// Test: A broken stylesheet fails the build
/// Given a stylesheet referencing an undefined variable
/// When the build runs
/// Then the build fails with the styles task named in the error
#[tokio::test]
async fn test_build_reports_styles_failure() {
    let site = TestSite::scenario();
    site.write("source/scss/style.scss", ".a { color: $undefined; }\n");

    let pipeline = site.pipeline();
    let err = pipeline.run(&pipeline.build()).await.unwrap_err();

    assert_eq!(err.task_name(), Some("styles"));
    assert!(err.to_string().contains("Sass error"));
    assert!(!site.build_dir().join("css/style.min.css").exists());
}

#[tokio::test]
async fn test_build_without_icons_has_no_sprite() {
    let site = TestSite::scenario();
    std::fs::remove_dir_all(site.source_dir().join("img/icons")).unwrap();

    let pipeline = site.pipeline();
    pipeline.run(&pipeline.build()).await.unwrap();

    assert!(!site.build_dir().join("img/sprite.svg").exists());
    assert!(site.build_dir().join("img/photo.webp").exists());
}

#[tokio::test]
async fn test_config_file_changes_layout() {
    let site = TestSite::scenario();
    site.write(
        "kiln.toml",
        "build_dir = \"public\"\n\n[html]\ncollapse_whitespace = false\n",
    );

    let pipeline = site.pipeline();
    pipeline.run(&pipeline.build()).await.unwrap();

    let page = std::fs::read_to_string(site.path.join("public/index.html")).unwrap();
    assert!(page.contains("<p>Hello   world</p>"));
    assert!(!site.path.join("build").exists());
}

/// Test: Develop pipeline
/// Given the scenario site and a server on an ephemeral port
/// When the develop graph runs until shutdown
/// Then the build happens without image optimization and the run ends cleanly
#[tokio::test]
async fn test_develop_builds_then_runs_until_shutdown() {
    let site = TestSite::scenario();
    site.write("kiln.toml", "[server]\nport = 0\n");

    let shutdown = CancellationToken::new();
    let pipeline = site.pipeline_with(LiveReload::new(), shutdown.clone());
    let develop = pipeline.develop();
    let running = tokio::spawn(async move { pipeline.run(&develop).await });

    let build = site.build_dir();
    assert!(
        wait_for(Duration::from_secs(10), || build.join("img/photo.webp").exists()
            && build.join("index.html").exists())
        .await,
        "develop build did not produce outputs"
    );
    // The photo is copied, not re-encoded.
    assert!(
        wait_for(Duration::from_secs(5), || {
            std::fs::read(build.join("img/photo.jpg")).ok() == Some(photo_jpeg())
        })
        .await
    );

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!running.is_finished(), "develop returned before shutdown");

    shutdown.cancel();
    let result = tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .expect("develop did not stop after shutdown")
        .unwrap();
    assert!(result.is_ok(), "develop failed: {:?}", result);
}

/// Test: Develop survives a broken stylesheet
/// Given a stylesheet referencing an undefined variable
/// When the develop graph runs
/// Then the page is still served, and fixing the stylesheet rebuilds it
#[tokio::test]
async fn test_develop_serves_despite_broken_stylesheet() {
    let site = TestSite::scenario();
    site.write("source/scss/style.scss", ".a { color: $undefined; }\n");
    let port = free_port();
    site.write("kiln.toml", &format!("[server]\nport = {}\n", port));

    let shutdown = CancellationToken::new();
    let pipeline = site.pipeline_with(LiveReload::new(), shutdown.clone());
    let develop = pipeline.develop();
    let running = tokio::spawn(async move { pipeline.run(&develop).await });

    let url = format!("http://127.0.0.1:{}/", port);
    let client = reqwest::Client::builder().no_proxy().build().unwrap();
    let mut page = None;
    for _ in 0..100 {
        if let Ok(response) = client.get(&url).send().await {
            page = Some(response.text().await.unwrap());
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    let page = page.expect("dev server never answered");
    assert!(page.contains("<h1>Welcome</h1>"));
    assert!(!running.is_finished());
    assert!(!site.build_dir().join("css/style.min.css").exists());

    // The watcher starts right after the server; rewrite until it notices.
    let css = site.build_dir().join("css/style.min.css");
    let mut rebuilt = false;
    for _ in 0..10 {
        site.write("source/scss/style.scss", ".a { color: #123456; }\n");
        if wait_for(Duration::from_secs(1), || css.exists()).await {
            rebuilt = true;
            break;
        }
    }
    assert!(rebuilt, "fixed stylesheet was not rebuilt");
    assert!(site.read_output("css/style.min.css").contains("#123456"));

    shutdown.cancel();
    let result = tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .expect("develop did not stop after shutdown")
        .unwrap();
    assert!(result.is_ok(), "develop failed: {:?}", result);
}

fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

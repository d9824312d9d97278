//! Test fixtures for integration tests.
//!
//! Provides helpers for:
//! - Creating temporary site projects with a typical source tree
//! - Tasks that record when they start and finish
//! - Walking an output tree into a comparable snapshot

use std::collections::BTreeMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use image::{ImageFormat, Rgb, RgbImage};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use kiln::config::Config;
use kiln::core::Task;
use kiln::orchestration::Pipeline;
use kiln::server::LiveReload;
use kiln::Error;

/// A site project in a temporary directory.
pub struct TestSite {
    /// The temporary directory; removed on drop.
    pub temp_dir: TempDir,
    /// Project root.
    pub path: PathBuf,
}

impl TestSite {
    /// An empty project.
    pub fn empty() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().to_path_buf();
        Self { temp_dir, path }
    }

    /// The reference scenario: one stylesheet with a partial, one page with
    /// an include, two icons and a photo.
    pub fn scenario() -> Self {
        let site = Self::empty();
        site.write(
            "source/scss/_variables.scss",
            "$accent: #c0392b;\n$gap: 16px;\n",
        );
        site.write(
            "source/scss/style.scss",
            "@import \"variables\";\n\n.header {\n  padding: $gap;\n  .title { color: $accent; user-select: none; }\n}\n",
        );
        site.write(
            "source/index.html",
            "<!DOCTYPE html>\n<html>\n  <head>\n    <title>Home</title>\n  </head>\n  <body>\n    @@include('html/header.html', {\"title\": \"Welcome\"})\n    <p>Hello   world</p>\n  </body>\n</html>\n",
        );
        site.write(
            "source/html/header.html",
            "<header>\n  <h1>@@title</h1>\n</header>\n",
        );
        site.write(
            "source/img/icons/home-icon.svg",
            "<svg xmlns=\"http://www.w3.org/2000/svg\" viewBox=\"0 0 24 24\">\n  <path d=\"M3 12l9-9 9 9\"/>\n</svg>\n",
        );
        site.write(
            "source/img/icons/cart-icon.svg",
            "<?xml version=\"1.0\"?>\n<svg xmlns=\"http://www.w3.org/2000/svg\" viewBox=\"0 0 16 16\">\n  <circle cx=\"8\" cy=\"8\" r=\"6\"/>\n</svg>\n",
        );
        site.write_bytes("source/img/photo.jpg", &photo_jpeg());
        site
    }

    pub fn write(&self, relative: &str, contents: &str) {
        self.write_bytes(relative, contents.as_bytes());
    }

    pub fn write_bytes(&self, relative: &str, contents: &[u8]) {
        let path = self.path.join(relative);
        std::fs::create_dir_all(path.parent().expect("file has a parent"))
            .expect("Failed to create parent directory");
        std::fs::write(path, contents).expect("Failed to write fixture file");
    }

    pub fn config(&self) -> Config {
        Config::load(&self.path).expect("Failed to load config")
    }

    pub fn build_dir(&self) -> PathBuf {
        self.config().build_path()
    }

    pub fn source_dir(&self) -> PathBuf {
        self.config().source_path()
    }

    pub fn read_output(&self, relative: &str) -> String {
        std::fs::read_to_string(self.build_dir().join(relative))
            .unwrap_or_else(|e| panic!("Failed to read build/{}: {}", relative, e))
    }

    /// A pipeline over this project with a fresh reload hub.
    pub fn pipeline(&self) -> Pipeline {
        self.pipeline_with(LiveReload::new(), CancellationToken::new())
    }

    pub fn pipeline_with(&self, reload: LiveReload, shutdown: CancellationToken) -> Pipeline {
        Pipeline::new(self.config(), reload, shutdown)
    }
}

/// A JPEG with enough detail to be worth re-encoding.
pub fn photo_jpeg() -> Vec<u8> {
    let img = RgbImage::from_fn(64, 48, |x, y| {
        Rgb([(x * 4) as u8, (y * 5) as u8, ((x + y) * 2) as u8])
    });
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Jpeg)
        .expect("Failed to encode fixture JPEG");
    out.into_inner()
}

/// Every file under `root`, keyed by forward-slash relative path.
pub fn snapshot(root: &Path) -> BTreeMap<String, Vec<u8>> {
    fn walk(root: &Path, dir: &Path, out: &mut BTreeMap<String, Vec<u8>>) {
        for entry in std::fs::read_dir(dir).expect("Failed to read dir") {
            let path = entry.expect("Failed to read entry").path();
            if path.is_dir() {
                walk(root, &path, out);
            } else {
                let relative = path
                    .strip_prefix(root)
                    .expect("entry below root")
                    .to_string_lossy()
                    .replace('\\', "/");
                out.insert(relative, std::fs::read(&path).expect("Failed to read file"));
            }
        }
    }
    let mut out = BTreeMap::new();
    walk(root, root, &mut out);
    out
}

/// Ordered log of task starts and finishes.
#[derive(Debug, Clone, Default)]
pub struct Journal {
    entries: Arc<Mutex<Vec<String>>>,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, entry: impl Into<String>) {
        self.entries.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().unwrap().clone()
    }

    pub fn count(&self, entry: &str) -> usize {
        self.entries().iter().filter(|e| *e == entry).count()
    }

    pub fn position(&self, entry: &str) -> Option<usize> {
        self.entries().iter().position(|e| e == entry)
    }
}

/// A task that sleeps for `delay`, recording `start:<name>` and `end:<name>`.
///
/// It checks its cancellation token after sleeping.
pub fn timed_task(name: &str, delay: Duration, journal: &Journal) -> Task {
    let journal = journal.clone();
    let owned = name.to_string();
    Task::new(name, move |cancel| {
        let journal = journal.clone();
        let name = owned.clone();
        async move {
            journal.record(format!("start:{}", name));
            tokio::time::sleep(delay).await;
            kiln::core::checkpoint(&cancel, &name)?;
            journal.record(format!("end:{}", name));
            Ok(())
        }
    })
}

/// A task that fails after `delay`.
pub fn failing_task(name: &str, delay: Duration, journal: &Journal) -> Task {
    let journal = journal.clone();
    let owned = name.to_string();
    Task::new(name, move |_| {
        let journal = journal.clone();
        let name = owned.clone();
        async move {
            journal.record(format!("start:{}", name));
            tokio::time::sleep(delay).await;
            journal.record(format!("fail:{}", name));
            Err(Error::Validation(format!("{} broke", name)))
        }
    })
}

/// Poll `condition` every 20ms until it holds or `timeout` passes.
pub async fn wait_for<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}

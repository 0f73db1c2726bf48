use onceupon::catalogue::CatalogueStore;
use onceupon::indexer::semantic::BookIndexer;
use onceupon::model::types::BookRecord;
use onceupon::search::hash_embedder::HashEmbedder;
use onceupon::storage::artifacts::Manifest;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// Captures tracing output for tests.
#[allow(dead_code)]
pub struct TestTracing {
    buffer: std::sync::Arc<std::sync::Mutex<Vec<u8>>>,
}

#[allow(dead_code)]
impl TestTracing {
    pub fn new() -> Self {
        Self {
            buffer: std::sync::Arc::new(std::sync::Mutex::new(Vec::new())),
        }
    }

    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let writer = self.buffer.clone();
        let make_writer = move || TestWriter(writer.clone());
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .without_time()
            .with_max_level(tracing::Level::DEBUG)
            .with_writer(make_writer)
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub fn output(&self) -> String {
        let buf = self.buffer.lock().unwrap();
        String::from_utf8_lossy(&buf).to_string()
    }

    /// Assert that the captured log output contains the provided substring.
    pub fn assert_contains(&self, needle: &str) {
        let out = self.output();
        assert!(
            out.contains(needle),
            "expected logs to contain `{needle}`, got:\n{out}"
        );
    }
}

struct TestWriter(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

impl std::io::Write for TestWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut guard = self.0.lock().unwrap();
        guard.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Dimension used by every hash-encoded fixture.
#[allow(dead_code)]
pub const FIXTURE_DIMENSION: usize = 384;

/// The three-book catalogue used across the retrieval tests.
#[allow(dead_code)]
pub fn three_books() -> CatalogueStore {
    let mut dune = BookRecord::new(
        0,
        "Dune",
        "Frank Herbert",
        "Spice, sandworms and a desert planet decide one young duke's fate on Arrakis.",
    );
    dune.call_number = Some("FIC HER".into());
    dune.cover_reference = Some("dune.jpg".into());

    let emma = BookRecord::new(
        0,
        "Emma",
        "Jane Austen",
        "Witty romance of matchmaking, manners and misunderstanding in an English country village.",
    );
    let neuromancer = BookRecord::new(
        0,
        "Neuromancer",
        "William Gibson",
        "Cyberpunk tale of hackers and artificial intelligence in neon cities.",
    );
    CatalogueStore::from_records(vec![dune, emma, neuromancer])
}

/// `n` distinct synthetic books.
#[allow(dead_code)]
pub fn numbered_books(n: usize) -> CatalogueStore {
    CatalogueStore::from_records(
        (0..n)
            .map(|i| {
                BookRecord::new(
                    i,
                    format!("Volume {i}"),
                    format!("Author {}", i % 7),
                    format!("Chapter {i} of the serial, about topic{} and theme{}.", i % 5, i % 3),
                )
            })
            .collect(),
    )
}

#[allow(dead_code)]
pub fn hash_indexer() -> BookIndexer {
    BookIndexer::new(Arc::new(HashEmbedder::new(FIXTURE_DIMENSION)))
}

/// Build and persist artifacts for `catalogue` into `dir`.
#[allow(dead_code)]
pub fn build_artifacts(dir: &Path, catalogue: &CatalogueStore) -> Manifest {
    hash_indexer()
        .build(catalogue, dir)
        .expect("build fixture artifacts")
        .manifest
}

/// CSV export matching the enriched catalogue layout.
#[allow(dead_code)]
pub const THREE_BOOKS_CSV: &str = "\
Title,Author,Call No,ISBN,Blurb,Cover Filename
Dune,Frank Herbert,FIC HER,9780441013593,\"Spice, sandworms and a desert planet decide one young duke's fate on Arrakis.\",dune.jpg
Emma,Jane Austen,,nan,\"Witty romance of matchmaking, manners and misunderstanding in an English country village.\",
Neuromancer,William Gibson,FIC GIB,,Cyberpunk tale of hackers and artificial intelligence in neon cities.,nan
";

#[allow(dead_code)]
pub struct TempFixtureDir {
    pub dir: TempDir,
}

#[allow(dead_code)]
impl TempFixtureDir {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("tempdir"),
        }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.path().to_path_buf()
    }

    /// Write `contents` to `name` inside the fixture dir.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, contents).expect("write fixture file");
        path
    }
}

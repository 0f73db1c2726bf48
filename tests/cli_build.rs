mod util;

use assert_cmd::Command;
use clap::Parser;
use onceupon::search::embedder::EmbedderKind;
use onceupon::storage::artifacts::{ArtifactPaths, write_catalogue_snapshot};
use onceupon::{Cli, Commands};
use predicates::str::contains;
use std::path::Path;
use util::{THREE_BOOKS_CSV, TempFixtureDir, numbered_books};

fn base_cmd(temp_home: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("onceupon"));
    cmd.env("HOME", temp_home);
    cmd.env("XDG_CONFIG_HOME", temp_home.join(".config"));
    cmd.env("XDG_DATA_HOME", temp_home.join(".local/share"));
    cmd.env_remove("ONCEUPON_DATA_DIR");
    cmd.env_remove("RUST_LOG");
    cmd.current_dir(temp_home);
    cmd
}

fn build_three(fixture: &TempFixtureDir) -> std::path::PathBuf {
    let csv = fixture.write("books.csv", THREE_BOOKS_CSV);
    let data_dir = fixture.path().join("data");
    base_cmd(&fixture.path())
        .args(["build", "--embedder", "hash", "--input"])
        .arg(&csv)
        .arg("--data-dir")
        .arg(&data_dir)
        .assert()
        .success()
        .stdout(contains("3 books indexed"));
    data_dir
}

#[test]
fn build_help_prints_usage() {
    let fixture = TempFixtureDir::new();
    base_cmd(&fixture.path())
        .args(["build", "--help"])
        .assert()
        .success()
        .stdout(contains("Ingest the catalogue"))
        .stdout(contains("--input"))
        .stdout(contains("--embedder"));
}

#[test]
fn build_parses_embedder_flag() {
    let cli = Cli::try_parse_from(["onceupon", "build", "--embedder", "hash", "--batch-size", "8"])
        .expect("parse build flags");
    assert_eq!(cli.embedder, Some(EmbedderKind::Hash));
    match cli.command {
        Commands::Build { batch_size, input } => {
            assert_eq!(batch_size, Some(8));
            assert!(input.is_none());
        }
        other => panic!("expected build command, got {other:?}"),
    }
}

#[test]
fn build_then_search_finds_dune() {
    let fixture = TempFixtureDir::new();
    let data_dir = build_three(&fixture);
    let paths = ArtifactPaths::in_dir(&data_dir);
    assert!(paths.index.exists(), "index written");
    assert!(paths.catalogue.exists(), "catalogue snapshot written");
    assert!(paths.manifest.exists(), "manifest written");

    let output = base_cmd(&fixture.path())
        .args(["search", "a science fiction adventure on a desert world", "-k", "3", "--json"])
        .arg("--data-dir")
        .arg(&data_dir)
        .output()
        .unwrap();
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["count"], 3);
    let top = &value["results"][0];
    assert_eq!(top["book"]["title"], "Dune");
    assert_eq!(top["book"]["call_number"], "FIC HER");
    assert!(top["match_label"].as_str().unwrap().ends_with("% match"));

    let emma = value["results"]
        .as_array()
        .unwrap()
        .iter()
        .find(|r| r["book"]["title"] == "Emma")
        .unwrap();
    assert_eq!(emma["book"]["call_number"], "No call number available");
    assert_eq!(emma["book"]["isbn"], serde_json::Value::Null);
    assert!(emma["book"]["cover"].as_str().unwrap().contains("placeholder"));
}

#[test]
fn human_search_output_shows_match_percent() {
    let fixture = TempFixtureDir::new();
    let data_dir = build_three(&fixture);
    base_cmd(&fixture.path())
        .args(["search", "cyberpunk hackers", "-k", "1"])
        .arg("--data-dir")
        .arg(&data_dir)
        .assert()
        .success()
        .stdout(contains("Neuromancer"))
        .stdout(contains("% match"));
}

#[test]
fn inspect_reports_manifest() {
    let fixture = TempFixtureDir::new();
    let data_dir = build_three(&fixture);
    let output = base_cmd(&fixture.path())
        .args(["inspect", "--json", "--data-dir"])
        .arg(&data_dir)
        .output()
        .unwrap();
    assert!(output.status.success());
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["catalogue_size"], 3);
    assert_eq!(value["manifest"]["record_count"], 3);
    assert_eq!(value["manifest"]["embedder_id"], "fnv1a-384");
}

#[test]
fn search_without_artifacts_tells_operator_to_build() {
    let fixture = TempFixtureDir::new();
    base_cmd(&fixture.path())
        .args(["search", "anything", "--data-dir"])
        .arg(fixture.path().join("empty"))
        .assert()
        .code(3)
        .stderr(contains("onceupon build"));
}

#[test]
fn mismatched_pair_fails_before_serving() {
    let fixture = TempFixtureDir::new();
    let data_dir = build_three(&fixture);
    write_catalogue_snapshot(&ArtifactPaths::in_dir(&data_dir).catalogue, &numbered_books(2)).unwrap();

    base_cmd(&fixture.path())
        .args(["search", "desert", "--json", "--data-dir"])
        .arg(&data_dir)
        .assert()
        .code(3)
        .stderr(contains("\"kind\":\"artifact_load_failure\""));
}

#[test]
fn empty_catalogue_build_exits_with_validation_error() {
    let fixture = TempFixtureDir::new();
    let csv = fixture.write("empty.csv", "Title,Author\n");
    let data_dir = fixture.path().join("data");
    base_cmd(&fixture.path())
        .args(["build", "--embedder", "hash", "--json", "--input"])
        .arg(&csv)
        .arg("--data-dir")
        .arg(&data_dir)
        .assert()
        .code(2)
        .stderr(contains("empty_catalogue"));
    assert!(!ArtifactPaths::in_dir(&data_dir).index.exists());
}

#[test]
fn blank_query_is_rejected_with_json_error() {
    let fixture = TempFixtureDir::new();
    let data_dir = build_three(&fixture);
    base_cmd(&fixture.path())
        .args(["search", "   ", "--json", "--data-dir"])
        .arg(&data_dir)
        .assert()
        .code(2)
        .stderr(contains("\"kind\":\"empty_query\""));
}

#[test]
fn missing_model_reports_model_unavailable() {
    let fixture = TempFixtureDir::new();
    let csv = fixture.write("books.csv", THREE_BOOKS_CSV);
    base_cmd(&fixture.path())
        .args(["build", "--embedder", "fastembed", "--input"])
        .arg(&csv)
        .arg("--data-dir")
        .arg(fixture.path().join("data"))
        .assert()
        .code(4)
        .stderr(contains("--embedder hash"));
}

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn wikiqa_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("wikiqa");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    fs::write(
        root.join("dump.csv"),
        "page_title,content\n\
         Theia,\"The Theia is a light cruiser. It carries 500 shield and two turrets. It was built in 2140.\"\n\
         Deity,\"The Deity is a <span>battleship</span>. It carries 2000 shield.\"\n\
         Stub,\"<!-- nothing here -->\"\n",
    )
    .unwrap();

    let config_content = format!(
        r#"[dataset]
root = "{root}/datasets"
active = "live"

[corpus]
path = "{root}/dump.csv"

[chunking]
max_tokens = 10
tokenizer = "whitespace"

[logging]
level = "warn"
"#,
        root = root.display()
    );

    let config_path = config_dir.join("wikiqa.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_wikiqa(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = wikiqa_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run wikiqa binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

#[test]
fn test_generate_without_embeddings() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) =
        run_wikiqa(&config_path, &["generate", "--output", "ships", "--no-embeddings"]);
    assert!(success, "generate failed: {}", stderr);
    assert!(stdout.contains("Published"));
    assert!(stdout.contains("from 3 pages, 1 skipped"));
    assert!(!stdout.contains("Embedding tokens"));

    let dir = tmp.path().join("datasets").join("ships");
    let metadata = fs::read_to_string(dir.join("METADATA.txt")).unwrap();
    assert!(metadata.contains("Dataset: dump.csv"));
    assert!(metadata.contains("Max_len: 10"));
    assert!(metadata.contains("Tokenizer: whitespace"));
    assert!(!metadata.contains("Embedding_model"));
    assert!(dir.join("dump.csv").is_file());

    let mut reader = csv::Reader::from_path(dir.join("passages.csv")).unwrap();
    let headers: Vec<String> = reader.headers().unwrap().iter().map(String::from).collect();
    assert_eq!(headers, ["page_title", "content", "n_tokens", "embedding"]);

    let mut titles = Vec::new();
    for record in reader.records() {
        let record = record.unwrap();
        let content = &record[1];
        let n_tokens: usize = record[2].parse().unwrap();
        assert_eq!(n_tokens, content.split_whitespace().count());
        assert!(n_tokens <= 10, "passage over the ceiling: {:?}", content);
        assert!(!content.contains("<span>"));
        assert_eq!(&record[3], "");
        titles.push(record[0].to_string());
    }
    assert!(titles.len() >= 3);
    assert_eq!(titles.first().map(String::as_str), Some("Theia"));
    assert_eq!(titles.last().map(String::as_str), Some("Deity"));
}

#[test]
fn test_generate_replaces_existing_dataset() {
    let (tmp, config_path) = setup_test_env();

    let (_, stderr, success) =
        run_wikiqa(&config_path, &["generate", "--output", "ships", "--no-embeddings"]);
    assert!(success, "first generate failed: {}", stderr);

    let (_, stderr, success) = run_wikiqa(
        &config_path,
        &["generate", "--output", "ships", "--no-embeddings", "--max-tokens", "40"],
    );
    assert!(success, "second generate failed: {}", stderr);

    let datasets = tmp.path().join("datasets");
    let metadata = fs::read_to_string(datasets.join("ships").join("METADATA.txt")).unwrap();
    assert!(metadata.contains("Max_len: 40"));
    let hidden = fs::read_dir(&datasets)
        .unwrap()
        .filter(|e| e.as_ref().unwrap().file_name().to_string_lossy().starts_with('.'))
        .count();
    assert_eq!(hidden, 0);
}

#[test]
fn test_inspect_and_verify() {
    let (_tmp, config_path) = setup_test_env();
    run_wikiqa(&config_path, &["generate", "--output", "ships", "--no-embeddings"]);

    let (stdout, stderr, success) = run_wikiqa(&config_path, &["inspect", "ships", "--verify"]);
    assert!(success, "inspect failed: {}", stderr);
    assert!(stdout.contains("Dataset:         ships"));
    assert!(stdout.contains("Embedding model: (none)"));
    assert!(stdout.contains("Embedded:        0"));
    assert!(stdout.contains("all n_tokens match whitespace"));
}

#[test]
fn test_inspect_detects_tampered_token_counts() {
    let (tmp, config_path) = setup_test_env();
    run_wikiqa(&config_path, &["generate", "--output", "ships", "--no-embeddings"]);

    let passages = tmp.path().join("datasets").join("ships").join("passages.csv");
    let mut reader = csv::Reader::from_path(&passages).unwrap();
    let headers = reader.headers().unwrap().clone();
    let mut rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
    let tampered: Vec<String> = rows[0]
        .iter()
        .enumerate()
        .map(|(i, f)| if i == 2 { "999".to_string() } else { f.to_string() })
        .collect();
    rows[0] = csv::StringRecord::from(tampered);

    let mut writer = csv::Writer::from_path(&passages).unwrap();
    writer.write_record(&headers).unwrap();
    for row in &rows {
        writer.write_record(row).unwrap();
    }
    writer.flush().unwrap();

    let (_, stderr, success) = run_wikiqa(&config_path, &["inspect", "ships", "--verify"]);
    assert!(!success);
    assert!(stderr.contains("row 1"), "stderr: {}", stderr);
    assert!(stderr.contains("inconsistent n_tokens"));
}

#[test]
fn test_generate_rejects_missing_columns() {
    let (tmp, config_path) = setup_test_env();
    fs::write(tmp.path().join("dump.csv"), "title,body\nTheia,A cruiser.\n").unwrap();

    let (_, stderr, success) =
        run_wikiqa(&config_path, &["generate", "--output", "ships", "--no-embeddings"]);
    assert!(!success);
    assert!(stderr.contains("page_title, content"), "stderr: {}", stderr);
    assert!(!tmp.path().join("datasets").join("ships").exists());
}

#[test]
fn test_context_refuses_unembedded_dataset() {
    let (_tmp, config_path) = setup_test_env();
    let (_, stderr, success) = run_wikiqa(
        &config_path,
        &["generate", "--output", "live", "--no-embeddings", "--force"],
    );
    assert!(success, "generate failed: {}", stderr);

    let (_, stderr, success) = run_wikiqa(&config_path, &["context", "what is the theia?"]);
    assert!(!success);
    assert!(stderr.contains("cannot be served"), "stderr: {}", stderr);
}

#[test]
fn test_generate_requires_embeddings_flag_when_provider_disabled() {
    let (tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_wikiqa(&config_path, &["generate", "--output", "ships"]);
    assert!(!success);
    assert!(stderr.contains("--no-embeddings"), "stderr: {}", stderr);
    assert!(!tmp.path().join("datasets").join("ships").exists());
}

#[test]
fn test_generate_refuses_unembedded_active_dataset() {
    let (tmp, config_path) = setup_test_env();

    let (_, stderr, success) =
        run_wikiqa(&config_path, &["generate", "--output", "live", "--no-embeddings"]);
    assert!(!success);
    assert!(stderr.contains("--force"), "stderr: {}", stderr);
    assert!(!tmp.path().join("datasets").join("live").exists());
}

#[test]
fn test_generate_refuses_to_replace_servable_dataset() {
    let (tmp, config_path) = setup_test_env();
    let dir = tmp.path().join("datasets").join("ships");
    fs::create_dir_all(&dir).unwrap();
    fs::write(
        dir.join("METADATA.txt"),
        "Dataset: dump.csv\n\
         Timestamp: 2024-08-19T00:00:00+00:00\n\
         Max_len: 10\n\
         Tokenizer: whitespace\n\
         Embedding_model: mock\n\
         Passages: 1\n",
    )
    .unwrap();
    fs::write(
        dir.join("passages.csv"),
        "page_title,content,n_tokens,embedding\n\
         Theia,theia. A cruiser.,3,\"[1.0,0.0]\"\n",
    )
    .unwrap();

    let (_, stderr, success) =
        run_wikiqa(&config_path, &["generate", "--output", "ships", "--no-embeddings"]);
    assert!(!success);
    assert!(stderr.contains("servable"), "stderr: {}", stderr);
    assert!(stderr.contains("--force"));
    let metadata = fs::read_to_string(dir.join("METADATA.txt")).unwrap();
    assert!(metadata.contains("Embedding_model: mock"));

    let (_, stderr, success) = run_wikiqa(
        &config_path,
        &["generate", "--output", "ships", "--no-embeddings", "--force"],
    );
    assert!(success, "forced generate failed: {}", stderr);
    let metadata = fs::read_to_string(dir.join("METADATA.txt")).unwrap();
    assert!(!metadata.contains("Embedding_model"));
}

#[test]
fn test_unknown_progress_mode() {
    let (_tmp, config_path) = setup_test_env();
    let (_, stderr, success) = run_wikiqa(
        &config_path,
        &["generate", "--output", "ships", "--no-embeddings", "--progress", "loud"],
    );
    assert!(!success);
    assert!(stderr.contains("Unknown progress mode"));
}

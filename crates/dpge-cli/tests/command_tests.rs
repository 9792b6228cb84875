//! Commands end to end on a toy dataset

use clap::Parser;
use dpge_cli::commands;
use dpge_cli::{Cli, CliError, Command, Formatter, OutputFormat, Session, Settings};
use dpge_store::CheckpointStore;
use std::fs;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tempfile::TempDir;

fn write_dataset(dir: &Path) {
    fs::create_dir_all(dir).unwrap();
    fs::write(dir.join("success.txt"), "0 0\n0 1\n1 1\n2 2\n3 3\n3 2\n").unwrap();
    fs::write(dir.join("user_only.txt"), "1 0\n2 3\n").unwrap();
    fs::write(dir.join("item_only.txt"), "0 2\n").unwrap();
    fs::write(dir.join("valid.txt"), "1 0\n2 3\n").unwrap();
    fs::write(dir.join("test.txt"), "0 2\n").unwrap();
}

fn settings(db: &Path) -> Settings {
    let mut settings = Settings::default();
    settings.model.embedding_size = 8;
    settings.model.n_layers = 1;
    settings.trainer.max_epochs = 4;
    settings.trainer.batch_size = 4;
    settings.trainer.resume_epochs = 2;
    settings.data.db = db.to_path_buf();
    settings
}

fn parse(argv: &[&str]) -> Command {
    Cli::parse_from(argv).command
}

fn quiet() -> Formatter {
    Formatter::new(OutputFormat::Quiet, false)
}

fn no_stop() -> Arc<AtomicBool> {
    Arc::new(AtomicBool::new(false))
}

fn train(settings: &Settings, data: &str) {
    match parse(&["dpge", "train", "--data", data, "--test"]) {
        Command::Train(args) => commands::execute_train(args, settings, &quiet(), no_stop()).unwrap(),
        _ => panic!("Expected Train command"),
    }
}

#[test]
fn test_train_then_evaluate_and_recommend() {
    let dir = TempDir::new().unwrap();
    let data = dir.path().join("toy");
    write_dataset(&data);
    let settings = settings(&dir.path().join("ckpt.db"));
    let data = data.to_str().unwrap();

    train(&settings, data);
    let store = CheckpointStore::new(&settings.data.db).unwrap();
    let saved = store.list().unwrap();
    assert!(!saved.is_empty());
    assert_eq!(saved[0].model, "dpge");

    match parse(&["dpge", "evaluate", "--data", data, "--split", "test"]) {
        Command::Evaluate(args) => commands::execute_evaluate(args, &settings, &quiet()).unwrap(),
        _ => panic!("Expected Evaluate command"),
    }

    let id = saved[0].id.to_string();
    match parse(&["dpge", "recommend", "--data", data, "--direction", "item-user", "-q", "2", "-k", "2", "--checkpoint", &id]) {
        Command::Recommend(args) => commands::execute_recommend(args, &settings, &quiet()).unwrap(),
        _ => panic!("Expected Recommend command"),
    }
}

#[test]
fn test_restored_engine_matches_checkpoint() {
    let dir = TempDir::new().unwrap();
    let data = dir.path().join("toy");
    write_dataset(&data);
    let settings = settings(&dir.path().join("ckpt.db"));
    train(&settings, data.to_str().unwrap());

    let args = match parse(&["dpge", "evaluate", "--data", data.to_str().unwrap()]) {
        Command::Evaluate(args) => args,
        _ => panic!("Expected Evaluate command"),
    };
    let session = Session::new(&settings, &args.data).unwrap();
    let store = session.open_store().unwrap();
    let (first, checkpoint) = session.restored_engine(&store, None, &[]).unwrap();
    let (second, _) = session
        .restored_engine(&store, Some(&checkpoint.id.to_string()), &[])
        .unwrap();

    let a = first.embed().unwrap();
    let b = second.embed().unwrap();
    let a = a.user_active.flatten_all().unwrap().to_vec1::<f32>().unwrap();
    let b = b.user_active.flatten_all().unwrap().to_vec1::<f32>().unwrap();
    assert_eq!(a, b);
}

#[test]
fn test_update_grows_and_stores_checkpoint() {
    let dir = TempDir::new().unwrap();
    let data = dir.path().join("toy");
    let delta = dir.path().join("delta");
    write_dataset(&data);
    fs::create_dir_all(&delta).unwrap();
    fs::write(delta.join("success.txt"), "4 0\n4 3\n").unwrap();
    let settings = settings(&dir.path().join("ckpt.db"));
    let data_arg = data.to_str().unwrap();
    let delta_arg = delta.to_str().unwrap();
    train(&settings, data_arg);

    match parse(&["dpge", "update", "--data", data_arg, "--delta", delta_arg, "--epochs", "0"]) {
        Command::Update(args) => commands::execute_update(args, &settings, &quiet(), no_stop()).unwrap(),
        _ => panic!("Expected Update command"),
    }
    let store = CheckpointStore::new(&settings.data.db).unwrap();
    let latest = store.latest().unwrap().unwrap();
    assert_eq!(latest.counts.users, 5);

    // Later commands replay the delta to reach the grown counts
    match parse(&["dpge", "recommend", "--data", data_arg, "-q", "4", "--applied", delta_arg]) {
        Command::Recommend(args) => commands::execute_recommend(args, &settings, &quiet()).unwrap(),
        _ => panic!("Expected Recommend command"),
    }
}

#[test]
fn test_recommend_rejects_unknown_query() {
    let dir = TempDir::new().unwrap();
    let data = dir.path().join("toy");
    write_dataset(&data);
    let settings = settings(&dir.path().join("ckpt.db"));
    let data = data.to_str().unwrap();
    train(&settings, data);

    match parse(&["dpge", "recommend", "--data", data, "-q", "40"]) {
        Command::Recommend(args) => {
            let result = commands::execute_recommend(args, &settings, &quiet());
            assert!(matches!(result, Err(CliError::InvalidInput(_))));
        }
        _ => panic!("Expected Recommend command"),
    }
}

#[test]
fn test_evaluate_without_checkpoint() {
    let dir = TempDir::new().unwrap();
    let data = dir.path().join("toy");
    write_dataset(&data);
    let settings = settings(&dir.path().join("empty.db"));

    match parse(&["dpge", "evaluate", "--data", data.to_str().unwrap()]) {
        Command::Evaluate(args) => {
            let result = commands::execute_evaluate(args, &settings, &quiet());
            assert!(matches!(result, Err(CliError::NoCheckpoint(_))));
        }
        _ => panic!("Expected Evaluate command"),
    }
}

#[test]
fn test_inspect_with_text_and_db() {
    let dir = TempDir::new().unwrap();
    let data = dir.path().join("toy");
    write_dataset(&data);
    fs::write(data.join("item_text.tsv"), "0\tRust backend. Remote.\n").unwrap();
    let settings = settings(&dir.path().join("ckpt.db"));
    let db = settings.data.db.to_str().unwrap().to_string();

    match parse(&["dpge", "inspect", "--data", data.to_str().unwrap(), "--db", &db]) {
        Command::Inspect(args) => commands::execute_inspect(args, &settings, &quiet()).unwrap(),
        _ => panic!("Expected Inspect command"),
    }
}

#[test]
fn test_train_text_model_persists_sentences() {
    let dir = TempDir::new().unwrap();
    let data = dir.path().join("toy");
    write_dataset(&data);
    fs::write(data.join("user_text.tsv"), "0\tRust developer. Likes compilers.\n2\tData engineer\n").unwrap();
    let mut settings = settings(&dir.path().join("ckpt.db"));
    settings.model.text.sentence_dim = 8;
    settings.model.text.attention_hidden = 4;
    settings.trainer.max_epochs = 2;

    match parse(&["dpge", "train", "--data", data.to_str().unwrap(), "--model", "dpge-text"]) {
        Command::Train(args) => commands::execute_train(args, &settings, &quiet(), no_stop()).unwrap(),
        _ => panic!("Expected Train command"),
    }

    let store = CheckpointStore::new(&settings.data.db).unwrap();
    let latest = store.latest().unwrap().unwrap();
    assert_eq!(latest.model, "dpge-text");
    assert!(latest.has_text_weights());
    let text = store.load_text(8, latest.counts).unwrap();
    assert_eq!(text.sentences(dpge_domain::NodeType::User, 0).len(), 2);
}

//! End-to-end backend resolution scenarios
//!
//! Each test builds a working directory from scratch, runs one resolution
//! with scripted prompt answers, and checks the returned backend and every
//! file-system side effect.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tempfile::TempDir;

use vela_backend::{BackendConfig, ScriptedPrompter};
use vela_cli::{BackendOpts, Session};
use vela_state::local::default_backup_path;
use vela_state::{
    MetaStore, RemoteRecord, ResourceState, StateFile, DEFAULT_DATA_DIR, DEFAULT_STATE_FILENAME,
};

fn non_empty(lineage: &str) -> StateFile {
    let mut state = StateFile::with_lineage(lineage);
    state
        .root_module_mut()
        .resources
        .push(ResourceState::new("s3.bucket", "assets", "aws"));
    state
}

fn write_state(path: &Path, state: &StateFile) {
    fs::write(path, state.to_vec().unwrap()).unwrap();
}

fn read_state(path: &Path) -> StateFile {
    StateFile::from_slice(&fs::read(path).unwrap()).unwrap()
}

fn local_config(target: &Path) -> BackendConfig {
    BackendConfig::new(
        "local",
        [(
            "path".to_string(),
            serde_json::json!(target.display().to_string()),
        )]
        .into_iter()
        .collect(),
    )
}

fn write_local_backend_config(dir: &Path, target: &Path) {
    fs::write(
        dir.join("vela.toml"),
        format!("[backend.local]\npath = \"{}\"\n", target.display()),
    )
    .unwrap();
}

fn session_in(dir: &Path, answers: &[&str]) -> (Session, Arc<ScriptedPrompter>) {
    let prompter = Arc::new(ScriptedPrompter::new(answers.iter().copied()));
    let mut session = Session::new(prompter.clone());
    session.state_path = Some(dir.join(DEFAULT_STATE_FILENAME));
    session.data_dir = dir.join(DEFAULT_DATA_DIR);
    (session, prompter)
}

fn opts_in(dir: &Path) -> BackendOpts {
    BackendOpts {
        config_path: Some(dir.to_path_buf()),
        force_local: false,
    }
}

async fn save_backend_record(dir: &Path, config: &BackendConfig) {
    let mut meta = MetaStore::open(dir.join(DEFAULT_DATA_DIR));
    meta.refresh().await.unwrap();
    meta.save(Some(config.to_record())).await.unwrap();
}

async fn saved_record_in(dir: &Path) -> Option<vela_state::BackendRecord> {
    let mut meta = MetaStore::open(dir.join(DEFAULT_DATA_DIR));
    meta.refresh().await.unwrap();
    meta.saved_backend()
}

/// Serve a fixed state document over HTTP; returns the state URL
async fn serve_state(state: &StateFile) -> String {
    let bytes = state.to_vec().unwrap();
    let app = Router::new().route(
        "/state",
        get(move || {
            let bytes = bytes.clone();
            async move { bytes }
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}/state")
}

fn http_remote_stanza(address: &str) -> RemoteRecord {
    RemoteRecord {
        remote_type: "http".to_string(),
        config: [("address".to_string(), address.to_string())]
            .into_iter()
            .collect(),
    }
}

// Empty directory, no configuration: a local wrapper that writes the
// default state file on demand and nothing else.
#[tokio::test]
async fn empty_dir_uses_local_state() {
    let td = TempDir::new().unwrap();
    let dir = td.path();
    let (session, _) = session_in(dir, &[]);

    let backend = session.backend(opts_in(dir)).await.unwrap();

    let mut mgr = backend.state().unwrap();
    mgr.refresh_state().await.unwrap();
    assert!(mgr.state().is_none());

    mgr.write_state(Some(non_empty("test"))).unwrap();
    mgr.persist_state().await.unwrap();

    let state_path = dir.join(DEFAULT_STATE_FILENAME);
    assert_eq!(read_state(&state_path).lineage, "test");
    // empty to start: no backup, and no backend metadata was made
    assert!(!default_backup_path(&state_path).exists());
    assert!(!MetaStore::file_path(dir.join(DEFAULT_DATA_DIR)).exists());
}

// Pre-existing default local state, no configuration: the state is served
// as-is and the first overwrite produces the backup sibling.
#[tokio::test]
async fn existing_local_state_is_served_and_backed_up() {
    let td = TempDir::new().unwrap();
    let dir = td.path();
    let state_path = dir.join(DEFAULT_STATE_FILENAME);
    write_state(&state_path, &non_empty("test"));

    let (session, _) = session_in(dir, &[]);
    let backend = session.backend(opts_in(dir)).await.unwrap();

    let mut mgr = backend.state().unwrap();
    mgr.refresh_state().await.unwrap();
    assert_eq!(mgr.state().unwrap().lineage, "test");

    mgr.write_state(Some(non_empty("next"))).unwrap();
    mgr.persist_state().await.unwrap();

    let backup = default_backup_path(&state_path);
    assert_eq!(read_state(&backup).lineage, "test");
    assert_eq!(read_state(&state_path).lineage, "next");
}

// Legacy remote stanza only: the legacy adapter serves the remote state,
// nothing is migrated and no metadata is written.
#[tokio::test]
async fn legacy_remote_only_is_served_without_migration() {
    let td = TempDir::new().unwrap();
    let dir = td.path();

    let url = serve_state(&non_empty("legacy")).await;
    let mut tracked = StateFile::with_lineage("tracked");
    tracked.remote = Some(http_remote_stanza(&url));
    let state_path = dir.join(DEFAULT_STATE_FILENAME);
    write_state(&state_path, &tracked);

    let (session, prompter) = session_in(dir, &[]);
    let backend = session.backend(opts_in(dir)).await.unwrap();

    let mut mgr = backend.state().unwrap();
    mgr.refresh_state().await.unwrap();
    let served = mgr.state().unwrap();
    assert_eq!(served.lineage, "legacy");
    assert!(served.backend.is_none());

    // no questions, no backups, no metadata, stanza left in place
    assert_eq!(prompter.remaining(), 0);
    assert!(!default_backup_path(&state_path).exists());
    assert!(!MetaStore::file_path(dir.join(DEFAULT_DATA_DIR)).exists());
    assert!(read_state(&state_path).remote.is_some());
}

// First-time backend configuration with prior local state, answering yes:
// the state moves into the new backend, the local file is cleared with a
// backup, and the metadata is persisted.
#[tokio::test]
async fn first_configure_migrates_local_state_on_yes() {
    let td = TempDir::new().unwrap();
    let dir = td.path();
    let target = dir.join("local-state.json");
    write_local_backend_config(dir, &target);

    let state_path = dir.join(DEFAULT_STATE_FILENAME);
    write_state(&state_path, &non_empty("backend-new-migrate"));

    let (session, _) = session_in(dir, &["yes"]);
    let backend = session.backend(opts_in(dir)).await.unwrap();

    let mut mgr = backend.state().unwrap();
    mgr.refresh_state().await.unwrap();
    assert_eq!(mgr.state().unwrap().lineage, "backend-new-migrate");

    assert!(!state_path.exists());
    assert_eq!(
        read_state(&default_backup_path(&state_path)).lineage,
        "backend-new-migrate"
    );

    let record = saved_record_in(dir).await.unwrap();
    assert_eq!(record.backend_type, "local");
    assert_eq!(record.hash, local_config(&target).hash);
}

// Same fixture, answering no: nothing is copied, but the local state is
// still cleared (with its backup) and the metadata is persisted.
#[tokio::test]
async fn first_configure_clears_local_state_on_no() {
    let td = TempDir::new().unwrap();
    let dir = td.path();
    let target = dir.join("local-state.json");
    write_local_backend_config(dir, &target);

    let state_path = dir.join(DEFAULT_STATE_FILENAME);
    write_state(&state_path, &non_empty("backend-new-migrate"));

    let (session, _) = session_in(dir, &["no"]);
    let backend = session.backend(opts_in(dir)).await.unwrap();

    let mut mgr = backend.state().unwrap();
    mgr.refresh_state().await.unwrap();
    assert!(mgr.state().is_none());
    assert!(!target.exists());

    assert!(!state_path.exists());
    assert_eq!(
        read_state(&default_backup_path(&state_path)).lineage,
        "backend-new-migrate"
    );
    assert!(saved_record_in(dir).await.is_some());
}

// Changing the configured backend and copying: the old backend's state
// lands in the new one and the metadata records the new configuration.
#[tokio::test]
async fn changed_backend_copies_state_between_backends() {
    let td = TempDir::new().unwrap();
    let dir = td.path();
    let old_target = dir.join("local-state.json");
    let new_target = dir.join("local-state-2.json");

    write_state(&old_target, &non_empty("backend-change"));
    save_backend_record(dir, &local_config(&old_target)).await;
    write_local_backend_config(dir, &new_target);

    let (session, _) = session_in(dir, &["yes", "yes"]);
    let backend = session.backend(opts_in(dir)).await.unwrap();

    let mut mgr = backend.state().unwrap();
    mgr.refresh_state().await.unwrap();
    assert_eq!(mgr.state().unwrap().lineage, "backend-change");
    assert_eq!(read_state(&new_target).lineage, "backend-change");

    // no default local files were ever involved
    let state_path = dir.join(DEFAULT_STATE_FILENAME);
    assert!(!state_path.exists());
    assert!(!default_backup_path(&state_path).exists());

    let record = saved_record_in(dir).await.unwrap();
    assert_eq!(record.hash, local_config(&new_target).hash);
}

// Unchanged saved configuration: the saved backend is instantiated from
// its complete record and nothing on disk moves.
#[tokio::test]
async fn unchanged_configuration_touches_nothing() {
    let td = TempDir::new().unwrap();
    let dir = td.path();
    let target = dir.join("local-state.json");

    write_state(&target, &non_empty("configuredUnchanged"));
    save_backend_record(dir, &local_config(&target)).await;
    write_local_backend_config(dir, &target);

    let meta_path = MetaStore::file_path(dir.join(DEFAULT_DATA_DIR));
    let meta_before = fs::read(&meta_path).unwrap();
    let target_before = fs::read(&target).unwrap();

    let (session, prompter) = session_in(dir, &[]);
    let backend = session.backend(opts_in(dir)).await.unwrap();

    let mut mgr = backend.state().unwrap();
    mgr.refresh_state().await.unwrap();
    assert_eq!(mgr.state().unwrap().lineage, "configuredUnchanged");

    assert_eq!(prompter.remaining(), 0);
    assert_eq!(fs::read(&meta_path).unwrap(), meta_before);
    assert_eq!(fs::read(&target).unwrap(), target_before);
    let state_path = dir.join(DEFAULT_STATE_FILENAME);
    assert!(!state_path.exists());
    assert!(!default_backup_path(&state_path).exists());
}

// All three inputs present with a changed configuration, answering yes to
// everything: the saved state is copied first, the legacy copy is
// confirmed over it, the metadata records the new configuration, and the
// legacy stanza is cleared.
#[tokio::test]
async fn change_with_legacy_prefers_the_legacy_copy() {
    let td = TempDir::new().unwrap();
    let dir = td.path();
    let old_target = dir.join("local-state.json");
    let new_target = dir.join("local-state-2.json");

    let url = serve_state(&non_empty("legacy")).await;
    let mut tracked = StateFile::with_lineage("tracked");
    tracked.remote = Some(http_remote_stanza(&url));
    let state_path = dir.join(DEFAULT_STATE_FILENAME);
    write_state(&state_path, &tracked);

    write_state(&old_target, &non_empty("configured"));
    save_backend_record(dir, &local_config(&old_target)).await;
    write_local_backend_config(dir, &new_target);

    let (session, prompter) = session_in(dir, &["yes", "yes", "yes", "yes"]);
    let backend = session.backend(opts_in(dir)).await.unwrap();

    let mut mgr = backend.state().unwrap();
    mgr.refresh_state().await.unwrap();
    assert_eq!(mgr.state().unwrap().lineage, "legacy");

    // saved copy (one answer) then the two-step legacy overwrite
    assert_eq!(prompter.remaining(), 1);

    let record = saved_record_in(dir).await.unwrap();
    assert_eq!(record.hash, local_config(&new_target).hash);

    // the stanza was all the local state file held, so clearing it
    // removes the file without leaving a backup
    assert!(!state_path.exists());
    assert!(!default_backup_path(&state_path).exists());
}

// Declining the saved copy but accepting the legacy one: the legacy state
// is the only copy that lands in the new backend.
#[tokio::test]
async fn change_with_legacy_copies_only_what_was_accepted() {
    let td = TempDir::new().unwrap();
    let dir = td.path();
    let old_target = dir.join("local-state.json");
    let new_target = dir.join("local-state-2.json");

    let url = serve_state(&non_empty("legacy")).await;
    let mut tracked = StateFile::with_lineage("tracked");
    tracked.remote = Some(http_remote_stanza(&url));
    write_state(&dir.join(DEFAULT_STATE_FILENAME), &tracked);

    write_state(&old_target, &non_empty("configured"));
    save_backend_record(dir, &local_config(&old_target)).await;
    write_local_backend_config(dir, &new_target);

    // no to the saved copy; the new backend is then still empty, so the
    // legacy migration is a single copy question
    let (session, prompter) = session_in(dir, &["no", "yes"]);
    let backend = session.backend(opts_in(dir)).await.unwrap();

    let mut mgr = backend.state().unwrap();
    mgr.refresh_state().await.unwrap();
    assert_eq!(mgr.state().unwrap().lineage, "legacy");
    assert_eq!(prompter.remaining(), 0);

    // the declined source is untouched
    assert_eq!(read_state(&old_target).lineage, "configured");
}

// Unsetting a saved backend: its state is offered back to the local file
// and the metadata record is removed either way.
#[tokio::test]
async fn unset_saved_backend_moves_state_back_to_local() {
    let td = TempDir::new().unwrap();
    let dir = td.path();
    let target = dir.join("local-state.json");

    write_state(&target, &non_empty("configuredUnset"));
    save_backend_record(dir, &local_config(&target)).await;
    // no vela.toml: the backend is no longer declared

    let (session, _) = session_in(dir, &["yes"]);
    let backend = session.backend(opts_in(dir)).await.unwrap();

    let mut mgr = backend.state().unwrap();
    mgr.refresh_state().await.unwrap();
    assert_eq!(mgr.state().unwrap().lineage, "configuredUnset");

    let state_path = dir.join(DEFAULT_STATE_FILENAME);
    assert_eq!(read_state(&state_path).lineage, "configuredUnset");
    // the copy landed in an empty local file: no backup
    assert!(!default_backup_path(&state_path).exists());
    assert!(!MetaStore::file_path(dir.join(DEFAULT_DATA_DIR)).exists());
}

#[tokio::test]
async fn unset_saved_backend_declined_still_clears_metadata() {
    let td = TempDir::new().unwrap();
    let dir = td.path();
    let target = dir.join("local-state.json");

    write_state(&target, &non_empty("configuredUnset"));
    save_backend_record(dir, &local_config(&target)).await;

    let (session, _) = session_in(dir, &["no"]);
    let backend = session.backend(opts_in(dir)).await.unwrap();

    let mut mgr = backend.state().unwrap();
    mgr.refresh_state().await.unwrap();
    assert!(mgr.state().is_none());

    assert!(!dir.join(DEFAULT_STATE_FILENAME).exists());
    assert!(!MetaStore::file_path(dir.join(DEFAULT_DATA_DIR)).exists());
    // the old backend keeps its state; nothing was destroyed
    assert_eq!(read_state(&target).lineage, "configuredUnset");
}

// Legacy remote beside an unchanged saved backend: only the legacy
// migration is offered and the stanza is cleared afterwards.
#[tokio::test]
async fn unchanged_with_legacy_offers_the_legacy_copy() {
    let td = TempDir::new().unwrap();
    let dir = td.path();
    let target = dir.join("local-state.json");

    let url = serve_state(&non_empty("legacy")).await;
    let mut tracked = StateFile::with_lineage("tracked");
    tracked.remote = Some(http_remote_stanza(&url));
    let state_path = dir.join(DEFAULT_STATE_FILENAME);
    write_state(&state_path, &tracked);

    write_state(&target, &non_empty("configured"));
    save_backend_record(dir, &local_config(&target)).await;
    write_local_backend_config(dir, &target);

    let meta_path = MetaStore::file_path(dir.join(DEFAULT_DATA_DIR));
    let meta_before = fs::read(&meta_path).unwrap();

    // decline at the first divergence question
    let (session, prompter) = session_in(dir, &["no"]);
    let backend = session.backend(opts_in(dir)).await.unwrap();

    let mut mgr = backend.state().unwrap();
    mgr.refresh_state().await.unwrap();
    assert_eq!(mgr.state().unwrap().lineage, "configured");
    assert_eq!(prompter.remaining(), 0);

    // metadata untouched, stanza cleared
    assert_eq!(fs::read(&meta_path).unwrap(), meta_before);
    assert!(!state_path.exists());
}

// A plain (non-enhanced) backend still comes back operation-capable: the
// wrapper routes state through it.
#[tokio::test]
async fn plain_backend_is_wrapped_for_operations() {
    let td = TempDir::new().unwrap();
    let dir = td.path();
    fs::write(
        dir.join("vela.toml"),
        "[backend.inmem]\nlineage = \"wrapped\"\n",
    )
    .unwrap();

    let (session, _) = session_in(dir, &[]);
    let backend = session.backend(opts_in(dir)).await.unwrap();

    let mut mgr = backend.state().unwrap();
    mgr.refresh_state().await.unwrap();
    assert_eq!(mgr.state().unwrap().lineage, "wrapped");

    let summary = backend
        .operation(vela_backend::Operation {
            kind: vela_backend::OperationKind::Plan,
        })
        .await
        .unwrap();
    assert_eq!(summary.lineage.as_deref(), Some("wrapped"));

    // state lives in the wrapped backend, not in a local file
    assert!(!dir.join(DEFAULT_STATE_FILENAME).exists());
}

// Prompt determinism: the same inputs and the same answers produce the
// same file-system outcome.
#[tokio::test]
async fn identical_runs_are_deterministic() {
    let mut lineages = Vec::new();
    let mut metadata = Vec::new();

    for _ in 0..2 {
        let td = TempDir::new().unwrap();
        let dir = td.path();
        let old_target = dir.join("local-state.json");
        let new_target = dir.join("local-state-2.json");

        write_state(&old_target, &non_empty("backend-change"));
        save_backend_record(dir, &local_config(&old_target)).await;
        write_local_backend_config(dir, &new_target);

        let (session, _) = session_in(dir, &["yes"]);
        session.backend(opts_in(dir)).await.unwrap();

        lineages.push(read_state(&new_target).lineage);
        let record = saved_record_in(dir).await.unwrap();
        metadata.push((record.backend_type, record.hash));
    }

    assert_eq!(lineages[0], lineages[1]);
    assert_eq!(metadata[0], metadata[1]);
}

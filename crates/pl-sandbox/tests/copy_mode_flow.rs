//! End-to-end copy-mode flow against the scriptable mock backend.

use std::sync::Arc;

use pl_sandbox::{Dispatcher, SyncEngine};
use pl_sandbox_core::{ProjectLayout, EXIT_ALL_SESSIONS};
use pl_sandbox_mock::MockBackend;

fn ready_backend(root: &std::path::Path) -> Arc<MockBackend> {
    let mock = MockBackend::new(ProjectLayout::rooted_at(root));
    {
        let mut state = mock.state();
        state.exists = true;
        state.responsive = true;
    }
    Arc::new(mock)
}

#[tokio::test]
async fn batch_dispatch_pushes_execs_and_pulls_in_order() {
    let tmp = tempfile::tempdir().unwrap();
    let backend = ready_backend(tmp.path());
    backend
        .state()
        .files
        .insert("/workspace/practice/basic/001.py".into(), b"# practice".to_vec());
    let dispatcher = Dispatcher::new(backend.clone());

    let script = tmp.path().join("python").join("learn_python.py");
    let args = vec!["--functions".to_string(), "basic".to_string()];
    let outcome = dispatcher.run_script(&script, &args, false).await.unwrap();

    assert_eq!(outcome.exit_code, 0);

    // Phase order: push, exec, pull - each exactly once.
    let calls = backend.calls();
    let push_at = calls.iter().position(|c| c == "copy_in").unwrap();
    let exec_at = calls
        .iter()
        .position(|c| c == "exec: python python/learn_python.py --functions basic")
        .unwrap();
    let scan_at = calls.iter().position(|c| c == "list_files").unwrap();
    assert!(push_at < exec_at && exec_at < scan_at);
    assert_eq!(backend.count_calls("copy_in"), 1);
    assert_eq!(backend.count_calls("list_files"), 1);

    // The practice file produced inside the sandbox landed on the host.
    let mirrored = tmp.path().join("practice/basic/001.py");
    assert_eq!(std::fs::read(mirrored).unwrap(), b"# practice");
}

#[tokio::test]
async fn repeated_pulls_converge_without_duplicate_notices() {
    let tmp = tempfile::tempdir().unwrap();
    let backend = ready_backend(tmp.path());
    backend
        .state()
        .files
        .insert("/workspace/report.md".into(), b"results".to_vec());
    let engine = SyncEngine::new(backend.clone());

    let first = engine.pull(false).await.unwrap();
    let second = engine.pull(false).await.unwrap();
    let third = engine.pull(true).await.unwrap();

    assert_eq!(first.new_files.len(), 1);
    assert_eq!(second.new_files.len(), 0);
    assert_eq!(third.new_files.len(), 0);
    assert_eq!(std::fs::read(tmp.path().join("report.md")).unwrap(), b"results");
}

#[tokio::test]
async fn exit_all_sessions_short_circuits_a_module_loop() {
    let tmp = tempfile::tempdir().unwrap();
    let backend = ready_backend(tmp.path());
    {
        let mut state = backend.state();
        state.interactive_codes.push_back(0);
        state.interactive_codes.push_back(EXIT_ALL_SESSIONS);
        state.interactive_codes.push_back(0);
    }
    let dispatcher = Dispatcher::new(backend.clone());

    let mut completed = Vec::new();
    for module in ["basic", "advanced", "csv"] {
        let command = format!("python python/learn_python.py --functions {module}");
        let outcome = dispatcher.run_command(&command, true).await.unwrap();
        completed.push(module);
        if outcome.exit_all_sessions() {
            break;
        }
    }

    // The third module never runs once the sentinel comes back.
    assert_eq!(completed, vec!["basic", "advanced"]);
    assert_eq!(backend.count_calls("exec_interactive"), 2);
}

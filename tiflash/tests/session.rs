#![cfg(unix)]

mod common;

use std::net::{Ipv4Addr, TcpListener};
use std::sync::Arc;
use std::time::Duration;

use common::{session_options, FakeEngine, Reply};
use tiflash::{CommandRequest, CommandStatus, Error, ListKind, Session};

/// A command which posts nothing useful still succeeds.
#[tokio::test]
async fn noop_command_succeeds() {
    let root = tempfile::tempdir().unwrap();
    let engine = Arc::new(FakeEngine::succeeding());

    let mut session = Session::open(engine.clone(), &session_options(root.path()))
        .await
        .expect("Failed to open a session with the fake engine.");
    let response = session
        .execute(&CommandRequest::new("noop"), Some(Duration::from_secs(5)))
        .await
        .expect("Failed to execute a command.");

    assert!(response.success());
    assert_eq!(response.status, CommandStatus::Completed);
    assert_eq!(engine.commands(), vec![vec!["--noop".to_string()]]);

    session.close().await.expect("Failed to close the session.");
}

/// A worker which never answers does not block the caller.
#[tokio::test]
async fn silent_worker_times_out() {
    let root = tempfile::tempdir().unwrap();
    let engine = Arc::new(FakeEngine::new(|_| Reply::Hang));
    let mut session = Session::open(engine, &session_options(root.path()))
        .await
        .unwrap();

    let response = session
        .execute(&CommandRequest::new("flash"), Some(Duration::from_millis(10)))
        .await
        .unwrap();

    assert!(!response.success());
    assert_eq!(response.status, CommandStatus::TimedOut);
    assert!(response.payload.is_empty());
    assert!(matches!(response.into_result(), Err(Error::Timeout)));

    session.close().await.unwrap();
}

/// A result which arrives after its command timed out is not taken for the
/// result of the next command.
#[tokio::test]
async fn command_after_a_timeout_gets_its_own_result() {
    let root = tempfile::tempdir().unwrap();
    let engine = Arc::new(FakeEngine::new(|args| {
        if args.iter().any(|arg| arg == "--flash") {
            Reply::Delayed(Duration::from_millis(300), "flash result".to_string())
        } else {
            Reply::Post("0x1234".to_string(), 0)
        }
    }));
    let mut session = Session::open(engine, &session_options(root.path()))
        .await
        .unwrap();

    let first = session
        .execute(&CommandRequest::new("flash"), Some(Duration::from_millis(50)))
        .await
        .unwrap();
    assert_eq!(first.status, CommandStatus::TimedOut);

    let second = session
        .execute(
            &CommandRequest::new("register").flag("read"),
            Some(Duration::from_secs(5)),
        )
        .await
        .unwrap();

    assert_eq!(second.status, CommandStatus::Completed);
    assert!(second.success());
    assert_eq!(second.payload, "0x1234");

    session.close().await.unwrap();
}

/// A worker still running when the next command comes in makes that command time out too.
#[tokio::test]
async fn command_behind_a_running_worker_times_out() {
    let root = tempfile::tempdir().unwrap();
    let engine = Arc::new(FakeEngine::new(|_| Reply::Hang));
    let mut session = Session::open(engine.clone(), &session_options(root.path()))
        .await
        .unwrap();

    for _ in 0..2 {
        let response = session
            .execute(&CommandRequest::new("reset"), Some(Duration::from_millis(20)))
            .await
            .unwrap();
        assert_eq!(response.status, CommandStatus::TimedOut);
    }
    assert_eq!(engine.commands().len(), 1);

    session.close().await.unwrap();
}

/// The timeout bounds the result, not the exit of a worker which already posted it.
#[tokio::test]
async fn result_posted_before_a_slow_exit_is_returned() {
    let root = tempfile::tempdir().unwrap();
    let engine = Arc::new(FakeEngine::new(|_| {
        Reply::Linger("0x1234".to_string(), Duration::from_secs(1))
    }));
    let mut session = Session::open(engine, &session_options(root.path()))
        .await
        .unwrap();

    let response = session
        .execute(
            &CommandRequest::new("evaluate").arg("expression", "x"),
            Some(Duration::from_millis(200)),
        )
        .await
        .unwrap();

    assert_eq!(response.status, CommandStatus::Completed);
    assert!(response.success());
    assert_eq!(response.payload, "0x1234");

    session.close().await.unwrap();
}

#[tokio::test]
async fn failure_carries_the_engine_text() {
    let root = tempfile::tempdir().unwrap();
    let engine = Arc::new(FakeEngine::new(|_| {
        Reply::Post("Flash programming failed at 0x00001000".to_string(), 255)
    }));
    let mut session = Session::open(engine, &session_options(root.path()))
        .await
        .unwrap();

    let response = session
        .execute(&CommandRequest::new("flash"), None)
        .await
        .unwrap();

    assert!(!response.success());
    match response.into_result() {
        Err(Error::Command(text)) => assert_eq!(text, "Flash programming failed at 0x00001000"),
        other => panic!("unexpected result: {other:?}"),
    }

    session.close().await.unwrap();
}

#[tokio::test]
async fn worker_exiting_without_result_fails() {
    let root = tempfile::tempdir().unwrap();
    let engine = Arc::new(FakeEngine::new(|_| Reply::Exit(0)));
    let mut session = Session::open(engine, &session_options(root.path()))
        .await
        .unwrap();

    let response = session
        .execute(&CommandRequest::new("reset"), Some(Duration::from_secs(5)))
        .await
        .unwrap();

    assert!(!response.success());
    assert_eq!(response.status, CommandStatus::Completed);
    assert!(response.payload.is_empty());

    session.close().await.unwrap();
}

#[tokio::test]
async fn prelude_prefixes_every_command() {
    let root = tempfile::tempdir().unwrap();
    let engine = Arc::new(FakeEngine::succeeding());
    let mut session = Session::open(engine.clone(), &session_options(root.path()))
        .await
        .unwrap();

    session.set_prelude(CommandRequest::new("session").arg("chip", "CORTEX_M4"));
    session
        .execute(&CommandRequest::new("erase"), None)
        .await
        .unwrap();
    session.list(ListKind::Devices, None).await.unwrap();

    assert_eq!(
        engine.commands(),
        vec![
            vec!["--session", "-chip", "CORTEX_M4", "--erase"],
            vec!["--list", "-devices"],
        ]
    );

    session.close().await.unwrap();
}

#[tokio::test]
async fn list_splits_the_payload() {
    let root = tempfile::tempdir().unwrap();
    let engine = Arc::new(FakeEngine::new(|_| {
        Reply::Post("CC1352R1F3;;MSP432P401R".to_string(), 0)
    }));
    let mut session = Session::open(engine, &session_options(root.path()))
        .await
        .unwrap();

    let devices = session.list(ListKind::Devices, None).await.unwrap();

    assert_eq!(devices, vec!["CC1352R1F3", "MSP432P401R"]);

    session.close().await.unwrap();
}

/// The result listener moves on when its preferred ports are taken.
#[tokio::test]
async fn result_port_retry() {
    let root = tempfile::tempdir().unwrap();
    let first = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    let port = first.local_addr().unwrap().port();
    let Ok(_second) = TcpListener::bind((Ipv4Addr::LOCALHOST, port + 1)) else {
        // The neighbouring port is in use by someone else.
        return;
    };

    let options = tiflash::SessionOptions {
        result_port: port,
        port_attempts: 3,
        ..session_options(root.path())
    };
    let session = Session::open(Arc::new(FakeEngine::succeeding()), &options)
        .await
        .expect("The third port should have been used.");

    assert_eq!(session.result_port(), port + 2);

    session.close().await.unwrap();
}

#[tokio::test]
async fn exhausted_ports_fail_the_start() {
    let root = tempfile::tempdir().unwrap();
    let taken = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    let options = tiflash::SessionOptions {
        result_port: taken.local_addr().unwrap().port(),
        port_attempts: 1,
        ..session_options(root.path())
    };

    let result = Session::open(Arc::new(FakeEngine::succeeding()), &options).await;

    assert!(matches!(result, Err(Error::SessionStart(_))));
}

#[tokio::test]
async fn server_dying_during_startup_is_reported() {
    let root = tempfile::tempdir().unwrap();

    let result = Session::open(
        Arc::new(FakeEngine::failing_server()),
        &session_options(root.path()),
    )
    .await;

    match result {
        Err(Error::SessionStart(text)) => assert!(text.contains("license check failed")),
        other => panic!("unexpected result: {other:?}"),
    }
}

#[tokio::test]
async fn close_removes_the_workspace() {
    let root = tempfile::tempdir().unwrap();
    let session = Session::open(
        Arc::new(FakeEngine::succeeding()),
        &session_options(root.path()),
    )
    .await
    .unwrap();
    let workspace = session.workspace().to_path_buf();
    assert!(workspace.starts_with(root.path()));
    assert!(workspace.is_dir());

    session.close().await.unwrap();

    assert!(!workspace.exists());
}

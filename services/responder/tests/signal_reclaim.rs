//! Fatal signals remove the responder's ipc binding
//!
//! Runs the real binary: the signal reclaimer exits the process, so it
//! cannot be exercised inside a test process.

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

fn spawn_responder(path: &Path) -> Child {
    Command::new(env!("CARGO_BIN_EXE_responder"))
        .arg("--binding")
        .arg(format!("ipc://{}", path.display()))
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .unwrap()
}

/// Wait until the responder has bound, which happens after its signal
/// handlers are installed
fn wait_for_binding(child: &mut Child, path: &Path) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !path.exists() {
        if let Some(status) = child.try_wait().unwrap() {
            panic!("responder exited early with {}", status);
        }
        assert!(Instant::now() < deadline, "responder never bound {:?}", path);
        std::thread::sleep(Duration::from_millis(20));
    }
}

fn signal_and_wait(child: &mut Child, signal: Signal) -> Option<i32> {
    kill(Pid::from_raw(child.id() as i32), signal).unwrap();

    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        if let Some(status) = child.try_wait().unwrap() {
            return status.code();
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            panic!("responder ignored {:?}", signal);
        }
        std::thread::sleep(Duration::from_millis(20));
    }
}

#[test]
fn test_sigterm_removes_binding_and_exits_143() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("term.ipc");

    let mut child = spawn_responder(&path);
    wait_for_binding(&mut child, &path);

    assert_eq!(signal_and_wait(&mut child, Signal::SIGTERM), Some(143));
    assert!(!path.exists());
}

#[test]
fn test_sighup_removes_binding_and_exits_129() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("hup.ipc");

    let mut child = spawn_responder(&path);
    wait_for_binding(&mut child, &path);

    assert_eq!(signal_and_wait(&mut child, Signal::SIGHUP), Some(129));
    assert!(!path.exists());
}

use super::*;

use std::time::Duration;

async fn wait_until(mut cond: impl FnMut() -> bool, what: &str) {
    for _ in 0..500 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

#[tokio::test]
async fn stdout_lines_arrive_in_order() {
    let child = ChildProcess::new("printf 'one\\ntwo\\n'");
    child.run().await.unwrap();
    child.wait().await;

    assert_eq!(child.read_line(OutputStream::Stdout).as_deref(), Some("one\n"));
    assert_eq!(child.read_line(OutputStream::Stdout).as_deref(), Some("two\n"));
    assert_eq!(child.read_line(OutputStream::Stdout), None);
    assert!(!child.running());
    assert_eq!(child.exit_code(), 0);
}

#[tokio::test]
async fn stderr_is_buffered_separately() {
    let child = ChildProcess::new("echo out; echo err 1>&2");
    child.run().await.unwrap();
    child.wait().await;

    assert_eq!(child.read_line(OutputStream::Stdout).as_deref(), Some("out\n"));
    assert_eq!(child.read_line(OutputStream::Stderr).as_deref(), Some("err\n"));
}

#[tokio::test]
async fn send_reaches_child_stdin() {
    let child = ChildProcess::new("cat");
    child.run().await.unwrap();

    child.send(b"hello warden\n").await.unwrap();
    wait_until(
        || child.stdout_buf.pending() >= "hello warden\n".len(),
        "echo from cat",
    )
    .await;
    assert_eq!(
        child.read_line(OutputStream::Stdout).as_deref(),
        Some("hello warden\n")
    );

    child.stop();
    child.wait().await;
}

#[tokio::test]
async fn run_fails_while_already_running() {
    let child = ChildProcess::new("sleep 5");
    child.run().await.unwrap();
    assert!(child.run().await.is_err());

    child.kill();
    child.wait().await;
}

#[tokio::test]
async fn stop_records_negated_signal() {
    let child = ChildProcess::new("sleep 30");
    child.run().await.unwrap();
    wait_until(|| child.running(), "child start").await;

    child.stop();
    child.wait().await;
    assert!(!child.running());
    assert_eq!(child.exit_code(), -libc::SIGTERM);
}

#[tokio::test]
async fn send_fails_once_child_is_gone() {
    let child = ChildProcess::new("true");
    child.run().await.unwrap();
    child.wait().await;
    wait_until(|| !child.running(), "child exit").await;

    let err = child.send(b"ban ghost\n").await.unwrap_err();
    assert!(err.to_string().contains("not running"), "{err}");
}

#[tokio::test]
async fn partial_tail_is_drained_by_read_all() {
    let child = ChildProcess::new("printf 'complete\\nincomplete'");
    child.run().await.unwrap();
    child.wait().await;

    assert_eq!(
        child.read_line(OutputStream::Stdout).as_deref(),
        Some("complete\n")
    );
    assert_eq!(child.read_line(OutputStream::Stdout), None);
    assert_eq!(child.read_all(OutputStream::Stdout), "incomplete");
}

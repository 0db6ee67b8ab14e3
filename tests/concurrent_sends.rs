mod common;

use std::time::Duration;

use colorlink::color::ColorCommand;
use colorlink::device::LinkState;
use colorlink::dispatch::{start_dispatcher, Dispatcher, Outcome};

use common::{fast_config, FakeDevice};

// The fake device takes at most three bytes per write call, so every frame
// is written in pieces and any interleaving would show up in the stream.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_sends_never_interleave() {
    let device = FakeDevice::new();
    let handle = start_dispatcher(Dispatcher::new(device.session(fast_config())));

    let mut tasks = Vec::new();
    for i in 0..32u8 {
        let handle = handle.clone();
        tasks.push(tokio::spawn(async move {
            handle.send(ColorCommand::new(i, 255 - i, i / 2)).await
        }));
    }
    for task in tasks {
        assert_eq!(task.await.unwrap().outcome, Outcome::Sent);
    }

    let written = device.written_text();
    let mut frames: Vec<&str> = written.split_terminator('\n').collect();
    assert_eq!(frames.len(), 32);
    frames.sort();
    let mut expected: Vec<String> = (0..32u8)
        .map(|i| format!("{},{},{}", i, 255 - i, i / 2))
        .collect();
    expected.sort();
    assert_eq!(frames, expected);
    assert_eq!(device.opens(), 1);

    let status = handle.status().await.unwrap();
    assert_eq!(status.stats.sent, 32);
    assert_eq!(status.link, LinkState::Connected);
    handle.shutdown().await;
}

#[tokio::test]
async fn shutdown_closes_session_and_rejects_later_sends() {
    let device = FakeDevice::new();
    let handle = start_dispatcher(Dispatcher::new(device.session(fast_config())));

    let result = handle.send(ColorCommand::new(1, 2, 3)).await;
    assert_eq!(result.outcome, Outcome::Sent);
    assert_eq!(device.open_handles(), 1);

    handle.shutdown().await;
    assert_eq!(device.open_handles(), 0);

    let late = handle.send(ColorCommand::new(4, 5, 6)).await;
    assert_eq!(late.outcome, Outcome::Failed("dispatcher stopped".to_string()));
    assert!(handle.status().await.is_none());
    assert_eq!(device.written_text(), "1,2,3\n");
}

#[tokio::test]
async fn queued_sends_finish_before_shutdown() {
    let device = FakeDevice::new();
    let mut config = fast_config();
    // Keep the worker busy on the first connect while the rest queue up
    config.settle_delay = Duration::from_millis(30);
    let handle = start_dispatcher(Dispatcher::new(device.session(config)));

    let mut tasks = Vec::new();
    for i in 0..8u8 {
        let handle = handle.clone();
        tasks.push(tokio::spawn(async move {
            handle.send(ColorCommand::new(i, i, i)).await
        }));
    }
    // Current-thread runtime: let every spawned task enqueue its send
    for _ in 0..4 {
        tokio::task::yield_now().await;
    }
    handle.shutdown().await;
    assert_eq!(device.open_handles(), 0);

    for task in tasks {
        assert_eq!(task.await.unwrap().outcome, Outcome::Sent);
    }
    let written = device.written_text();
    for i in 0..8u8 {
        assert!(
            written.contains(&format!("{},{},{}\n", i, i, i)),
            "missing frame {} in {:?}",
            i,
            written
        );
    }
    assert_eq!(written.lines().count(), 8);
}

#[tokio::test]
async fn dropping_all_handles_closes_session() {
    let device = FakeDevice::new();
    let handle = start_dispatcher(Dispatcher::new(device.session(fast_config())));
    handle.send(ColorCommand::new(1, 2, 3)).await;
    drop(handle);

    let released = tokio::time::timeout(Duration::from_secs(1), async {
        while device.open_handles() > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(released.is_ok(), "worker should release the port");
}

mod common;

use colorlink::color::ColorCommand;
use colorlink::device::LinkState;
use colorlink::dispatch::{Dispatcher, Outcome};

use common::{fast_config, FakeDevice};

fn dispatcher_for(device: &FakeDevice) -> Dispatcher {
    Dispatcher::new(device.session(fast_config()))
}

#[tokio::test]
async fn disconnected_send_connects_first() {
    let device = FakeDevice::new();
    device.reply_with(b"OK\n");
    let mut dispatcher = dispatcher_for(&device);

    let result = dispatcher.dispatch(ColorCommand::new(255, 0, 64)).await;
    assert_eq!(result.outcome, Outcome::Sent);
    assert_eq!(result.responses, vec!["OK"]);
    assert_eq!(device.opens(), 1);
    assert_eq!(device.written_text(), "255,0,64\n");
    assert_eq!(dispatcher.session().state(), LinkState::Connected);
}

#[tokio::test]
async fn failed_connect_means_no_write() {
    let device = FakeDevice::new();
    device.fail_next_opens(5);
    let mut dispatcher = dispatcher_for(&device);

    let result = dispatcher.dispatch(ColorCommand::new(1, 2, 3)).await;
    match &result.outcome {
        Outcome::Failed(reason) => assert!(reason.starts_with("connect failed"), "{}", reason),
        other => panic!("expected failure, got {:?}", other),
    }
    assert!(result.responses.is_empty());
    assert_eq!(device.opens(), 1, "exactly one connection attempt");
    assert_eq!(device.write_calls(), 0);
    assert_eq!(dispatcher.session().state(), LinkState::Disconnected);
}

#[tokio::test]
async fn established_link_is_reused() {
    let device = FakeDevice::new();
    let mut dispatcher = dispatcher_for(&device);
    dispatcher.connect_at_startup().await.unwrap();

    for i in 0..3u8 {
        let result = dispatcher.dispatch(ColorCommand::new(i, i, i)).await;
        assert_eq!(result.outcome, Outcome::Sent);
    }
    assert_eq!(device.opens(), 1);
    assert_eq!(device.written_text(), "0,0,0\n1,1,1\n2,2,2\n");
}

#[tokio::test]
async fn write_failure_recovers_with_one_reconnect() {
    let device = FakeDevice::new();
    let mut dispatcher = dispatcher_for(&device);
    dispatcher.connect_at_startup().await.unwrap();
    device.fail_next_writes(1);
    device.reply_with(b"OK 10,20,30\n");

    let result = dispatcher.dispatch(ColorCommand::new(10, 20, 30)).await;
    assert_eq!(result.outcome, Outcome::SentAfterReconnect);
    assert_eq!(result.responses, vec!["OK 10,20,30"]);
    assert_eq!(device.opens(), 2);
    assert_eq!(device.failed_writes(), 1);
    assert_eq!(device.open_handles(), 1);
    assert_eq!(device.written_text(), "10,20,30\n");
    assert_eq!(dispatcher.session().state(), LinkState::Connected);
}

#[tokio::test]
async fn second_write_failure_gives_up() {
    let device = FakeDevice::new();
    let mut dispatcher = dispatcher_for(&device);
    dispatcher.connect_at_startup().await.unwrap();
    device.fail_next_writes(2);

    let result = dispatcher.dispatch(ColorCommand::new(10, 20, 30)).await;
    match &result.outcome {
        Outcome::Failed(reason) => {
            assert!(reason.contains("retry after reconnect failed"), "{}", reason)
        }
        other => panic!("expected failure, got {:?}", other),
    }
    assert_eq!(device.opens(), 2, "no second reconnect cycle");
    assert_eq!(device.failed_writes(), 2);
    assert_eq!(dispatcher.session().state(), LinkState::Degraded);
}

#[tokio::test]
async fn reconnect_failure_gives_up() {
    let device = FakeDevice::new();
    let mut dispatcher = dispatcher_for(&device);
    dispatcher.connect_at_startup().await.unwrap();
    device.fail_next_writes(1);
    device.fail_next_opens(1);

    let result = dispatcher.dispatch(ColorCommand::new(7, 7, 7)).await;
    match &result.outcome {
        Outcome::Failed(reason) => assert!(reason.contains("reconnect failed"), "{}", reason),
        other => panic!("expected failure, got {:?}", other),
    }
    assert_eq!(device.failed_writes(), 1);
    assert_eq!(dispatcher.session().state(), LinkState::Disconnected);

    // The next send starts from scratch and succeeds
    let result = dispatcher.dispatch(ColorCommand::new(7, 7, 7)).await;
    assert_eq!(result.outcome, Outcome::Sent);
    assert_eq!(device.opens(), 3);
}

#[tokio::test]
async fn responses_skipped_when_capture_disabled() {
    let device = FakeDevice::new();
    device.reply_with(b"OK\n");
    let mut config = fast_config();
    config.capture_responses = false;
    let mut dispatcher = Dispatcher::new(device.session(config));

    let result = dispatcher.dispatch(ColorCommand::new(1, 1, 1)).await;
    assert_eq!(result.outcome, Outcome::Sent);
    assert!(result.responses.is_empty());
}

#[tokio::test]
async fn stats_track_every_outcome() {
    let device = FakeDevice::new();
    let mut dispatcher = dispatcher_for(&device);

    device.reply_with(b"OK\n");
    dispatcher.dispatch(ColorCommand::new(1, 1, 1)).await;
    device.fail_next_writes(1);
    dispatcher.dispatch(ColorCommand::new(2, 2, 2)).await;
    device.fail_next_writes(2);
    dispatcher.dispatch(ColorCommand::new(3, 3, 3)).await;

    let stats = dispatcher.stats();
    assert_eq!(stats.sent, 1);
    assert_eq!(stats.sent_after_reconnect, 1);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.responses, 1);

    let status = dispatcher.status();
    assert_eq!(status.port, "/dev/ttyFAKE0");
    assert_eq!(&status.stats, stats);
}

#[tokio::test]
async fn degraded_link_is_reconnected_before_next_write() {
    let device = FakeDevice::new();
    let mut dispatcher = dispatcher_for(&device);

    // The reply read fails, leaving the handle degraded
    device.reply_with(b"OK first\n");
    device.fail_next_reads(1);
    let result = dispatcher.dispatch(ColorCommand::new(1, 1, 1)).await;
    assert_eq!(result.outcome, Outcome::Sent);
    assert!(result.responses.is_empty());
    assert_eq!(dispatcher.session().state(), LinkState::Degraded);
    assert_eq!(device.opens(), 1);

    device.reply_with(b"OK second\n");
    let result = dispatcher.dispatch(ColorCommand::new(2, 2, 2)).await;
    assert_eq!(result.outcome, Outcome::SentAfterReconnect);
    assert_eq!(result.responses, vec!["OK second"]);
    assert_eq!(device.opens(), 2);
    assert_eq!(device.open_handles(), 1);
    assert_eq!(dispatcher.session().state(), LinkState::Connected);
    assert_eq!(device.written_text(), "1,1,1\n2,2,2\n");
}

#[tokio::test]
async fn repeated_read_errors_do_not_pin_the_link_degraded() {
    let device = FakeDevice::new();
    let mut dispatcher = dispatcher_for(&device);

    for i in 0..3u8 {
        device.reply_with(b"OK\n");
        device.fail_next_reads(1);
        let result = dispatcher.dispatch(ColorCommand::new(i, i, i)).await;
        assert!(result.is_success());
        assert_eq!(dispatcher.session().state(), LinkState::Degraded);
    }
    assert_eq!(device.opens(), 3, "one reconnect per send after the first");

    device.reply_with(b"OK\n");
    let result = dispatcher.dispatch(ColorCommand::new(9, 9, 9)).await;
    assert_eq!(result.responses, vec!["OK"]);
    assert_eq!(dispatcher.session().state(), LinkState::Connected);
}

#[tokio::test]
async fn degraded_reconnect_is_the_only_recovery_cycle() {
    let device = FakeDevice::new();
    let mut dispatcher = dispatcher_for(&device);
    device.reply_with(b"OK\n");
    device.fail_next_reads(1);
    dispatcher.dispatch(ColorCommand::new(1, 1, 1)).await;
    assert_eq!(dispatcher.session().state(), LinkState::Degraded);

    // Reconnect succeeds but the write on the fresh handle fails: no second cycle
    device.fail_next_writes(1);
    let result = dispatcher.dispatch(ColorCommand::new(2, 2, 2)).await;
    match &result.outcome {
        Outcome::Failed(reason) => {
            assert!(reason.starts_with("write after reconnect failed"), "{}", reason)
        }
        other => panic!("expected failure, got {:?}", other),
    }
    assert_eq!(device.opens(), 2);
    assert_eq!(device.failed_writes(), 1);

    // Degraded reconnect that cannot open the port
    device.fail_next_opens(1);
    let result = dispatcher.dispatch(ColorCommand::new(3, 3, 3)).await;
    match &result.outcome {
        Outcome::Failed(reason) => assert!(reason.starts_with("reconnect failed"), "{}", reason),
        other => panic!("expected failure, got {:?}", other),
    }
    assert_eq!(device.opens(), 3);
    assert_eq!(dispatcher.session().state(), LinkState::Disconnected);
}

#[test]
fn outcome_serializes_with_reason() {
    let failed = serde_json::to_value(Outcome::Failed("connect failed: gone".into())).unwrap();
    assert_eq!(
        failed,
        serde_json::json!({"status": "failed", "reason": "connect failed: gone"})
    );
    let sent = serde_json::to_value(Outcome::SentAfterReconnect).unwrap();
    assert_eq!(sent, serde_json::json!({"status": "sent_after_reconnect"}));
}

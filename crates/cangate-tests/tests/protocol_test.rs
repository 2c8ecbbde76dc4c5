//! Wire protocol tests over real TCP with the mock scheduler
//!
//! Run with: cargo test -p cangate-tests --test protocol_test

use std::time::Duration;

use cangate_can::{BcmDelivery, BcmFlags, BcmOpcode, MockScheduler, CAN_EFF_FLAG};
use cangate_proto::{InboundFrame, CAN_ERR_FLAG};
use cangate_tests::{GatewayHarness, WAIT};
use pretty_assertions::assert_eq;

// =============================================================================
// Handshake
// =============================================================================

#[tokio::test]
async fn test_greeting_then_unknown_bus_refused() {
    let scheduler = MockScheduler::new();
    let gateway = GatewayHarness::mock(&["can0"], &scheduler);
    let mut client = gateway.connect().await;

    client.open("can1").await;
    assert_eq!(client.read_to_close().await, b"<error could not open bus>");
    assert_eq!(scheduler.open_endpoints(), 0);
}

#[tokio::test]
async fn test_open_is_silent() {
    let scheduler = MockScheduler::new();
    let gateway = GatewayHarness::mock(&["can0"], &scheduler);
    let mut client = gateway.connect().await;

    client.open("can0").await;
    assert_eq!(client.try_message(Duration::from_millis(100)).await, None);
    assert_eq!(scheduler.open_endpoints(), 1);
}

#[tokio::test]
async fn test_open_split_across_writes() {
    let scheduler = MockScheduler::new();
    let gateway = GatewayHarness::mock(&["can0"], &scheduler);
    let mut client = gateway.connect().await;

    client.expect(b"<hi>").await;
    client.send("garbage<op").await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    client.send("en can0>< can0 S 1 0 >").await;

    assert!(scheduler.wait_for_dispatches(1, WAIT).await);
}

// =============================================================================
// Bridge commands
// =============================================================================

#[tokio::test]
async fn test_send_frame_looped_back() {
    let scheduler = MockScheduler::new();
    let gateway = GatewayHarness::mock(&["can0"], &scheduler);
    let mut client = gateway.connect().await;

    client.open("can0").await;
    client.send("< can0 F 0 0 123 >").await;
    client.send("< can0 S 123 2 AA BB >").await;

    assert_eq!(client.message().await, "< can0 f 123 2 AA BB >");
}

#[tokio::test]
async fn test_traffic_reaches_other_client() {
    let scheduler = MockScheduler::new();
    let gateway = GatewayHarness::mock(&["can0", "vcan0"], &scheduler);
    let mut listener = gateway.connect().await;
    let mut sender = gateway.connect().await;

    listener.open("vcan0").await;
    listener.send("< vcan0 F 0 0 7FF >").await;
    assert!(scheduler.wait_for_dispatches(1, WAIT).await);

    sender.open("vcan0").await;
    sender.send("< vcan0 S 7FF 8 01 02 03 04 05 06 07 08 >").await;

    assert_eq!(
        listener.message().await,
        "< vcan0 f 7FF 8 01 02 03 04 05 06 07 08 >"
    );
    assert_eq!(sender.try_message(Duration::from_millis(50)).await, None);
}

#[tokio::test]
async fn test_cyclic_job_add_then_delete() {
    let scheduler = MockScheduler::new();
    let gateway = GatewayHarness::mock(&["can0"], &scheduler);
    let mut client = gateway.connect().await;

    client.open("can0").await;
    client.send("< can0 A 1 0 200 1 FF >").await;
    assert!(scheduler.wait_for_dispatches(1, WAIT).await);
    assert!(scheduler.active_jobs().contains(&(1, 0x200)));

    client.send("< can0 D 200 >").await;
    assert!(scheduler.wait_for_dispatches(2, WAIT).await);

    let dispatched = scheduler.dispatched();
    assert_eq!(dispatched[0].op.opcode, BcmOpcode::TxSetup);
    assert_eq!(
        dispatched[0].op.flags,
        BcmFlags::SET_TIMER | BcmFlags::START_TIMER
    );
    assert_eq!(dispatched[0].op.interval.secs, 1);
    assert_eq!(dispatched[1].op.opcode, BcmOpcode::TxDelete);
    assert_eq!(dispatched[1].op.can_id, 0x200);
    assert!(scheduler.active_jobs().is_empty());
}

#[tokio::test]
async fn test_update_keeps_timer() {
    let scheduler = MockScheduler::new();
    let gateway = GatewayHarness::mock(&["can0"], &scheduler);
    let mut client = gateway.connect().await;

    client.open("can0").await;
    client.send("< can0 A 0 100000 300 1 00 >< can0 U 300 2 12 34 >").await;
    assert!(scheduler.wait_for_dispatches(2, WAIT).await);

    let update = scheduler.dispatched()[1].op;
    assert_eq!(update.opcode, BcmOpcode::TxSetup);
    assert_eq!(update.flags, BcmFlags::NONE);
    assert_eq!(update.dlc, 2);
    assert_eq!(&update.data[..2], &[0x12, 0x34]);
}

#[tokio::test]
async fn test_receive_filter_timeout_reported() {
    let scheduler = MockScheduler::new();
    let gateway = GatewayHarness::mock(&["can0"], &scheduler);
    let mut client = gateway.connect().await;

    client.open("can0").await;
    client.send("< can0 R 0 500000 321 1 FF >").await;
    assert!(scheduler.wait_for_dispatches(1, WAIT).await);
    let op = scheduler.dispatched()[0].op;
    assert_eq!(op.opcode, BcmOpcode::RxSetup);
    assert_eq!(op.flags, BcmFlags::SET_TIMER);
    assert_eq!(op.interval.usecs, 500_000);

    scheduler.inject_raw(BcmDelivery {
        ifindex: 1,
        opcode: BcmOpcode::RxTimeout,
        can_id: 0x321,
        frame: None,
    });
    assert_eq!(client.message().await, "< can0 f 321 0 >");
}

#[tokio::test]
async fn test_wildcard_standard_filter() {
    let scheduler = MockScheduler::new();
    let gateway = GatewayHarness::mock(&["can0"], &scheduler);
    let mut client = gateway.connect().await;

    client.open("can0").await;
    client.send("< can0 F 0 0 FFFFFFFE >").await;
    assert!(scheduler.wait_for_dispatches(2048, WAIT).await);
    tokio::time::sleep(Duration::from_millis(50)).await;

    let dispatched = scheduler.dispatched();
    assert_eq!(dispatched.len(), 2048);
    let ids: Vec<u32> = dispatched.iter().map(|d| d.op.can_id).collect();
    assert_eq!(ids, (0..=0x7FF).collect::<Vec<u32>>());
    assert!(dispatched.iter().all(|d| d.op.opcode == BcmOpcode::RxSetup
        && d.op.flags.contains(BcmFlags::RX_FILTER_ID)));

    // Any standard id now reaches the client
    scheduler.inject(1, InboundFrame::new(0x7AB, 1, [0x55, 0, 0, 0, 0, 0, 0, 0]));
    assert_eq!(client.message().await, "< can0 f 7AB 1 55 >");
}

#[tokio::test]
async fn test_extended_sweep_does_not_block_client() {
    let scheduler = MockScheduler::new();
    let gateway = GatewayHarness::mock(&["can0"], &scheduler);
    let mut client = gateway.connect().await;

    client.open("can0").await;
    client.send("< can0 F 0 0 FFFFFFFF >").await;
    assert!(scheduler.wait_for_dispatches(1, WAIT).await);

    // Filters are installed in id order, so low extended ids are live early
    let eff = CAN_EFF_FLAG | 0x10;
    scheduler.inject(1, InboundFrame::new(eff, 0, [0; 8]));
    assert_eq!(client.message().await, "< can0 f 80000010 0 >");

    client.send("< can0 E 0 >").await;
    drop(client);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(scheduler.open_endpoints(), 0);
}

// =============================================================================
// Error handling
// =============================================================================

#[tokio::test]
async fn test_dlc_mismatch_sends_nothing() {
    let scheduler = MockScheduler::new();
    let gateway = GatewayHarness::mock(&["can0"], &scheduler);
    let mut client = gateway.connect().await;

    client.open("can0").await;
    client.send("< can0 S 123 3 AA BB >").await;
    client.send("< can0 S 123 9 01 02 03 04 05 06 07 08 09 >").await;
    client.send("< can0 S 124 0 >").await;

    assert!(scheduler.wait_for_dispatches(1, WAIT).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    let dispatched = scheduler.dispatched();
    assert_eq!(dispatched.len(), 1);
    assert_eq!(dispatched[0].op.can_id, 0x124);
}

#[tokio::test]
async fn test_bad_error_frame_not_forwarded() {
    let scheduler = MockScheduler::new();
    let gateway = GatewayHarness::mock(&["can0"], &scheduler);
    let mut client = gateway.connect().await;

    client.open("can0").await;
    client.send("< can0 F 0 0 1 >").await;
    assert!(scheduler.wait_for_dispatches(1, WAIT).await);

    let id = CAN_ERR_FLAG | 0x40;
    scheduler.inject_raw(BcmDelivery {
        ifindex: 1,
        opcode: BcmOpcode::RxChanged,
        can_id: id,
        frame: Some(InboundFrame::new(id, 4, [0; 8])),
    });
    scheduler.inject(1, InboundFrame::new(0x1, 0, [0; 8]));

    assert_eq!(client.message().await, "< can0 f 001 0 >");
}

#[tokio::test]
async fn test_overlong_frame_resets_parser() {
    let scheduler = MockScheduler::new();
    let gateway = GatewayHarness::mock(&["can0"], &scheduler);
    let mut client = gateway.connect().await;

    client.open("can0").await;
    let junk = format!("< can0 S 1 1 {}", "FF ".repeat(2000));
    client.send(&junk).await;
    client.send("< can0 S 2 0 >").await;

    assert!(scheduler.wait_for_dispatches(1, WAIT).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    let dispatched = scheduler.dispatched();
    assert_eq!(dispatched.len(), 1);
    assert_eq!(dispatched[0].op.can_id, 2);
}

#[tokio::test]
async fn test_unauthorized_bus_in_bridge_mode_ignored() {
    let scheduler = MockScheduler::new();
    let gateway = GatewayHarness::mock(&["can0"], &scheduler);
    let mut client = gateway.connect().await;

    client.open("can0").await;
    client.send("< can1 S 1 0 >< can0 S 2 0 >").await;

    assert!(scheduler.wait_for_dispatches(1, WAIT).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(scheduler.dispatch_count(), 1);
}

#[tokio::test]
async fn test_endpoint_unavailable_closes_only_that_client() {
    let scheduler = MockScheduler::new();
    let gateway = GatewayHarness::mock(&["can0"], &scheduler);

    scheduler.set_fail_open(true);
    let mut failing = gateway.connect().await;
    failing.open("can0").await;
    assert_eq!(failing.read_to_close().await, b"");

    scheduler.set_fail_open(false);
    let mut working = gateway.connect().await;
    working.open("can0").await;
    working.send("< can0 S 5 0 >").await;
    assert!(scheduler.wait_for_dispatches(1, WAIT).await);
}

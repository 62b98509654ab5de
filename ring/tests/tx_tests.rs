//! Transmit queue tests

mod common;

use std::thread;

use common::{counting_pool, payload, pool, small_config, SimPort};
use cpumac_ring::desc::CompletionStatus;
use cpumac_ring::tx::MAX_TX_FRAME;
use cpumac_ring::{PollOutcome, SharedTxQueue, TxError, TxQueue};

#[test]
fn test_transmit_posts_frame_bytes() {
    let port = SimPort::new();
    let mut tx = TxQueue::open(small_config(8), port.clone(), pool(16)).unwrap();
    assert!(port.enabled());
    assert!(port.armed());

    tx.transmit(&payload(7, 60)).unwrap();
    assert_eq!(port.in_flight(), 1);
    assert_eq!(port.peek_tx(), Some(payload(7, 60)));

    port.complete_tx(1);
    let report = tx.clean(16);
    assert_eq!(report.completed, 1);
    assert_eq!(report.outcome, PollOutcome::Exhausted);
    assert_eq!(tx.stats().packets, 1);
    assert_eq!(tx.stats().bytes, 60);
    assert_eq!(tx.pool().live_pages(), 0);
}

#[test]
fn test_full_ring_stops_queue() {
    let port = SimPort::new();
    let mut tx = TxQueue::open(small_config(8), port.clone(), pool(16)).unwrap();

    for i in 0..7u8 {
        tx.transmit(&payload(i, 64)).unwrap();
    }
    assert!(tx.is_stopped());
    assert!(!tx.can_transmit());
    assert_eq!(tx.transmit(&payload(9, 64)), Err(TxError::QueueFull));
    assert_eq!(tx.stats().busy, 1);
    assert_eq!(port.in_flight(), 7);

    // One free slot is below the wake threshold of a quarter ring.
    port.complete_tx(1);
    tx.clean(1);
    assert!(tx.is_stopped());
    assert_eq!(tx.transmit(&payload(9, 64)), Err(TxError::QueueFull));

    port.complete_tx(1);
    tx.clean(16);
    assert!(!tx.is_stopped());
    tx.transmit(&payload(9, 64)).unwrap();
}

#[test]
fn test_clean_respects_budget() {
    let port = SimPort::new();
    let mut tx = TxQueue::open(small_config(8), port.clone(), pool(16)).unwrap();
    for i in 0..5u8 {
        tx.transmit(&payload(i, 64)).unwrap();
    }
    port.complete_tx(5);
    tx.on_interrupt();

    let report = tx.clean(3);
    assert_eq!(report.completed, 3);
    assert_eq!(report.outcome, PollOutcome::BudgetReached);
    assert!(!port.armed());

    let report = tx.clean(3);
    assert_eq!(report.completed, 2);
    assert!(report.rearm());
    assert!(port.armed());
}

#[test]
fn test_error_completion_is_counted() {
    let port = SimPort::new();
    let mut tx = TxQueue::open(small_config(8), port.clone(), pool(16)).unwrap();
    tx.transmit(&payload(0, 64)).unwrap();
    tx.transmit(&payload(1, 64)).unwrap();

    port.fail_tx(CompletionStatus::FRAME_ERR);
    port.complete_tx(1);
    assert_eq!(tx.clean(8).completed, 2);

    let stats = tx.stats();
    assert_eq!(stats.errors, 1);
    assert_eq!(stats.packets, 1);
    assert_eq!(tx.pool().live_pages(), 0);
}

#[test]
fn test_rejects_bad_frames() {
    let port = SimPort::new();
    let mut tx = TxQueue::open(small_config(8), port.clone(), pool(16)).unwrap();
    assert_eq!(tx.transmit(&[]), Err(TxError::EmptyFrame));
    assert_eq!(
        tx.transmit(&vec![0u8; MAX_TX_FRAME + 1]),
        Err(TxError::FrameTooLarge)
    );
    assert!(tx.transmit(&vec![0u8; MAX_TX_FRAME]).is_ok());
    assert_eq!(port.in_flight(), 1);
}

#[test]
fn test_no_buffer_when_pool_exhausted() {
    let port = SimPort::new();
    let mut tx = TxQueue::open(small_config(8), port.clone(), pool(2)).unwrap();
    tx.transmit(&payload(0, 64)).unwrap();
    tx.transmit(&payload(1, 64)).unwrap();
    assert_eq!(tx.transmit(&payload(2, 64)), Err(TxError::NoBuffer));
    assert_eq!(tx.stats().alloc_failed, 1);
    assert!(!tx.is_stopped());
}

#[test]
fn test_close_unmaps_in_flight_frames() {
    let port = SimPort::new();
    let (mapper, pool) = counting_pool(16);
    let mut tx = TxQueue::open(small_config(8), port.clone(), pool).unwrap();
    for i in 0..3u8 {
        tx.transmit(&payload(i, 64)).unwrap();
    }
    assert_eq!(mapper.live(), 3);

    tx.close().unwrap();
    assert_eq!(mapper.live(), 0);
    assert!(!port.enabled());
}

#[test]
fn test_drop_stops_engine_before_freeing() {
    let port = SimPort::new();
    let (mapper, pool) = counting_pool(16);
    let mut tx = TxQueue::open(small_config(8), port.clone(), pool).unwrap();
    tx.transmit(&payload(0, 64)).unwrap();
    assert_eq!(mapper.live(), 1);

    drop(tx);
    assert!(!port.enabled());
    assert!(!port.armed());
    assert_eq!(mapper.live(), 0);
}

#[test]
fn test_shutdown_refuses_later_transmits() {
    let port = SimPort::new();
    let shared = SharedTxQueue::new(TxQueue::open(small_config(8), port.clone(), pool(16)).unwrap());
    shared.transmit(&payload(0, 64)).unwrap();

    let other = shared.clone();
    other.shutdown().unwrap();
    assert_eq!(shared.transmit(&payload(1, 64)), Err(TxError::DeviceNotReady));
    assert_eq!(shared.with(|q| q.pool().live_pages()), 0);
}

#[test]
fn test_shared_queue_producer_and_cleaner() {
    const FRAMES: usize = 200;

    let port = SimPort::new();
    let shared = SharedTxQueue::new(TxQueue::open(small_config(16), port.clone(), pool(32)).unwrap());

    let producer = {
        let queue = shared.clone();
        thread::spawn(move || {
            let mut sent = 0;
            while sent < FRAMES {
                match queue.transmit(&payload(sent as u8, 128)) {
                    Ok(()) => sent += 1,
                    Err(TxError::QueueFull) | Err(TxError::NoBuffer) => thread::yield_now(),
                    Err(err) => panic!("unexpected transmit error: {}", err),
                }
            }
        })
    };

    let cleaner = {
        let queue = shared.clone();
        let device = port.clone();
        thread::spawn(move || {
            let mut cleaned = 0;
            while cleaned < FRAMES {
                device.complete_tx(4);
                cleaned += queue.clean(8).completed;
                thread::yield_now();
            }
        })
    };

    producer.join().unwrap();
    cleaner.join().unwrap();

    let stats = shared.stats();
    assert_eq!(stats.packets, FRAMES as u64);
    assert_eq!(stats.bytes, FRAMES as u64 * 128);
    assert_eq!(stats.errors, 0);
    assert_eq!(port.in_flight(), 0);
    assert!(!shared.is_stopped());
}

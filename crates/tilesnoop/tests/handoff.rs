//! Lookup results crossing from the pipeline to an async consumer.

mod common;

use common::{load, payload, pipeline, write_block};
use tilesnoop::handoff;
use tilesnoop::{fingerprint, SnoopError};

#[tokio::test]
async fn test_consumer_receives_match() {
    let tile = [0x5Au8; 16];
    let fp = fingerprint(&tile);
    let (publisher, mut subscriber) = handoff::channel();

    let mut p = pipeline();
    let bucket = p.index().bucket_of(fp);
    let chain = p.config().dictionary.chain_depth;
    load(&mut p, fp, bucket * chain, payload(0x30, 0x0A00));
    let mut p = p.with_publisher(publisher);

    let consumer = tokio::spawn(async move { subscriber.next().await });
    write_block(&mut p, 0, &tile);
    p.drain(64);

    let received = consumer.await.unwrap().unwrap();
    assert_eq!(received.missed, 0);
    assert_eq!(received.delivery.seq, 1);
    assert_eq!(received.delivery.tick, 37);
    assert!(received.delivery.result.match_found);
    assert_eq!(received.delivery.result.character_code, 0x30);
    assert_eq!(received.delivery.result.translation_pointer, 0x0A00);
}

#[tokio::test]
async fn test_slow_consumer_sees_latest_and_missed_count() {
    let (publisher, mut subscriber) = handoff::channel();
    let mut p = pipeline().with_publisher(publisher);

    // Three lookups complete before the consumer looks
    for block in 0..3u32 {
        write_block(&mut p, block, &[block as u8; 16]);
        p.drain(64);
    }

    let received = subscriber.next().await.unwrap();
    assert_eq!(received.delivery.seq, 3);
    assert_eq!(received.missed, 2);
    assert!(!received.delivery.result.match_found);
    assert!(subscriber.poll().is_none());
}

#[tokio::test]
async fn test_consumer_sees_close_when_pipeline_dropped() {
    let (publisher, mut subscriber) = handoff::channel();
    let mut p = pipeline().with_publisher(publisher);
    write_block(&mut p, 0, &[0u8; 16]);
    p.drain(64);
    drop(p);

    assert!(subscriber.next().await.is_ok());
    assert!(matches!(
        subscriber.next().await,
        Err(SnoopError::HandoffClosed)
    ));
}

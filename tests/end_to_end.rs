//! Full sessions over loopback TCP: server, producer pool and both client
//! strategies.

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use jetline::buffer::JsonBuffer;
use jetline::client::{BufferingClient, ClientOptions, QueueingClient};
use jetline::producer::ProducerOptions;
use jetline::queue::JsonQueue;
use jetline::server::RepeatOptions;

fn client_options(port: u16) -> ClientOptions {
    ClientOptions {
        port,
        ..Default::default()
    }
}

#[test]
fn queueing_session_receives_one_record() {
    let prod_opts = ProducerOptions {
        num_jsons: 1,
        ..Default::default()
    };
    let (port, server) = common::spawn_server(prod_opts, RepeatOptions::default());

    let queue = Arc::new(JsonQueue::new());
    let mut client =
        QueueingClient::connect(&client_options(port), Arc::clone(&queue)).expect("connect failed");
    client.receive_jsons(None).expect("receive failed");
    client.close().expect("close failed");

    let metrics = server
        .join()
        .expect("server thread panicked")
        .expect("server failed");
    assert_eq!(metrics.num_messages, 1);

    assert_eq!(client.jsons_received(), 1);
    let item = queue.pop().expect("queue should hold one item");
    assert!(queue.pop().is_none());
    assert_eq!(item.seq, 0);
    let value: serde_json::Value =
        serde_json::from_str(&item.json).expect("body should be valid JSON");
    assert!(value["test"].is_u64());
    assert_eq!(value.as_object().unwrap().len(), 1);
}

#[test]
fn buffering_session_receives_one_record() {
    let prod_opts = ProducerOptions {
        num_jsons: 1,
        ..Default::default()
    };
    let (port, server) = common::spawn_server(prod_opts, RepeatOptions::default());

    let buffers = vec![Arc::new(Mutex::new(
        JsonBuffer::with_capacity(16 * 1024 * 1024).unwrap(),
    ))];
    let consumer_buffers = buffers.clone();
    let stop = Arc::new(AtomicBool::new(false));
    let consumer_stop = Arc::clone(&stop);
    let consumer = thread::spawn(move || {
        let mut drained: u64 = 0;
        loop {
            let mut any = false;
            for slot in &consumer_buffers {
                let Ok(mut buf) = slot.try_lock() else { continue };
                if buf.is_empty() {
                    continue;
                }
                assert_eq!(buf.num_jsons(), 1);
                assert!(buf.contents().ends_with(b"\n"));
                assert!(buf.recv_time().is_some());
                drained += buf.num_jsons();
                buf.reset();
                any = true;
            }
            if !any {
                if consumer_stop.load(Ordering::Relaxed) {
                    break;
                }
                thread::sleep(Duration::from_micros(100));
            }
        }
        drained
    });

    let mut client =
        BufferingClient::connect(&client_options(port), buffers).expect("connect failed");
    client.receive_jsons(None).expect("receive failed");
    client.close().expect("close failed");
    stop.store(true, Ordering::Relaxed);
    let drained = consumer.join().expect("consumer panicked");

    server
        .join()
        .expect("server thread panicked")
        .expect("server failed");
    assert_eq!(client.jsons_received(), 1);
    assert_eq!(drained, 1);
}

#[test]
fn batched_multithreaded_session_counts_every_record() {
    let prod_opts = ProducerOptions {
        num_jsons: 4,
        batching: true,
        num_batches: 6,
        num_threads: 2,
        ..Default::default()
    };
    let total = prod_opts.total_jsons();
    let (port, server) = common::spawn_server(prod_opts, RepeatOptions::default());

    let queue = Arc::new(JsonQueue::new());
    let mut client =
        QueueingClient::connect(&client_options(port), Arc::clone(&queue)).expect("connect failed");
    client.receive_jsons(None).expect("receive failed");
    client.close().expect("close failed");

    let metrics = server
        .join()
        .expect("server thread panicked")
        .expect("server failed");
    assert_eq!(metrics.num_messages, total);
    assert_eq!(metrics.producer.num_jsons, total);
    assert_eq!(metrics.producer.num_batches, 6);
    assert_eq!(metrics.num_bytes, client.bytes_received());

    assert_eq!(client.jsons_received(), total);
    // Wire order is queue order; sequence numbers must be consecutive.
    let mut expected_seq = 0;
    while let Some(item) = queue.pop() {
        assert_eq!(item.seq, expected_seq);
        assert!(serde_json::from_str::<serde_json::Value>(&item.json).is_ok());
        expected_seq += 1;
    }
    assert_eq!(expected_seq, total);
}

#[test]
fn repeated_sessions_accumulate_and_reseed() {
    let prod_opts = ProducerOptions {
        num_jsons: 5,
        ..Default::default()
    };
    let repeat_opts = RepeatOptions {
        times: 3,
        interval_ms: 10,
    };
    let (port, server) = common::spawn_server(prod_opts, repeat_opts);

    let queue = Arc::new(JsonQueue::new());
    let mut client =
        QueueingClient::connect(&client_options(port), Arc::clone(&queue)).expect("connect failed");
    client.receive_jsons(None).expect("receive failed");
    client.close().expect("close failed");

    let metrics = server
        .join()
        .expect("server thread panicked")
        .expect("server failed");
    assert_eq!(metrics.num_messages, 15);
    assert_eq!(client.jsons_received(), 15);

    // Sequence numbers keep counting across repetitions.
    let items: Vec<_> = std::iter::from_fn(|| queue.pop()).collect();
    assert_eq!(items.len(), 15);
    for (i, item) in items.iter().enumerate() {
        assert_eq!(item.seq, i as u64);
    }
    // Reseeded repetitions produce different bytes.
    let first: Vec<&str> = items[..5].iter().map(|i| i.json.as_str()).collect();
    let second: Vec<&str> = items[5..10].iter().map(|i| i.json.as_str()).collect();
    assert_ne!(first, second);
}

#[test]
fn starting_sequence_number_is_honoured() {
    let prod_opts = ProducerOptions {
        num_jsons: 3,
        ..Default::default()
    };
    let (port, server) = common::spawn_server(prod_opts, RepeatOptions::default());

    let queue = Arc::new(JsonQueue::new());
    let options = ClientOptions {
        port,
        seq: 100,
        ..Default::default()
    };
    let mut client = QueueingClient::connect(&options, Arc::clone(&queue)).expect("connect failed");
    client.receive_jsons(None).expect("receive failed");
    client.close().expect("close failed");
    server.join().unwrap().unwrap();

    let seqs: Vec<u64> = std::iter::from_fn(|| queue.pop()).map(|i| i.seq).collect();
    assert_eq!(seqs, vec![100, 101, 102]);
}

#[test]
fn double_close_reports_an_error() {
    let prod_opts = ProducerOptions {
        num_jsons: 1,
        ..Default::default()
    };
    let (port, server) = common::spawn_server(prod_opts, RepeatOptions::default());

    let queue = Arc::new(JsonQueue::new());
    let mut client =
        QueueingClient::connect(&client_options(port), Arc::clone(&queue)).expect("connect failed");
    client.receive_jsons(None).expect("receive failed");
    assert!(client.close().is_ok());
    assert!(client.close().is_err());
    server.join().unwrap().unwrap();
}

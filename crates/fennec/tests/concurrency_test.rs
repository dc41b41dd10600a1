//! Cross-thread behavior: writes to distinct streams commute.

use fennec::{Database, Sample};
use std::thread;
use tempfile::TempDir;

const BASE_NS: i64 = 1_704_067_200_000_000_000;
const SECOND_NS: i64 = 1_000_000_000;

#[test]
fn test_parallel_streams_are_isolated() {
    let dir = TempDir::new().unwrap();
    let db = Database::open(dir.path().join("test.db")).unwrap();

    const WRITERS: i64 = 4;
    const SAMPLES: i64 = 250;

    let mut handles = Vec::new();
    for w in 0..WRITERS {
        let db = db.clone();
        handles.push(thread::spawn(move || {
            let stream = db.stream(format!("writer-{w}").as_bytes()).unwrap();
            // Many small transactions interleave freely with the other
            // writers; only the per-stream order is guaranteed.
            for i in 0..SAMPLES {
                let mut tx = stream.begin().unwrap();
                tx.add(BASE_NS + i * SECOND_NS, w * 10_000 + i).unwrap();
                tx.commit().unwrap();
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    for w in 0..WRITERS {
        let stream = db.stream(format!("writer-{w}").as_bytes()).unwrap();
        let samples: Vec<Sample> = stream
            .iter()
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();

        assert_eq!(samples.len(), SAMPLES as usize);
        for (i, sample) in samples.iter().enumerate() {
            assert_eq!(sample.time, BASE_NS + (i as i64) * SECOND_NS);
            assert_eq!(sample.value, w * 10_000 + i as i64);
        }
    }

    db.close().unwrap();
}

#[test]
fn test_shared_stream_serializes_transactions() {
    let dir = TempDir::new().unwrap();
    let db = Database::open(dir.path().join("test.db")).unwrap();
    db.stream(b"shared").unwrap();

    const WRITERS: i64 = 4;
    const PER_WRITER: i64 = 100;

    let mut handles = Vec::new();
    for w in 0..WRITERS {
        let db = db.clone();
        handles.push(thread::spawn(move || {
            let stream = db.stream(b"shared").unwrap();
            for i in 0..PER_WRITER {
                let mut tx = stream.begin().unwrap();
                tx.add(BASE_NS + (w * PER_WRITER + i) * SECOND_NS, w).unwrap();
                tx.commit().unwrap();
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    // Interleaving across writers is arbitrary, but nothing is lost or
    // duplicated.
    let stream = db.stream(b"shared").unwrap();
    let samples: Vec<Sample> = stream
        .iter()
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    assert_eq!(samples.len(), (WRITERS * PER_WRITER) as usize);

    let mut per_writer = [0i64; WRITERS as usize];
    for sample in &samples {
        per_writer[sample.value as usize] += 1;
    }
    assert!(per_writer.iter().all(|&count| count == PER_WRITER));

    db.close().unwrap();
}

#[test]
fn test_close_drains_active_transactions() {
    let dir = TempDir::new().unwrap();
    let db = Database::open(dir.path().join("test.db")).unwrap();
    let stream = db.stream(b"s1").unwrap();

    let (started_tx, started_rx) = std::sync::mpsc::channel();
    let writer = {
        let stream = stream.clone();
        thread::spawn(move || {
            let mut tx = stream.begin().unwrap();
            started_tx.send(()).unwrap();
            for i in 0..100i64 {
                tx.add(BASE_NS + i * SECOND_NS, i).unwrap();
            }
            thread::sleep(std::time::Duration::from_millis(20));
            tx.commit().unwrap();
        })
    };

    // Once the transaction holds the stream mutex, close() must wait for
    // its commit rather than abort it.
    started_rx.recv().unwrap();
    db.close().unwrap();
    writer.join().unwrap();
}

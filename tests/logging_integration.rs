use std::fs::OpenOptions;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use defrag_core::{JobKind, JobOptions, MemoryVolume, NeverTerminate, run_job};
use tempfile::tempdir;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt as tsfmt, registry};

/// Appends written bytes into a shared in-memory buffer.
#[derive(Clone)]
struct BufferWriter(Arc<Mutex<Vec<u8>>>);

impl Write for BufferWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn captured(buf: &Arc<Mutex<Vec<u8>>>) -> String {
    String::from_utf8_lossy(&buf.lock().unwrap()).to_string()
}

fn sample_volume() -> MemoryVolume {
    MemoryVolume::builder("C:", 200, 4096)
        .reserved(0, 10)
        .file("C:\\a", &[(10, 5), (50, 5)])
        .build()
}

#[test]
fn job_events_carry_structured_fields() {
    let buf = Arc::new(Mutex::new(Vec::new()));
    let make_writer = {
        let buf = buf.clone();
        move || BufferWriter(buf.clone())
    };
    let layer = tsfmt::layer()
        .event_format(tsfmt::format().json())
        .with_writer(make_writer);
    let dispatch = tracing::Dispatch::new(registry().with(EnvFilter::new("info")).with(layer));

    let mut volume = sample_volume();
    tracing::dispatcher::with_default(&dispatch, || {
        run_job(
            &mut volume,
            "C:",
            JobKind::Defragmentation,
            JobOptions::default(),
            &NeverTerminate,
            None,
        );
    });

    let contents = captured(&buf);
    let finished = contents
        .lines()
        .filter_map(|l| serde_json::from_str::<serde_json::Value>(l).ok())
        .find(|v| v["fields"]["message"] == "job finished")
        .expect("job finished event");
    assert_eq!(finished["fields"]["volume"], "C:");
    assert_eq!(finished["fields"]["status"], "succeeded");
    assert_eq!(finished["level"], "INFO");
    // per-move detail stays below info
    assert!(!contents.contains("\"file moved\""));
}

#[test]
fn file_logging_writes_through_non_blocking_appender() {
    let td = tempdir().expect("tempdir");
    let log_path = td.path().join("defrag_core_test.log");
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .expect("open log file");
    let (writer, guard) = tracing_appender::non_blocking(file);

    let file_layer = tsfmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(false)
        .compact();
    let dispatch =
        tracing::Dispatch::new(registry().with(EnvFilter::new("debug")).with(file_layer));

    let mut volume = sample_volume();
    tracing::dispatcher::with_default(&dispatch, || {
        run_job(
            &mut volume,
            "C:",
            JobKind::Analysis,
            JobOptions::default(),
            &NeverTerminate,
            None,
        );
    });

    // flush the worker
    drop(guard);

    let contents = std::fs::read_to_string(&log_path).expect("read log file");
    assert!(contents.contains("analysis of C:: started"), "contents={contents}");
    assert!(contents.contains("fragmented files list created"), "contents={contents}");
}

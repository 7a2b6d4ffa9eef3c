use crate::notify::DeclineEvent;
use std::sync::mpsc;
use std::{
    fmt::Debug,
    io::{self, BufWriter, Write},
    net::{TcpStream, ToSocketAddrs},
    thread,
    time::{Duration, Instant},
};
use tracing::{debug, info, warn};

const MAX_BATCH: usize = 64;
const MAX_BATCH_LATENCY: Duration = Duration::from_millis(500);
const RECONNECT_TIMEOUT: Duration = Duration::from_secs(3);

struct Writer {
    writer: BufWriter<TcpStream>,
}

impl Writer {
    fn connect<A: ToSocketAddrs>(addr: A) -> io::Result<Self> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        stream.set_write_timeout(Some(Duration::from_secs(2)))?;

        Ok(Self {
            writer: BufWriter::new(stream),
        })
    }

    fn send_batch(&mut self, batch: &[DeclineEvent]) -> io::Result<()> {
        for ev in batch {
            serde_json::to_writer(&mut self.writer, ev)?;
            self.writer.write_all(b"\n")?;
        }

        self.writer.flush()
    }
}

/// Start the `decline-notify` thread running [`tcp_writer`]
pub fn spawn<A>(address: A, rx: mpsc::Receiver<DeclineEvent>) -> io::Result<thread::JoinHandle<()>>
where
    A: ToSocketAddrs + Debug + Send + 'static,
{
    thread::Builder::new()
        .name("decline-notify".to_string())
        .spawn(move || tcp_writer(address, rx))
}

/// Deliver decline events to the registry as newline-delimited JSON.
///
/// Returns once every sender is gone and the last batch has been flushed.
/// While the registry is unreachable, queued events are dropped.
pub fn tcp_writer<A: ToSocketAddrs + Debug>(address: A, rx: mpsc::Receiver<DeclineEvent>) {
    let mut writer: Option<Writer> = None;
    let mut batch: Vec<DeclineEvent> = Vec::with_capacity(MAX_BATCH);
    let mut dropped: u64 = 0;
    let mut closed = false;

    info!("Starting decline writer sending to {:?}", address);
    while !closed {
        // Block for the first event
        let first = match rx.recv() {
            Ok(ev) => ev,
            Err(_) => return,
        };

        batch.clear();
        batch.push(first);

        let batch_start = Instant::now();

        while batch.len() < MAX_BATCH {
            let elapsed = batch_start.elapsed();
            if elapsed >= MAX_BATCH_LATENCY {
                break;
            }

            match rx.recv_timeout(MAX_BATCH_LATENCY - elapsed) {
                Ok(ev) => batch.push(ev),
                Err(mpsc::RecvTimeoutError::Timeout) => break,
                Err(mpsc::RecvTimeoutError::Disconnected) => {
                    closed = true;
                    break;
                }
            }
        }

        loop {
            match writer {
                None => match Writer::connect(&address) {
                    Ok(w) => writer = Some(w),
                    Err(e) => {
                        warn!(%e, "decline registry unreachable");
                        if closed {
                            dropped += batch.len() as u64;
                            break;
                        }
                        // Drain pending events to prevent unbounded memory growth
                        while rx.try_recv().is_ok() {
                            dropped += 1;
                        }
                        thread::sleep(RECONNECT_TIMEOUT);
                    }
                },
                Some(ref mut w) => match w.send_batch(&batch) {
                    Ok(()) => {
                        debug!(count = batch.len(), "delivered decline events");
                        break;
                    }
                    Err(e) => {
                        warn!(%e, "failed to deliver decline events");
                        writer = None;
                        while rx.try_recv().is_ok() {
                            dropped += 1;
                        }
                        thread::sleep(RECONNECT_TIMEOUT);
                    }
                },
            }
        }

        if dropped > 0 {
            warn!("Dropped {} decline events", dropped);
            dropped = 0;
        }
    }
}

/// Test doubles to simulate the CAN bus during integration tests.
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use korri_j1939::error::J1939Error;
use korri_j1939::protocol::j1939::{OnError, OnFrame};
use korri_j1939::protocol::transport::frame::Frame;
use korri_j1939::protocol::transport::traits::bus::Bus;
use korri_j1939::protocol::transport::traits::can_socket::CanSocket;
use tokio::sync::{mpsc, Mutex};
use tokio::time::sleep;

#[allow(dead_code)]
/// In-memory CAN socket backed by a channel pair (DUT ↔ host).
pub struct MockSocket {
    tx: mpsc::UnboundedSender<Frame>,
    rx: Mutex<mpsc::UnboundedReceiver<Frame>>,
}

#[allow(dead_code)]
impl MockSocket {
    /// Construct a pair of interconnected sockets: what one sends, the
    /// other receives.
    pub fn create_pair() -> (Self, Self) {
        let (dut_tx, host_rx) = mpsc::unbounded_channel();
        let (host_tx, dut_rx) = mpsc::unbounded_channel();

        let dut = Self { tx: dut_tx, rx: Mutex::new(dut_rx) };
        let host = Self { tx: host_tx, rx: Mutex::new(host_rx) };
        (dut, host)
    }

    /// Receive with a deadline; `None` when nothing shows up in time.
    pub async fn recv_timeout(&self, limit: Duration) -> Option<Frame> {
        tokio::time::timeout(limit, async { self.rx.lock().await.recv().await })
            .await
            .ok()
            .flatten()
    }
}

impl CanSocket for MockSocket {
    type Error = ();

    fn open(&self, _interface: &str) -> Result<(), Self::Error> {
        Ok(())
    }

    fn send(&self, frame: &Frame) -> Result<(), Self::Error> {
        self.tx.send(*frame).map_err(|_| ())
    }

    async fn recv(&self) -> Result<Frame, Self::Error> {
        self.rx.lock().await.recv().await.ok_or(())
    }
}

#[allow(dead_code)]
/// Bus double recording every frame the transport engine emits.
#[derive(Clone, Default)]
pub struct RecordingBus {
    frames: Arc<StdMutex<Vec<Frame>>>,
    source: u8,
}

#[allow(dead_code)]
impl RecordingBus {
    pub fn new(source: u8) -> Self {
        Self { frames: Arc::new(StdMutex::new(Vec::new())), source }
    }

    pub fn take(&self) -> Vec<Frame> {
        std::mem::take(&mut *self.frames.lock().unwrap())
    }
}

impl Bus for RecordingBus {
    fn send(&self, frame: &Frame) -> bool {
        self.frames.lock().unwrap().push(*frame);
        true
    }

    fn source_address(&self) -> u8 {
        self.source
    }
}

#[allow(dead_code)]
/// Collector for frames a claimer or connection wants on the bus.
pub fn frame_collector() -> (Arc<StdMutex<Vec<Frame>>>, OnFrame) {
    let frames = Arc::new(StdMutex::new(Vec::new()));
    let sink = Arc::clone(&frames);
    let callback: OnFrame = Box::new(move |frame| {
        sink.lock().unwrap().push(frame);
    });
    (frames, callback)
}

#[allow(dead_code)]
/// Collector for reported errors.
pub fn error_collector() -> (Arc<StdMutex<Vec<(String, J1939Error)>>>, OnError) {
    let errors = Arc::new(StdMutex::new(Vec::new()));
    let sink = Arc::clone(&errors);
    let callback: OnError = Box::new(move |what, error| {
        sink.lock().unwrap().push((what.to_string(), error));
    });
    (errors, callback)
}

#[allow(dead_code)]
/// Poll a frame collector until it holds `count` frames or the deadline
/// passes; returns a snapshot either way.
pub async fn wait_for_frames(
    frames: &Arc<StdMutex<Vec<Frame>>>,
    count: usize,
    limit: Duration,
) -> Vec<Frame> {
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        {
            let snapshot = frames.lock().unwrap();
            if snapshot.len() >= count {
                return snapshot.clone();
            }
        }
        if tokio::time::Instant::now() >= deadline {
            return frames.lock().unwrap().clone();
        }
        sleep(Duration::from_millis(5)).await;
    }
}

#[allow(dead_code)]
/// Poll until `predicate` holds or the deadline passes; `true` on success.
pub async fn wait_until(limit: Duration, mut predicate: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if predicate() {
            return true;
        }
        sleep(Duration::from_millis(5)).await;
    }
    predicate()
}

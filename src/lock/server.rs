//! Event-driven, single-process, cooperative lock server. Each connection is
//! an independent task; a mutex serializes mutations of the waiter queue.
//! Invariants (per `spec.md` §5): at most one waiter ever sees `place == 0`
//! concurrently granted; a released slot notifies all remaining waiters; a
//! waiter's removal (disconnect, timeout, completion) is idempotent; IDs are
//! released on disconnect and may be reused.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use rand::Rng;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};

#[derive(Debug, Clone, Copy)]
pub struct ServerConfig {
    pub queue_size: usize,
    pub timeout: Duration,
    pub timeout_margin: Duration,
}

impl ServerConfig {
    pub fn new(queue_size: usize, timeout: Duration, timeout_margin: Duration) -> anyhow::Result<Self> {
        anyhow::ensure!(timeout_margin < timeout, "timeout_margin must be strictly less than timeout");
        Ok(ServerConfig { queue_size, timeout, timeout_margin })
    }
}

struct QueueState {
    /// Waiting (not-yet-granted) ids, in arrival order.
    waiting: VecDeque<u16>,
    senders: HashMap<u16, mpsc::UnboundedSender<String>>,
    holder: Option<u16>,
}

impl QueueState {
    fn new() -> Self {
        QueueState { waiting: VecDeque::new(), senders: HashMap::new(), holder: None }
    }

    fn fresh_id(&self) -> u16 {
        let mut rng = rand::thread_rng();
        loop {
            let candidate: u16 = rng.gen();
            if !self.senders.contains_key(&candidate) {
                return candidate;
            }
        }
    }

    /// Notifies every waiting client of its place, and grants the lock to
    /// the front of the queue if no one currently holds it.
    fn reshuffle(&mut self) {
        if self.holder.is_none() {
            if let Some(next) = self.waiting.pop_front() {
                self.holder = Some(next);
                if let Some(tx) = self.senders.get(&next) {
                    let _ = tx.send(String::new());
                }
            }
        }
        for (place, id) in self.waiting.iter().enumerate() {
            if let Some(tx) = self.senders.get(id) {
                let _ = tx.send(format!("{place}."));
            }
        }
    }

    /// Removes `id` from every part of the queue state. Safe to call more
    /// than once for the same id.
    fn remove(&mut self, id: u16) {
        self.waiting.retain(|w| *w != id);
        self.senders.remove(&id);
        if self.holder == Some(id) {
            self.holder = None;
        }
    }
}

pub async fn serve(host: &str, port: u16, config: ServerConfig) -> anyhow::Result<()> {
    let listener = TcpListener::bind((host, port)).await?;
    info!("gitp lock server listening on {host}:{port}");
    let state = Arc::new(Mutex::new(QueueState::new()));

    loop {
        let (socket, addr) = listener.accept().await?;
        debug!("connection from {addr}");
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            if let Err(e) = handle_connection(socket, state, config).await {
                warn!("lock connection {addr} ended with error: {e}");
            }
        });
    }
}

async fn handle_connection(
    mut socket: TcpStream,
    state: Arc<Mutex<QueueState>>,
    config: ServerConfig,
) -> anyhow::Result<()> {
    let id = {
        let mut guard = state.lock().await;
        if guard.waiting.len() >= config.queue_size {
            return Ok(()); // queue at capacity: close immediately
        }
        let id = guard.fresh_id();
        let (tx, _rx) = mpsc::unbounded_channel();
        guard.senders.insert(id, tx);
        id
    };

    socket.write_all(format!("{id}.").as_bytes()).await?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    {
        let mut guard = state.lock().await;
        guard.senders.insert(id, tx);
        guard.waiting.push_back(id);
        guard.reshuffle();
    }

    let (read_half, mut write_half) = socket.into_split();
    let mut lines = BufReader::new(read_half).lines();

    loop {
        tokio::select! {
            update = rx.recv() => {
                match update {
                    Some(place_msg) if place_msg.is_empty() => {
                        // grant
                        write_half.write_all(format!("0:{}", config.timeout.as_secs()).as_bytes()).await?;
                        let deadline = config.timeout;
                        let state2 = Arc::clone(&state);
                        tokio::spawn(async move {
                            tokio::time::sleep(deadline).await;
                            let mut guard = state2.lock().await;
                            if guard.holder == Some(id) {
                                warn!("lock holder {id} exceeded timeout, forfeiting");
                                guard.remove(id);
                                guard.reshuffle();
                            }
                        });
                    }
                    Some(place_msg) => {
                        write_half.write_all(place_msg.as_bytes()).await?;
                    }
                    None => break,
                }
            }
            line = lines.next_line() => {
                match line {
                    Ok(Some(l)) if l.trim() == "done" => {
                        let mut guard = state.lock().await;
                        guard.remove(id);
                        guard.reshuffle();
                        break;
                    }
                    Ok(Some(_)) => continue,
                    Ok(None) | Err(_) => {
                        let mut guard = state.lock().await;
                        guard.remove(id);
                        guard.reshuffle();
                        break;
                    }
                }
            }
        }
    }
    Ok(())
}

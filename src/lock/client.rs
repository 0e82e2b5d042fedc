//! Blocking lock client. The CLI process stays synchronous (per `spec.md`
//! §5); only the lock server runs an event loop. Grounded on
//! `obtain_server_lock()` in the original `gitp.py`.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use log::info;

use crate::error::GitpError;

/// A held lease on the lock server. Dropping it without calling
/// [`Lease::release`] also releases the lock (closing the socket tells the
/// server to auto-release), matching the "disconnect releases" rule.
pub struct Lease {
    stream: TcpStream,
    /// Suggested client-side timeout: `server_timeout - margin`.
    pub budget: Duration,
}

impl Lease {
    pub fn release(mut self) -> anyhow::Result<()> {
        self.stream.write_all(b"done")?;
        Ok(())
    }
}

/// Connects to the lock server, waits in queue, and returns once granted.
/// `margin` is subtracted from the server's advertised timeout to produce
/// the client-side budget the caller should enforce on its own operation.
pub fn acquire(host: &str, port: u16, margin: Duration) -> anyhow::Result<Lease> {
    let mut stream = TcpStream::connect((host, port))?;
    let mut buf = Vec::new();
    let mut byte = [0u8; 1];
    let mut last_place: Option<u32> = None;

    loop {
        let n = stream.read(&mut byte)?;
        if n == 0 {
            return Err(GitpError::lock("lock server closed the connection").into());
        }
        buf.push(byte[0]);

        if byte[0] == b'.' {
            let token = std::str::from_utf8(&buf[..buf.len() - 1])
                .map_err(|_| GitpError::lock("malformed lock server frame"))?;
            if last_place.is_none() {
                // first '.'-terminated token after connecting is our id; the
                // assignment is informational only (see gitp.py), track
                // queue position from subsequent tokens.
                last_place = Some(u32::MAX);
            } else {
                let place: u32 =
                    token.parse().map_err(|_| GitpError::lock("malformed place-in-line frame"))?;
                info!("lock queue position: {place}");
                last_place = Some(place);
            }
            buf.clear();
            continue;
        }

        if byte[0] == b':' {
            // Grant message "0:<timeout>"; the leading "0" is already in
            // `buf` minus the colon. The server writes the whole message in
            // one call, so the remaining digits are already in the kernel's
            // receive buffer by the time we get here.
            let mut tmp = [0u8; 64];
            let n = stream.read(&mut tmp)?;
            let timeout_str = String::from_utf8_lossy(&tmp[..n]);
            let server_timeout: u64 = timeout_str
                .trim()
                .parse()
                .map_err(|_| GitpError::lock("malformed grant timeout"))?;
            let server_timeout = Duration::from_secs(server_timeout);
            let budget = server_timeout.checked_sub(margin).unwrap_or(Duration::ZERO);
            return Ok(Lease { stream, budget });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::server::{serve, ServerConfig};
    use std::time::Duration;

    #[tokio::test]
    async fn single_client_gets_granted() {
        let config = ServerConfig::new(4, Duration::from_secs(30), Duration::from_secs(2)).unwrap();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        tokio::spawn(async move {
            let _ = serve("127.0.0.1", port, config).await;
        });
        tokio::time::sleep(Duration::from_millis(100)).await;

        let lease = tokio::task::spawn_blocking(move || {
            acquire("127.0.0.1", port, Duration::from_secs(2)).unwrap()
        })
        .await
        .unwrap();
        assert!(lease.budget <= Duration::from_secs(30));
        lease.release().unwrap();
    }
}

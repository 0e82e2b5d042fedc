//! Lock Server + Client (C9): an exclusive-access queue for atomic
//! cross-repo fetch/push. Grounded on `server()`/`obtain_server_lock()` in
//! the original `gitp.py` (there, an `asyncio` event loop); the server here
//! runs on `tokio` since the rest of the CLI stays synchronous (see
//! `spec.md` §5 / `SPEC_FULL.md` §4.9 for why this subsystem alone pulls in
//! an async runtime).

pub mod client;
pub mod server;

pub use client::{acquire, Lease};
pub use server::{serve, ServerConfig};

/// Parses a `"host:port"` manifest value, per `spec.md` §6.
pub fn parse_address(raw: &str) -> anyhow::Result<(String, u16)> {
    let (host, port) = raw
        .rsplit_once(':')
        .ok_or_else(|| crate::error::GitpError::parse(format!("invalid lock_server address '{raw}'")))?;
    let port: u16 = port
        .parse()
        .map_err(|_| crate::error::GitpError::parse(format!("invalid lock_server port in '{raw}'")))?;
    Ok((host.to_string(), port))
}

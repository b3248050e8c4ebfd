use std::time::Duration;

use tokio::net::{lookup_host, TcpStream};

use crate::{cluster::Address, communication::CommunicationError};

const RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Creates a TCP stream to `address`.
///
/// Keeps retrying every 100 ms, for at most `attempts` attempts, because the
/// remote process may not have bound its endpoint yet.
pub(crate) async fn connect_to_host(
    address: &Address,
    attempts: usize,
) -> Result<TcpStream, CommunicationError> {
    let target = address.to_string();
    let mut last_error = None;
    for attempt in 1..=attempts.max(1) {
        match try_connect(&target).await {
            Ok(stream) => {
                stream.set_nodelay(true)?;
                return Ok(stream);
            }
            Err(e) => {
                tracing::trace!(
                    "Could not connect to {} (attempt {}/{}): {}; retrying in {:?}",
                    target,
                    attempt,
                    attempts,
                    e,
                    RETRY_INTERVAL
                );
                last_error = Some(e);
                tokio::time::sleep(RETRY_INTERVAL).await;
            }
        }
    }
    tracing::error!("Giving up connecting to {}", target);
    Err(last_error.unwrap_or(CommunicationError::UnresolvedAddress(target)))
}

async fn try_connect(target: &str) -> Result<TcpStream, CommunicationError> {
    let mut last_error = CommunicationError::UnresolvedAddress(target.to_string());
    for socket_address in lookup_host(target).await? {
        match TcpStream::connect(socket_address).await {
            Ok(stream) => return Ok(stream),
            Err(e) => last_error = CommunicationError::from(e),
        }
    }
    Err(last_error)
}

use tokio::net::{TcpStream, ToSocketAddrs};
use tracing::info;

use crate::config::{Config, Role};
use crate::session::Session;
use crate::types::Result;

/// Dial `addr` and run an initiator session over the connection.
pub async fn connect<A: ToSocketAddrs>(addr: A, config: Config) -> Result<Session> {
    let socket = TcpStream::connect(addr).await?;
    socket.set_nodelay(true)?;
    let peer = socket.peer_addr()?;
    info!("Connected to {}", peer);

    Session::new(socket, config.with_role(Role::Initiator))
}

use std::future::Future;
use std::net::SocketAddr;

use tokio::net::{TcpListener, ToSocketAddrs};
use tracing::{debug, error, info};

use crate::config::{Config, Role};
use crate::pool::TaskPool;
use crate::session::Session;
use crate::stream::Stream;
use crate::types::{MuxError, Result};

/// Accepts TCP connections and runs an acceptor session on each.
pub struct MuxTcpServer {
    listener: TcpListener,
    config: Config,
    pool: TaskPool,
}

impl MuxTcpServer {
    /// Bind to `addr`. Sessions use `config` with the acceptor role.
    pub async fn bind<A: ToSocketAddrs>(addr: A, config: Config) -> Result<Self> {
        config.validate()?;
        let listener = TcpListener::bind(addr).await?;
        info!("Mux TCP server bound to {}", listener.local_addr()?);

        Ok(Self {
            listener,
            config: config.with_role(Role::Acceptor),
            pool: TaskPool::new(0, 0),
        })
    }

    /// Replace the pool that runs stream handlers in [`run`](Self::run).
    pub fn with_pool(mut self, pool: TaskPool) -> Self {
        self.pool = pool;
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr().map_err(MuxError::Transport)
    }

    /// Wait for one connection and wrap it in a session.
    pub async fn accept(&self) -> Result<(Session, SocketAddr)> {
        let (socket, addr) = self.listener.accept().await?;
        socket.set_nodelay(true)?;
        let session = Session::new(socket, self.config.clone())?;
        Ok((session, addr))
    }

    /// Serve forever, running `handler` on the pool for every accepted stream.
    ///
    /// A failing connection is logged and does not stop the server.
    pub async fn run<F, Fut>(self, handler: F) -> Result<()>
    where
        F: Fn(Stream) -> Fut + Send + Sync + Clone + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        info!("Mux TCP server starting...");

        loop {
            match self.accept().await {
                Ok((session, addr)) => {
                    info!("New connection from {}", addr);
                    let handler = handler.clone();
                    let pool = self.pool.clone();

                    tokio::spawn(async move {
                        if let Err(e) = Self::serve_session(session, handler, pool).await {
                            error!("Connection {} error: {}", addr, e);
                        }
                        info!("Connection {} ended", addr);
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            }
        }
    }

    async fn serve_session<F, Fut>(session: Session, handler: F, pool: TaskPool) -> Result<()>
    where
        F: Fn(Stream) -> Fut + Send + Sync + Clone + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        loop {
            let stream = match session.accept().await {
                Ok(stream) => stream,
                Err(MuxError::SessionClosed) => return Ok(()),
                Err(e) => return Err(e),
            };
            debug!("Dispatching stream {} to the pool", stream.id());

            if let Err(e) = pool.submit(handler(stream)).await {
                let _ = session.close().await;
                return Err(e);
            }
        }
    }
}

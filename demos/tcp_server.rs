use muxwire::{tcp::MuxTcpServer, Config, Stream};
use std::error::Error;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    info!("Starting muxwire TCP echo server...");

    let config = match std::env::args().nth(1) {
        Some(path) => Config::from_json(&std::fs::read_to_string(path)?)?,
        None => Config::default(),
    };

    // Bind to default port
    let server = MuxTcpServer::bind("127.0.0.1:6969", config).await?;

    // Every accepted stream is echoed back until the client closes it
    server.run(echo_stream).await?;

    Ok(())
}

async fn echo_stream(stream: Stream) {
    let id = stream.id();
    info!("Stream {}: opened", id);

    let mut buf = vec![0u8; 16 * 1024];
    let mut total = 0;
    loop {
        match stream.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                total += n;
                if let Err(e) = stream.write(&buf[..n]).await {
                    warn!("Stream {}: write failed: {}", id, e);
                    break;
                }
            }
            Err(e) => {
                warn!("Stream {}: read failed: {}", id, e);
                break;
            }
        }
    }

    let _ = stream.close().await;
    info!("Stream {}: echoed {} bytes", id, total);
}

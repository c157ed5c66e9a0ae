use muxwire::{tcp, Config};
use std::error::Error;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    info!("Starting muxwire TCP client...");

    let session = tcp::connect("127.0.0.1:6969", Config::default()).await?;

    // Several streams share the one connection
    let mut tasks = Vec::new();
    for i in 0..4 {
        let stream = session.open()?;
        tasks.push(tokio::spawn(async move {
            let message = format!("Hello from stream {}!", i);
            stream.write(message.as_bytes()).await?;

            let mut reply = vec![0u8; message.len()];
            stream.read_exact(&mut reply).await?;
            info!(
                "Stream {} echoed: {}",
                stream.id(),
                String::from_utf8_lossy(&reply)
            );

            stream.close().await
        }));
    }

    for task in tasks {
        task.await??;
    }

    info!("Closing session...");
    session.close().await?;

    info!("Client example completed successfully!");
    Ok(())
}

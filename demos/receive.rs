use std::error::Error;
use tracing::info;
use answer_receiver::{JsonParser, Receiver, ReceiverConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let mut receiver = Receiver::new(ReceiverConfig::from_env()?, JsonParser::<serde_json::Value>::new());
    receiver.start()?;
    info!("Listening for ANSWER frames on {}", receiver.config().bind_addr());

    loop {
        tokio::select! {
            message = receiver.pop() => {
                info!("Received message: {}", message?);
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down...");
                break;
            }
        }
    }

    receiver.shutdown().await;
    Ok(())
}

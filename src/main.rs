use social_chat_server::app;
use tracing::error;

#[tokio::main]
async fn main() {
    app::init_tracing();

    if let Err(err) = app::run().await {
        error!(error = %err, "social chat server failed");
        std::process::exit(1);
    }
}

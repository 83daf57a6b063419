#[tokio::main]
async fn main() -> eyre::Result<()> {
    songsmith::run().start().await
}

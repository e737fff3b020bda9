mod cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::dispatch::run().await
}

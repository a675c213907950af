#[tokio::main]
async fn main() -> anyhow::Result<()> {
    ollama_desk::run().await
}

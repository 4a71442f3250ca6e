#[tokio::main]
async fn main() -> anyhow::Result<()> {
  remorad::init_tracing();
  remorad::run().await
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    zenlist_core::run().await
}

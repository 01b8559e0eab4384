use pilgrim_signaling_gateway::ApplicationBootstrap;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    ApplicationBootstrap::run().await
}

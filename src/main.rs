#[tokio::main]
async fn main() -> anyhow::Result<()> {
    practice_session_lib::run().await
}

use std::time::Duration;

use flagd_web::{ConnectionState, FlagdClient, FlagdOptions};

#[tokio::main]
pub async fn main() -> flagd_web::Result<()> {
    // Configure env_logger to see the client's logs.
    env_logger::Builder::from_env(env_logger::Env::new().default_filter_or("flagd")).init();

    // Picks up FLAGD_WEB_HOST, FLAGD_WEB_PORT, etc.
    let client = FlagdClient::new(FlagdOptions::from_env().with_cache(true))?;

    // Give the connection a moment to become ready. Until then, resolutions return the
    // default value with PROVIDER_NOT_READY.
    for _ in 0..50 {
        if client.connection_state() == ConnectionState::Ready {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    let details = client
        .resolve_boolean("a-boolean-flag", false, &Default::default())
        .await;

    println!("Resolved: {:?}", details);

    client.stop();
    Ok(())
}

use std::time::Duration;

use mongodb::{Client, Database, bson::doc, options::ClientOptions};
use rand::Rng;
use tokio::time::sleep;
use tracing::{debug, warn};

use super::error::{MongoDaoError, MongoResult};

struct RetryPolicy;

impl RetryPolicy {
    const MAX_ATTEMPTS: u32 = 10;
    const INITIAL_DELAY_MS: u64 = 250;
    const MAX_DELAY: Duration = Duration::from_secs(5);
    const JITTER_MS: u64 = 100;

    fn initial_delay() -> Duration {
        Duration::from_millis(Self::INITIAL_DELAY_MS)
    }

    /// Doubled delay capped at five seconds, plus jitter so a burst of
    /// clients rejoining after an outage does not ping in lockstep.
    fn next_delay(current: Duration) -> Duration {
        let doubled = (current * 2).min(Self::MAX_DELAY);
        doubled + Duration::from_millis(rand::rng().random_range(0..Self::JITTER_MS))
    }
}

pub async fn establish_connection(
    options: &ClientOptions,
    database_name: &str,
) -> MongoResult<(Client, Database)> {
    let mut options = options.clone();
    if options.app_name.is_none() {
        options.app_name = Some("tinsel-core".to_owned());
    }
    let client = Client::with_options(options)
        .map_err(|source| MongoDaoError::ClientConstruction { source })?;
    let database = client.database(database_name);

    let mut attempts = 0;
    let mut delay = RetryPolicy::initial_delay();

    loop {
        match database.run_command(doc! { "ping": 1 }).await {
            Ok(_) => {
                debug!(database = database_name, attempts, "MongoDB reachable");
                break;
            }
            Err(err) => {
                attempts += 1;
                if attempts >= RetryPolicy::MAX_ATTEMPTS {
                    return Err(MongoDaoError::InitialPing {
                        attempts,
                        source: err,
                    });
                }
                warn!(attempts, error = %err, "MongoDB ping failed, retrying");
                sleep(delay).await;
                delay = RetryPolicy::next_delay(delay);
            }
        }
    }

    Ok((client, database))
}

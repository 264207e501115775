use std::time::Duration;

use mongodb::{Client, Database, bson::doc, options::ClientOptions};
use tokio::time::sleep;
use tracing::{info, warn};

use super::error::{MongoDaoError, MongoResult};

const DEFAULT_DATABASE: &str = "song_battle";
const APP_NAME: &str = "song-battle-back";

const CONNECT_ATTEMPTS: u32 = 10;
const FIRST_BACKOFF: Duration = Duration::from_millis(250);
const MAX_BACKOFF: Duration = Duration::from_secs(5);

/// Connection settings for the MongoDB battle store.
#[derive(Clone)]
pub struct MongoConfig {
    pub options: ClientOptions,
    pub database_name: String,
}

impl MongoConfig {
    /// Parse the connection URI and pick the database, defaulting to `song_battle`.
    pub async fn from_uri(uri: &str, db_name: Option<&str>) -> MongoResult<Self> {
        let mut options =
            ClientOptions::parse(uri)
                .await
                .map_err(|source| MongoDaoError::InvalidUri {
                    uri: uri.to_owned(),
                    source,
                })?;
        options.app_name.get_or_insert_with(|| APP_NAME.to_owned());

        Ok(Self {
            options,
            database_name: db_name.unwrap_or(DEFAULT_DATABASE).to_owned(),
        })
    }

    /// Build a client and wait until the deployment answers a `hello`.
    ///
    /// Transactions need a replica set; a standalone server is accepted but
    /// every guarded write will then fail, so it is reported loudly.
    pub(super) async fn open(&self) -> MongoResult<(Client, Database)> {
        let client = Client::with_options(self.options.clone())
            .map_err(|source| MongoDaoError::ClientConstruction { source })?;
        let database = client.database(&self.database_name);

        let mut backoff = FIRST_BACKOFF;
        let mut attempt = 0;
        loop {
            attempt += 1;
            match database.run_command(doc! { "hello": 1 }).await {
                Ok(reply) => {
                    match reply.get_str("setName") {
                        Ok(set) => {
                            info!(replica_set = set, database = %self.database_name, "connected to MongoDB")
                        }
                        Err(_) => warn!(
                            database = %self.database_name,
                            "MongoDB is not a replica set member; transactional writes will fail"
                        ),
                    }
                    return Ok((client, database));
                }
                Err(source) if attempt >= CONNECT_ATTEMPTS => {
                    return Err(MongoDaoError::InitialPing {
                        attempts: attempt,
                        source,
                    });
                }
                Err(err) => {
                    warn!(
                        attempt,
                        wait_ms = backoff.as_millis() as u64,
                        error = %err,
                        "MongoDB not reachable yet"
                    );
                    sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
        }
    }
}

use mongodb::error::Error as MongoError;
use thiserror::Error;

pub type MongoResult<T> = std::result::Result<T, MongoDaoError>;

#[derive(Debug, Error)]
pub enum MongoDaoError {
    #[error("failed to parse MongoDB connection URI `{uri}`")]
    InvalidUri {
        uri: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to build MongoDB client from options")]
    ClientConstruction {
        #[source]
        source: MongoError,
    },
    #[error("MongoDB ping failed during initial connection after {attempts} attempt(s)")]
    InitialPing {
        attempts: u32,
        #[source]
        source: MongoError,
    },
    #[error("MongoDB ping health check failed")]
    HealthPing {
        #[source]
        source: MongoError,
    },
    #[error("failed to ensure index `{index}` on collection `{collection}`")]
    EnsureIndex {
        collection: &'static str,
        index: &'static str,
        #[source]
        source: MongoError,
    },
    #[error("failed to load `{collection}` document `{key}`")]
    LoadDocument {
        collection: &'static str,
        key: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to list collection `{collection}`")]
    ListCollection {
        collection: &'static str,
        #[source]
        source: MongoError,
    },
    #[error("failed to decode `{collection}` document `{key}`: {message}")]
    DecodeDocument {
        collection: &'static str,
        key: String,
        message: String,
    },
    #[error("failed to encode `{collection}` document `{key}`: {message}")]
    EncodeDocument {
        collection: &'static str,
        key: String,
        message: String,
    },
    #[error("failed to start a client session")]
    StartSession {
        #[source]
        source: MongoError,
    },
    #[error("failed to {phase} a transaction")]
    Transaction {
        phase: &'static str,
        #[source]
        source: MongoError,
    },
    #[error("failed to write `{collection}` document `{key}`")]
    WriteDocument {
        collection: &'static str,
        key: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to open a change stream on `{collection}`")]
    WatchCollection {
        collection: &'static str,
        #[source]
        source: MongoError,
    },
    #[error("environment variable `{var}` is not set")]
    MissingEnvVar { var: &'static str },
}

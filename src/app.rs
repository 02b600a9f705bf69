//! Service wiring.
//!
//! [`App`] is built once at startup from a [`Config`] and owns every
//! long-lived component. The CLI and the HTTP server both go through it, so
//! there is no ambient global state: the index, the session store, and the
//! model clients are created here and injected where they are used.

use std::sync::Arc;

use crate::config::Config;
use crate::db;
use crate::embedding::{create_embedder, Embedder};
use crate::error::RagError;
use crate::index::IndexManager;
use crate::ingest::Ingestor;
use crate::llm::{create_chat_model, ChatModel};
use crate::memory::SessionStore;
use crate::migrate;
use crate::pipeline::ChatPipeline;
use crate::store::{IndexStore, SqliteStore};

pub struct App {
    pub config: Arc<Config>,
    pub index: Arc<IndexManager>,
    pub memory: Arc<SessionStore>,
    pub pipeline: Arc<ChatPipeline>,
    pub ingestor: Arc<Ingestor>,
}

impl App {
    /// Open the SQLite index and construct the configured model clients.
    ///
    /// # Errors
    ///
    /// [`RagError::Configuration`] for missing credentials, unknown
    /// providers, or a database that cannot be opened.
    pub async fn open(config: &Config) -> Result<Self, RagError> {
        let pool = db::connect(config)
            .await
            .map_err(|e| RagError::Configuration(format!("cannot open database: {:#}", e)))?;
        migrate::migrate_pool(&pool)
            .await
            .map_err(|e| RagError::Configuration(format!("schema migration failed: {:#}", e)))?;

        let embedder = create_embedder(&config.embedding)?;
        let model = create_chat_model(&config.llm)?;
        tracing::info!(
            db = %config.db.path.display(),
            embedding = embedder.model_name(),
            llm = model.model_name(),
            "services ready"
        );

        Self::from_parts(
            config.clone(),
            Arc::new(SqliteStore::new(pool)),
            embedder,
            model,
        )
    }

    /// Assemble the services around explicit components.
    pub fn from_parts(
        config: Config,
        store: Arc<dyn IndexStore>,
        embedder: Arc<dyn Embedder>,
        model: Arc<dyn ChatModel>,
    ) -> Result<Self, RagError> {
        let memory = Arc::new(SessionStore::from_config(&config.memory)?);
        let index = Arc::new(IndexManager::new(
            store,
            embedder,
            config.retrieval.batch_size,
        ));
        let pipeline = Arc::new(ChatPipeline::new(
            index.clone(),
            memory.clone(),
            model,
            &config.retrieval,
        ));
        let ingestor = Arc::new(Ingestor::new(index.clone(), config.chunking.clone()));

        Ok(Self {
            config: Arc::new(config),
            index,
            memory,
            pipeline,
            ingestor,
        })
    }
}

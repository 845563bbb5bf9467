//! Process-wide service wiring.
//!
//! One store and one pipeline are built at startup and shared through
//! `Arc` handles; nothing is held in globals.

use std::sync::Arc;

use anyhow::Result;

use crate::config::Config;
use crate::embedding::{create_embedder, Embedder};
use crate::index::{InMemoryIndex, SqliteIndex, VectorIndex};
use crate::llm::{ChatBackend, OpenAiChat};
use crate::pipeline::{InputDefaults, Pipeline};
use crate::retriever::Retriever;
use crate::store::DocumentStore;

#[derive(Clone)]
pub struct Services {
    pub config: Arc<Config>,
    pub store: Arc<DocumentStore>,
    pub pipeline: Arc<Pipeline>,
}

impl Services {
    /// Build the configured index, embedder and chat backend.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let index: Arc<dyn VectorIndex> = match config.index.backend.as_str() {
            "memory" => Arc::new(InMemoryIndex::new()),
            _ => Arc::new(SqliteIndex::open(&config.index.path, &config.index.collection).await?),
        };
        let embedder: Arc<dyn Embedder> = Arc::from(create_embedder(&config.embedding)?);
        let backend: Arc<dyn ChatBackend> = Arc::new(OpenAiChat::from_config(&config.llm)?);

        tracing::info!(
            backend = %config.index.backend,
            collection = %config.index.collection,
            embedder = embedder.model_name(),
            model = backend.model(),
            "services ready"
        );
        Ok(Self::new(config.clone(), embedder, index, backend))
    }

    /// Wire services around caller-supplied components.
    pub fn new(
        config: Config,
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        backend: Arc<dyn ChatBackend>,
    ) -> Self {
        let store = Arc::new(DocumentStore::from_config(&config, embedder, index));
        let pipeline = Arc::new(
            Pipeline::new(Retriever::new(Arc::clone(&store)), backend)
                .with_history_turns(config.generation.history_turns)
                .with_defaults(InputDefaults::from_config(&config)),
        );
        Self {
            config: Arc::new(config),
            store,
            pipeline,
        }
    }
}

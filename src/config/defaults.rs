//! Built-in default values for configuration.

/// File extensions indexed by default (without leading dot).
pub const DEFAULT_EXTENSIONS: &[&str] = &["py", "pyi", "rs"];

/// Maximum size of a single source file to index (in bytes).
pub const DEFAULT_MAX_FILE_SIZE: u64 = 1_000_000;

/// Entities per embedding batch.
pub const DEFAULT_BATCH_SIZE: usize = 32;

/// Concurrent backend writes.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Attempts per embedding batch or backend write before giving up.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Base delay for exponential backoff between retries (milliseconds).
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 200;

/// Seeds requested from the vector index per query.
pub const DEFAULT_TOP_K: usize = 8;

/// Minimum cosine similarity for a seed to be retained.
pub const DEFAULT_MIN_SIMILARITY: f32 = 0.25;

/// Maximum graph expansion depth from any seed.
pub const DEFAULT_MAX_HOPS: usize = 2;

/// Maximum total entities in a query context.
pub const DEFAULT_ENTITY_BUDGET: usize = 24;

/// Per-hop score discount, strictly between 0 and 1.
pub const DEFAULT_HOP_DECAY: f32 = 0.5;

/// Token budget for assembled context.
pub const DEFAULT_TOKEN_BUDGET: usize = 6000;

/// Embedding model name.
pub const DEFAULT_EMBEDDING_MODEL: &str = "bge-small-en-v1.5";

/// Database directory.
pub const DEFAULT_DB_PATH: &str = ".patchgraph/db";

/// LLM settings for the patch-generation collaborator.
pub const DEFAULT_LLM_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_LLM_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_LLM_MAX_TOKENS: u32 = 4096;

//! Shared test utilities for integration tests
//!
//! Scripted producers, failing content stores and a small catalog, plus the
//! environment guard for tests that touch `XDG_*` / `COURSEGEN_*` variables.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use coursegen::catalog::{Catalog, CombinationRules};
use coursegen::config::PipelineConfig;
use coursegen::content::{AcceptedContent, ContentStore};
use coursegen::error::{ProducerError, StoreWriteError};
use coursegen::pipeline::Pipeline;
use coursegen::producer::{CandidateContent, ContentProducer, ProducerRequest};
use coursegen::resolver::{CombinationId, SpecKey};
use coursegen::schema::SchemaRegistry;
use serde_json::json;
use tempfile::TempDir;

/// Global mutex to serialize environment variable access across all tests
static ENV_MUTEX: Mutex<()> = Mutex::new(());

/// Environment variable state to restore after test
struct EnvState {
    vars: Vec<(&'static str, Option<String>)>,
}

const GUARDED_VARS: &[&str] = &[
    "HOME",
    "XDG_CONFIG_HOME",
    "COURSEGEN_ENV",
    "COURSEGEN__PIPELINE__BATCH_SIZE",
    "COURSEGEN__PIPELINE__MAX_ATTEMPTS",
];

impl EnvState {
    fn capture() -> Self {
        Self {
            vars: GUARDED_VARS
                .iter()
                .map(|name| (*name, std::env::var(name).ok()))
                .collect(),
        }
    }

    fn restore(self) {
        for (name, value) in self.vars {
            match value {
                Some(orig) => std::env::set_var(name, orig),
                None => std::env::remove_var(name),
            }
        }
    }
}

/// Run `f` with `XDG_CONFIG_HOME` and `HOME` pointed into `test_dir`, restoring
/// every guarded variable afterwards.
pub fn with_isolated_env<F, R>(test_dir: &TempDir, f: F) -> R
where
    F: FnOnce() -> R,
{
    let _guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    let env_state = EnvState::capture();

    let test_config_home = test_dir.path().join("xdg");
    let test_home = test_dir.path().join("home");
    std::fs::create_dir_all(&test_config_home).unwrap();
    std::fs::create_dir_all(&test_home).unwrap();

    std::env::set_var("HOME", test_home.to_str().unwrap());
    std::env::set_var("XDG_CONFIG_HOME", test_config_home.to_str().unwrap());

    let result = f();

    env_state.restore();

    result
}

/// One language pair, one level, one category, EX_FILL, two topics: 2 combinations.
pub fn tiny_catalog() -> Catalog {
    let mut catalog = Catalog::builtin();
    catalog.language_pairs.retain(|x| x.code == "LANG_001");
    catalog.categories.retain(|x| x.code == "CAT_VOCAB");
    catalog.exercise_types.retain(|x| x.code == "EX_FILL");
    catalog
        .topics
        .retain(|x| x.code == "TOPIC_DAILY" || x.code == "TOPIC_FOOD");
    catalog.rules = CombinationRules::default();
    catalog
}

/// Same as [`tiny_catalog`] with a single topic: 1 combination.
pub fn single_combination_catalog() -> Catalog {
    let mut catalog = tiny_catalog();
    catalog.topics.retain(|x| x.code == "TOPIC_DAILY");
    catalog
}

/// Short timeouts so failure paths finish quickly.
pub fn test_config() -> PipelineConfig {
    PipelineConfig {
        batch_size: 10,
        concurrency: 2,
        variations_per_combo: 3,
        max_attempts: 3,
        repeat_limit: None,
        producer_timeout_ms: 2_000,
        store_timeout_ms: 500,
        store_write_retries: 1,
        retry_delay_ms: 5,
        lease_ms: 10_000,
        similarity_threshold: 0.85,
    }
}

/// A valid EX_FILL candidate whose exercise text is distinct for every seed.
pub fn good_candidate(seed: u64) -> CandidateContent {
    let mut fields = BTreeMap::new();
    fields.insert(
        "theory".to_string(),
        json!("The present simple describes habits and routines. We add -s for he, she and it."),
    );
    fields.insert(
        "exercise_introduction".to_string(),
        json!("Completa la frase con la palabra correcta."),
    );
    fields.insert(
        "exercise_input".to_string(),
        json!(format!(
            "Case {} ___ word{} token{} item{} here.",
            seed,
            seed,
            seed + 1,
            seed + 2
        )),
    );
    fields.insert("expected_output".to_string(), json!("drinks"));
    CandidateContent::new(fields)
}

type Respond = dyn Fn(&ProducerRequest) -> Result<CandidateContent, ProducerError> + Send + Sync;

/// Producer driven by a closure; records every request it sees.
pub struct ScriptedProducer {
    respond: Box<Respond>,
    calls: AtomicUsize,
    requests: parking_lot::Mutex<Vec<(SpecKey, u32, u64)>>,
}

impl ScriptedProducer {
    pub fn new<F>(respond: F) -> Arc<Self>
    where
        F: Fn(&ProducerRequest) -> Result<CandidateContent, ProducerError> + Send + Sync + 'static,
    {
        Arc::new(Self {
            respond: Box::new(respond),
            calls: AtomicUsize::new(0),
            requests: parking_lot::Mutex::new(Vec::new()),
        })
    }

    /// Always valid, always distinct content.
    pub fn always_good() -> Arc<Self> {
        Self::new(|request| {
            Ok(good_candidate(
                request.variation_seed * 10 + request.spec.combination.priority as u64 * 100_000,
            ))
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// (spec key, attempt, variation seed) per call, in call order.
    pub fn requests(&self) -> Vec<(SpecKey, u32, u64)> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl ContentProducer for ScriptedProducer {
    async fn produce(&self, request: &ProducerRequest) -> Result<CandidateContent, ProducerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .push((request.spec.key(), request.attempt, request.variation_seed));
        (self.respond)(request)
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Reads succeed with nothing stored; every write fails.
#[derive(Default)]
pub struct UnavailableStore {
    pub writes: AtomicUsize,
}

#[async_trait]
impl ContentStore for UnavailableStore {
    async fn write(&self, _record: &AcceptedContent) -> Result<(), StoreWriteError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        Err(StoreWriteError::Unavailable("disk full".to_string()))
    }

    async fn accepted_for(
        &self,
        _combination: &CombinationId,
    ) -> Result<Vec<AcceptedContent>, StoreWriteError> {
        Ok(Vec::new())
    }

    async fn get(&self, _key: &SpecKey) -> Result<Option<AcceptedContent>, StoreWriteError> {
        Ok(None)
    }

    async fn remove(&self, _key: &SpecKey) -> Result<bool, StoreWriteError> {
        Ok(false)
    }
}

/// Reports every write as already present.
#[derive(Default)]
pub struct DuplicateStore {
    pub writes: AtomicUsize,
}

#[async_trait]
impl ContentStore for DuplicateStore {
    async fn write(&self, record: &AcceptedContent) -> Result<(), StoreWriteError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        Err(StoreWriteError::Duplicate(record.spec_key.to_string()))
    }

    async fn accepted_for(
        &self,
        _combination: &CombinationId,
    ) -> Result<Vec<AcceptedContent>, StoreWriteError> {
        Ok(Vec::new())
    }

    async fn get(&self, _key: &SpecKey) -> Result<Option<AcceptedContent>, StoreWriteError> {
        Ok(None)
    }

    async fn remove(&self, _key: &SpecKey) -> Result<bool, StoreWriteError> {
        Ok(false)
    }
}

/// Pipeline over a fresh sled database in `dir`.
pub fn open_pipeline(
    dir: &TempDir,
    catalog: Catalog,
    producer: Arc<dyn ContentProducer>,
    config: PipelineConfig,
) -> Pipeline {
    let db = sled::open(dir.path().join("store")).unwrap();
    Pipeline::new(catalog, SchemaRegistry::builtin(), db, producer, config)
        .unwrap()
        .with_owner("test-worker")
}

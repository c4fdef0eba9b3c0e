//! CorrelationStore - async facade over an event index
//!
//! Async cancellation: dropping the returned future drops a DropGuard, which
//! cancels the query's CancellationToken. The blocking scan checks the token
//! before every candidate and stops with `Cancelled`.

use std::path::Path;
use std::sync::{Arc, Once};

use once_cell::sync::Lazy;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::dsl;
use crate::indexer::{EventIndex, EventSchema};
use crate::interface::{CoincideError, CoincideResult, CorrelationApi, MatchSet, TimeWindowRequest};
use crate::search::SearchOptions;

/// Global fallback Tokio runtime for async calls made outside any runtime.
/// Shared by every store and never dropped.
static FALLBACK_RUNTIME: Lazy<tokio::runtime::Runtime> = Lazy::new(|| {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("Failed to create fallback tokio runtime")
});

static RAYON_INIT: Once = Once::new();

/// Size the global rayon pool, leaving two cores to tokio.
fn init_rayon() {
    RAYON_INIT.call_once(|| {
        let num_threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        let rayon_threads = num_threads.saturating_sub(2).max(1);

        let built = rayon::ThreadPoolBuilder::new()
            .num_threads(rayon_threads)
            .thread_name(|i| format!("coincide-rayon-{}", i))
            .build_global();
        if built.is_err() {
            warn!("global rayon pool already initialized, keeping it");
        }
    });
}

/// RAII guard that cancels a token when dropped.
struct DropGuard {
    token: CancellationToken,
}

impl DropGuard {
    fn new(token: CancellationToken) -> Self {
        Self { token }
    }
}

impl Drop for DropGuard {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Thread-safe correlation service
///
/// - Queries run on `spawn_blocking` threads, segments fan out on rayon
/// - Uses FALLBACK_RUNTIME when called outside any tokio runtime
/// - `SearchOptions::timeout` bounds every query
pub struct CorrelationStore {
    index: Arc<EventIndex>,
    options: SearchOptions,
}

impl CorrelationStore {
    pub fn new(path: &Path, events: EventSchema) -> CoincideResult<Self> {
        Ok(Self::from_index(EventIndex::new(path, events)?))
    }

    pub fn new_in_memory(events: EventSchema) -> CoincideResult<Self> {
        Ok(Self::from_index(EventIndex::new_in_memory(events)?))
    }

    pub fn from_index(index: EventIndex) -> Self {
        init_rayon();
        Self {
            index: Arc::new(index),
            options: SearchOptions::default(),
        }
    }

    pub fn with_options(mut self, options: SearchOptions) -> Self {
        self.options = options;
        self
    }

    pub fn index(&self) -> &EventIndex {
        &self.index
    }

    /// Current runtime if there is one, otherwise the global fallback
    fn runtime_handle(&self) -> tokio::runtime::Handle {
        tokio::runtime::Handle::try_current().unwrap_or_else(|_| FALLBACK_RUNTIME.handle().clone())
    }

    /// Synchronous query with a caller-owned token.
    pub fn find_correlated_blocking(
        &self,
        request: &TimeWindowRequest,
        token: &CancellationToken,
    ) -> CoincideResult<MatchSet> {
        self.index.find_correlated(request, &self.options, token)
    }

    async fn run(&self, request: TimeWindowRequest) -> CoincideResult<MatchSet> {
        let token = CancellationToken::new();
        let _guard = DropGuard::new(token.clone());

        let runtime = self.runtime_handle();
        let index = Arc::clone(&self.index);
        let options = self.options.clone();
        let token_clone = token.clone();
        let handle = runtime.spawn_blocking(move || index.find_correlated(&request, &options, &token_clone));

        // tokio timers need the caller to be inside a runtime; without one the
        // scan's own deadline still applies.
        let joined = match (self.options.timeout, tokio::runtime::Handle::try_current()) {
            (Some(limit), Ok(_)) => match tokio::time::timeout(limit, handle).await {
                Ok(joined) => joined,
                Err(_elapsed) => {
                    token.cancel();
                    return Err(CoincideError::Cancelled);
                }
            },
            _ => handle.await,
        };

        match joined {
            Ok(result) => result,
            // JoinError: the task panicked or was aborted
            Err(_join_error) => Err(CoincideError::Cancelled),
        }
    }
}

#[async_trait::async_trait]
impl CorrelationApi for CorrelationStore {
    async fn find_correlated(&self, request: TimeWindowRequest) -> CoincideResult<MatchSet> {
        self.run(request).await
    }

    async fn find_correlated_json(&self, query: String) -> CoincideResult<MatchSet> {
        let request = dsl::parse_request(&query)?;
        self.run(request).await
    }

    fn num_docs(&self) -> u64 {
        self.index.num_docs()
    }
}

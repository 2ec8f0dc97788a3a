//! Index lifecycle: load an existing index or build one, then serve it.
//!
//! ```text
//!            load_or_build / rebuild
//! Loading ─────────────────────────────▶ Building ──▶ Ready
//!    ▲                                      │           │
//!    └────────────── build failed ──────────┘           │ close
//!                                                        ▼
//!                                                      Closed
//! ```
//!
//! While a build runs every query is refused with [`ErrorKind::Busy`]. A
//! build writes a `*.partial` database that only replaces the served one
//! after it is complete, so the database file on disk is either absent or a
//! finished index.

use folio_catalog::{RecordFilter, RecordSource};
use folio_config::Config;
use folio_index::{BuildArtifacts, BuildOptions, Builder, IndexMeta, ProgressSink};
use folio_store::{SqliteStore, StoreHandle, StoreOptions};
use serde::Serialize;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, instrument, warn};

use crate::engine::{BookList, EngineOptions, SearchEngine, SearchResponse, SeriesBooks};
use crate::error::{ErrorKind, Result};
use crate::query::SearchQuery;
use exn::ResultExt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
    Loading,
    Building,
    Ready,
    Closed,
}

enum State {
    Loading,
    Building,
    Ready(Arc<SearchEngine>),
    Closed,
}

impl State {
    fn public(&self) -> ServiceState {
        match self {
            State::Loading => ServiceState::Loading,
            State::Building => ServiceState::Building,
            State::Ready(_) => ServiceState::Ready,
            State::Closed => ServiceState::Closed,
        }
    }
}

/// Owns the index database of one data directory and the engine serving it.
pub struct Service {
    config: Config,
    state: RwLock<State>,
}

impl Service {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            state: RwLock::new(State::Loading),
        }
    }

    pub async fn state(&self) -> ServiceState {
        self.state.read().await.public()
    }

    /// Serve the existing index, building it first when there is none, it
    /// is incomplete or `force` is set.
    ///
    /// `source` is only read when a build happens.
    #[instrument(level = "info", skip_all, fields(force = force))]
    pub async fn load_or_build(
        &self,
        source: RecordSource<'_>,
        force: bool,
        sink: &mut dyn ProgressSink,
    ) -> Result<Option<BuildArtifacts>> {
        let path = self.config.database_path();
        if !force && path.is_file() {
            self.begin(State::Loading).await?;
            match self.open(&path).await {
                Ok(engine) => {
                    self.install(ServiceState::Loading, engine).await?;
                    info!(path = %path.display(), "serving existing index");
                    return Ok(None);
                },
                Err(err) if matches!(&*err, ErrorKind::NotReady) => {
                    warn!(path = %path.display(), "existing index is incomplete, rebuilding");
                },
                Err(err) => {
                    self.settle(ServiceState::Loading).await;
                    return Err(err);
                },
            }
        }
        self.rebuild(source, sink).await.map(Some)
    }

    /// Build a fresh index and swap it in. Queries are refused until it is
    /// ready.
    #[instrument(level = "info", skip_all)]
    pub async fn rebuild(&self, source: RecordSource<'_>, sink: &mut dyn ProgressSink) -> Result<BuildArtifacts> {
        self.begin(State::Building).await?;
        match self.build(source, sink).await {
            Ok((artifacts, engine)) => {
                self.install(ServiceState::Building, engine).await?;
                Ok(artifacts)
            },
            Err(err) => {
                self.settle(ServiceState::Building).await;
                Err(err)
            },
        }
    }

    /// Serve `engine` if the service is still in `expected`. A service closed
    /// in the meantime stays closed and the engine is shut down.
    async fn install(&self, expected: ServiceState, engine: SearchEngine) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if state.public() == expected {
                *state = State::Ready(Arc::new(engine));
                return Ok(());
            }
        }
        engine.close().await;
        exn::bail!(ErrorKind::Closed)
    }

    /// Fall back to `Loading` after a failed load or build, unless closed.
    async fn settle(&self, expected: ServiceState) {
        let mut state = self.state.write().await;
        if state.public() == expected {
            *state = State::Loading;
        }
    }

    /// Move into `next`, closing the engine being served. Fails while a build
    /// is already running or after close.
    async fn begin(&self, next: State) -> Result<()> {
        let previous = {
            let mut state = self.state.write().await;
            match &*state {
                State::Building => exn::bail!(ErrorKind::Busy),
                State::Closed => exn::bail!(ErrorKind::Closed),
                State::Loading | State::Ready(_) => std::mem::replace(&mut *state, next),
            }
        };
        if let State::Ready(engine) = previous {
            engine.close().await;
        }
        Ok(())
    }

    async fn build(&self, source: RecordSource<'_>, sink: &mut dyn ProgressSink) -> Result<(BuildArtifacts, SearchEngine)> {
        let filter = match &self.config.filter_file {
            Some(path) => RecordFilter::load(path, self.config.unsafe_filter).or_raise(|| ErrorKind::Config)?,
            None => RecordFilter::accept_all(),
        };
        tokio::fs::create_dir_all(&self.config.data_dir).await.or_raise(|| ErrorKind::Build)?;
        let path = self.config.database_path();
        let partial = with_suffix(&path, ".partial");
        remove_database(&partial).await?;

        let store: StoreHandle = Arc::new(
            SqliteStore::connect(&partial, self.store_options())
                .await
                .or_raise(|| ErrorKind::Build)?,
        );
        let built = Builder::new(store.clone(), BuildOptions::from(&self.config)).build(source, &filter, sink).await;
        store.close().await;
        let artifacts = match built {
            Ok(artifacts) => artifacts,
            Err(err) => {
                remove_database(&partial).await.ok();
                return Err(err).or_raise(|| ErrorKind::Build);
            },
        };

        remove_database(&path).await?;
        tokio::fs::rename(&partial, &path).await.or_raise(|| ErrorKind::Build)?;
        info!(path = %path.display(), hash = %artifacts.hash, "index promoted");
        let engine = self.open(&path).await?;
        Ok((artifacts, engine))
    }

    async fn open(&self, path: &Path) -> Result<SearchEngine> {
        let store: StoreHandle = Arc::new(SqliteStore::connect(path, self.store_options()).await.or_raise(|| ErrorKind::Store)?);
        let ready = IndexMeta::is_ready(&store).await.or_raise(|| ErrorKind::Store);
        match ready {
            Ok(true) => SearchEngine::open(store, EngineOptions::from(&self.config)).await,
            Ok(false) => {
                store.close().await;
                exn::bail!(ErrorKind::NotReady)
            },
            Err(err) => {
                store.close().await;
                Err(err)
            },
        }
    }

    fn store_options(&self) -> StoreOptions {
        StoreOptions {
            low_memory: self.config.low_memory_mode,
        }
    }

    async fn engine(&self) -> Result<Arc<SearchEngine>> {
        match &*self.state.read().await {
            State::Ready(engine) => Ok(engine.clone()),
            State::Loading | State::Building => exn::bail!(ErrorKind::Busy),
            State::Closed => exn::bail!(ErrorKind::Closed),
        }
    }

    pub async fn search(&self, query: &SearchQuery) -> Result<SearchResponse> {
        self.engine().await?.search(query).await
    }

    pub async fn book_list(&self, author_id: u64) -> Result<BookList> {
        self.engine().await?.book_list(author_id).await
    }

    pub async fn series_book_list(&self, series: &str) -> Result<SeriesBooks> {
        self.engine().await?.series_book_list(series).await
    }

    /// Metadata of the index being served.
    pub async fn config(&self) -> Result<IndexMeta> {
        Ok(self.engine().await?.config().clone())
    }

    /// Stop serving. Waits for running queries; later calls fail with
    /// [`ErrorKind::Closed`].
    pub async fn close(&self) {
        let previous = std::mem::replace(&mut *self.state.write().await, State::Closed);
        if let State::Ready(engine) = previous {
            engine.close().await;
        }
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// Remove a database file and its WAL sidecars, if present.
async fn remove_database(path: &Path) -> Result<()> {
    for file in [path.to_path_buf(), with_suffix(path, "-wal"), with_suffix(path, "-shm")] {
        match tokio::fs::remove_file(&file).await {
            Ok(()) => {},
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {},
            Err(err) => return Err(err).or_raise(|| ErrorKind::Build),
        }
    }
    Ok(())
}

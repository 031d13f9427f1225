use std::env::VarError;

use crate::{
    db::{self, HistoryStore, InsertStatement},
    models::{Error, HistoryRow, RunError, Settings, Stage},
    services::{StatusSource, WorldStatusClient},
};
#[allow(unused_imports)]
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Init,
    ConfigLoaded,
    DbConnected,
    StatementPrepared,
    ClientReady,
    Fetched,
    Serialized,
    Inserted,
    Refreshed,
    Done,
    Failed,
}

impl RunState {
    /// State a stage moves the run into once it succeeds.
    const fn after(stage: Stage) -> RunState {
        match stage {
            Stage::Config => RunState::ConfigLoaded,
            Stage::Connect => RunState::DbConnected,
            Stage::Prepare => RunState::StatementPrepared,
            Stage::Client => RunState::ClientReady,
            Stage::Fetch => RunState::Fetched,
            Stage::Serialize => RunState::Serialized,
            Stage::Insert => RunState::Inserted,
            Stage::Refresh => RunState::Refreshed,
        }
    }

    const fn before(stage: Stage) -> RunState {
        match stage {
            Stage::Config => RunState::Init,
            Stage::Connect => RunState::ConfigLoaded,
            Stage::Prepare => RunState::DbConnected,
            Stage::Client => RunState::StatementPrepared,
            Stage::Fetch => RunState::ClientReady,
            Stage::Serialize => RunState::Fetched,
            Stage::Insert => RunState::Serialized,
            Stage::Refresh => RunState::Inserted,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub version: i64,
    pub items: usize,
    pub inserted: u64,
}

/// One fetch-serialize-store cycle.
#[derive(Debug)]
pub struct Collector {
    state: RunState,
}

impl Default for Collector {
    fn default() -> Self {
        Self::new()
    }
}

impl Collector {
    pub fn new() -> Self {
        Self {
            state: RunState::Init,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub async fn run(&mut self) -> Result<RunSummary, RunError> {
        self.run_with(|key| std::env::var(key)).await
    }

    /// Runs the whole cycle with settings read through `lookup`.
    pub async fn run_with<F>(&mut self, lookup: F) -> Result<RunSummary, RunError>
    where
        F: Fn(&str) -> Result<String, VarError>,
    {
        info!("Loading configuration.");
        let settings = self.step(Stage::Config, Settings::load_with(lookup).await)?;
        info!("Connecting to database.");
        let store = self.step(Stage::Connect, db::connect(&settings.connection_string).await)?;
        let api_url = settings.api_url;
        self.collect(&store, || WorldStatusClient::new(&api_url)).await
    }

    /// Everything after the database connection: prepare, fetch, insert, refresh.
    pub async fn collect<D, S, F>(&mut self, store: &D, new_client: F) -> Result<RunSummary, RunError>
    where
        D: HistoryStore,
        S: StatusSource,
        F: FnOnce() -> Result<S, Error>,
    {
        info!("Preparing statement.");
        let insert = self.step(Stage::Prepare, store.prepare_insert().await)?;

        info!("Creating client.");
        let client = self.step(Stage::Client, new_client())?;

        info!("Fetching.");
        let items = self.step(Stage::Fetch, client.world_status().await)?;
        let row = HistoryRow::new(client.version(), items);
        let version = row.version();
        let count = row.items().len();
        let payload = self.step(Stage::Serialize, row.to_payload())?;
        drop(row);
        debug!({ bytes = payload.as_str().len() }, "payload");

        info!({ version, items = count }, "Saving to database.");
        let inserted = self.step(Stage::Insert, insert.execute(&payload).await)?;

        info!("Refreshing materialized view.");
        self.step(Stage::Refresh, store.refresh_view().await)?;

        self.state = RunState::Done;
        Ok(RunSummary {
            version,
            items: count,
            inserted,
        })
    }

    fn step<T>(&mut self, stage: Stage, res: Result<T, Error>) -> Result<T, RunError> {
        debug_assert_eq!(RunState::before(stage), self.state);
        match res {
            Ok(value) => {
                let next = RunState::after(stage);
                debug!({ from = ?self.state, to = ?next }, "transition");
                self.state = next;
                Ok(value)
            }
            Err(source) => {
                debug!({ from = ?self.state, ?stage }, "failed");
                self.state = RunState::Failed;
                Err(RunError::new(stage, source))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Payload, WorldStatus};
    use crate::models::settings::{API_URL_ENV, CONNECTION_STRING_FILE_ENV};
    use std::{
        cell::{Cell, RefCell},
        io::Write,
        rc::Rc,
    };

    #[derive(Default)]
    struct FakeStore {
        rows: Rc<RefCell<Vec<String>>>,
        executions: Rc<Cell<usize>>,
        refreshes: Cell<usize>,
        fail_prepare: bool,
        fail_insert: bool,
        fail_refresh: bool,
    }

    struct FakeInsert {
        rows: Rc<RefCell<Vec<String>>>,
        executions: Rc<Cell<usize>>,
        fail: bool,
    }

    impl HistoryStore for FakeStore {
        type Insert = FakeInsert;

        async fn prepare_insert(&self) -> Result<FakeInsert, Error> {
            if self.fail_prepare {
                return Err(Error::DbError(sqlx::Error::PoolTimedOut));
            }
            Ok(FakeInsert {
                rows: Rc::clone(&self.rows),
                executions: Rc::clone(&self.executions),
                fail: self.fail_insert,
            })
        }

        async fn refresh_view(&self) -> Result<(), Error> {
            self.refreshes.set(self.refreshes.get() + 1);
            if self.fail_refresh {
                return Err(Error::DbError(sqlx::Error::Protocol(
                    "materialized view is locked".into(),
                )));
            }
            Ok(())
        }
    }

    impl InsertStatement for FakeInsert {
        async fn execute(self, payload: &Payload) -> Result<u64, Error> {
            self.executions.set(self.executions.get() + 1);
            if self.fail {
                return Err(Error::DbError(sqlx::Error::PoolClosed));
            }
            self.rows.borrow_mut().push(payload.as_str().to_owned());
            Ok(1)
        }
    }

    struct FakeSource {
        version: i64,
        body: Option<&'static str>,
    }

    impl StatusSource for FakeSource {
        fn version(&self) -> i64 {
            self.version
        }

        async fn world_status(&self) -> Result<Vec<WorldStatus>, Error> {
            match self.body {
                Some(body) => Ok(serde_json::from_str(body)?),
                None => Err(Error::UnexpectedStatus(hyper::StatusCode::BAD_GATEWAY)),
            }
        }
    }

    fn source(version: i64, body: &'static str) -> impl FnOnce() -> Result<FakeSource, Error> {
        move || {
            Ok(FakeSource {
                version,
                body: Some(body),
            })
        }
    }

    fn connected() -> Collector {
        Collector {
            state: RunState::DbConnected,
        }
    }

    #[tokio::test]
    async fn collect_end_to_end() -> anyhow::Result<()> {
        // arrange
        let store = FakeStore::default();
        let mut collector = connected();
        // act
        let summary = collector
            .collect(&store, source(2, r#"[{"world":"Gaia","status":"online"}]"#))
            .await?;

        // assert
        assert_eq!(
            vec![r#"{"version":2,"items":[{"world":"Gaia","status":"online"}]}"#.to_owned()],
            *store.rows.borrow()
        );
        assert_eq!(1, store.executions.get());
        assert_eq!(1, store.refreshes.get());
        assert_eq!(RunState::Done, collector.state());
        assert_eq!(
            RunSummary {
                version: 2,
                items: 1,
                inserted: 1
            },
            summary
        );
        Ok(())
    }

    #[tokio::test]
    async fn collect_keeps_item_count_and_order() -> anyhow::Result<()> {
        // arrange
        let store = FakeStore::default();
        let mut collector = connected();
        let body = r#"[{"world":"Cactuar"},{"world":"Balmung"},{"world":"Faerie"},{"world":"Adamantoise"}]"#;
        // act
        let summary = collector.collect(&store, source(1, body)).await?;

        // assert
        assert_eq!(4, summary.items);
        let rows = store.rows.borrow();
        let value: serde_json::Value = serde_json::from_str(&rows[0])?;
        assert_eq!(serde_json::from_str::<serde_json::Value>(body)?, value["items"]);
        assert_eq!(1, value["version"]);
        Ok(())
    }

    #[tokio::test]
    async fn collect_fetch_failure_inserts_nothing() -> anyhow::Result<()> {
        // arrange
        let store = FakeStore::default();
        let mut collector = connected();
        // act
        let res = collector
            .collect(&store, || {
                Ok(FakeSource {
                    version: 1,
                    body: None,
                })
            })
            .await;

        // assert
        let err = res.expect_err("fetch should fail");
        assert_eq!(Stage::Fetch, err.stage);
        assert_eq!(0, store.executions.get());
        assert_eq!(0, store.refreshes.get());
        assert_eq!(RunState::Failed, collector.state());
        Ok(())
    }

    #[tokio::test]
    async fn collect_undecodable_response_inserts_nothing() -> anyhow::Result<()> {
        // arrange
        let store = FakeStore::default();
        let mut collector = connected();
        // act
        let res = collector
            .collect(&store, source(1, r#"{"worlds":[]}"#))
            .await;

        // assert
        let err = res.expect_err("fetch should fail");
        assert_eq!(Stage::Fetch, err.stage);
        assert!(matches!(err.source, Error::JsonError(_)));
        assert_eq!(0, store.executions.get());
        Ok(())
    }

    #[tokio::test]
    async fn collect_refresh_failure_keeps_row() -> anyhow::Result<()> {
        // arrange
        let store = FakeStore {
            fail_refresh: true,
            ..Default::default()
        };
        let mut collector = connected();
        // act
        let res = collector
            .collect(&store, source(1, r#"[{"world":"Gaia"}]"#))
            .await;

        // assert
        let err = res.expect_err("refresh should fail");
        assert_eq!(Stage::Refresh, err.stage);
        assert!(err
            .to_string()
            .starts_with("could not refresh materialized view"));
        assert_eq!(1, store.rows.borrow().len());
        assert_eq!(RunState::Failed, collector.state());
        Ok(())
    }

    #[tokio::test]
    async fn collect_insert_failure_skips_refresh() -> anyhow::Result<()> {
        // arrange
        let store = FakeStore {
            fail_insert: true,
            ..Default::default()
        };
        let mut collector = connected();
        // act
        let res = collector
            .collect(&store, source(1, r#"[{"world":"Gaia"}]"#))
            .await;

        // assert
        let err = res.expect_err("insert should fail");
        assert_eq!(Stage::Insert, err.stage);
        assert_eq!(1, store.executions.get());
        assert!(store.rows.borrow().is_empty());
        assert_eq!(0, store.refreshes.get());
        Ok(())
    }

    #[tokio::test]
    async fn collect_prepare_failure_skips_client() -> anyhow::Result<()> {
        // arrange
        let store = FakeStore {
            fail_prepare: true,
            ..Default::default()
        };
        let created = Cell::new(false);
        let mut collector = connected();
        // act
        let res = collector
            .collect(&store, || {
                created.set(true);
                Ok(FakeSource {
                    version: 1,
                    body: Some("[]"),
                })
            })
            .await;

        // assert
        let err = res.expect_err("prepare should fail");
        assert_eq!(Stage::Prepare, err.stage);
        assert!(!created.get());
        assert_eq!(RunState::Failed, collector.state());
        Ok(())
    }

    #[tokio::test]
    async fn collect_client_failure() -> anyhow::Result<()> {
        // arrange
        let store = FakeStore::default();
        let mut collector = connected();
        // act
        let res = collector
            .collect(&store, || WorldStatusClient::new("ftp://example.com/worlds"))
            .await;

        // assert
        let err = res.expect_err("client should fail");
        assert_eq!(Stage::Client, err.stage);
        assert!(matches!(err.source, Error::InvalidUrl));
        assert_eq!(0, store.executions.get());
        Ok(())
    }

    #[tokio::test]
    async fn run_config_failure_stops_before_connect() -> anyhow::Result<()> {
        // arrange
        let mut collector = Collector::new();
        let lookup = |key: &str| match key {
            CONNECTION_STRING_FILE_ENV => Ok(String::new()),
            _ => Err(VarError::NotPresent),
        };
        // act
        let res = collector.run_with(lookup).await;

        // assert
        let err = res.expect_err("config should fail");
        assert_eq!(Stage::Config, err.stage);
        assert!(matches!(err.source, Error::EmptyEnv(CONNECTION_STRING_FILE_ENV)));
        assert_eq!(RunState::Failed, collector.state());
        Ok(())
    }

    #[tokio::test]
    async fn run_missing_api_url_is_config_failure() -> anyhow::Result<()> {
        // arrange
        let mut collector = Collector::new();
        let lookup = |key: &str| match key {
            CONNECTION_STRING_FILE_ENV => Ok("/run/secrets/pg".to_owned()),
            _ => Err(VarError::NotPresent),
        };
        // act
        let res = collector.run_with(lookup).await;

        // assert
        let err = res.expect_err("config should fail");
        assert_eq!(Stage::Config, err.stage);
        assert!(matches!(err.source, Error::EmptyEnv(API_URL_ENV)));
        Ok(())
    }

    #[tokio::test]
    async fn run_passes_connection_string_to_connect() -> anyhow::Result<()> {
        // arrange
        let mut file = tempfile::NamedTempFile::new()?;
        writeln!(file, "host=db bogus=1")?;
        let path = file.path().to_string_lossy().into_owned();
        let mut collector = Collector::new();
        let lookup = move |key: &str| match key {
            CONNECTION_STRING_FILE_ENV => Ok(path.clone()),
            API_URL_ENV => Ok("https://status.example.com/worlds".to_owned()),
            _ => Err(VarError::NotPresent),
        };
        // act
        let res = collector.run_with(lookup).await;

        // assert
        let err = res.expect_err("connect should fail");
        assert_eq!(Stage::Connect, err.stage);
        assert!(matches!(err.source, Error::InvalidConnectionString(_)));
        assert_eq!(RunState::Failed, collector.state());
        Ok(())
    }
}

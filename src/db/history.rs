use crate::db::{connstring::ConnectSettings, HistoryStore, InsertStatement};
use crate::models::{Error, Payload};
use sqlx::{
    pool::PoolConnection,
    postgres::{PgPoolOptions, PgStatement},
    types::Json,
    Executor, Pool, Postgres, Statement,
};

pub const INSERT_SQL: &str = "INSERT INTO ffxiv.worldstatus_history (
        worldstatus_timestamp,
        worldstatus_data
    ) VALUES (
        current_timestamp,
        $1::jsonb
    )";

pub const REFRESH_SQL: &str = "REFRESH MATERIALIZED VIEW ffxiv.worldstatus_v1_materialized";

#[derive(Debug)]
pub struct PgHistoryStore {
    pool: Pool<Postgres>,
}

impl PgHistoryStore {
    pub async fn connect(settings: ConnectSettings) -> Result<Self, Error> {
        // one connection holds the prepared insert, the other runs the refresh
        let mut pool_options = PgPoolOptions::new().max_connections(2);
        if let Some(timeout) = settings.connect_timeout {
            pool_options = pool_options.acquire_timeout(timeout);
        }
        let pool = pool_options.connect_with(settings.options).await?;
        Ok(Self { pool })
    }
}

/// The insert, prepared on a connection checked out of the pool.
#[derive(Debug)]
pub struct PgInsertStatement {
    conn: PoolConnection<Postgres>,
    statement: PgStatement<'static>,
}

impl HistoryStore for PgHistoryStore {
    type Insert = PgInsertStatement;

    async fn prepare_insert(&self) -> Result<PgInsertStatement, Error> {
        let mut conn = self.pool.acquire().await?;
        let statement = (&mut *conn).prepare(INSERT_SQL).await?;
        Ok(PgInsertStatement { conn, statement })
    }

    async fn refresh_view(&self) -> Result<(), Error> {
        sqlx::query(REFRESH_SQL).execute(&self.pool).await?;
        Ok(())
    }
}

impl InsertStatement for PgInsertStatement {
    async fn execute(self, payload: &Payload) -> Result<u64, Error> {
        let PgInsertStatement {
            mut conn,
            statement,
        } = self;
        let res = statement
            .query()
            .bind(Json(payload.as_raw()))
            .execute(&mut *conn)
            .await?;
        Ok(res.rows_affected())
    }
}

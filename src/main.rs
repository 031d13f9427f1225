use std::process::ExitCode;

use dotenv::dotenv;
use models::RunError;
use tracing::Instrument;

mod db;
mod models;
mod otel;
mod services;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    dotenv().ok();
    let _telemetry = otel::init();

    let mut collector = services::Collector::new();
    let res = collector
        .run()
        .instrument(tracing::info_span!("collect"))
        .await;

    match res {
        Ok(summary) => {
            tracing::info!(
                { version = summary.version, items = summary.items, inserted = summary.inserted },
                "done"
            );
            ExitCode::SUCCESS
        }
        Err(err) => {
            tracing::error!({ stage = ?err.stage, state = ?collector.state() }, "{}", report(&err));
            ExitCode::FAILURE
        }
    }
}

fn report(err: &RunError) -> String {
    let mut msg = err.to_string();
    let mut cause = std::error::Error::source(&err.source);
    while let Some(inner) = cause {
        msg.push_str(": ");
        msg.push_str(&inner.to_string());
        cause = inner.source();
    }
    msg
}

#[tokio::test]
async fn report_includes_whole_chain() -> anyhow::Result<()> {
    // arrange
    let err = RunError::new(
        models::Stage::Config,
        models::Error::ReadFile {
            path: "/run/secrets/pg".into(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
        },
    );
    // act
    let msg = report(&err);

    // assert
    assert_eq!(
        "could not load configuration: could not read file \"/run/secrets/pg\": no such file",
        msg
    );
    Ok(())
}

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::trace::TracerProvider;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

pub const SERVICE_NAME: &str = env!("CARGO_PKG_NAME");

const DEFAULT_FILTER: &str = "worldstatus_history=info,sqlx=warn";

/// Flushes exported spans when dropped at the end of `main`.
pub struct TelemetryGuard {
    provider: Option<TracerProvider>,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.provider.take() {
            for res in provider.force_flush() {
                if let Err(err) = res {
                    tracing::warn!("span export failed {:?}", err);
                }
            }
        }
    }
}

pub fn init() -> TelemetryGuard {
    let exporter = std::env::var("OTEL_TRACES_EXPORTER").ok();
    let provider = stdout_enabled(exporter.as_deref()).then(|| {
        TracerProvider::builder()
            .with_simple_exporter(opentelemetry_stdout::SpanExporter::default())
            .build()
    });
    let otel_layer = provider
        .as_ref()
        .map(|provider| tracing_opentelemetry::layer().with_tracer(provider.tracer(SERVICE_NAME)));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_FILTER.into()),
        )
        .with(otel_layer)
        .with(tracing_subscriber::fmt::layer())
        .init();

    TelemetryGuard { provider }
}

fn stdout_enabled(exporter: Option<&str>) -> bool {
    exporter.is_some_and(|value| value.split(',').any(|e| e.trim() == "stdout"))
}

#[tokio::test]
async fn stdout_enabled_from_env_value() -> anyhow::Result<()> {
    // act & assert
    assert!(stdout_enabled(Some("stdout")));
    assert!(stdout_enabled(Some("otlp, stdout")));
    assert!(!stdout_enabled(Some("otlp")));
    assert!(!stdout_enabled(Some("")));
    assert!(!stdout_enabled(None));
    Ok(())
}

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use super::Error;

/// One world record as returned by the status API.
///
/// The record is kept as raw JSON so it is stored exactly as received.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorldStatus(Box<RawValue>);

impl WorldStatus {
    #[cfg(test)]
    pub fn as_json(&self) -> &str {
        self.0.get()
    }
}

/// Snapshot persisted once per run.
#[derive(Debug, Serialize)]
pub struct HistoryRow {
    version: i64,
    items: Vec<WorldStatus>,
}

impl HistoryRow {
    pub fn new(version: i64, items: Vec<WorldStatus>) -> Self {
        Self { version, items }
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    pub fn items(&self) -> &[WorldStatus] {
        &self.items
    }

    pub fn to_payload(&self) -> Result<Payload, Error> {
        let raw = serde_json::value::to_raw_value(self)?;
        Ok(Payload(raw))
    }
}

/// Serialized `HistoryRow`, bound as the `jsonb` insert parameter.
#[derive(Debug)]
pub struct Payload(Box<RawValue>);

impl Payload {
    pub fn as_raw(&self) -> &RawValue {
        &self.0
    }

    pub fn as_str(&self) -> &str {
        self.0.get()
    }
}

#[tokio::test]
async fn payload_matches_wire_shape() -> anyhow::Result<()> {
    // arrange
    let items: Vec<WorldStatus> = serde_json::from_str(r#"[{"world":"Gaia","status":"online"}]"#)?;
    let row = HistoryRow::new(2, items);
    // act
    let payload = row.to_payload()?;

    // assert
    assert_eq!(
        r#"{"version":2,"items":[{"world":"Gaia","status":"online"}]}"#,
        payload.as_str()
    );
    Ok(())
}

#[tokio::test]
async fn payload_keeps_item_order() -> anyhow::Result<()> {
    // arrange
    let body = r#"[{"world":"Zalera"},{"world":"Adamantoise"},{"world":"Midgardsormr"}]"#;
    let items: Vec<WorldStatus> = serde_json::from_str(body)?;
    let row = HistoryRow::new(1, items);
    // act
    let payload = row.to_payload()?;
    let value: serde_json::Value = serde_json::from_str(payload.as_str())?;

    // assert
    let worlds: Vec<&str> = value["items"]
        .as_array()
        .map(|items| items.iter().filter_map(|i| i["world"].as_str()).collect())
        .unwrap_or_default();
    assert_eq!(vec!["Zalera", "Adamantoise", "Midgardsormr"], worlds);
    assert_eq!(1, value["version"]);
    Ok(())
}

#[tokio::test]
async fn payload_with_no_items() -> anyhow::Result<()> {
    // arrange
    let row = HistoryRow::new(1, Vec::new());
    // act
    let payload = row.to_payload()?;

    // assert
    assert_eq!(r#"{"version":1,"items":[]}"#, payload.as_str());
    Ok(())
}

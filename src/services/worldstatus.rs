use crate::{
    models::{Error, WorldStatus},
    services::StatusSource,
};
use bytes::Bytes;
use http_body_util::{BodyExt, Empty};
use hyper::{header, Method, Request, StatusCode, Uri};
use hyper_tls::HttpsConnector;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
#[allow(unused_imports)]
use tracing::{debug, error, info, warn};

/// Format version of the world status records this client understands.
pub const VERSION: i64 = 1;

const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

pub struct WorldStatusClient {
    client: Client<HttpsConnector<HttpConnector>, Empty<Bytes>>,
    uri: Uri,
}

impl WorldStatusClient {
    pub fn new(api_url: &str) -> Result<Self, Error> {
        let uri = Uri::try_from(api_url).map_err(|_| Error::InvalidUrl)?;
        match uri.scheme_str() {
            Some("http") | Some("https") => {}
            _ => return Err(Error::InvalidUrl),
        }
        if uri.host().map_or(true, str::is_empty) {
            return Err(Error::InvalidUrl);
        }
        let client = Client::builder(TokioExecutor::new()).build(HttpsConnector::new());
        Ok(Self { client, uri })
    }

    #[cfg(test)]
    pub fn uri(&self) -> &Uri {
        &self.uri
    }
}

impl StatusSource for WorldStatusClient {
    fn version(&self) -> i64 {
        VERSION
    }

    async fn world_status(&self) -> Result<Vec<WorldStatus>, Error> {
        let req = Request::builder()
            .method(Method::GET)
            .uri(self.uri.clone())
            .header(header::ACCEPT, "application/json")
            .header(header::USER_AGENT, USER_AGENT)
            .body(Empty::<Bytes>::new())?;
        let response = self.client.request(req).await?;
        let status = response.status();
        debug!({ uri = %self.uri, status = status.as_u16() }, "response");
        let collected = response.into_body().collect().await?;
        decode(status, &collected.to_bytes())
    }
}

fn decode(status: StatusCode, body: &[u8]) -> Result<Vec<WorldStatus>, Error> {
    if !status.is_success() {
        return Err(Error::UnexpectedStatus(status));
    }
    let worlds = serde_json::from_slice::<Vec<WorldStatus>>(body)?;
    Ok(worlds)
}

#[tokio::test]
async fn client_new_ok() -> anyhow::Result<()> {
    // act
    let client = WorldStatusClient::new("https://status.example.com/api/worlds")?;

    // assert
    assert_eq!(Some("status.example.com"), client.uri().host());
    assert_eq!(VERSION, client.version());
    Ok(())
}

#[tokio::test]
async fn client_new_invalid_url() -> anyhow::Result<()> {
    for url in ["", "not a url", "/api/worlds", "ftp://example.com/worlds"] {
        // act
        let res = WorldStatusClient::new(url);

        // assert
        assert!(matches!(res, Err(Error::InvalidUrl)), "{url:?}");
    }
    Ok(())
}

#[tokio::test]
async fn decode_keeps_order_and_content() -> anyhow::Result<()> {
    // arrange
    let body = br#"[{"world":"Gaia","status":"online"},{"world":"Ultros","status":"maintenance","congested":true}]"#;
    // act
    let worlds = decode(StatusCode::OK, body)?;

    // assert
    assert_eq!(2, worlds.len());
    assert_eq!(r#"{"world":"Gaia","status":"online"}"#, worlds[0].as_json());
    assert_eq!(
        r#"{"world":"Ultros","status":"maintenance","congested":true}"#,
        worlds[1].as_json()
    );
    Ok(())
}

#[tokio::test]
async fn decode_empty_list() -> anyhow::Result<()> {
    // act
    let worlds = decode(StatusCode::OK, b"[]")?;

    // assert
    assert!(worlds.is_empty());
    Ok(())
}

#[tokio::test]
async fn decode_unexpected_status() -> anyhow::Result<()> {
    // act
    let res = decode(StatusCode::SERVICE_UNAVAILABLE, b"[]");

    // assert
    assert!(matches!(
        res,
        Err(Error::UnexpectedStatus(status)) if status == StatusCode::SERVICE_UNAVAILABLE
    ));
    Ok(())
}

#[tokio::test]
async fn decode_not_an_array() -> anyhow::Result<()> {
    for body in [&b"{\"worlds\":[]}"[..], b"<html></html>", b""] {
        // act
        let res = decode(StatusCode::OK, body);

        // assert
        assert!(matches!(res, Err(Error::JsonError(_))));
    }
    Ok(())
}

use std::{iter::Peekable, str::Chars, str::FromStr, time::Duration};

use sqlx::postgres::{PgConnectOptions, PgSslMode};
use tokio_postgres::config::Host;
#[allow(unused_imports)]
use tracing::{debug, error, info, warn};

use crate::models::Error;

/// Keywords configuring the TLS connector. `tokio_postgres` leaves these to
/// its TLS crates, so they are applied to the sqlx options directly.
const TLS_KEYWORDS: [&str; 4] = ["sslmode", "sslcert", "sslkey", "sslrootcert"];

#[derive(Debug)]
pub struct ConnectSettings {
    pub options: PgConnectOptions,
    pub connect_timeout: Option<Duration>,
}

/// Parses a connection string in either URI or keyword/value form.
///
/// Surrounding whitespace, including the trailing newline most secret files
/// carry, is ignored.
pub fn parse(s: &str, application_name: &str) -> Result<ConnectSettings, Error> {
    let s = s.trim();
    if s.is_empty() {
        return Err(invalid("empty connection string".into()));
    }
    if s.starts_with("postgres://") || s.starts_with("postgresql://") {
        let mut options =
            PgConnectOptions::from_str(s).map_err(|err| invalid(format!("invalid uri: {err}")))?;
        if options.get_application_name().is_none() {
            options = options.application_name(application_name);
        }
        return Ok(ConnectSettings {
            options,
            connect_timeout: None,
        });
    }

    let (rest, tls) = split_tls(s)?;
    let config = tokio_postgres::Config::from_str(&rest).map_err(|err| invalid(err.to_string()))?;
    let mut options = from_config(&config, application_name)?;
    for (key, value) in tls {
        options = match key {
            "sslmode" => {
                let mode = PgSslMode::from_str(&value)
                    .map_err(|_| invalid(format!("invalid sslmode {value:?}")))?;
                options.ssl_mode(mode)
            }
            "sslcert" => options.ssl_client_cert(&value),
            "sslkey" => options.ssl_client_key(&value),
            _ => options.ssl_root_cert(&value),
        };
    }
    Ok(ConnectSettings {
        options,
        connect_timeout: config.get_connect_timeout().copied(),
    })
}

fn from_config(
    config: &tokio_postgres::Config,
    application_name: &str,
) -> Result<PgConnectOptions, Error> {
    let mut options = PgConnectOptions::new();
    // libpq connects to hostaddr when both are given
    if let Some(addr) = config.get_hostaddrs().first() {
        options = options.host(&addr.to_string());
    } else if let Some(host) = config.get_hosts().first() {
        options = match host {
            Host::Tcp(host) => options.host(host),
            #[cfg(unix)]
            Host::Unix(path) => options.socket(path),
            #[allow(unreachable_patterns)]
            _ => options,
        };
    }
    if config.get_hosts().len() > 1 || config.get_hostaddrs().len() > 1 {
        warn!("multiple hosts configured, only the first is used");
    }
    if let Some(port) = config.get_ports().first() {
        options = options.port(*port);
    }
    if let Some(user) = config.get_user() {
        options = options.username(user);
    }
    if let Some(password) = config.get_password() {
        let password = std::str::from_utf8(password)
            .map_err(|_| invalid("password is not valid UTF-8".into()))?;
        options = options.password(password);
    }
    if let Some(dbname) = config.get_dbname() {
        options = options.database(dbname);
    }
    if let Some(raw) = config.get_options() {
        options = options.options(server_options(raw)?);
    }
    let name = config.get_application_name().unwrap_or(application_name);
    Ok(options.application_name(name))
}

/// Splits `-c name=value` / `--name=value` startup options into pairs.
fn server_options(raw: &str) -> Result<Vec<(String, String)>, Error> {
    let mut pairs = Vec::new();
    let mut words = raw.split_whitespace();
    while let Some(word) = words.next() {
        let setting = match word {
            "-c" => words.next(),
            _ => word.strip_prefix("--").or_else(|| word.strip_prefix("-c")),
        }
        .ok_or_else(|| invalid(format!("unsupported server option {word:?}")))?;
        let (name, value) = setting
            .split_once('=')
            .ok_or_else(|| invalid(format!("server option without value {setting:?}")))?;
        pairs.push((name.to_owned(), value.to_owned()));
    }
    Ok(pairs)
}

/// Moves the TLS keywords out of a keyword/value string. Everything else is
/// passed on untouched for `tokio_postgres` to parse.
fn split_tls(s: &str) -> Result<(String, Vec<(&'static str, String)>), Error> {
    let mut rest = Vec::new();
    let mut tls = Vec::new();
    let mut chars = s.chars().peekable();
    loop {
        skip_whitespace(&mut chars);
        if chars.peek().is_none() {
            break;
        }
        let mut key = String::new();
        while let Some(c) = chars.next_if(|c| *c != '=' && !c.is_whitespace()) {
            key.push(c);
        }
        skip_whitespace(&mut chars);
        if chars.next_if_eq(&'=').is_none() {
            return Err(invalid(format!("missing \"=\" after {key:?}")));
        }
        skip_whitespace(&mut chars);
        let (raw, value) = read_value(&mut chars, &key)?;
        match TLS_KEYWORDS.iter().find(|k| **k == key) {
            Some(keyword) => tls.push((*keyword, value)),
            None => rest.push(format!("{key}={raw}")),
        }
    }
    Ok((rest.join(" "), tls))
}

/// Returns the value as written and unquoted.
fn read_value(chars: &mut Peekable<Chars<'_>>, key: &str) -> Result<(String, String), Error> {
    let mut raw = String::new();
    let mut value = String::new();
    let quoted = chars.next_if_eq(&'\'').is_some();
    if quoted {
        raw.push('\'');
    }
    loop {
        let Some(c) = chars.peek().copied() else {
            if quoted {
                return Err(invalid(format!("unterminated quoted value for {key:?}")));
            }
            break;
        };
        if !quoted && c.is_whitespace() {
            break;
        }
        chars.next();
        raw.push(c);
        match c {
            '\\' => {
                if let Some(escaped) = chars.next() {
                    raw.push(escaped);
                    value.push(escaped);
                }
            }
            '\'' if quoted => break,
            _ => value.push(c),
        }
    }
    Ok((raw, value))
}

fn skip_whitespace(chars: &mut Peekable<Chars<'_>>) {
    while chars.next_if(|c| c.is_whitespace()).is_some() {}
}

fn invalid(msg: String) -> Error {
    Error::InvalidConnectionString(msg)
}

#[tokio::test]
async fn parse_keywords_simple() -> anyhow::Result<()> {
    // act
    let settings = parse("host=db user=x dbname=y\n", "test")?;

    // assert
    let options = &settings.options;
    assert_eq!("db", options.get_host());
    assert_eq!("x", options.get_username());
    assert_eq!(Some("y"), options.get_database());
    assert_eq!(Some("test"), options.get_application_name());
    assert_eq!(None, settings.connect_timeout);
    Ok(())
}

#[tokio::test]
async fn parse_keywords_quoted_and_spaced() -> anyhow::Result<()> {
    // act
    let settings = parse(
        "  host = db  port=5433 password='it\\'s a secret' application_name='world status'",
        "test",
    )?;

    // assert
    let options = &settings.options;
    assert_eq!("db", options.get_host());
    assert_eq!(5433, options.get_port());
    assert_eq!(Some("world status"), options.get_application_name());
    Ok(())
}

#[tokio::test]
async fn parse_keywords_connect_timeout() -> anyhow::Result<()> {
    // act
    let settings = parse("host=db user=x dbname=y connect_timeout=10", "test")?;

    // assert
    assert_eq!(Some(Duration::from_secs(10)), settings.connect_timeout);
    Ok(())
}

#[tokio::test]
async fn parse_keywords_server_options() -> anyhow::Result<()> {
    // act
    let settings = parse(
        "host=db options='-c search_path=ffxiv --statement_timeout=5000'",
        "test",
    )?;

    // assert
    assert_eq!(
        Some("-c search_path=ffxiv -c statement_timeout=5000"),
        settings.options.get_options()
    );
    Ok(())
}

#[tokio::test]
async fn parse_keywords_tls_files() -> anyhow::Result<()> {
    // act
    let settings = parse(
        "host=db sslmode=verify-full sslrootcert=/etc/pg/root.crt sslcert='/etc/pg/client cert.crt' sslkey=/etc/pg/client.key",
        "test",
    )?;

    // assert
    assert_eq!("db", settings.options.get_host());
    assert!(matches!(
        settings.options.get_ssl_mode(),
        PgSslMode::VerifyFull
    ));
    Ok(())
}

#[tokio::test]
async fn parse_keywords_hostaddr_wins_over_host() -> anyhow::Result<()> {
    // act
    let settings = parse("host=db hostaddr=10.0.0.5 user=x", "test")?;

    // assert
    assert_eq!("10.0.0.5", settings.options.get_host());
    Ok(())
}

#[tokio::test]
async fn parse_keywords_other_libpq_options() -> anyhow::Result<()> {
    // act & assert
    assert!(parse("host=db target_session_attrs=read-write keepalives=1", "test").is_ok());
    Ok(())
}

#[cfg(unix)]
#[tokio::test]
async fn parse_keywords_unix_socket() -> anyhow::Result<()> {
    // act
    let settings = parse("host=/var/run/postgresql dbname=y", "test")?;

    // assert
    assert_eq!(
        Some(&std::path::PathBuf::from("/var/run/postgresql")),
        settings.options.get_socket()
    );
    Ok(())
}

#[tokio::test]
async fn parse_keywords_err() -> anyhow::Result<()> {
    for s in [
        "host",
        "host db",
        "port=abc",
        "port=70000",
        "password='open",
        "bogus=1",
        "sslmode=sometimes",
        "options='-x'",
    ] {
        // act
        let res = parse(s, "test");

        // assert
        assert!(
            matches!(res, Err(Error::InvalidConnectionString(_))),
            "{s:?}"
        );
    }
    Ok(())
}

#[tokio::test]
async fn parse_uri() -> anyhow::Result<()> {
    // act
    let plain = parse("postgres://x:secret@db:5432/y\n", "test")?;
    let named = parse("postgresql://db/y?application_name=other", "test")?;

    // assert
    assert_eq!("db", plain.options.get_host());
    assert_eq!(Some("test"), plain.options.get_application_name());
    assert_eq!(Some("other"), named.options.get_application_name());
    Ok(())
}

#[tokio::test]
async fn parse_rejects_empty() -> anyhow::Result<()> {
    // act & assert
    assert!(matches!(
        parse(" \n", "test"),
        Err(Error::InvalidConnectionString(_))
    ));
    Ok(())
}

use std::{
    env::VarError,
    fmt,
    path::{Path, PathBuf},
};

use super::Error;

pub const CONNECTION_STRING_FILE_ENV: &str = "POSTGRESQL_CONNECTION_STRING_FILE";
pub const API_URL_ENV: &str = "WORLDSTATUS_API_URL";

pub struct Settings {
    pub connection_string: String,
    pub api_url: String,
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("connection_string", &"<redacted>")
            .field("api_url", &self.api_url)
            .finish()
    }
}

impl Settings {
    /// Environment variables are all checked before the connection string
    /// file is touched.
    pub async fn load_with<F>(lookup: F) -> Result<Settings, Error>
    where
        F: Fn(&str) -> Result<String, VarError>,
    {
        let path = read_env(CONNECTION_STRING_FILE_ENV, &lookup)?;
        let api_url = read_env(API_URL_ENV, &lookup)?;
        let connection_string = read_text_file(Path::new(&path)).await?;
        Ok(Settings {
            connection_string,
            api_url,
        })
    }
}

pub fn read_env<F>(key: &'static str, lookup: F) -> Result<String, Error>
where
    F: Fn(&str) -> Result<String, VarError>,
{
    let value = match lookup(key) {
        Ok(value) => value,
        Err(VarError::NotPresent) => return Err(Error::EmptyEnv(key)),
        Err(VarError::NotUnicode(_)) => return Err(Error::NotUnicodeEnv(key)),
    };
    if value != value.trim() {
        return Err(Error::PaddedEnv(key));
    }
    if value.is_empty() {
        return Err(Error::EmptyEnv(key));
    }
    Ok(value)
}

pub async fn read_text_file(path: &Path) -> Result<String, Error> {
    let content = tokio::fs::read(path).await.map_err(|source| Error::ReadFile {
        path: path.to_path_buf(),
        source,
    })?;
    String::from_utf8(content).map_err(|_| Error::InvalidUtf8(PathBuf::from(path)))
}

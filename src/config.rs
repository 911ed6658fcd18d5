use anyhow::{Context, Result, bail};
use clap::Parser;
use std::{env, str::FromStr, time::Duration};
use url::Url;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    /// The single bucket every facade call works against.
    pub bucket: String,
    /// Base URL native object links are rendered under. Always `https`;
    /// TLS is terminated by a proxy in front of this listener.
    pub public_url: String,
    pub signing_secret: Option<String>,
    /// Bearer token guarding upload, delete and presign. Unset disables them.
    pub api_token: Option<String>,
    /// Upper bound on every storage call.
    pub timeout: Duration,
    pub max_upload_bytes: usize,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Object storage facade with shareable links")]
pub struct Args {
    /// Host to bind to (overrides OBJECT_LINKS_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides OBJECT_LINKS_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where objects are stored (overrides OBJECT_LINKS_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides OBJECT_LINKS_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Bucket name (overrides OBJECT_LINKS_BUCKET)
    #[arg(long)]
    pub bucket: Option<String>,

    /// Base URL for native object links (overrides OBJECT_LINKS_PUBLIC_URL)
    #[arg(long)]
    pub public_url: Option<String>,

    /// Storage call timeout in milliseconds (overrides OBJECT_LINKS_TIMEOUT_MS)
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Largest accepted upload in bytes (overrides OBJECT_LINKS_MAX_UPLOAD_BYTES)
    #[arg(long)]
    pub max_upload_bytes: Option<usize>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let migrate = args.migrate;
        Ok((Self::merge(args, |name| env::var(name))?, migrate))
    }

    /// Merge CLI args over values looked up with `var`.
    ///
    /// The signing secret and API token are only read from the environment so
    /// they never show up in process listings.
    pub fn merge<F>(args: Args, var: F) -> Result<Self>
    where
        F: Fn(&str) -> Result<String, env::VarError>,
    {
        let lookup = |name: &str| -> Result<Option<String>> {
            match var(name) {
                Ok(value) => Ok(Some(value)),
                Err(env::VarError::NotPresent) => Ok(None),
                Err(err) => Err(err).with_context(|| format!("reading {}", name)),
            }
        };

        // --- Environment fallback ---
        let env_host = lookup("OBJECT_LINKS_HOST")?.unwrap_or_else(|| "0.0.0.0".into());
        let env_port = parse_var::<u16, _>(&lookup, "OBJECT_LINKS_PORT")?.unwrap_or(3000);
        let env_storage =
            lookup("OBJECT_LINKS_STORAGE_DIR")?.unwrap_or_else(|| "./data/objects".into());
        let env_db = lookup("OBJECT_LINKS_DATABASE_URL")?
            .unwrap_or_else(|| "sqlite://./data/meta/object_links.db".into());
        let env_bucket = lookup("OBJECT_LINKS_BUCKET")?.unwrap_or_else(|| "uploads".into());
        let env_public_url = lookup("OBJECT_LINKS_PUBLIC_URL")?;
        let env_timeout = parse_var::<u64, _>(&lookup, "OBJECT_LINKS_TIMEOUT_MS")?.unwrap_or(30_000);
        let env_max_upload =
            parse_var::<usize, _>(&lookup, "OBJECT_LINKS_MAX_UPLOAD_BYTES")?.unwrap_or(25 * 1024 * 1024);
        let signing_secret = lookup("OBJECT_LINKS_SIGNING_SECRET")?.filter(|s| !s.is_empty());
        let api_token = lookup("OBJECT_LINKS_API_TOKEN")?.filter(|s| !s.is_empty());

        // --- Merge ---
        let host = args.host.unwrap_or(env_host);
        let port = args.port.unwrap_or(env_port);
        let public_url = args
            .public_url
            .or(env_public_url)
            .unwrap_or_else(|| format!("https://{}:{}/objects", display_host(&host), port));
        check_public_url(&public_url)?;

        Ok(Self {
            host,
            port,
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            database_url: args.database_url.unwrap_or(env_db),
            bucket: args.bucket.unwrap_or(env_bucket),
            public_url,
            signing_secret,
            api_token,
            timeout: Duration::from_millis(args.timeout_ms.unwrap_or(env_timeout)),
            max_upload_bytes: args.max_upload_bytes.unwrap_or(env_max_upload),
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_var<T, L>(lookup: &L, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    L: Fn(&str) -> Result<Option<String>>,
{
    lookup(name)?
        .map(|value| {
            value
                .parse::<T>()
                .with_context(|| format!("parsing {} value `{}`", name, value))
        })
        .transpose()
}

/// Direct links are always `https`, so the base they are rendered under must be
/// too.
fn check_public_url(public_url: &str) -> Result<()> {
    let url = Url::parse(public_url)
        .with_context(|| format!("parsing public url `{}`", public_url))?;
    if url.scheme() != "https" {
        bail!(
            "public url `{}` must use https; put a TLS-terminating proxy in front of the listener",
            public_url
        );
    }
    Ok(())
}

/// Wildcard bind addresses are not reachable hosts; links use localhost.
fn display_host(host: &str) -> &str {
    match host {
        "0.0.0.0" | "::" => "localhost",
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Result<String, env::VarError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned().ok_or(env::VarError::NotPresent)
    }

    #[test]
    fn defaults_apply_without_env_or_args() {
        let cfg = AppConfig::merge(Args::default(), env_of(&[])).unwrap();
        assert_eq!(cfg.addr(), "0.0.0.0:3000");
        assert_eq!(cfg.bucket, "uploads");
        assert_eq!(cfg.public_url, "https://localhost:3000/objects");
        assert_eq!(cfg.timeout, Duration::from_secs(30));
        assert!(cfg.signing_secret.is_none());
        assert!(cfg.api_token.is_none());
    }

    #[test]
    fn args_override_environment() {
        let env = env_of(&[
            ("OBJECT_LINKS_PORT", "8080"),
            ("OBJECT_LINKS_BUCKET", "from-env"),
            ("OBJECT_LINKS_TIMEOUT_MS", "1500"),
            ("OBJECT_LINKS_SIGNING_SECRET", "hunter2"),
            ("OBJECT_LINKS_API_TOKEN", "t0ken"),
        ]);
        let args = Args {
            bucket: Some("from-args".into()),
            ..Default::default()
        };
        let cfg = AppConfig::merge(args, env).unwrap();
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.bucket, "from-args");
        assert_eq!(cfg.timeout, Duration::from_millis(1500));
        assert_eq!(cfg.signing_secret.as_deref(), Some("hunter2"));
        assert_eq!(cfg.api_token.as_deref(), Some("t0ken"));
        assert_eq!(cfg.public_url, "https://localhost:8080/objects");
    }

    #[test]
    fn plain_http_public_url_is_refused() {
        let err = AppConfig::merge(
            Args::default(),
            env_of(&[("OBJECT_LINKS_PUBLIC_URL", "http://files.example.test/objects")]),
        )
        .unwrap_err();
        assert!(err.to_string().contains("must use https"), "{err:#}");

        let args = Args {
            public_url: Some("not a url".into()),
            ..Default::default()
        };
        assert!(AppConfig::merge(args, env_of(&[])).is_err());

        let cfg = AppConfig::merge(
            Args::default(),
            env_of(&[("OBJECT_LINKS_PUBLIC_URL", "https://files.example.test/objects")]),
        )
        .unwrap();
        assert_eq!(cfg.public_url, "https://files.example.test/objects");
    }

    #[test]
    fn bad_numbers_name_the_variable() {
        let err = AppConfig::merge(Args::default(), env_of(&[("OBJECT_LINKS_PORT", "eighty")]))
            .unwrap_err();
        assert!(format!("{:#}", err).contains("OBJECT_LINKS_PORT"));
    }
}

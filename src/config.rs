use anyhow::{Context, Result, bail};
use clap::Parser;
use std::{env, str::FromStr, time::Duration};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    pub source_bucket: String,
    pub copy_bucket: String,
    pub tracked_bucket: String,
    pub plot_bucket: String,
    pub public_url: String,
    pub max_copies: usize,
    pub grace_period: Duration,
    pub sweep_interval: Duration,
    pub alarm_threshold: i64,
    pub alarm_period: Duration,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Object store with copy replication and size alarms")]
pub struct Args {
    /// Host to bind to (overrides REPLICATOR_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides REPLICATOR_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where objects are stored (overrides REPLICATOR_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides REPLICATOR_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Bucket whose objects are replicated (overrides REPLICATOR_SOURCE_BUCKET)
    #[arg(long)]
    pub source_bucket: Option<String>,

    /// Bucket receiving copies (overrides REPLICATOR_COPY_BUCKET)
    #[arg(long)]
    pub copy_bucket: Option<String>,

    /// Bucket whose size is tracked and alarmed on (overrides REPLICATOR_TRACKED_BUCKET)
    #[arg(long)]
    pub tracked_bucket: Option<String>,

    /// Bucket the size plot is written to; must differ from the tracked
    /// bucket (overrides REPLICATOR_PLOT_BUCKET)
    #[arg(long)]
    pub plot_bucket: Option<String>,

    /// Base URL used when returning plot links (overrides REPLICATOR_PUBLIC_URL)
    #[arg(long)]
    pub public_url: Option<String>,

    /// Retained copies per source object (overrides REPLICATOR_MAX_COPIES)
    #[arg(long)]
    pub max_copies: Option<usize>,

    /// Seconds a disowned copy survives (overrides REPLICATOR_GRACE_PERIOD_SECS)
    #[arg(long)]
    pub grace_period_secs: Option<u64>,

    /// Seconds between sweeps (overrides REPLICATOR_SWEEP_INTERVAL_SECS)
    #[arg(long)]
    pub sweep_interval_secs: Option<u64>,

    /// Size-delta sum that trips the alarm (overrides REPLICATOR_ALARM_THRESHOLD)
    #[arg(long)]
    pub alarm_threshold: Option<i64>,

    /// Alarm evaluation window in seconds (overrides REPLICATOR_ALARM_PERIOD_SECS)
    #[arg(long)]
    pub alarm_period_secs: Option<u64>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let migrate = args.migrate;
        let cfg = Self::resolve(args, |name| env::var(name))?;
        Ok((cfg, migrate))
    }

    /// Merge `args` over the variables `lookup` returns. Separated from
    /// process state so it can be exercised directly.
    pub fn resolve<F>(args: Args, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Result<String, env::VarError>,
    {
        let string_or = |name: &str, default: &str| -> Result<String> {
            match lookup(name) {
                Ok(value) => Ok(value),
                Err(env::VarError::NotPresent) => Ok(default.to_string()),
                Err(err) => Err(err).with_context(|| format!("reading {}", name)),
            }
        };
        let required = |flag: Option<String>, name: &str| -> Result<String> {
            match flag {
                Some(value) => Ok(value),
                None => match lookup(name) {
                    Ok(value) if !value.trim().is_empty() => Ok(value),
                    Ok(_) | Err(env::VarError::NotPresent) => {
                        bail!("missing required configuration {}", name)
                    }
                    Err(err) => Err(err).with_context(|| format!("reading {}", name)),
                },
            }
        };

        let host = match args.host {
            Some(host) => host,
            None => string_or("REPLICATOR_HOST", "0.0.0.0")?,
        };
        let port = match args.port {
            Some(port) => port,
            None => parsed_or(&lookup, "REPLICATOR_PORT", 3000)?,
        };
        let storage_dir = match args.storage_dir {
            Some(dir) => dir,
            None => string_or("REPLICATOR_STORAGE_DIR", "./data/objects")?,
        };
        let database_url = match args.database_url {
            Some(url) => url,
            None => string_or("REPLICATOR_DATABASE_URL", "sqlite://./data/meta/replicator.db")?,
        };

        let source_bucket = required(args.source_bucket, "REPLICATOR_SOURCE_BUCKET")?;
        let copy_bucket = required(args.copy_bucket, "REPLICATOR_COPY_BUCKET")?;
        let tracked_bucket = required(args.tracked_bucket, "REPLICATOR_TRACKED_BUCKET")?;
        let plot_bucket = match args.plot_bucket {
            Some(bucket) => bucket,
            None => string_or("REPLICATOR_PLOT_BUCKET", &format!("{}-plots", tracked_bucket))?,
        };
        let public_url = match args.public_url {
            Some(url) => url,
            None => string_or("REPLICATOR_PUBLIC_URL", &format!("http://{}:{}", host, port))?,
        };

        let max_copies = match args.max_copies {
            Some(n) => n,
            None => parsed_or(&lookup, "REPLICATOR_MAX_COPIES", 3)?,
        };
        let grace_period_secs = match args.grace_period_secs {
            Some(secs) => secs,
            None => parsed_or(&lookup, "REPLICATOR_GRACE_PERIOD_SECS", 10)?,
        };
        let sweep_interval_secs = match args.sweep_interval_secs {
            Some(secs) => secs,
            None => parsed_or(&lookup, "REPLICATOR_SWEEP_INTERVAL_SECS", 60)?,
        };
        let alarm_threshold = match args.alarm_threshold {
            Some(threshold) => threshold,
            None => parsed_or(&lookup, "REPLICATOR_ALARM_THRESHOLD", 20)?,
        };
        let alarm_period_secs = match args.alarm_period_secs {
            Some(secs) => secs,
            None => parsed_or(&lookup, "REPLICATOR_ALARM_PERIOD_SECS", 10)?,
        };

        if source_bucket == copy_bucket {
            bail!("source and copy buckets must differ (both `{}`)", source_bucket);
        }
        // A plot written into the tracked bucket counts as a size change and
        // would be removed by the cleaner it triggers.
        if plot_bucket == tracked_bucket {
            bail!("plot and tracked buckets must differ (both `{}`)", plot_bucket);
        }
        if max_copies == 0 {
            bail!("REPLICATOR_MAX_COPIES must be at least 1");
        }
        if sweep_interval_secs == 0 || alarm_period_secs == 0 {
            bail!("sweep interval and alarm period must be at least one second");
        }

        Ok(Self {
            host,
            port,
            storage_dir,
            database_url,
            source_bucket,
            copy_bucket,
            tracked_bucket,
            plot_bucket,
            public_url,
            max_copies,
            grace_period: Duration::from_secs(grace_period_secs),
            sweep_interval: Duration::from_secs(sweep_interval_secs),
            alarm_threshold,
            alarm_period: Duration::from_secs(alarm_period_secs),
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Every bucket the service must have before it starts handling events.
    pub fn buckets(&self) -> Vec<&str> {
        let mut buckets = vec![
            self.source_bucket.as_str(),
            self.copy_bucket.as_str(),
            self.tracked_bucket.as_str(),
            self.plot_bucket.as_str(),
        ];
        buckets.sort_unstable();
        buckets.dedup();
        buckets
    }
}

fn parsed_or<T, F>(lookup: &F, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Result<String, env::VarError>,
{
    match lookup(name) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Result<String, env::VarError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned().ok_or(env::VarError::NotPresent)
    }

    const BUCKETS: [(&str, &str); 3] = [
        ("REPLICATOR_SOURCE_BUCKET", "bucket-src"),
        ("REPLICATOR_COPY_BUCKET", "bucket-dst"),
        ("REPLICATOR_TRACKED_BUCKET", "bucket-src"),
    ];

    #[test]
    fn defaults_follow_observed_constants() {
        let cfg = AppConfig::resolve(Args::default(), lookup(&BUCKETS)).unwrap();
        assert_eq!(cfg.max_copies, 3);
        assert_eq!(cfg.grace_period, Duration::from_secs(10));
        assert_eq!(cfg.sweep_interval, Duration::from_secs(60));
        assert_eq!(cfg.alarm_threshold, 20);
        assert_eq!(cfg.plot_bucket, "bucket-src-plots");
        assert_eq!(cfg.public_url, "http://0.0.0.0:3000");
        assert_eq!(
            cfg.buckets(),
            vec!["bucket-dst", "bucket-src", "bucket-src-plots"]
        );
    }

    #[test]
    fn missing_bucket_is_fatal() {
        let err = AppConfig::resolve(Args::default(), lookup(&BUCKETS[..2])).unwrap_err();
        assert!(err.to_string().contains("REPLICATOR_TRACKED_BUCKET"));
    }

    #[test]
    fn flags_override_environment() {
        let args = Args {
            port: Some(8080),
            max_copies: Some(5),
            ..Args::default()
        };
        let mut vars = BUCKETS.to_vec();
        vars.push(("REPLICATOR_PORT", "9000"));
        vars.push(("REPLICATOR_MAX_COPIES", "2"));

        let cfg = AppConfig::resolve(args, lookup(&vars)).unwrap();
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.max_copies, 5);
    }

    #[test]
    fn unparsable_numbers_are_rejected() {
        let mut vars = BUCKETS.to_vec();
        vars.push(("REPLICATOR_GRACE_PERIOD_SECS", "ten"));
        assert!(AppConfig::resolve(Args::default(), lookup(&vars)).is_err());
    }

    #[test]
    fn plot_bucket_cannot_be_the_tracked_bucket() {
        let mut vars = BUCKETS.to_vec();
        vars.push(("REPLICATOR_PLOT_BUCKET", "bucket-src"));
        let err = AppConfig::resolve(Args::default(), lookup(&vars)).unwrap_err();
        assert!(err.to_string().contains("plot and tracked buckets must differ"));
    }

    #[test]
    fn source_and_copy_must_differ() {
        let vars = [
            ("REPLICATOR_SOURCE_BUCKET", "same"),
            ("REPLICATOR_COPY_BUCKET", "same"),
            ("REPLICATOR_TRACKED_BUCKET", "same"),
        ];
        assert!(AppConfig::resolve(Args::default(), lookup(&vars)).is_err());
    }
}

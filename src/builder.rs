use std::env;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::thread;
use std::time::Duration;

use indexmap::IndexMap;
use tokio::runtime;
use tokio::sync::mpsc;

use crate::client::InfluxClient;
use crate::collector::{run_exporter, Collector};
use crate::common::BuildError;

/// The background flush task, returned by [`InfluxBuilder::build`] for
/// callers that want to spawn it themselves.
pub type ExporterFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

const DEFAULT_WRITE_ENDPOINT: &str = "http://localhost:8086/write";
const DEFAULT_DATABASE: &str = "metrics";
const DEFAULT_SUBMISSION_INTERVAL: Duration = Duration::from_millis(5000);
const DEFAULT_MAX_BATCH_SIZE: usize = 1000;

/// Builder for creating and installing an InfluxDB [`Collector`].
pub struct InfluxBuilder {
    write_endpoint: String,
    database: String,
    submission_interval: Duration,
    max_batch_size: usize,
    default_tags: IndexMap<String, String>,
    auth: Option<(String, String)>,
}

impl InfluxBuilder {
    /// Creates a new [`InfluxBuilder`].
    pub fn new() -> Self {
        Self {
            write_endpoint: DEFAULT_WRITE_ENDPOINT.to_string(),
            database: DEFAULT_DATABASE.to_string(),
            submission_interval: DEFAULT_SUBMISSION_INTERVAL,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            default_tags: IndexMap::new(),
            auth: None,
        }
    }

    /// Creates a builder pre-configured from the process environment.
    ///
    /// Recognized variables: `INFLUX_SCHEME`, `INFLUX_HOST` and
    /// `INFLUX_PORT` compose the write endpoint (defaults `http`,
    /// `localhost`, `8086`); `INFLUX_DATABASE` names the database;
    /// `INFLUX_USER`/`INFLUX_PASSWORD` configure authentication. The
    /// `HOSTNAME`, `ENVIRONMENT` and `SERVICE` variables become the
    /// `hostname`, `environment` and `service` default tags when set.
    pub fn from_env() -> Self {
        let mut builder = Self::new();

        let scheme = env::var("INFLUX_SCHEME").unwrap_or_else(|_| "http".to_string());
        let host = env::var("INFLUX_HOST").unwrap_or_else(|_| "localhost".to_string());
        let port = env::var("INFLUX_PORT").unwrap_or_else(|_| "8086".to_string());
        builder.write_endpoint = format!("{scheme}://{host}:{port}/write");

        if let Ok(database) = env::var("INFLUX_DATABASE") {
            builder.database = database;
        }
        if let Ok(username) = env::var("INFLUX_USER") {
            let password = env::var("INFLUX_PASSWORD").unwrap_or_default();
            builder.auth = Some((username, password));
        }

        for (variable, tag) in [
            ("HOSTNAME", "hostname"),
            ("ENVIRONMENT", "environment"),
            ("SERVICE", "service"),
        ] {
            if let Ok(value) = env::var(variable) {
                if !value.is_empty() {
                    builder.default_tags.insert(tag.to_string(), value);
                }
            }
        }

        builder
    }

    /// Sets the full write endpoint URL, e.g. `http://influx:8086/write`.
    #[must_use]
    pub fn with_write_endpoint<T>(mut self, endpoint: T) -> Self
    where
        T: Into<String>,
    {
        self.write_endpoint = endpoint.into();
        self
    }

    /// Sets the database measurements are written into.
    #[must_use]
    pub fn set_database<T>(mut self, database: T) -> Self
    where
        T: Into<String>,
    {
        self.database = database.into();
        self
    }

    /// Sets the period of the flush scheduler.
    ///
    /// Defaults to 5000 milliseconds.
    #[must_use]
    pub fn set_submission_interval(mut self, interval: Duration) -> Self {
        self.submission_interval = interval;
        self
    }

    /// Sets the number of measurements submitted in a single write.
    ///
    /// Reaching this many pending measurements also triggers an
    /// out-of-cycle flush. Defaults to 1000.
    #[must_use]
    pub fn set_max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size;
        self
    }

    /// Adds a default tag applied to every measurement.
    ///
    /// Tags set on the measurement itself have precedence over default
    /// tags. If this method is called multiple times, the latest value for
    /// a given tag key will be used.
    #[must_use]
    pub fn add_default_tag<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.default_tags.insert(key.into(), value.into());
        self
    }

    /// Sets credentials for authenticated writes.
    ///
    /// The password never appears in logs or in this builder's `Debug`
    /// output.
    #[must_use]
    pub fn set_authentication<U, P>(mut self, username: U, password: P) -> Self
    where
        U: Into<String>,
        P: Into<String>,
    {
        self.auth = Some((username.into(), password.into()));
        self
    }

    /// Builds the collector handle and the exporter future and returns
    /// them both.
    ///
    /// Most users should prefer [`install`][InfluxBuilder::install]. This
    /// method exists for callers that need to schedule the exporter in a
    /// particular way.
    ///
    /// ## Errors
    ///
    /// Configuration is validated here, before any measurement can be
    /// recorded: the endpoint must parse as a URL and database, interval
    /// and batch size must be non-empty/non-zero.
    pub fn build(self) -> Result<(Collector, ExporterFuture), BuildError> {
        if self.database.is_empty() {
            return Err(BuildError::EmptyDatabase);
        }
        if self.submission_interval.is_zero() {
            return Err(BuildError::ZeroSubmissionInterval);
        }
        if self.max_batch_size == 0 {
            return Err(BuildError::ZeroMaxBatchSize);
        }

        let client = InfluxClient::new(&self.write_endpoint, &self.database, self.auth)?;

        let (control_tx, control_rx) = mpsc::channel(8);
        let collector = Collector::new(self.default_tags, self.max_batch_size, control_tx);
        let exporter = run_exporter(
            collector.inner(),
            client,
            self.submission_interval,
            control_rx,
        );

        Ok((collector, Box::pin(exporter)))
    }

    /// Builds the collector and spawns the exporter.
    ///
    /// When called from within a Tokio runtime, the exporter future is
    /// spawned directly into that runtime. Otherwise, a new
    /// single-threaded Tokio runtime is created on a background thread and
    /// the exporter runs there.
    ///
    /// Returns the [`Collector`] handle to pass to request-handling code;
    /// there is no process-global state.
    ///
    /// ## Errors
    ///
    /// If there is an error while either building the collector and
    /// exporter or creating the background runtime, an error variant will
    /// be returned describing the error.
    pub fn install(self) -> Result<Collector, BuildError> {
        if let Ok(handle) = runtime::Handle::try_current() {
            let (collector, exporter) = {
                let _g = handle.enter();
                self.build()?
            };
            handle.spawn(exporter);
            Ok(collector)
        } else {
            let runtime = runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(|e| BuildError::FailedToCreateRuntime(e.to_string()))?;

            let (collector, exporter) = {
                let _g = runtime.enter();
                self.build()?
            };

            thread::Builder::new()
                .name("metrics-exporter-influxdb".to_string())
                .spawn(move || runtime.block_on(exporter))
                .map_err(|e| BuildError::FailedToCreateRuntime(e.to_string()))?;

            Ok(collector)
        }
    }
}

impl Default for InfluxBuilder {
    fn default() -> Self {
        InfluxBuilder::new()
    }
}

impl fmt::Debug for InfluxBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InfluxBuilder")
            .field("write_endpoint", &self.write_endpoint)
            .field("database", &self.database)
            .field("submission_interval", &self.submission_interval)
            .field("max_batch_size", &self.max_batch_size)
            .field("default_tags", &self.default_tags)
            .field(
                "auth",
                &self.auth.as_ref().map(|(user, _)| (user.as_str(), "********")),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::InfluxBuilder;
    use crate::common::BuildError;
    use std::time::Duration;

    #[tokio::test]
    async fn test_build_rejects_bad_configuration() {
        let err = InfluxBuilder::new().set_database("").build().err().unwrap();
        assert!(matches!(err, BuildError::EmptyDatabase));

        let err = InfluxBuilder::new()
            .set_submission_interval(Duration::ZERO)
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, BuildError::ZeroSubmissionInterval));

        let err = InfluxBuilder::new()
            .set_max_batch_size(0)
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, BuildError::ZeroMaxBatchSize));

        let err = InfluxBuilder::new()
            .with_write_endpoint("not a url")
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, BuildError::InvalidWriteEndpoint(_)));
    }

    #[tokio::test]
    async fn test_build_succeeds_with_defaults() {
        let (collector, _exporter) = InfluxBuilder::new().build().unwrap();
        assert_eq!(collector.pending(), 0);
    }

    #[test]
    fn test_debug_output_masks_the_password() {
        let builder = InfluxBuilder::new().set_authentication("scott", "tiger");
        let debugged = format!("{builder:?}");
        assert!(debugged.contains("scott"));
        assert!(debugged.contains("********"));
        assert!(!debugged.contains("tiger"));
    }

    #[test]
    fn test_from_env_composes_endpoint_and_tags() {
        // All of the environment-driven configuration in one test; test
        // binaries run tests in parallel and these variables are shared
        // process state.
        std::env::set_var("INFLUX_SCHEME", "https");
        std::env::set_var("INFLUX_HOST", "influx.example.com");
        std::env::set_var("INFLUX_PORT", "8087");
        std::env::set_var("INFLUX_DATABASE", "requests");
        std::env::set_var("INFLUX_USER", "scott");
        std::env::set_var("INFLUX_PASSWORD", "tiger");
        std::env::set_var("ENVIRONMENT", "staging");
        std::env::set_var("SERVICE", "api");

        let builder = InfluxBuilder::from_env();
        assert_eq!(
            builder.write_endpoint,
            "https://influx.example.com:8087/write"
        );
        assert_eq!(builder.database, "requests");
        assert_eq!(
            builder.auth,
            Some(("scott".to_string(), "tiger".to_string()))
        );
        assert_eq!(builder.default_tags.get("environment").unwrap(), "staging");
        assert_eq!(builder.default_tags.get("service").unwrap(), "api");

        for variable in [
            "INFLUX_SCHEME",
            "INFLUX_HOST",
            "INFLUX_PORT",
            "INFLUX_DATABASE",
            "INFLUX_USER",
            "INFLUX_PASSWORD",
            "ENVIRONMENT",
            "SERVICE",
        ] {
            std::env::remove_var(variable);
        }
    }
}

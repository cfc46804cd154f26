//! Provides a builder which is used to set up and start the system.
//!
//! Next to the [Registry] which contains all parsers, inputs, indexes and outputs, the system
//! consists of a few optional parts (logging, signal handling, the input monitor and the HTTP
//! servers). A builder permits to selectively enable or disable them, which is mostly handy
//! for tests.
//!
//! # Example
//! ```no_run
//! # use rods::builder::Builder;
//! # use rods::config::Config;
//! # use rods::registry::Registry;
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("rods.yaml").await?;
//!     let platform = Builder::new().enable_all().build(&config).await?;
//!     let registry = platform.require::<Registry>();
//!
//!     platform.terminated().await;
//!     registry.close();
//!
//!     Ok(())
//! }
//! ```
use std::sync::Arc;

use crate::config::services::ServiceConfig;
use crate::config::Config;
use crate::platform::Platform;
use crate::registry::Registry;
use crate::server::{Server, Servers};
use crate::watch::Monitor;
use crate::{init_logging, RODS_REVISION, RODS_VERSION};

/// Initializes the system by creating and starting all components.
#[derive(Default)]
pub struct Builder {
    setup_logging: bool,
    verbose: bool,
    enable_signals: bool,
    enable_watch: bool,
    setup_servers: bool,
}

impl Builder {
    /// Creates a new builder with all features disabled.
    pub fn new() -> Self {
        Builder::default()
    }

    /// Enables all features.
    pub fn enable_all(mut self) -> Self {
        self.setup_logging = true;
        self.enable_signals = true;
        self.enable_watch = true;
        self.setup_servers = true;

        self
    }

    /// Enables the automatic setup of the logging system.
    ///
    /// Using this, we properly initialize **simplelog** to log to stdout. The date format being
    /// used is digestible by established tools like **greylog**.
    pub fn enable_logging(mut self) -> Self {
        self.setup_logging = true;
        self
    }

    /// Disables the automatic setup of the logging system.
    pub fn disable_logging(mut self) -> Self {
        self.setup_logging = false;
        self
    }

    /// Determines if debug messages (e.g. each request) are logged.
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Installs a signal listener which terminates the platform once **CTRL-C** or **SIGHUP**
    /// is received.
    ///
    /// For more details see: [signals](crate::signals)
    pub fn enable_signals(mut self) -> Self {
        self.enable_signals = true;
        self
    }

    /// Disables installing the signal listener.
    pub fn disable_signals(mut self) -> Self {
        self.enable_signals = false;
        self
    }

    /// Monitors the files of all inputs.
    ///
    /// For more details see: [watch](crate::watch)
    pub fn enable_watch(mut self) -> Self {
        self.enable_watch = true;
        self
    }

    /// Disables monitoring the files of all inputs.
    pub fn disable_watch(mut self) -> Self {
        self.enable_watch = false;
        self
    }

    /// Binds and starts a [Server](crate::server::Server) per configured service.
    pub fn enable_servers(mut self) -> Self {
        self.setup_servers = true;
        self
    }

    /// Disables starting the servers.
    pub fn disable_servers(mut self) -> Self {
        self.setup_servers = false;
        self
    }

    /// Builds the [Registry] for the given config and starts all enabled components.
    ///
    /// The registry is available via `platform.require::<Registry>()` and the servers via
    /// `platform.require::<Servers>()`. Note that building the registry also builds all indexes
    /// and may therefore take a while.
    pub async fn build(self, config: &Config) -> anyhow::Result<Arc<Platform>> {
        let platform = Platform::new();

        if self.setup_logging {
            init_logging(self.verbose);
        }

        log::info!(
            "||. RODS (v {} - rev {}) running on {} core(s) in {} CPU(s)",
            RODS_VERSION,
            RODS_REVISION,
            num_cpus::get(),
            num_cpus::get_physical()
        );

        if self.enable_signals {
            crate::signals::install(platform.clone());
        }

        let registry = {
            let config = config.clone();
            Arc::new(tokio::task::spawn_blocking(move || Registry::new(&config)).await??)
        };
        platform.register(registry.clone());

        if self.enable_watch {
            crate::watch::install(platform.clone(), Monitor::new(registry.inputs()));
        }

        if self.setup_servers {
            let mut servers = Vec::with_capacity(config.services.len());
            for (name, service) in &config.services {
                let ServiceConfig::Http(http) = service;
                let server = Server::bind(name, http, &registry, &platform).await?;
                Server::fork(&server);
                servers.push(server);
            }

            if servers.is_empty() {
                log::warn!("No services are configured. No output can be reached!");
            }
            platform.register(Arc::new(Servers::new(servers)));
        }

        Ok(platform)
    }
}

#[cfg(test)]
mod tests {
    use crate::builder::Builder;
    use crate::config::Config;
    use crate::inputs::testing::resource;
    use crate::registry::Registry;
    use crate::server::Servers;
    use crate::testing::test_async;

    #[test]
    fn all_components_are_registered() {
        test_async(async {
            let config = Config::load_from_string(&format!(
                "
sources:
  data: {{ type: filesystem, path: \"{}\" }}
inputs:
  users: {{ type: csv, source: data, file: users.csv, ignoreFirstRow: true, columns: [id, name] }}
outputs:
  users: {{ type: jsonArray, endpoint: /users, input: users }}
services:
  api: {{ type: http }}
",
                resource("").display()
            ))
            .unwrap();

            let platform = Builder::new()
                .enable_watch()
                .enable_servers()
                .build(&config)
                .await
                .unwrap();

            let registry = platform.require::<Registry>();
            assert!(registry.output("users").is_some());
            let servers = platform.require::<Servers>();
            assert_eq!(servers.servers().len(), 1);
            assert_ne!(servers.find("api").unwrap().local_addr().port(), 0);

            platform.terminate();
            registry.close();
            assert!(platform.find::<Registry>().is_none());
        });
    }

    #[test]
    fn failures_are_reported() {
        test_async(async {
            let config = Config::load_from_string(
                "inputs: { users: { type: json, source: data, file: users.json } }",
            )
            .unwrap();

            assert!(Builder::new().build(&config).await.is_err());
        });
    }
}

//! Rods is a read-only query server which exposes CSV, XML and JSON files as JSON endpoints via
//! HTTP.
//!
//! # Introduction
//! Lots of master data is delivered as plain files: product catalogs as XML, price lists as CSV
//! or event feeds as JSON. **Rods** makes such files queryable without importing them into a
//! database. A single YAML config describes where the files are located, how their values are
//! parsed, which indexes are built and which endpoints are exposed. The files themselves are
//! never loaded into memory as a whole. Records are addressed by their position within the file
//! and loaded on demand.
//!
//! # Pipeline
//! * **Parsers** convert raw strings into typed [values](record::Value). See [parsers].
//! * **Inputs** read records from CSV, JSON or XML files. See [inputs].
//! * **Indexes** find the positions of all records matching a set of filters. Results of several
//!   indexes are intersected lazily, so that even large result sets never have to be kept in
//!   memory. See [indexes].
//! * **Relationships** join records of other inputs into each delivered record, recursively.
//!   See [relationships].
//! * **Outputs** turn HTTP requests into queries and stream the resulting records as JSON. See
//!   [outputs].
//!
//! All of these are created by the [Registry](registry::Registry) from a
//! [Config](config::Config). The [Builder](builder::Builder) then starts the HTTP
//! [servers](server) and keeps everything in a [Platform](platform::Platform) until the system
//! is shut down.
//!
//! # Example
//! A minimal config which serves a CSV file:
//! ```yaml
//! sources:
//!   data: { type: filesystem, path: ./data }
//! inputs:
//!   users: { type: csv, source: data, file: users.csv, ignoreFirstRow: true, columns: [id, name] }
//! indexes:
//!   users_by_id: { type: map, input: users, properties: [id] }
//! outputs:
//!   users: { type: jsonArray, endpoint: /users, input: users }
//!   user:
//!     type: jsonObject
//!     endpoint: /user/?
//!     input: users
//!     parameters: [ { name: id, index: users_by_id } ]
//! services:
//!   api: { type: http, listen: 127.0.0.1:8080 }
//! ```
//!
//! Now `GET /users?limit=10` delivers the first ten users and `GET /user/42` the user with id 42.
#![warn(
    missing_docs,
    trivial_casts,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_import_braces,
    unused_results
)]
use simplelog::{format_description, ConfigBuilder, LevelFilter, SimpleLogger};
use std::sync::Once;

pub mod builder;
pub mod config;
pub mod fmt;
pub mod indexes;
pub mod inputs;
pub mod outputs;
pub mod parsers;
pub mod platform;
pub mod record;
pub mod registry;
pub mod relationships;
pub mod request;
pub mod response;
pub mod server;
pub mod signals;
pub mod watch;

/// Contains the version of the Rods library.
pub const RODS_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Contains the git commit hash of the Rods build being used.
pub const RODS_REVISION: &str = match option_env!("RODS_REVISION") {
    Some(revision) => revision,
    None => "NO-REVISION",
};

/// Initializes the logging system.
///
/// Messages are logged at **Info** level, or at **Debug** level if `verbose` is set. Note that
/// most probably the simplest way is to use a [Builder](builder::Builder) to set up the system,
/// which will also set up logging if enabled.
pub fn init_logging(verbose: bool) {
    static INIT_LOGGING: Once = Once::new();

    // We need to do this as otherwise the integration tests might crash as the logging system
    // is initialized several times...
    INIT_LOGGING.call_once(|| {
        let level = if verbose {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        };

        if let Err(error) = SimpleLogger::init(
            level,
            ConfigBuilder::new()
                .set_time_format_custom(format_description!(
                    "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]"
                ))
                .set_thread_level(LevelFilter::Trace)
                .set_target_level(LevelFilter::Error)
                .set_location_level(LevelFilter::Trace)
                .build(),
        ) {
            eprintln!("Failed to initialize logging system: {}", error);
        }
    });
}

/// Provides a simple macro to execute an async lambda within `tokio::spawn`.
///
/// Note that this also applies std::mem::drop on the returned closure to make
/// clippy happy.
///
/// # Example
/// ```rust
/// # #[macro_use] extern crate rods;
/// # #[tokio::main]
/// # async fn main() {
/// spawn!(async move {
///     // perform some async stuff here...
/// });
/// # }
/// ```
#[macro_export]
macro_rules! spawn {
    ($e:expr) => {{
        std::mem::drop(tokio::spawn($e));
    }};
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    lazy_static::lazy_static! {
        /// Provides a global lock which has to be acquired if a test operates on shared
        /// resources like a server socket. Using this lock, we can still execute all other
        /// tests in parallel and only block if required.
        pub static ref SHARED_TEST_RESOURCES: Mutex<()> = Mutex::new(());
    }

    /// Executes async code within a single threaded tokio runtime.
    pub fn test_async<F: std::future::Future>(future: F) {
        use tokio::runtime;

        let rt = runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        let _ = rt.block_on(future);
    }
}

//! Represents the JSON response of an output.
//!
//! Outputs write their result into a [Response] which buffers the data in memory and hands it
//! over to a [ResponseSink] in chunks of about 8 kB. The sink is either connected to an HTTP
//! connection ([ChannelResponse]) or simply collects everything in memory ([BufferedResponse]).
//!
//! The status of the response is only committed once the first chunk is handed over. Until then,
//! an error can still be reported properly (with an appropriate status and a JSON body like
//! `{"error": "..."}`). Once the response has been committed, an error can only abort the
//! transfer, so that the client observes a truncated body.
//!
//! # Example
//!
//! ```
//! # use rods::response::{BufferedResponse, OutputError, Response};
//! # use hyper::StatusCode;
//! # fn main() -> Result<(), OutputError> {
//! let mut sink = BufferedResponse::new();
//! let mut response = Response::new(&mut sink);
//! response.raw(b"[")?;
//! response.json(&vec![1, 2, 3])?;
//! response.raw(b"]")?;
//! response.complete()?;
//!
//! assert_eq!(sink.status(), Some(StatusCode::OK));
//! assert_eq!(sink.body_string(), "[[1,2,3]]");
//! # Ok(())
//! # }
//! ```
use crate::indexes::{Cancellation, Cancelled};
use bytes::{BufMut, Bytes, BytesMut};
use hyper::StatusCode;
use std::error::Error;
use std::fmt::{Display, Formatter};
use tokio::sync::{mpsc, oneshot};

/// Determines the size of the chunks handed over to a sink.
const CHUNK_SIZE: usize = 8192;

/// Enumerates the errors which can occur while handling a request.
///
/// A **ClientError** signals that the request itself was invalid (e.g. a parameter couldn't be
/// parsed). **NotFound** is reported if a single record has been requested which doesn't exist.
/// A **ServerError** signals an unexpected problem like a failure when reading a file. Finally,
/// an **IOError** occurs if the response cannot be transferred, most probably as the client went
/// away.
#[derive(Debug)]
pub enum OutputError {
    /// Represents an invalid request.
    ClientError(anyhow::Error),
    /// Represents a request for a record which doesn't exist.
    NotFound(anyhow::Error),
    /// Represents an internal error.
    ServerError(anyhow::Error),
    /// Represents a failure when transferring the response.
    IOError(anyhow::Error),
}

/// Provides a simple way of creating an **OutputError** which represents a **ClientError**.
///
/// # Example
///
/// ```
/// # use rods::response::OutputError;
/// fn check(limit: i64) -> Result<(), OutputError> {
///     if limit <= 0 {
///         Err(rods::client_error!("The limit {} is invalid", limit))
///     } else {
///         Ok(())
///     }
/// }
///
/// assert!(check(-1).is_err());
/// ```
#[macro_export]
macro_rules! client_error {
    ($err:expr $(,)?) => ({
        $crate::response::OutputError::ClientError(anyhow::anyhow!($err))
    });
    ($fmt:expr, $($arg:tt)*) => {
        $crate::response::OutputError::ClientError(anyhow::anyhow!($fmt, $($arg)*))
    };
}

/// Provides a simple way of creating an **OutputError** which represents a **ServerError**.
#[macro_export]
macro_rules! server_error {
    ($err:expr $(,)?) => ({
        $crate::response::OutputError::ServerError(anyhow::anyhow!($err))
    });
    ($fmt:expr, $($arg:tt)*) => {
        $crate::response::OutputError::ServerError(anyhow::anyhow!($fmt, $($arg)*))
    };
}

impl OutputError {
    /// Returns the HTTP status which is reported for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            OutputError::ClientError(_) => StatusCode::BAD_REQUEST,
            OutputError::NotFound(_) => StatusCode::NOT_FOUND,
            OutputError::ServerError(_) | OutputError::IOError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Returns the message which is reported to the client.
    pub fn message(&self) -> String {
        match self {
            OutputError::ClientError(error)
            | OutputError::NotFound(error)
            | OutputError::ServerError(error)
            | OutputError::IOError(error) => format!("{:#}", error),
        }
    }
}

impl From<anyhow::Error> for OutputError {
    fn from(error: anyhow::Error) -> OutputError {
        if error.is::<Cancelled>() {
            OutputError::IOError(error)
        } else {
            OutputError::ServerError(error)
        }
    }
}

impl From<serde_json::Error> for OutputError {
    fn from(error: serde_json::Error) -> OutputError {
        OutputError::ServerError(error.into())
    }
}

impl Display for OutputError {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            OutputError::ClientError(e) => write!(f, "Client error: {:#}", e),
            OutputError::NotFound(e) => write!(f, "Not found: {:#}", e),
            OutputError::ServerError(e) => write!(f, "Server error: {:#}", e),
            OutputError::IOError(e) => write!(f, "IO error: {:#}", e),
        }
    }
}

impl Error for OutputError {}

/// Represents the result type for all output operations.
pub type OutputResult<T = ()> = std::result::Result<T, OutputError>;

/// Receives the status and the body of a response.
pub trait ResponseSink {
    /// Commits the response with the given status.
    ///
    /// This is invoked exactly once, before any data is written.
    fn commit(&mut self, status: StatusCode) -> OutputResult;

    /// Transfers a chunk of the body.
    fn write(&mut self, data: Bytes) -> OutputResult;

    /// Aborts a committed response so that the client notices that the body is incomplete.
    fn abort(&mut self, error: &OutputError);

    /// Returns a handle which fires once the client is no longer interested in the response.
    fn cancellation(&self) -> Cancellation {
        Cancellation::never()
    }
}

/// Buffers the JSON output of a handler and forwards it to a [ResponseSink].
pub struct Response<'a> {
    sink: &'a mut dyn ResponseSink,
    cancellation: Cancellation,
    buffer: BytesMut,
    committed: bool,
}

impl<'a> Response<'a> {
    /// Creates a new response which writes into the given sink.
    pub fn new(sink: &'a mut dyn ResponseSink) -> Self {
        Response {
            cancellation: sink.cancellation(),
            sink,
            buffer: BytesMut::with_capacity(CHUNK_SIZE),
            committed: false,
        }
    }

    /// Determines if the status has already been sent.
    pub fn is_committed(&self) -> bool {
        self.committed
    }

    /// Determines if the client went away.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Returns the handle which is used to stop scans once the client went away.
    pub fn cancellation(&self) -> &Cancellation {
        &self.cancellation
    }

    /// Appends the given bytes to the body.
    pub fn raw(&mut self, data: &[u8]) -> OutputResult {
        self.buffer.put_slice(data);
        self.flush_if_full()
    }

    /// Appends the JSON representation of the given value to the body.
    pub fn json<T: serde::Serialize + ?Sized>(&mut self, value: &T) -> OutputResult {
        serde_json::to_writer((&mut self.buffer).writer(), value)?;
        self.flush_if_full()
    }

    fn flush_if_full(&mut self) -> OutputResult {
        if self.buffer.len() >= CHUNK_SIZE {
            self.flush()
        } else {
            Ok(())
        }
    }

    fn flush(&mut self) -> OutputResult {
        if !self.committed {
            self.committed = true;
            self.sink.commit(StatusCode::OK)?;
        }
        if !self.buffer.is_empty() {
            let chunk = self.buffer.split().freeze();
            self.sink.write(chunk)?;
        }

        Ok(())
    }

    /// Completes the response by transferring all buffered data.
    pub fn complete(mut self) -> OutputResult {
        self.flush()
    }

    /// Reports the given error.
    ///
    /// If the response hasn't been committed yet, any buffered data is discarded and the error
    /// is sent as JSON along with the appropriate status. Otherwise the transfer is aborted.
    pub fn fail(mut self, error: &OutputError) {
        if self.committed {
            self.sink.abort(error);
        } else {
            send_error(self.sink, error);
        }
    }
}

/// Sends the given error as complete response.
pub fn send_error(sink: &mut dyn ResponseSink, error: &OutputError) {
    let body = serde_json::json!({ "error": error.message() }).to_string();
    if sink.commit(error.status()).is_ok() {
        let _ = sink.write(Bytes::from(body));
    }
}

/// Collects a response in memory.
///
/// This is mainly used to test outputs without an HTTP connection.
#[derive(Default)]
pub struct BufferedResponse {
    status: Option<StatusCode>,
    body: BytesMut,
    aborted: Option<String>,
    cancelled: bool,
}

impl BufferedResponse {
    /// Creates a new and empty response.
    pub fn new() -> Self {
        BufferedResponse::default()
    }

    /// Returns the committed status.
    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    /// Returns the body as string.
    pub fn body_string(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Parses the body as JSON.
    pub fn body_json(&self) -> anyhow::Result<serde_json::Value> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Returns the error message if the response has been aborted.
    pub fn aborted(&self) -> Option<&str> {
        self.aborted.as_deref()
    }

    /// Behaves as if the client went away before the response is handled.
    pub fn cancel(&mut self) {
        self.cancelled = true;
    }
}

impl ResponseSink for BufferedResponse {
    fn commit(&mut self, status: StatusCode) -> OutputResult {
        if self.status.is_some() {
            return Err(server_error!("The response has already been committed"));
        }
        self.status = Some(status);
        Ok(())
    }

    fn write(&mut self, data: Bytes) -> OutputResult {
        self.body.put_slice(&data);
        Ok(())
    }

    fn abort(&mut self, error: &OutputError) {
        self.aborted = Some(error.message());
    }

    fn cancellation(&self) -> Cancellation {
        if self.cancelled {
            Cancellation::new(|| true)
        } else {
            Cancellation::never()
        }
    }
}

/// Transfers a response from a blocking handler to an async HTTP connection.
///
/// The status is sent via a oneshot channel once the response is committed. The body is sent
/// as a stream of chunks via a bounded channel so that a slow client slows down the handler
/// instead of filling up the memory.
pub struct ChannelResponse {
    head: Option<oneshot::Sender<StatusCode>>,
    body: mpsc::Sender<std::io::Result<Bytes>>,
}

impl ChannelResponse {
    /// Creates a new response which reports into the given channels.
    pub fn new(
        head: oneshot::Sender<StatusCode>,
        body: mpsc::Sender<std::io::Result<Bytes>>,
    ) -> Self {
        ChannelResponse {
            head: Some(head),
            body,
        }
    }
}

impl ResponseSink for ChannelResponse {
    fn commit(&mut self, status: StatusCode) -> OutputResult {
        match self.head.take() {
            Some(head) => head.send(status).map_err(|_| {
                OutputError::IOError(anyhow::anyhow!("The client is no longer connected"))
            }),
            None => Err(server_error!("The response has already been committed")),
        }
    }

    fn write(&mut self, data: Bytes) -> OutputResult {
        self.body.blocking_send(Ok(data)).map_err(|_| {
            OutputError::IOError(anyhow::anyhow!("The client is no longer connected"))
        })
    }

    fn abort(&mut self, error: &OutputError) {
        let _ = self.body.blocking_send(Err(std::io::Error::new(
            std::io::ErrorKind::Other,
            error.message(),
        )));
    }

    fn cancellation(&self) -> Cancellation {
        let body = self.body.clone();
        Cancellation::new(move || body.is_closed())
    }
}

#[cfg(test)]
mod tests {
    use crate::indexes::Cancelled;
    use crate::response::{BufferedResponse, ChannelResponse, OutputError, Response, ResponseSink};
    use crate::testing::test_async;
    use hyper::StatusCode;
    use tokio::sync::{mpsc, oneshot};

    #[test]
    fn errors_are_reported_before_the_response_is_committed() {
        let mut sink = BufferedResponse::new();
        let mut response = Response::new(&mut sink);
        response.raw(b"[").unwrap();
        assert!(!response.is_committed());
        response.fail(&client_error!("The 'limit' parameter must be a positive and non-zero number."));

        assert_eq!(sink.status(), Some(StatusCode::BAD_REQUEST));
        assert_eq!(
            sink.body_string(),
            r#"{"error":"The 'limit' parameter must be a positive and non-zero number."}"#
        );
        assert!(sink.aborted().is_none());
    }

    #[test]
    fn large_responses_are_committed_early() {
        let mut sink = BufferedResponse::new();
        let mut response = Response::new(&mut sink);
        let text = "x".repeat(10_000);
        response.json(&text).unwrap();
        assert!(response.is_committed());
        response.fail(&server_error!("Broken file"));

        assert_eq!(sink.status(), Some(StatusCode::OK));
        assert_eq!(sink.body_string().len(), 10_002);
        assert_eq!(sink.aborted(), Some("Broken file"));
    }

    #[test]
    fn errors_map_to_status_codes() {
        assert_eq!(client_error!("x").status(), StatusCode::BAD_REQUEST);
        assert_eq!(server_error!("x").status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            OutputError::NotFound(anyhow::anyhow!("x")).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            OutputError::from(anyhow::anyhow!("x")).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert!(matches!(
            OutputError::from(anyhow::Error::new(Cancelled)),
            OutputError::IOError(_)
        ));
    }

    #[test]
    fn channel_responses_are_streamed() {
        test_async(async {
            let (head_sender, head_receiver) = oneshot::channel();
            let (body_sender, mut body_receiver) = mpsc::channel(4);

            let handler = tokio::task::spawn_blocking(move || {
                let mut sink = ChannelResponse::new(head_sender, body_sender);
                let mut response = Response::new(&mut sink);
                response.raw(b"{}").unwrap();
                response.complete().unwrap();
            });

            assert_eq!(head_receiver.await.unwrap(), StatusCode::OK);
            assert_eq!(&body_receiver.recv().await.unwrap().unwrap()[..], b"{}");
            handler.await.unwrap();
            assert!(body_receiver.recv().await.is_none());
        });
    }

    #[test]
    fn dropped_clients_cancel_the_response() {
        let (head_sender, head_receiver) = oneshot::channel();
        let (body_sender, body_receiver) = mpsc::channel(4);
        drop(head_receiver);
        drop(body_receiver);

        let mut sink = ChannelResponse::new(head_sender, body_sender);
        assert!(sink.cancellation().is_cancelled());
        assert!(matches!(
            sink.commit(StatusCode::OK),
            Err(OutputError::IOError(_))
        ));
    }
}

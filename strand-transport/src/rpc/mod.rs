//! Request/reply correlation over asynchronous messaging.
//!
//! Replies on a duplex stream arrive through a receive callback, detached
//! from whoever sent the request. The [`Correlator`] joins the two halves:
//!
//! ```rust,ignore
//! // caller
//! let reply = correlator
//!     .call(Duration::from_secs(5), |id| connection.send(Request { id, body }))
//!     .await?;
//!
//! // receive callback
//! fn on_receive(&self, _conn: &Connection<T, Self>, msg: Reply) -> Result<(), HandlerError> {
//!     self.correlator.set(&msg.id, msg.body)?;
//!     Ok(())
//! }
//! ```

mod call_error;
mod correlation_error;
mod correlator;

pub use call_error::CallError;
pub use correlation_error::CorrelationError;
pub use correlator::Correlator;

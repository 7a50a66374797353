//! lsp-server-wrapper library
//!
//! A transparent proxy between an editor and a language server speaking
//! Content-Length framed JSON-RPC over stdio:
//!
//! - `codec` - framing, [`Message`] and its classification
//! - `filter` - the [`Filter`] trait, the fail-open pipeline and the built-in policies
//! - `correlation` - matching responses to the requests that produced them
//! - `wrapper` - the four-pump engine with backpressure and rejection replies
//! - `process` - spawning, wiring and stopping the language server
//! - `config` - TOML configuration
//!
//! # Usage
//!
//! ```ignore
//! use lsp_server_wrapper::{serve_stdio, WrapperConfig};
//!
//! let config = WrapperConfig::load(None)?;
//! let outcome = serve_stdio(&["rust-analyzer".to_string()], &config).await?;
//! std::process::exit(outcome.process_exit_code());
//! ```

pub mod codec;
pub mod config;
pub mod correlation;
pub mod error;
pub mod filter;
pub mod process;
pub mod wrapper;

pub use codec::{read_message, write_message, CodecError, Message, MessageKind};
pub use config::{ConfigError, WrapperConfig};
pub use correlation::{CorrelationTracker, MessageId};
pub use error::WrapperError;
pub use filter::{
    default_filters, run_pipeline, BackpressureFilter, Direction, Filter, FilterContext,
    FilterResult, NulCharFilter,
};
pub use process::{serve, serve_stdio, ServerProcess, SessionOutcome};
pub use wrapper::{
    rejection_response, Pump, StreamPair, Wrapper, REJECT_ERROR_CODE, REJECT_ERROR_MESSAGE,
};

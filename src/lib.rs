//! Discovery and filtering of coastal Izu property listings from a single
//! brokerage site.

pub mod aggregate;
pub mod assemble;
pub mod charset;
pub mod config;
pub mod detail;
pub mod enumerator;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod filter;
pub mod markup;
pub mod model;
pub mod output;
pub mod pipeline;
pub mod robots;
pub mod scorer;
pub mod server;

pub use assemble::{RunReport, RunStats};
pub use config::Config;
pub use error::{FetchError, ParseError, RunError};
pub use fetch::{FetchPool, PageFetcher, ReqwestFetcher};
pub use pipeline::{Pipeline, PipelineEvent};

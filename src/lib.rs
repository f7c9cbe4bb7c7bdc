pub mod config;
pub mod error;
pub mod headers;
pub mod logging;
pub mod providers;
pub mod proxy;
pub mod routing;
pub mod server;
pub mod transcode;
pub mod translate;
pub mod upstream;

pub use config::ProxyConfig;
pub use error::{ProxyError, Result};
pub use logging::{RequestRecord, SharedJournal};
pub use routing::RoutingConfig;
pub use server::{build_router, AppState};
pub use transcode::{StreamMode, StreamSummary, TranscodeStream};
pub use upstream::{ClientRequest, UpstreamDialect};

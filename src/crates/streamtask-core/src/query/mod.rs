//! The batch scheduler (§4.6): tickers plus the `Query` source node that
//! issues a templated query on each tick and converts results to batches.

pub mod node;
pub mod ticker;

pub use node::{spawn, QueryClient, QueryOptions, QueryResponse, QueryResultGroup, QueryTemplate};
pub use ticker::{cron, every, Ticker};

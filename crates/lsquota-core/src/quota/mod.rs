//! Quota monitoring: fetch and parse `GetUserStatus` from a verified
//! language server, optionally on a schedule.

pub mod fetcher;
pub mod parser;
pub mod poller;
pub mod types;

pub use fetcher::{quota_channel, QuotaClient, QuotaError, QuotaSnapshotReceiver, QuotaSnapshotSender};
pub use poller::{Endpoint, QuotaPoller};
pub use types::{ModelQuota, QuotaSnapshot};

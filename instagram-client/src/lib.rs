pub mod api;
pub mod challenge;
pub mod device;
pub mod feed;
pub mod metrics;
pub mod provider;
pub mod session;


pub use api::{classify_failure, AccountInfo, CommentPage, InstagramApiClient, RawComment};
pub use challenge::{ChallengePrompt, ChallengeResponse, TerminalPrompt};
pub use device::DeviceProfile;
pub use feed::LiveCommentFeed;
pub use metrics::{ApiMetrics, MetricsCollector};
pub use provider::InstagramSessionProvider;
pub use session::{DeviceIds, Session};

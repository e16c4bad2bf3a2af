pub mod queue;
pub mod traits;
pub mod types;

pub use queue::RedisJobQueue;
pub use traits::{JobQueue, QueueStats};
pub use types::{ClaimedJob, JobId, JobRecord, JobState};

// External collaborators, specified at their interface boundary
pub mod completion;
pub mod notify;
pub mod publish;
pub mod video;

pub use completion::CompletionService;
pub use notify::{GateNotification, NotificationChannel};
pub use publish::PublishService;
pub use video::{VideoJobStatus, VideoPoll, VideoService};

pub mod binding;
pub mod container;
pub mod enums;
pub mod error;
pub mod group;
pub mod ipc;
pub mod message;
pub mod metrics;
pub mod mount;
pub mod task;
pub mod workspace;

// Re-exports for convenience
pub use binding::{AccessToken, ChannelBinding};
pub use container::{ContainerConfig, ContainerInput, ContainerOutput};
pub use enums::{ChannelType, IpcTaskKind, MessageRole, ScheduleType, TaskStatus};
pub use error::{NanoGridBotError, Result};
pub use group::RegisteredGroup;
pub use ipc::{IpcInput, IpcMessage, IpcTask};
pub use mount::{Allowlist, Mount};
pub use message::Message;
pub use metrics::{ContainerMetric, RequestMetric};
pub use task::ScheduledTask;
pub use workspace::Workspace;

pub mod bindings;
pub mod connection;
pub mod groups;
pub mod messages;
pub mod metrics;
pub mod sessions;
pub mod tasks;
pub mod tokens;
pub mod workspaces;

pub use bindings::BindingRepository;
pub use connection::Database;
pub use groups::GroupRepository;
pub use messages::MessageRepository;
pub use metrics::{ContainerStats, MetricsRepository, RequestStats};
pub use sessions::SessionRepository;
pub use tasks::TaskRepository;
pub use tokens::TokenRepository;
pub use workspaces::WorkspaceRepository;

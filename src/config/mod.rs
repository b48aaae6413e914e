pub mod config_base;
pub mod connection;
pub mod membership;
pub mod request;
pub mod user;

pub use config_base::Config;
pub use connection::{Connection, ConnectionType, SslMode};
pub use membership::{MembershipRequest, ValidatedMembership};
pub use request::{Request, State};
pub use user::{UserRequest, ValidatedUser};

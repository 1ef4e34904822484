pub mod paths;
pub mod settings;

pub use settings::{CredentialMode, DrainConfig, GatewayConfig, ServerConfig, SessionConfig, SshDefaults};

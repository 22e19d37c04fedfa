pub mod agent;
pub mod error;
pub mod options;

pub use agent::{Agent, SearchKey};
pub use error::{ExecError, ExecStage, OssecError, Result};
pub use options::{ClientOptions, Credential, HostKeyPolicy};

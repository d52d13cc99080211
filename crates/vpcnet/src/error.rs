use crate::addr::AddrError;
use crate::command::HostError;
use crate::name::NameError;
use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum VpcError {
    #[error("vpc not found: {0}")]
    VpcNotFound(String),

    #[error("subnet not found: {0}")]
    SubnetNotFound(String),

    #[error("vpc {0} already exists with different parameters")]
    VpcMismatch(String),

    #[error("subnet {0} already exists with different parameters")]
    SubnetMismatch(String),

    #[error("cannot peer a vpc with itself: {0}")]
    SelfPeering(String),

    #[error("invalid policy file: {0}")]
    PolicyParse(String),

    #[error(transparent)]
    Addr(#[from] AddrError),

    #[error(transparent)]
    Name(#[from] NameError),

    #[error("host operation failed: {0}")]
    Host(#[from] HostError),

    #[error("state store: {0}")]
    Store(#[from] StoreError),

    #[error("failed to launch application: {0}")]
    Spawn(String),
}

impl VpcError {
    /// True for errors caused by the request itself (exit code 1 territory):
    /// bad names or CIDRs, unknown or conflicting objects, bad policy input.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            VpcError::VpcNotFound(_)
                | VpcError::SubnetNotFound(_)
                | VpcError::VpcMismatch(_)
                | VpcError::SubnetMismatch(_)
                | VpcError::SelfPeering(_)
                | VpcError::PolicyParse(_)
                | VpcError::Addr(_)
                | VpcError::Name(_)
        )
    }

    pub fn is_store_error(&self) -> bool {
        matches!(self, VpcError::Store(_))
    }
}

pub type Result<T> = std::result::Result<T, VpcError>;

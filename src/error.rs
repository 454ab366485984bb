use crate::crypto::Address;
use thiserror::Error;

/// Broad classes of failure. Callers decide whether and how to retry from
/// the kind alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad signature or caller mismatch. Retry with a corrected signature.
    ValidationRejected,
    /// Setup is wrong (unauthorized master, unknown template, ...).
    ConfigurationError,
    /// Stale or future nonce. Rebuild the payload, never resend the blob.
    ReplayRejected,
    /// Batch outside the accepted size range. Split it.
    CapacityRejected,
    /// Caller logic bug (duplicate key, re-initialize, ...). Not retryable.
    StateError,
    /// Storage, serialization or configuration I/O failed.
    Infrastructure,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CustodyError {
    // --- Validation ---
    #[error("Invalid signature")]
    InvalidSignature,
    #[error("Malformed aggregated signature: {0}")]
    MalformedBlob(String),
    #[error("Not owner: {0}")]
    NotOwner(Address),
    #[error("Not master signer: {0}")]
    NotMasterSigner(Address),
    #[error("Not registry owner: {0}")]
    NotRegistryOwner(Address),
    #[error("Caller {caller} may not act for master {master}")]
    NotMasterCaller { caller: Address, master: Address },
    #[error("Batch mixes masters: expected {expected}, found {found}")]
    MixedMasters { expected: Address, found: Address },
    #[error("Session key {key} may not authorize the batch for account {account}")]
    SessionKeyNotPermitted { account: Address, key: Address },

    // --- Configuration ---
    #[error("Master not authorized: {0}")]
    MasterNotAuthorized(Address),
    #[error("Account not found: {0}")]
    AccountNotFound(Address),
    #[error("Sender has no controlling master: {0}")]
    SenderUncontrolled(Address),
    #[error("Account {account} is already controlled by master {master}")]
    WalletControlledByOther { account: Address, master: Address },
    #[error("Account {account} is not controlled by master {master}")]
    WalletNotControlled { account: Address, master: Address },
    #[error("Template not found: {0}")]
    TemplateNotFound(String),
    #[error("Template inactive: {0}")]
    TemplateInactive(String),
    #[error("Account {account} is not registered under master {master}")]
    AccountNotRegistered { account: Address, master: Address },
    #[error("Master mismatch for account {account}: expected {expected}, account records {recorded:?}")]
    MasterMismatch {
        account: Address,
        expected: Address,
        recorded: Option<Address>,
    },

    // --- Replay ---
    #[error("Nonce mismatch for master {master}: expected {expected}, got {got}")]
    NonceMismatch { master: Address, expected: u64, got: u64 },

    // --- Capacity ---
    #[error("Batch is empty")]
    EmptyBatch,
    #[error("Batch too large: {size} > {max}")]
    BatchTooLarge { size: usize, max: usize },

    // --- State ---
    #[error("Account already initialized")]
    AlreadyInitialized,
    #[error("Account not initialized")]
    NotInitialized,
    #[error("Account already exists: {0}")]
    AccountExists(Address),
    #[error("Invalid principal: the null address cannot hold authority")]
    InvalidPrincipal,
    #[error("Session key already active: {0}")]
    SessionKeyExists(Address),
    #[error("Session key not active: {0}")]
    SessionKeyNotActive(Address),
    #[error("Invalid validity window: valid_after {valid_after}, valid_until {valid_until}")]
    InvalidValidityWindow { valid_after: u64, valid_until: u64 },
    #[error("Validity window already expired: valid_until {valid_until} < now {now}")]
    WindowExpired { valid_until: u64, now: u64 },
    #[error("Template already exists: {0}")]
    TemplateExists(String),
    #[error("Invalid template: {0}")]
    InvalidTemplate(String),
    #[error("Duration must be positive")]
    InvalidDuration,
    #[error("Account {account} already registered under master {master}")]
    AccountAlreadyRegistered { account: Address, master: Address },

    // --- Infrastructure ---
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Config error: {0}")]
    Config(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CustodyError {
    pub fn kind(&self) -> ErrorKind {
        use CustodyError::*;
        match self {
            InvalidSignature
            | MalformedBlob(_)
            | NotOwner(_)
            | NotMasterSigner(_)
            | NotRegistryOwner(_)
            | NotMasterCaller { .. }
            | MixedMasters { .. }
            | SessionKeyNotPermitted { .. } => ErrorKind::ValidationRejected,

            MasterNotAuthorized(_)
            | AccountNotFound(_)
            | SenderUncontrolled(_)
            | WalletControlledByOther { .. }
            | WalletNotControlled { .. }
            | TemplateNotFound(_)
            | TemplateInactive(_)
            | AccountNotRegistered { .. }
            | MasterMismatch { .. } => ErrorKind::ConfigurationError,

            NonceMismatch { .. } => ErrorKind::ReplayRejected,

            EmptyBatch | BatchTooLarge { .. } => ErrorKind::CapacityRejected,

            AlreadyInitialized
            | NotInitialized
            | AccountExists(_)
            | InvalidPrincipal
            | SessionKeyExists(_)
            | SessionKeyNotActive(_)
            | InvalidValidityWindow { .. }
            | WindowExpired { .. }
            | TemplateExists(_)
            | InvalidTemplate(_)
            | InvalidDuration
            | AccountAlreadyRegistered { .. } => ErrorKind::StateError,

            Storage(_) | Serialization(_) | Config(_) | Internal(_) => ErrorKind::Infrastructure,
        }
    }

    /// Only signature problems are worth retrying unchanged in shape.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::ValidationRejected
    }
}

pub type CustodyResult<T> = Result<T, CustodyError>;

use cp_core::{CarrierRegistry, DeadlineExceeded, StoreError};

/// An admission rule could not be evaluated. Always a rejection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdmissionCheckFailed {
    /// A stored whitelist row does not describe a valid network.
    #[error("malformed {registry} whitelist entry ip={ip:?} range={range:?}: {reason}")]
    MalformedNetwork {
        registry: CarrierRegistry,
        ip: String,
        range: Option<String>,
        reason: String,
    },

    /// The signalling source is not an IP address.
    #[error("malformed source address {0:?}")]
    MalformedSourceAddress(String),

    /// The caller number could not be parsed.
    #[error("cannot parse number {raw:?}: {reason}")]
    MalformedNumber { raw: String, reason: String },

    /// The region used for parsing is not a known country code.
    #[error("unknown region {0:?}")]
    UnknownRegion(String),

    #[error("admission store unavailable: {0}")]
    Store(#[from] StoreError),

    #[error("admission lookup exceeded its deadline")]
    DeadlineExceeded,
}

impl From<DeadlineExceeded> for AdmissionCheckFailed {
    fn from(_: DeadlineExceeded) -> Self {
        Self::DeadlineExceeded
    }
}

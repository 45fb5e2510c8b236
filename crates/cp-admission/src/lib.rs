//! Call admission checks for callplane.
//!
//! - [`cidr`]: carrier whitelist gate for PSTN ingress traffic.
//! - [`caller`]: caller number normalization, blocklist and caller-ID
//!   ownership checks.
//!
//! Every check distinguishes "the rule says no" ([`Admission::Denied`],
//! [`CallerVerdict::Blocked`]) from "the rule could not be evaluated"
//! ([`AdmissionCheckFailed`]). Callers must treat the latter as a rejection.

#![forbid(unsafe_code)]
#![allow(clippy::module_name_repetitions)]

pub mod caller;
pub mod cidr;
mod error;

pub use caller::{BlockReason, CallerIdPolicy, CallerValidator, CallerVerdict, TenantContext, normalize};
pub use cidr::{Admission, AuthorizedBy, CidrGate, effective_network};
pub use error::AdmissionCheckFailed;

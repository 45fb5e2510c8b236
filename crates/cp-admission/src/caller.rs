//! Caller identity validation.
//!
//! Raw caller numbers are parsed against a region and normalized to E.164
//! before any comparison. The blocklist always wins: a blocked number is
//! rejected even when the tenant owns it.

use std::sync::Arc;

use cp_core::{BlocklistStore, CanonicalNumber, Deadline, DidStore, TenantId};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::AdmissionCheckFailed;

/// Region used when neither the tenant nor the policy sets one.
pub const DEFAULT_REGION: &str = "US";

fn default_region() -> String {
    DEFAULT_REGION.to_string()
}

const fn default_verify_ownership() -> bool {
    true
}

/// Platform-wide caller-ID policy, as read from the `[admission]` config table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerIdPolicy {
    /// Require outbound caller IDs to be DIDs owned by the tenant.
    #[serde(default = "default_verify_ownership")]
    pub verify_ownership: bool,
    /// Region for parsing numbers without a country code.
    #[serde(default = "default_region")]
    pub default_region: String,
}

impl Default for CallerIdPolicy {
    fn default() -> Self {
        Self {
            verify_ownership: default_verify_ownership(),
            default_region: default_region(),
        }
    }
}

/// Tenant on whose behalf a number is validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantContext {
    pub id: TenantId,
    /// Tenant-specific parsing region, overriding the policy default.
    pub default_region: Option<String>,
}

impl TenantContext {
    #[must_use]
    pub const fn new(id: TenantId) -> Self {
        Self {
            id,
            default_region: None,
        }
    }

    #[must_use]
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.default_region = Some(region.into());
        self
    }
}

/// Why a number was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockReason {
    /// On the tenant's blocklist.
    Blocklisted,
    /// Not a DID owned by the tenant.
    NotOwned,
}

/// Outcome of a caller check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallerVerdict {
    Valid(CanonicalNumber),
    Blocked {
        number: CanonicalNumber,
        reason: BlockReason,
    },
}

impl CallerVerdict {
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        matches!(self, Self::Valid(_))
    }

    /// The canonical number the verdict is about.
    #[must_use]
    pub const fn number(&self) -> &CanonicalNumber {
        match self {
            Self::Valid(number) | Self::Blocked { number, .. } => number,
        }
    }
}

/// Parse `raw` in `region` and format it as E.164.
///
/// Numbers with an explicit `+` country code ignore `region`.
///
/// # Errors
/// Returns [`AdmissionCheckFailed::UnknownRegion`] for an unrecognized region
/// and [`AdmissionCheckFailed::MalformedNumber`] when `raw` cannot be parsed.
pub fn normalize(raw: &str, region: &str) -> Result<CanonicalNumber, AdmissionCheckFailed> {
    let country: phonenumber::country::Id = region
        .trim()
        .to_ascii_uppercase()
        .parse()
        .map_err(|_| AdmissionCheckFailed::UnknownRegion(region.to_string()))?;

    let parsed = phonenumber::parse(Some(country), raw.trim()).map_err(|err| {
        AdmissionCheckFailed::MalformedNumber {
            raw: raw.to_string(),
            reason: err.to_string(),
        }
    })?;
    let formatted = parsed.format().mode(phonenumber::Mode::E164).to_string();

    CanonicalNumber::from_e164(formatted).map_err(|err| AdmissionCheckFailed::MalformedNumber {
        raw: raw.to_string(),
        reason: err.to_string(),
    })
}

/// Validates caller numbers against tenant blocklists and DID ownership.
#[derive(Clone)]
pub struct CallerValidator {
    blocklist: Arc<dyn BlocklistStore>,
    dids: Arc<dyn DidStore>,
    policy: CallerIdPolicy,
}

impl std::fmt::Debug for CallerValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallerValidator")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl CallerValidator {
    #[must_use]
    pub fn new(
        blocklist: Arc<dyn BlocklistStore>,
        dids: Arc<dyn DidStore>,
        policy: CallerIdPolicy,
    ) -> Self {
        Self {
            blocklist,
            dids,
            policy,
        }
    }

    #[must_use]
    pub const fn policy(&self) -> &CallerIdPolicy {
        &self.policy
    }

    /// Region used to parse numbers for `tenant`: the tenant's own, else the
    /// policy default.
    #[must_use]
    pub fn region_for<'a>(&'a self, tenant: &'a TenantContext) -> &'a str {
        tenant
            .default_region
            .as_deref()
            .unwrap_or(&self.policy.default_region)
    }

    /// Full outbound caller-ID check: normalize, blocklist, then ownership
    /// when the policy requires it.
    ///
    /// # Errors
    /// Returns [`AdmissionCheckFailed`] when the number cannot be parsed or a
    /// lookup fails or misses `deadline`.
    pub async fn validate(
        &self,
        raw: &str,
        tenant: &TenantContext,
        deadline: Deadline,
    ) -> Result<CallerVerdict, AdmissionCheckFailed> {
        let verdict = self.screen(raw, tenant, deadline).await?;
        let CallerVerdict::Valid(number) = verdict else {
            return Ok(verdict);
        };
        if !self.policy.verify_ownership {
            return Ok(CallerVerdict::Valid(number));
        }

        let owned = deadline
            .run(self.dids.owns_did(tenant.id, &number))
            .await?
            .inspect_err(|err| {
                warn!(tenant_id = %tenant.id, number = %number, error = %err, "DID ownership lookup failed");
            })?;
        if owned {
            Ok(CallerVerdict::Valid(number))
        } else {
            info!(tenant_id = %tenant.id, number = %number, "caller ID not owned by tenant");
            Ok(CallerVerdict::Blocked {
                number,
                reason: BlockReason::NotOwned,
            })
        }
    }

    /// Inbound caller check: normalize and blocklist only.
    ///
    /// # Errors
    /// Returns [`AdmissionCheckFailed`] when the number cannot be parsed or
    /// the blocklist lookup fails or misses `deadline`.
    pub async fn screen(
        &self,
        raw: &str,
        tenant: &TenantContext,
        deadline: Deadline,
    ) -> Result<CallerVerdict, AdmissionCheckFailed> {
        let number = normalize(raw, self.region_for(tenant)).inspect_err(|err| {
            debug!(tenant_id = %tenant.id, error = %err, "caller number rejected");
        })?;

        let blocked = deadline
            .run(self.blocklist.is_blocked(tenant.id, &number))
            .await?
            .inspect_err(|err| {
                warn!(tenant_id = %tenant.id, number = %number, error = %err, "blocklist lookup failed");
            })?;
        if blocked {
            info!(tenant_id = %tenant.id, number = %number, "caller number blocklisted");
            return Ok(CallerVerdict::Blocked {
                number,
                reason: BlockReason::Blocklisted,
            });
        }
        Ok(CallerVerdict::Valid(number))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cp_store::MemoryStore;
    use cp_testkit::{CountingStore, StallingStore, UnavailableStore, number};
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    const TENANT: TenantId = TenantId(1);

    fn deadline() -> Deadline {
        Deadline::after(Duration::from_secs(1))
    }

    fn validator(store: MemoryStore, verify_ownership: bool) -> CallerValidator {
        let store = Arc::new(store);
        CallerValidator::new(
            store.clone(),
            store,
            CallerIdPolicy {
                verify_ownership,
                ..CallerIdPolicy::default()
            },
        )
    }

    // ---- normalization ----

    #[test]
    fn formatting_variants_normalize_identically() {
        for raw in ["+1 555 000 0000", "(555) 000-0000", "555.000.0000", "+15550000000"] {
            assert_eq!(
                normalize(raw, "US").map(|n| n.to_string()),
                Ok("+15550000000".to_string()),
                "{raw}"
            );
        }
    }

    #[test]
    fn region_applies_to_national_numbers() {
        assert_eq!(
            normalize("020 7183 8750", "gb").map(|n| n.to_string()),
            Ok("+442071838750".to_string())
        );
    }

    #[test]
    fn garbage_and_unknown_regions_fail() {
        assert!(matches!(
            normalize("call me maybe", "US"),
            Err(AdmissionCheckFailed::MalformedNumber { .. })
        ));
        assert!(matches!(
            normalize("5550000000", "XX"),
            Err(AdmissionCheckFailed::UnknownRegion(_))
        ));
    }

    // ---- verdicts ----

    #[tokio::test]
    async fn blocklist_matches_regardless_of_formatting() {
        let store = MemoryStore::new();
        store.block_number(TENANT, number("+15550000000"));
        let validator = validator(store, false);

        let verdict = validator
            .validate("+1 555 000 0000", &TenantContext::new(TENANT), deadline())
            .await;
        assert_eq!(
            verdict,
            Ok(CallerVerdict::Blocked {
                number: number("+15550000000"),
                reason: BlockReason::Blocklisted,
            })
        );
    }

    #[tokio::test]
    async fn blocklist_dominates_ownership() {
        let store = MemoryStore::new();
        store.block_number(TENANT, number("+15551234567"));
        store.assign_did(TENANT, number("+15551234567"));
        let validator = validator(store, true);

        let verdict = validator
            .validate("5551234567", &TenantContext::new(TENANT), deadline())
            .await
            .expect("evaluated");
        assert!(matches!(
            verdict,
            CallerVerdict::Blocked {
                reason: BlockReason::Blocklisted,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn ownership_is_required_when_enabled() {
        let store = MemoryStore::new();
        store.assign_did(TENANT, number("+15551234567"));
        let validator = validator(store, true);
        let tenant = TenantContext::new(TENANT);

        let owned = validator.validate("555-123-4567", &tenant, deadline()).await;
        assert_eq!(owned, Ok(CallerVerdict::Valid(number("+15551234567"))));

        let foreign = validator
            .validate("555-765-4321", &tenant, deadline())
            .await
            .expect("evaluated");
        assert_eq!(
            foreign,
            CallerVerdict::Blocked {
                number: number("+15557654321"),
                reason: BlockReason::NotOwned,
            }
        );
    }

    #[tokio::test]
    async fn ownership_is_skipped_when_disabled_and_for_screening() {
        let validator = validator(MemoryStore::new(), false);
        let tenant = TenantContext::new(TENANT);
        let verdict = validator.validate("555-765-4321", &tenant, deadline()).await;
        assert!(verdict.is_ok_and(|v| v.is_valid()));

        let strict = self::validator(MemoryStore::new(), true);
        let screened = strict.screen("555-765-4321", &tenant, deadline()).await;
        assert!(screened.is_ok_and(|v| v.is_valid()));
    }

    #[tokio::test]
    async fn tenant_region_overrides_policy() {
        let validator = validator(MemoryStore::new(), false);
        let tenant = TenantContext::new(TENANT).with_region("GB");
        let verdict = validator
            .validate("020 7183 8750", &tenant, deadline())
            .await
            .expect("evaluated");
        assert_eq!(verdict.number().as_str(), "+442071838750");
    }

    #[tokio::test]
    async fn unparseable_number_fails_before_lookups() {
        let store = Arc::new(CountingStore::new(MemoryStore::new()));
        let validator = CallerValidator::new(store.clone(), store.clone(), CallerIdPolicy::default());
        let result = validator
            .validate("not a number", &TenantContext::new(TENANT), deadline())
            .await;
        assert!(matches!(
            result,
            Err(AdmissionCheckFailed::MalformedNumber { .. })
        ));
        assert_eq!(store.calls("is_blocked"), 0);
    }

    #[tokio::test]
    async fn lookup_failures_are_check_failures() {
        let failing = CallerValidator::new(
            Arc::new(UnavailableStore),
            Arc::new(UnavailableStore),
            CallerIdPolicy::default(),
        );
        let result = failing
            .validate("5551234567", &TenantContext::new(TENANT), deadline())
            .await;
        assert!(matches!(result, Err(AdmissionCheckFailed::Store(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_lookup_hits_deadline() {
        let stalling = CallerValidator::new(
            Arc::new(StallingStore),
            Arc::new(StallingStore),
            CallerIdPolicy::default(),
        );
        let result = stalling
            .screen(
                "5551234567",
                &TenantContext::new(TENANT),
                Deadline::after(Duration::from_millis(20)),
            )
            .await;
        assert_eq!(result, Err(AdmissionCheckFailed::DeadlineExceeded));
    }

    #[test]
    fn policy_defaults_from_empty_table() {
        let policy: CallerIdPolicy = toml::from_str("").expect("parse");
        assert_eq!(policy, CallerIdPolicy::default());
        assert!(policy.verify_ownership);
        assert_eq!(policy.default_region, "US");
    }
}

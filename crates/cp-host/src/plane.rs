//! Call admission pipeline.
//!
//! Each call event gets one [`Deadline`] that every lookup it triggers shares.
//! Stages run in order and the first rejecting stage decides the outcome.

use std::sync::Arc;
use std::time::Duration;

use cp_admission::{
    Admission, AdmissionCheckFailed, AuthorizedBy, BlockReason, CallerValidator, CallerVerdict,
    CidrGate, TenantContext, normalize,
};
use cp_core::{
    BlocklistStore, CanonicalNumber, Capability, Deadline, Did, DidStore, Node, NodeKind,
    NodeStore, WhitelistStore,
};
use cp_mesh::{LoadBalancer, MembershipTable, PlacementConstraints, PlacementError};
use cp_registry::NodeRegistry;
use tracing::{debug, info, warn};

use crate::config::AdmissionSection;

/// A call could not be admitted because a check could not be evaluated or
/// no node can take it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CallPlaneError {
    #[error(transparent)]
    Admission(#[from] AdmissionCheckFailed),

    #[error(transparent)]
    Placement(#[from] PlacementError),
}

/// Media relay requirement for a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MediaProfile {
    /// Any relay.
    #[default]
    Standard,
    /// Prefer RTC-optimized relays, fall back to any.
    RtcPreferred,
    /// Only RTC-optimized relays.
    RtcRequired,
}

impl MediaProfile {
    fn constraints(self) -> PlacementConstraints {
        match self {
            Self::Standard => PlacementConstraints::any(),
            Self::RtcPreferred => PlacementConstraints::any().prefer(Capability::RtcOptimized),
            Self::RtcRequired => PlacementConstraints::any().require(Capability::RtcOptimized),
        }
    }
}

/// Call arriving from a carrier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundCall {
    /// Dialled number as routed. Canonicalized to E.164 with the tenant's
    /// region before the whitelist lookup.
    pub did: Did,
    /// Signalling source address, as received.
    pub source_ip: String,
    /// Caller number, as received.
    pub caller: String,
    /// Tenant owning `did`.
    pub tenant: TenantContext,
}

/// Call placed by a tenant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundCall {
    /// Caller ID the tenant wants to present.
    pub caller_id: String,
    pub tenant: TenantContext,
    /// SIP router region; any region when unset.
    pub region: Option<String>,
    pub media: MediaProfile,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundDecision {
    Admitted {
        authorized_by: AuthorizedBy,
        caller: CanonicalNumber,
        media_relay: Node,
    },
    /// Source is not whitelisted for the DID.
    Denied,
    CallerBlocked {
        number: CanonicalNumber,
        reason: BlockReason,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundDecision {
    Admitted {
        caller_id: CanonicalNumber,
        sip_router: Node,
        media_relay: Node,
    },
    CallerBlocked {
        number: CanonicalNumber,
        reason: BlockReason,
    },
}

/// Admission checks and placement for one node.
#[derive(Debug, Clone)]
pub struct CallPlane {
    gate: CidrGate,
    callers: CallerValidator,
    balancer: LoadBalancer,
    lookup_timeout: Duration,
}

impl CallPlane {
    #[must_use]
    pub const fn new(
        gate: CidrGate,
        callers: CallerValidator,
        balancer: LoadBalancer,
        lookup_timeout: Duration,
    ) -> Self {
        Self {
            gate,
            callers,
            balancer,
            lookup_timeout,
        }
    }

    /// Wire every stage to a single store implementing all ports.
    #[must_use]
    pub fn from_store<S>(store: &Arc<S>, table: Arc<MembershipTable>, admission: &AdmissionSection) -> Self
    where
        S: NodeStore + WhitelistStore + BlocklistStore + DidStore + 'static,
    {
        let gate = CidrGate::new(Arc::clone(store) as Arc<dyn WhitelistStore>);
        let callers = CallerValidator::new(
            Arc::clone(store) as Arc<dyn BlocklistStore>,
            Arc::clone(store) as Arc<dyn DidStore>,
            admission.caller_id_policy(),
        );
        let registry = NodeRegistry::new(Arc::clone(store) as Arc<dyn NodeStore>);
        Self::new(
            gate,
            callers,
            LoadBalancer::new(registry, table),
            admission.lookup_timeout(),
        )
    }

    fn deadline(&self) -> Deadline {
        Deadline::after(self.lookup_timeout)
    }

    /// Canonicalize the DID, whitelist the carrier, screen the caller, then
    /// pick a media relay.
    ///
    /// # Errors
    /// Returns [`CallPlaneError`] if a check cannot be evaluated or no media
    /// relay is available. Callers must reject the call.
    pub async fn admit_inbound(&self, call: &InboundCall) -> Result<InboundDecision, CallPlaneError> {
        let deadline = self.deadline();

        let did = match normalize(call.did.as_str(), self.callers.region_for(&call.tenant)) {
            Ok(number) => Did::from(number),
            Err(err) => {
                warn!(did = %call.did, error = %err, "inbound DID is not a valid number");
                return Err(err.into());
            }
        };

        let authorized_by = match self.gate.authorize(&did, &call.source_ip, deadline).await {
            Ok(Admission::Authorized(authorized_by)) => authorized_by,
            Ok(Admission::Denied) => {
                info!(%did, source = %call.source_ip, "inbound call denied by whitelist");
                return Ok(InboundDecision::Denied);
            }
            Err(err) => {
                warn!(%did, error = %err, "inbound admission check failed");
                return Err(err.into());
            }
        };

        let caller = match self.callers.screen(&call.caller, &call.tenant, deadline).await? {
            CallerVerdict::Valid(number) => number,
            CallerVerdict::Blocked { number, reason } => {
                return Ok(InboundDecision::CallerBlocked { number, reason });
            }
        };

        let media_relay = self
            .balancer
            .select_node(NodeKind::MediaRelay, &PlacementConstraints::any(), deadline)
            .await?;

        debug!(
            %did,
            caller = %caller,
            media_relay = %media_relay.id,
            "inbound call admitted"
        );
        Ok(InboundDecision::Admitted {
            authorized_by,
            caller,
            media_relay,
        })
    }

    /// Validate the caller ID, then pick a SIP router and a media relay.
    ///
    /// # Errors
    /// Returns [`CallPlaneError`] if a check cannot be evaluated or no node
    /// of either kind is available. Callers must reject the call.
    pub async fn admit_outbound(
        &self,
        call: &OutboundCall,
    ) -> Result<OutboundDecision, CallPlaneError> {
        let deadline = self.deadline();

        let caller_id = match self
            .callers
            .validate(&call.caller_id, &call.tenant, deadline)
            .await?
        {
            CallerVerdict::Valid(number) => number,
            CallerVerdict::Blocked { number, reason } => {
                return Ok(OutboundDecision::CallerBlocked { number, reason });
            }
        };

        let mut router_constraints = PlacementConstraints::any();
        if let Some(region) = &call.region {
            router_constraints = router_constraints.in_region(region.clone());
        }
        let sip_router = self
            .balancer
            .select_node(NodeKind::SipRouter, &router_constraints, deadline)
            .await?;
        let media_relay = self
            .balancer
            .select_node(NodeKind::MediaRelay, &call.media.constraints(), deadline)
            .await?;

        debug!(
            tenant_id = %call.tenant.id,
            caller_id = %caller_id,
            sip_router = %sip_router.id,
            media_relay = %media_relay.id,
            "outbound call admitted"
        );
        Ok(OutboundDecision::Admitted {
            caller_id,
            sip_router,
            media_relay,
        })
    }
}

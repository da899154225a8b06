//! Payment request registry.
//!
//! Owns every [`PaymentRequest`] instance. All state transitions go
//! through the operations here; no other component mutates a request
//! directly. A secondary index keyed by `payable_total` resolves inbound
//! notifications in O(1) and only ever contains *Open* entries, so the
//! uniqueness invariant — at most one Open request per payable total —
//! is enforced structurally.

use crate::entities::payment_request::{
    PaymentKind, PaymentRequest, PurchaseDetail, RequestStatus,
};
use crate::entities::{RequestId, Rupiah, UserId};
use compact_str::CompactString;
use rand::Rng;
use std::collections::HashMap;
use thiserror::Error;
use time::OffsetDateTime;

/// Inclusive bounds of the disambiguator range. The original storefront
/// appends a 3-digit "unique code" to every payable amount.
pub const DISAMBIGUATOR_MIN: Rupiah = 100;
pub const DISAMBIGUATOR_MAX: Rupiah = 999;

/// How many random disambiguators to try before giving up on a base
/// amount. With 900 possible codes this only exhausts under heavy
/// same-price bursts.
pub const DEFAULT_OPEN_RETRY_BUDGET: u32 = 32;

/// How long an applied notification reference is kept for duplicate
/// detection after its request has been evicted. Provider retries span
/// minutes to hours, not days.
pub const APPLIED_REF_RETENTION: time::Duration = time::Duration::days(1);

/// Errors surfaced by [`PaymentRequestRegistry::open`].
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Every tried payable total collided with another Open request.
    #[error("no free payable total for base amount {base_amount} after {attempts} attempts")]
    DisambiguationExhausted { base_amount: Rupiah, attempts: u32 },

    /// The caller-supplied request id is already registered.
    #[error("request id already registered: {0}")]
    DuplicateRequestId(RequestId),
}

/// Parameters for opening a payment request.
#[derive(Debug, Clone)]
pub struct OpenRequest {
    pub id: RequestId,
    pub kind: PaymentKind,
    pub user_id: UserId,
    pub base_amount: Rupiah,
    pub purchase: Option<PurchaseDetail>,
    pub ttl: time::Duration,
}

/// Result of [`PaymentRequestRegistry::mark_settled`].
#[derive(Debug)]
pub enum SettleOutcome {
    /// The request transitioned Open -> Settled; fulfillment may run.
    Settled(PaymentRequest),
    /// The same notification reference was already applied; harmless replay.
    AlreadyApplied,
    /// The request is terminal under a different reference (or expired);
    /// the transition is refused.
    Rejected,
}

#[derive(Debug, Clone)]
struct AppliedRef {
    request_id: RequestId,
    applied_at: OffsetDateTime,
}

pub struct PaymentRequestRegistry {
    requests: HashMap<RequestId, PaymentRequest>,
    /// payable_total -> request id, Open entries only.
    by_total: HashMap<Rupiah, RequestId>,
    /// Applied notification references, kept past eviction so replays of
    /// settled-and-evicted requests still resolve as duplicates. Pruned
    /// by the sweep once older than [`APPLIED_REF_RETENTION`].
    applied_refs: HashMap<CompactString, AppliedRef>,
    retry_budget: u32,
}

impl PaymentRequestRegistry {
    pub fn new(retry_budget: u32) -> Self {
        Self {
            requests: HashMap::new(),
            by_total: HashMap::new(),
            applied_refs: HashMap::new(),
            retry_budget: retry_budget.max(1),
        }
    }

    /// Open a new payment request, claiming a unique payable total.
    ///
    /// Random disambiguators in `[DISAMBIGUATOR_MIN, DISAMBIGUATOR_MAX]`
    /// are tried until one produces a total no other Open request holds,
    /// or the retry budget runs out. The claim is made before any
    /// external call, so two concurrent opens can never race the same
    /// total; a claim whose QR issuance later fails must be released via
    /// [`abort`](Self::abort).
    pub fn open(
        &mut self,
        req: OpenRequest,
        now: OffsetDateTime,
    ) -> Result<PaymentRequest, RegistryError> {
        if self.requests.contains_key(&req.id) {
            return Err(RegistryError::DuplicateRequestId(req.id));
        }

        let mut rng = rand::rng();
        let mut disambiguator = None;
        for _ in 0..self.retry_budget {
            let candidate = rng.random_range(DISAMBIGUATOR_MIN..=DISAMBIGUATOR_MAX);
            if !self.by_total.contains_key(&(req.base_amount + candidate)) {
                disambiguator = Some(candidate);
                break;
            }
        }
        let Some(disambiguator) = disambiguator else {
            return Err(RegistryError::DisambiguationExhausted {
                base_amount: req.base_amount,
                attempts: self.retry_budget,
            });
        };

        let request = PaymentRequest {
            id: req.id.clone(),
            kind: req.kind,
            user_id: req.user_id,
            base_amount: req.base_amount,
            disambiguator,
            purchase: req.purchase,
            status: RequestStatus::Open,
            created_at: now,
            expires_at: now + req.ttl,
            notification_ref: None,
        };

        self.by_total.insert(request.payable_total(), req.id.clone());
        self.requests.insert(req.id, request.clone());
        Ok(request)
    }

    /// Release a claim whose QR issuance failed. Only Open entries are
    /// removed; settled or expired entries are left alone.
    pub fn abort(&mut self, id: &RequestId) -> bool {
        match self.requests.get(id) {
            Some(request) if request.is_open() => {
                let total = request.payable_total();
                self.by_total.remove(&total);
                self.requests.remove(id);
                true
            }
            _ => false,
        }
    }

    /// Resolve the unique Open request with the given payable total.
    /// Never scans settled or expired entries.
    pub fn find_by_payable_total(&self, amount: Rupiah) -> Option<RequestId> {
        self.by_total.get(&amount).cloned()
    }

    /// Has this notification reference already been applied?
    pub fn seen_reference(&self, reference: &str) -> Option<RequestId> {
        self.applied_refs
            .get(reference)
            .map(|applied| applied.request_id.clone())
    }

    /// Transition Open -> Settled exactly once.
    ///
    /// A repeat of the same `notification_ref` is a harmless no-op
    /// ([`SettleOutcome::AlreadyApplied`]); any other call against a
    /// terminal entry is refused. Settling evicts the payable total from
    /// the index, so the total becomes reusable.
    pub fn mark_settled(
        &mut self,
        id: &RequestId,
        notification_ref: &str,
        now: OffsetDateTime,
    ) -> SettleOutcome {
        let Some(request) = self.requests.get_mut(id) else {
            return SettleOutcome::Rejected;
        };
        match request.status {
            RequestStatus::Open => {
                request.status = RequestStatus::Settled;
                request.notification_ref = Some(CompactString::from(notification_ref));
                let total = request.payable_total();
                let settled = request.clone();
                self.by_total.remove(&total);
                self.applied_refs.insert(
                    CompactString::from(notification_ref),
                    AppliedRef {
                        request_id: id.clone(),
                        applied_at: now,
                    },
                );
                SettleOutcome::Settled(settled)
            }
            RequestStatus::Settled
                if request.notification_ref.as_deref() == Some(notification_ref) =>
            {
                SettleOutcome::AlreadyApplied
            }
            _ => SettleOutcome::Rejected,
        }
    }

    /// Drop a Settled entry once its fulfillment has completed. The
    /// applied notification reference stays behind for duplicate
    /// detection; Failed entries are retained for operator resolution.
    pub fn evict_settled(&mut self, id: &RequestId) -> bool {
        match self.requests.get(id) {
            Some(request) if request.status == RequestStatus::Settled => {
                self.requests.remove(id);
                true
            }
            _ => false,
        }
    }

    /// Transition Settled -> Failed after a post-payment fulfillment
    /// failure. Returns false if the request is not currently Settled.
    pub fn mark_failed(&mut self, id: &RequestId) -> bool {
        match self.requests.get_mut(id) {
            Some(request) if request.status == RequestStatus::Settled => {
                request.status = RequestStatus::Failed;
                true
            }
            _ => false,
        }
    }

    /// Expire every Open entry past its deadline, freeing its payable
    /// total for reuse. Terminal entries are never touched. Also prunes
    /// applied references past their retention window. Returns the
    /// expired requests so callers can notify their owners.
    pub fn sweep_expired(&mut self, now: OffsetDateTime) -> Vec<PaymentRequest> {
        let expired_ids: Vec<RequestId> = self
            .requests
            .values()
            .filter(|r| r.is_open() && r.expires_at <= now)
            .map(|r| r.id.clone())
            .collect();

        let mut expired = Vec::with_capacity(expired_ids.len());
        for id in expired_ids {
            if let Some(mut request) = self.requests.remove(&id) {
                self.by_total.remove(&request.payable_total());
                request.status = RequestStatus::Expired;
                expired.push(request);
            }
        }

        self.applied_refs
            .retain(|_, applied| now - applied.applied_at <= APPLIED_REF_RETENTION);

        expired
    }

    pub fn get(&self, id: &RequestId) -> Option<&PaymentRequest> {
        self.requests.get(id)
    }

    /// Number of currently Open requests.
    pub fn open_count(&self) -> usize {
        self.by_total.len()
    }
}

impl Default for PaymentRequestRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_OPEN_RETRY_BUDGET)
    }
}

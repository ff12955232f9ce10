use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use tallyerp_core::{Aggregate, AggregateId, AggregateRoot, DomainError, StateViolation, TenantId, UserId};
use tallyerp_events::Event;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Disposition {
    PendingReplacement,
    CreditRequested,
    Returned,
    WrittenOff,
}

impl Disposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Disposition::PendingReplacement => "PENDING_REPLACEMENT",
            Disposition::CreditRequested => "CREDIT_REQUESTED",
            Disposition::Returned => "RETURNED",
            Disposition::WrittenOff => "WRITTEN_OFF",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispositionHistoryEntry {
    pub disposition: Disposition,
    pub notes: Option<String>,
    pub actor: UserId,
    pub resolved: bool,
    pub at: DateTime<Utc>,
}

/// Aggregate root: DispositionRecord, keyed by the goods receipt line id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispositionRecord {
    grn_item_id: AggregateId,
    grn_id: Option<AggregateId>,
    tenant_id: Option<TenantId>,
    rejected_qty: Decimal,
    disposition: Disposition,
    notes: Option<String>,
    resolved: bool,
    resolved_by: Option<UserId>,
    resolved_at: Option<DateTime<Utc>>,
    history: Vec<DispositionHistoryEntry>,
    version: u64,
    created: bool,
}

impl DispositionRecord {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(grn_item_id: AggregateId) -> Self {
        Self {
            grn_item_id,
            grn_id: None,
            tenant_id: None,
            rejected_qty: Decimal::ZERO,
            disposition: Disposition::PendingReplacement,
            notes: None,
            resolved: false,
            resolved_by: None,
            resolved_at: None,
            history: Vec::new(),
            version: 0,
            created: false,
        }
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn grn_item_id(&self) -> AggregateId {
        self.grn_item_id
    }

    pub fn grn_id(&self) -> Option<AggregateId> {
        self.grn_id
    }

    pub fn rejected_qty(&self) -> Decimal {
        self.rejected_qty
    }

    pub fn disposition(&self) -> Disposition {
        self.disposition
    }

    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved
    }

    pub fn resolved_by(&self) -> Option<UserId> {
        self.resolved_by
    }

    pub fn resolved_at(&self) -> Option<DateTime<Utc>> {
        self.resolved_at
    }

    pub fn history(&self) -> &[DispositionHistoryEntry] {
        &self.history
    }
}

impl AggregateRoot for DispositionRecord {
    type Id = AggregateId;

    fn id(&self) -> &Self::Id {
        &self.grn_item_id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: OpenDisposition (issued when a receipt line rejects quantity).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenDisposition {
    pub tenant_id: TenantId,
    pub grn_item_id: AggregateId,
    pub grn_id: AggregateId,
    pub rejected_qty: Decimal,
    pub opened_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UpdateDisposition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateDisposition {
    pub tenant_id: TenantId,
    pub grn_item_id: AggregateId,
    pub disposition: Disposition,
    pub notes: Option<String>,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ResolveDisposition. `disposition` optionally sets the final outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolveDisposition {
    pub tenant_id: TenantId,
    pub grn_item_id: AggregateId,
    pub disposition: Option<Disposition>,
    pub notes: Option<String>,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DispositionCommand {
    Open(OpenDisposition),
    Update(UpdateDisposition),
    Resolve(ResolveDisposition),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispositionOpened {
    pub tenant_id: TenantId,
    pub grn_item_id: AggregateId,
    pub grn_id: AggregateId,
    pub rejected_qty: Decimal,
    pub opened_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispositionUpdated {
    pub tenant_id: TenantId,
    pub grn_item_id: AggregateId,
    pub disposition: Disposition,
    pub notes: Option<String>,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispositionResolved {
    pub tenant_id: TenantId,
    pub grn_item_id: AggregateId,
    pub disposition: Disposition,
    pub notes: Option<String>,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DispositionEvent {
    DispositionOpened(DispositionOpened),
    DispositionUpdated(DispositionUpdated),
    DispositionResolved(DispositionResolved),
}

impl Event for DispositionEvent {
    fn event_type(&self) -> &'static str {
        match self {
            DispositionEvent::DispositionOpened(_) => "disposition.record.opened",
            DispositionEvent::DispositionUpdated(_) => "disposition.record.updated",
            DispositionEvent::DispositionResolved(_) => "disposition.record.resolved",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            DispositionEvent::DispositionOpened(e) => e.occurred_at,
            DispositionEvent::DispositionUpdated(e) => e.occurred_at,
            DispositionEvent::DispositionResolved(e) => e.occurred_at,
        }
    }
}

impl Aggregate for DispositionRecord {
    type Command = DispositionCommand;
    type Event = DispositionEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            DispositionEvent::DispositionOpened(e) => {
                self.tenant_id = Some(e.tenant_id);
                self.grn_item_id = e.grn_item_id;
                self.grn_id = Some(e.grn_id);
                self.rejected_qty = e.rejected_qty;
                self.disposition = Disposition::PendingReplacement;
                self.history.push(DispositionHistoryEntry {
                    disposition: Disposition::PendingReplacement,
                    notes: None,
                    actor: e.opened_by,
                    resolved: false,
                    at: e.occurred_at,
                });
                self.created = true;
            }
            DispositionEvent::DispositionUpdated(e) => {
                self.disposition = e.disposition;
                self.notes = e.notes.clone();
                self.history.push(DispositionHistoryEntry {
                    disposition: e.disposition,
                    notes: e.notes.clone(),
                    actor: e.actor,
                    resolved: false,
                    at: e.occurred_at,
                });
            }
            DispositionEvent::DispositionResolved(e) => {
                self.disposition = e.disposition;
                if e.notes.is_some() {
                    self.notes = e.notes.clone();
                }
                self.resolved = true;
                self.resolved_by = Some(e.actor);
                self.resolved_at = Some(e.occurred_at);
                self.history.push(DispositionHistoryEntry {
                    disposition: e.disposition,
                    notes: e.notes.clone(),
                    actor: e.actor,
                    resolved: true,
                    at: e.occurred_at,
                });
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            DispositionCommand::Open(cmd) => self.handle_open(cmd),
            DispositionCommand::Update(cmd) => self.handle_update(cmd),
            DispositionCommand::Resolve(cmd) => self.handle_resolve(cmd),
        }
    }
}

impl DispositionRecord {
    fn ensure_open(&self, tenant_id: TenantId, grn_item_id: AggregateId, action: &str) -> Result<(), DomainError> {
        if !self.created || self.tenant_id != Some(tenant_id) || self.grn_item_id != grn_item_id {
            return Err(DomainError::not_found(format!("disposition for line {grn_item_id}")));
        }
        if self.resolved {
            return Err(DomainError::state(StateViolation::new(
                "DISPOSITION",
                "RESOLVED",
                action,
                "disposition is already resolved",
            )));
        }
        Ok(())
    }

    fn handle_open(&self, cmd: &OpenDisposition) -> Result<Vec<DispositionEvent>, DomainError> {
        if self.created {
            return Err(DomainError::duplicate(format!(
                "disposition for line {} already exists",
                cmd.grn_item_id
            )));
        }
        if cmd.rejected_qty <= Decimal::ZERO {
            return Err(DomainError::validation("rejected quantity must be positive"));
        }
        Ok(vec![DispositionEvent::DispositionOpened(DispositionOpened {
            tenant_id: cmd.tenant_id,
            grn_item_id: cmd.grn_item_id,
            grn_id: cmd.grn_id,
            rejected_qty: cmd.rejected_qty,
            opened_by: cmd.opened_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_update(&self, cmd: &UpdateDisposition) -> Result<Vec<DispositionEvent>, DomainError> {
        self.ensure_open(cmd.tenant_id, cmd.grn_item_id, "update")?;
        Ok(vec![DispositionEvent::DispositionUpdated(DispositionUpdated {
            tenant_id: cmd.tenant_id,
            grn_item_id: cmd.grn_item_id,
            disposition: cmd.disposition,
            notes: cmd.notes.clone(),
            actor: cmd.actor,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_resolve(&self, cmd: &ResolveDisposition) -> Result<Vec<DispositionEvent>, DomainError> {
        self.ensure_open(cmd.tenant_id, cmd.grn_item_id, "resolve")?;
        Ok(vec![DispositionEvent::DispositionResolved(DispositionResolved {
            tenant_id: cmd.tenant_id,
            grn_item_id: cmd.grn_item_id,
            disposition: cmd.disposition.unwrap_or(self.disposition),
            notes: cmd.notes.clone(),
            actor: cmd.actor,
            occurred_at: cmd.occurred_at,
        })])
    }
}

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use tallyerp_core::{
    Aggregate, AggregateId, AggregateRoot, CompanyId, DomainError, ProductId, StateViolation,
    TenantId, UserId, WarehouseId,
};
use tallyerp_events::Event;
use tallyerp_ledger::{DocumentLine, LineDelta, LineLimits, QuantityField, apply_deltas};

use crate::guards;
use crate::transitions::{self, initial_status, is_terminal};
use crate::types::{Action, DocumentStatus, DocumentType};

/// Header fields shared by every document type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentHeader {
    pub id: AggregateId,
    pub doc_type: DocumentType,
    pub status: DocumentStatus,
    pub company_id: CompanyId,
    pub warehouse_id: Option<WarehouseId>,
    pub destination_warehouse_id: Option<WarehouseId>,
    pub parent_refs: Vec<AggregateId>,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub rejection_reason: Option<String>,
    pub version: u64,
}

/// Outcome of a committed transition, stored per idempotency key so a
/// re-submitted action returns the original result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionReceipt {
    pub document_id: AggregateId,
    pub doc_type: DocumentType,
    pub action: Action,
    pub from: DocumentStatus,
    pub to: DocumentStatus,
    pub version: u64,
    pub idempotency_key: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Aggregate root: Document (header + lines).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    header: DocumentHeader,
    tenant_id: Option<TenantId>,
    lines: Vec<DocumentLine>,
    receipts: BTreeMap<String, TransitionReceipt>,
    last_transition: Option<TransitionReceipt>,
    created: bool,
}

impl Document {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: AggregateId) -> Self {
        Self {
            header: DocumentHeader {
                id,
                doc_type: DocumentType::PurchaseOrder,
                status: DocumentStatus::Draft,
                company_id: CompanyId::from_uuid(uuid::Uuid::nil()),
                warehouse_id: None,
                destination_warehouse_id: None,
                parent_refs: Vec::new(),
                created_by: UserId::from_uuid(uuid::Uuid::nil()),
                created_at: DateTime::<Utc>::UNIX_EPOCH,
                updated_at: DateTime::<Utc>::UNIX_EPOCH,
                rejection_reason: None,
                version: 0,
            },
            tenant_id: None,
            lines: Vec::new(),
            receipts: BTreeMap::new(),
            last_transition: None,
            created: false,
        }
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn header(&self) -> &DocumentHeader {
        &self.header
    }

    pub fn doc_type(&self) -> DocumentType {
        self.header.doc_type
    }

    pub fn status(&self) -> DocumentStatus {
        self.header.status
    }

    pub fn lines(&self) -> &[DocumentLine] {
        &self.lines
    }

    pub fn line(&self, line_id: AggregateId) -> Option<&DocumentLine> {
        self.lines.iter().find(|l| l.line_id == line_id)
    }

    pub fn is_terminal(&self) -> bool {
        is_terminal(self.header.doc_type, self.header.status)
    }

    /// Receipt recorded for an idempotency key, if that key was used.
    pub fn receipt(&self, idempotency_key: &str) -> Option<&TransitionReceipt> {
        self.receipts.get(idempotency_key)
    }

    /// Most recent transition applied to this document.
    pub fn last_transition(&self) -> Option<&TransitionReceipt> {
        self.last_transition.as_ref()
    }
}

impl AggregateRoot for Document {
    type Id = AggregateId;

    fn id(&self) -> &Self::Id {
        &self.header.id
    }

    fn version(&self) -> u64 {
        self.header.version
    }
}

/// A line as supplied at creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewLine {
    pub line_id: AggregateId,
    pub reference_line_id: Option<AggregateId>,
    pub product_id: ProductId,
    pub ordered_qty: Decimal,
}

/// Command: CreateDocument (header and lines together).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateDocument {
    pub tenant_id: TenantId,
    pub document_id: AggregateId,
    pub doc_type: DocumentType,
    pub company_id: CompanyId,
    pub warehouse_id: Option<WarehouseId>,
    pub destination_warehouse_id: Option<WarehouseId>,
    pub parent_refs: Vec<AggregateId>,
    pub lines: Vec<NewLine>,
    pub created_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Own-line changes and flags carried by a transition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionPayload {
    pub line_deltas: Vec<LineDelta>,
    pub line_limits: BTreeMap<AggregateId, LineLimits>,
    pub force: bool,
    pub reason: Option<String>,
}

/// Command: ApplyTransition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyTransition {
    pub tenant_id: TenantId,
    pub document_id: AggregateId,
    pub action: Action,
    pub payload: TransitionPayload,
    pub idempotency_key: Option<String>,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ApplyLineDeltas.
///
/// Quantity changes pushed onto this document by a downstream document
/// (a receipt bumping its order, an invoice bumping its receipt).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyLineDeltas {
    pub tenant_id: TenantId,
    pub document_id: AggregateId,
    pub deltas: Vec<LineDelta>,
    pub limits: BTreeMap<AggregateId, LineLimits>,
    pub source_document_id: AggregateId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocumentCommand {
    Create(CreateDocument),
    Transition(ApplyTransition),
    AdjustLines(ApplyLineDeltas),
}

/// Event: DocumentCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentCreated {
    pub tenant_id: TenantId,
    pub document_id: AggregateId,
    pub doc_type: DocumentType,
    pub company_id: CompanyId,
    pub warehouse_id: Option<WarehouseId>,
    pub destination_warehouse_id: Option<WarehouseId>,
    pub parent_refs: Vec<AggregateId>,
    pub lines: Vec<DocumentLine>,
    pub created_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: DocumentTransitioned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentTransitioned {
    pub tenant_id: TenantId,
    pub document_id: AggregateId,
    pub action: Action,
    pub from: DocumentStatus,
    pub to: DocumentStatus,
    pub line_deltas: Vec<LineDelta>,
    pub reason: Option<String>,
    pub idempotency_key: Option<String>,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: LineQuantitiesAdjusted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineQuantitiesAdjusted {
    pub tenant_id: TenantId,
    pub document_id: AggregateId,
    pub deltas: Vec<LineDelta>,
    pub source_document_id: AggregateId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocumentEvent {
    DocumentCreated(DocumentCreated),
    DocumentTransitioned(DocumentTransitioned),
    LineQuantitiesAdjusted(LineQuantitiesAdjusted),
}

impl Event for DocumentEvent {
    fn event_type(&self) -> &'static str {
        match self {
            DocumentEvent::DocumentCreated(_) => "documents.document.created",
            DocumentEvent::DocumentTransitioned(_) => "documents.document.transitioned",
            DocumentEvent::LineQuantitiesAdjusted(_) => "documents.document.lines_adjusted",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            DocumentEvent::DocumentCreated(e) => e.occurred_at,
            DocumentEvent::DocumentTransitioned(e) => e.occurred_at,
            DocumentEvent::LineQuantitiesAdjusted(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Document {
    type Command = DocumentCommand;
    type Event = DocumentEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            DocumentEvent::DocumentCreated(e) => {
                self.tenant_id = Some(e.tenant_id);
                self.header.id = e.document_id;
                self.header.doc_type = e.doc_type;
                self.header.status = initial_status(e.doc_type);
                self.header.company_id = e.company_id;
                self.header.warehouse_id = e.warehouse_id;
                self.header.destination_warehouse_id = e.destination_warehouse_id;
                self.header.parent_refs = e.parent_refs.clone();
                self.header.created_by = e.created_by;
                self.header.created_at = e.occurred_at;
                self.header.updated_at = e.occurred_at;
                self.lines = e.lines.clone();
                self.created = true;
            }
            DocumentEvent::DocumentTransitioned(e) => {
                self.replay_deltas(&e.line_deltas);
                self.header.status = e.to;
                self.header.updated_at = e.occurred_at;
                if e.action == Action::Reject {
                    self.header.rejection_reason = e.reason.clone();
                }

                let receipt = TransitionReceipt {
                    document_id: e.document_id,
                    doc_type: self.header.doc_type,
                    action: e.action,
                    from: e.from,
                    to: e.to,
                    version: self.header.version + 1,
                    idempotency_key: e.idempotency_key.clone(),
                    occurred_at: e.occurred_at,
                };
                if let Some(key) = &e.idempotency_key {
                    self.receipts.insert(key.clone(), receipt.clone());
                }
                self.last_transition = Some(receipt);
            }
            DocumentEvent::LineQuantitiesAdjusted(e) => {
                self.replay_deltas(&e.deltas);
                self.header.updated_at = e.occurred_at;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.header.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            DocumentCommand::Create(cmd) => self.handle_create(cmd),
            DocumentCommand::Transition(cmd) => self.handle_transition(cmd),
            DocumentCommand::AdjustLines(cmd) => self.handle_adjust_lines(cmd),
        }
    }
}

impl Document {
    fn replay_deltas(&mut self, deltas: &[LineDelta]) {
        for d in deltas {
            if let Some(line) = self.lines.iter_mut().find(|l| l.line_id == d.line_id) {
                line.add(d.field, d.delta);
            }
        }
    }

    fn ensure_exists(&self, tenant_id: TenantId) -> Result<(), DomainError> {
        if !self.created || self.tenant_id != Some(tenant_id) {
            return Err(DomainError::not_found(format!("document {}", self.header.id)));
        }
        Ok(())
    }

    fn ensure_document_id(&self, document_id: AggregateId) -> Result<(), DomainError> {
        if self.header.id != document_id {
            return Err(DomainError::validation("document_id mismatch"));
        }
        Ok(())
    }

    /// State error unless the current status has an edge for `action`.
    pub fn ensure_action(&self, action: Action) -> Result<(), DomainError> {
        if transitions::has_edge(self.header.doc_type, self.header.status, action) {
            Ok(())
        } else {
            Err(self.violation(action, "no such transition"))
        }
    }

    fn violation(&self, action: Action, message: impl Into<String>) -> DomainError {
        DomainError::state(StateViolation::new(
            self.header.doc_type.as_str(),
            self.header.status.as_str(),
            action.as_str(),
            message,
        ))
    }

    fn handle_create(&self, cmd: &CreateDocument) -> Result<Vec<DocumentEvent>, DomainError> {
        if self.created {
            return Err(DomainError::duplicate(format!("document {} already exists", cmd.document_id)));
        }
        if cmd.document_id != self.header.id {
            return Err(DomainError::validation("document_id mismatch"));
        }
        validate_header(cmd)?;

        let mut seen = BTreeSet::new();
        let mut lines = Vec::with_capacity(cmd.lines.len());
        for line in &cmd.lines {
            if !seen.insert(line.line_id) {
                return Err(DomainError::validation(format!("duplicate line id {}", line.line_id)));
            }
            validate_ordered_qty(cmd.doc_type, line)?;
            if cmd.doc_type.requires_reference_lines() && line.reference_line_id.is_none() {
                return Err(DomainError::validation(format!(
                    "line {} must reference a parent document line",
                    line.line_id
                )));
            }
            lines.push(DocumentLine::new(
                line.line_id,
                cmd.document_id,
                line.reference_line_id,
                line.product_id,
                line.ordered_qty,
            ));
        }

        Ok(vec![DocumentEvent::DocumentCreated(DocumentCreated {
            tenant_id: cmd.tenant_id,
            document_id: cmd.document_id,
            doc_type: cmd.doc_type,
            company_id: cmd.company_id,
            warehouse_id: cmd.warehouse_id,
            destination_warehouse_id: cmd.destination_warehouse_id,
            parent_refs: cmd.parent_refs.clone(),
            lines,
            created_by: cmd.created_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_transition(&self, cmd: &ApplyTransition) -> Result<Vec<DocumentEvent>, DomainError> {
        self.ensure_exists(cmd.tenant_id)?;
        self.ensure_document_id(cmd.document_id)?;

        if let Some(key) = &cmd.idempotency_key {
            if key.trim().is_empty() {
                return Err(DomainError::validation("idempotency key cannot be blank"));
            }
            if let Some(previous) = self.receipts.get(key) {
                if previous.action == cmd.action {
                    return Ok(Vec::new());
                }
                return Err(DomainError::validation(format!(
                    "idempotency key {key:?} was already used for {}",
                    previous.action
                )));
            }
        }

        self.ensure_action(cmd.action)?;
        let projected = apply_deltas(&self.lines, &cmd.payload.line_deltas, &cmd.payload.line_limits)?;

        let to = transitions::target(self.header.doc_type, self.header.status, cmd.action, &projected)
            .ok_or_else(|| self.violation(cmd.action, "no such transition"))?;

        guards::check(self.header.doc_type, cmd.action, &projected, &cmd.payload)
            .map_err(|msg| self.violation(cmd.action, msg))?;

        Ok(vec![DocumentEvent::DocumentTransitioned(DocumentTransitioned {
            tenant_id: cmd.tenant_id,
            document_id: cmd.document_id,
            action: cmd.action,
            from: self.header.status,
            to,
            line_deltas: cmd.payload.line_deltas.clone(),
            reason: cmd.payload.reason.clone(),
            idempotency_key: cmd.idempotency_key.clone(),
            actor: cmd.actor,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_adjust_lines(&self, cmd: &ApplyLineDeltas) -> Result<Vec<DocumentEvent>, DomainError> {
        self.ensure_exists(cmd.tenant_id)?;
        self.ensure_document_id(cmd.document_id)?;

        if cmd.deltas.is_empty() {
            return Err(DomainError::validation("no line deltas given"));
        }

        let invoicing_only = cmd.deltas.iter().all(|d| d.field == QuantityField::Invoiced);
        let open = if invoicing_only {
            accepts_invoicing(self.header.doc_type, self.header.status)
        } else {
            !self.is_terminal()
        };
        if !open {
            return Err(DomainError::state(StateViolation::new(
                self.header.doc_type.as_str(),
                self.header.status.as_str(),
                "update lines",
                "document lines are closed",
            )));
        }

        apply_deltas(&self.lines, &cmd.deltas, &cmd.limits)?;

        Ok(vec![DocumentEvent::LineQuantitiesAdjusted(LineQuantitiesAdjusted {
            tenant_id: cmd.tenant_id,
            document_id: cmd.document_id,
            deltas: cmd.deltas.clone(),
            source_document_id: cmd.source_document_id,
            occurred_at: cmd.occurred_at,
        })])
    }
}

/// Statuses in which downstream invoicing may still move `invoiced_qty`.
fn accepts_invoicing(doc_type: DocumentType, status: DocumentStatus) -> bool {
    matches!(
        (doc_type, status),
        (DocumentType::PurchaseOrder, DocumentStatus::Confirmed | DocumentStatus::Completed)
            | (DocumentType::GoodsReceipt, DocumentStatus::Accepted | DocumentStatus::Partial)
    )
}

fn validate_header(cmd: &CreateDocument) -> Result<(), DomainError> {
    if cmd.lines.is_empty() {
        return Err(DomainError::validation(format!("{} needs at least one line", cmd.doc_type)));
    }
    if cmd.doc_type.requires_warehouse() && cmd.warehouse_id.is_none() {
        return Err(DomainError::validation(format!("{} requires a warehouse", cmd.doc_type)));
    }
    if cmd.doc_type == DocumentType::StockTransfer {
        match cmd.destination_warehouse_id {
            None => return Err(DomainError::validation("stock transfer requires a destination warehouse")),
            Some(dest) if Some(dest) == cmd.warehouse_id => {
                return Err(DomainError::validation(
                    "stock transfer source and destination must differ",
                ));
            }
            Some(_) => {}
        }
    }
    if cmd.doc_type.requires_reference_lines() && cmd.parent_refs.is_empty() {
        return Err(DomainError::validation(format!("{} must reference a parent document", cmd.doc_type)));
    }
    Ok(())
}

fn validate_ordered_qty(doc_type: DocumentType, line: &NewLine) -> Result<(), DomainError> {
    let qty = line.ordered_qty;
    let ok = match doc_type {
        DocumentType::InventoryAdjustment => !qty.is_zero(),
        DocumentType::StockOpname => qty >= Decimal::ZERO,
        _ => qty > Decimal::ZERO,
    };
    if !ok {
        return Err(DomainError::validation(format!(
            "orderedQty {} is not valid for a {doc_type} line",
            qty.normalize()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use tallyerp_events::execute;

    fn test_tenant_id() -> TenantId {
        TenantId::new()
    }

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn created(doc_type: DocumentType, tenant_id: TenantId, ordered: &[Decimal]) -> Document {
        let id = AggregateId::new();
        let mut doc = Document::empty(id);
        let needs_ref = doc_type.requires_reference_lines();
        let cmd = CreateDocument {
            tenant_id,
            document_id: id,
            doc_type,
            company_id: CompanyId::new(),
            warehouse_id: Some(WarehouseId::new()),
            destination_warehouse_id: (doc_type == DocumentType::StockTransfer).then(WarehouseId::new),
            parent_refs: if needs_ref { vec![AggregateId::new()] } else { Vec::new() },
            lines: ordered
                .iter()
                .map(|q| NewLine {
                    line_id: AggregateId::new(),
                    reference_line_id: needs_ref.then(AggregateId::new),
                    product_id: ProductId::new(),
                    ordered_qty: *q,
                })
                .collect(),
            created_by: UserId::new(),
            occurred_at: test_time(),
        };
        execute(&mut doc, &DocumentCommand::Create(cmd)).unwrap();
        doc
    }

    fn transition(doc: &Document, action: Action, payload: TransitionPayload, key: Option<&str>) -> DocumentCommand {
        DocumentCommand::Transition(ApplyTransition {
            tenant_id: doc.tenant_id().unwrap(),
            document_id: *doc.id(),
            action,
            payload,
            idempotency_key: key.map(str::to_string),
            actor: UserId::new(),
            occurred_at: test_time(),
        })
    }

    fn deltas(doc: &Document, field: QuantityField, qty: &[Decimal]) -> TransitionPayload {
        TransitionPayload {
            line_deltas: doc
                .lines()
                .iter()
                .zip(qty)
                .map(|(l, q)| LineDelta::new(l.line_id, field, *q))
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn create_emits_lines_with_zero_totals() {
        let doc = created(DocumentType::PurchaseOrder, test_tenant_id(), &[dec!(100), dec!(5)]);
        assert_eq!(doc.status(), DocumentStatus::Draft);
        assert_eq!(doc.version(), 1);
        assert_eq!(doc.lines().len(), 2);
        assert!(doc.lines().iter().all(|l| l.received_qty.is_zero() && l.parent_doc_id == *doc.id()));
    }

    #[test]
    fn create_twice_is_duplicate() {
        let tenant = test_tenant_id();
        let doc = created(DocumentType::SalesOrder, tenant, &[dec!(1)]);
        let cmd = CreateDocument {
            tenant_id: tenant,
            document_id: *doc.id(),
            doc_type: DocumentType::SalesOrder,
            company_id: CompanyId::new(),
            warehouse_id: None,
            destination_warehouse_id: None,
            parent_refs: Vec::new(),
            lines: Vec::new(),
            created_by: UserId::new(),
            occurred_at: test_time(),
        };
        let err = doc.handle(&DocumentCommand::Create(cmd)).unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[test]
    fn receipt_lines_must_reference_parent_lines() {
        let id = AggregateId::new();
        let doc = Document::empty(id);
        let cmd = CreateDocument {
            tenant_id: test_tenant_id(),
            document_id: id,
            doc_type: DocumentType::GoodsReceipt,
            company_id: CompanyId::new(),
            warehouse_id: Some(WarehouseId::new()),
            destination_warehouse_id: None,
            parent_refs: vec![AggregateId::new()],
            lines: vec![NewLine {
                line_id: AggregateId::new(),
                reference_line_id: None,
                product_id: ProductId::new(),
                ordered_qty: dec!(10),
            }],
            created_by: UserId::new(),
            occurred_at: test_time(),
        };
        assert!(matches!(doc.handle(&DocumentCommand::Create(cmd)), Err(DomainError::Validation(_))));
    }

    #[test]
    fn skipping_a_status_is_a_state_error() {
        let doc = created(DocumentType::PurchaseOrder, test_tenant_id(), &[dec!(10)]);
        let err = doc
            .handle(&transition(&doc, Action::Complete, TransitionPayload::default(), None))
            .unwrap_err();
        match err {
            DomainError::State(v) => {
                assert_eq!(v.status, "DRAFT");
                assert_eq!(v.action, "complete");
            }
            other => panic!("expected state error, got {other:?}"),
        }
    }

    #[test]
    fn missing_edge_wins_over_ledger_errors() {
        let grn = created(DocumentType::GoodsReceipt, test_tenant_id(), &[dec!(10)]);
        let payload = deltas(&grn, QuantityField::Accepted, &[dec!(5)]);

        let err = grn.handle(&transition(&grn, Action::Accept, payload, None)).unwrap_err();
        match err {
            DomainError::State(v) => {
                assert_eq!(v.status, "PENDING");
                assert_eq!(v.action, "accept");
            }
            other => panic!("expected state error, got {other:?}"),
        }
    }

    #[test]
    fn goods_receipt_with_rejections_lands_in_partial() {
        let mut grn = created(DocumentType::GoodsReceipt, test_tenant_id(), &[dec!(10)]);

        let cmd = transition(&grn, Action::Receive, deltas(&grn, QuantityField::Received, &[dec!(10)]), None);
        execute(&mut grn, &cmd).unwrap();
        let cmd = transition(&grn, Action::Inspect, TransitionPayload::default(), None);
        execute(&mut grn, &cmd).unwrap();

        let line_id = grn.lines()[0].line_id;
        let payload = TransitionPayload {
            line_deltas: vec![
                LineDelta::new(line_id, QuantityField::Accepted, dec!(7)),
                LineDelta::new(line_id, QuantityField::Rejected, dec!(3)),
            ],
            ..Default::default()
        };
        let cmd = transition(&grn, Action::Accept, payload, None);
        execute(&mut grn, &cmd).unwrap();

        assert_eq!(grn.status(), DocumentStatus::Partial);
        assert_eq!(grn.lines()[0].accepted_qty, dec!(7));
        assert!(grn.is_terminal());
    }

    #[test]
    fn idempotent_replay_emits_nothing_and_keeps_receipt() {
        let mut po = created(DocumentType::PurchaseOrder, test_tenant_id(), &[dec!(10)]);
        let confirm = transition(&po, Action::Confirm, TransitionPayload::default(), Some("k-1"));
        execute(&mut po, &confirm).unwrap();
        let version = po.version();

        let again = po.handle(&confirm).unwrap();
        assert!(again.is_empty());
        let receipt = po.receipt("k-1").unwrap();
        assert_eq!(receipt.to, DocumentStatus::Confirmed);
        assert_eq!(receipt.version, version);

        let misuse = transition(&po, Action::Cancel, TransitionPayload::default(), Some("k-1"));
        assert!(matches!(po.handle(&misuse), Err(DomainError::Validation(_))));
    }

    #[test]
    fn ledger_violation_in_payload_rejects_the_transition() {
        let grn = created(DocumentType::GoodsReceipt, test_tenant_id(), &[dec!(100)]);
        let mut payload = deltas(&grn, QuantityField::Received, &[dec!(111)]);
        payload
            .line_limits
            .insert(grn.lines()[0].line_id, LineLimits::with_ceiling(dec!(110)));

        let err = grn.handle(&transition(&grn, Action::Receive, payload, None)).unwrap_err();
        assert!(matches!(err, DomainError::Conflict(d) if d.attempted == Some(dec!(111)) && d.limit == Some(dec!(110))));
    }

    #[test]
    fn terminal_documents_only_take_invoicing_deltas() {
        let mut grn = created(DocumentType::GoodsReceipt, test_tenant_id(), &[dec!(5)]);
        let receive = transition(&grn, Action::Receive, deltas(&grn, QuantityField::Received, &[dec!(5)]), None);
        execute(&mut grn, &receive).unwrap();
        let cmd = transition(&grn, Action::Inspect, TransitionPayload::default(), None);
        execute(&mut grn, &cmd).unwrap();
        let accept = transition(&grn, Action::Accept, deltas(&grn, QuantityField::Accepted, &[dec!(5)]), None);
        execute(&mut grn, &accept).unwrap();
        assert_eq!(grn.status(), DocumentStatus::Accepted);

        let adjust = |field| {
            DocumentCommand::AdjustLines(ApplyLineDeltas {
                tenant_id: grn.tenant_id().unwrap(),
                document_id: *grn.id(),
                deltas: vec![LineDelta::new(grn.lines()[0].line_id, field, dec!(2))],
                limits: BTreeMap::new(),
                source_document_id: AggregateId::new(),
                occurred_at: test_time(),
            })
        };

        assert!(grn.handle(&adjust(QuantityField::Invoiced)).is_ok());
        assert!(matches!(grn.handle(&adjust(QuantityField::Received)), Err(DomainError::State(_))));
    }

    #[test]
    fn other_tenant_cannot_see_the_document() {
        let doc = created(DocumentType::InventoryAdjustment, test_tenant_id(), &[dec!(-3)]);
        let mut cmd = transition(&doc, Action::Approve, TransitionPayload::default(), None);
        if let DocumentCommand::Transition(t) = &mut cmd {
            t.tenant_id = test_tenant_id();
        }
        assert!(matches!(doc.handle(&cmd), Err(DomainError::NotFound(_))));
    }

    #[test]
    fn reject_records_the_reason() {
        let mut grn = created(DocumentType::GoodsReceipt, test_tenant_id(), &[dec!(4)]);
        let receive = transition(&grn, Action::Receive, deltas(&grn, QuantityField::Received, &[dec!(4)]), None);
        execute(&mut grn, &receive).unwrap();
        let cmd = transition(&grn, Action::Inspect, TransitionPayload::default(), None);
        execute(&mut grn, &cmd).unwrap();

        let mut payload = deltas(&grn, QuantityField::Rejected, &[dec!(4)]);
        payload.reason = Some("wrong item".into());
        let cmd = transition(&grn, Action::Reject, payload, None);
        execute(&mut grn, &cmd).unwrap();

        assert_eq!(grn.status(), DocumentStatus::Rejected);
        assert_eq!(grn.header().rejection_reason.as_deref(), Some("wrong item"));
    }
}

use std::collections::BTreeMap;

use axum::body::Bytes;
use axum::http::StatusCode;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value as JsonValue, json};

use tallyerp_core::{AggregateId, ProductId, WarehouseId};
use tallyerp_disposition::Disposition;
use tallyerp_documents::{Document, available_actions};
use tallyerp_infra::engine::{
    ActionInput, DeliveryLineInput, DispositionView, Inspection, InvoiceLineInput, LineInput, NewTolerance,
    ReceiptLineInput, TransitionOutcome,
};
use tallyerp_inventory::WarehouseStock;
use tallyerp_ledger::QuantityField;
use tallyerp_reconciliation::InvoiceControlPolicy;
use tallyerp_tolerance::{ResolvedTolerance, ToleranceLevel, ToleranceSetting, ToleranceUpdate};

use crate::app::errors;

// -------------------------
// Body parsing
// -------------------------

pub fn parse_json<T: DeserializeOwned>(body: &Bytes) -> Result<T, axum::response::Response> {
    serde_json::from_slice(body)
        .map_err(|e| errors::json_error(StatusCode::BAD_REQUEST, "validation_error", format!("invalid request body: {e}")))
}

/// Like [`parse_json`], but an empty body yields the default request.
pub fn parse_optional_json<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, axum::response::Response> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    parse_json(body)
}

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderLineRequest {
    pub product_id: ProductId,
    pub qty: Decimal,
}

/// Purchase/sales orders, transfers and adjustments.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDocumentRequest {
    pub warehouse_id: Option<WarehouseId>,
    pub destination_warehouse_id: Option<WarehouseId>,
    pub lines: Vec<OrderLineRequest>,
}

impl CreateDocumentRequest {
    pub fn lines(&self) -> Vec<LineInput> {
        self.lines
            .iter()
            .map(|l| LineInput {
                product_id: l.product_id,
                qty: l.qty,
            })
            .collect()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptLineRequest {
    pub po_line_id: AggregateId,
    pub expected_qty: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateGoodsReceiptRequest {
    pub purchase_order_id: AggregateId,
    pub warehouse_id: Option<WarehouseId>,
    #[serde(default)]
    pub lines: Vec<ReceiptLineRequest>,
}

impl CreateGoodsReceiptRequest {
    pub fn lines(&self) -> Vec<ReceiptLineInput> {
        self.lines
            .iter()
            .map(|l| ReceiptLineInput {
                po_line_id: l.po_line_id,
                expected_qty: l.expected_qty,
            })
            .collect()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceLineRequest {
    pub goods_receipt_id: AggregateId,
    pub grn_line_id: AggregateId,
    pub qty: Decimal,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateInvoiceRequest {
    pub lines: Vec<InvoiceLineRequest>,
}

impl CreateInvoiceRequest {
    pub fn lines(&self) -> Vec<InvoiceLineInput> {
        self.lines
            .iter()
            .map(|l| InvoiceLineInput {
                goods_receipt_id: l.goods_receipt_id,
                grn_line_id: l.grn_line_id,
                qty: l.qty,
            })
            .collect()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryLineRequest {
    pub so_line_id: AggregateId,
    pub qty: Decimal,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDeliveryRequest {
    pub sales_order_id: AggregateId,
    pub warehouse_id: Option<WarehouseId>,
    pub lines: Vec<DeliveryLineRequest>,
}

impl CreateDeliveryRequest {
    pub fn lines(&self) -> Vec<DeliveryLineInput> {
        self.lines
            .iter()
            .map(|l| DeliveryLineInput {
                so_line_id: l.so_line_id,
                qty: l.qty,
            })
            .collect()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOpnameRequest {
    pub warehouse_id: WarehouseId,
    pub product_ids: Vec<ProductId>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineQtyRequest {
    pub line_id: AggregateId,
    pub qty: Decimal,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InspectionRequest {
    pub line_id: AggregateId,
    #[serde(default)]
    pub accepted_qty: Decimal,
    #[serde(default)]
    pub rejected_qty: Decimal,
}

/// Body of any document action. Each action reads the fields it needs.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionRequest {
    #[serde(default)]
    pub lines: Vec<LineQtyRequest>,
    #[serde(default)]
    pub inspections: Vec<InspectionRequest>,
    #[serde(default)]
    pub force: bool,
    pub rejection_reason: Option<String>,
    pub reason: Option<String>,
}

impl ActionRequest {
    pub fn into_input(self) -> Result<ActionInput, axum::response::Response> {
        let mut quantities = BTreeMap::new();
        for line in self.lines {
            if quantities.insert(line.line_id, line.qty).is_some() {
                return Err(duplicate_line(line.line_id));
            }
        }
        let mut inspections = BTreeMap::new();
        for i in self.inspections {
            let inspection = Inspection {
                accepted: i.accepted_qty,
                rejected: i.rejected_qty,
            };
            if inspections.insert(i.line_id, inspection).is_some() {
                return Err(duplicate_line(i.line_id));
            }
        }
        Ok(ActionInput {
            quantities,
            inspections,
            force: self.force,
            reason: self.rejection_reason.or(self.reason),
        })
    }
}

fn duplicate_line(line_id: AggregateId) -> axum::response::Response {
    errors::json_error(StatusCode::BAD_REQUEST, "validation_error", format!("line {line_id} is listed twice"))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyDeltaRequest {
    pub field: QuantityField,
    pub delta: Decimal,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateToleranceRequest {
    pub level: ToleranceLevel,
    pub scope_key: String,
    #[serde(default)]
    pub under_delivery_tolerance: Decimal,
    #[serde(default)]
    pub over_delivery_tolerance: Decimal,
    #[serde(default)]
    pub unlimited_over_delivery: bool,
}

impl From<CreateToleranceRequest> for NewTolerance {
    fn from(r: CreateToleranceRequest) -> Self {
        Self {
            level: r.level,
            scope_key: r.scope_key,
            under_pct: r.under_delivery_tolerance,
            over_pct: r.over_delivery_tolerance,
            unlimited_over: r.unlimited_over_delivery,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateToleranceRequest {
    pub under_delivery_tolerance: Option<Decimal>,
    pub over_delivery_tolerance: Option<Decimal>,
    pub unlimited_over_delivery: Option<bool>,
    pub is_active: Option<bool>,
}

impl From<UpdateToleranceRequest> for ToleranceUpdate {
    fn from(r: UpdateToleranceRequest) -> Self {
        Self {
            under_pct: r.under_delivery_tolerance,
            over_pct: r.over_delivery_tolerance,
            unlimited_over: r.unlimited_over_delivery,
            is_active: r.is_active,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectiveToleranceQuery {
    pub product_id: String,
    pub company_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateDispositionRequest {
    pub disposition: Disposition,
    pub notes: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveDispositionRequest {
    pub disposition: Option<Disposition>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoicePolicyRequest {
    pub invoice_control_policy: InvoiceControlPolicy,
}

// -------------------------
// JSON mapping helpers
// -------------------------

pub fn document_to_json(doc: &Document) -> JsonValue {
    let header = doc.header();
    json!({
        "id": header.id.to_string(),
        "docType": header.doc_type,
        "status": header.status,
        "companyId": header.company_id.to_string(),
        "warehouseId": header.warehouse_id.map(|w| w.to_string()),
        "destinationWarehouseId": header.destination_warehouse_id.map(|w| w.to_string()),
        "parentRefs": header.parent_refs.iter().map(|id| id.to_string()).collect::<Vec<_>>(),
        "createdBy": header.created_by.to_string(),
        "createdAt": header.created_at,
        "updatedAt": header.updated_at,
        "rejectionReason": header.rejection_reason,
        "version": header.version,
        "availableActions": available_actions(header.doc_type, header.status),
        "lines": doc.lines(),
    })
}

pub fn outcome_to_json(outcome: &TransitionOutcome) -> JsonValue {
    let receipt = &outcome.receipt;
    json!({
        "document": document_to_json(&outcome.document),
        "transition": {
            "action": receipt.action,
            "from": receipt.from,
            "to": receipt.to,
            "version": receipt.version,
            "idempotencyKey": receipt.idempotency_key,
            "occurredAt": receipt.occurred_at,
        },
        "replayed": outcome.replayed,
    })
}

pub fn tolerance_to_json(s: &ToleranceSetting) -> JsonValue {
    json!({
        "id": s.id.to_string(),
        "level": s.level,
        "scopeKey": s.scope_key,
        "underDeliveryTolerance": s.under_pct,
        "overDeliveryTolerance": s.over_pct,
        "unlimitedOverDelivery": s.unlimited_over,
        "isActive": s.is_active,
        "createdAt": s.created_at,
        "updatedAt": s.updated_at,
    })
}

pub fn resolved_tolerance_to_json(t: &ResolvedTolerance) -> JsonValue {
    json!({
        "underDeliveryTolerance": t.under_pct,
        "overDeliveryTolerance": t.over_pct,
        "unlimitedOverDelivery": t.unlimited_over,
        "resolvedFrom": t.resolved_from,
        "toleranceId": t.tolerance_id.map(|id| id.to_string()),
    })
}

pub fn disposition_to_json(view: &DispositionView) -> JsonValue {
    serde_json::to_value(view).unwrap_or(JsonValue::Null)
}

pub fn stock_to_json(stock: &WarehouseStock) -> JsonValue {
    json!({
        "warehouseId": stock.warehouse_id().to_string(),
        "levels": stock
            .levels()
            .iter()
            .map(|(product_id, on_hand)| json!({ "productId": product_id.to_string(), "onHand": on_hand }))
            .collect::<Vec<_>>(),
    })
}

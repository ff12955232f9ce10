use serde::{Deserialize, Serialize};

use tallyerp_core::DomainError;

/// The eight document kinds handled by the state machine.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentType {
    PurchaseOrder,
    GoodsReceipt,
    PurchaseInvoice,
    SalesOrder,
    Delivery,
    StockTransfer,
    InventoryAdjustment,
    StockOpname,
}

impl DocumentType {
    pub const ALL: [DocumentType; 8] = [
        DocumentType::PurchaseOrder,
        DocumentType::GoodsReceipt,
        DocumentType::PurchaseInvoice,
        DocumentType::SalesOrder,
        DocumentType::Delivery,
        DocumentType::StockTransfer,
        DocumentType::InventoryAdjustment,
        DocumentType::StockOpname,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::PurchaseOrder => "PURCHASE_ORDER",
            DocumentType::GoodsReceipt => "GOODS_RECEIPT",
            DocumentType::PurchaseInvoice => "PURCHASE_INVOICE",
            DocumentType::SalesOrder => "SALES_ORDER",
            DocumentType::Delivery => "DELIVERY",
            DocumentType::StockTransfer => "STOCK_TRANSFER",
            DocumentType::InventoryAdjustment => "INVENTORY_ADJUSTMENT",
            DocumentType::StockOpname => "STOCK_OPNAME",
        }
    }

    /// Whether the document must name a warehouse at creation.
    pub fn requires_warehouse(&self) -> bool {
        matches!(
            self,
            DocumentType::GoodsReceipt
                | DocumentType::Delivery
                | DocumentType::StockTransfer
                | DocumentType::InventoryAdjustment
                | DocumentType::StockOpname
        )
    }

    /// Whether every line must reference a line of a parent document.
    pub fn requires_reference_lines(&self) -> bool {
        matches!(
            self,
            DocumentType::GoodsReceipt | DocumentType::PurchaseInvoice | DocumentType::Delivery
        )
    }
}

impl core::fmt::Display for DocumentType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentStatus {
    Draft,
    Pending,
    Confirmed,
    Approved,
    Processing,
    InProgress,
    Received,
    Inspected,
    Accepted,
    Partial,
    Rejected,
    Posted,
    Shipped,
    Delivered,
    Completed,
    Cancelled,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Draft => "DRAFT",
            DocumentStatus::Pending => "PENDING",
            DocumentStatus::Confirmed => "CONFIRMED",
            DocumentStatus::Approved => "APPROVED",
            DocumentStatus::Processing => "PROCESSING",
            DocumentStatus::InProgress => "IN_PROGRESS",
            DocumentStatus::Received => "RECEIVED",
            DocumentStatus::Inspected => "INSPECTED",
            DocumentStatus::Accepted => "ACCEPTED",
            DocumentStatus::Partial => "PARTIAL",
            DocumentStatus::Rejected => "REJECTED",
            DocumentStatus::Posted => "POSTED",
            DocumentStatus::Shipped => "SHIPPED",
            DocumentStatus::Delivered => "DELIVERED",
            DocumentStatus::Completed => "COMPLETED",
            DocumentStatus::Cancelled => "CANCELLED",
        }
    }
}

impl core::fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named transition request.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Submit,
    Confirm,
    Approve,
    Process,
    Start,
    Receive,
    Inspect,
    Accept,
    Reject,
    Post,
    Ship,
    Deliver,
    Complete,
    Cancel,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Submit => "submit",
            Action::Confirm => "confirm",
            Action::Approve => "approve",
            Action::Process => "process",
            Action::Start => "start",
            Action::Receive => "receive",
            Action::Inspect => "inspect",
            Action::Accept => "accept",
            Action::Reject => "reject",
            Action::Post => "post",
            Action::Ship => "ship",
            Action::Deliver => "deliver",
            Action::Complete => "complete",
            Action::Cancel => "cancel",
        }
    }
}

impl core::fmt::Display for Action {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for Action {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let action = match s {
            "submit" => Action::Submit,
            "confirm" => Action::Confirm,
            "approve" => Action::Approve,
            "process" => Action::Process,
            "start" => Action::Start,
            "receive" => Action::Receive,
            "inspect" => Action::Inspect,
            "accept" => Action::Accept,
            "reject" => Action::Reject,
            "post" => Action::Post,
            "ship" => Action::Ship,
            "deliver" => Action::Deliver,
            "complete" => Action::Complete,
            "cancel" => Action::Cancel,
            other => return Err(DomainError::validation(format!("unknown action {other:?}"))),
        };
        Ok(action)
    }
}

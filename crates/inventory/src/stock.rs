use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use tallyerp_core::{
    Aggregate, AggregateId, AggregateRoot, ConflictDetail, ConflictKind, DomainError, ProductId,
    TenantId, WarehouseId,
};
use tallyerp_events::Event;

/// Aggregate root: WarehouseStock.
///
/// The stream id is the warehouse id. A warehouse has no creation event; its
/// first movement claims it for the tenant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WarehouseStock {
    id: AggregateId,
    warehouse_id: WarehouseId,
    tenant_id: Option<TenantId>,
    on_hand: BTreeMap<ProductId, Decimal>,
    version: u64,
}

impl WarehouseStock {
    /// Create an empty aggregate instance for rehydration.
    pub fn empty(warehouse_id: WarehouseId) -> Self {
        Self {
            id: warehouse_id.stream_id(),
            warehouse_id,
            tenant_id: None,
            on_hand: BTreeMap::new(),
            version: 0,
        }
    }

    pub fn warehouse_id(&self) -> WarehouseId {
        self.warehouse_id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn on_hand(&self, product_id: ProductId) -> Decimal {
        self.on_hand.get(&product_id).copied().unwrap_or(Decimal::ZERO)
    }

    pub fn levels(&self) -> &BTreeMap<ProductId, Decimal> {
        &self.on_hand
    }
}

impl AggregateRoot for WarehouseStock {
    type Id = AggregateId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Signed change of on-hand quantity for one product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMovement {
    pub product_id: ProductId,
    pub delta: Decimal,
}

/// Command: MoveStock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveStock {
    pub tenant_id: TenantId,
    pub warehouse_id: WarehouseId,
    /// Document whose transition causes the movement.
    pub document_id: AggregateId,
    pub movements: Vec<StockMovement>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StockCommand {
    MoveStock(MoveStock),
}

/// Event: StockMoved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMoved {
    pub tenant_id: TenantId,
    pub warehouse_id: WarehouseId,
    pub document_id: AggregateId,
    pub movements: Vec<StockMovement>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StockEvent {
    StockMoved(StockMoved),
}

impl Event for StockEvent {
    fn event_type(&self) -> &'static str {
        match self {
            StockEvent::StockMoved(_) => "inventory.warehouse.stock_moved",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            StockEvent::StockMoved(e) => e.occurred_at,
        }
    }
}

impl Aggregate for WarehouseStock {
    type Command = StockCommand;
    type Event = StockEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            StockEvent::StockMoved(e) => {
                self.tenant_id = Some(e.tenant_id);
                for m in &e.movements {
                    *self.on_hand.entry(m.product_id).or_insert(Decimal::ZERO) += m.delta;
                }
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            StockCommand::MoveStock(cmd) => self.handle_move(cmd),
        }
    }
}

impl WarehouseStock {
    fn ensure_tenant(&self, tenant_id: TenantId) -> Result<(), DomainError> {
        match self.tenant_id {
            Some(owner) if owner != tenant_id => {
                Err(DomainError::not_found(format!("warehouse {}", self.warehouse_id)))
            }
            _ => Ok(()),
        }
    }

    fn handle_move(&self, cmd: &MoveStock) -> Result<Vec<StockEvent>, DomainError> {
        self.ensure_tenant(cmd.tenant_id)?;
        if cmd.warehouse_id != self.warehouse_id {
            return Err(DomainError::validation("warehouse_id mismatch"));
        }
        if cmd.movements.is_empty() {
            return Err(DomainError::validation("no stock movements given"));
        }

        // Net movements per product so a product listed twice is checked once.
        let mut net: BTreeMap<ProductId, Decimal> = BTreeMap::new();
        for m in &cmd.movements {
            if m.delta.is_zero() {
                return Err(DomainError::validation(format!(
                    "stock movement for product {} cannot be zero",
                    m.product_id
                )));
            }
            *net.entry(m.product_id).or_insert(Decimal::ZERO) += m.delta;
        }

        for (product_id, delta) in net {
            let available = self.on_hand(product_id);
            if available + delta < Decimal::ZERO {
                return Err(DomainError::conflict(
                    ConflictDetail::new(
                        ConflictKind::StockShortfall,
                        format!(
                            "warehouse {} holds {} of product {product_id}, {} requested",
                            self.warehouse_id,
                            available.normalize(),
                            (-delta).normalize()
                        ),
                    )
                    .with_field("onHand")
                    .with_attempted(-delta)
                    .with_limit(available),
                ));
            }
        }

        Ok(vec![StockEvent::StockMoved(StockMoved {
            tenant_id: cmd.tenant_id,
            warehouse_id: cmd.warehouse_id,
            document_id: cmd.document_id,
            movements: cmd.movements.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }
}

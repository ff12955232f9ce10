use axum::{Router, routing::get};

pub mod directory;
pub mod documents;
pub mod purchasing;
pub mod sales;
pub mod stock;
pub mod system;
pub mod tolerances;

/// Router for all tenant-scoped endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .route("/events/stream", get(system::stream))
        .nest("/tolerances", tolerances::router())
        .nest("/purchase-orders", purchasing::purchase_orders())
        .nest("/goods-receipts", purchasing::goods_receipts())
        .nest("/purchase-invoices", purchasing::purchase_invoices())
        .nest("/sales-orders", sales::sales_orders())
        .nest("/deliveries", sales::deliveries())
        .nest("/stock-transfers", stock::stock_transfers())
        .nest("/inventory-adjustments", stock::inventory_adjustments())
        .nest("/stock-opnames", stock::stock_opnames())
        .nest("/warehouses", stock::warehouses())
        .merge(directory::router())
}

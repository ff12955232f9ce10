//! End-to-end tests of the document engine over the in-memory stores.
//!
//! Covers the purchase-to-invoice and order-to-delivery chains, warehouse
//! documents, tolerance resolution, idempotent replay, concurrent receipts
//! and disposition tracking.

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use serde_json::Value as JsonValue;

    use tallyerp_core::{AggregateId, CompanyId, ConflictKind, ProductId, QuantityRange, TenantId, UserId, WarehouseId};
    use tallyerp_disposition::Disposition;
    use tallyerp_documents::{Action, Document, DocumentStatus, DocumentType};
    use tallyerp_events::{EventEnvelope, InMemoryEventBus};
    use tallyerp_ledger::QuantityField;
    use tallyerp_reconciliation::InvoiceControlPolicy;
    use tallyerp_tolerance::{ResolvedFrom, ToleranceLevel};

    use crate::command_dispatcher::{CommandDispatcher, DispatchError};
    use crate::directory::{InMemoryCompanyPolicies, InMemoryProductCatalog, ProductInfo};
    use crate::engine::{
        ActionContext, ActionInput, DeliveryLineInput, DocumentEngine, Inspection, InvoiceLineInput, LineInput,
        NewTolerance,
    };
    use crate::event_store::{EventStore, InMemoryEventStore};
    use crate::tolerance_store::InMemoryToleranceStore;

    type Engine = DocumentEngine<InMemoryEventStore, InMemoryEventBus<EventEnvelope<JsonValue>>>;

    struct Harness {
        engine: Engine,
        catalog: Arc<InMemoryProductCatalog>,
        ctx: ActionContext,
        warehouse: WarehouseId,
    }

    fn harness() -> Harness {
        let catalog = Arc::new(InMemoryProductCatalog::new());
        let engine = DocumentEngine::new(
            CommandDispatcher::new(InMemoryEventStore::new(), InMemoryEventBus::new()),
            Arc::new(InMemoryToleranceStore::new()),
            catalog.clone(),
            Arc::new(InMemoryCompanyPolicies::new(InvoiceControlPolicy::Received)),
        );
        Harness {
            engine,
            catalog,
            ctx: ActionContext::new(TenantId::new(), CompanyId::new(), UserId::new()),
            warehouse: WarehouseId::new(),
        }
    }

    fn company_tolerance(h: &Harness, under: Decimal, over: Decimal) {
        h.engine
            .create_tolerance(
                &h.ctx,
                NewTolerance {
                    level: ToleranceLevel::Company,
                    scope_key: h.ctx.company_id.to_string(),
                    under_pct: under,
                    over_pct: over,
                    unlimited_over: false,
                },
            )
            .unwrap();
    }

    fn quantities(pairs: &[(AggregateId, Decimal)]) -> ActionInput {
        ActionInput {
            quantities: pairs.iter().copied().collect(),
            ..Default::default()
        }
    }

    fn conflict_kind(err: &DispatchError) -> Option<ConflictKind> {
        match err {
            DispatchError::Conflict(detail) => Some(detail.kind),
            _ => None,
        }
    }

    fn breach_range(err: &DispatchError) -> Option<QuantityRange> {
        match err {
            DispatchError::Conflict(detail) if detail.kind == ConflictKind::ToleranceBreach => detail.range,
            _ => None,
        }
    }

    fn confirmed_po(h: &Harness, product: ProductId, qty: Decimal) -> Document {
        let po = h
            .engine
            .create_document(&h.ctx, DocumentType::PurchaseOrder, Some(h.warehouse), None, vec![LineInput { product_id: product, qty }])
            .unwrap();
        h.engine
            .perform(&h.ctx, DocumentType::PurchaseOrder, po.header().id, Action::Confirm, ActionInput::default())
            .unwrap()
            .document
    }

    /// PO of `ordered`, a receipt of `received` inspected into accepted/rejected.
    fn inspected_receipt(h: &Harness, product: ProductId, ordered: Decimal, accepted: Decimal, rejected: Decimal) -> (Document, Document) {
        let po = confirmed_po(h, product, ordered);
        let grn = h.engine.create_goods_receipt(&h.ctx, po.header().id, None, Vec::new()).unwrap();
        let grn_id = grn.header().id;
        let line_id = grn.lines()[0].line_id;

        h.engine
            .perform(&h.ctx, DocumentType::GoodsReceipt, grn_id, Action::Receive, quantities(&[(line_id, accepted + rejected)]))
            .unwrap();
        let inspections = BTreeMap::from([(line_id, Inspection { accepted, rejected })]);
        let grn = h
            .engine
            .perform(
                &h.ctx,
                DocumentType::GoodsReceipt,
                grn_id,
                Action::Inspect,
                ActionInput { inspections, ..Default::default() },
            )
            .unwrap()
            .document;
        (po, grn)
    }

    fn stock_in(h: &Harness, product: ProductId, qty: Decimal) {
        let adjustment = h
            .engine
            .create_document(&h.ctx, DocumentType::InventoryAdjustment, Some(h.warehouse), None, vec![LineInput { product_id: product, qty }])
            .unwrap();
        h.engine
            .perform(&h.ctx, DocumentType::InventoryAdjustment, adjustment.header().id, Action::Approve, ActionInput::default())
            .unwrap();
    }

    #[test]
    fn purchase_to_invoice_reconciles_every_document() {
        let h = harness();
        let product = ProductId::new();
        let (po, grn) = inspected_receipt(&h, product, dec!(100), dec!(80), dec!(20));
        let grn_id = grn.header().id;
        let grn_line = grn.lines()[0].line_id;

        let accepted = h
            .engine
            .perform(&h.ctx, DocumentType::GoodsReceipt, grn_id, Action::Accept, ActionInput::default())
            .unwrap();
        assert_eq!(accepted.document.status(), DocumentStatus::Partial);
        assert_eq!(h.engine.warehouse_stock(&h.ctx, h.warehouse).unwrap().on_hand(product), dec!(80));

        let po_after = h.engine.get_document(&h.ctx, DocumentType::PurchaseOrder, po.header().id).unwrap();
        let po_line = &po_after.lines()[0];
        assert_eq!(po_line.received_qty, dec!(100));
        assert_eq!(po_line.accepted_qty, dec!(80));
        assert_eq!(po_line.rejected_qty, dec!(20));

        let invoice = h
            .engine
            .create_invoice(&h.ctx, vec![InvoiceLineInput { goods_receipt_id: grn_id, grn_line_id: grn_line, qty: dec!(80) }])
            .unwrap();
        let posted = h
            .engine
            .perform(&h.ctx, DocumentType::PurchaseInvoice, invoice.header().id, Action::Post, ActionInput::default())
            .unwrap();
        assert_eq!(posted.document.status(), DocumentStatus::Posted);

        let grn_after = h.engine.get_document(&h.ctx, DocumentType::GoodsReceipt, grn_id).unwrap();
        assert_eq!(grn_after.lines()[0].invoiced_qty, dec!(80));
        let po_after = h.engine.get_document(&h.ctx, DocumentType::PurchaseOrder, po.header().id).unwrap();
        assert_eq!(po_after.lines()[0].invoiced_qty, dec!(80));
    }

    #[test]
    fn invoicing_beyond_accepted_quantity_is_refused() {
        let h = harness();
        let (_, grn) = inspected_receipt(&h, ProductId::new(), dec!(100), dec!(80), dec!(20));
        let grn_id = grn.header().id;
        let grn_line = grn.lines()[0].line_id;
        h.engine
            .perform(&h.ctx, DocumentType::GoodsReceipt, grn_id, Action::Accept, ActionInput::default())
            .unwrap();

        let too_much = h
            .engine
            .create_invoice(&h.ctx, vec![InvoiceLineInput { goods_receipt_id: grn_id, grn_line_id: grn_line, qty: dec!(81) }])
            .unwrap();
        let err = h
            .engine
            .perform(&h.ctx, DocumentType::PurchaseInvoice, too_much.header().id, Action::Post, ActionInput::default())
            .unwrap_err();
        assert_eq!(conflict_kind(&err), Some(ConflictKind::InvoiceCeiling));

        let refused = h.engine.get_document(&h.ctx, DocumentType::PurchaseInvoice, too_much.header().id).unwrap();
        assert_eq!(refused.status(), DocumentStatus::Draft);
        let grn_after = h.engine.get_document(&h.ctx, DocumentType::GoodsReceipt, grn_id).unwrap();
        assert_eq!(grn_after.lines()[0].invoiced_qty, Decimal::ZERO);
    }

    #[test]
    fn receipt_is_checked_against_the_tolerance_window() {
        let h = harness();
        company_tolerance(&h, dec!(5), dec!(10));
        let product = ProductId::new();

        let cases = [
            (dec!(94), false),
            (dec!(94.99), false),
            (dec!(95), true),
            (dec!(110), true),
            (dec!(110.01), false),
            (dec!(111), false),
        ];
        for (qty, ok) in cases {
            let po = confirmed_po(&h, product, dec!(100));
            let grn = h.engine.create_goods_receipt(&h.ctx, po.header().id, None, Vec::new()).unwrap();
            let line_id = grn.lines()[0].line_id;
            let result = h
                .engine
                .perform(&h.ctx, DocumentType::GoodsReceipt, grn.header().id, Action::Receive, quantities(&[(line_id, qty)]));

            match result {
                Ok(outcome) => {
                    assert!(ok, "{qty} should have been refused");
                    assert_eq!(outcome.document.status(), DocumentStatus::Received);
                }
                Err(err) => {
                    assert!(!ok, "{qty} should have been accepted: {err}");
                    assert_eq!(breach_range(&err), Some(QuantityRange::new(dec!(95), Some(dec!(110)))));
                    match &err {
                        DispatchError::Conflict(detail) => assert_eq!(detail.attempted, Some(qty)),
                        other => panic!("expected a tolerance breach, got {other:?}"),
                    }
                    let po_after = h.engine.get_document(&h.ctx, DocumentType::PurchaseOrder, po.header().id).unwrap();
                    assert_eq!(po_after.lines()[0].received_qty, Decimal::ZERO);
                }
            }
        }
    }

    #[test]
    fn most_specific_active_tolerance_wins() {
        let h = harness();
        let product = ProductId::new();
        h.catalog.register(
            h.ctx.tenant_id,
            product,
            ProductInfo { category: Some("Fresh".to_string()), ..Default::default() },
        );

        let mut ids = Vec::new();
        for (level, scope_key, over) in [
            (ToleranceLevel::Company, h.ctx.company_id.to_string(), dec!(20)),
            (ToleranceLevel::Category, "Fresh".to_string(), dec!(10)),
            (ToleranceLevel::Product, product.to_string(), dec!(5)),
        ] {
            let setting = h
                .engine
                .create_tolerance(&h.ctx, NewTolerance { level, scope_key, under_pct: Decimal::ZERO, over_pct: over, unlimited_over: false })
                .unwrap();
            ids.push(setting.id);
        }

        let effective = |h: &Harness| h.engine.effective_tolerance(&h.ctx, product, None).unwrap();
        assert_eq!(effective(&h).resolved_from, ResolvedFrom::Product);
        assert_eq!(effective(&h).over_pct, dec!(5));

        h.engine.set_tolerance_active(&h.ctx, ids[2], false).unwrap();
        assert_eq!(effective(&h).resolved_from, ResolvedFrom::Category);

        h.engine.set_tolerance_active(&h.ctx, ids[1], false).unwrap();
        assert_eq!(effective(&h).resolved_from, ResolvedFrom::Company);
        assert_eq!(effective(&h).over_pct, dec!(20));

        h.engine.set_tolerance_active(&h.ctx, ids[0], false).unwrap();
        let fallback = effective(&h);
        assert_eq!(fallback.resolved_from, ResolvedFrom::Default);
        assert_eq!(fallback.over_pct, Decimal::ZERO);
    }

    #[test]
    fn second_active_tolerance_for_a_scope_is_a_duplicate() {
        let h = harness();
        company_tolerance(&h, dec!(5), dec!(5));
        let err = h
            .engine
            .create_tolerance(
                &h.ctx,
                NewTolerance {
                    level: ToleranceLevel::Company,
                    scope_key: h.ctx.company_id.to_string(),
                    under_pct: Decimal::ZERO,
                    over_pct: Decimal::ZERO,
                    unlimited_over: false,
                },
            )
            .unwrap_err();
        assert_eq!(conflict_kind(&err), Some(ConflictKind::Duplicate));
    }

    #[test]
    fn repeated_accept_with_the_same_key_is_replayed() {
        let h = harness();
        let product = ProductId::new();
        let (_, grn) = inspected_receipt(&h, product, dec!(10), dec!(10), Decimal::ZERO);
        let grn_id = grn.header().id;
        let ctx = h.ctx.clone().with_idempotency_key("accept-1");

        let first = h
            .engine
            .perform(&ctx, DocumentType::GoodsReceipt, grn_id, Action::Accept, ActionInput::default())
            .unwrap();
        let second = h
            .engine
            .perform(&ctx, DocumentType::GoodsReceipt, grn_id, Action::Accept, ActionInput::default())
            .unwrap();

        assert!(!first.replayed);
        assert!(second.replayed);
        assert_eq!(first.receipt, second.receipt);
        assert_eq!(second.document.status(), DocumentStatus::Accepted);
        assert_eq!(h.engine.warehouse_stock(&h.ctx, h.warehouse).unwrap().on_hand(product), dec!(10));

        let err = h
            .engine
            .perform(&ctx, DocumentType::GoodsReceipt, grn_id, Action::Reject, ActionInput::default())
            .unwrap_err();
        assert!(matches!(err, DispatchError::Validation(_)));
    }

    #[test]
    fn concurrent_receipts_cannot_overrun_the_order() {
        let h = harness();
        company_tolerance(&h, Decimal::ZERO, dec!(10));
        let po = confirmed_po(&h, ProductId::new(), dec!(100));
        let po_line = po.lines()[0].line_id;

        let receipts: Vec<(AggregateId, AggregateId)> = (0..2)
            .map(|_| {
                let grn = h
                    .engine
                    .create_goods_receipt(
                        &h.ctx,
                        po.header().id,
                        None,
                        vec![crate::engine::ReceiptLineInput { po_line_id: po_line, expected_qty: Some(dec!(60)) }],
                    )
                    .unwrap();
                (grn.header().id, grn.lines()[0].line_id)
            })
            .collect();

        let results: Vec<_> = std::thread::scope(|scope| {
            let handles: Vec<_> = receipts
                .iter()
                .map(|(grn_id, line_id)| {
                    let h = &h;
                    scope.spawn(move || {
                        h.engine
                            .perform(&h.ctx, DocumentType::GoodsReceipt, *grn_id, Action::Receive, quantities(&[(*line_id, dec!(60))]))
                    })
                })
                .collect();
            handles.into_iter().map(|handle| handle.join().unwrap()).collect()
        });

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        let err = results.into_iter().find_map(Result::err).unwrap();
        assert_eq!(conflict_kind(&err), Some(ConflictKind::LedgerInvariant));

        let po_after = h.engine.get_document(&h.ctx, DocumentType::PurchaseOrder, po.header().id).unwrap();
        assert_eq!(po_after.lines()[0].received_qty, dec!(60));
    }

    #[test]
    fn resolved_disposition_is_final() {
        let h = harness();
        let (_, grn) = inspected_receipt(&h, ProductId::new(), dec!(10), dec!(6), dec!(4));
        let grn_id = grn.header().id;
        let line_id = grn.lines()[0].line_id;
        h.engine
            .perform(&h.ctx, DocumentType::GoodsReceipt, grn_id, Action::Accept, ActionInput::default())
            .unwrap();

        let opened = h.engine.get_disposition(&h.ctx, grn_id, line_id).unwrap();
        assert_eq!(opened.disposition, Disposition::PendingReplacement);
        assert_eq!(opened.rejected_qty, dec!(4));

        h.engine
            .update_disposition(&h.ctx, grn_id, line_id, Disposition::CreditRequested, Some("supplier agreed".into()))
            .unwrap();
        let resolved = h
            .engine
            .resolve_disposition(&h.ctx, grn_id, line_id, Some(Disposition::Returned), None)
            .unwrap();
        assert!(resolved.resolved);
        assert_eq!(resolved.disposition, Disposition::Returned);
        assert_eq!(resolved.history.len(), 3);

        let err = h
            .engine
            .update_disposition(&h.ctx, grn_id, line_id, Disposition::WrittenOff, None)
            .unwrap_err();
        assert!(matches!(err, DispatchError::State(_)));
    }

    #[test]
    fn rejected_receipt_needs_a_reason_and_opens_dispositions() {
        let h = harness();
        let po = confirmed_po(&h, ProductId::new(), dec!(5));
        let grn = h.engine.create_goods_receipt(&h.ctx, po.header().id, None, Vec::new()).unwrap();
        let grn_id = grn.header().id;
        let line_id = grn.lines()[0].line_id;
        h.engine
            .perform(&h.ctx, DocumentType::GoodsReceipt, grn_id, Action::Receive, quantities(&[(line_id, dec!(5))]))
            .unwrap();
        h.engine
            .perform(&h.ctx, DocumentType::GoodsReceipt, grn_id, Action::Inspect, ActionInput::default())
            .unwrap();

        let err = h
            .engine
            .perform(&h.ctx, DocumentType::GoodsReceipt, grn_id, Action::Reject, ActionInput::default())
            .unwrap_err();
        assert!(matches!(err, DispatchError::State(_)));

        let rejected = h
            .engine
            .perform(
                &h.ctx,
                DocumentType::GoodsReceipt,
                grn_id,
                Action::Reject,
                ActionInput { reason: Some("damaged".into()), ..Default::default() },
            )
            .unwrap();
        assert_eq!(rejected.document.status(), DocumentStatus::Rejected);
        assert_eq!(h.engine.get_disposition(&h.ctx, grn_id, line_id).unwrap().rejected_qty, dec!(5));
        assert!(h.engine.warehouse_stock(&h.ctx, h.warehouse).unwrap().levels().is_empty());
    }

    #[test]
    fn order_to_delivery_moves_stock_and_order_totals() {
        let h = harness();
        let product = ProductId::new();
        stock_in(&h, product, dec!(50));

        let so = h
            .engine
            .create_document(&h.ctx, DocumentType::SalesOrder, Some(h.warehouse), None, vec![LineInput { product_id: product, qty: dec!(10) }])
            .unwrap();
        let so_id = so.header().id;
        for action in [Action::Submit, Action::Approve, Action::Process] {
            h.engine.perform(&h.ctx, DocumentType::SalesOrder, so_id, action, ActionInput::default()).unwrap();
        }

        let err = h
            .engine
            .perform(&h.ctx, DocumentType::SalesOrder, so_id, Action::Ship, ActionInput::default())
            .unwrap_err();
        assert!(matches!(err, DispatchError::State(_)));

        let delivery = h
            .engine
            .create_delivery(&h.ctx, so_id, None, vec![DeliveryLineInput { so_line_id: so.lines()[0].line_id, qty: dec!(10) }])
            .unwrap();
        let delivery_id = delivery.header().id;
        h.engine
            .perform(&h.ctx, DocumentType::Delivery, delivery_id, Action::Ship, ActionInput::default())
            .unwrap();
        assert_eq!(h.engine.warehouse_stock(&h.ctx, h.warehouse).unwrap().on_hand(product), dec!(40));

        h.engine
            .perform(&h.ctx, DocumentType::Delivery, delivery_id, Action::Deliver, ActionInput::default())
            .unwrap();
        for action in [Action::Ship, Action::Deliver, Action::Complete] {
            h.engine.perform(&h.ctx, DocumentType::SalesOrder, so_id, action, ActionInput::default()).unwrap();
        }

        let so_after = h.engine.get_document(&h.ctx, DocumentType::SalesOrder, so_id).unwrap();
        assert_eq!(so_after.status(), DocumentStatus::Completed);
        assert_eq!(so_after.lines()[0].shipped_qty, dec!(10));
        assert_eq!(so_after.lines()[0].delivered_qty, dec!(10));
    }

    #[test]
    fn delivery_past_over_tolerance_is_refused() {
        let h = harness();
        let product = ProductId::new();
        stock_in(&h, product, dec!(50));
        let so = h
            .engine
            .create_document(&h.ctx, DocumentType::SalesOrder, Some(h.warehouse), None, vec![LineInput { product_id: product, qty: dec!(10) }])
            .unwrap();
        for action in [Action::Submit, Action::Approve] {
            h.engine.perform(&h.ctx, DocumentType::SalesOrder, so.header().id, action, ActionInput::default()).unwrap();
        }

        let delivery = h
            .engine
            .create_delivery(&h.ctx, so.header().id, None, vec![DeliveryLineInput { so_line_id: so.lines()[0].line_id, qty: dec!(11) }])
            .unwrap();
        let err = h
            .engine
            .perform(&h.ctx, DocumentType::Delivery, delivery.header().id, Action::Ship, ActionInput::default())
            .unwrap_err();
        assert_eq!(conflict_kind(&err), Some(ConflictKind::ToleranceBreach));
        assert_eq!(h.engine.warehouse_stock(&h.ctx, h.warehouse).unwrap().on_hand(product), dec!(50));
    }

    #[test]
    fn transfer_moves_stock_between_warehouses() {
        let h = harness();
        let product = ProductId::new();
        let destination = WarehouseId::new();
        stock_in(&h, product, dec!(20));

        let transfer = h
            .engine
            .create_document(&h.ctx, DocumentType::StockTransfer, Some(h.warehouse), Some(destination), vec![LineInput { product_id: product, qty: dec!(5) }])
            .unwrap();
        let id = transfer.header().id;
        h.engine.perform(&h.ctx, DocumentType::StockTransfer, id, Action::Ship, ActionInput::default()).unwrap();
        assert_eq!(h.engine.warehouse_stock(&h.ctx, h.warehouse).unwrap().on_hand(product), dec!(15));

        let line_id = transfer.lines()[0].line_id;
        let err = h
            .engine
            .perform(&h.ctx, DocumentType::StockTransfer, id, Action::Receive, quantities(&[(line_id, dec!(6))]))
            .unwrap_err();
        assert_eq!(conflict_kind(&err), Some(ConflictKind::LedgerInvariant));

        h.engine.perform(&h.ctx, DocumentType::StockTransfer, id, Action::Receive, ActionInput::default()).unwrap();
        assert_eq!(h.engine.warehouse_stock(&h.ctx, destination).unwrap().on_hand(product), dec!(5));
    }

    #[test]
    fn cancelling_a_shipped_transfer_restores_source_stock() {
        let h = harness();
        let product = ProductId::new();
        stock_in(&h, product, dec!(8));
        let transfer = h
            .engine
            .create_document(&h.ctx, DocumentType::StockTransfer, Some(h.warehouse), Some(WarehouseId::new()), vec![LineInput { product_id: product, qty: dec!(8) }])
            .unwrap();
        let id = transfer.header().id;

        h.engine.perform(&h.ctx, DocumentType::StockTransfer, id, Action::Ship, ActionInput::default()).unwrap();
        assert_eq!(h.engine.warehouse_stock(&h.ctx, h.warehouse).unwrap().on_hand(product), Decimal::ZERO);

        let cancelled = h.engine.perform(&h.ctx, DocumentType::StockTransfer, id, Action::Cancel, ActionInput::default()).unwrap();
        assert_eq!(cancelled.document.status(), DocumentStatus::Cancelled);
        assert_eq!(h.engine.warehouse_stock(&h.ctx, h.warehouse).unwrap().on_hand(product), dec!(8));
    }

    #[test]
    fn shipping_more_than_on_hand_is_a_shortfall() {
        let h = harness();
        let product = ProductId::new();
        stock_in(&h, product, dec!(3));
        let transfer = h
            .engine
            .create_document(&h.ctx, DocumentType::StockTransfer, Some(h.warehouse), Some(WarehouseId::new()), vec![LineInput { product_id: product, qty: dec!(4) }])
            .unwrap();

        let err = h
            .engine
            .perform(&h.ctx, DocumentType::StockTransfer, transfer.header().id, Action::Ship, ActionInput::default())
            .unwrap_err();
        assert_eq!(conflict_kind(&err), Some(ConflictKind::StockShortfall));
        let after = h.engine.get_document(&h.ctx, DocumentType::StockTransfer, transfer.header().id).unwrap();
        assert_eq!(after.status(), DocumentStatus::Draft);
    }

    #[test]
    fn completed_count_sets_on_hand_stock() {
        let h = harness();
        let product = ProductId::new();
        stock_in(&h, product, dec!(20));

        let opname = h.engine.create_opname(&h.ctx, h.warehouse, vec![product]).unwrap();
        assert_eq!(opname.lines()[0].ordered_qty, dec!(20));
        let id = opname.header().id;
        h.engine.perform(&h.ctx, DocumentType::StockOpname, id, Action::Start, ActionInput::default()).unwrap();

        let err = h
            .engine
            .perform(&h.ctx, DocumentType::StockOpname, id, Action::Complete, ActionInput::default())
            .unwrap_err();
        assert!(matches!(err, DispatchError::State(_)));

        let line_id = opname.lines()[0].line_id;
        h.engine
            .perform(&h.ctx, DocumentType::StockOpname, id, Action::Complete, quantities(&[(line_id, dec!(18))]))
            .unwrap();
        assert_eq!(h.engine.warehouse_stock(&h.ctx, h.warehouse).unwrap().on_hand(product), dec!(18));

        let err = h.engine.create_opname(&h.ctx, h.warehouse, vec![product, product]).unwrap_err();
        assert!(matches!(err, DispatchError::Validation(_)));
    }

    #[test]
    fn documents_are_invisible_to_other_tenants() {
        let h = harness();
        let po = confirmed_po(&h, ProductId::new(), dec!(1));
        let other = ActionContext::new(TenantId::new(), CompanyId::new(), UserId::new());

        let err = h.engine.get_document(&other, DocumentType::PurchaseOrder, po.header().id).unwrap_err();
        assert!(matches!(err, DispatchError::NotFound(_)));
        let err = h
            .engine
            .perform(&other, DocumentType::PurchaseOrder, po.header().id, Action::Cancel, ActionInput::default())
            .unwrap_err();
        assert!(matches!(err, DispatchError::NotFound(_)));

        assert!(h.engine.dispatcher().store().load_stream(other.tenant_id, po.header().id).unwrap().is_empty());
    }

    #[test]
    fn direct_receipt_delta_moves_the_order_line_within_the_over_tolerance() {
        let h = harness();
        company_tolerance(&h, dec!(0), dec!(10));
        let po = confirmed_po(&h, ProductId::new(), dec!(100));
        let po_id = po.header().id;
        let grn = h.engine.create_goods_receipt(&h.ctx, po_id, None, Vec::new()).unwrap();
        let grn_id = grn.header().id;
        let line_id = grn.lines()[0].line_id;
        h.engine
            .perform(&h.ctx, DocumentType::GoodsReceipt, grn_id, Action::Receive, quantities(&[(line_id, dec!(100))]))
            .unwrap();

        let doc = h
            .engine
            .apply_delta(&h.ctx, DocumentType::GoodsReceipt, grn_id, line_id, QuantityField::Received, dec!(5))
            .unwrap();
        assert_eq!(doc.lines()[0].received_qty, dec!(105));
        let po_after = h.engine.get_document(&h.ctx, DocumentType::PurchaseOrder, po_id).unwrap();
        assert_eq!(po_after.lines()[0].received_qty, dec!(105));

        let err = h
            .engine
            .apply_delta(&h.ctx, DocumentType::GoodsReceipt, grn_id, line_id, QuantityField::Received, dec!(6))
            .unwrap_err();
        match err {
            DispatchError::Conflict(detail) => {
                assert_eq!(detail.kind, ConflictKind::LedgerInvariant);
                assert_eq!(detail.attempted, Some(dec!(111)));
                assert_eq!(detail.limit, Some(dec!(110)));
            }
            other => panic!("expected a ledger conflict, got {other:?}"),
        }

        let err = h
            .engine
            .apply_delta(&h.ctx, DocumentType::GoodsReceipt, grn_id, line_id, QuantityField::Received, dec!(-106))
            .unwrap_err();
        assert_eq!(conflict_kind(&err), Some(ConflictKind::LedgerInvariant));

        let grn_after = h.engine.get_document(&h.ctx, DocumentType::GoodsReceipt, grn_id).unwrap();
        assert_eq!(grn_after.lines()[0].received_qty, dec!(105));
        let po_after = h.engine.get_document(&h.ctx, DocumentType::PurchaseOrder, po_id).unwrap();
        assert_eq!(po_after.lines()[0].received_qty, dec!(105));
    }

    #[test]
    fn direct_deltas_are_limited_to_the_current_step() {
        let h = harness();
        let po = confirmed_po(&h, ProductId::new(), dec!(100));
        let po_id = po.header().id;
        let po_line = po.lines()[0].line_id;

        let err = h
            .engine
            .apply_delta(&h.ctx, DocumentType::PurchaseOrder, po_id, po_line, QuantityField::Shipped, dec!(7))
            .unwrap_err();
        assert!(matches!(err, DispatchError::Validation(_)));
        let err = h
            .engine
            .apply_delta(&h.ctx, DocumentType::PurchaseOrder, po_id, po_line, QuantityField::Received, dec!(7))
            .unwrap_err();
        assert!(matches!(err, DispatchError::Validation(_)));

        let grn = h.engine.create_goods_receipt(&h.ctx, po_id, None, Vec::new()).unwrap();
        let grn_line = grn.lines()[0].line_id;
        let err = h
            .engine
            .apply_delta(&h.ctx, DocumentType::GoodsReceipt, grn.header().id, grn_line, QuantityField::Received, dec!(7))
            .unwrap_err();
        assert!(matches!(err, DispatchError::Validation(_)));

        h.engine
            .perform(&h.ctx, DocumentType::GoodsReceipt, grn.header().id, Action::Receive, quantities(&[(grn_line, dec!(100))]))
            .unwrap();
        let err = h
            .engine
            .apply_delta(&h.ctx, DocumentType::GoodsReceipt, grn.header().id, grn_line, QuantityField::Accepted, dec!(7))
            .unwrap_err();
        assert!(matches!(err, DispatchError::Validation(_)));

        let po_after = h.engine.get_document(&h.ctx, DocumentType::PurchaseOrder, po_id).unwrap();
        assert_eq!(po_after.lines()[0].shipped_qty, Decimal::ZERO);
        assert_eq!(po_after.lines()[0].received_qty, dec!(100));
        assert_eq!(po_after.header().version, po.header().version + 1);
    }

    #[test]
    fn accept_before_receive_is_a_state_error() {
        let h = harness();
        let po = confirmed_po(&h, ProductId::new(), dec!(10));
        let grn = h.engine.create_goods_receipt(&h.ctx, po.header().id, None, Vec::new()).unwrap();
        let line_id = grn.lines()[0].line_id;
        let inspections = BTreeMap::from([(line_id, Inspection { accepted: dec!(5), rejected: Decimal::ZERO })]);

        let err = h
            .engine
            .perform(&h.ctx, DocumentType::GoodsReceipt, grn.header().id, Action::Accept, ActionInput { inspections, ..Default::default() })
            .unwrap_err();
        assert!(matches!(err, DispatchError::State(_)), "got {err:?}");
    }

    #[test]
    fn transfer_ship_is_bounded_by_the_over_tolerance() {
        let h = harness();
        company_tolerance(&h, dec!(0), dec!(10));
        let product = ProductId::new();
        stock_in(&h, product, dec!(100));
        let transfer = h
            .engine
            .create_document(&h.ctx, DocumentType::StockTransfer, Some(h.warehouse), Some(WarehouseId::new()), vec![LineInput { product_id: product, qty: dec!(10) }])
            .unwrap();
        let id = transfer.header().id;
        let line_id = transfer.lines()[0].line_id;

        let err = h
            .engine
            .perform(&h.ctx, DocumentType::StockTransfer, id, Action::Ship, quantities(&[(line_id, dec!(50))]))
            .unwrap_err();
        assert_eq!(breach_range(&err), Some(QuantityRange::new(dec!(10), Some(dec!(11)))));
        assert_eq!(h.engine.warehouse_stock(&h.ctx, h.warehouse).unwrap().on_hand(product), dec!(100));

        let shipped = h
            .engine
            .perform(&h.ctx, DocumentType::StockTransfer, id, Action::Ship, quantities(&[(line_id, dec!(11))]))
            .unwrap();
        assert_eq!(shipped.document.lines()[0].shipped_qty, dec!(11));
        assert_eq!(h.engine.warehouse_stock(&h.ctx, h.warehouse).unwrap().on_hand(product), dec!(89));
    }

    #[test]
    fn short_transfer_receipt_returns_the_rest_to_the_source() {
        let h = harness();
        let product = ProductId::new();
        let destination = WarehouseId::new();
        stock_in(&h, product, dec!(10));
        let transfer = h
            .engine
            .create_document(&h.ctx, DocumentType::StockTransfer, Some(h.warehouse), Some(destination), vec![LineInput { product_id: product, qty: dec!(10) }])
            .unwrap();
        let id = transfer.header().id;
        let line_id = transfer.lines()[0].line_id;

        h.engine.perform(&h.ctx, DocumentType::StockTransfer, id, Action::Ship, ActionInput::default()).unwrap();
        assert_eq!(h.engine.warehouse_stock(&h.ctx, h.warehouse).unwrap().on_hand(product), Decimal::ZERO);

        let received = h
            .engine
            .perform(&h.ctx, DocumentType::StockTransfer, id, Action::Receive, quantities(&[(line_id, dec!(7))]))
            .unwrap();
        assert_eq!(received.document.status(), DocumentStatus::Received);
        assert_eq!(h.engine.warehouse_stock(&h.ctx, destination).unwrap().on_hand(product), dec!(7));
        assert_eq!(h.engine.warehouse_stock(&h.ctx, h.warehouse).unwrap().on_hand(product), dec!(3));
    }

    #[test]
    fn delivery_line_cannot_ship_past_its_own_quantity() {
        let h = harness();
        let product = ProductId::new();
        stock_in(&h, product, dec!(50));
        let so = h
            .engine
            .create_document(&h.ctx, DocumentType::SalesOrder, Some(h.warehouse), None, vec![LineInput { product_id: product, qty: dec!(100) }])
            .unwrap();
        for action in [Action::Submit, Action::Approve] {
            h.engine.perform(&h.ctx, DocumentType::SalesOrder, so.header().id, action, ActionInput::default()).unwrap();
        }
        let delivery = h
            .engine
            .create_delivery(&h.ctx, so.header().id, None, vec![DeliveryLineInput { so_line_id: so.lines()[0].line_id, qty: dec!(4) }])
            .unwrap();
        let line_id = delivery.lines()[0].line_id;

        let err = h
            .engine
            .perform(&h.ctx, DocumentType::Delivery, delivery.header().id, Action::Ship, quantities(&[(line_id, dec!(10))]))
            .unwrap_err();
        assert_eq!(breach_range(&err), Some(QuantityRange::new(dec!(4), Some(dec!(4)))));
        assert_eq!(h.engine.warehouse_stock(&h.ctx, h.warehouse).unwrap().on_hand(product), dec!(50));
        let so_after = h.engine.get_document(&h.ctx, DocumentType::SalesOrder, so.header().id).unwrap();
        assert_eq!(so_after.lines()[0].shipped_qty, Decimal::ZERO);
    }
}

mod common;

use assert_matches::assert_matches;
use common::TestApp;
use rstest::rstest;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use stockledger::{
    common::StockPair,
    entities::TransactionType,
    errors::ServiceError,
    services::{adjustment_writer::ResetItem, ledger::NewTransaction},
};
use uuid::Uuid;

const W1: Uuid = Uuid::from_u128(0xA1);
const W2: Uuid = Uuid::from_u128(0xA2);
const PART: Uuid = Uuid::from_u128(0xB1);

fn transaction(
    from: Option<Uuid>,
    to: Option<Uuid>,
    quantity: Decimal,
    transaction_type: TransactionType,
) -> NewTransaction {
    let mut tx = NewTransaction::receipt(W1, PART, quantity);
    tx.from_warehouse_id = from;
    tx.to_warehouse_id = to;
    tx.transaction_type = transaction_type;
    tx
}

#[rstest]
#[case::zero_quantity(transaction(None, Some(W1), dec!(0), TransactionType::Receipt))]
#[case::negative_quantity(transaction(None, Some(W1), dec!(-3), TransactionType::Receipt))]
#[case::no_warehouse(transaction(None, None, dec!(1), TransactionType::Consumption))]
#[case::same_warehouse_transfer(transaction(Some(W1), Some(W1), dec!(1), TransactionType::Transfer))]
#[case::two_sided_receipt(transaction(Some(W2), Some(W1), dec!(1), TransactionType::Receipt))]
#[case::one_sided_transfer(transaction(None, Some(W1), dec!(1), TransactionType::Transfer))]
#[case::finer_than_stored_scale(transaction(None, Some(W1), dec!(0.00001), TransactionType::Receipt))]
#[tokio::test]
async fn invalid_transactions_are_rejected_and_not_stored(#[case] tx: NewTransaction) {
    let app = TestApp::new().await;

    let result = app.engine().ledger.record_transaction(tx).await;
    assert_matches!(result, Err(ServiceError::InvalidLedgerEntry(_)));

    for warehouse_id in [W1, W2] {
        let history = app
            .engine()
            .ledger
            .transactions_for_pair(StockPair::new(warehouse_id, PART), None, None)
            .await
            .unwrap();
        assert!(history.is_empty());
    }
}

#[rstest]
#[case::receipt(NewTransaction::receipt(W1, PART, dec!(2)), dec!(2), dec!(0))]
#[case::consumption(NewTransaction::consumption(W1, PART, dec!(2)), dec!(-2), dec!(0))]
#[case::transfer(NewTransaction::transfer(W1, W2, PART, dec!(2)), dec!(-2), dec!(2))]
#[tokio::test]
async fn valid_transactions_move_stock(
    #[case] tx: NewTransaction,
    #[case] w1_expected: Decimal,
    #[case] w2_expected: Decimal,
) {
    let app = TestApp::new().await;
    app.record(tx.by("picker-7")).await;

    assert_eq!(app.stock(StockPair::new(W1, PART), None).await, w1_expected);
    assert_eq!(app.stock(StockPair::new(W2, PART), None).await, w2_expected);
}

#[tokio::test]
async fn overlong_reference_fails_validation() {
    let app = TestApp::new().await;
    let mut tx = NewTransaction::receipt(W1, PART, dec!(1));
    tx.reference = Some("x".repeat(300));

    let result = app.engine().ledger.record_transaction(tx).await;
    assert_matches!(result, Err(ServiceError::ValidationError(_)));
}

#[tokio::test]
async fn reset_target_finer_than_stored_scale_writes_nothing() {
    let app = TestApp::new().await;
    let pair = StockPair::new(W1, PART);
    app.record(NewTransaction::receipt(W1, PART, dec!(3))).await;

    let result = app
        .engine()
        .adjustments
        .apply_reset(
            W1,
            vec![ResetItem {
                part_id: PART,
                new_quantity: dec!(7.00001),
                reason: "recount".into(),
                notes: None,
            }],
            None,
        )
        .await;
    assert_matches!(result, Err(ServiceError::InvalidLedgerEntry(_)));

    let adjustments = app.engine().ledger.adjustments_for_pair(pair).await.unwrap();
    assert!(adjustments.is_empty());
    assert_eq!(app.stock(pair, None).await, dec!(3));
}

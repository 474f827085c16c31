//! Proptest generators for property-based testing.

use proptest::prelude::*;

use modli_iap_core::{
    codes, Plan, PlanTable, Platform, ProductId, PurchaseState, Transaction, TransactionId,
};

/// Generate a random TransactionId.
pub fn transaction_id() -> impl Strategy<Value = TransactionId> {
    any::<[u8; 32]>().prop_map(TransactionId::from_bytes)
}

/// Generate a Platform.
pub fn platform() -> impl Strategy<Value = Platform> {
    prop_oneof![Just(Platform::Android), Just(Platform::Ios)]
}

/// Generate a PurchaseState, mostly `Purchased`.
pub fn purchase_state() -> impl Strategy<Value = PurchaseState> {
    prop_oneof![
        6 => Just(PurchaseState::Purchased),
        2 => Just(PurchaseState::Pending),
        1 => Just(PurchaseState::Unspecified),
    ]
}

/// Generate a store-assigned purchase token.
pub fn token() -> impl Strategy<Value = String> {
    "[A-Za-z0-9.-]{1,40}".prop_map(String::from)
}

/// Generate a product id.
pub fn product_id() -> impl Strategy<Value = ProductId> {
    "modli_[a-z]{1,12}".prop_map(ProductId::new)
}

/// Generate a store error code, known or not.
pub fn error_code() -> impl Strategy<Value = String> {
    prop_oneof![
        Just(codes::USER_CANCELLED.to_string()),
        Just(codes::USER_CANCELLED_LEGACY.to_string()),
        Just(codes::NETWORK_ERROR.to_string()),
        Just(codes::SERVICE_ERROR.to_string()),
        Just(codes::DEFERRED_PAYMENT.to_string()),
        Just(codes::ITEM_UNAVAILABLE.to_string()),
        Just(codes::DEVELOPER_ERROR.to_string()),
        Just(codes::ALREADY_OWNED.to_string()),
        "E_[A-Z_]{1,16}".prop_map(String::from),
    ]
}

/// Generate a valid plan table of 1 to `max_plans` plans.
///
/// Plan ids are unique, and so are product ids (`modli_<plan id>`).
pub fn plan_table(max_plans: usize) -> impl Strategy<Value = PlanTable> {
    prop::collection::btree_set("[a-z]{1,10}", 1..=max_plans.max(1))
        .prop_flat_map(|names| {
            let count = names.len();
            (
                Just(names),
                prop::collection::vec((1u32..=1_000, 0u32..=10_000, 0u32..=300_000), count),
            )
        })
        .prop_map(|(names, terms)| {
            let plans = names
                .into_iter()
                .zip(terms)
                .map(|(name, (credits, usd_cents, try_kurus))| {
                    let product = format!("modli_{name}");
                    Plan::new(
                        name,
                        product,
                        credits,
                        f64::from(usd_cents) / 100.0,
                        f64::from(try_kurus) / 100.0,
                    )
                })
                .collect();
            match PlanTable::new(plans) {
                Ok(table) => table,
                Err(e) => unreachable!("generated plan table is invalid: {e}"),
            }
        })
}

/// Parameters for generating a transaction.
#[derive(Debug, Clone)]
pub struct TransactionParams {
    pub platform: Platform,
    pub product_id: ProductId,
    pub token: String,
    pub state: PurchaseState,
    pub acknowledged: bool,
    pub purchase_time_ms: Option<i64>,
}

impl Arbitrary for TransactionParams {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        (
            platform(),
            product_id(),
            token(),
            purchase_state(),
            any::<bool>(),
            proptest::option::of(0i64..=1_900_000_000_000i64),
        )
            .prop_map(
                |(platform, product_id, token, state, acknowledged, purchase_time_ms)| {
                    TransactionParams {
                        platform,
                        product_id,
                        token,
                        state,
                        acknowledged,
                        purchase_time_ms,
                    }
                },
            )
            .boxed()
    }
}

/// Build a transaction from parameters.
pub fn transaction_from_params(params: &TransactionParams) -> Transaction {
    let mut transaction = Transaction::new(
        params.platform,
        params.product_id.clone(),
        params.token.clone(),
    )
    .with_state(params.state)
    .with_acknowledged(params.acknowledged);
    if let Some(ms) = params.purchase_time_ms {
        transaction = transaction.with_purchase_time(ms);
    }
    transaction
}

/// Generate a transaction.
pub fn transaction() -> impl Strategy<Value = Transaction> {
    any::<TransactionParams>().prop_map(|params| transaction_from_params(&params))
}

//! Property tests for the order status machine and order pricing.

use proptest::prelude::*;
use rust_decimal::Decimal;
use storefront_api::models::order::{money_eq, OrderDraft, OrderLineDraft};
use storefront_api::models::order_status::{
    decide_transition, OrderStatus, ProviderPaymentStatus, TransitionDecision,
};
use storefront_api::services::orders::generate_order_number;

fn provider_status_strategy() -> impl Strategy<Value = ProviderPaymentStatus> {
    prop_oneof![
        Just(ProviderPaymentStatus::Approved),
        Just(ProviderPaymentStatus::Pending),
        Just(ProviderPaymentStatus::InProcess),
        Just(ProviderPaymentStatus::Rejected),
        Just(ProviderPaymentStatus::Cancelled),
        "[a-z_]{1,12}".prop_map(|raw| ProviderPaymentStatus::parse(&raw)),
    ]
}

/// Applies a sequence of provider events the way the order store does.
fn replay(events: &[ProviderPaymentStatus]) -> (OrderStatus, usize) {
    let mut current = OrderStatus::Pending;
    let mut writes = 0;
    for event in events {
        let (requested, _) = event.target();
        if decide_transition(current, requested) == TransitionDecision::Apply {
            current = requested;
            writes += 1;
        }
    }
    (current, writes)
}

fn cents() -> impl Strategy<Value = Decimal> {
    (0i64..10_000_000).prop_map(|c| Decimal::new(c, 2))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn terminal_status_is_never_left(events in prop::collection::vec(provider_status_strategy(), 0..20)) {
        let mut current = OrderStatus::Pending;
        let mut reached_terminal: Option<OrderStatus> = None;
        for event in &events {
            let (requested, _) = event.target();
            if decide_transition(current, requested) == TransitionDecision::Apply {
                current = requested;
            }
            if let Some(terminal) = reached_terminal {
                prop_assert_eq!(current, terminal);
            } else if current.is_terminal() {
                reached_terminal = Some(current);
            }
        }
    }

    #[test]
    fn at_most_two_writes_per_order(events in prop::collection::vec(provider_status_strategy(), 0..30)) {
        let (_, writes) = replay(&events);
        prop_assert!(writes <= 2);
    }

    #[test]
    fn replaying_a_sequence_twice_changes_nothing(events in prop::collection::vec(provider_status_strategy(), 1..15)) {
        let (first, _) = replay(&events);
        let doubled: Vec<_> = events.iter().chain(events.iter()).cloned().collect();
        let (second, _) = replay(&doubled);
        if first.is_terminal() {
            prop_assert_eq!(first, second);
        }
    }

    #[test]
    fn first_approval_from_open_state_confirms(prefix in prop::collection::vec(
        prop_oneof![Just(ProviderPaymentStatus::Pending), Just(ProviderPaymentStatus::InProcess)],
        0..5,
    )) {
        let mut events = prefix;
        events.push(ProviderPaymentStatus::Approved);
        prop_assert_eq!(replay(&events).0, OrderStatus::Confirmed);
    }

    #[test]
    fn order_numbers_have_fixed_shape(millis in any::<i64>()) {
        let number = generate_order_number("ORD", millis);
        prop_assert_eq!(number.len(), 12);
        prop_assert!(number.starts_with("ORD-"));
        prop_assert!(number[4..].chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn priced_draft_totals_balance(
        lines in prop::collection::vec((1i32..50, cents()), 1..6),
        shipping in cents(),
    ) {
        let items: Vec<_> = lines
            .iter()
            .enumerate()
            .map(|(i, (qty, price))| {
                OrderLineDraft::priced(format!("p{}", i), None, "Item", *qty, *price)
            })
            .collect();
        let expected_subtotal: Decimal = lines
            .iter()
            .map(|(qty, price)| *price * Decimal::from(*qty))
            .sum();

        let draft = OrderDraft::priced("user-1", items, Decimal::ZERO, shipping, "ARS");
        prop_assert!(money_eq(draft.subtotal, expected_subtotal));
        prop_assert!(money_eq(draft.total, draft.subtotal + shipping));
        prop_assert!(draft.validate_totals().is_ok());
    }
}

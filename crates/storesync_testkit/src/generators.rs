//! Property-based test generators using proptest.
//!
//! Provides strategies for generating carts, cart operations and remote
//! outcomes.

use crate::cart::{Cart, CartItem};
use proptest::prelude::*;
use storesync_core::RemoteError;

/// A single scripted cart operation.
#[derive(Debug, Clone, PartialEq)]
pub enum CartOp {
    /// Add an item.
    Add(CartItem),
    /// Remove every line with this SKU.
    Remove(String),
}

/// Strategy for generating SKUs from a small alphabet, so that generated
/// operations collide on the same lines.
pub fn sku_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("SKU-[A-E][0-9]").expect("Invalid regex")
}

/// Strategy for generating cart lines.
pub fn cart_item_strategy() -> impl Strategy<Value = CartItem> {
    (sku_strategy(), 1u32..5, 100u64..10_000)
        .prop_map(|(sku, quantity, unit_price_cents)| CartItem::new(sku, quantity, unit_price_cents))
}

/// Strategy for generating carts.
pub fn cart_strategy() -> impl Strategy<Value = Cart> {
    prop::collection::vec(cart_item_strategy(), 0..8)
        .prop_map(|items| items.into_iter().fold(Cart::default(), Cart::with_item))
}

/// Strategy for generating cart operations.
pub fn cart_op_strategy() -> impl Strategy<Value = CartOp> {
    prop_oneof![
        3 => cart_item_strategy().prop_map(CartOp::Add),
        1 => sku_strategy().prop_map(CartOp::Remove),
    ]
}

/// Strategy for generating remote failures.
pub fn remote_error_strategy() -> impl Strategy<Value = RemoteError> {
    prop_oneof![
        "[a-z ]{1,20}".prop_map(RemoteError::network),
        (400u16..600, "[a-z ]{1,20}").prop_map(|(status, message)| RemoteError::server(status, message)),
        Just(RemoteError::Timeout),
        "[a-z ]{1,20}".prop_map(RemoteError::Rejected),
        Just(RemoteError::NotConnected),
    ]
}

/// Strategy for generating a sequence of operations, each paired with
/// whether its remote call succeeds.
pub fn scripted_session_strategy(max_len: usize) -> impl Strategy<Value = Vec<(CartOp, bool)>> {
    prop::collection::vec((cart_op_strategy(), any::<bool>()), 0..max_len)
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn generated_carts_have_unique_skus(cart in cart_strategy()) {
            let mut skus: Vec<_> = cart.items.iter().map(|i| i.sku.clone()).collect();
            let len = skus.len();
            skus.sort();
            skus.dedup();
            prop_assert_eq!(skus.len(), len);
        }

        #[test]
        fn generated_items_have_quantity(item in cart_item_strategy()) {
            prop_assert!(item.quantity > 0);
            prop_assert!(item.sku.starts_with("SKU-"));
        }

        #[test]
        fn generated_errors_have_codes(error in remote_error_strategy()) {
            prop_assert!(!error.code().is_empty());
        }
    }
}

//! A sample cart domain manager.
//!
//! [`CartManager`] shows how a domain sits on top of a [`Coordinator`]: it
//! supplies the optimistic mutation and the remote call for each write and
//! announces what happened with domain events (`item:added`,
//! `item:removed`, `order:placed`). Checkout is an optional capability:
//! a manager built without a [`CheckoutGateway`] reports it as unsupported.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use storesync_core::{
    Coordinator, ErrorInfo, Operation, RemoteError, RemoteSource, StateSnapshot,
};

use crate::remote::MockRemote;

/// One cart line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    /// Stock keeping unit.
    pub sku: String,
    /// Number of units.
    pub quantity: u32,
    /// Price per unit, in cents.
    pub unit_price_cents: u64,
}

impl CartItem {
    /// Creates a line.
    pub fn new(sku: impl Into<String>, quantity: u32, unit_price_cents: u64) -> Self {
        Self {
            sku: sku.into(),
            quantity,
            unit_price_cents,
        }
    }
}

/// Cart contents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cart {
    /// Lines, one per SKU, in insertion order.
    pub items: Vec<CartItem>,
}

impl Cart {
    /// Adds `item`, merging quantities into an existing line for the SKU.
    #[must_use]
    pub fn with_item(mut self, item: CartItem) -> Self {
        match self.items.iter_mut().find(|line| line.sku == item.sku) {
            Some(line) => line.quantity += item.quantity,
            None => self.items.push(item),
        }
        self
    }

    /// Removes the line for `sku`, if present.
    #[must_use]
    pub fn without(mut self, sku: &str) -> Self {
        self.items.retain(|line| line.sku != sku);
        self
    }

    /// Returns the total number of units.
    pub fn item_count(&self) -> u32 {
        self.items.iter().map(|line| line.quantity).sum()
    }

    /// Returns the cart total, in cents.
    pub fn total_cents(&self) -> u64 {
        self.items
            .iter()
            .map(|line| u64::from(line.quantity) * line.unit_price_cents)
            .sum()
    }

    /// Returns true if the cart has no lines.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Cart writes offered by the remote. Each returns the server's cart.
pub trait CartRemote: RemoteSource<Cart> {
    /// Adds `item` on the server.
    fn add_item(&self, item: &CartItem) -> impl Future<Output = Result<Cart, RemoteError>> + Send;

    /// Removes the line for `sku` on the server.
    fn remove_item(&self, sku: &str) -> impl Future<Output = Result<Cart, RemoteError>> + Send;
}

/// Order placement, offered by some remotes only.
pub trait CheckoutGateway: Send + Sync {
    /// Places an order for `cart` and returns the order id.
    fn place_order(&self, cart: &Cart) -> impl Future<Output = Result<String, RemoteError>> + Send;
}

/// Placeholder gateway type for managers without checkout.
#[derive(Debug, Clone, Copy)]
pub enum NoCheckout {}

impl CheckoutGateway for NoCheckout {
    async fn place_order(&self, _cart: &Cart) -> Result<String, RemoteError> {
        match *self {}
    }
}

impl CartRemote for MockRemote<Cart> {
    fn add_item(&self, item: &CartItem) -> impl Future<Output = Result<Cart, RemoteError>> + Send {
        let label = format!("add_item:{}", item.sku);
        async move { self.call(&label).await }
    }

    fn remove_item(&self, sku: &str) -> impl Future<Output = Result<Cart, RemoteError>> + Send {
        let label = format!("remove_item:{sku}");
        async move { self.call(&label).await }
    }
}

impl CheckoutGateway for MockRemote<String> {
    fn place_order(&self, _cart: &Cart) -> impl Future<Output = Result<String, RemoteError>> + Send {
        self.call("place_order")
    }
}

/// The cart domain.
pub struct CartManager<R, C = NoCheckout> {
    coordinator: Arc<Coordinator<Cart>>,
    remote: R,
    checkout: Option<C>,
}

impl<R: CartRemote> CartManager<R> {
    /// Creates a manager without checkout.
    pub fn new(coordinator: Arc<Coordinator<Cart>>, remote: R) -> Self {
        Self {
            coordinator,
            remote,
            checkout: None,
        }
    }
}

impl<R: CartRemote, C: CheckoutGateway> CartManager<R, C> {
    /// Adds the checkout capability.
    pub fn with_checkout<G: CheckoutGateway>(self, gateway: G) -> CartManager<R, G> {
        CartManager {
            coordinator: self.coordinator,
            remote: self.remote,
            checkout: Some(gateway),
        }
    }

    /// Returns the coordinator.
    pub fn coordinator(&self) -> &Arc<Coordinator<Cart>> {
        &self.coordinator
    }

    /// Returns the remote adapter.
    pub fn remote(&self) -> &R {
        &self.remote
    }

    /// Returns the current snapshot.
    pub fn snapshot(&self) -> Arc<StateSnapshot<Cart>> {
        self.coordinator.get()
    }

    /// Returns true if this manager can place orders.
    pub fn supports_checkout(&self) -> bool {
        self.checkout.is_some()
    }

    /// Loads the cart from the remote.
    pub async fn initialize(&self) -> Result<Cart, ErrorInfo> {
        self.coordinator.initialize_from(&self.remote).await
    }

    /// Re-fetches the cart.
    pub async fn refresh(&self) -> Result<Cart, ErrorInfo> {
        self.coordinator.refresh(|| self.remote.fetch()).await
    }

    /// Adds `item`, showing it at once and replacing the cart with the
    /// server's on commit.
    pub async fn add_item(&self, item: CartItem) -> Result<Cart, ErrorInfo> {
        let optimistic = item.clone();
        let payload = json!({ "sku": item.sku, "quantity": item.quantity });
        let op = Operation::new("addItem")
            .optimistic(move |cart: Option<&Cart>| {
                Some(cart.cloned().unwrap_or_default().with_item(optimistic))
            })
            .server_wins()
            .on_commit(move |ctx, _| {
                ctx.emit("item:added", payload);
            });
        self.coordinator.run(op, || self.remote.add_item(&item)).await
    }

    /// Removes the line for `sku`.
    pub async fn remove_item(&self, sku: &str) -> Result<Cart, ErrorInfo> {
        let removed = sku.to_string();
        let payload = json!({ "sku": sku });
        let op = Operation::new("removeItem")
            .optimistic(move |cart: Option<&Cart>| cart.cloned().map(|cart| cart.without(&removed)))
            .server_wins()
            .on_commit(move |ctx, _| {
                ctx.emit("item:removed", payload);
            });
        self.coordinator.run(op, || self.remote.remove_item(sku)).await
    }

    /// Places an order for the current cart and empties it on success.
    ///
    /// Fails with code `UNSUPPORTED` when the manager has no checkout
    /// capability; the domain state is left untouched in that case.
    pub async fn checkout(&self) -> Result<String, ErrorInfo> {
        let Some(gateway) = &self.checkout else {
            return Err(ErrorInfo::new(
                "UNSUPPORTED",
                "checkout is not supported by this remote",
                "checkout",
            ));
        };

        let op = Operation::new("checkout")
            .reconcile(|_: &String, _| Some(Cart::default()))
            .on_commit(|ctx, order_id: &String| {
                ctx.emit("order:placed", json!({ "order_id": order_id }));
            });
        // The cart is read once this operation holds its turn, so a
        // preceding write has already committed or rolled back.
        self.coordinator
            .run(op, || {
                let cart = self.snapshot().data().cloned().unwrap_or_default();
                async move { gateway.place_order(&cart).await }
            })
            .await
    }
}

impl<R, C> std::fmt::Debug for CartManager<R, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CartManager")
            .field("coordinator", &self.coordinator)
            .field("checkout", &self.checkout.is_some())
            .finish_non_exhaustive()
    }
}

//! End-to-end scenarios for the optimistic protocol, driven through the
//! sample cart domain.

use parking_lot::Mutex;
use proptest::prelude::*;
use std::sync::Arc;
use storesync_core::{
    CoordinatorConfig, EventKind, Operation, PersistenceConfig, Phase, RemoteError, StateSnapshot,
    StorageProvider, SyncHub, Timestamp,
};
use storesync_testkit::prelude::*;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn item(sku: &str) -> CartItem {
    CartItem::new(sku, 1, 500)
}

fn cart_of(items: &[CartItem]) -> Cart {
    items.iter().cloned().fold(Cart::default(), Cart::with_item)
}

#[tokio::test]
async fn first_fetch_moves_to_ready() {
    let remote = MockRemote::new();
    remote.push_ok(cart_of(&[item("X")]));
    let cart = CartManager::new(test_coordinator("cart"), remote);
    assert_eq!(*cart.snapshot(), StateSnapshot::initial());

    let loaded = cart.initialize().await.unwrap();

    let snapshot = cart.snapshot();
    assert_eq!(snapshot.state(), Phase::Ready);
    assert_eq!(snapshot.data(), Some(&loaded));
    assert!(snapshot.error().is_none());
    assert!(snapshot.last_synced_at().is_some());
}

#[tokio::test]
async fn successful_add_shows_optimistic_then_committed() {
    let remote = MockRemote::new();
    remote.push_ok(cart_of(&[item("X")]));
    let cart = CartManager::new(ready_coordinator("cart", Cart::default()), remote);
    let recorder = Recorder::attach_to(cart.coordinator());
    recorder.clear();

    cart.add_item(item("X")).await.unwrap();

    let expected = Some(cart_of(&[item("X")]));
    assert_eq!(recorder.phases(), vec![Phase::Syncing, Phase::Ready]);
    assert_eq!(recorder.data(), vec![expected.clone(), expected]);
    let synced = recorder.last().unwrap().last_synced_at().unwrap();
    assert!(synced > Timestamp(1));
}

#[tokio::test]
async fn failed_add_rolls_back_into_error() {
    let remote = MockRemote::new();
    remote.push_err(RemoteError::network("network down"));
    let cart = CartManager::new(ready_coordinator("cart", Cart::default()), remote);
    let recorder = Recorder::attach_to(cart.coordinator());
    recorder.clear();

    let err = cart.add_item(item("X")).await.unwrap_err();

    assert_eq!(recorder.phases(), vec![Phase::Syncing, Phase::Error]);
    let last = recorder.last().unwrap();
    assert_eq!(last.data(), Some(&Cart::default()));
    let recorded = last.error().unwrap();
    assert_eq!(recorded, &err);
    assert_eq!(recorded.code, "NETWORK_ERROR");
    assert_eq!(recorded.operation, "addItem");
}

#[tokio::test]
async fn rollback_visible_before_error_event() {
    let remote = MockRemote::new();
    remote.push_err(RemoteError::Timeout);
    let cart = CartManager::new(ready_coordinator("cart", Cart::default()), remote);
    let events = cart.coordinator().events().clone();
    let mut rx = events.subscribe();

    let rolled_back_at = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&rolled_back_at);
    let bus = events.clone();
    let _sub = cart.coordinator().subscribe(move |snapshot| {
        if snapshot.has_error() {
            *sink.lock() = Some(bus.latest_sequence());
        }
    });

    cart.add_item(item("X")).await.unwrap_err();

    let error_event = drain_events(&mut rx)
        .into_iter()
        .find(|e| matches!(e.kind, EventKind::Error { .. }))
        .unwrap();
    let seen_at = rolled_back_at.lock().unwrap();
    assert!(seen_at < error_event.sequence);
}

#[tokio::test]
async fn subscribers_see_identical_sequences() {
    let remote = MockRemote::new();
    remote.push_ok(cart_of(&[item("A")]));
    remote.push_err(RemoteError::server(503, "unavailable"));
    remote.push_ok(Cart::default());
    let cart = CartManager::new(ready_coordinator("cart", Cart::default()), remote);
    let first = Recorder::attach_to(cart.coordinator());
    let second = Recorder::attach_to(cart.coordinator());

    cart.add_item(item("A")).await.unwrap();
    cart.add_item(item("B")).await.unwrap_err();
    cart.remove_item("A").await.unwrap();

    let first = first.snapshots();
    let second = second.snapshots();
    assert_eq!(first.len(), 7);
    assert_eq!(first.len(), second.len());
    for (a, b) in first.iter().zip(&second) {
        assert!(Arc::ptr_eq(a, b));
    }
}

#[tokio::test]
async fn get_is_idempotent_between_writes() {
    let cart = CartManager::new(ready_coordinator("cart", Cart::default()), MockRemote::new());
    let a = cart.snapshot();
    let b = cart.snapshot();
    assert!(Arc::ptr_eq(&a, &b));

    cart.coordinator().container().update_data(Some(cart_of(&[item("X")])), true);
    assert!(!Arc::ptr_eq(&a, &cart.snapshot()));
}

#[tokio::test]
async fn event_stream_for_add_item() {
    let remote = MockRemote::new();
    remote.push_ok(cart_of(&[item("X")]));
    let cart = CartManager::new(ready_coordinator("cart", Cart::default()), remote);
    let mut rx = cart.coordinator().events().subscribe();

    cart.add_item(item("X")).await.unwrap();

    let events = drain_events(&mut rx);
    assert_eq!(
        event_types(&events),
        vec!["state:changed", "state:changed", "synced", "item:added"]
    );
    let id = events[0].operation_id;
    assert!(id.is_some());
    assert!(events.iter().all(|e| e.operation_id == id));
    match &events[3].kind {
        EventKind::Domain { payload, .. } => assert_eq!(payload["sku"], "X"),
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn server_data_wins_over_optimistic_guess() {
    let remote = MockRemote::new();
    // The server applied a promotion and added a free line.
    remote.push_ok(cart_of(&[CartItem::new("X", 1, 400), CartItem::new("GIFT", 1, 0)]));
    let cart = CartManager::new(ready_coordinator("cart", Cart::default()), remote);

    let committed = cart.add_item(item("X")).await.unwrap();

    assert_eq!(cart.snapshot().data(), Some(&committed));
    assert_eq!(committed.items.len(), 2);
}

#[tokio::test]
async fn recovery_after_error_through_next_operation() {
    let remote = MockRemote::new();
    remote.push_err(RemoteError::NotConnected);
    remote.push_ok(cart_of(&[item("X")]));
    let cart = CartManager::new(ready_coordinator("cart", Cart::default()), remote);

    cart.add_item(item("X")).await.unwrap_err();
    assert_eq!(cart.snapshot().state(), Phase::Error);

    cart.add_item(item("X")).await.unwrap();
    let snapshot = cart.snapshot();
    assert_eq!(snapshot.state(), Phase::Ready);
    assert!(snapshot.error().is_none());
}

#[tokio::test]
async fn checkout_is_optional_capability() {
    let remote = MockRemote::new();
    remote.push_ok(cart_of(&[item("X")]));
    let cart = CartManager::new(test_coordinator("cart"), remote);
    cart.initialize().await.unwrap();
    assert!(!cart.supports_checkout());

    let before = cart.snapshot();
    let err = cart.checkout().await.unwrap_err();
    assert_eq!(err.code, "UNSUPPORTED");
    assert!(Arc::ptr_eq(&before, &cart.snapshot()));

    let gateway = MockRemote::new();
    gateway.push_ok("order-1".to_string());
    let cart = cart.with_checkout(gateway);
    let mut rx = cart.coordinator().events().subscribe();

    assert_eq!(cart.checkout().await.unwrap(), "order-1");
    assert_eq!(cart.snapshot().data(), Some(&Cart::default()));
    let events = drain_events(&mut rx);
    assert_eq!(event_types(&events).last().map(String::as_str), Some("order:placed"));
}

/// Gateway that keeps every cart it was asked to order.
#[derive(Clone, Default)]
struct OrderLog {
    ordered: Arc<Mutex<Vec<Cart>>>,
}

impl CheckoutGateway for OrderLog {
    fn place_order(
        &self,
        cart: &Cart,
    ) -> impl std::future::Future<Output = Result<String, RemoteError>> + Send {
        self.ordered.lock().push(cart.clone());
        async { Ok("order-1".to_string()) }
    }
}

#[tokio::test]
async fn checkout_waits_for_in_flight_add_to_settle() {
    let remote = MockRemote::new();
    remote.push_err(RemoteError::Rejected("out of stock".into()));
    remote.pause();
    let orders = OrderLog::default();
    let cart = CartManager::new(ready_coordinator("cart", cart_of(&[item("A")])), remote)
        .with_checkout(orders.clone());

    let (added, placed, ()) = tokio::join!(
        cart.add_item(item("B")),
        cart.checkout(),
        async {
            cart.remote().release(1);
        }
    );

    added.unwrap_err();
    assert_eq!(placed.unwrap(), "order-1");
    assert_eq!(*orders.ordered.lock(), vec![cart_of(&[item("A")])]);
    assert_eq!(cart.snapshot().data(), Some(&Cart::default()));
}

#[tokio::test]
async fn serialized_writes_do_not_lose_updates() {
    let remote = MockRemote::new();
    remote.push_ok(cart_of(&[item("A")]));
    remote.push_ok(cart_of(&[item("A"), item("B")]));
    remote.pause();
    let cart = CartManager::new(ready_coordinator("cart", Cart::default()), remote);

    let (first, second, ()) = tokio::join!(
        cart.add_item(item("A")),
        cart.add_item(item("B")),
        async {
            cart.remote().release(2);
        }
    );

    first.unwrap();
    second.unwrap();
    assert_eq!(cart.snapshot().data(), Some(&cart_of(&[item("A"), item("B")])));
    assert_eq!(cart.remote().requests(), vec!["add_item:A", "add_item:B"]);
}

#[tokio::test]
async fn restored_cart_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let persistence = PersistenceConfig::local("cart");
    {
        let hub = SyncHub::new(StorageProvider::with_local_dir(dir.path()).unwrap());
        let coordinator = hub
            .domain::<Cart>(CoordinatorConfig::new("cart"), Some(&persistence))
            .unwrap();
        let remote = MockRemote::new();
        remote.push_ok(cart_of(&[item("X")]));
        let cart = CartManager::new(coordinator, remote);
        cart.initialize().await.unwrap();
    }

    let hub = SyncHub::new(StorageProvider::with_local_dir(dir.path()).unwrap());
    let coordinator = hub
        .domain::<Cart>(CoordinatorConfig::new("cart"), Some(&persistence))
        .unwrap();
    assert_eq!(coordinator.phase(), Phase::Ready);
    assert_eq!(coordinator.get().data(), Some(&cart_of(&[item("X")])));

    let remote = MockRemote::new();
    remote.push_ok(cart_of(&[item("X"), item("Y")]));
    let cart = CartManager::new(coordinator, remote);
    cart.initialize().await.unwrap();
    assert_eq!(cart.snapshot().state(), Phase::Ready);
    assert_eq!(cart.snapshot().data().map(Cart::item_count), Some(2));
}

#[tokio::test]
async fn failed_operation_hook_sees_rolled_back_state() {
    let coordinator = ready_coordinator("cart", Cart::default());
    let seen = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&seen);

    let op = Operation::<Cart, Cart>::new("addItem")
        .optimistic(|cart| Some(cart.cloned().unwrap_or_default().with_item(item("X"))))
        .server_wins()
        .on_error(move |ctx, info| {
            *sink.lock() = Some((ctx.snapshot().data().cloned(), info.code.clone()));
        });
    coordinator
        .run(op, || async { Err(RemoteError::Timeout) })
        .await
        .unwrap_err();

    assert_eq!(
        seen.lock().clone(),
        Some((Some(Cart::default()), "TIMEOUT".to_string()))
    );
}

fn apply(cart: Cart, op: &CartOp) -> Cart {
    match op {
        CartOp::Add(item) => cart.with_item(item.clone()),
        CartOp::Remove(sku) => cart.without(sku),
    }
}

async fn perform<R: CartRemote>(cart: &CartManager<R>, op: &CartOp) -> Result<Cart, storesync_core::ErrorInfo> {
    match op {
        CartOp::Add(item) => cart.add_item(item.clone()).await,
        CartOp::Remove(sku) => cart.remove_item(sku).await,
    }
}

proptest! {
    #[test]
    fn failed_operation_restores_exact_data(
        start in cart_strategy(),
        op in cart_op_strategy(),
        error in remote_error_strategy(),
    ) {
        let remote = MockRemote::new();
        remote.push_err(error.clone());
        let cart = CartManager::new(ready_coordinator("cart", start.clone()), remote);

        let result = runtime().block_on(perform(&cart, &op));

        let info = result.unwrap_err();
        prop_assert_eq!(info.code.as_str(), error.code());
        let snapshot = cart.snapshot();
        prop_assert_eq!(snapshot.state(), Phase::Error);
        prop_assert_eq!(snapshot.data(), Some(&start));
    }

    #[test]
    fn successful_operation_yields_two_snapshots(
        start in cart_strategy(),
        op in cart_op_strategy(),
    ) {
        let server = apply(start.clone(), &op);
        let remote = MockRemote::new();
        remote.push_ok(server.clone());
        let cart = CartManager::new(ready_coordinator("cart", start.clone()), remote);
        let recorder = Recorder::attach_to(cart.coordinator());
        recorder.clear();

        runtime().block_on(perform(&cart, &op)).unwrap();

        prop_assert_eq!(recorder.phases(), vec![Phase::Syncing, Phase::Ready]);
        prop_assert_eq!(recorder.data(), vec![Some(apply(start, &op)), Some(server)]);
    }

    #[test]
    fn scripted_session_matches_model(session in scripted_session_strategy(12)) {
        let remote = MockRemote::new();
        let mut model = Cart::default();
        for (op, succeeds) in &session {
            if *succeeds {
                model = apply(model, op);
                remote.push_ok(model.clone());
            } else {
                remote.push_err(RemoteError::network("flaky"));
            }
        }
        let cart = CartManager::new(ready_coordinator("cart", Cart::default()), remote);

        let rt = runtime();
        for (op, succeeds) in &session {
            let result = rt.block_on(perform(&cart, op));
            prop_assert_eq!(result.is_ok(), *succeeds);
        }

        let snapshot = cart.snapshot();
        prop_assert_eq!(snapshot.data(), Some(&model));
        let last_failed = session.last().is_some_and(|(_, ok)| !ok);
        prop_assert_eq!(snapshot.has_error(), last_failed);
        prop_assert!(snapshot.is_consistent());
    }
}

//! Simulate command implementation.

use serde::Serialize;
use std::path::PathBuf;
use storesync_core::{
    CoordinatorConfig, EventKind, LifecycleEvent, PersistenceConfig, Phase, RemoteError, SyncHub,
};
use storesync_storage::StorageScope;
use storesync_testkit::{drain_events, Cart, CartItem, CartManager, MockRemote};

const SKUS: [&str; 3] = ["SKU-TEE", "SKU-MUG", "SKU-CAP"];

/// Options for one simulated session.
#[derive(Debug, Clone)]
pub struct SimulateOptions {
    /// Number of cart operations after the initial load.
    pub ops: usize,
    /// Every `fail_every`-th operation fails remotely; 0 disables failures.
    pub fail_every: usize,
    /// Scope the cart persists to.
    pub scope: StorageScope,
    /// Directory backing the local scope.
    pub dir: Option<PathBuf>,
}

/// Session outcome.
#[derive(Debug, Serialize)]
pub struct SimulateSummary {
    /// Operations attempted, including the initial load.
    pub operations: usize,
    /// Operations that committed.
    pub committed: usize,
    /// Operations that rolled back.
    pub rolled_back: usize,
    /// Final phase.
    pub phase: Phase,
    /// Units in the final cart.
    pub item_count: u32,
    /// Final cart total, in cents.
    pub total_cents: u64,
    /// Events published.
    pub events: usize,
}

enum Step {
    Add(CartItem),
    Remove(String),
}

/// Runs the simulate command.
pub fn run(options: &SimulateOptions, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let summary = runtime.block_on(simulate(options, |event| print_event(event, format)))?;

    match format {
        "json" => println!("{}", serde_json::to_string(&summary)?),
        _ => {
            println!();
            println!("Operations:  {}", summary.operations);
            println!("Committed:   {}", summary.committed);
            println!("Rolled back: {}", summary.rolled_back);
            println!("Final phase: {}", summary.phase);
            println!("Items:       {}", summary.item_count);
            println!("Total:       {:.2}", summary.total_cents as f64 / 100.0);
        }
    }
    Ok(())
}

/// Runs a scripted cart session, passing every published event to `sink`.
pub async fn simulate<F>(
    options: &SimulateOptions,
    mut sink: F,
) -> Result<SimulateSummary, Box<dyn std::error::Error>>
where
    F: FnMut(&LifecycleEvent),
{
    let hub = match &options.dir {
        Some(dir) => SyncHub::with_local_dir(dir)?,
        None => SyncHub::in_memory(),
    };
    if options.scope == StorageScope::Local && options.dir.is_none() {
        tracing::warn!("local scope without --dir; snapshots stay in memory");
    }

    let mut events = hub.subscribe();
    let persistence = PersistenceConfig::new("cart", options.scope);
    let coordinator = hub.domain::<Cart>(CoordinatorConfig::new("cart"), Some(&persistence))?;

    let initial = coordinator.get().data().cloned().unwrap_or_default();
    let steps = script(&initial, options.ops);
    let remote = MockRemote::new();
    let mut server = initial.clone();
    remote.push_ok(server.clone());
    for (index, step) in steps.iter().enumerate() {
        if options.fail_every > 0 && (index + 1) % options.fail_every == 0 {
            remote.push_err(RemoteError::network("simulated network failure"));
            continue;
        }
        server = match step {
            Step::Add(item) => server.with_item(item.clone()),
            Step::Remove(sku) => server.without(sku),
        };
        remote.push_ok(server.clone());
    }

    let cart = CartManager::new(coordinator, remote);
    let mut committed = 0;
    let mut rolled_back = 0;
    let mut published = 0;

    let loaded = cart.initialize().await;
    tally(loaded.is_ok(), &mut committed, &mut rolled_back);
    published += forward(&mut events, &mut sink);

    for step in steps {
        let result = match step {
            Step::Add(item) => cart.add_item(item).await,
            Step::Remove(sku) => cart.remove_item(&sku).await,
        };
        tally(result.is_ok(), &mut committed, &mut rolled_back);
        published += forward(&mut events, &mut sink);
    }

    let snapshot = cart.snapshot();
    let final_cart = snapshot.data().cloned().unwrap_or_default();
    tracing::debug!(remote = ?cart.remote(), "session finished");
    Ok(SimulateSummary {
        operations: options.ops + 1,
        committed,
        rolled_back,
        phase: snapshot.state(),
        item_count: final_cart.item_count(),
        total_cents: final_cart.total_cents(),
        events: published,
    })
}

/// Every fourth step removes a line the cart is expected to hold; the
/// rest add units.
fn script(initial: &Cart, ops: usize) -> Vec<Step> {
    let mut expected = initial.clone();
    (0..ops)
        .map(|i| {
            let removable = expected.items.first().map(|line| line.sku.clone());
            match removable {
                Some(sku) if i % 4 == 3 => {
                    expected = expected.clone().without(&sku);
                    Step::Remove(sku)
                }
                _ => {
                    let sku = SKUS[i % SKUS.len()];
                    let item = CartItem::new(sku, 1, 1_500 + 500 * (i % SKUS.len()) as u64);
                    expected = expected.clone().with_item(item.clone());
                    Step::Add(item)
                }
            }
        })
        .collect()
}

fn tally(ok: bool, committed: &mut usize, rolled_back: &mut usize) {
    if ok {
        *committed += 1;
    } else {
        *rolled_back += 1;
    }
}

fn forward<F: FnMut(&LifecycleEvent)>(
    events: &mut tokio::sync::mpsc::UnboundedReceiver<LifecycleEvent>,
    sink: &mut F,
) -> usize {
    let drained = drain_events(events);
    for event in &drained {
        sink(event);
    }
    drained.len()
}

fn print_event(event: &LifecycleEvent, format: &str) {
    if format == "json" {
        match serde_json::to_string(event) {
            Ok(line) => println!("{line}"),
            Err(e) => tracing::warn!(error = %e, "failed to encode event"),
        }
        return;
    }

    let detail = match &event.kind {
        EventKind::StateChanged { previous, next } => format!("{previous} -> {next}"),
        EventKind::Synced { operation } => operation.clone(),
        EventKind::Error { error } => error.to_string(),
        EventKind::Domain { payload, .. } => payload.to_string(),
    };
    println!(
        "[{:>4}] {:<8} {:<14} {}",
        event.sequence,
        event.domain,
        event.kind.type_name(),
        detail
    );
}

//! Randomized multi-replica editing session.
//!
//! Every replica sits on one [`MemoryHub`] with its deliveries held. Each
//! round the replicas edit concurrently, then held deliveries are released
//! in shuffled order, some of them held back for a later round. After the
//! last round everything is delivered and the replicas must agree.

use crate::{config::Config, error::SimError};
use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};
use serde_json::{json, Value};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use tandem_engine::{
    adapter::PeerId, Datastore, Field, FieldUpdate, FieldValue, Inbound, MemoryHub, Options, Schema,
    Subscription, TableUpdate, TransactionId,
};

const SCHEMA: &str = "docs";
const RECORDS: [&str; 3] = ["readme", "notes", "todo"];
const KEYS: [&str; 4] = ["color", "size", "owner", "state"];
const NAMES: [&str; 4] = ["ada", "grace", "linus", "barbara"];
const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz ";

/// Chance that a released message is held back for another round.
const HOLD_BACK: f64 = 0.3;
/// Chance that a replica undoes or redoes something after its edits.
const HISTORY_EDIT: f64 = 0.25;

/// A schema exercising every field kind.
pub fn schema() -> Schema {
    Schema::new(SCHEMA)
        .with_field("title", Field::text())
        .with_field("tags", Field::list())
        .with_field("owner", Field::register_with_default(json!("nobody")))
        .with_field("props", Field::map())
}

/// Totals for one run.
#[derive(Debug, Default, Clone)]
pub struct Report {
    pub transactions: usize,
    pub undos: usize,
    pub redos: usize,
    pub deliveries: usize,
    pub events: usize,
    pub snapshot_bytes: usize,
}

struct Replica {
    store: Datastore,
    peer: PeerId,
    committed: Vec<TransactionId>,
    undone: Vec<TransactionId>,
    backlog: Vec<Inbound>,
    _subscription: Subscription,
}

pub struct Simulation {
    rounds: u32,
    edits_per_round: u32,
    hub: MemoryHub,
    replicas: Vec<Replica>,
    rng: StdRng,
    events: Arc<AtomicUsize>,
    report: Report,
}

impl Simulation {
    pub fn new(config: &Config) -> Result<Self, SimError> {
        let hub = MemoryHub::new();
        let events = Arc::new(AtomicUsize::new(0));

        let mut replicas = Vec::with_capacity(config.replicas as usize);
        for store_id in 1..=config.replicas {
            let adapter = hub.paused_adapter();
            let peer = adapter.peer_id();
            let store = Datastore::create(
                Options::new(store_id)
                    .with_schema(schema())
                    .with_adapter(adapter),
            )?;
            let subscription = {
                let events = Arc::clone(&events);
                store.subscribe(move |_| {
                    events.fetch_add(1, Ordering::Relaxed);
                })
            };
            replicas.push(Replica {
                store,
                peer,
                committed: Vec::new(),
                undone: Vec::new(),
                backlog: Vec::new(),
                _subscription: subscription,
            });
        }

        Ok(Self {
            rounds: config.rounds,
            edits_per_round: config.edits_per_round,
            hub,
            replicas,
            rng: StdRng::seed_from_u64(config.seed),
            events,
            report: Report::default(),
        })
    }

    /// Run every round, deliver everything, and compare the replicas.
    pub async fn run(mut self) -> Result<Report, SimError> {
        for round in 0..self.rounds {
            for index in 0..self.replicas.len() {
                for _ in 0..self.edits_per_round {
                    self.edit(index)?;
                }
                if self.rng.gen_bool(HISTORY_EDIT) {
                    self.undo_or_redo(index).await?;
                }
            }
            let delivered = self.release(false)?;
            tracing::debug!(round, delivered, "round finished");
        }

        let delivered = self.release(true)?;
        tracing::debug!(delivered, "final release");

        self.check_converged()?;
        self.report.events = self.events.load(Ordering::Relaxed);
        Ok(self.report)
    }

    /// Commit one random local edit on replica `index`.
    fn edit(&mut self, index: usize) -> Result<(), SimError> {
        let record = RECORDS[self.rng.gen_range(0..RECORDS.len())];
        let replica = &mut self.replicas[index];
        let (field, update) = random_update(&mut self.rng, &replica.store, record)?;

        let mut data = TableUpdate::new();
        data.entry(record.to_string())
            .or_default()
            .insert(field.to_string(), update);

        let id = replica.store.begin_transaction()?;
        replica.store.update(SCHEMA, data)?;
        replica.store.end_transaction()?;

        tracing::trace!(store_id = replica.store.id(), transaction = %id, record, field, "local edit");
        replica.committed.push(id);
        self.report.transactions += 1;
        Ok(())
    }

    /// Undo one of the replica's own transactions, or redo one it undid.
    async fn undo_or_redo(&mut self, index: usize) -> Result<(), SimError> {
        let redo = !self.replicas[index].undone.is_empty() && self.rng.gen_bool(0.5);
        let replica = &mut self.replicas[index];

        if redo {
            let id = replica
                .undone
                .swap_remove(self.rng.gen_range(0..replica.undone.len()));
            replica.store.redo(&id)?.await?;
            tracing::debug!(store_id = replica.store.id(), transaction = %id, "redo");
            replica.committed.push(id);
            self.report.redos += 1;
        } else if !replica.committed.is_empty() {
            let id = replica
                .committed
                .swap_remove(self.rng.gen_range(0..replica.committed.len()));
            replica.store.undo(&id)?.await?;
            tracing::debug!(store_id = replica.store.id(), transaction = %id, "undo");
            replica.undone.push(id);
            self.report.undos += 1;
        }
        Ok(())
    }

    /// Hand held messages to each replica in shuffled order and process
    /// them. Unless `everything` is set some are kept for a later round.
    fn release(&mut self, everything: bool) -> Result<usize, SimError> {
        let mut delivered = 0;
        for replica in &mut self.replicas {
            let mut messages = std::mem::take(&mut replica.backlog);
            messages.extend(self.hub.take_held(replica.peer));
            messages.shuffle(&mut self.rng);

            for message in messages {
                if !everything && self.rng.gen_bool(HOLD_BACK) {
                    replica.backlog.push(message);
                    continue;
                }
                self.hub.deliver(replica.peer, message)?;
                delivered += 1;
            }
            replica.store.run_pending();
        }
        self.report.deliveries += delivered;
        Ok(delivered)
    }

    fn check_converged(&mut self) -> Result<(), SimError> {
        let Some((first, rest)) = self.replicas.split_first() else {
            return Ok(());
        };
        let reference = first.store.to_json()?;
        for replica in rest {
            let json = replica.store.to_json()?;
            if json != reference {
                tracing::error!(
                    store_id = replica.store.id(),
                    reference = first.store.id(),
                    expected = %reference,
                    actual = %json,
                    "replicas diverged"
                );
                return Err(SimError::Diverged {
                    store_id: replica.store.id(),
                    reference: first.store.id(),
                });
            }
        }
        self.report.snapshot_bytes = reference.len();
        Ok(())
    }
}

/// Pick a field of `record` and a random edit for it.
fn random_update(
    rng: &mut StdRng,
    store: &Datastore,
    record: &str,
) -> Result<(&'static str, FieldUpdate), SimError> {
    let current = store.get(SCHEMA)?.get(record);
    let len_of = |field: &str| {
        current
            .and_then(|r| r.get(field))
            .map_or(0, |value| match value {
                FieldValue::Text(text) => text.chars().count(),
                FieldValue::List(items) => items.len(),
                _ => 0,
            })
    };

    let choice = match rng.gen_range(0..4) {
        0 => {
            let len = len_of("title");
            let index = rng.gen_range(0..=len);
            let remove = rng.gen_range(0..=2usize).min(len - index);
            ("title", FieldUpdate::edit(index, remove, random_word(rng)))
        }
        1 => {
            let len = len_of("tags");
            let index = rng.gen_range(0..=len);
            let remove = rng.gen_range(0..=1usize).min(len - index);
            let values = (0..rng.gen_range(0..=2))
                .map(|_| json!(rng.gen_range(0..100)))
                .collect();
            ("tags", FieldUpdate::splice(index, remove, values))
        }
        2 => {
            let name = NAMES[rng.gen_range(0..NAMES.len())];
            ("owner", FieldUpdate::set(name))
        }
        _ => {
            let key = KEYS[rng.gen_range(0..KEYS.len())];
            let value = if rng.gen_bool(0.2) {
                Value::Null
            } else {
                json!(rng.gen_range(0..10))
            };
            ("props", FieldUpdate::entries([(key, value)]))
        }
    };
    Ok(choice)
}

fn random_word(rng: &mut StdRng) -> String {
    (0..rng.gen_range(0..=4))
        .map(|_| char::from(ALPHABET[rng.gen_range(0..ALPHABET.len())]))
        .collect()
}

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt::Debug;

/// Opaque id of an aggregate instance, stable across its whole lifetime.
pub type AggregateId = String;

/// Opaque name of an aggregate kind, resolved via a [`TypeNameProvider`].
pub type AggregateTypeName = String;

/// Opaque id of a user-issued command, globally unique.
pub type CommandId = String;

/// A single domain event produced by an aggregate.
pub trait DomainEvent:
    Debug + Clone + PartialEq + Serialize + DeserializeOwned + Send + Sync
{
    fn event_type(&self) -> String;
}

/// An atomic, ordered batch of events produced by one command against one
/// aggregate at one version.
///
/// Invariant: for any `(aggregate_id, version)` there is at most one stream
/// in the store. Invariant: for any `(aggregate_id, command_id)` there is
/// at most one stream in the store. Both invariants are enforced by the
/// `EventStore` implementation, not by this type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainEventStream<A>
where
    A: AggregateRoot,
{
    pub command_id: CommandId,
    pub aggregate_id: AggregateId,
    pub aggregate_type: AggregateTypeName,
    pub version: usize,
    pub events: Vec<A::Event>,
    pub items: HashMap<String, String>,
}

/// The in-process domain model that produced an `event_stream`. Only the
/// members the commit core relies on are named here; business behavior
/// (command validation, state transitions beyond `apply`) is the
/// aggregate's own concern and out of scope for this crate.
pub trait AggregateRoot: Default + Debug + Clone + Send + Sync + 'static {
    type Event: DomainEvent;

    const TYPE: &'static str;

    fn unique_id(&self) -> AggregateId;
    fn with_unique_id(self, id: AggregateId) -> Self;

    fn version(&self) -> usize;

    /// Mutates the aggregate in place to reflect one already-applied event.
    fn apply(&mut self, event: &Self::Event);

    /// Finalizes uncommitted changes at the given version. Called once the
    /// event store has durably accepted the stream at that version.
    fn accept_changes(&mut self, version: usize);

    /// Rebuilds state from history, in order.
    fn replay_events(&mut self, streams: &[DomainEventStream<Self>]) {
        for stream in streams {
            for event in &stream.events {
                self.apply(event);
            }
            self.accept_changes(stream.version);
        }
    }

    fn get_type() -> AggregateTypeName {
        Self::TYPE.to_string()
    }
}

/// Dynamic aggregate construction, keyed by aggregate type — the
/// Rust-native replacement for reflection-based instantiation.
pub trait AggregateRootFactory<A: AggregateRoot>: Send + Sync {
    fn create(&self) -> A;
}

/// Creates a fresh `A::default()`. Sufficient whenever the aggregate has
/// no construction-time dependencies; `AggregateRootFactory` exists as a
/// seam for aggregates that do.
#[derive(Debug, Default)]
pub struct DefaultAggregateRootFactory<A>(std::marker::PhantomData<A>);

impl<A: AggregateRoot> AggregateRootFactory<A> for DefaultAggregateRootFactory<A> {
    fn create(&self) -> A {
        A::default()
    }
}

/// Resolves an `AggregateTypeName` to a concrete aggregate kind. In a
/// single-aggregate-type commit core (one `CommitCore<A>` instance per
/// `A`) this collapses to a registration check rather than runtime type
/// introspection — see DESIGN.md.
pub trait TypeNameProvider: Send + Sync {
    fn get_type(&self, type_name: &str) -> Option<AggregateTypeName>;
}

#[derive(Debug, Default)]
pub struct StaticTypeNameProvider {
    known: HashSet<AggregateTypeName>,
}

impl StaticTypeNameProvider {
    pub fn new(types: impl IntoIterator<Item = AggregateTypeName>) -> Self {
        Self {
            known: types.into_iter().collect(),
        }
    }
}

impl TypeNameProvider for StaticTypeNameProvider {
    fn get_type(&self, type_name: &str) -> Option<AggregateTypeName> {
        self.known.get(type_name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{TestAggregate, TestEvent};

    #[test]
    fn replay_events_applies_in_order_and_advances_version() {
        let mut aggregate = TestAggregate::default().with_unique_id("a1".to_string());
        let streams = vec![
            DomainEventStream {
                command_id: "c1".to_string(),
                aggregate_id: "a1".to_string(),
                aggregate_type: TestAggregate::TYPE.to_string(),
                version: 1,
                events: vec![TestEvent::Created],
                items: HashMap::new(),
            },
            DomainEventStream {
                command_id: "c2".to_string(),
                aggregate_id: "a1".to_string(),
                aggregate_type: TestAggregate::TYPE.to_string(),
                version: 2,
                events: vec![TestEvent::Renamed("new-name".to_string())],
                items: HashMap::new(),
            },
        ];

        aggregate.replay_events(&streams);

        assert_eq!(aggregate.version(), 2);
        assert_eq!(aggregate.name, Some("new-name".to_string()));
    }

    #[test]
    fn default_factory_creates_a_default_aggregate() {
        let factory = DefaultAggregateRootFactory::<TestAggregate>::default();
        let aggregate = factory.create();
        assert_eq!(aggregate.version(), 0);
    }

    #[test]
    fn static_type_name_provider_only_resolves_registered_types() {
        let provider = StaticTypeNameProvider::new(["TestAggregate".to_string()]);
        assert_eq!(provider.get_type("TestAggregate"), Some("TestAggregate".to_string()));
        assert_eq!(provider.get_type("Unknown"), None);
    }
}

//! Fixtures for exercising the commit core without a real domain model.
//! Used by this crate's own unit tests and available to downstream
//! integration tests.

use crate::domain::{AggregateRoot, DomainEvent, DomainEventStream};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TestEvent {
    Created,
    Renamed(String),
}

impl DomainEvent for TestEvent {
    fn event_type(&self) -> String {
        match self {
            TestEvent::Created => "Created".to_string(),
            TestEvent::Renamed(_) => "Renamed".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TestAggregate {
    pub id: String,
    pub version: usize,
    pub name: Option<String>,
}

impl AggregateRoot for TestAggregate {
    type Event = TestEvent;
    const TYPE: &'static str = "TestAggregate";

    fn unique_id(&self) -> String {
        self.id.clone()
    }

    fn with_unique_id(mut self, id: String) -> Self {
        self.id = id;
        self
    }

    fn version(&self) -> usize {
        self.version
    }

    fn apply(&mut self, event: &Self::Event) {
        match event {
            TestEvent::Created => {}
            TestEvent::Renamed(name) => self.name = Some(name.clone()),
        }
    }

    fn accept_changes(&mut self, version: usize) {
        self.version = version;
    }
}

pub fn test_stream(
    aggregate_id: &str,
    command_id: &str,
    version: usize,
    events: Vec<TestEvent>,
) -> DomainEventStream<TestAggregate> {
    DomainEventStream {
        command_id: command_id.to_string(),
        aggregate_id: aggregate_id.to_string(),
        aggregate_type: TestAggregate::TYPE.to_string(),
        version,
        events,
        items: Default::default(),
    }
}

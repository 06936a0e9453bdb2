//! Shared setup for scenario tests

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use schema_contracts::events::EventLog;
use schema_contracts::lifecycle::PublishOutcome;
use schema_contracts::store::{AssetStore, RegistrationStore};
use schema_contracts::{
    Actor, Asset, Contract, ContractLifecycle, CoreConfig, MemoryStore, Proposal, ProposalWorkflow,
    PublishRequest, Registration, SchemaDocument,
};
use uuid::Uuid;

pub fn fixture(name: &str) -> SchemaDocument {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name);
    let content = std::fs::read_to_string(&path).unwrap();
    SchemaDocument::parse_str(&content).unwrap()
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub events: Arc<EventLog>,
    pub lifecycle: Arc<ContractLifecycle<MemoryStore>>,
    pub workflow: ProposalWorkflow<MemoryStore>,
    pub asset: Asset,
    pub producer: Actor,
    pub admin: Actor,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(CoreConfig::default())
    }

    pub fn with_config(config: CoreConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let events = Arc::new(EventLog::new());
        let producer = Actor::user(Uuid::new_v4(), "orders-team@acme.io");
        let admin = Actor::user(Uuid::new_v4(), "platform-admin@acme.io");

        let asset = Asset::new("warehouse.sales.orders", producer.team_id).unwrap();
        store.put_asset(asset.clone()).unwrap();

        let lifecycle = Arc::new(ContractLifecycle::new(store.clone(), events.clone(), config));
        let workflow = ProposalWorkflow::new(lifecycle.clone());

        Self {
            store,
            events,
            lifecycle,
            workflow,
            asset,
            producer,
            admin,
        }
    }

    pub fn request(&self, schema: SchemaDocument) -> PublishRequest {
        PublishRequest::new(self.asset.id, schema, self.producer.clone())
    }

    /// Register `count` consumer teams on the asset
    pub fn register_consumers(&self, count: usize) -> Vec<Uuid> {
        (0..count)
            .map(|_| {
                let team = Uuid::new_v4();
                self.store
                    .put_registration(Registration::active(self.asset.id, team))
                    .unwrap();
                team
            })
            .collect()
    }

    pub fn publish_v1(&self) -> Contract {
        match self.lifecycle.decide_publish(self.request(fixture("orders_v1.json"))).unwrap() {
            PublishOutcome::Published(contract) => contract,
            PublishOutcome::Proposed(_) => panic!("first publish must not open a proposal"),
        }
    }

    /// Publish v1 and open a proposal that drops `name`
    pub fn open_breaking_proposal(&self) -> Proposal {
        self.publish_v1();
        match self
            .lifecycle
            .decide_publish(self.request(fixture("orders_drop_name.json")))
            .unwrap()
        {
            PublishOutcome::Proposed(proposal) => proposal,
            PublishOutcome::Published(_) => {
                panic!("dropping a required field must open a proposal")
            }
        }
    }
}

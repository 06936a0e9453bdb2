//! End-to-end publish and negotiation scenarios

mod common;

use std::sync::Barrier;

use pretty_assertions::assert_eq;
use schema_contracts::lifecycle::PublishOutcome;
use schema_contracts::model::{AuditAction, DependencyEdge};
use schema_contracts::store::{
    AssetStore, AuditLog, ContractStore, ProposalStore, RegistrationStore,
};
use schema_contracts::{
    AckResponse, Asset, ChangeKind, ChangeType, CompatibilityMode, ContractStatus, ErrorKind,
    ProposalStatus, Registration,
};
use semver::Version;
use uuid::Uuid;

use common::{fixture, Harness};

// =============================================================================
// Publishing
// =============================================================================

#[test]
fn test_optional_field_auto_publishes_minor() {
    let h = Harness::new();
    let v1 = h.publish_v1();

    let outcome = h
        .lifecycle
        .decide_publish(h.request(fixture("orders_add_email.json")))
        .unwrap();
    let v2 = outcome.contract().expect("compatible change publishes directly");

    assert_eq!(v2.version, Version::new(1, 1, 0));
    assert_eq!(h.store.get_contract(v1.id).unwrap().status, ContractStatus::Deprecated);
    assert_eq!(h.store.active_contract(h.asset.id).unwrap().unwrap().id, v2.id);
    assert_eq!(h.events.kinds(), vec!["contract.published", "contract.published"]);

    let audit = h.store.entries_for(v1.id).unwrap();
    assert_eq!(audit.last().unwrap().action, AuditAction::ContractDeprecated);
}

#[test]
fn test_removed_field_opens_pending_proposal() {
    let h = Harness::new();
    let proposal = h.open_breaking_proposal();

    assert_eq!(proposal.status(), ProposalStatus::Pending);
    assert_eq!(proposal.change_type, ChangeType::Major);
    let labels: Vec<String> = proposal.breaking_changes().iter().map(|c| c.label()).collect();
    assert_eq!(labels, vec!["property_removed:properties.name"]);

    // Still on v1
    let active = h.store.active_contract(h.asset.id).unwrap().unwrap();
    assert_eq!(active.version, Version::new(1, 0, 0));

    let stored = h.store.get_proposal(proposal.id).unwrap();
    assert_eq!(stored.breaking_changes(), proposal.breaking_changes());
}

#[test]
fn test_forward_contract_accepts_optional_field() {
    let h = Harness::new();
    let v1 = match h
        .lifecycle
        .decide_publish(h.request(fixture("orders_v1.json")).with_mode(CompatibilityMode::Forward))
        .unwrap()
    {
        PublishOutcome::Published(contract) => contract,
        PublishOutcome::Proposed(_) => panic!("first publish must not open a proposal"),
    };
    assert_eq!(v1.compatibility_mode, CompatibilityMode::Forward);

    let outcome = h
        .lifecycle
        .decide_publish(h.request(fixture("orders_add_email.json")))
        .unwrap();
    let v2 = outcome.contract().expect("optional field is forward compatible");
    assert_eq!(v2.version, Version::new(1, 1, 0));
    assert_eq!(v2.compatibility_mode, CompatibilityMode::Forward);

    // Old readers can no longer rely on `name` being present
    let outcome = h
        .lifecycle
        .decide_publish(h.request(fixture("orders_drop_name.json")))
        .unwrap();
    let proposal = outcome.proposal().expect("relaxed requirement breaks forward readers");
    let kinds: Vec<ChangeKind> = proposal.breaking_changes().iter().map(|c| c.kind).collect();
    assert_eq!(kinds, vec![ChangeKind::RequiredRemoved]);
}

#[test]
fn test_proposal_snapshot_survives_later_publishes() {
    let h = Harness::new();
    let proposal = h.open_breaking_proposal();
    let snapshot = proposal.breaking_changes().to_vec();

    // The active contract moves on underneath the proposal
    h.lifecycle
        .decide_publish(h.request(fixture("orders_add_email.json")))
        .unwrap();

    let stored = h.store.get_proposal(proposal.id).unwrap();
    assert_eq!(stored.breaking_changes(), snapshot.as_slice());
}

#[test]
fn test_blocked_consumer_then_admin_force() {
    let h = Harness::new();
    let teams = h.register_consumers(3);
    let proposal = h.open_breaking_proposal();

    assert_eq!(
        h.workflow.acknowledge(proposal.id, teams[0], AckResponse::Approved, None).unwrap(),
        ProposalStatus::Pending
    );
    assert_eq!(
        h.workflow.acknowledge(proposal.id, teams[1], AckResponse::Approved, None).unwrap(),
        ProposalStatus::Pending
    );
    assert_eq!(
        h.workflow
            .acknowledge(
                proposal.id,
                teams[2],
                AckResponse::Blocked,
                Some("dashboards read name".into()),
            )
            .unwrap(),
        ProposalStatus::Pending
    );

    let contract = h
        .workflow
        .force(proposal.id, &h.admin, "incident 981: PII must be removed")
        .unwrap();
    assert_eq!(contract.version, Version::new(2, 0, 0));
    assert_eq!(h.store.get_proposal(proposal.id).unwrap().status(), ProposalStatus::Published);
    assert_eq!(
        h.store.get_proposal(proposal.id).unwrap().published_contract_id(),
        Some(contract.id)
    );

    let forced: Vec<_> = h
        .store
        .entries_for(proposal.id)
        .unwrap()
        .into_iter()
        .filter(|e| e.action == AuditAction::ProposalForcePublished)
        .collect();
    assert_eq!(forced.len(), 1);
    assert_eq!(forced[0].actor.as_ref(), Some(&h.admin));
    assert_eq!(forced[0].payload["reason"], "incident 981: PII must be removed");
    assert_eq!(forced[0].payload["from"], "pending");

    assert!(h.events.kinds().contains(&"proposal.force_published"));
}

#[test]
fn test_concurrent_publish_one_wins_loser_rebases() {
    let h = Harness::new();
    h.publish_v1();

    let barrier = Barrier::new(2);
    let results: Vec<_> = std::thread::scope(|scope| {
        let handles: Vec<_> = ["orders_add_email.json", "orders_add_phone.json"]
            .into_iter()
            .map(|name| {
                let h = &h;
                let barrier = &barrier;
                scope.spawn(move || {
                    let plan = h.lifecycle.prepare(h.request(fixture(name))).unwrap();
                    barrier.wait();
                    (name, h.lifecycle.commit(plan))
                })
            })
            .collect();
        handles.into_iter().map(|handle| handle.join().unwrap()).collect()
    });

    let winners: Vec<_> = results.iter().filter(|(_, r)| r.is_ok()).collect();
    let losers: Vec<_> = results.iter().filter(|(_, r)| r.is_err()).collect();
    assert_eq!(winners.len(), 1);
    assert_eq!(losers.len(), 1);

    let (loser_name, loser_result) = losers[0];
    assert_eq!(loser_result.as_ref().unwrap_err().kind(), ErrorKind::Conflict);

    let (winner_name, winner_result) = winners[0];
    let winner = winner_result.as_ref().unwrap().contract().unwrap().clone();
    assert_eq!(winner.version, Version::new(1, 1, 0));

    // Retry re-diffs against the winner's contract
    let retry = h.lifecycle.prepare(h.request(fixture(loser_name))).unwrap();
    assert_eq!(retry.base().unwrap().id, winner.id);
    let dropped = if *winner_name == "orders_add_email.json" { "email" } else { "phone" };
    let labels: Vec<String> = retry.changes().iter().map(|c| c.label()).collect();
    assert!(labels.contains(&format!("property_removed:properties.{}", dropped)));

    // Exactly one active contract throughout
    let active = h
        .store
        .contracts_for_asset(h.asset.id)
        .unwrap()
        .into_iter()
        .filter(|c| c.status == ContractStatus::Active)
        .count();
    assert_eq!(active, 1);
}

#[test]
fn test_retry_after_conflict_publishes_next_version() {
    let h = Harness::new();
    h.publish_v1();

    let stale = h.lifecycle.prepare(h.request(fixture("orders_add_email.json"))).unwrap();
    h.lifecycle
        .decide_publish(h.request(fixture("orders_add_email.json")))
        .unwrap();
    assert_eq!(h.lifecycle.commit(stale).unwrap_err().kind(), ErrorKind::Conflict);

    // Identical schema on retry: nothing structural changed, patch bump
    let outcome = h
        .lifecycle
        .decide_publish(h.request(fixture("orders_add_email.json")))
        .unwrap();
    assert_eq!(outcome.contract().unwrap().version, Version::new(1, 1, 1));
}

#[test]
fn test_refs_are_resolved_before_diffing() {
    let h = Harness::new();
    h.lifecycle
        .decide_publish(h.request(fixture("orders_refs.json")))
        .unwrap();

    let mut inlined = fixture("orders_refs.json").as_json().clone();
    inlined["properties"]["total"] = inlined["definitions"]["Money"].clone();
    inlined["properties"]["total"]["properties"]["currency"]["enum"] = serde_json::json!(["EUR"]);
    let doc = schema_contracts::SchemaDocument::from_json(inlined).unwrap();

    let plan = h.lifecycle.prepare(h.request(doc)).unwrap();
    let labels: Vec<String> = plan.changes().iter().map(|c| c.label()).collect();
    assert_eq!(labels, vec!["enum_values_removed:properties.total.properties.currency.enum"]);
    assert!(plan.is_breaking());
}

// =============================================================================
// Impact
// =============================================================================

#[test]
fn test_impact_through_cycle() {
    let h = Harness::new();
    h.publish_v1();
    let direct_team = h.register_consumers(1)[0];

    // orders -> y -> z -> y
    let y = Asset::new("warehouse.sales.order_facts", Uuid::new_v4()).unwrap();
    let z = Asset::new("warehouse.finance.revenue", Uuid::new_v4()).unwrap();
    h.store.put_asset(y.clone()).unwrap();
    h.store.put_asset(z.clone()).unwrap();
    h.store.add_edge(DependencyEdge::new(y.id, h.asset.id));
    h.store.add_edge(DependencyEdge::new(z.id, y.id));
    h.store.add_edge(DependencyEdge::new(y.id, z.id));

    let finance_team = Uuid::new_v4();
    h.store.put_registration(Registration::active(z.id, finance_team)).unwrap();
    // Also registered directly: reported once, at depth 0
    h.store.put_registration(Registration::active(z.id, direct_team)).unwrap();

    let report = h
        .lifecycle
        .compute_impact(h.asset.id, &fixture("orders_drop_name.json"), Some(5))
        .unwrap();

    let assets: Vec<_> = report.affected_assets.iter().map(|a| (a.asset_id, a.depth)).collect();
    assert_eq!(assets, vec![(y.id, 1), (z.id, 2)]);
    assert_eq!(report.affected_assets[1].fqn.as_deref(), Some("warehouse.finance.revenue"));
    assert!(!report.truncated);
    assert_eq!(report.depth_reached, 2);
    assert!(!report.safe_to_publish);
    assert_eq!(report.change_type, ChangeType::Major);

    let teams: Vec<_> = report.affected_teams.iter().map(|t| (t.team_id, t.depth)).collect();
    assert_eq!(teams, vec![(direct_team, 0), (finance_team, 2)]);
}

#[test]
fn test_impact_without_active_contract_is_safe() {
    let h = Harness::new();
    let report = h
        .lifecycle
        .compute_impact(h.asset.id, &fixture("orders_drop_name.json"), None)
        .unwrap();
    assert!(report.safe_to_publish);
    assert_eq!(report.change_type, ChangeType::Minor);
    assert!(report.affected_assets.is_empty());
}

#[test]
fn test_impact_reports_truncation() {
    let h = Harness::new();
    h.publish_v1();

    let mut previous = h.asset.id;
    for _ in 0..4 {
        let next = Uuid::new_v4();
        h.store.add_edge(DependencyEdge::new(next, previous));
        previous = next;
    }

    let report = h
        .lifecycle
        .compute_impact(h.asset.id, &fixture("orders_add_email.json"), Some(2))
        .unwrap();
    assert!(report.truncated);
    assert_eq!(report.affected_assets.len(), 2);
    assert!(report.affected_assets.iter().all(|a| a.fqn.is_none()));
    assert!(report.safe_to_publish);
}

#[test]
fn test_proposal_event_names_downstream_teams() {
    let h = Harness::new();
    let direct = h.register_consumers(1)[0];
    let downstream_asset = Uuid::new_v4();
    let downstream_team = Uuid::new_v4();
    h.store.add_edge(DependencyEdge::new(downstream_asset, h.asset.id));
    h.store
        .put_registration(Registration::active(downstream_asset, downstream_team))
        .unwrap();

    let proposal = h.open_breaking_proposal();

    let created = h
        .events
        .events()
        .into_iter()
        .find(|e| e.event.kind() == "proposal.created")
        .unwrap();
    match &created.event {
        schema_contracts::DomainEvent::ProposalCreated {
            proposal_id,
            consumer_teams,
            fqn,
            ..
        } => {
            assert_eq!(*proposal_id, proposal.id);
            assert_eq!(consumer_teams, &vec![direct, downstream_team]);
            assert_eq!(fqn, "warehouse.sales.orders");
        }
        other => panic!("unexpected event {:?}", other),
    }

    let notes = schema_contracts::events::notifications(&created, &[direct, downstream_team]);
    assert_eq!(notes.len(), 2);
    assert!(notes.iter().all(|n| n.key.subject_id == proposal.id));
}

#[test]
fn test_first_publish_with_explicit_version() {
    let h = Harness::new();
    let outcome = h
        .lifecycle
        .decide_publish(h.request(fixture("orders_v1.json")).with_version(Version::new(3, 2, 0)))
        .unwrap();
    assert_eq!(outcome.contract().unwrap().version, Version::new(3, 2, 0));

    let err = h
        .lifecycle
        .decide_publish(
            h.request(fixture("orders_add_email.json"))
                .with_version(Version::new(3, 2, 0)),
        )
        .unwrap_err();
    assert_eq!(err.path(), Some("version"));
    assert!(matches!(
        h.lifecycle.decide_publish(h.request(fixture("orders_add_email.json"))).unwrap(),
        PublishOutcome::Published(_)
    ));
}

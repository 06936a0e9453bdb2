//! Proposal workflow transitions

mod common;

use std::sync::Arc;

use chrono::{Duration, Utc};
use schema_contracts::model::{AuditAction, RegistrationStatus};
use schema_contracts::store::{AuditLog, ContractStore, ProposalStore, RegistrationStore};
use schema_contracts::{AckResponse, CoreConfig, ErrorKind, ProposalStatus, Registration};
use semver::Version;
use uuid::Uuid;

use common::Harness;

#[test]
fn test_all_approvals_then_publish() {
    let h = Harness::new();
    let teams = h.register_consumers(2);
    let proposal = h.open_breaking_proposal();

    h.workflow.acknowledge(proposal.id, teams[0], AckResponse::Approved, None).unwrap();
    let status = h
        .workflow
        .acknowledge(proposal.id, teams[1], AckResponse::Approved, None)
        .unwrap();
    assert_eq!(status, ProposalStatus::Approved);

    let contract = h.workflow.publish(proposal.id, &h.producer).unwrap();
    assert_eq!(contract.version, Version::new(2, 0, 0));
    assert_eq!(contract.schema, proposal.proposed_schema);
    assert_eq!(h.store.get_proposal(proposal.id).unwrap().status(), ProposalStatus::Published);

    let kinds = h.events.kinds();
    assert!(kinds.contains(&"proposal.approved"));
    assert_eq!(kinds.last(), Some(&"proposal.published"));
}

#[test]
fn test_overwritten_block_is_reflected() {
    let h = Harness::new();
    let teams = h.register_consumers(2);
    let proposal = h.open_breaking_proposal();

    h.workflow.acknowledge(proposal.id, teams[0], AckResponse::Approved, None).unwrap();
    let status = h.workflow.acknowledge(proposal.id, teams[1], AckResponse::Blocked, None).unwrap();
    assert_eq!(status, ProposalStatus::Pending);

    // Same team changes its mind
    let status = h
        .workflow
        .acknowledge(proposal.id, teams[1], AckResponse::Approved, None)
        .unwrap();
    assert_eq!(status, ProposalStatus::Approved);
    assert_eq!(h.store.acknowledgments(proposal.id).unwrap().len(), 2);
}

#[test]
fn test_block_after_approval_reopens() {
    let h = Harness::new();
    let team = h.register_consumers(1)[0];
    let proposal = h.open_breaking_proposal();

    assert_eq!(
        h.workflow.acknowledge(proposal.id, team, AckResponse::Approved, None).unwrap(),
        ProposalStatus::Approved
    );
    assert_eq!(
        h.workflow.acknowledge(proposal.id, team, AckResponse::Blocked, None).unwrap(),
        ProposalStatus::Pending
    );

    let actions: Vec<_> = h
        .store
        .entries_for(proposal.id)
        .unwrap()
        .into_iter()
        .map(|e| e.action)
        .collect();
    assert!(actions.contains(&AuditAction::ProposalReopened));

    let err = h.workflow.publish(proposal.id, &h.producer).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidTransition);
}

#[test]
fn test_terminal_states_reject_transitions() {
    let h = Harness::new();
    let team = h.register_consumers(1)[0];
    let proposal = h.open_breaking_proposal();

    h.workflow.withdraw(proposal.id, &h.producer).unwrap();

    let attempts = [
        h.workflow
            .acknowledge(proposal.id, team, AckResponse::Approved, None)
            .map(|_| ()),
        h.workflow.withdraw(proposal.id, &h.producer).map(|_| ()),
        h.workflow.reject(proposal.id, &h.producer, None).map(|_| ()),
        h.workflow.publish(proposal.id, &h.producer).map(|_| ()),
        h.workflow.force(proposal.id, &h.admin, "too late").map(|_| ()),
    ];
    for attempt in attempts {
        assert_eq!(attempt.unwrap_err().kind(), ErrorKind::InvalidTransition);
    }
    assert_eq!(h.store.get_proposal(proposal.id).unwrap().status(), ProposalStatus::Withdrawn);
}

#[test]
fn test_only_proposer_may_withdraw_or_reject() {
    let h = Harness::new();
    h.register_consumers(1);
    let proposal = h.open_breaking_proposal();

    let err = h.workflow.withdraw(proposal.id, &h.admin).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidTransition);

    let rejected = h
        .workflow
        .reject(proposal.id, &h.producer, Some("consumers need a quarter".into()))
        .unwrap();
    assert_eq!(rejected.status(), ProposalStatus::Rejected);
    assert!(rejected.resolved_at().is_some());
    assert_eq!(h.events.kinds().last(), Some(&"proposal.rejected"));
}

#[test]
fn test_force_ignores_migration_deadlines() {
    let h = Harness::new();
    let team = h.register_consumers(1)[0];
    let proposal = h.open_breaking_proposal();

    let deadline = Utc::now() + Duration::days(30);
    h.workflow
        .acknowledge(proposal.id, team, AckResponse::Migrating { deadline: Some(deadline) }, None)
        .unwrap();

    assert!(h.workflow.force(proposal.id, &h.admin, "regulatory cutoff").is_ok());
    assert_eq!(h.workflow.force(proposal.id, &h.admin, " ").unwrap_err().path(), Some("reason"));
}

#[test]
fn test_zero_consumers_approve_on_refresh() {
    let h = Harness::new();
    let proposal = h.open_breaking_proposal();
    assert_eq!(proposal.status(), ProposalStatus::Pending);

    assert_eq!(h.workflow.refresh(proposal.id).unwrap(), ProposalStatus::Approved);
}

#[test]
fn test_deactivated_registration_unblocks_coverage() {
    let h = Harness::new();
    let teams = h.register_consumers(2);
    let proposal = h.open_breaking_proposal();
    h.workflow.acknowledge(proposal.id, teams[0], AckResponse::Approved, None).unwrap();
    assert_eq!(h.workflow.refresh(proposal.id).unwrap(), ProposalStatus::Pending);

    let mut gone = Registration::active(h.asset.id, teams[1]);
    gone.status = RegistrationStatus::Inactive;
    h.store.put_registration(gone).unwrap();

    assert_eq!(h.workflow.refresh(proposal.id).unwrap(), ProposalStatus::Approved);
}

#[test]
fn test_progress_counts() {
    let h = Harness::new();
    let teams = h.register_consumers(3);
    let proposal = h.open_breaking_proposal();

    h.workflow.acknowledge(proposal.id, teams[0], AckResponse::Approved, None).unwrap();
    h.workflow.acknowledge(proposal.id, teams[1], AckResponse::Blocked, None).unwrap();
    let outsider = Uuid::new_v4();
    h.workflow.acknowledge(proposal.id, outsider, AckResponse::Approved, None).unwrap();

    let progress = h.workflow.progress(proposal.id).unwrap();
    assert_eq!(progress.status, ProposalStatus::Pending);
    assert_eq!(progress.total_consumers, 3);
    assert_eq!(progress.approved, 2);
    assert_eq!(progress.blocked, 1);
    assert_eq!(progress.migrating, 0);
    assert_eq!(progress.acknowledgments.len(), 3);

    let mut expected_pending = vec![teams[1], teams[2]];
    expected_pending.sort();
    assert_eq!(progress.pending_teams, expected_pending);
}

#[test]
fn test_expire_due_by_expiration_date() {
    let mut config = CoreConfig::default();
    config.proposals.default_expiration_days = Some(7);
    let h = Harness::with_config(config);
    h.register_consumers(1);
    let proposal = h.open_breaking_proposal();

    assert!(h.workflow.expire_due(Utc::now()).unwrap().is_empty());

    let expired = h.workflow.expire_due(Utc::now() + Duration::days(8)).unwrap();
    assert_eq!(expired, vec![proposal.id]);
    assert_eq!(h.store.get_proposal(proposal.id).unwrap().status(), ProposalStatus::Expired);
    assert_eq!(h.events.kinds().last(), Some(&"proposal.expired"));

    // Already expired: nothing left to do
    assert!(h.workflow.expire_due(Utc::now() + Duration::days(9)).unwrap().is_empty());
}

#[test]
fn test_auto_expire_after_migration_deadlines() {
    let h = Harness::new();
    let teams = h.register_consumers(2);
    h.publish_v1();
    let outcome = h
        .lifecycle
        .decide_publish(h.request(common::fixture("orders_drop_name.json")).auto_expire(true))
        .unwrap();
    let proposal = outcome.proposal().unwrap().clone();

    let soon = Utc::now() + Duration::days(1);
    let later = Utc::now() + Duration::days(3);
    h.workflow
        .acknowledge(proposal.id, teams[0], AckResponse::Migrating { deadline: Some(soon) }, None)
        .unwrap();
    h.workflow
        .acknowledge(proposal.id, teams[1], AckResponse::Migrating { deadline: Some(later) }, None)
        .unwrap();

    assert!(h.workflow.expire_due(Utc::now() + Duration::days(2)).unwrap().is_empty());
    assert_eq!(
        h.workflow.expire_due(Utc::now() + Duration::days(4)).unwrap(),
        vec![proposal.id]
    );
}

#[test]
fn test_expiration_can_be_disabled() {
    let mut config = CoreConfig::default();
    config.proposals.default_expiration_days = Some(1);
    config.proposals.auto_expire_enabled = false;
    let h = Harness::with_config(config);
    let proposal = h.open_breaking_proposal();

    assert!(h.workflow.expire_due(Utc::now() + Duration::days(30)).unwrap().is_empty());
    assert_eq!(h.store.get_proposal(proposal.id).unwrap().status(), ProposalStatus::Pending);
}

#[test]
fn test_concurrent_acknowledgments_are_not_lost() {
    let h = Arc::new(Harness::new());
    let teams = h.register_consumers(8);
    let proposal = h.open_breaking_proposal();

    std::thread::scope(|scope| {
        for team in &teams {
            let h = &h;
            scope.spawn(move || {
                h.workflow
                    .acknowledge(proposal.id, *team, AckResponse::Approved, None)
                    .unwrap();
            });
        }
    });

    assert_eq!(h.store.get_proposal(proposal.id).unwrap().status(), ProposalStatus::Approved);
    assert_eq!(h.store.acknowledgments(proposal.id).unwrap().len(), teams.len());
}

#[test]
fn test_publish_after_contract_moved_uses_current_head() {
    let h = Harness::new();
    let proposal = h.open_breaking_proposal();
    h.workflow.refresh(proposal.id).unwrap();

    // A compatible publish lands while the proposal waits
    h.lifecycle
        .decide_publish(h.request(common::fixture("orders_add_email.json")))
        .unwrap();

    let contract = h.workflow.publish(proposal.id, &h.producer).unwrap();
    assert_eq!(contract.version, Version::new(2, 0, 0));
    let active = h.store.active_contract(h.asset.id).unwrap().unwrap();
    assert_eq!(active.id, contract.id);
    assert_eq!(h.store.contracts_for_asset(h.asset.id).unwrap().len(), 3);
}

//! Concurrent directory mutations.
//!
//! Relations and uniqueness indexes are guarded by compare-and-set at
//! commit, so racing writers must never produce duplicate identities,
//! duplicate memberships, or a membership visible from only one side.

#![allow(clippy::expect_used, clippy::panic)]

use std::collections::BTreeSet;

use labgate_storage::{
    IdentityStore, LabStore, RoleName, StorageError,
    testutil::{memory_directory, new_identity, seed_identity, seed_lab},
};
use tokio::task::JoinSet;

const CONCURRENCY: usize = 16;

// ---------------------------------------------------------------------------
// Registration races
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn same_username_registers_exactly_once() {
    let dir = memory_directory();

    let mut set = JoinSet::new();
    for task in 0..CONCURRENCY {
        let dir = dir.clone();
        set.spawn(async move {
            let mut new = new_identity("racer", &[RoleName::Admin]);
            new.email = format!("racer{task}@example.com");
            dir.create(new).await
        });
    }

    let mut created = 0;
    while let Some(result) = set.join_next().await {
        match result.expect("task should not panic") {
            Ok(_) => created += 1,
            Err(StorageError::AlreadyExists { key }) => assert!(key.contains("username")),
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(created, 1);
    assert_eq!(dir.list().await.expect("list").len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn ids_are_unique_under_parallel_registration() {
    let dir = memory_directory();

    let mut set = JoinSet::new();
    for task in 0..CONCURRENCY {
        let dir = dir.clone();
        set.spawn(async move {
            dir.create(new_identity(&format!("user{task:02}"), &[])).await.expect("create").id
        });
    }

    let mut ids = BTreeSet::new();
    while let Some(result) = set.join_next().await {
        assert!(ids.insert(result.expect("task should not panic")), "duplicate id allocated");
    }
    assert_eq!(ids.len(), CONCURRENCY);
}

// ---------------------------------------------------------------------------
// Membership races
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_add_member_has_one_winner() {
    let dir = memory_directory();
    let owner = seed_identity(dir.as_ref(), "owner", &[RoleName::Admin]).await;
    let member = seed_identity(dir.as_ref(), "member", &[]).await;
    let lab = seed_lab(dir.as_ref(), "Central", owner.id).await;
    let (lab_id, member_id) = (lab.id, member.id);

    let mut set = JoinSet::new();
    for _ in 0..CONCURRENCY {
        let dir = dir.clone();
        set.spawn(async move { dir.add_member(lab_id, member_id).await.expect("add member") });
    }

    let mut winners = 0;
    while let Some(result) = set.join_next().await {
        if result.expect("task should not panic") {
            winners += 1;
        }
    }

    assert_eq!(winners, 1);
    assert_eq!(dir.members_of(lab.id).await.expect("members"), vec![member.id]);
    assert_eq!(dir.labs_of(member.id).await.expect("labs"), vec![lab.id]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn interleaved_add_and_remove_keep_both_sides_in_step() {
    let dir = memory_directory();
    let owner = seed_identity(dir.as_ref(), "owner", &[RoleName::Admin]).await;
    let member = seed_identity(dir.as_ref(), "member", &[]).await;
    let lab = seed_lab(dir.as_ref(), "Central", owner.id).await;
    let (lab_id, member_id) = (lab.id, member.id);

    let mut set = JoinSet::new();
    for task in 0..CONCURRENCY {
        let dir = dir.clone();
        set.spawn(async move {
            for _ in 0..20 {
                if task % 2 == 0 {
                    dir.add_member(lab_id, member_id).await.expect("add member");
                } else {
                    dir.remove_member(lab_id, member_id).await.expect("remove member");
                }
            }
        });
    }
    while let Some(result) = set.join_next().await {
        result.expect("task should not panic");
    }

    let lab_side = dir.is_member(lab.id, member.id).await.expect("is_member");
    let user_side = dir.labs_of(member.id).await.expect("labs").contains(&lab.id);
    assert_eq!(lab_side, user_side);
}

// ---------------------------------------------------------------------------
// Role races
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_assign_role_has_one_winner() {
    let dir = memory_directory();
    let user = seed_identity(dir.as_ref(), "user", &[]).await;
    let user_id = user.id;

    let mut set = JoinSet::new();
    for _ in 0..CONCURRENCY {
        let dir = dir.clone();
        set.spawn(async move { dir.assign_role(user_id, RoleName::User).await.expect("assign") });
    }

    let mut winners = 0;
    while let Some(result) = set.join_next().await {
        if result.expect("task should not panic") {
            winners += 1;
        }
    }

    assert_eq!(winners, 1);
    assert_eq!(dir.roles_of(user.id).await.expect("roles"), BTreeSet::from([RoleName::User]));
}

// ---------------------------------------------------------------------------
// Deletion races
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn deleted_identity_leaves_no_memberships() {
    let dir = memory_directory();
    let owner = seed_identity(dir.as_ref(), "owner", &[RoleName::Admin]).await;
    let member = seed_identity(dir.as_ref(), "member", &[]).await;

    let mut labs = Vec::new();
    for i in 0..8 {
        labs.push(seed_lab(dir.as_ref(), &format!("lab-{i}"), owner.id).await.id);
    }

    let member_id = member.id;
    let mut set = JoinSet::new();
    for lab in labs.clone() {
        let dir = dir.clone();
        set.spawn(async move {
            // Either outcome is fine; the identity may already be gone.
            let _ = dir.add_member(lab, member_id).await;
        });
    }
    {
        let dir = dir.clone();
        set.spawn(async move {
            dir.delete(member_id).await.expect("delete identity");
        });
    }
    while let Some(result) = set.join_next().await {
        result.expect("task should not panic");
    }

    assert!(dir.find_by_id(member.id).await.expect("find").is_none());
    assert!(dir.labs_of(member.id).await.expect("labs").is_empty());
    for lab in labs {
        assert!(!dir.is_member(lab, member.id).await.expect("is_member"));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn creator_with_labs_cannot_be_deleted_mid_creation() {
    let dir = memory_directory();
    let owner = seed_identity(dir.as_ref(), "owner", &[RoleName::Admin]).await;
    let owner_id = owner.id;

    let mut set = JoinSet::new();
    for i in 0..4 {
        let dir = dir.clone();
        set.spawn(async move {
            let _ = create_lab_quiet(dir.as_ref(), &format!("lab-{i}"), owner_id).await;
        });
    }
    let deleter = {
        let dir = dir.clone();
        tokio::spawn(async move { dir.delete(owner_id).await })
    };
    while let Some(result) = set.join_next().await {
        result.expect("task should not panic");
    }

    let labs = dir.labs_created_by(owner.id).await.expect("labs");
    match deleter.await.expect("task should not panic") {
        Ok(()) => assert!(labs.is_empty(), "labs survived their creator: {labs:?}"),
        Err(StorageError::Referenced { .. }) => {
            assert!(dir.find_by_id(owner.id).await.expect("find").is_some());
        },
        Err(other) => panic!("unexpected error: {other}"),
    }
}

async fn create_lab_quiet(
    store: &dyn LabStore,
    name: &str,
    creator: labgate_storage::UserId,
) -> Result<(), StorageError> {
    store
        .create_lab(labgate_storage::NewLab::builder().name(name).created_by(creator).build())
        .await
        .map(|_| ())
}

mod common;

use std::collections::{HashMap, HashSet};

use common::{factory_dealer_store, request, Harness};
use org_service::{
    models::{OrgNodePath, OrgType, ScopeAnchor, UpdateOrgNodeRequest},
    services::{OrgError, OrgStore},
};
use uuid::Uuid;

fn set(ids: &[Uuid]) -> HashSet<Uuid> {
    ids.iter().copied().collect()
}

#[tokio::test]
async fn test_scenario_descendants_and_ancestors() {
    let h = Harness::new();
    let (a, b, c) = factory_dealer_store(&h).await;

    let closure = &h.core.closure;
    assert_eq!(closure.descendants_of(h.tenant_id, a).await.unwrap(), set(&[a, b, c]));
    assert_eq!(closure.ancestors_of(h.tenant_id, c).await.unwrap(), set(&[c, b, a]));

    let scope = &h.core.scope;
    assert!(scope.can_access(h.tenant_id, Some(b), c).await.unwrap());
    assert!(!scope.can_access(h.tenant_id, Some(c), b).await.unwrap());
}

#[tokio::test]
async fn test_every_org_has_exactly_one_self_row() {
    let h = Harness::new();
    let (a, b, c) = factory_dealer_store(&h).await;
    let d = h.org("D", OrgType::Store, Some(b)).await;

    let paths = h.store.find_paths_by_tenant(h.tenant_id).await.unwrap();
    for org in [a, b, c, d] {
        let self_rows: Vec<&OrgNodePath> = paths
            .iter()
            .filter(|p| p.ancestor_org_node_id == org && p.descendant_org_node_id == org)
            .collect();
        assert_eq!(self_rows.len(), 1);
        assert_eq!(self_rows[0].depth_val, 0);
    }
}

#[tokio::test]
async fn test_is_descendant_matches_parent_walk() {
    let h = Harness::new();

    // Two roots, uneven depth.
    let mut parents: HashMap<Uuid, Option<Uuid>> = HashMap::new();
    let mut ids = Vec::new();
    let layout: [Option<usize>; 12] = [
        None,
        Some(0),
        Some(0),
        Some(1),
        Some(1),
        Some(3),
        None,
        Some(6),
        Some(7),
        Some(8),
        Some(2),
        Some(5),
    ];
    for (i, parent_idx) in layout.iter().enumerate() {
        let parent = parent_idx.map(|p| ids[p]);
        let id = h.org(&format!("n{}", i), OrgType::Store, parent).await;
        parents.insert(id, parent);
        ids.push(id);
    }

    let walks_up_to = |from: Uuid, to: Uuid| {
        let mut current = Some(from);
        while let Some(id) = current {
            if id == to {
                return true;
            }
            current = parents[&id];
        }
        false
    };

    for &ancestor in &ids {
        for &candidate in &ids {
            assert_eq!(
                h.core
                    .closure
                    .is_descendant(h.tenant_id, ancestor, candidate)
                    .await
                    .unwrap(),
                walks_up_to(candidate, ancestor),
                "ancestor {} candidate {}",
                ancestor,
                candidate
            );
        }
    }

    let report = h.core.closure.verify(h.tenant_id).await.unwrap();
    assert!(report.is_consistent());
}

#[tokio::test]
async fn test_create_extends_parent_sets() {
    let h = Harness::new();
    let (a, p, _) = factory_dealer_store(&h).await;

    let before = h.core.closure.descendants_of(h.tenant_id, p).await.unwrap();
    let parent_ancestors = h.core.closure.ancestors_of(h.tenant_id, p).await.unwrap();

    let new_child = h.org("New", OrgType::Store, Some(p)).await;

    let mut expected = before.clone();
    expected.insert(new_child);
    assert_eq!(
        h.core.closure.descendants_of(h.tenant_id, p).await.unwrap(),
        expected
    );

    let mut expected_ancestors = parent_ancestors.clone();
    expected_ancestors.insert(new_child);
    assert_eq!(
        h.core
            .closure
            .ancestors_of(h.tenant_id, new_child)
            .await
            .unwrap(),
        expected_ancestors
    );
    assert!(expected_ancestors.contains(&a));
}

#[tokio::test]
async fn test_scenario_delete_order() {
    let h = Harness::new();
    let (_, b, c) = factory_dealer_store(&h).await;

    let err = h.core.orgs.delete_org(h.tenant_id, b).await.unwrap_err();
    assert!(matches!(err, OrgError::HasChildren(1)));
    assert!(err.is_conflict());

    h.core.orgs.delete_org(h.tenant_id, c).await.unwrap();
    h.core.orgs.delete_org(h.tenant_id, b).await.unwrap();

    let paths = h.store.find_paths_by_tenant(h.tenant_id).await.unwrap();
    assert!(paths.iter().all(|p| !p.touches(b) && !p.touches(c)));
    assert!(h.core.orgs.get_org(h.tenant_id, c).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_delete_blocked_by_owned_devices() {
    let h = Harness::new();
    let (_, b, c) = factory_dealer_store(&h).await;
    let device = h.store.insert_device(h.tenant_id, None, Some(c)).unwrap();

    let err = h.core.orgs.delete_org(h.tenant_id, c).await.unwrap_err();
    assert!(matches!(err, OrgError::HasDevices(1)));
    assert!(h.store.path_exists(h.tenant_id, b, c).await.unwrap());

    h.store.remove_device(device).unwrap();
    h.core.orgs.delete_org(h.tenant_id, c).await.unwrap();
}

#[tokio::test]
async fn test_create_validates_before_writing() {
    let h = Harness::new();
    let (a, _, _) = factory_dealer_store(&h).await;

    let err = h
        .core
        .orgs
        .create_org(Uuid::nil(), request("X", OrgType::Store, None))
        .await
        .unwrap_err();
    assert!(err.is_validation());

    let err = h
        .core
        .orgs
        .create_org(h.tenant_id, request("X", OrgType::Store, Some(Uuid::new_v4())))
        .await
        .unwrap_err();
    assert!(matches!(err, OrgError::NotFound(_)));

    let other_tenant = Uuid::new_v4();
    let err = h
        .core
        .orgs
        .create_org(other_tenant, request("X", OrgType::Store, Some(a)))
        .await
        .unwrap_err();
    assert!(matches!(err, OrgError::CrossTenant));
    assert!(h.store.find_paths_by_tenant(other_tenant).await.unwrap().is_empty());

    let err = h
        .core
        .orgs
        .create_org(h.tenant_id, request("", OrgType::Store, None))
        .await
        .unwrap_err();
    assert!(err.is_validation());
    assert_eq!(h.store.find_paths_by_tenant(h.tenant_id).await.unwrap().len(), 6);
}

#[tokio::test]
async fn test_update_touches_only_mutable_fields() {
    let h = Harness::new();
    let (a, b, _) = factory_dealer_store(&h).await;

    let updated = h
        .core
        .orgs
        .update_org(
            h.tenant_id,
            b,
            UpdateOrgNodeRequest {
                node_label: Some("  Dealer North ".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.node_label, "Dealer North");
    assert_eq!(updated.parent_org_node_id, Some(a));
    assert_eq!(updated.node_type_code, OrgType::Dealer);

    let err = h
        .core
        .orgs
        .update_org(h.tenant_id, Uuid::new_v4(), UpdateOrgNodeRequest::default())
        .await
        .unwrap_err();
    assert!(matches!(err, OrgError::NotFound(_)));

    let err = h
        .core
        .orgs
        .update_org(Uuid::new_v4(), b, UpdateOrgNodeRequest::default())
        .await
        .unwrap_err();
    assert!(matches!(err, OrgError::CrossTenant));
}

#[tokio::test]
async fn test_empty_update_is_rejected() {
    let h = Harness::new();
    let (_, b, _) = factory_dealer_store(&h).await;

    let err = h
        .core
        .orgs
        .update_org(h.tenant_id, b, UpdateOrgNodeRequest::default())
        .await
        .unwrap_err();
    assert!(err.is_validation());

    let unchanged = h.core.orgs.get_org(h.tenant_id, b).await.unwrap();
    assert_eq!(unchanged.node_label, "B");
}

#[tokio::test]
async fn test_org_tree_with_type_filter() {
    let h = Harness::new();
    let (a, b, c) = factory_dealer_store(&h).await;
    let b2 = h.org("B2", OrgType::Dealer, Some(a)).await;

    let tree = h.core.orgs.get_org_tree(h.tenant_id, None).await.unwrap();
    assert_eq!(tree.len(), 1);
    assert_eq!(tree[0].node.org_node_id, a);
    assert_eq!(tree[0].children.len(), 2);
    let b_node = tree[0]
        .children
        .iter()
        .find(|t| t.node.org_node_id == b)
        .unwrap();
    assert_eq!(b_node.children[0].node.org_node_id, c);

    let dealers = h
        .core
        .orgs
        .get_org_tree(h.tenant_id, Some(OrgType::Dealer))
        .await
        .unwrap();
    let roots: HashSet<Uuid> = dealers.iter().map(|t| t.node.org_node_id).collect();
    assert_eq!(roots, set(&[b, b2]));
    assert!(dealers.iter().all(|t| t.children.is_empty()));
}

#[tokio::test]
async fn test_move_subtree_rewrites_closure() {
    let h = Harness::new();
    let (a, b, c) = factory_dealer_store(&h).await;
    let d = h.org("D", OrgType::PackFactory, None).await;

    h.core.orgs.move_org(h.tenant_id, b, Some(d)).await.unwrap();

    let closure = &h.core.closure;
    assert_eq!(closure.descendants_of(h.tenant_id, d).await.unwrap(), set(&[d, b, c]));
    assert_eq!(closure.descendants_of(h.tenant_id, a).await.unwrap(), set(&[a]));
    assert_eq!(closure.ancestors_of(h.tenant_id, c).await.unwrap(), set(&[c, b, d]));
    assert_eq!(
        h.core.orgs.get_org(h.tenant_id, b).await.unwrap().parent_org_node_id,
        Some(d)
    );

    let depth_d_c = h
        .store
        .find_ancestor_paths(h.tenant_id, c)
        .await
        .unwrap()
        .into_iter()
        .find(|p| p.ancestor_org_node_id == d)
        .unwrap()
        .depth_val;
    assert_eq!(depth_d_c, 2);

    assert!(closure.verify(h.tenant_id).await.unwrap().is_consistent());

    // Detach to a root.
    h.core.orgs.move_org(h.tenant_id, b, None).await.unwrap();
    assert_eq!(closure.ancestors_of(h.tenant_id, c).await.unwrap(), set(&[c, b]));
    assert!(closure.verify(h.tenant_id).await.unwrap().is_consistent());
}

#[tokio::test]
async fn test_move_rejects_cycles_and_foreign_parents() {
    let h = Harness::new();
    let (a, b, c) = factory_dealer_store(&h).await;

    let err = h.core.orgs.move_org(h.tenant_id, b, Some(c)).await.unwrap_err();
    assert!(err.is_validation());
    let err = h.core.orgs.move_org(h.tenant_id, b, Some(b)).await.unwrap_err();
    assert!(err.is_validation());

    let foreign = Uuid::new_v4();
    let foreign_root = h
        .core
        .orgs
        .create_org(foreign, request("F", OrgType::Factory, None))
        .await
        .unwrap();
    let err = h
        .core
        .orgs
        .move_org(h.tenant_id, b, Some(foreign_root))
        .await
        .unwrap_err();
    assert!(err.is_not_found());

    assert_eq!(
        h.core.closure.descendants_of(h.tenant_id, a).await.unwrap(),
        set(&[a, b, c])
    );
}

#[tokio::test]
async fn test_verify_and_rebuild_repair_drift() {
    let h = Harness::new();
    let (a, b, c) = factory_dealer_store(&h).await;

    h.store.remove_path(h.tenant_id, a, c).unwrap();
    let stray = OrgNodePath {
        tenant_id: h.tenant_id,
        ancestor_org_node_id: c,
        descendant_org_node_id: a,
        depth_val: 2,
    };
    h.store.insert_raw_path(stray).unwrap();

    let report = h.core.closure.verify(h.tenant_id).await.unwrap();
    assert_eq!(report.missing.len(), 1);
    assert_eq!(report.missing[0].ancestor_org_node_id, a);
    assert_eq!(report.extra, vec![stray]);
    assert!(!h.core.closure.is_descendant(h.tenant_id, a, c).await.unwrap());

    let repaired = h.core.closure.rebuild(h.tenant_id).await.unwrap();
    assert_eq!(repaired.missing.len(), 1);
    assert!(h.core.closure.verify(h.tenant_id).await.unwrap().is_consistent());
    assert!(h.core.closure.is_descendant(h.tenant_id, a, c).await.unwrap());
    assert!(h.core.closure.is_descendant(h.tenant_id, b, c).await.unwrap());

    let again = h.core.closure.rebuild(h.tenant_id).await.unwrap();
    assert!(again.is_consistent());
}

#[tokio::test]
async fn test_missing_self_row_falls_back_to_org() {
    let h = Harness::new();
    let (_, _, c) = factory_dealer_store(&h).await;

    h.store.remove_path(h.tenant_id, c, c).unwrap();

    let ids = h.core.closure.descendants_of(h.tenant_id, c).await.unwrap();
    assert_eq!(ids, set(&[c]));
}

#[tokio::test]
async fn test_missing_self_row_keeps_org_in_its_subtree() {
    let h = Harness::new();
    let (a, b, c) = factory_dealer_store(&h).await;

    h.store.remove_path(h.tenant_id, b, b).unwrap();

    let below = h.core.closure.descendants_of(h.tenant_id, b).await.unwrap();
    assert_eq!(below, set(&[b, c]));
    let above = h.core.closure.ancestors_of(h.tenant_id, b).await.unwrap();
    assert_eq!(above, set(&[a, b]));

    let scope = h
        .core
        .scope
        .resolve_scope(h.tenant_id, Some(ScopeAnchor(b)))
        .await
        .unwrap();
    assert!(scope.contains(b));
    assert!(scope.contains(c));
}

#[tokio::test]
async fn test_missing_self_row_ancestors_fall_back_to_org() {
    let h = Harness::new();
    let a = h.org("A", OrgType::Factory, None).await;

    h.store.remove_path(h.tenant_id, a, a).unwrap();

    let ids = h.core.closure.ancestors_of(h.tenant_id, a).await.unwrap();
    assert_eq!(ids, set(&[a]));
}

//! PostgreSQL-backed runs of the hierarchy flows.
//!
//! Run with `DATABASE_URL` pointing at a scratch database and `--ignored`.
//! Each test works in a fresh tenant so runs do not interfere.

use std::sync::Arc;

use org_service::{
    config::DatabaseConfig,
    db,
    models::{ContactFields, CreateOrgNodeRequest, OrgType, RequestContext},
    services::{MockPolicyEngine, OrgCore, OrgError, OrgStore, PgOrgStore, UserDirectory},
};
use uuid::Uuid;

async fn setup() -> (Arc<PgOrgStore>, OrgCore, Uuid) {
    let config = DatabaseConfig {
        url: std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgres://localhost/org_test".to_string()),
        max_connections: 4,
        min_connections: 1,
    };
    let pool = db::create_pool(&config)
        .await
        .expect("Failed to connect to test database");
    db::run_migrations(&pool)
        .await
        .expect("Failed to run migrations");

    let store = Arc::new(PgOrgStore::new(pool));
    let core = OrgCore::new(store.clone(), Arc::new(MockPolicyEngine::new()));
    (store, core, Uuid::new_v4())
}

async fn org(core: &OrgCore, tenant_id: Uuid, label: &str, node_type: OrgType, parent: Option<Uuid>) -> Uuid {
    core.orgs
        .create_org(
            tenant_id,
            CreateOrgNodeRequest {
                node_label: label.to_string(),
                node_type_code: node_type,
                parent_org_node_id: parent,
                contact: ContactFields::default(),
            },
        )
        .await
        .expect("Failed to create org")
}

async fn insert_user(store: &PgOrgStore, tenant_id: Uuid, org_node_id: Uuid) -> Uuid {
    let user_id = Uuid::new_v4();
    sqlx::query("INSERT INTO users (user_id, tenant_id, org_node_id) VALUES ($1, $2, $3)")
        .bind(user_id)
        .bind(tenant_id)
        .bind(org_node_id)
        .execute(store.pool())
        .await
        .expect("Failed to insert user");
    user_id
}

#[tokio::test]
#[ignore] // Requires PostgreSQL
async fn test_pg_closure_maintained_across_create_move_delete() {
    let (store, core, tenant_id) = setup().await;

    let a = org(&core, tenant_id, "A", OrgType::Factory, None).await;
    let b = org(&core, tenant_id, "B", OrgType::Dealer, Some(a)).await;
    let c = org(&core, tenant_id, "C", OrgType::Store, Some(b)).await;

    let under_a = core.closure.descendants_of(tenant_id, a).await.unwrap();
    assert_eq!(under_a, [a, b, c].into_iter().collect());
    let above_c = core.closure.ancestors_of(tenant_id, c).await.unwrap();
    assert_eq!(above_c, [a, b, c].into_iter().collect());
    assert!(store.path_exists(tenant_id, a, c).await.unwrap());

    let err = core.orgs.delete_org(tenant_id, a).await.unwrap_err();
    assert!(matches!(err, OrgError::HasChildren(1)));

    core.orgs.move_org(tenant_id, c, Some(a)).await.unwrap();
    assert!(!core.closure.is_descendant(tenant_id, b, c).await.unwrap());
    assert!(core.closure.is_descendant(tenant_id, a, c).await.unwrap());
    assert!(core.closure.verify(tenant_id).await.unwrap().is_consistent());

    core.orgs.delete_org(tenant_id, c).await.unwrap();
    core.orgs.delete_org(tenant_id, b).await.unwrap();
    core.orgs.delete_org(tenant_id, a).await.unwrap();
    assert!(store.find_paths_by_tenant(tenant_id).await.unwrap().is_empty());
}

#[tokio::test]
#[ignore] // Requires PostgreSQL
async fn test_pg_move_rejects_cycle() {
    let (_store, core, tenant_id) = setup().await;

    let a = org(&core, tenant_id, "A", OrgType::Factory, None).await;
    let b = org(&core, tenant_id, "B", OrgType::Dealer, Some(a)).await;

    let err = core.orgs.move_org(tenant_id, a, Some(b)).await.unwrap_err();
    assert!(err.is_validation());
    assert!(core.closure.verify(tenant_id).await.unwrap().is_consistent());
}

#[tokio::test]
#[ignore] // Requires PostgreSQL
async fn test_pg_users_in_subtree_and_template() {
    let (store, core, tenant_id) = setup().await;

    let a = org(&core, tenant_id, "A", OrgType::Factory, None).await;
    let b = org(&core, tenant_id, "B", OrgType::Dealer, Some(a)).await;
    let c = org(&core, tenant_id, "C", OrgType::Store, Some(b)).await;
    insert_user(&store, tenant_id, a).await;
    let at_b = insert_user(&store, tenant_id, b).await;
    let at_c = insert_user(&store, tenant_id, c).await;

    let users = store.find_users_in_orgs(tenant_id, &[b, c]).await.unwrap();
    let mut ids: Vec<Uuid> = users.iter().map(|u| u.user_id).collect();
    ids.sort();
    let mut expected = vec![at_b, at_c];
    expected.sort();
    assert_eq!(ids, expected);

    let stores = store
        .find_users_by_org_type(tenant_id, OrgType::Store)
        .await
        .unwrap();
    assert_eq!(stores.len(), 1);
    assert_eq!(stores[0].user_id, at_c);

    let ctx = RequestContext::tenant_admin(tenant_id, Uuid::new_v4());
    let state = core
        .provisioner
        .set_dealer_template(&ctx, b, "basic")
        .await
        .unwrap();
    assert_eq!(state.affected_user_count, 2);
}

#[tokio::test]
#[ignore] // Requires PostgreSQL
async fn test_pg_org_type_permission_upsert_replaces() {
    let (store, core, tenant_id) = setup().await;
    let ctx = RequestContext::tenant_admin(tenant_id, Uuid::new_v4());

    core.provisioner
        .upsert_org_type_permission(&ctx, OrgType::Store, vec!["dashboard".into()], "soc")
        .await
        .unwrap();
    core.provisioner
        .upsert_org_type_permission(
            &ctx,
            OrgType::Store,
            vec!["warranty".into(), "dashboard".into()],
            "soc, soh",
        )
        .await
        .unwrap();

    let record = store
        .find_org_type_permission(tenant_id, OrgType::Store)
        .await
        .unwrap()
        .expect("record stored");
    assert_eq!(record.ui_codes, vec!["warranty", "dashboard"]);
    assert_eq!(record.device_params(), vec!["soc", "soh"]);
    assert_eq!(
        store
            .find_org_type_permissions_by_tenant(tenant_id)
            .await
            .unwrap()
            .len(),
        1
    );
}

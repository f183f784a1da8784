//! PostgreSQL store.
//!
//! Org rows and closure rows are always written in the same transaction.
//! The parent row is locked `FOR SHARE` when creating under it and the node
//! row `FOR UPDATE` when deleting or moving it, so a child cannot attach to a
//! row that is mid-deletion.

use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use super::closure::{paths_for_new_node, plan_move};
use super::{DeviceOwnership, OrgError, OrgStore, UserDirectory};
use crate::models::{
    Capability, OrgNode, OrgNodeFilter, OrgNodePath, OrgType, OrgTypePermission, Page,
    PageRequest, UpdateOrgNodeRequest, UserRef,
};

const USER_REF_SELECT: &str = r#"
    SELECT u.user_id, u.tenant_id, u.org_node_id, u.dealer_org_node_id, n.node_type_code
    FROM users u
    LEFT JOIN org_nodes n ON n.org_node_id = u.org_node_id
"#;

/// PostgreSQL store wrapper.
#[derive(Clone)]
pub struct PgOrgStore {
    pool: PgPool,
}

impl PgOrgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Escape `%`, `_` and `\` for a LIKE pattern.
fn like_pattern(needle: &str) -> String {
    let mut escaped = String::with_capacity(needle.len() + 2);
    escaped.push('%');
    for ch in needle.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped.push('%');
    escaped
}

async fn lock_node(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: Uuid,
    org_node_id: Uuid,
    for_update: bool,
) -> Result<bool, OrgError> {
    let sql = if for_update {
        "SELECT org_node_id FROM org_nodes WHERE tenant_id = $1 AND org_node_id = $2 FOR UPDATE"
    } else {
        "SELECT org_node_id FROM org_nodes WHERE tenant_id = $1 AND org_node_id = $2 FOR SHARE"
    };
    let found: Option<Uuid> = sqlx::query_scalar(sql)
        .bind(tenant_id)
        .bind(org_node_id)
        .fetch_optional(&mut **tx)
        .await?;
    Ok(found.is_some())
}

async fn select_paths(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: Uuid,
    org_node_id: Uuid,
    by_ancestor: bool,
) -> Result<Vec<OrgNodePath>, OrgError> {
    let sql = if by_ancestor {
        "SELECT * FROM org_node_paths WHERE tenant_id = $1 AND ancestor_org_node_id = $2"
    } else {
        "SELECT * FROM org_node_paths WHERE tenant_id = $1 AND descendant_org_node_id = $2"
    };
    let rows = sqlx::query_as::<_, OrgNodePath>(sql)
        .bind(tenant_id)
        .bind(org_node_id)
        .fetch_all(&mut **tx)
        .await?;
    Ok(rows)
}

/// Batch insert closure rows; an existing key is left alone.
async fn insert_paths(
    tx: &mut Transaction<'_, Postgres>,
    rows: &[OrgNodePath],
) -> Result<(), OrgError> {
    if rows.is_empty() {
        return Ok(());
    }
    let tenants: Vec<Uuid> = rows.iter().map(|r| r.tenant_id).collect();
    let ancestors: Vec<Uuid> = rows.iter().map(|r| r.ancestor_org_node_id).collect();
    let descendants: Vec<Uuid> = rows.iter().map(|r| r.descendant_org_node_id).collect();
    let depths: Vec<i32> = rows.iter().map(|r| r.depth_val).collect();

    sqlx::query(
        r#"
        INSERT INTO org_node_paths (tenant_id, ancestor_org_node_id, descendant_org_node_id, depth_val)
        SELECT * FROM UNNEST($1::uuid[], $2::uuid[], $3::uuid[], $4::int4[])
        ON CONFLICT (tenant_id, ancestor_org_node_id, descendant_org_node_id) DO NOTHING
        "#,
    )
    .bind(tenants)
    .bind(ancestors)
    .bind(descendants)
    .bind(depths)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

#[async_trait]
impl OrgStore for PgOrgStore {
    async fn health_check(&self) -> Result<(), OrgError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!("Database health check failed: {}", e);
                OrgError::Database(e)
            })?;
        Ok(())
    }

    // ==================== Org Node Operations ====================

    async fn find_org_node(
        &self,
        tenant_id: Uuid,
        org_node_id: Uuid,
    ) -> Result<Option<OrgNode>, OrgError> {
        let node = sqlx::query_as::<_, OrgNode>(
            "SELECT * FROM org_nodes WHERE tenant_id = $1 AND org_node_id = $2",
        )
        .bind(tenant_id)
        .bind(org_node_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(node)
    }

    async fn find_org_node_any_tenant(
        &self,
        org_node_id: Uuid,
    ) -> Result<Option<OrgNode>, OrgError> {
        let node = sqlx::query_as::<_, OrgNode>("SELECT * FROM org_nodes WHERE org_node_id = $1")
            .bind(org_node_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(node)
    }

    async fn find_org_nodes_by_tenant(
        &self,
        tenant_id: Uuid,
        node_type: Option<OrgType>,
    ) -> Result<Vec<OrgNode>, OrgError> {
        let nodes = sqlx::query_as::<_, OrgNode>(
            r#"
            SELECT * FROM org_nodes
            WHERE tenant_id = $1 AND ($2::text IS NULL OR node_type_code = $2)
            ORDER BY node_label, org_node_id
            "#,
        )
        .bind(tenant_id)
        .bind(node_type.map(|t| t.as_str()))
        .fetch_all(&self.pool)
        .await?;
        Ok(nodes)
    }

    async fn list_org_nodes(
        &self,
        tenant_id: Uuid,
        filter: &OrgNodeFilter,
        page: PageRequest,
    ) -> Result<Page<OrgNode>, OrgError> {
        const WHERE: &str = r#"
            WHERE tenant_id = $1
              AND ($2::text IS NULL OR node_type_code = $2)
              AND ($3::text IS NULL OR node_state_code = $3)
              AND ($4::uuid IS NULL OR parent_org_node_id = $4)
              AND ($5::text IS NULL OR node_label ILIKE $5)
              AND ($6::uuid[] IS NULL OR org_node_id = ANY($6))
        "#;
        let node_type = filter.node_type_code.map(|t| t.as_str());
        let node_state = filter.node_state_code.map(|s| s.as_str());
        let label = filter.label_contains.as_deref().map(like_pattern);

        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM org_nodes {}", WHERE))
            .bind(tenant_id)
            .bind(node_type)
            .bind(node_state)
            .bind(filter.parent_org_node_id)
            .bind(label.as_deref())
            .bind(filter.within.as_deref())
            .fetch_one(&self.pool)
            .await?;

        let items = sqlx::query_as::<_, OrgNode>(&format!(
            "SELECT * FROM org_nodes {} ORDER BY node_label, org_node_id LIMIT $7 OFFSET $8",
            WHERE
        ))
        .bind(tenant_id)
        .bind(node_type)
        .bind(node_state)
        .bind(filter.parent_org_node_id)
        .bind(label.as_deref())
        .bind(filter.within.as_deref())
        .bind(i64::from(page.limit()))
        .bind(page.offset() as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(Page {
            items,
            total: total.max(0) as u64,
            page: page.page,
            page_size: page.limit(),
        })
    }

    async fn count_children(&self, tenant_id: Uuid, org_node_id: Uuid) -> Result<u64, OrgError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM org_nodes WHERE tenant_id = $1 AND parent_org_node_id = $2",
        )
        .bind(tenant_id)
        .bind(org_node_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count.max(0) as u64)
    }

    async fn insert_org_node(&self, node: &OrgNode) -> Result<(), OrgError> {
        let mut tx = self.pool.begin().await?;

        if let Some(parent_id) = node.parent_org_node_id {
            if !lock_node(&mut tx, node.tenant_id, parent_id, false).await? {
                return Err(OrgError::NotFound(format!(
                    "Parent org node {} not found",
                    parent_id
                )));
            }
        }

        sqlx::query(
            r#"
            INSERT INTO org_nodes (
                org_node_id, tenant_id, node_type_code, node_label, parent_org_node_id,
                node_state_code, contact_name, contact_phone, contact_email, address_text,
                created_utc, updated_utc
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(node.org_node_id)
        .bind(node.tenant_id)
        .bind(node.node_type_code.as_str())
        .bind(&node.node_label)
        .bind(node.parent_org_node_id)
        .bind(node.node_state_code.as_str())
        .bind(&node.contact_name)
        .bind(&node.contact_phone)
        .bind(&node.contact_email)
        .bind(&node.address_text)
        .bind(node.created_utc)
        .bind(node.updated_utc)
        .execute(&mut *tx)
        .await?;

        let parent_paths = match node.parent_org_node_id {
            Some(parent_id) => select_paths(&mut tx, node.tenant_id, parent_id, false).await?,
            None => Vec::new(),
        };
        let rows = paths_for_new_node(
            node.tenant_id,
            node.org_node_id,
            node.parent_org_node_id,
            &parent_paths,
        )?;
        insert_paths(&mut tx, &rows).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn update_org_node(
        &self,
        tenant_id: Uuid,
        org_node_id: Uuid,
        changes: &UpdateOrgNodeRequest,
    ) -> Result<Option<OrgNode>, OrgError> {
        let node = sqlx::query_as::<_, OrgNode>(
            r#"
            UPDATE org_nodes SET
                node_label = COALESCE($3, node_label),
                contact_name = COALESCE($4, contact_name),
                contact_phone = COALESCE($5, contact_phone),
                contact_email = COALESCE($6, contact_email),
                address_text = COALESCE($7, address_text),
                node_state_code = COALESCE($8, node_state_code),
                updated_utc = now()
            WHERE tenant_id = $1 AND org_node_id = $2
            RETURNING *
            "#,
        )
        .bind(tenant_id)
        .bind(org_node_id)
        .bind(changes.node_label.as_deref().map(str::trim))
        .bind(&changes.contact.contact_name)
        .bind(&changes.contact.contact_phone)
        .bind(&changes.contact.contact_email)
        .bind(&changes.contact.address_text)
        .bind(changes.node_state_code.map(|s| s.as_str()))
        .fetch_optional(&self.pool)
        .await?;
        Ok(node)
    }

    async fn delete_org_node(&self, tenant_id: Uuid, org_node_id: Uuid) -> Result<(), OrgError> {
        let mut tx = self.pool.begin().await?;

        if !lock_node(&mut tx, tenant_id, org_node_id, true).await? {
            return Err(OrgError::NotFound(format!(
                "Org node {} not found",
                org_node_id
            )));
        }

        let children: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM org_nodes WHERE tenant_id = $1 AND parent_org_node_id = $2",
        )
        .bind(tenant_id)
        .bind(org_node_id)
        .fetch_one(&mut *tx)
        .await?;
        if children > 0 {
            return Err(OrgError::HasChildren(children as u64));
        }

        sqlx::query(
            r#"
            DELETE FROM org_node_paths
            WHERE tenant_id = $1
              AND (ancestor_org_node_id = $2 OR descendant_org_node_id = $2)
            "#,
        )
        .bind(tenant_id)
        .bind(org_node_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM org_nodes WHERE tenant_id = $1 AND org_node_id = $2")
            .bind(tenant_id)
            .bind(org_node_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn move_org_node(
        &self,
        tenant_id: Uuid,
        org_node_id: Uuid,
        new_parent_id: Option<Uuid>,
    ) -> Result<(), OrgError> {
        let mut tx = self.pool.begin().await?;

        if !lock_node(&mut tx, tenant_id, org_node_id, true).await? {
            return Err(OrgError::NotFound(format!(
                "Org node {} not found",
                org_node_id
            )));
        }
        let parent_paths = match new_parent_id {
            Some(parent_id) => {
                if !lock_node(&mut tx, tenant_id, parent_id, false).await? {
                    return Err(OrgError::NotFound(format!(
                        "Parent org node {} not found",
                        parent_id
                    )));
                }
                select_paths(&mut tx, tenant_id, parent_id, false).await?
            }
            None => Vec::new(),
        };
        let subtree = select_paths(&mut tx, tenant_id, org_node_id, true).await?;
        let plan = plan_move(tenant_id, org_node_id, &subtree, new_parent_id, &parent_paths)?;

        sqlx::query(
            r#"
            DELETE FROM org_node_paths
            WHERE tenant_id = $1
              AND descendant_org_node_id = ANY($2)
              AND NOT (ancestor_org_node_id = ANY($2))
            "#,
        )
        .bind(tenant_id)
        .bind(&plan.subtree_ids)
        .execute(&mut *tx)
        .await?;

        insert_paths(&mut tx, &plan.insert).await?;

        sqlx::query(
            r#"
            UPDATE org_nodes SET parent_org_node_id = $3, updated_utc = now()
            WHERE tenant_id = $1 AND org_node_id = $2
            "#,
        )
        .bind(tenant_id)
        .bind(org_node_id)
        .bind(new_parent_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    // ==================== Closure Operations ====================

    async fn find_descendant_paths(
        &self,
        tenant_id: Uuid,
        org_node_id: Uuid,
    ) -> Result<Vec<OrgNodePath>, OrgError> {
        let rows = sqlx::query_as::<_, OrgNodePath>(
            r#"
            SELECT * FROM org_node_paths
            WHERE tenant_id = $1 AND ancestor_org_node_id = $2
            ORDER BY depth_val
            "#,
        )
        .bind(tenant_id)
        .bind(org_node_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn find_ancestor_paths(
        &self,
        tenant_id: Uuid,
        org_node_id: Uuid,
    ) -> Result<Vec<OrgNodePath>, OrgError> {
        let rows = sqlx::query_as::<_, OrgNodePath>(
            r#"
            SELECT * FROM org_node_paths
            WHERE tenant_id = $1 AND descendant_org_node_id = $2
            ORDER BY depth_val
            "#,
        )
        .bind(tenant_id)
        .bind(org_node_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn path_exists(
        &self,
        tenant_id: Uuid,
        ancestor_id: Uuid,
        descendant_id: Uuid,
    ) -> Result<bool, OrgError> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM org_node_paths
                WHERE tenant_id = $1 AND ancestor_org_node_id = $2 AND descendant_org_node_id = $3
            )
            "#,
        )
        .bind(tenant_id)
        .bind(ancestor_id)
        .bind(descendant_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn find_paths_by_tenant(&self, tenant_id: Uuid) -> Result<Vec<OrgNodePath>, OrgError> {
        let rows = sqlx::query_as::<_, OrgNodePath>(
            "SELECT * FROM org_node_paths WHERE tenant_id = $1",
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn replace_tenant_paths(
        &self,
        tenant_id: Uuid,
        paths: &[OrgNodePath],
    ) -> Result<(), OrgError> {
        if let Some(stray) = paths.iter().find(|p| p.tenant_id != tenant_id) {
            return Err(OrgError::Validation(format!(
                "Closure row {:?} does not belong to tenant {}",
                stray, tenant_id
            )));
        }

        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM org_node_paths WHERE tenant_id = $1")
            .bind(tenant_id)
            .execute(&mut *tx)
            .await?;
        insert_paths(&mut tx, paths).await?;
        tx.commit().await?;
        Ok(())
    }

    // ==================== Permission Operations ====================

    async fn upsert_org_type_permission(
        &self,
        record: &OrgTypePermission,
    ) -> Result<OrgTypePermission, OrgError> {
        let saved = sqlx::query_as::<_, OrgTypePermission>(
            r#"
            INSERT INTO org_type_permissions (tenant_id, node_type_code, ui_codes, device_param_text, updated_utc)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (tenant_id, node_type_code) DO UPDATE SET
                ui_codes = EXCLUDED.ui_codes,
                device_param_text = EXCLUDED.device_param_text,
                updated_utc = EXCLUDED.updated_utc
            RETURNING *
            "#,
        )
        .bind(record.tenant_id)
        .bind(record.node_type_code.as_str())
        .bind(&record.ui_codes)
        .bind(&record.device_param_text)
        .bind(record.updated_utc)
        .fetch_one(&self.pool)
        .await?;
        Ok(saved)
    }

    async fn find_org_type_permission(
        &self,
        tenant_id: Uuid,
        node_type: OrgType,
    ) -> Result<Option<OrgTypePermission>, OrgError> {
        let record = sqlx::query_as::<_, OrgTypePermission>(
            "SELECT * FROM org_type_permissions WHERE tenant_id = $1 AND node_type_code = $2",
        )
        .bind(tenant_id)
        .bind(node_type.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    async fn find_org_type_permissions_by_tenant(
        &self,
        tenant_id: Uuid,
    ) -> Result<Vec<OrgTypePermission>, OrgError> {
        let records = sqlx::query_as::<_, OrgTypePermission>(
            "SELECT * FROM org_type_permissions WHERE tenant_id = $1 ORDER BY node_type_code",
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    // ==================== Capability Catalog ====================

    async fn find_capabilities_by_codes(
        &self,
        codes: &[String],
    ) -> Result<Vec<Capability>, OrgError> {
        let caps = sqlx::query_as::<_, Capability>(
            "SELECT * FROM capabilities WHERE cap_code = ANY($1) ORDER BY cap_code",
        )
        .bind(codes)
        .fetch_all(&self.pool)
        .await?;
        Ok(caps)
    }

    async fn get_all_capabilities(&self) -> Result<Vec<Capability>, OrgError> {
        let caps = sqlx::query_as::<_, Capability>(
            "SELECT * FROM capabilities ORDER BY sort_order_val, cap_code",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(caps)
    }
}

#[async_trait]
impl UserDirectory for PgOrgStore {
    async fn find_users_in_orgs(
        &self,
        tenant_id: Uuid,
        org_node_ids: &[Uuid],
    ) -> Result<Vec<UserRef>, OrgError> {
        let users = sqlx::query_as::<_, UserRef>(&format!(
            r#"{}
            WHERE u.tenant_id = $1
              AND (u.org_node_id = ANY($2) OR u.dealer_org_node_id = ANY($2))
            ORDER BY u.user_id
            "#,
            USER_REF_SELECT
        ))
        .bind(tenant_id)
        .bind(org_node_ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(users)
    }

    async fn find_users_by_org_type(
        &self,
        tenant_id: Uuid,
        node_type: OrgType,
    ) -> Result<Vec<UserRef>, OrgError> {
        let users = sqlx::query_as::<_, UserRef>(&format!(
            "{} WHERE u.tenant_id = $1 AND n.node_type_code = $2 ORDER BY u.user_id",
            USER_REF_SELECT
        ))
        .bind(tenant_id)
        .bind(node_type.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(users)
    }

    async fn find_users_by_tenant(&self, tenant_id: Uuid) -> Result<Vec<UserRef>, OrgError> {
        let users = sqlx::query_as::<_, UserRef>(&format!(
            "{} WHERE u.tenant_id = $1 ORDER BY u.user_id",
            USER_REF_SELECT
        ))
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(users)
    }
}

#[async_trait]
impl DeviceOwnership for PgOrgStore {
    async fn count_owned_devices(
        &self,
        tenant_id: Uuid,
        org_node_id: Uuid,
    ) -> Result<u64, OrgError> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM devices
            WHERE tenant_id = $1
              AND (owner_org_node_id = $2 OR dealer_org_node_id = $2)
            "#,
        )
        .bind(tenant_id)
        .bind(org_node_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count.max(0) as u64)
    }
}

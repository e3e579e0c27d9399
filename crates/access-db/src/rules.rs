//! Rule Store: persistence, duplicate detection, and the two read
//! shapes the cache and the engine need.

use anyhow::{Context, Result};
use access_schemas::{AuthMethod, PassDirection, RuleAction, RuleSnapshot, RuleState, SubjectType};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct RuleRow {
    pub id: Uuid,
    pub org_id: Uuid,
    pub area_id: Uuid,
    pub subject_type: String,
    pub device_id: Option<Uuid>,
    pub pass_direction: Option<String>,
    pub auth_method: Option<String>,
    pub action: String,
    pub valid_from_utc: Option<DateTime<Utc>>,
    pub valid_to_utc: Option<DateTime<Utc>>,
    pub from_local: Option<String>,
    pub to_local: Option<String>,
    pub priority: i32,
    pub state: String,
    pub message: Option<String>,
    pub created_at_utc: DateTime<Utc>,
    pub updated_at_utc: DateTime<Utc>,
}

impl RuleRow {
    /// Convert to the engine/cache-facing snapshot. Returns `None` if any
    /// enum column holds a value this build doesn't recognize (defensive:
    /// such a row should never be returned to the decision path).
    pub fn to_snapshot(&self) -> Option<RuleSnapshot> {
        Some(RuleSnapshot {
            id: self.id,
            org_id: self.org_id,
            area_id: self.area_id,
            subject_type: SubjectType::parse(&self.subject_type)?,
            device_id: self.device_id,
            pass_direction: self
                .pass_direction
                .as_deref()
                .map(PassDirection::parse)
                .transpose()?,
            auth_method: self
                .auth_method
                .as_deref()
                .map(AuthMethod::parse)
                .transpose()?,
            action: RuleAction::parse(&self.action)?,
            valid_from_utc: self.valid_from_utc,
            valid_to_utc: self.valid_to_utc,
            from_local: self.from_local.clone(),
            to_local: self.to_local.clone(),
            priority: self.priority,
            state: RuleState::parse(&self.state)?,
            message: self.message.clone(),
            updated_at_utc: self.updated_at_utc,
        })
    }
}

fn row_to_rule(row: sqlx::postgres::PgRow) -> Result<RuleRow> {
    Ok(RuleRow {
        id: row.try_get("id")?,
        org_id: row.try_get("org_id")?,
        area_id: row.try_get("area_id")?,
        subject_type: row.try_get("subject_type")?,
        device_id: row.try_get("device_id")?,
        pass_direction: row.try_get("pass_direction")?,
        auth_method: row.try_get("auth_method")?,
        action: row.try_get("action")?,
        valid_from_utc: row.try_get("valid_from_utc")?,
        valid_to_utc: row.try_get("valid_to_utc")?,
        from_local: row.try_get("from_local")?,
        to_local: row.try_get("to_local")?,
        priority: row.try_get("priority")?,
        state: row.try_get("state")?,
        message: row.try_get("message")?,
        created_at_utc: row.try_get("created_at_utc")?,
        updated_at_utc: row.try_get("updated_at_utc")?,
    })
}

const RULE_COLUMNS: &str = r#"
    id, org_id, area_id, subject_type, device_id, pass_direction, auth_method,
    action, valid_from_utc, valid_to_utc, from_local, to_local, priority,
    state, message, created_at_utc, updated_at_utc
"#;

#[derive(Debug, Clone)]
pub struct NewRule {
    pub id: Uuid,
    pub org_id: Uuid,
    pub area_id: Uuid,
    pub subject_type: String,
    pub device_id: Option<Uuid>,
    pub pass_direction: Option<String>,
    pub auth_method: Option<String>,
    pub action: String,
    pub valid_from_utc: Option<DateTime<Utc>>,
    pub valid_to_utc: Option<DateTime<Utc>>,
    pub from_local: Option<String>,
    pub to_local: Option<String>,
    pub priority: i32,
    pub message: Option<String>,
}

pub async fn insert_rule(tx: &mut Transaction<'_, Postgres>, r: &NewRule) -> Result<()> {
    sqlx::query(
        r#"
        insert into rules (
            id, org_id, area_id, subject_type, device_id, pass_direction,
            auth_method, action, valid_from_utc, valid_to_utc, from_local,
            to_local, priority, state, message
        ) values ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,'ACTIVE',$14)
        "#,
    )
    .bind(r.id)
    .bind(r.org_id)
    .bind(r.area_id)
    .bind(&r.subject_type)
    .bind(r.device_id)
    .bind(&r.pass_direction)
    .bind(&r.auth_method)
    .bind(&r.action)
    .bind(r.valid_from_utc)
    .bind(r.valid_to_utc)
    .bind(&r.from_local)
    .bind(&r.to_local)
    .bind(r.priority)
    .bind(&r.message)
    .execute(&mut **tx)
    .await
    .context("insert_rule failed")?;
    Ok(())
}

pub async fn update_rule_state(
    tx: &mut Transaction<'_, Postgres>,
    org_id: Uuid,
    rule_id: Uuid,
    state: &str,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        update rules
        set state = $1, updated_at_utc = now()
        where id = $2 and org_id = $3
        "#,
    )
    .bind(state)
    .bind(rule_id)
    .bind(org_id)
    .execute(&mut **tx)
    .await
    .context("update_rule_state failed")?;
    Ok(result.rows_affected() > 0)
}

pub async fn fetch_rule(pool: &PgPool, org_id: Uuid, rule_id: Uuid) -> Result<Option<RuleRow>> {
    let row = sqlx::query(&format!(
        "select {RULE_COLUMNS} from rules where id = $1 and org_id = $2"
    ))
    .bind(rule_id)
    .bind(org_id)
    .fetch_optional(pool)
    .await
    .context("fetch_rule failed")?;

    row.map(row_to_rule).transpose()
}

/// Filters for `list_rules`/`count_rules`. `None` means "no filter on this
/// column".
#[derive(Debug, Clone, Default)]
pub struct RuleFilter {
    pub area_id: Option<Uuid>,
    pub device_id: Option<Uuid>,
    pub subject_type: Option<String>,
    pub pass_direction: Option<String>,
    pub auth_method: Option<String>,
    pub action: Option<String>,
    pub state: Option<String>,
}

/// List rules for an org, filtered, stable order `updated_at_utc DESC`.
pub async fn list_rules(
    pool: &PgPool,
    org_id: Uuid,
    filter: &RuleFilter,
    limit: i64,
    offset: i64,
) -> Result<Vec<RuleRow>> {
    let rows = sqlx::query(&format!(
        r#"
        select {RULE_COLUMNS} from rules
        where org_id = $1
          and ($2::uuid is null or area_id = $2)
          and ($3::uuid is null or device_id = $3)
          and ($4::text is null or subject_type = $4)
          and ($5::text is null or pass_direction = $5)
          and ($6::text is null or auth_method = $6)
          and ($7::text is null or action = $7)
          and ($8::text is null or state = $8)
        order by updated_at_utc desc
        limit $9 offset $10
        "#
    ))
    .bind(org_id)
    .bind(filter.area_id)
    .bind(filter.device_id)
    .bind(&filter.subject_type)
    .bind(&filter.pass_direction)
    .bind(&filter.auth_method)
    .bind(&filter.action)
    .bind(&filter.state)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await
    .context("list_rules failed")?;

    rows.into_iter().map(row_to_rule).collect()
}

pub async fn count_rules(pool: &PgPool, org_id: Uuid, filter: &RuleFilter) -> Result<i64> {
    let (n,): (i64,) = sqlx::query_as(
        r#"
        select count(*)::bigint from rules
        where org_id = $1
          and ($2::uuid is null or area_id = $2)
          and ($3::uuid is null or device_id = $3)
          and ($4::text is null or subject_type = $4)
          and ($5::text is null or pass_direction = $5)
          and ($6::text is null or auth_method = $6)
          and ($7::text is null or action = $7)
          and ($8::text is null or state = $8)
        "#,
    )
    .bind(org_id)
    .bind(filter.area_id)
    .bind(filter.device_id)
    .bind(&filter.subject_type)
    .bind(&filter.pass_direction)
    .bind(&filter.auth_method)
    .bind(&filter.action)
    .bind(&filter.state)
    .fetch_one(pool)
    .await
    .context("count_rules failed")?;
    Ok(n)
}

/// The exact tuple the logical-duplicate invariant is defined over. NULL
/// fields are compared with `IS NOT DISTINCT FROM` so a NULL counts as a
/// specific, matching wildcard value rather than "unknown".
pub async fn exists_duplicate_rule(
    pool: &PgPool,
    r: &NewRule,
    exclude_id: Option<Uuid>,
) -> Result<bool> {
    let (exists,): (bool,) = sqlx::query_as(
        r#"
        select exists (
            select 1 from rules
            where org_id = $1
              and area_id = $2
              and subject_type = $3
              and device_id is not distinct from $4
              and pass_direction is not distinct from $5
              and auth_method is not distinct from $6
              and action = $7
              and valid_from_utc is not distinct from $8
              and valid_to_utc is not distinct from $9
              and from_local is not distinct from $10
              and to_local is not distinct from $11
              and ($12::uuid is null or id <> $12)
        )
        "#,
    )
    .bind(r.org_id)
    .bind(r.area_id)
    .bind(&r.subject_type)
    .bind(r.device_id)
    .bind(&r.pass_direction)
    .bind(&r.auth_method)
    .bind(&r.action)
    .bind(r.valid_from_utc)
    .bind(r.valid_to_utc)
    .bind(&r.from_local)
    .bind(&r.to_local)
    .bind(exclude_id)
    .fetch_one(pool)
    .await
    .context("exists_duplicate_rule failed")?;
    Ok(exists)
}

/// Base candidate set for the cache: all ACTIVE rules for
/// `(org, area, subjectType)`, ordered `priority DESC, updated_at_utc DESC`.
/// In-memory matcher/window filtering happens downstream
/// in `access-rules`, not here.
pub async fn find_active_rules_base(
    pool: &PgPool,
    org_id: Uuid,
    area_id: Uuid,
    subject_type: &str,
) -> Result<Vec<RuleRow>> {
    let rows = sqlx::query(&format!(
        r#"
        select {RULE_COLUMNS} from rules
        where org_id = $1 and area_id = $2 and subject_type = $3 and state = 'ACTIVE'
        order by priority desc, updated_at_utc desc
        "#
    ))
    .bind(org_id)
    .bind(area_id)
    .bind(subject_type)
    .fetch_all(pool)
    .await
    .context("find_active_rules_base failed")?;

    rows.into_iter().map(row_to_rule).collect()
}

/// Engine-friendly query used when the cache is bypassed: filters wildcard
/// matchers and UTC validity in SQL, leaves only daily-window/timezone
/// filtering (which needs the effective zone) to the caller.
#[allow(clippy::too_many_arguments)]
pub async fn find_candidates_for_intent(
    pool: &PgPool,
    org_id: Uuid,
    area_id: Uuid,
    subject_type: &str,
    device_id: Uuid,
    pass_direction: &str,
    auth_method: &str,
    occurred_at_utc: DateTime<Utc>,
) -> Result<Vec<RuleRow>> {
    let rows = sqlx::query(&format!(
        r#"
        select {RULE_COLUMNS} from rules
        where org_id = $1 and area_id = $2 and subject_type = $3 and state = 'ACTIVE'
          and (device_id is null or device_id = $4)
          and (pass_direction is null or pass_direction = $5)
          and (auth_method is null or auth_method = $6)
          and (valid_from_utc is null or valid_from_utc <= $7)
          and (valid_to_utc is null or valid_to_utc >= $7)
        order by priority desc, updated_at_utc desc
        "#
    ))
    .bind(org_id)
    .bind(area_id)
    .bind(subject_type)
    .bind(device_id)
    .bind(pass_direction)
    .bind(auth_method)
    .bind(occurred_at_utc)
    .fetch_all(pool)
    .await
    .context("find_candidates_for_intent failed")?;

    rows.into_iter().map(row_to_rule).collect()
}

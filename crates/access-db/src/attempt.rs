//! AccessAttempt / Decision / DeviceCommand persistence.
//!
//! These three inserts, plus the outbox inserts in [`crate::outbox`], are
//! meant to run inside a single caller-owned transaction — none of the
//! functions here open their own transaction.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct NewAttempt {
    pub id: Uuid,
    pub org_id: Uuid,
    pub device_id: Uuid,
    pub area_id: Uuid,
    pub subject_type: String,
    pub pass_direction: String,
    pub auth_method: String,
    pub subject_reference: Option<String>,
    pub idempotency_key: String,
    pub occurred_at_utc: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct AttemptRow {
    pub id: Uuid,
    pub org_id: Uuid,
    pub device_id: Uuid,
    pub area_id: Uuid,
    pub subject_type: String,
    pub pass_direction: String,
    pub auth_method: String,
    pub subject_reference: Option<String>,
    pub idempotency_key: String,
    pub occurred_at_utc: DateTime<Utc>,
}

pub async fn insert_attempt(tx: &mut Transaction<'_, Postgres>, a: &NewAttempt) -> Result<()> {
    sqlx::query(
        r#"
        insert into access_attempts (
            id, org_id, device_id, area_id, subject_type, pass_direction,
            auth_method, subject_reference, idempotency_key, occurred_at_utc
        ) values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        "#,
    )
    .bind(a.id)
    .bind(a.org_id)
    .bind(a.device_id)
    .bind(a.area_id)
    .bind(&a.subject_type)
    .bind(&a.pass_direction)
    .bind(&a.auth_method)
    .bind(&a.subject_reference)
    .bind(&a.idempotency_key)
    .bind(a.occurred_at_utc)
    .execute(&mut **tx)
    .await
    .context("insert_attempt failed")?;
    Ok(())
}

/// Look up a previously-registered attempt by its idempotency key. Used
/// both for the fast-path idempotent replay and to recover from a
/// unique-violation race.
pub async fn find_attempt_by_idempotency_key(
    pool: &PgPool,
    org_id: Uuid,
    idempotency_key: &str,
) -> Result<Option<AttemptRow>> {
    let row = sqlx::query(
        r#"
        select id, org_id, device_id, area_id, subject_type, pass_direction,
               auth_method, subject_reference, idempotency_key, occurred_at_utc
        from access_attempts
        where org_id = $1 and idempotency_key = $2
        "#,
    )
    .bind(org_id)
    .bind(idempotency_key)
    .fetch_optional(pool)
    .await
    .context("find_attempt_by_idempotency_key failed")?;

    let Some(row) = row else { return Ok(None) };
    Ok(Some(AttemptRow {
        id: row.try_get("id")?,
        org_id: row.try_get("org_id")?,
        device_id: row.try_get("device_id")?,
        area_id: row.try_get("area_id")?,
        subject_type: row.try_get("subject_type")?,
        pass_direction: row.try_get("pass_direction")?,
        auth_method: row.try_get("auth_method")?,
        subject_reference: row.try_get("subject_reference")?,
        idempotency_key: row.try_get("idempotency_key")?,
        occurred_at_utc: row.try_get("occurred_at_utc")?,
    }))
}

#[derive(Debug, Clone)]
pub struct NewDecision {
    pub id: Uuid,
    pub org_id: Uuid,
    pub attempt_id: Uuid,
    pub result: String,
    pub reason_code: String,
    pub reason_detail: Option<String>,
    pub decided_at_utc: DateTime<Utc>,
    pub expires_at_utc: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct DecisionRow {
    pub id: Uuid,
    pub org_id: Uuid,
    pub attempt_id: Uuid,
    pub result: String,
    pub reason_code: String,
    pub reason_detail: Option<String>,
    pub decided_at_utc: DateTime<Utc>,
    pub expires_at_utc: Option<DateTime<Utc>>,
}

pub async fn insert_decision(tx: &mut Transaction<'_, Postgres>, d: &NewDecision) -> Result<()> {
    sqlx::query(
        r#"
        insert into decisions (
            id, org_id, attempt_id, result, reason_code, reason_detail,
            decided_at_utc, expires_at_utc
        ) values ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(d.id)
    .bind(d.org_id)
    .bind(d.attempt_id)
    .bind(&d.result)
    .bind(&d.reason_code)
    .bind(&d.reason_detail)
    .bind(d.decided_at_utc)
    .bind(d.expires_at_utc)
    .execute(&mut **tx)
    .await
    .context("insert_decision failed")?;
    Ok(())
}

pub async fn fetch_decision_by_attempt(
    pool: &PgPool,
    attempt_id: Uuid,
) -> Result<Option<DecisionRow>> {
    let row = sqlx::query(
        r#"
        select id, org_id, attempt_id, result, reason_code, reason_detail,
               decided_at_utc, expires_at_utc
        from decisions
        where attempt_id = $1
        "#,
    )
    .bind(attempt_id)
    .fetch_optional(pool)
    .await
    .context("fetch_decision_by_attempt failed")?;

    let Some(row) = row else { return Ok(None) };
    Ok(Some(DecisionRow {
        id: row.try_get("id")?,
        org_id: row.try_get("org_id")?,
        attempt_id: row.try_get("attempt_id")?,
        result: row.try_get("result")?,
        reason_code: row.try_get("reason_code")?,
        reason_detail: row.try_get("reason_detail")?,
        decided_at_utc: row.try_get("decided_at_utc")?,
        expires_at_utc: row.try_get("expires_at_utc")?,
    }))
}

#[derive(Debug, Clone)]
pub struct NewCommand {
    pub id: Uuid,
    pub org_id: Uuid,
    pub attempt_id: Uuid,
    pub device_id: Uuid,
    pub command: String,
    pub message: Option<String>,
    pub idempotency_key: String,
    pub sent_at_utc: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CommandRow {
    pub id: Uuid,
    pub org_id: Uuid,
    pub attempt_id: Uuid,
    pub device_id: Uuid,
    pub command: String,
    pub message: Option<String>,
    pub state: String,
    pub idempotency_key: String,
    pub sent_at_utc: DateTime<Utc>,
}

pub async fn insert_command(tx: &mut Transaction<'_, Postgres>, c: &NewCommand) -> Result<()> {
    sqlx::query(
        r#"
        insert into device_commands (
            id, org_id, attempt_id, device_id, command, message, state,
            idempotency_key, sent_at_utc
        ) values ($1, $2, $3, $4, $5, $6, 'CREATED', $7, $8)
        "#,
    )
    .bind(c.id)
    .bind(c.org_id)
    .bind(c.attempt_id)
    .bind(c.device_id)
    .bind(&c.command)
    .bind(&c.message)
    .bind(&c.idempotency_key)
    .bind(c.sent_at_utc)
    .execute(&mut **tx)
    .await
    .context("insert_command failed")?;
    Ok(())
}

pub async fn fetch_command_by_attempt(
    pool: &PgPool,
    attempt_id: Uuid,
) -> Result<Option<CommandRow>> {
    let row = sqlx::query(
        r#"
        select id, org_id, attempt_id, device_id, command, message, state,
               idempotency_key, sent_at_utc
        from device_commands
        where attempt_id = $1
        "#,
    )
    .bind(attempt_id)
    .fetch_optional(pool)
    .await
    .context("fetch_command_by_attempt failed")?;

    let Some(row) = row else { return Ok(None) };
    Ok(Some(CommandRow {
        id: row.try_get("id")?,
        org_id: row.try_get("org_id")?,
        attempt_id: row.try_get("attempt_id")?,
        device_id: row.try_get("device_id")?,
        command: row.try_get("command")?,
        message: row.try_get("message")?,
        state: row.try_get("state")?,
        idempotency_key: row.try_get("idempotency_key")?,
        sent_at_utc: row.try_get("sent_at_utc")?,
    }))
}

//! Pending report persistence.

use sea_orm::ActiveValue::Set;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, IntoActiveModel,
    QueryFilter, QueryOrder,
};

use crate::entities::pending_report;
use crate::reports::{ReportCommand, ReportKeys};

pub const STATUS_QUEUED: &str = "queued";
pub const STATUS_FAILED: &str = "failed";
pub const STATUS_SUBMITTED: &str = "submitted";

const MAX_ERROR_LEN: usize = 2048;

pub async fn enqueue_report<C: ConnectionTrait>(
    db: &C,
    command: &ReportCommand,
    now: i64,
) -> Result<pending_report::Model, DbErr> {
    let keys = command.keys();
    let encoded = serde_json::to_string(command)
        .map_err(|err| DbErr::Custom(format!("Failed to encode report command: {err}")))?;
    let model = pending_report::ActiveModel {
        command: Set(encoded),
        url_key: Set(keys.url),
        name_key: Set(keys.name),
        address_keys: Set(keys.addresses.join(",")),
        status: Set(STATUS_QUEUED.to_string()),
        attempts: Set(0),
        last_error: Set(None),
        request_url: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    };
    model.insert(db).await
}

/// Reports still awaiting a successful submission, oldest first.
pub async fn list_pending_reports<C: ConnectionTrait>(
    db: &C,
) -> Result<Vec<pending_report::Model>, DbErr> {
    pending_report::Entity::find()
        .filter(pending_report::Column::Status.is_in([STATUS_QUEUED, STATUS_FAILED]))
        .order_by_asc(pending_report::Column::Id)
        .all(db)
        .await
}

pub async fn get_report<C: ConnectionTrait>(
    db: &C,
    id: i32,
) -> Result<Option<pending_report::Model>, DbErr> {
    pending_report::Entity::find_by_id(id).one(db).await
}

pub fn is_pending(report: &pending_report::Model) -> bool {
    report.status == STATUS_QUEUED || report.status == STATUS_FAILED
}

/// A queued, failed or already submitted report overlapping `keys`.
pub async fn find_duplicate<C: ConnectionTrait>(
    db: &C,
    keys: &ReportKeys,
) -> Result<Option<pending_report::Model>, DbErr> {
    let reports = pending_report::Entity::find()
        .filter(pending_report::Column::Status.is_in([
            STATUS_QUEUED,
            STATUS_FAILED,
            STATUS_SUBMITTED,
        ]))
        .order_by_asc(pending_report::Column::Id)
        .all(db)
        .await?;
    Ok(reports.into_iter().find(|report| {
        let stored = ReportKeys {
            url: report.url_key.clone(),
            name: report.name_key.clone(),
            addresses: report
                .address_keys
                .split(',')
                .filter(|key| !key.is_empty())
                .map(str::to_string)
                .collect(),
        };
        stored.overlaps(keys)
    }))
}

/// Removes the report from the pending set after a successful submission.
pub async fn dequeue_report<C: ConnectionTrait>(
    db: &C,
    id: i32,
    request_url: Option<String>,
    now: i64,
) -> Result<(), DbErr> {
    let Some(report) = pending_report::Entity::find_by_id(id).one(db).await? else {
        return Err(DbErr::RecordNotFound(format!("pending report {id}")));
    };
    let attempts = report.attempts + 1;
    let mut model = report.into_active_model();
    model.status = Set(STATUS_SUBMITTED.to_string());
    model.attempts = Set(attempts);
    model.last_error = Set(None);
    model.request_url = Set(request_url);
    model.updated_at = Set(now);
    model.update(db).await?;
    Ok(())
}

pub async fn record_failure<C: ConnectionTrait>(
    db: &C,
    id: i32,
    error: &str,
    now: i64,
) -> Result<(), DbErr> {
    let Some(report) = pending_report::Entity::find_by_id(id).one(db).await? else {
        return Err(DbErr::RecordNotFound(format!("pending report {id}")));
    };
    let attempts = report.attempts + 1;
    let mut model = report.into_active_model();
    model.status = Set(STATUS_FAILED.to_string());
    model.attempts = Set(attempts);
    model.last_error = Set(Some(error.chars().take(MAX_ERROR_LEN).collect()));
    model.updated_at = Set(now);
    model.update(db).await?;
    Ok(())
}

pub fn decode_command(report: &pending_report::Model) -> Result<ReportCommand, DbErr> {
    serde_json::from_str(&report.command).map_err(|err| {
        DbErr::Custom(format!("Pending report {} is not decodable: {err}", report.id))
    })
}

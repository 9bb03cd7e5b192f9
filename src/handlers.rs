use crate::date_key::DateKey;
use crate::errors::{AppError, TrackerError};
use crate::models::{
    Budget, ChecklistProgress, ChecklistUpdate, DatedRecord, Fields, ITEM_KEYS, MonthlyReport, NewProspect,
    Prospect, ProspectUpdate, RECORD_KEYS, ServiceData, SubItem, TrackingStats, check_fields, fields, new_id,
};
use crate::state::AppState;
use crate::stats::{build_stats, checklist_progress, field_metric, has_entry, monthly_report};
use crate::storage::persist_data;
use crate::store::RecordStore;
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{error, info};

const DEFAULT_LIST_LIMIT: usize = 30;
const DEFAULT_REPORT_RESOURCE: &str = "transactions";
const UPDATED_AT: &str = "updated_at";

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct StatsQuery {
    /// Numeric field to total. Without it every total is zero.
    pub metric: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReportQuery {
    /// Dated resource whose sub-items are transactions.
    pub resource: Option<String>,
}

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "healthy", "service": "daily_tracker" }))
}

pub async fn list_records(
    State(state): State<AppState>,
    Path(resource): Path<String>,
    Query(query): Query<ListQuery>,
) -> Json<Vec<DatedRecord>> {
    let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT);
    let data = state.data.lock().await;
    let records = data
        .resources
        .get(&resource)
        .map(|store| store.latest(limit))
        .unwrap_or_default();
    Json(records)
}

pub async fn get_record(
    State(state): State<AppState>,
    Path((resource, date)): Path<(String, String)>,
) -> Result<Json<DatedRecord>, AppError> {
    let key = DateKey::parse(&date)?;
    let data = state.data.lock().await;
    data.resources
        .get(&resource)
        .and_then(|store| store.get_existing(&key))
        .cloned()
        .map(Json)
        .ok_or_else(|| TrackerError::RecordNotFound(key).into())
}

pub async fn save_record(
    State(state): State<AppState>,
    Path(resource): Path<String>,
    Json(mut record): Json<DatedRecord>,
) -> Result<Json<DatedRecord>, AppError> {
    let key = record.date;
    check_fields(&record.fields, &RECORD_KEYS)?;
    for item in &mut record.items {
        check_fields(&item.fields, &ITEM_KEYS)?;
        assign_id(item);
    }
    let saved = write(&state, &resource, key, |store| {
        store.merge_record(record);
        Ok(())
    })
    .await?;
    Ok(Json(saved))
}

/// Field-level merge. A `null` value clears that field.
pub async fn patch_record(
    State(state): State<AppState>,
    Path((resource, date)): Path<(String, String)>,
    Json(changes): Json<Fields>,
) -> Result<Json<DatedRecord>, AppError> {
    let key = DateKey::parse(&date)?;
    check_fields(&changes, &RECORD_KEYS)?;
    let saved = write(&state, &resource, key, |store| {
        store.upsert_partial(key, changes);
        Ok(())
    })
    .await?;
    Ok(Json(saved))
}

pub async fn delete_record(
    State(state): State<AppState>,
    Path((resource, date)): Path<(String, String)>,
) -> Result<StatusCode, AppError> {
    let key = DateKey::parse(&date)?;
    let mut data = state.data.lock().await;
    let removed = data
        .resources
        .get_mut(&resource)
        .and_then(|store| store.remove(&key))
        .ok_or(TrackerError::RecordNotFound(key))?;
    persist_or_restore(&state, &mut data, |data| {
        restore_record(data, &resource, key, Some(removed));
    })
    .await?;
    info!(%resource, %key, "record deleted");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn add_item(
    State(state): State<AppState>,
    Path((resource, date)): Path<(String, String)>,
    Json(mut item): Json<SubItem>,
) -> Result<Json<DatedRecord>, AppError> {
    let key = DateKey::parse(&date)?;
    check_fields(&item.fields, &ITEM_KEYS)?;
    assign_id(&mut item);
    let saved = write(&state, &resource, key, |store| {
        store.add_sub_item(key, item);
        Ok(())
    })
    .await?;
    Ok(Json(saved))
}

pub async fn toggle_item(
    State(state): State<AppState>,
    Path((resource, date, id)): Path<(String, String, String)>,
) -> Result<Json<DatedRecord>, AppError> {
    let key = DateKey::parse(&date)?;
    let saved = write(&state, &resource, key, |store| {
        store.toggle_sub_item(&key, &id).map(|_| ())
    })
    .await?;
    Ok(Json(saved))
}

pub async fn delete_item(
    State(state): State<AppState>,
    Path((resource, date, id)): Path<(String, String, String)>,
) -> Result<StatusCode, AppError> {
    let key = DateKey::parse(&date)?;
    write(&state, &resource, key, |store| {
        store
            .remove_sub_item(&key, &id)
            .map(|_| ())
            .ok_or_else(|| TrackerError::item_not_found(key, id.as_str()))
    })
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_stats(
    State(state): State<AppState>,
    Path(resource): Path<String>,
    Query(query): Query<StatsQuery>,
) -> Json<TrackingStats> {
    let data = state.data.lock().await;
    let empty = RecordStore::new();
    let store = data.resources.get(&resource).unwrap_or(&empty);
    let stats = match query.metric.as_deref().filter(|name| !name.is_empty()) {
        Some(name) => build_stats(store.records(), has_entry, field_metric(name)),
        None => build_stats(store.records(), has_entry, |_| 0.0),
    };
    Json(stats)
}

pub async fn list_prospects(State(state): State<AppState>) -> Json<Vec<Prospect>> {
    let data = state.data.lock().await;
    let mut prospects: Vec<Prospect> = data.prospects.values().cloned().collect();
    prospects.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Json(prospects)
}

pub async fn create_prospect(
    State(state): State<AppState>,
    Json(payload): Json<NewProspect>,
) -> Result<Json<Prospect>, AppError> {
    if payload.name.trim().is_empty() {
        return Err(AppError::bad_request("name must not be empty"));
    }
    let prospect = payload.into_prospect();
    let id = prospect.id.clone();

    let mut data = state.data.lock().await;
    data.prospects.insert(id.clone(), prospect.clone());
    persist_or_restore(&state, &mut data, |data| {
        data.prospects.remove(&id);
    })
    .await?;
    info!(%id, "prospect created");
    Ok(Json(prospect))
}

pub async fn get_prospect(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Prospect>, AppError> {
    let data = state.data.lock().await;
    data.prospects
        .get(&id)
        .cloned()
        .map(Json)
        .ok_or_else(|| prospect_not_found(&id))
}

pub async fn update_prospect(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(update): Json<ProspectUpdate>,
) -> Result<Json<Prospect>, AppError> {
    write_prospect(&state, &id, |prospect| {
        prospect.apply_update(update);
        Ok(())
    })
    .await
    .map(Json)
}

pub async fn update_checklist(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(update): Json<ChecklistUpdate>,
) -> Result<Json<Prospect>, AppError> {
    write_prospect(&state, &id, |prospect| {
        prospect
            .set_step(&update.item, update.completed, update.notes, Utc::now())
            .map(|_| ())
    })
    .await
    .map(Json)
}

pub async fn prospect_progress(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ChecklistProgress>, AppError> {
    let data = state.data.lock().await;
    data.prospects
        .get(&id)
        .map(|prospect| Json(checklist_progress(prospect)))
        .ok_or_else(|| prospect_not_found(&id))
}

pub async fn delete_prospect(State(state): State<AppState>, Path(id): Path<String>) -> Result<StatusCode, AppError> {
    let mut data = state.data.lock().await;
    let removed = data.prospects.remove(&id).ok_or_else(|| prospect_not_found(&id))?;
    persist_or_restore(&state, &mut data, |data| {
        data.prospects.insert(id.clone(), removed);
    })
    .await?;
    info!(%id, "prospect deleted");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_budgets(State(state): State<AppState>) -> Json<Vec<Budget>> {
    let data = state.data.lock().await;
    Json(data.budgets.values().cloned().collect())
}

pub async fn get_budget(State(state): State<AppState>, Path(month): Path<String>) -> Result<Json<Budget>, AppError> {
    let month = DateKey::parse_month(&month)?.month_label();
    let data = state.data.lock().await;
    data.budgets
        .get(&month)
        .cloned()
        .map(Json)
        .ok_or_else(|| AppError::not_found(format!("no budget for {month}")))
}

/// Creates or replaces the budget for `budget.month`.
pub async fn save_budget(State(state): State<AppState>, Json(mut budget): Json<Budget>) -> Result<Json<Budget>, AppError> {
    let month = DateKey::parse_month(&budget.month)?.month_label();
    budget.month = month.clone();
    budget.updated_at = Some(Utc::now());

    let mut data = state.data.lock().await;
    let previous = data.budgets.insert(month.clone(), budget.clone());
    persist_or_restore(&state, &mut data, |data| match previous {
        Some(previous) => {
            data.budgets.insert(month.clone(), previous);
        }
        None => {
            data.budgets.remove(&month);
        }
    })
    .await?;
    info!(%month, "budget saved");
    Ok(Json(budget))
}

pub async fn get_report(
    State(state): State<AppState>,
    Path(month): Path<String>,
    Query(query): Query<ReportQuery>,
) -> Result<Json<MonthlyReport>, AppError> {
    let month = DateKey::parse_month(&month)?;
    let resource = query.resource.as_deref().unwrap_or(DEFAULT_REPORT_RESOURCE);
    let data = state.data.lock().await;
    let empty = RecordStore::new();
    let store = data.resources.get(resource).unwrap_or(&empty);
    let budget = data.budgets.get(&month.month_label());
    Ok(Json(monthly_report(store.records(), month, budget)))
}

/// Applies `change` to one record, stamps it, and persists the whole state.
/// Nothing changes, in memory or on disk, when `change` or the write fails.
async fn write<F>(state: &AppState, resource: &str, key: DateKey, change: F) -> Result<DatedRecord, AppError>
where
    F: FnOnce(&mut RecordStore) -> Result<(), TrackerError>,
{
    let mut data = state.data.lock().await;
    let store = data.resources.entry(resource.to_string()).or_default();
    let previous = store.get_existing(&key).cloned();
    if let Err(err) = change(store) {
        restore_record(&mut data, resource, key, previous);
        return Err(err.into());
    }
    let saved = store
        .upsert_partial(key, fields([(UPDATED_AT, Utc::now().to_rfc3339())]))
        .clone();

    persist_or_restore(state, &mut data, |data| restore_record(data, resource, key, previous)).await?;
    info!(%resource, %key, "record saved");
    Ok(saved)
}

async fn write_prospect<F>(state: &AppState, id: &str, change: F) -> Result<Prospect, AppError>
where
    F: FnOnce(&mut Prospect) -> Result<(), TrackerError>,
{
    let mut data = state.data.lock().await;
    let prospect = data.prospects.get_mut(id).ok_or_else(|| prospect_not_found(id))?;
    let previous = prospect.clone();
    change(prospect)?;
    prospect.updated_at = Some(Utc::now());
    let saved = prospect.clone();

    persist_or_restore(state, &mut data, |data| {
        data.prospects.insert(id.to_string(), previous);
    })
    .await?;
    info!(%id, "prospect saved");
    Ok(saved)
}

/// Writes `data` to disk; when that fails, `restore` undoes the in-memory change first.
async fn persist_or_restore<F>(state: &AppState, data: &mut ServiceData, restore: F) -> Result<(), AppError>
where
    F: FnOnce(&mut ServiceData),
{
    if let Err(err) = persist_data(&state.data_path, data).await {
        error!(path = %state.data_path.display(), "persist failed, change reverted: {}", err.message);
        restore(data);
        return Err(err);
    }
    Ok(())
}

fn restore_record(data: &mut ServiceData, resource: &str, key: DateKey, previous: Option<DatedRecord>) {
    let store = data.resources.entry(resource.to_string()).or_default();
    store.replace(key, previous);
    if store.is_empty() {
        data.resources.remove(resource);
    }
}

fn prospect_not_found(id: &str) -> AppError {
    AppError::not_found(format!("prospect '{id}' not found"))
}

fn assign_id(item: &mut SubItem) {
    if item.id.trim().is_empty() {
        item.id = new_id();
    }
}

use crate::date_key::DateKey;
use crate::errors::TrackerError;
use crate::store::RecordStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single tracked value. `Null` only travels in updates, where it clears
/// the field; stored records never hold it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    Int(i64),
    Number(f64),
    Text(String),
    List(Vec<String>),
    Null,
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Int(value) => Some(*value as f64),
            FieldValue::Number(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Text(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Bool(value) => Some(*value),
            _ => None,
        }
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Int(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Number(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<Vec<String>> for FieldValue {
    fn from(value: Vec<String>) -> Self {
        FieldValue::List(value)
    }
}

pub type Fields = BTreeMap<String, FieldValue>;

/// Keys a [`DatedRecord`] owns on the wire; fields may not use them.
pub const RECORD_KEYS: [&str; 2] = ["date", "items"];

/// Keys a [`SubItem`] owns on the wire; fields may not use them.
pub const ITEM_KEYS: [&str; 4] = ["id", "completed", "created_at", "completed_at"];

/// Fails with `ReservedField` when `fields` names one of `reserved`.
pub fn check_fields(fields: &Fields, reserved: &[&str]) -> Result<(), TrackerError> {
    match fields.keys().find(|name| reserved.contains(&name.as_str())) {
        Some(name) => Err(TrackerError::ReservedField(name.clone())),
        None => Ok(()),
    }
}

/// Drops nulls and reserved keys so the value serializes back unambiguously.
fn clean(mut fields: Fields, reserved: &[&str]) -> Fields {
    fields.retain(|name, value| !value.is_null() && !reserved.contains(&name.as_str()));
    fields
}

/// Builds a field map from `(name, value)` pairs.
pub fn fields<K, V, I>(pairs: I) -> Fields
where
    K: Into<String>,
    V: Into<FieldValue>,
    I: IntoIterator<Item = (K, V)>,
{
    pairs
        .into_iter()
        .map(|(name, value)| (name.into(), value.into()))
        .collect()
}

/// A nested entry owned by one record: food entry, todo, practice session, transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "WireItem")]
pub struct SubItem {
    pub id: String,
    pub completed: bool,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub fields: Fields,
}

#[derive(Deserialize)]
struct WireItem {
    #[serde(default)]
    id: String,
    #[serde(default)]
    completed: bool,
    #[serde(default = "Utc::now")]
    created_at: DateTime<Utc>,
    #[serde(default)]
    completed_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    fields: Fields,
}

impl From<WireItem> for SubItem {
    fn from(wire: WireItem) -> Self {
        Self {
            id: wire.id,
            completed: wire.completed,
            created_at: wire.created_at,
            completed_at: wire.completed_at,
            fields: clean(wire.fields, &ITEM_KEYS),
        }
    }
}

impl SubItem {
    pub fn new(fields: Fields) -> Self {
        Self {
            id: new_id(),
            completed: false,
            created_at: Utc::now(),
            completed_at: None,
            fields: clean(fields, &ITEM_KEYS),
        }
    }

    pub fn number(&self, name: &str) -> Option<f64> {
        self.fields.get(name).and_then(FieldValue::as_f64)
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(FieldValue::as_str)
    }

    fn toggle(&mut self, now: DateTime<Utc>) {
        self.completed = !self.completed;
        self.completed_at = self.completed.then_some(now);
    }
}

/// Everything tracked for one day in one domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "WireRecord")]
pub struct DatedRecord {
    pub date: DateKey,
    pub items: Vec<SubItem>,
    #[serde(flatten)]
    pub fields: Fields,
}

/// Incoming shape. Services that dump unset optional fields send them as
/// `null`; those read as absent.
#[derive(Deserialize)]
struct WireRecord {
    date: DateKey,
    #[serde(default)]
    items: Vec<SubItem>,
    #[serde(flatten)]
    fields: Fields,
}

impl From<WireRecord> for DatedRecord {
    fn from(wire: WireRecord) -> Self {
        Self {
            date: wire.date,
            items: wire.items,
            fields: clean(wire.fields, &RECORD_KEYS),
        }
    }
}

impl DatedRecord {
    pub fn empty(date: DateKey) -> Self {
        Self {
            date,
            items: Vec::new(),
            fields: Fields::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty() && self.fields.is_empty()
    }

    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    pub fn number(&self, name: &str) -> Option<f64> {
        self.field(name).and_then(FieldValue::as_f64)
    }

    pub fn item(&self, id: &str) -> Option<&SubItem> {
        self.items.iter().find(|item| item.id == id)
    }

    /// Field-level replace: provided fields overwrite, omitted fields stay,
    /// `Null` removes. Lists are replaced wholesale. Reserved keys are ignored.
    pub fn merge_fields(&mut self, fields: Fields) {
        for (name, value) in fields {
            if RECORD_KEYS.contains(&name.as_str()) {
                continue;
            }
            if value.is_null() {
                self.fields.remove(&name);
            } else {
                self.fields.insert(name, value);
            }
        }
    }

    /// Merges a second save for the same day without duplicating sub-items.
    pub fn merge_record(&mut self, other: DatedRecord) {
        self.merge_fields(other.fields);
        for item in other.items {
            self.push_item(item);
        }
    }

    /// Appends, or replaces in place when the id is already present.
    pub fn push_item(&mut self, mut item: SubItem) {
        item.fields = clean(item.fields, &ITEM_KEYS);
        match self.items.iter_mut().find(|existing| existing.id == item.id) {
            Some(existing) => *existing = item,
            None => self.items.push(item),
        }
    }

    pub fn remove_item(&mut self, id: &str) -> Option<SubItem> {
        let index = self.items.iter().position(|item| item.id == id)?;
        Some(self.items.remove(index))
    }

    pub fn toggle_item(&mut self, id: &str, now: DateTime<Utc>) -> Result<&SubItem, TrackerError> {
        let date = self.date;
        let item = self
            .items
            .iter_mut()
            .find(|item| item.id == id)
            .ok_or_else(|| TrackerError::item_not_found(date, id))?;
        item.toggle(now);
        Ok(item)
    }
}

/// A client-visible change to one day's record.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    SaveFields(Fields),
    SaveRecord(DatedRecord),
    AddItem(SubItem),
    ToggleItem(String),
    RemoveItem(String),
    DeleteRecord,
}

impl Mutation {
    pub fn name(&self) -> &'static str {
        match self {
            Mutation::SaveFields(_) => "save_fields",
            Mutation::SaveRecord(_) => "save_record",
            Mutation::AddItem(_) => "add_item",
            Mutation::ToggleItem(_) => "toggle_item",
            Mutation::RemoveItem(_) => "remove_item",
            Mutation::DeleteRecord => "delete_record",
        }
    }

    /// Rejects field names that would collide with the wire keys.
    pub fn validate(&self) -> Result<(), TrackerError> {
        match self {
            Mutation::SaveFields(fields) => check_fields(fields, &RECORD_KEYS),
            Mutation::SaveRecord(record) => {
                check_fields(&record.fields, &RECORD_KEYS)?;
                record
                    .items
                    .iter()
                    .try_for_each(|item| check_fields(&item.fields, &ITEM_KEYS))
            }
            Mutation::AddItem(item) => check_fields(&item.fields, &ITEM_KEYS),
            _ => Ok(()),
        }
    }

    /// Applies the mutation to a possibly absent record. `None` means "no record".
    pub fn apply_to(
        &self,
        key: DateKey,
        current: Option<DatedRecord>,
        now: DateTime<Utc>,
    ) -> Result<Option<DatedRecord>, TrackerError> {
        self.validate()?;
        if let Mutation::DeleteRecord = self {
            return Ok(None);
        }
        let mut record = current.unwrap_or_else(|| DatedRecord::empty(key));
        match self {
            Mutation::SaveFields(fields) => record.merge_fields(fields.clone()),
            Mutation::SaveRecord(incoming) => record.merge_record(incoming.clone()),
            Mutation::AddItem(item) => record.push_item(item.clone()),
            Mutation::ToggleItem(id) => {
                record.toggle_item(id, now)?;
            }
            Mutation::RemoveItem(id) => {
                record.remove_item(id);
            }
            Mutation::DeleteRecord => {}
        }
        Ok(Some(record))
    }
}

pub const DEFAULT_SALES_CHECKLIST: [&str; 10] = [
    "initial_meeting",
    "nda",
    "data_intake_proposal",
    "pitch_deck",
    "closing_meeting",
    "budget",
    "authority",
    "need",
    "timeline",
    "prove_roi",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChecklistStep {
    pub item: String,
    #[serde(default)]
    pub completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// A sales prospect with a fixed, ordered checklist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prospect {
    pub id: String,
    pub name: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub checklist: Vec<ChecklistStep>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Body of a prospect creation. Without `checklist` the default sales steps are used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewProspect {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checklist: Option<Vec<String>>,
}

impl NewProspect {
    pub fn into_prospect(self) -> Prospect {
        let mut prospect = match self.checklist {
            Some(steps) => Prospect::new(self.name, &steps),
            None => Prospect::with_default_checklist(self.name),
        };
        prospect.notes = self.notes;
        prospect
    }
}

/// Partial update of a prospect's basic info; the checklist is changed step by step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProspectUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChecklistUpdate {
    pub item: String,
    pub completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl Prospect {
    /// Repeated step names are dropped, keeping the first occurrence.
    pub fn new<S: AsRef<str>>(name: impl Into<String>, steps: &[S]) -> Self {
        let mut checklist: Vec<ChecklistStep> = Vec::with_capacity(steps.len());
        for step in steps {
            let step = step.as_ref();
            if checklist.iter().any(|existing| existing.item == step) {
                continue;
            }
            checklist.push(ChecklistStep {
                item: step.to_string(),
                completed: false,
                completed_at: None,
                notes: None,
            });
        }
        Self {
            id: new_id(),
            name: name.into(),
            status: "active".to_string(),
            notes: None,
            checklist,
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    pub fn apply_update(&mut self, update: ProspectUpdate) {
        if let Some(name) = update.name {
            self.name = name;
        }
        if let Some(status) = update.status {
            self.status = status;
        }
        if update.notes.is_some() {
            self.notes = update.notes;
        }
    }

    pub fn with_default_checklist(name: impl Into<String>) -> Self {
        Self::new(name, &DEFAULT_SALES_CHECKLIST)
    }

    pub fn set_step(
        &mut self,
        item: &str,
        completed: bool,
        notes: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<&ChecklistStep, TrackerError> {
        let scope = format!("prospect {}", self.id);
        let step = self
            .checklist
            .iter_mut()
            .find(|step| step.item == item)
            .ok_or_else(|| TrackerError::item_not_found(scope, item))?;
        step.completed = completed;
        step.completed_at = completed.then_some(now);
        if notes.is_some() {
            step.notes = notes;
        }
        Ok(step)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Budget {
    /// `YYYY-MM`
    pub month: String,
    pub categories: BTreeMap<String, f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Income,
    Expense,
    Transfer,
}

impl TransactionKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "income" => Some(Self::Income),
            "expense" => Some(Self::Expense),
            "transfer" => Some(Self::Transfer),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyPoint {
    pub date: DateKey,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeeklyPoint {
    pub week: String,
    pub start_date: DateKey,
    pub end_date: DateKey,
    pub total: f64,
    pub days_counted: u8,
    pub average: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Streaks {
    pub current: u32,
    pub longest: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackingStats {
    pub current_streak: u32,
    pub longest_streak: u32,
    pub total: f64,
    pub active_days_this_week: u32,
    pub active_days_this_month: u32,
    pub total_this_week: f64,
    pub total_this_month: f64,
    pub total_items: usize,
    pub total_active_days: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BudgetLine {
    pub category: String,
    pub budgeted: f64,
    pub spent: f64,
    pub remaining: f64,
    pub percent_used: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryTotal {
    pub category: String,
    pub amount: f64,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthlyReport {
    pub month: String,
    pub total_income: f64,
    pub total_expenses: f64,
    pub net: f64,
    pub by_category: Vec<CategoryTotal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub budget_comparison: Option<Vec<BudgetLine>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct NutritionTotals {
    pub calories: f64,
    pub protein_g: f64,
    pub carbs_g: f64,
    pub fat_g: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ChecklistProgress {
    pub completed: usize,
    pub total: usize,
    pub percent: f64,
}

/// Everything the reference service stores: one record store per dated
/// resource, plus prospects by id and budgets by `YYYY-MM`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceData {
    #[serde(default)]
    pub resources: BTreeMap<String, RecordStore>,
    #[serde(default)]
    pub prospects: BTreeMap<String, Prospect>,
    #[serde(default)]
    pub budgets: BTreeMap<String, Budget>,
}

pub(crate) fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

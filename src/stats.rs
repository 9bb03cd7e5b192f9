//! Rollups over dated records. Every function here is pure: the same records
//! and the same `today` always give the same view.

use crate::date_key::DateKey;
use crate::models::{
    Budget, BudgetLine, CategoryTotal, ChecklistProgress, DailyPoint, DatedRecord, MonthlyReport,
    NutritionTotals, Prospect, Streaks, TrackingStats, TransactionKind, WeeklyPoint,
};
use std::collections::{BTreeMap, BTreeSet};
use std::ops::RangeInclusive;

const UNCATEGORIZED: &str = "Uncategorized";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    /// Monday of the ISO week through today.
    Week,
    /// First of the calendar month through today.
    Month,
}

impl Period {
    pub fn window(self, today: DateKey) -> RangeInclusive<DateKey> {
        let start = match self {
            Period::Week => today.week_start(),
            Period::Month => today.month_start(),
        };
        start..=today
    }
}

/// Counts a day as active when it holds anything besides the service's `updated_at` stamp.
pub fn has_entry(record: &DatedRecord) -> bool {
    !record.items.is_empty() || record.fields.keys().any(|name| name != "updated_at")
}

/// Counts a day as active when it holds at least one sub-item.
pub fn has_items(record: &DatedRecord) -> bool {
    !record.items.is_empty()
}

/// Reads a numeric top-level field, 0 when absent or not numeric.
pub fn field_metric(name: &str) -> impl Fn(&DatedRecord) -> f64 + '_ {
    move |record| record.number(name).unwrap_or(0.0)
}

/// Sums a numeric field across the record's sub-items.
pub fn item_metric(name: &str) -> impl Fn(&DatedRecord) -> f64 + '_ {
    move |record| record.items.iter().filter_map(|item| item.number(name)).sum()
}

pub fn streaks<'a, I, P>(records: I, today: DateKey, is_active: P) -> Streaks
where
    I: IntoIterator<Item = &'a DatedRecord>,
    P: Fn(&DatedRecord) -> bool,
{
    let active: BTreeSet<DateKey> = records
        .into_iter()
        .filter(|record| is_active(*record))
        .map(|record| record.date)
        .collect();

    Streaks {
        current: current_streak(&active, today),
        longest: longest_streak(&active),
    }
}

/// Today not being logged yet does not break the streak; the walk then starts yesterday.
fn current_streak(active: &BTreeSet<DateKey>, today: DateKey) -> u32 {
    let mut day = if active.contains(&today) {
        today
    } else {
        today.add_days(-1)
    };
    let mut count = 0;
    while active.contains(&day) {
        count += 1;
        day = day.add_days(-1);
    }
    count
}

fn longest_streak(active: &BTreeSet<DateKey>) -> u32 {
    let mut longest = 0;
    let mut run = 0;
    let mut previous: Option<DateKey> = None;
    for day in active {
        run = match previous {
            Some(prev) if prev.days_until(day) == 1 => run + 1,
            _ => 1,
        };
        longest = longest.max(run);
        previous = Some(*day);
    }
    longest
}

pub fn period_sum<'a, I, M>(records: I, period: Period, today: DateKey, metric: M) -> f64
where
    I: IntoIterator<Item = &'a DatedRecord>,
    M: Fn(&DatedRecord) -> f64,
{
    let window = period.window(today);
    records
        .into_iter()
        .filter(|record| window.contains(&record.date))
        .map(metric)
        .sum()
}

pub fn active_days_in_period<'a, I, P>(records: I, period: Period, today: DateKey, is_active: P) -> u32
where
    I: IntoIterator<Item = &'a DatedRecord>,
    P: Fn(&DatedRecord) -> bool,
{
    let window = period.window(today);
    let days: BTreeSet<DateKey> = records
        .into_iter()
        .filter(|record| window.contains(&record.date) && is_active(*record))
        .map(|record| record.date)
        .collect();
    days.len() as u32
}

/// Reports every category in either map; a category with no budget is reported with 0 budgeted.
pub fn budget_vs_actual(budget: &BTreeMap<String, f64>, actual: &BTreeMap<String, f64>) -> Vec<BudgetLine> {
    let categories: BTreeSet<&String> = budget.keys().chain(actual.keys()).collect();
    categories
        .into_iter()
        .map(|category| {
            let budgeted = budget.get(category).copied().unwrap_or(0.0);
            let spent = actual.get(category).copied().unwrap_or(0.0);
            let percent_used = if budgeted > 0.0 {
                spent / budgeted * 100.0
            } else {
                0.0
            };
            BudgetLine {
                category: category.clone(),
                budgeted,
                spent,
                remaining: budgeted - spent,
                percent_used,
            }
        })
        .collect()
}

/// Sums by category, largest first; equal amounts sort by category name.
pub fn rank_categories<I, S>(entries: I) -> Vec<CategoryTotal>
where
    I: IntoIterator<Item = (S, f64)>,
    S: Into<String>,
{
    let mut sums: BTreeMap<String, f64> = BTreeMap::new();
    for (category, amount) in entries {
        *sums.entry(category.into()).or_default() += amount;
    }
    let total: f64 = sums.values().sum();

    let mut ranked: Vec<CategoryTotal> = sums
        .into_iter()
        .map(|(category, amount)| CategoryTotal {
            percentage: if total > 0.0 { amount / total * 100.0 } else { 0.0 },
            category,
            amount,
        })
        .collect();
    ranked.sort_by(|a, b| {
        b.amount
            .total_cmp(&a.amount)
            .then_with(|| a.category.cmp(&b.category))
    });
    ranked
}

/// Finance report for the calendar month containing `month`. Sub-items are
/// transactions with `amount`, `type` and `category` fields.
pub fn monthly_report<'a, I>(records: I, month: DateKey, budget: Option<&Budget>) -> MonthlyReport
where
    I: IntoIterator<Item = &'a DatedRecord>,
{
    let start = month.month_start();
    let end = start.add_months(1).add_days(-1);

    let mut total_income = 0.0;
    let mut total_expenses = 0.0;
    let mut expenses: Vec<(String, f64)> = Vec::new();

    for record in records.into_iter().filter(|r| (start..=end).contains(&r.date)) {
        for item in &record.items {
            let amount = item.number("amount").unwrap_or(0.0);
            let kind = item
                .text("type")
                .and_then(TransactionKind::parse)
                .unwrap_or(TransactionKind::Expense);
            match kind {
                TransactionKind::Income => total_income += amount,
                TransactionKind::Expense => {
                    total_expenses += amount;
                    let category = item.text("category").unwrap_or(UNCATEGORIZED);
                    expenses.push((category.to_string(), amount));
                }
                TransactionKind::Transfer => {}
            }
        }
    }

    let by_category = rank_categories(expenses);
    let budget_comparison = budget.map(|budget| {
        let actual: BTreeMap<String, f64> = by_category
            .iter()
            .map(|line| (line.category.clone(), line.amount))
            .collect();
        budget_vs_actual(&budget.categories, &actual)
    });

    MonthlyReport {
        month: start.month_label(),
        total_income,
        total_expenses,
        net: total_income - total_expenses,
        by_category,
        budget_comparison,
    }
}

pub fn nutrition_totals(record: &DatedRecord) -> NutritionTotals {
    let sum = |name: &str| item_metric(name)(record);
    NutritionTotals {
        calories: sum("calories"),
        protein_g: sum("protein_g"),
        carbs_g: sum("carbs_g"),
        fat_g: sum("fat_g"),
    }
}

/// Minutes per mile as `m:ss`, seconds truncated.
pub fn format_pace(duration_minutes: u32, distance_miles: f64) -> Option<String> {
    if duration_minutes == 0 || !(distance_miles > 0.0) {
        return None;
    }
    let pace = f64::from(duration_minutes) / distance_miles;
    let minutes = pace.trunc();
    let seconds = ((pace - minutes) * 60.0).trunc();
    Some(format!("{}:{:02}", minutes as u64, seconds as u64))
}

pub fn checklist_progress(prospect: &Prospect) -> ChecklistProgress {
    let total = prospect.checklist.len();
    let completed = prospect.checklist.iter().filter(|step| step.completed).count();
    let percent = if total == 0 {
        0.0
    } else {
        completed as f64 / total as f64 * 100.0
    };
    ChecklistProgress {
        completed,
        total,
        percent,
    }
}

/// The last `days` days ending today, oldest first; missing days read as 0.
pub fn daily_series<'a, I, M>(records: I, today: DateKey, days: u32, metric: M) -> Vec<DailyPoint>
where
    I: IntoIterator<Item = &'a DatedRecord>,
    M: Fn(&DatedRecord) -> f64,
{
    let by_day = index_by_day(records);
    (0..days)
        .rev()
        .map(|offset| {
            let date = today.add_days(-(offset as i64));
            DailyPoint {
                date,
                value: by_day.get(&date).map(|record| metric(*record)).unwrap_or(0.0),
            }
        })
        .collect()
}

/// The last `weeks` ISO weeks ending with the current one, oldest first.
pub fn weekly_totals<'a, I, M>(records: I, today: DateKey, weeks: u32, metric: M) -> Vec<WeeklyPoint>
where
    I: IntoIterator<Item = &'a DatedRecord>,
    M: Fn(&DatedRecord) -> f64,
{
    let by_day = index_by_day(records);
    let current_week_start = today.week_start();

    (0..weeks)
        .rev()
        .map(|offset| {
            let start = current_week_start.add_days(-7 * offset as i64);
            let end = start.add_days(6);
            let total: f64 = (0..7)
                .filter_map(|day| by_day.get(&start.add_days(day)))
                .map(|record| metric(*record))
                .sum();

            let days_counted = if today < start {
                0
            } else if today > end {
                7
            } else {
                start.days_until(&today) as u8 + 1
            };
            let average = if days_counted == 0 {
                0.0
            } else {
                total / f64::from(days_counted)
            };

            WeeklyPoint {
                week: start.iso_week_label(),
                start_date: start,
                end_date: end,
                total,
                days_counted,
                average,
            }
        })
        .collect()
}

pub fn build_stats<'a, I, P, M>(records: I, is_active: P, metric: M) -> TrackingStats
where
    I: IntoIterator<Item = &'a DatedRecord>,
    P: Fn(&DatedRecord) -> bool,
    M: Fn(&DatedRecord) -> f64,
{
    build_stats_at(DateKey::today(), records, is_active, metric)
}

pub fn build_stats_at<'a, I, P, M>(today: DateKey, records: I, is_active: P, metric: M) -> TrackingStats
where
    I: IntoIterator<Item = &'a DatedRecord>,
    P: Fn(&DatedRecord) -> bool,
    M: Fn(&DatedRecord) -> f64,
{
    let records: Vec<&DatedRecord> = records.into_iter().collect();
    let streaks = streaks(records.iter().copied(), today, &is_active);

    TrackingStats {
        current_streak: streaks.current,
        longest_streak: streaks.longest,
        total: records.iter().map(|record| metric(*record)).sum(),
        active_days_this_week: active_days_in_period(records.iter().copied(), Period::Week, today, &is_active),
        active_days_this_month: active_days_in_period(records.iter().copied(), Period::Month, today, &is_active),
        total_this_week: period_sum(records.iter().copied(), Period::Week, today, &metric),
        total_this_month: period_sum(records.iter().copied(), Period::Month, today, &metric),
        total_items: records.iter().map(|record| record.items.len()).sum(),
        total_active_days: records
            .iter()
            .filter(|record| is_active(**record))
            .map(|record| record.date)
            .collect::<BTreeSet<_>>()
            .len() as u32,
    }
}

fn index_by_day<'a, I>(records: I) -> BTreeMap<DateKey, &'a DatedRecord>
where
    I: IntoIterator<Item = &'a DatedRecord>,
{
    records.into_iter().map(|record| (record.date, record)).collect()
}

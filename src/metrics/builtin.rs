//! Built-in dashboard metrics.
//!
//! Task-derived metrics honour the query's time range (dated by `createdAt`,
//! or `completedAt` for velocity). Site, team, resource and document metrics
//! describe current state, so only the filters apply to them.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::dataset::{field_number, field_str, get_field_value, Dataset};
use crate::date_util::{end_of_day, parse_instant};
use crate::error::{Error, Result};
use crate::query::filter::{apply_filters, strict_eq};
use crate::query::{MetricQuery, TimeRange, DEFAULT_DATE_FIELD};
use crate::transform::{aggregate, calculate_percentage, extract_numbers, round1, AggregationKind};

use super::{
    metric_value, Calculator, ChartType, MetricCategory, MetricDefinition, MetricFormat,
    MetricValue,
};

const COMPLETED: &str = "completed";
const BLOCKED: &str = "blocked";
const COMPLETED_AT: &str = "completedAt";
const LOW_BATTERY_THRESHOLD: f64 = 20.0;
const DEFAULT_WEEKLY_CAPACITY: f64 = 40.0;

#[allow(clippy::too_many_arguments)]
fn def(
    id: &str,
    name: &str,
    description: &str,
    category: MetricCategory,
    format: MetricFormat,
    unit: Option<&str>,
    target: Option<f64>,
    chart_type: ChartType,
    calculator: Calculator,
) -> MetricDefinition {
    MetricDefinition {
        id: id.to_string(),
        name: name.to_string(),
        description: description.to_string(),
        category,
        format,
        unit: unit.map(str::to_string),
        target,
        chart_type,
        calculator,
    }
}

pub(crate) fn definitions() -> Vec<MetricDefinition> {
    use ChartType::*;
    use MetricCategory::*;
    use MetricFormat::{Duration, Number, Percentage};

    vec![
        def("completion_rate", "Completion Rate", "Share of tasks marked completed",
            Performance, Percentage, Some("%"), Some(85.0), Gauge, completion_rate),
        def("on_time_delivery", "On-Time Delivery", "Completed tasks finished by their due date",
            Performance, Percentage, Some("%"), Some(90.0), Gauge, on_time_delivery),
        def("velocity", "Velocity", "Tasks completed per week",
            Performance, Number, Some("tasks/week"), None, Line, velocity),
        def("blocked_tasks", "Blocked Tasks", "Tasks currently blocked",
            Performance, Number, Some("tasks"), Some(0.0), ChartType::Number, blocked_tasks),
        def("site_uptime", "Site Uptime", "Share of sites currently online",
            Operations, Percentage, Some("%"), Some(99.0), Gauge, site_uptime),
        def("avg_health_score", "Average Health Score", "Mean health score of reporting sites",
            Operations, Number, Some("score"), Some(80.0), Bar, avg_health_score),
        def("low_battery_sites", "Low Battery Sites", "Sites with battery below 20%",
            Operations, Number, Some("sites"), Some(0.0), ChartType::Number, low_battery_sites),
        def("compliance_rate", "Compliance Rate", "Share of sites in compliance",
            Compliance, Percentage, Some("%"), Some(100.0), Pie, compliance_rate),
        def("budget_adherence", "Budget Adherence", "Budgeted tasks whose cost stayed within budget",
            Financial, Percentage, Some("%"), Some(95.0), Gauge, budget_adherence),
        def("total_labor_hours", "Total Labor Hours", "Actual hours logged against tasks",
            Financial, Duration, Some("hours"), None, Area, total_labor_hours),
        def("cost_efficiency", "Cost Efficiency", "Estimated hours as a share of actual hours",
            Financial, Percentage, Some("%"), Some(100.0), Bar, cost_efficiency),
        def("team_utilization", "Team Utilization", "Open-task load against active members' capacity",
            Team, Percentage, Some("%"), Some(80.0), Gauge, team_utilization),
        def("active_members", "Active Members", "Team members with active status",
            Team, Number, Some("members"), None, ChartType::Number, active_members),
        def("resource_utilization", "Resource Utilization", "Share of resources in use",
            Resources, Percentage, Some("%"), Some(75.0), Pie, resource_utilization),
        def("available_resources", "Available Resources", "Resources ready for assignment",
            Resources, Number, Some("resources"), None, ChartType::Number, available_resources),
        def("documentation_completeness", "Documentation Completeness", "Share of documents approved",
            Compliance, Percentage, Some("%"), Some(100.0), Bar, documentation_completeness),
    ]
}

// ── Shared helpers ─────────────────────────────────────────────────

/// Records must be JSON objects; anything else is a malformed snapshot.
fn ensure_records(metric_id: &str, records: &[Value]) -> Result<()> {
    match records.iter().position(|r| !r.is_object()) {
        Some(index) => Err(Error::calculation(
            metric_id,
            format!("record {index} is not an object"),
        )),
        None => Ok(()),
    }
}

fn has_status(record: &Value, status: &str) -> bool {
    field_str(record, "status") == Some(status)
}

fn count_where(records: &[Value], pred: impl Fn(&Value) -> bool) -> usize {
    records.iter().filter(|r| pred(r)).count()
}

fn share(part: usize, total: usize) -> f64 {
    round1(calculate_percentage(part as f64, total as f64))
}

fn comparison_label(query: &MetricQuery) -> String {
    match query.get_time_range() {
        Some(range) => format!("previous {range}"),
        None => "previous period".to_string(),
    }
}

fn date_of(record: &Value, field: &str) -> Option<DateTime<Utc>> {
    get_field_value(record, field).and_then(parse_instant)
}

/// Filtered, time-windowed tasks plus the same selection for the previous window.
fn task_selection(
    metric_id: &str,
    data: &Dataset,
    query: &MetricQuery,
    date_field: &str,
) -> Result<(Vec<Value>, Option<Vec<Value>>)> {
    ensure_records(metric_id, &data.tasks)?;
    let current = query.select(&data.tasks, date_field);
    let previous = query.select_previous(&data.tasks, date_field);
    Ok((current, previous))
}

/// Filtered current-state slice for non-task metrics.
fn state_selection(metric_id: &str, records: &[Value], query: &MetricQuery) -> Result<Vec<Value>> {
    ensure_records(metric_id, records)?;
    Ok(apply_filters(records, query.get_filters()))
}

// ── Performance ────────────────────────────────────────────────────

fn completion_pct(tasks: &[Value]) -> (usize, f64) {
    let completed = count_where(tasks, |t| has_status(t, COMPLETED));
    (completed, share(completed, tasks.len()))
}

fn completion_rate(data: &Dataset, query: &MetricQuery) -> Result<MetricValue> {
    let (tasks, previous) = task_selection("completion_rate", data, query, DEFAULT_DATE_FIELD)?;
    let (completed, pct) = completion_pct(&tasks);
    let label = format!("{completed}/{} tasks completed", tasks.len());
    let comparison = comparison_label(query);
    let prev = previous.map(|p| completion_pct(&p).1);
    Ok(metric_value(pct, label, prev.map(|p| (p, comparison.as_str()))))
}

fn on_time_delivery(data: &Dataset, query: &MetricQuery) -> Result<MetricValue> {
    let (tasks, _) = task_selection("on_time_delivery", data, query, DEFAULT_DATE_FIELD)?;
    let due_and_done: Vec<(DateTime<Utc>, DateTime<Utc>)> = tasks
        .iter()
        .filter(|t| has_status(t, COMPLETED))
        .filter_map(|t| Some((date_of(t, COMPLETED_AT)?, date_of(t, "dueDate")?)))
        .collect();
    if due_and_done.is_empty() {
        return Ok(metric_value(100.0, "No completed tasks with due dates", None));
    }
    let on_time = due_and_done
        .iter()
        .filter(|(done, due)| *done <= end_of_day(*due))
        .count();
    let label = format!("{on_time}/{} delivered on time", due_and_done.len());
    Ok(metric_value(share(on_time, due_and_done.len()), label, None))
}

/// Days covered by `dates`, at least one.
fn span_days(dates: impl Iterator<Item = DateTime<Utc>>) -> f64 {
    let (min, max) = dates.fold((None, None), |(min, max): (Option<DateTime<Utc>>, Option<DateTime<Utc>>), d| {
        (Some(min.map_or(d, |m| m.min(d))), Some(max.map_or(d, |m| m.max(d))))
    });
    match (min, max) {
        (Some(min), Some(max)) => ((max - min).num_milliseconds() as f64 / 86_400_000.0).max(1.0),
        _ => 1.0,
    }
}

fn weekly_rate(completed: &[Value], window_days: Option<f64>) -> f64 {
    let days = window_days
        .unwrap_or_else(|| span_days(completed.iter().filter_map(|t| date_of(t, COMPLETED_AT))));
    round1(completed.len() as f64 / (days / 7.0))
}

fn velocity(data: &Dataset, query: &MetricQuery) -> Result<MetricValue> {
    let query = match query.get_time_range() {
        Some(_) => query.clone(),
        None => query.clone().time_range(TimeRange::Last30Days),
    };
    let (tasks, previous) = task_selection("velocity", data, &query, COMPLETED_AT)?;
    let completed: Vec<Value> = tasks.into_iter().filter(|t| has_status(t, COMPLETED)).collect();
    let window_days = query.window_days();
    let rate = weekly_rate(&completed, window_days);
    let label = match window_days {
        Some(days) => format!("{} tasks completed in {} days", completed.len(), days.round()),
        None => format!("{} tasks completed", completed.len()),
    };
    let comparison = comparison_label(&query);
    let prev = previous.map(|p| {
        let done: Vec<Value> = p.into_iter().filter(|t| has_status(t, COMPLETED)).collect();
        weekly_rate(&done, window_days)
    });
    Ok(metric_value(rate, label, prev.map(|p| (p, comparison.as_str()))))
}

fn blocked_tasks(data: &Dataset, query: &MetricQuery) -> Result<MetricValue> {
    let (tasks, _) = task_selection("blocked_tasks", data, query, DEFAULT_DATE_FIELD)?;
    let blocked = count_where(&tasks, |t| has_status(t, BLOCKED));
    let label = match blocked {
        0 => "No blocked tasks".to_string(),
        1 => "1 blocked task".to_string(),
        n => format!("{n} blocked tasks"),
    };
    Ok(metric_value(blocked as f64, label, None))
}

// ── Operations ─────────────────────────────────────────────────────

fn site_uptime(data: &Dataset, query: &MetricQuery) -> Result<MetricValue> {
    let sites = state_selection("site_uptime", &data.sites, query)?;
    if sites.is_empty() {
        return Ok(metric_value(0.0, "No sites reporting", None));
    }
    let online = count_where(&sites, |s| has_status(s, "online"));
    let label = format!("{online}/{} sites online", sites.len());
    Ok(metric_value(share(online, sites.len()), label, None))
}

fn avg_health_score(data: &Dataset, query: &MetricQuery) -> Result<MetricValue> {
    let sites = state_selection("avg_health_score", &data.sites, query)?;
    let reporting: Vec<Value> = sites
        .into_iter()
        .filter(|s| get_field_value(s, "healthScore").is_some_and(|v| !v.is_null()))
        .collect();
    if reporting.is_empty() {
        return Ok(metric_value(0.0, "No health data", None));
    }
    let mean = aggregate(&extract_numbers(&reporting, "healthScore"), AggregationKind::Average);
    Ok(metric_value(round1(mean), format!("Across {} sites", reporting.len()), None))
}

fn low_battery_sites(data: &Dataset, query: &MetricQuery) -> Result<MetricValue> {
    let sites = state_selection("low_battery_sites", &data.sites, query)?;
    let low = count_where(&sites, |s| {
        get_field_value(s, "batteryLevel")
            .and_then(Value::as_f64)
            .is_some_and(|level| level < LOW_BATTERY_THRESHOLD)
    });
    let label = format!("{low} sites below {LOW_BATTERY_THRESHOLD}% battery");
    Ok(metric_value(low as f64, label, None))
}

// ── Compliance ─────────────────────────────────────────────────────

fn compliance_rate(data: &Dataset, query: &MetricQuery) -> Result<MetricValue> {
    let sites = state_selection("compliance_rate", &data.sites, query)?;
    if sites.is_empty() {
        return Ok(metric_value(0.0, "No sites reporting", None));
    }
    let compliant = count_where(&sites, |s| field_str(s, "complianceStatus") == Some("compliant"));
    let label = format!("{compliant}/{} sites compliant", sites.len());
    Ok(metric_value(share(compliant, sites.len()), label, None))
}

fn documentation_completeness(data: &Dataset, query: &MetricQuery) -> Result<MetricValue> {
    let docs = state_selection("documentation_completeness", &data.documents, query)?;
    if docs.is_empty() {
        return Ok(metric_value(0.0, "No documents", None));
    }
    let approved = count_where(&docs, |d| has_status(d, "approved"));
    let label = format!("{approved}/{} documents approved", docs.len());
    Ok(metric_value(share(approved, docs.len()), label, None))
}

// ── Financial ──────────────────────────────────────────────────────

fn budget_adherence(data: &Dataset, query: &MetricQuery) -> Result<MetricValue> {
    let (tasks, _) = task_selection("budget_adherence", data, query, DEFAULT_DATE_FIELD)?;
    let budgeted: Vec<&Value> = tasks.iter().filter(|t| field_number(t, "budget") > 0.0).collect();
    if budgeted.is_empty() {
        return Ok(metric_value(100.0, "No budgeted tasks", None));
    }
    let within = budgeted
        .iter()
        .filter(|t| field_number(t, "actualCost") <= field_number(t, "budget"))
        .count();
    let label = format!("{within}/{} tasks within budget", budgeted.len());
    Ok(metric_value(share(within, budgeted.len()), label, None))
}

fn labor_hours(tasks: &[Value]) -> f64 {
    round1(aggregate(&extract_numbers(tasks, "actualHours"), AggregationKind::Sum))
}

fn total_labor_hours(data: &Dataset, query: &MetricQuery) -> Result<MetricValue> {
    let (tasks, previous) = task_selection("total_labor_hours", data, query, DEFAULT_DATE_FIELD)?;
    let hours = labor_hours(&tasks);
    let label = format!("{hours} hours logged across {} tasks", tasks.len());
    let comparison = comparison_label(query);
    let prev = previous.map(|p| labor_hours(&p));
    Ok(metric_value(hours, label, prev.map(|p| (p, comparison.as_str()))))
}

fn cost_efficiency(data: &Dataset, query: &MetricQuery) -> Result<MetricValue> {
    let (tasks, _) = task_selection("cost_efficiency", data, query, DEFAULT_DATE_FIELD)?;
    let estimated = aggregate(&extract_numbers(&tasks, "estimatedHours"), AggregationKind::Sum);
    let actual = aggregate(&extract_numbers(&tasks, "actualHours"), AggregationKind::Sum);
    if actual == 0.0 {
        return Ok(metric_value("N/A", "No hours logged", None));
    }
    let label = format!("{}h estimated vs {}h actual", round1(estimated), round1(actual));
    Ok(metric_value(round1(estimated / actual * 100.0), label, None))
}

// ── Team ───────────────────────────────────────────────────────────

fn team_utilization(data: &Dataset, query: &MetricQuery) -> Result<MetricValue> {
    let users = state_selection("team_utilization", &data.users, query)?;
    ensure_records("team_utilization", &data.tasks)?;
    let active: Vec<&Value> = users.iter().filter(|u| has_status(u, "active")).collect();
    if active.is_empty() {
        return Ok(metric_value(0.0, "No active members", None));
    }
    let open_tasks: Vec<&Value> = data
        .tasks
        .iter()
        .filter(|t| !has_status(t, COMPLETED))
        .collect();
    let mut capacity = 0.0;
    let mut load = 0.0;
    for user in &active {
        let weekly = field_number(user, "weeklyCapacity");
        capacity += if weekly > 0.0 { weekly } else { DEFAULT_WEEKLY_CAPACITY };
        if let Some(id) = get_field_value(user, "id") {
            load += open_tasks
                .iter()
                .filter(|t| get_field_value(t, "assigneeId").is_some_and(|a| strict_eq(a, id)))
                .map(|t| field_number(t, "estimatedHours"))
                .sum::<f64>();
        }
    }
    let label = format!("{}h of {}h capacity", round1(load), round1(capacity));
    Ok(metric_value(round1(calculate_percentage(load, capacity)), label, None))
}

fn active_members(data: &Dataset, query: &MetricQuery) -> Result<MetricValue> {
    let users = state_selection("active_members", &data.users, query)?;
    let active = count_where(&users, |u| has_status(u, "active"));
    let label = format!("{active} of {} members active", users.len());
    Ok(metric_value(active as f64, label, None))
}

// ── Resources ──────────────────────────────────────────────────────

fn resource_utilization(data: &Dataset, query: &MetricQuery) -> Result<MetricValue> {
    let resources = state_selection("resource_utilization", &data.resources, query)?;
    if resources.is_empty() {
        return Ok(metric_value(0.0, "No resources", None));
    }
    let in_use = count_where(&resources, |r| has_status(r, "in_use"));
    let label = format!("{in_use}/{} resources in use", resources.len());
    Ok(metric_value(share(in_use, resources.len()), label, None))
}

fn available_resources(data: &Dataset, query: &MetricQuery) -> Result<MetricValue> {
    let resources = state_selection("available_resources", &data.resources, query)?;
    let available = count_where(&resources, |r| has_status(r, "available"));
    let label = format!("{available} of {} resources available", resources.len());
    Ok(metric_value(available as f64, label, None))
}

//! Built-in tasks shipped with the binary.
//!
//! `synthetic_sine` needs no hardware and is handy for checking the data path end to
//! end. `poll_query` repeatedly sends one query to one instrument and plots the numeric
//! answer against elapsed time.

use super::{Task, TaskContext, Tasks};
use crate::data::chart::{ChartConfig, ChartData};
use crate::data::series::{Axis, AxisMeta};
use crate::data::transform::{as_number, Transform};
use crate::error::{AppResult, LabError};
use serde_json::{json, Value};
use std::f64::consts::TAU;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Name of the sine demo task.
pub const SYNTHETIC_SINE: &str = "synthetic_sine";
/// Name of the polling task.
pub const POLL_QUERY: &str = "poll_query";

/// Every built-in task, with default parameters.
pub fn builtin_tasks() -> Vec<Task> {
    vec![synthetic_sine(), poll_query()]
}

/// Register every built-in task.
pub fn register_builtin(tasks: &mut Tasks) -> AppResult<()> {
    for task in builtin_tasks() {
        tasks.add_task(task)?;
    }
    Ok(())
}

/// Formula reading a numeric field of an object sample.
fn field(name: &'static str) -> Transform {
    Transform::formula(move |value: &Value| match value.get(name) {
        Some(v) => as_number(v),
        None => Err(LabError::Transform(format!(
            "sample {} has no field '{}'",
            value, name
        ))),
    })
}

/// `period_s`, `amplitude`, `interval_ms`, and `points` (sample cap, 0 = none).
pub fn synthetic_sine() -> Task {
    Task::new(SYNTHETIC_SINE, run_synthetic_sine)
        .with_description("Sine wave sampled on a timer; no instruments needed")
        .with_parameter("period_s", "1.0")
        .with_parameter("amplitude", "1.0")
        .with_parameter("interval_ms", "50")
        .with_parameter("points", "0")
}

fn run_synthetic_sine(ctx: &TaskContext) -> anyhow::Result<()> {
    let params = ctx.parameters();
    let period = params.get_f64_or("period_s", 1.0)?;
    let amplitude = params.get_f64_or("amplitude", 1.0)?;
    let interval = Duration::from_millis(params.get_u64_or("interval_ms", 50)?);
    let points = params.get_u64_or("points", 0)? as usize;
    if period <= 0.0 {
        anyhow::bail!("period_s must be positive, got {}", period);
    }

    let chart = ctx.add_chart(
        ChartData::new("sine", AxisMeta::new("time", "s"), AxisMeta::new("signal", "V"))
            .with_config(ChartConfig {
                sample_points_x: points,
                sample_points_y: points,
                ..Default::default()
            }),
        field("t"),
        field("v"),
    );
    info!(task = %ctx.name(), period, amplitude, points, "Generating sine");

    let start = Instant::now();
    loop {
        let t = start.elapsed().as_secs_f64();
        let sample = json!({ "t": t, "v": amplitude * (TAU * t / period).sin() });
        chart.push_raw(Axis::X, sample.clone());
        chart.push_raw(Axis::Y, sample);
        if ctx.sleep(interval) {
            break;
        }
    }
    Ok(())
}

/// `alias` (required), `command`, `interval_ms`. Failed reads are recorded as NaN.
pub fn poll_query() -> Task {
    Task::new(POLL_QUERY, run_poll_query)
        .with_description("Send one query on a timer and plot the numeric reply")
        .with_parameter("alias", "")
        .with_parameter("command", "READ?")
        .with_parameter("interval_ms", "1000")
}

fn run_poll_query(ctx: &TaskContext) -> anyhow::Result<()> {
    let params = ctx.parameters();
    let alias = params.get_or("alias", "").trim().to_string();
    if alias.is_empty() {
        anyhow::bail!("parameter 'alias' is required");
    }
    let command = params.get_or("command", "READ?").to_string();
    let interval = Duration::from_millis(params.get_u64_or("interval_ms", 1000)?);

    let instrument = ctx.require_instrument(&alias)?;
    let chart = ctx.add_chart(
        ChartData::new(
            format!("poll_{}", alias),
            AxisMeta::new("time", "s"),
            AxisMeta::new(command.clone(), ""),
        ),
        Transform::None,
        Transform::None,
    );
    info!(task = %ctx.name(), alias = %alias, resource = %instrument.resource(), command = %command, "Polling");

    let start = Instant::now();
    loop {
        let value = match instrument.query_f64(&command) {
            Ok(v) => v,
            Err(e) => {
                warn!(task = %ctx.name(), alias = %alias, error = %e, "Query failed");
                f64::NAN
            }
        };
        chart.push_point(start.elapsed().as_secs_f64(), value);
        if ctx.sleep(interval) {
            break;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn field_formula_reads_object_samples() {
        let t = field("v");
        assert_eq!(t.apply(&json!({"t": 0.1, "v": 2.5})).unwrap(), 2.5);
        assert!(t.apply(&json!({"t": 0.1})).is_err());
        assert!(t.apply(&json!(3.0)).is_err());
    }

    #[test]
    fn builtins_have_unique_names_and_defaults() {
        let tasks = builtin_tasks();
        let names: Vec<_> = tasks.iter().map(|t| t.name().to_string()).collect();
        assert_eq!(names, vec![SYNTHETIC_SINE, POLL_QUERY]);
        assert_eq!(tasks[1].parameters().get("command"), Some("READ?"));
        assert!(tasks.iter().all(|t| t.instrument_aliases().is_empty()));
    }
}

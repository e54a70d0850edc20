//! Chart files as other tools read them.

use lab_automation::data::chart::{Chart, ChartConfig, ChartData};
use lab_automation::data::series::{Axis, AxisMeta, Scale};
use lab_automation::data::storage::load_chart;
use lab_automation::data::transform::Transform;
use serde_json::{json, Value};

fn iv_chart(config: ChartConfig) -> Chart {
    Chart::with_transforms(
        ChartData::new(
            "iv",
            AxisMeta::new("voltage", "V"),
            AxisMeta::new("current", "A").with_scale(Scale::Log),
        )
        .with_config(config),
        Transform::Linear {
            gain: 1.0,
            offset: 0.0,
        },
        Transform::formula(|v: &Value| match v {
            Value::Null => Ok(f64::NAN),
            other => other
                .as_f64()
                .ok_or_else(|| lab_automation::error::LabError::Transform("bad".into())),
        }),
    )
}

#[test]
fn saved_chart_reads_back_with_nan_and_raw() {
    let dir = tempfile::tempdir().unwrap();
    let chart = iv_chart(ChartConfig::default());
    for (v, i) in [(json!(0.0), json!(0.5)), (json!(0.1), Value::Null), (json!(0.2), json!(2.0))] {
        chart.push_raw(Axis::X, v);
        chart.push_raw(Axis::Y, i);
    }
    chart.apply_transforms().unwrap();

    let path = dir.path().join("iv.json");
    chart.save_json(&path, true).unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    let doc: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(doc["schema_version"], 1);
    assert_eq!(doc["y"]["processed"], json!([0.5, null, 2.0]));
    assert_eq!(doc["y"]["meta"]["scale"], "log");
    assert_eq!(doc["x"]["raw"], json!([0.0, 0.1, 0.2]));

    let record = load_chart(&path).unwrap();
    let restored = ChartData::from_record(record);
    assert_eq!(restored.name, "iv");
    assert_eq!(restored.y_series.processed.len(), 3);
    assert!(restored.y_series.processed[1].is_nan());
    assert_eq!(restored.x_series.processed, vec![0.0, 0.1, 0.2]);
}

#[test]
fn raw_is_left_out_when_chart_forbids_it() {
    let dir = tempfile::tempdir().unwrap();
    let chart = iv_chart(ChartConfig {
        include_raw_on_save: false,
        atomic_save: false,
        ..Default::default()
    });
    chart.push_raw(Axis::X, 1.0);
    chart.push_raw(Axis::Y, 1.0);
    chart.apply_transforms().unwrap();

    let path = dir.path().join("nested").join("iv.json");
    chart.save_json(&path, true).unwrap();

    let doc: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert!(doc["x"].get("raw").is_none());
    assert!(doc["y"].get("raw").is_none());
    assert_eq!(doc["config"]["atomic_save"], false);
}

#[test]
fn atomic_save_replaces_previous_file_completely() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("iv.json");
    std::fs::write(&path, "x".repeat(10_000)).unwrap();

    let chart = iv_chart(ChartConfig::default());
    chart.push_point(1.0, 1.0);
    chart.save_json_atomic(&path, false).unwrap();

    let record = load_chart(&path).unwrap();
    assert_eq!(record.x.processed, vec![1.0]);
    assert!(record.x.raw.is_none());
    let leftovers = std::fs::read_dir(dir.path()).unwrap().count();
    assert_eq!(leftovers, 1);
}

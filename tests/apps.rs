use std::fs;

use serde_json::{Value, json};

use tagpool::apps::{run_aggregate_results, run_associations, run_qc_decide};

fn args(values: &[&str]) -> impl Iterator<Item = String> {
    values
        .iter()
        .map(|value| value.to_string())
        .collect::<Vec<_>>()
        .into_iter()
}

#[test]
fn aggregate_runner_writes_pooled_and_bypassed_records() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("results.json");
    let exclude = dir.path().join("exclude.json");
    let output = dir.path().join("pooled.json");
    fs::write(
        &input,
        json!([
            {"tags": {"sub": "01", "task": "rest"}, "vals": {"fd_mean": 0.1}},
            {"tags": {"sub": "02", "task": "rest"}, "vals": {"fd_mean": 0.3}},
            {"tags": {"sub": "03", "task": "rest"}, "vals": {"fd_mean": 0.5}},
            {"tags": {"sub": "04", "task": "nback"}, "vals": {"fd_mean": 0.2}}
        ])
        .to_string(),
    )
    .unwrap();
    fs::write(&exclude, json!([{"sub": "03", "rating": "bad"}]).to_string()).unwrap();

    run_aggregate_results(args(&[
        "--input",
        input.to_str().unwrap(),
        "--across",
        "sub",
        "--exclude-file",
        exclude.to_str().unwrap(),
        "--output",
        output.to_str().unwrap(),
    ]))
    .unwrap();

    let written: Value = serde_json::from_str(&fs::read_to_string(&output).unwrap()).unwrap();
    let aggregated = written["aggregated"].as_array().unwrap();
    let bypass = written["bypass"].as_array().unwrap();
    assert_eq!(aggregated.len(), 1);
    assert_eq!(aggregated[0]["tags"]["sub"], json!(["01", "02"]));
    assert_eq!(aggregated[0]["tags"]["task"], json!("rest"));
    assert_eq!(bypass.len(), 1);
    assert_eq!(bypass[0]["tags"]["sub"], json!("04"));
}

#[test]
fn aggregate_runner_rejects_unknown_record_fields() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("results.json");
    fs::write(&input, json!([{"tags": {"sub": "01"}, "extra": {}}]).to_string()).unwrap();
    let result = run_aggregate_results(args(&["--input", input.to_str().unwrap()]));
    assert!(result.is_err());
}

#[test]
fn decide_runner_accepts_glob_patterns() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("exclude-a.json"),
        json!([{"sub": "01", "rating": "bad"}]).to_string(),
    )
    .unwrap();
    let pattern = dir.path().join("exclude-*.json");
    run_qc_decide(args(&[
        "--exclude-file",
        pattern.to_str().unwrap(),
        "--tag",
        "sub=01",
        "--strict",
    ]))
    .unwrap();

    let missing = dir.path().join("missing.json");
    let result = run_qc_decide(args(&["--exclude-file", missing.to_str().unwrap()]));
    assert!(result.is_err());
}

#[test]
fn associations_runner_requires_known_record() {
    let dir = tempfile::tempdir().unwrap();
    let records = dir.path().join("records.json");
    fs::write(
        &records,
        json!({
            "bold.nii": {"sub": "sub-01", "datatype": "func", "task": "rest"},
            "t1w.nii": {"sub": "01", "datatype": "anat"}
        })
        .to_string(),
    )
    .unwrap();

    run_associations(args(&[
        "--records",
        records.to_str().unwrap(),
        "--record",
        "bold.nii",
        "--filter",
        "datatype=anat",
    ]))
    .unwrap();

    let result = run_associations(args(&[
        "--records",
        records.to_str().unwrap(),
        "--record",
        "missing.nii",
    ]));
    assert!(result.is_err());
}

use anyhow::Context as _;
use axum::http::StatusCode;
use serde_json::Value;

pub fn assert_status(actual: StatusCode, expected: StatusCode, context: &str) {
    assert_eq!(actual, expected, "unexpected status for {context}");
}

/// Assert that a response is a Bundle whose `total` matches its entries
pub fn assert_consistent_bundle(value: &Value) -> anyhow::Result<&Vec<Value>> {
    assert_eq!(
        value.get("resourceType").and_then(|v| v.as_str()),
        Some("Bundle"),
        "expected Bundle resource type"
    );
    let entries = get_bundle_entries(value)?;
    assert_eq!(
        value.get("total").and_then(|v| v.as_u64()),
        Some(entries.len() as u64),
        "Bundle.total must equal the number of entries"
    );
    Ok(entries)
}

pub fn get_bundle_entries(bundle: &Value) -> anyhow::Result<&Vec<Value>> {
    bundle
        .get("entry")
        .and_then(|v| v.as_array())
        .context("Bundle.entry is array")
}

/// `valueString`s of the drug class extensions on a medication resource
pub fn drug_class_labels(resource: &Value) -> Vec<String> {
    resource["medicationCodeableConcept"]["extension"]
        .as_array()
        .map(|extensions| {
            extensions
                .iter()
                .filter(|ext| ext["url"] == "http://cosri.org/fhir/drug_class")
                .filter_map(|ext| ext["valueString"].as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

use serde_json::{json, Value};
use wiremock::ResponseTemplate;

pub const RXNORM: &str = "http://www.nlm.nih.gov/research/umls/rxnorm";

pub fn bundle(resources: Vec<Value>) -> Value {
    json!({
        "resourceType": "Bundle",
        "type": "searchset",
        "total": resources.len(),
        "entry": resources
            .into_iter()
            .map(|resource| json!({"resource": resource}))
            .collect::<Vec<_>>()
    })
}

/// Medication resource coded with SNOMED only, so it is never annotated.
pub fn uncoded_medication(resource_type: &str, id: &str) -> Value {
    json!({
        "resourceType": resource_type,
        "id": id,
        "status": "active",
        "medicationCodeableConcept": {
            "text": "Unlisted compound",
            "coding": [{"system": "http://snomed.info/sct", "code": "00000"}]
        }
    })
}

pub fn rxnorm_medication(resource_type: &str, id: &str, rxcui: &str) -> Value {
    json!({
        "resourceType": resource_type,
        "id": id,
        "status": "active",
        "medicationCodeableConcept": {
            "text": "clonazepam 0.5 MG Oral Tablet",
            "coding": [{"system": RXNORM, "code": rxcui, "display": "clonazepam 0.5 MG Oral Tablet"}]
        }
    })
}

pub fn patient(id: &str) -> Value {
    json!({
        "resourceType": "Patient",
        "id": id,
        "name": [{"use": "official", "family": "Shepard", "given": ["Alice"]}],
        "birthDate": "1971-03-02"
    })
}

/// RxNav `class/byRxcui.json` body listing `class_ids` in order.
pub fn class_response(rxcui: &str, class_ids: &[&str]) -> Value {
    let infos: Vec<Value> = class_ids
        .iter()
        .map(|id| {
            json!({
                "minConcept": {"rxcui": rxcui, "name": "clonazepam 0.5 MG Oral Tablet", "tty": "SCD"},
                "rxclassMinConceptItem": {"classId": id, "className": "Benzodiazepine", "classType": "EPC"},
                "rela": "has_epc",
                "relaSource": "DAILYMED"
            })
        })
        .collect();
    json!({"rxclassDrugInfoList": {"rxclassDrugInfo": infos}})
}

pub fn json_response(body: &Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(body)
}

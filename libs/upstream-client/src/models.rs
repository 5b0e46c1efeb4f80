//! Data models for the RxNav `class/byRxcui` API

use serde::{Deserialize, Serialize};

/// Top-level `class/byRxcui.json` response.
///
/// RxNav answers `{}` when a concept has no classes, so the list is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassByRxcuiResponse {
    #[serde(default)]
    pub rxclass_drug_info_list: Option<RxclassDrugInfoList>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RxclassDrugInfoList {
    #[serde(default)]
    pub rxclass_drug_info: Vec<RxclassDrugInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RxclassDrugInfo {
    #[serde(default)]
    pub min_concept: Option<MinConcept>,
    pub rxclass_min_concept_item: ClassConcept,
    #[serde(default)]
    pub rela: Option<String>,
    #[serde(default)]
    pub rela_source: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MinConcept {
    pub rxcui: Option<String>,
    pub name: Option<String>,
    pub tty: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassConcept {
    pub class_id: String,
    #[serde(default)]
    pub class_name: Option<String>,
    #[serde(default)]
    pub class_type: Option<String>,
}

impl ClassByRxcuiResponse {
    /// Class concepts in response order (duplicates kept).
    pub fn classes(&self) -> Vec<ClassConcept> {
        self.rxclass_drug_info_list
            .as_ref()
            .map(|list| {
                list.rxclass_drug_info
                    .iter()
                    .map(|info| info.rxclass_min_concept_item.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Query for drug classes of one RxNorm concept
#[derive(Debug, Clone, Default)]
pub struct ClassLookupParams {
    pub rxcui: String,
    pub rela_source: Option<String>,
    pub relas: Option<String>,
}

impl ClassLookupParams {
    pub fn new(rxcui: impl Into<String>) -> Self {
        Self {
            rxcui: rxcui.into(),
            ..Self::default()
        }
    }

    pub fn to_query(&self) -> Vec<(String, String)> {
        let mut query = vec![("rxcui".to_string(), self.rxcui.clone())];
        if let Some(source) = &self.rela_source {
            query.push(("relaSource".to_string(), source.clone()));
        }
        if let Some(relas) = &self.relas {
            query.push(("relas".to_string(), relas.clone()));
        }
        query
    }
}

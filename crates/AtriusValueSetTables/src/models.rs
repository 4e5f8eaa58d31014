//! FHIR ValueSet wire model and the code rows derived from it.
//!
//! Only the parts of the R4 `ValueSet` resource that materialization needs are
//! modelled: identity (`url`, `version`), the `expansion.contains` tree and the
//! enumerated parts of `compose`. Unknown fields are ignored on deserialization
//! so full resources from a terminology server parse as-is.

use serde::{Deserialize, Serialize};

/// A FHIR ValueSet, possibly expanded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueSet {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compose: Option<ValueSetCompose>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expansion: Option<ValueSetExpansion>,
}

/// `ValueSet.compose`: the intensional or extensional definition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueSetCompose {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include: Vec<ConceptSet>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<ConceptSet>,
}

/// `ValueSet.compose.include` / `exclude`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConceptSet {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub concept: Vec<ConceptReference>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filter: Vec<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub value_set: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConceptReference {
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
}

/// `ValueSet.expansion`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueSetExpansion {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub contains: Vec<ExpansionContains>,
}

/// `ValueSet.expansion.contains`, which may nest for hierarchical expansions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExpansionContains {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
    #[serde(rename = "abstract", default, skip_serializing_if = "Option::is_none")]
    pub is_abstract: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub contains: Vec<ExpansionContains>,
}

impl ValueSet {
    /// Builds an already-expanded value set from `(system, code)` pairs.
    pub fn new<I, S, C>(url: impl Into<String>, version: Option<String>, codes: I) -> Self
    where
        I: IntoIterator<Item = (S, C)>,
        S: Into<String>,
        C: Into<String>,
    {
        let contains = codes
            .into_iter()
            .map(|(system, code)| ExpansionContains {
                system: Some(system.into()),
                code: Some(code.into()),
                ..Default::default()
            })
            .collect::<Vec<_>>();

        Self {
            resource_type: Some("ValueSet".to_string()),
            url: Some(url.into()),
            version,
            compose: None,
            expansion: Some(ValueSetExpansion {
                total: Some(contains.len() as u64),
                offset: None,
                contains,
            }),
        }
    }

    pub fn is_expanded(&self) -> bool {
        self.expansion.is_some()
    }

    /// The `(system, code)` pairs of the expansion, flattened depth-first.
    ///
    /// Entries without both a system and a code (grouping headers) are skipped.
    pub fn codes(&self) -> Vec<(&str, &str)> {
        let mut out = Vec::new();
        if let Some(expansion) = &self.expansion {
            collect_codes(&expansion.contains, &mut out);
        }
        out
    }
}

fn collect_codes<'a>(contains: &'a [ExpansionContains], out: &mut Vec<(&'a str, &'a str)>) {
    for entry in contains {
        if let (Some(system), Some(code)) = (entry.system.as_deref(), entry.code.as_deref()) {
            out.push((system, code));
        }
        collect_codes(&entry.contains, out);
    }
}

/// One row of the value set codes table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CodeRow {
    pub valueset_uri: String,
    pub valueset_version: Option<String>,
    pub system: String,
    pub code: String,
}

impl CodeRow {
    pub fn new(
        valueset_uri: impl Into<String>,
        valueset_version: Option<&str>,
        system: impl Into<String>,
        code: impl Into<String>,
    ) -> Self {
        Self {
            valueset_uri: valueset_uri.into(),
            valueset_version: valueset_version.map(str::to_string),
            system: system.into(),
            code: code.into(),
        }
    }
}

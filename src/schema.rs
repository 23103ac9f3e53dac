//! Additive schema reconciliation for destination tables.
//!
//! Schema evolution is strictly additive: the diff only ever reports fields
//! to append, never removals or retypes. Conflicting type changes are left
//! for the warehouse to reject.

use gcp_bigquery_client::model::table_field_schema::TableFieldSchema;

use crate::metadata::ObjectMetadata;

pub const MODE_REQUIRED: &str = "REQUIRED";
pub const MODE_NULLABLE: &str = "NULLABLE";

/// Compute the additions needed to evolve `current` into a superset of
/// `proposed`.
///
/// Fields absent by name from `current` are wholly new. For fields present
/// on both sides, nested fields are reconciled recursively; a nested growth
/// is reported as the existing parent with its nested list extended. A
/// REQUIRED to NULLABLE relaxation is not a material change.
pub fn diff(current: &[TableFieldSchema], proposed: &[TableFieldSchema]) -> Vec<TableFieldSchema> {
    let mut additions = Vec::new();

    for field in proposed {
        let Some(existing) = current.iter().find(|c| c.name == field.name) else {
            additions.push(field.clone());
            continue;
        };
        let (Some(have), Some(want)) = (existing.fields.as_ref(), field.fields.as_ref()) else {
            continue;
        };
        let nested = diff(have, want);
        if !nested.is_empty() {
            let mut grown = existing.clone();
            let mut fields = have.clone();
            fields.extend(nested);
            grown.fields = Some(fields);
            additions.push(grown);
        }
    }

    additions
}

/// Apply additions to a schema: same-name fields are replaced (nested
/// growth), new fields are appended.
pub fn merge_additions(
    current: &[TableFieldSchema],
    additions: &[TableFieldSchema],
) -> Vec<TableFieldSchema> {
    let mut merged = current.to_vec();
    for addition in additions {
        match merged.iter_mut().find(|field| field.name == addition.name) {
            Some(slot) => *slot = addition.clone(),
            None => merged.push(addition.clone()),
        }
    }
    merged
}

/// Prepend the path-derived partition columns to a scratch-table schema.
///
/// These columns are not present in the raw files; the merge query
/// synthesizes their values from the object path.
pub fn with_partition_fields(
    scratch: &[TableFieldSchema],
    meta: &ObjectMetadata,
) -> Vec<TableFieldSchema> {
    let mut fields = Vec::with_capacity(1 + meta.extra_partitions.len() + scratch.len());

    let mut date_field = TableFieldSchema::date(&meta.partition_field);
    date_field.mode = Some(MODE_REQUIRED.to_string());
    fields.push(date_field);

    for (name, _) in &meta.extra_partitions {
        let mut field = TableFieldSchema::string(name);
        field.mode = Some(MODE_REQUIRED.to_string());
        fields.push(field);
    }

    fields.extend(scratch.iter().cloned());
    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::ObjectMetadata;

    fn string_field(name: &str, mode: &str) -> TableFieldSchema {
        let mut field = TableFieldSchema::string(name);
        field.mode = Some(mode.to_string());
        field
    }

    fn record_field(name: &str, nested: Vec<TableFieldSchema>) -> TableFieldSchema {
        let mut field = TableFieldSchema::record(name, nested.clone());
        field.fields = Some(nested);
        field
    }

    #[test]
    fn diff_of_identical_schemas_is_empty() {
        let schema = vec![
            string_field("id", MODE_REQUIRED),
            string_field("name", MODE_NULLABLE),
        ];
        assert!(diff(&schema, &schema).is_empty());
    }

    #[test]
    fn diff_reports_exactly_the_new_field() {
        let current = vec![string_field("id", MODE_REQUIRED)];
        let proposed = vec![
            string_field("id", MODE_REQUIRED),
            string_field("email", MODE_NULLABLE),
        ];

        let additions = diff(&current, &proposed);
        assert_eq!(additions.len(), 1);
        assert_eq!(additions[0].name, "email");
    }

    #[test]
    fn diff_ignores_required_to_nullable_relaxation() {
        let current = vec![string_field("id", MODE_REQUIRED)];
        let proposed = vec![string_field("id", MODE_NULLABLE)];

        assert!(diff(&current, &proposed).is_empty());
    }

    #[test]
    fn diff_never_reports_removals() {
        let current = vec![
            string_field("id", MODE_REQUIRED),
            string_field("name", MODE_NULLABLE),
        ];
        let proposed = vec![string_field("id", MODE_REQUIRED)];

        assert!(diff(&current, &proposed).is_empty());
    }

    #[test]
    fn diff_recurses_into_nested_fields() {
        let current = vec![record_field("meta", vec![string_field("a", MODE_NULLABLE)])];
        let proposed = vec![record_field(
            "meta",
            vec![
                string_field("a", MODE_NULLABLE),
                string_field("b", MODE_NULLABLE),
            ],
        )];

        let additions = diff(&current, &proposed);
        assert_eq!(additions.len(), 1);
        assert_eq!(additions[0].name, "meta");
        let nested = additions[0].fields.as_ref().unwrap();
        assert_eq!(nested.len(), 2);
        assert!(nested.iter().any(|f| f.name == "b"));
    }

    #[test]
    fn merge_replaces_grown_fields_and_appends_new_ones() {
        let current = vec![
            record_field("meta", vec![string_field("a", MODE_NULLABLE)]),
            string_field("id", MODE_REQUIRED),
        ];
        let additions = vec![
            record_field(
                "meta",
                vec![
                    string_field("a", MODE_NULLABLE),
                    string_field("b", MODE_NULLABLE),
                ],
            ),
            string_field("email", MODE_NULLABLE),
        ];

        let merged = merge_additions(&current, &additions);
        assert_eq!(merged.len(), 3);
        assert_eq!(merged[0].fields.as_ref().unwrap().len(), 2);
        assert_eq!(merged[2].name, "email");
    }

    #[test]
    fn partition_fields_are_prepended_in_path_order() {
        let meta =
            ObjectMetadata::parse("ns/v1/d=20240102/os=linux/app=firefox/f.parquet").unwrap();
        let scratch = vec![string_field("payload", MODE_NULLABLE)];

        let synthesized = with_partition_fields(&scratch, &meta);
        let names: Vec<&str> = synthesized.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["d", "os", "app", "payload"]);
        assert_eq!(synthesized[0].mode.as_deref(), Some(MODE_REQUIRED));
        assert_eq!(synthesized[1].mode.as_deref(), Some(MODE_REQUIRED));
    }
}

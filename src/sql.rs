//! SQL builders for the merge and resume queries.

use crate::metadata::ObjectMetadata;

/// SELECT that appends the scratch rows to the destination table, casting
/// the path-derived date into the partition column and adding one literal
/// per extra partition.
pub fn merge_select(scratch_dataset: &str, scratch_table: &str, meta: &ObjectMetadata) -> String {
    let mut items = vec!["SELECT *".to_string()];
    items.push(format!(
        "CAST('{}' AS DATE) AS {}",
        meta.partition_value, meta.partition_field
    ));
    for (field, value) in &meta.extra_partitions {
        items.push(format!("'{value}' AS {field}"));
    }
    format!(
        "{} FROM {}.{}",
        items.join(", "),
        scratch_dataset,
        scratch_table
    )
}

/// GROUP BY over every partition column of the destination table, yielding
/// the partition tuples already materialized. Returns the query and the
/// column names in path order.
pub fn partition_listing(
    dataset: &str,
    table_id: &str,
    meta: &ObjectMetadata,
) -> (String, Vec<String>) {
    let mut columns = vec![meta.partition_field.clone()];
    columns.extend(meta.extra_partitions.iter().map(|(field, _)| field.clone()));
    let list = columns.join(", ");
    let query = format!("SELECT {list} FROM {dataset}.{table_id} GROUP BY {list}");
    (query, columns)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_select_casts_partition_and_adds_literals() {
        let meta = ObjectMetadata::parse("ns/v1/d=20240102/os=linux/f.parquet").unwrap();
        let query = merge_select("tmp", "ns_v1_2024_01_02_ab1cd", &meta);

        assert_eq!(
            query,
            "SELECT *, CAST('2024-01-02' AS DATE) AS d, 'linux' AS os \
             FROM tmp.ns_v1_2024_01_02_ab1cd"
        );
    }

    #[test]
    fn merge_select_without_extra_partitions() {
        let meta = ObjectMetadata::parse("ns/v1/d=2024-01-02/f.parquet").unwrap();
        let query = merge_select("tmp", "scratch", &meta);

        assert_eq!(
            query,
            "SELECT *, CAST('2024-01-02' AS DATE) AS d FROM tmp.scratch"
        );
    }

    #[test]
    fn partition_listing_groups_by_every_partition_column() {
        let meta = ObjectMetadata::parse("ns/v1/d=20240102/os=linux/f.parquet").unwrap();
        let (query, columns) = partition_listing("telemetry", "ns_v1", &meta);

        assert_eq!(
            query,
            "SELECT d, os FROM telemetry.ns_v1 GROUP BY d, os"
        );
        assert_eq!(columns, ["d", "os"]);
    }
}

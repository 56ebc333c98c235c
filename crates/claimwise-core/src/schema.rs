/// Arrow schema definitions for persisted retrieval indexes.
pub mod index {
    use arrow::datatypes::{DataType, Field, Schema};
    use std::sync::Arc;

    /// Name of the vector column.
    pub const EMBEDDING: &str = "embedding";

    /// Schema for one row per indexed node.
    ///
    /// `file_name` and `policy_number` are lifted out of the metadata JSON so
    /// backends with SQL predicates can filter on them directly.
    pub fn node_schema(dim: i32) -> Schema {
        Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new("doc_id", DataType::Utf8, false),
            Field::new("file_name", DataType::Utf8, true),
            Field::new("policy_number", DataType::Utf8, true),
            Field::new("metadata", DataType::Utf8, false),
            Field::new("text", DataType::Utf8, false),
            Field::new(
                EMBEDDING,
                DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float32, true)), dim),
                false,
            ),
        ])
    }

    /// Columns that can be used for exact-match filtering.
    pub const FILTERABLE: &[&str] = &["doc_id", "file_name", "policy_number"];
}

#[cfg(test)]
mod tests {
    use super::index;
    use arrow::datatypes::DataType;

    #[test]
    fn node_schema_has_expected_fields() {
        let schema = index::node_schema(8);
        assert_eq!(schema.fields().len(), 7);
        assert!(schema.field_with_name("policy_number").unwrap().is_nullable());
        match schema.field_with_name(index::EMBEDDING).unwrap().data_type() {
            DataType::FixedSizeList(_, dim) => assert_eq!(*dim, 8),
            other => panic!("unexpected embedding type {other:?}"),
        }
    }

    #[test]
    fn filterable_columns_exist() {
        let schema = index::node_schema(4);
        for col in index::FILTERABLE {
            assert!(schema.field_with_name(col).is_ok(), "missing {col}");
        }
    }
}

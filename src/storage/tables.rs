use redb::TableDefinition;

/// Document records: slash-joined path -> JSON value (msgpack)
pub const DOCUMENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("documents");

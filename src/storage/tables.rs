use redb::TableDefinition;

/// Object records: token -> ObjectRecord (msgpack)
pub const OBJECTS: TableDefinition<&str, &[u8]> = TableDefinition::new("objects");

/// Consolidated payloads for objects that fit in a single chunk: token -> raw bytes
pub const BLOBS: TableDefinition<&str, &[u8]> = TableDefinition::new("blobs");

/// Ordered chunk payloads: (token, sequence) -> raw bytes
pub const CHUNKS: TableDefinition<(&str, u32), &[u8]> = TableDefinition::new("chunks");

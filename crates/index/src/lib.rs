pub mod chunk;
pub mod neo4j_store;
pub mod store;

pub use chunk::Chunk;
pub use neo4j_store::{Neo4jChunkStore, Neo4jStoreConfig};
pub use store::ChunkStore;

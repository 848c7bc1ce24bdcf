pub mod column_reader;
pub mod memory_indexer;
pub mod posting;
pub mod reader_cache;
pub mod segment_reader;
pub mod term_doc_iterator;

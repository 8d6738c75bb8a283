pub mod catalog;
pub mod db;
pub mod summarizer_llm;

pub use catalog::{CatalogClient, CatalogTransport, HttpCatalogTransport};
pub use db::DbAdapter;
pub use summarizer_llm::OpenAiSummarizer;

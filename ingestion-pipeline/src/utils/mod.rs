pub mod document_source;
pub mod file_text_extraction;

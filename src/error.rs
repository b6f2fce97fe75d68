use thiserror::Error;

#[derive(Error, Debug)]
pub enum StatementMapperError {
    #[error("Cannot open document '{path}': {reason}")]
    DocumentOpen { path: String, reason: String },

    #[error("Document '{path}' contains no pages")]
    EmptyDocument { path: String },

    #[error("Workbook '{path}' contains no sheets")]
    EmptyWorkbook { path: String },

    #[error("Invalid ontology definition: {0}")]
    InvalidOntology(String),

    #[error("Spreadsheet error: {0}")]
    SpreadsheetError(#[from] calamine::Error),

    #[error("PDF error: {0}")]
    PdfError(String),

    #[error("Embedding backend error: {0}")]
    EmbeddingError(String),

    #[error("LLM backend error: {0}")]
    LlmError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, StatementMapperError>;

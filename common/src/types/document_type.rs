use serde::{Deserialize, Serialize};

/// Document genre. Selects which prompt guidance block the boundary model
/// receives; it changes what counts as a semantic unit, never the output
/// contract.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    Fiction,
    AcademicPaper,
    TechnicalManual,
    Article,
    Essay,
    NonfictionBook,
}

impl DocumentType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fiction => "fiction",
            Self::AcademicPaper => "academic_paper",
            Self::TechnicalManual => "technical_manual",
            Self::Article => "article",
            Self::Essay => "essay",
            Self::NonfictionBook => "nonfiction_book",
        }
    }
}

use serde::Serialize;

/// Website value recorded when no search result matched the company.
pub const UNMATCHED_WEBSITE: &str = "未找到匹配";

/// One company row read from the input workbook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompanyInput {
    pub name: String,
    pub legal: String,
    /// Absolute sheet row (the header is row 0).
    pub row_index: u32,
}

/// Basic search result from SERP
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
}

impl SearchResult {
    pub fn new(title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Remark {
    Found,
    NotFound,
}

impl Remark {
    pub fn as_str(self) -> &'static str {
        match self {
            Remark::Found => "已找到",
            Remark::NotFound => "未找到官网",
        }
    }
}

/// Enrichment record produced for every processed company.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompanyOutput {
    pub name: String,
    pub legal: String,
    pub website: String,
    /// Unique addresses in discovery order.
    pub emails: Vec<String>,
}

impl CompanyOutput {
    pub fn found(input: &CompanyInput, website: String, emails: Vec<String>) -> Self {
        Self {
            name: input.name.clone(),
            legal: input.legal.clone(),
            website,
            emails,
        }
    }

    pub fn unmatched(input: &CompanyInput) -> Self {
        Self {
            name: input.name.clone(),
            legal: input.legal.clone(),
            website: UNMATCHED_WEBSITE.to_string(),
            emails: Vec::new(),
        }
    }

    pub fn is_found(&self) -> bool {
        !self.website.is_empty() && self.website != UNMATCHED_WEBSITE
    }

    pub fn remark(&self) -> Remark {
        if self.is_found() {
            Remark::Found
        } else {
            Remark::NotFound
        }
    }

    pub fn joined_emails(&self) -> String {
        self.emails.join("; ")
    }
}

/// Input row paired with its output, kept for the final workbook rewrite.
#[derive(Debug, Clone)]
pub struct EnrichedRow {
    pub input: CompanyInput,
    pub output: CompanyOutput,
}

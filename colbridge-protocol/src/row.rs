use crate::error::EngineError;

/// One element pulled from a result stream.
///
/// There is no empty state: a completion is either a row, the end
/// marker or a bare error.
#[derive(Debug, Clone, PartialEq)]
pub enum Row {
    /// Row content, possibly accompanied by an error in
    /// degraded or partial-result scenarios.
    Content {
        content: Vec<u8>,
        error: Option<EngineError>,
    },
    /// End of stream. Never carries an error.
    End,
    /// Error without any row.
    ErrorOnly(EngineError),
}

impl Row {
    #[inline]
    pub fn content(content: impl Into<Vec<u8>>) -> Self {
        Row::Content {
            content: content.into(),
            error: None,
        }
    }

    #[inline]
    pub fn degraded(content: impl Into<Vec<u8>>, error: EngineError) -> Self {
        Row::Content {
            content: content.into(),
            error: Some(error),
        }
    }

    #[inline]
    pub fn error_only(error: EngineError) -> Self {
        Row::ErrorOnly(error)
    }

    #[inline]
    pub fn is_end(&self) -> bool {
        matches!(self, Row::End)
    }

    #[inline]
    pub fn error(&self) -> Option<&EngineError> {
        match self {
            Row::Content { error, .. } => error.as_ref(),
            Row::End => None,
            Row::ErrorOnly(e) => Some(e),
        }
    }
}

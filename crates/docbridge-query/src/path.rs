use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathErrorKind {
    /// The path, or one of its dot-separated segments, is empty.
    EmptyKey,
    /// A segment cannot be stored as a document key (it contains a NUL byte).
    InvalidKey,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct PathError {
    kind: PathErrorKind,
    message: String,
}

impl PathError {
    fn new(kind: PathErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> PathErrorKind {
        self.kind
    }
}

/// A dot-separated location inside a document, such as `address.city`.
///
/// Always has at least one segment and no segment is empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Path {
    segments: Vec<String>,
}

impl Path {
    pub fn from_segments<I, S>(segments: I) -> Result<Self, PathError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments: Vec<String> = segments.into_iter().map(Into::into).collect();
        if segments.is_empty() {
            return Err(PathError::new(
                PathErrorKind::EmptyKey,
                "path must have at least one element",
            ));
        }
        for segment in &segments {
            if segment.is_empty() {
                return Err(PathError::new(
                    PathErrorKind::EmptyKey,
                    "path element must not be empty",
                ));
            }
            if segment.contains('\0') {
                return Err(PathError::new(
                    PathErrorKind::InvalidKey,
                    format!("path element {segment:?} contains a NUL byte"),
                ));
            }
        }
        Ok(Self { segments })
    }

    pub fn is_single(&self) -> bool {
        self.segments.len() == 1
    }
}

impl FromStr for Path {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_segments(s.split('.'))
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("."))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_segment() {
        let path: Path = "name".parse().unwrap();
        assert!(path.is_single());
        assert_eq!(path.to_string(), "name");
    }

    #[test]
    fn dotted_path() {
        let path: Path = "address.geo.lat".parse().unwrap();
        assert!(!path.is_single());
        assert_eq!(path.to_string(), "address.geo.lat");
    }

    #[test]
    fn empty_string_is_empty_key() {
        let err = "".parse::<Path>().unwrap_err();
        assert_eq!(err.kind(), PathErrorKind::EmptyKey);
    }

    #[test]
    fn empty_segments_are_empty_key() {
        for s in [".", "a.", ".a", "a..b"] {
            let err = s.parse::<Path>().unwrap_err();
            assert_eq!(err.kind(), PathErrorKind::EmptyKey, "{s:?}");
        }
    }

    #[test]
    fn nul_byte_is_invalid_key() {
        let err = "a\0b".parse::<Path>().unwrap_err();
        assert_eq!(err.kind(), PathErrorKind::InvalidKey);
        assert!(err.to_string().contains("NUL"));
    }

    #[test]
    fn from_segments_rejects_nothing() {
        let err = Path::from_segments(Vec::<String>::new()).unwrap_err();
        assert_eq!(err.kind(), PathErrorKind::EmptyKey);
    }
}

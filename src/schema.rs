//! Path templates mapping named placeholder values to store paths and back.
//!
//! A template like `/registry/pods/:namespace/:name` is compiled once into a
//! segment list; [`Schema::build`], [`Schema::prefix`] and [`Schema::parse`]
//! are mutually inverse over it.

use std::fmt;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("schema template must start with /: {0}")]
    RelativeTemplate(String),

    #[error("invalid template component: {0:?}")]
    InvalidComponent(String),

    #[error("missing key value for :{0}")]
    MissingKey(String),

    #[error("empty key value for :{0}")]
    EmptyKey(String),

    #[error("extra key values: expected at most {expected}, got {got}")]
    ExtraKeys { expected: usize, got: usize },

    #[error("path {path:?} does not match {schema} at {at:?}")]
    Mismatch { schema: String, path: String, at: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Placeholder(String),
}

/// A compiled path template. Placeholders occur only as full segments, and
/// the template is always absolute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    segments: Vec<Segment>,
}

impl Schema {
    /// Compile a template of the form `/lit/:placeholder/lit`.
    ///
    /// # Errors
    /// Rejects relative templates, empty segments and directory-style
    /// templates ending in `/`.
    pub fn new(template: &str) -> Result<Self, SchemaError> {
        let Some(rest) = template.strip_prefix('/') else {
            return Err(SchemaError::RelativeTemplate(template.to_string()));
        };

        let segments = rest
            .split('/')
            .map(|part| {
                if part.is_empty() {
                    Err(SchemaError::InvalidComponent(part.to_string()))
                } else if let Some(name) = part.strip_prefix(':') {
                    Ok(Segment::Placeholder(name.to_string()))
                } else {
                    Ok(Segment::Literal(part.to_string()))
                }
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Schema { segments })
    }

    /// Placeholder names, in template order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|segment| match segment {
            Segment::Placeholder(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    /// Number of placeholders.
    pub fn key_count(&self) -> usize {
        self.keys().count()
    }

    /// Full path with every placeholder bound.
    ///
    /// # Errors
    /// Missing, empty or extra key values.
    pub fn build(&self, keys: &[&str]) -> Result<String, SchemaError> {
        let path = self.prefix(keys)?;

        // prefix() only leaves a trailing / when it ran out of key values
        if path.ends_with('/') {
            let name = self.keys().nth(keys.len()).unwrap_or_default();
            return Err(SchemaError::MissingKey(name.to_string()));
        }

        Ok(path)
    }

    /// As much of the leading path as the given key values allow.
    ///
    /// With every placeholder bound this is a full node path; with a partial
    /// set it is a directory prefix ending in `/`.
    ///
    /// # Errors
    /// Empty key values (guard against accidentally broad prefixes) and
    /// extra key values beyond the template.
    pub fn prefix(&self, keys: &[&str]) -> Result<String, SchemaError> {
        if keys.len() > self.key_count() {
            return Err(SchemaError::ExtraKeys {
                expected: self.key_count(),
                got: keys.len(),
            });
        }

        let mut keys = keys.iter();
        let mut path = String::new();

        for segment in &self.segments {
            match segment {
                Segment::Literal(literal) => {
                    path.push('/');
                    path.push_str(literal);
                }
                Segment::Placeholder(name) => match keys.next() {
                    Some(value) if value.is_empty() => {
                        return Err(SchemaError::EmptyKey(name.clone()));
                    }
                    Some(value) => {
                        path.push('/');
                        path.push_str(value);
                    }
                    None => {
                        path.push('/');
                        return Ok(path);
                    }
                },
            }
        }

        Ok(path)
    }

    /// Parse placeholder values back out of a full node path.
    ///
    /// Inverse of [`Schema::build`]: literal segments must match exactly.
    pub fn parse(&self, path: &str) -> Result<Vec<String>, SchemaError> {
        let mismatch = |at: &str| SchemaError::Mismatch {
            schema: self.to_string(),
            path: path.to_string(),
            at: at.to_string(),
        };

        let mut parts = path.trim_start_matches('/').split('/');
        let mut keys = Vec::with_capacity(self.key_count());

        for segment in &self.segments {
            let part = parts.next().ok_or_else(|| mismatch(""))?;

            match segment {
                Segment::Literal(literal) if literal == part => {}
                Segment::Literal(_) => return Err(mismatch(part)),
                Segment::Placeholder(_) => keys.push(part.to_string()),
            }
        }

        if let Some(extra) = parts.next() {
            return Err(mismatch(extra));
        }

        Ok(keys)
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for segment in &self.segments {
            match segment {
                Segment::Literal(literal) => write!(f, "/{literal}")?,
                Segment::Placeholder(name) => write!(f, "/:{name}")?,
            }
        }
        Ok(())
    }
}

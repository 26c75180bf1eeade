//! # Field module
//!
//! This module provide field paths and field errors used to describe why an
//! object has been refused, they are rendered the same way as the kubernetes
//! api server does.

use std::fmt::{self, Display, Formatter};

// -----------------------------------------------------------------------------
// Path structure

/// a path to a field of an object, e.g. `spec.topology.broker.replicas`
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct Path {
    segments: Vec<String>,
}

impl Path {
    pub fn new(root: &str) -> Self {
        Self {
            segments: vec![root.to_owned()],
        }
    }

    pub fn child(&self, name: &str) -> Self {
        let mut segments = self.segments.to_owned();
        segments.push(name.to_owned());

        Self { segments }
    }

    pub fn index(&self, index: usize) -> Self {
        let mut segments = self.segments.to_owned();
        match segments.last_mut() {
            Some(last) => last.push_str(&format!("[{}]", index)),
            None => segments.push(format!("[{}]", index)),
        }

        Self { segments }
    }
}

impl Display for Path {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments.join("."))
    }
}

// -----------------------------------------------------------------------------
// ErrorType enumeration

#[derive(PartialEq, Eq, Clone, Copy, Debug, Default)]
pub enum ErrorType {
    #[default]
    Invalid,
    Required,
}

// -----------------------------------------------------------------------------
// FieldError structure

#[derive(PartialEq, Eq, Clone, Debug)]
pub struct FieldError {
    pub type_: ErrorType,
    pub path: Path,
    pub value: String,
    pub detail: String,
}

impl FieldError {
    pub fn invalid<V, D>(path: Path, value: V, detail: D) -> Self
    where
        V: ToString,
        D: ToString,
    {
        Self {
            type_: ErrorType::Invalid,
            path,
            value: value.to_string(),
            detail: detail.to_string(),
        }
    }

    /// a missing field, it carries no value
    pub fn required<D>(path: Path, detail: D) -> Self
    where
        D: ToString,
    {
        Self {
            type_: ErrorType::Required,
            path,
            value: String::new(),
            detail: detail.to_string(),
        }
    }
}

impl Display for FieldError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.type_ {
            ErrorType::Invalid => write!(
                f,
                "{}: Invalid value: {:?}: {}",
                self.path, self.value, self.detail
            ),
            ErrorType::Required => write!(f, "{}: Required value: {}", self.path, self.detail),
        }
    }
}

// -----------------------------------------------------------------------------
// ErrorList structure

#[derive(PartialEq, Eq, Clone, Debug, Default)]
pub struct ErrorList(Vec<FieldError>);

impl ErrorList {
    pub fn push(&mut self, err: FieldError) {
        self.0.push(err);
    }

    pub fn invalid<V, D>(&mut self, path: Path, value: V, detail: D)
    where
        V: ToString,
        D: ToString,
    {
        self.push(FieldError::invalid(path, value, detail));
    }

    pub fn required<D>(&mut self, path: Path, detail: D)
    where
        D: ToString,
    {
        self.push(FieldError::required(path, detail));
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldError> {
        self.0.iter()
    }

    /// returns `Ok` if no field error has been accumulated, an aggregated
    /// [`Invalid`] error otherwise
    pub fn into_result(self, group: &str, kind: &str, name: &str) -> Result<(), Invalid> {
        if self.is_empty() {
            return Ok(());
        }

        Err(Invalid {
            group: group.to_owned(),
            kind: kind.to_owned(),
            name: name.to_owned(),
            errors: self,
        })
    }
}

impl Display for ErrorList {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let errors: Vec<_> = self.0.iter().map(ToString::to_string).collect();
        if errors.len() == 1 {
            return write!(f, "{}", errors.join(""));
        }

        write!(f, "[{}]", errors.join(", "))
    }
}

// -----------------------------------------------------------------------------
// Invalid error

/// an aggregation of field errors refusing an object as a whole
#[derive(thiserror::Error, PartialEq, Eq, Clone, Debug)]
#[error("{kind}.{group} {name:?} is invalid: {errors}")]
pub struct Invalid {
    pub group: String,
    pub kind: String,
    pub name: String,
    pub errors: ErrorList,
}

impl Invalid {
    pub const CODE: u16 = 422;
    pub const REASON: &'static str = "Invalid";
}

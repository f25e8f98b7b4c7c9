//! Composite resource identity.
//!
//! Some remote objects are addressed by several API-level keys (instance,
//! table, index name). The identity joins them into the single opaque string
//! that callers persist between invocations, and splits it back when the
//! describe and delete calls have to be re-derived.

use std::fmt;

use crate::error::IdentityError;

/// Separator between identity components.
pub const SEPARATOR: char = ':';

/// Ordered, non-empty list of key components. Components never contain
/// [`SEPARATOR`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceId(Vec<String>);

impl ResourceId {
    /// Build an identity, rejecting components that contain the separator.
    pub fn new<I, S>(components: I) -> Result<Self, IdentityError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let components: Vec<String> = components.into_iter().map(Into::into).collect();
        if components.is_empty() {
            return Err(IdentityError::NoComponents);
        }
        if let Some((index, component)) = components
            .iter()
            .enumerate()
            .find(|(_, c)| c.contains(SEPARATOR))
        {
            return Err(IdentityError::SeparatorInComponent {
                index,
                component: component.clone(),
                separator: SEPARATOR,
            });
        }
        Ok(Self(components))
    }

    /// Parse a persisted identity that must have exactly `expected` components.
    pub fn decode(id: &str, expected: usize) -> Result<Self, IdentityError> {
        let components: Vec<String> = id.split(SEPARATOR).map(str::to_string).collect();
        if components.len() != expected {
            return Err(IdentityError::ComponentCount {
                id: id.to_string(),
                expected,
                actual: components.len(),
            });
        }
        Ok(Self(components))
    }

    pub fn encode(&self) -> String {
        self.0.join(&SEPARATOR.to_string())
    }

    pub fn components(&self) -> &[String] {
        &self.0
    }

    /// Component at `index`, if present.
    pub fn part(&self, index: usize) -> Option<&str> {
        self.0.get(index).map(String::as_str)
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.encode())
    }
}

/// Join components into an identity string.
pub fn encode<S: AsRef<str>>(components: &[S]) -> Result<String, IdentityError> {
    ResourceId::new(components.iter().map(|c| c.as_ref().to_string())).map(|id| id.encode())
}

/// Split an identity string, validating the component count.
pub fn decode(id: &str, expected: usize) -> Result<Vec<String>, IdentityError> {
    ResourceId::decode(id, expected).map(|id| id.0)
}

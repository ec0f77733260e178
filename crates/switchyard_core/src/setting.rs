//! Explicit-or-unset configuration values.
//!
//! A configuration field is either `Unset` (inherit from the enclosing scope)
//! or `Explicit` (the caller set it, even if the value equals the built-in
//! default). Resolution walks scopes looking at the tag, never at the value.

use serde::{Deserialize, Serialize};

/// A configuration value tagged with whether the caller set it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "value")]
pub enum Setting<T> {
    /// Not set at this level; inherit
    Unset,
    /// Set by the caller
    Explicit(T),
}

impl<T> Setting<T> {
    /// Check if the value was left unset
    #[must_use]
    pub const fn is_unset(&self) -> bool {
        matches!(self, Self::Unset)
    }

    /// Check if the value was set explicitly
    #[must_use]
    pub const fn is_explicit(&self) -> bool {
        matches!(self, Self::Explicit(_))
    }

    /// Borrow the explicit value, if any
    #[must_use]
    pub const fn as_explicit(&self) -> Option<&T> {
        match self {
            Self::Explicit(value) => Some(value),
            Self::Unset => None,
        }
    }

    /// Convert to `Setting<&T>`
    #[must_use]
    pub const fn as_ref(&self) -> Setting<&T> {
        match self {
            Self::Explicit(value) => Setting::Explicit(value),
            Self::Unset => Setting::Unset,
        }
    }

    /// Map the explicit value
    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Setting<U> {
        match self {
            Self::Explicit(value) => Setting::Explicit(f(value)),
            Self::Unset => Setting::Unset,
        }
    }

    /// Keep `self` if explicit, otherwise fall back to `other`
    #[must_use]
    pub fn or(self, other: Self) -> Self {
        match self {
            Self::Explicit(_) => self,
            Self::Unset => other,
        }
    }

    /// Keep `self` if explicit, otherwise compute the fallback
    pub fn or_else<F: FnOnce() -> Self>(self, f: F) -> Self {
        match self {
            Self::Explicit(_) => self,
            Self::Unset => f(),
        }
    }

    /// Explicit value, or `default` when unset
    pub fn unwrap_or(self, default: T) -> T {
        match self {
            Self::Explicit(value) => value,
            Self::Unset => default,
        }
    }

    /// Explicit value, or a computed default when unset
    pub fn unwrap_or_else<F: FnOnce() -> T>(self, f: F) -> T {
        match self {
            Self::Explicit(value) => value,
            Self::Unset => f(),
        }
    }

    /// Convert into an `Option`, losing the distinction between unset and absent
    pub fn into_option(self) -> Option<T> {
        match self {
            Self::Explicit(value) => Some(value),
            Self::Unset => None,
        }
    }
}

// Manual impl so that `T` needs no `Default` bound.
impl<T> Default for Setting<T> {
    fn default() -> Self {
        Self::Unset
    }
}

impl<T> From<T> for Setting<T> {
    fn from(value: T) -> Self {
        Self::Explicit(value)
    }
}

//! `%VARNAME%` placeholder substitution for outbound messages.

use std::collections::HashMap;
use std::ops::Range;

/// Looks up external variable values by name. Enables mock injection for
/// testing.
pub trait VariableResolver: Send + Sync {
    fn resolve(&self, name: &str) -> Option<String>;
}

impl<T: VariableResolver + ?Sized> VariableResolver for &T {
    fn resolve(&self, name: &str) -> Option<String> {
        (**self).resolve(name)
    }
}

/// Resolver backed by a fixed name → value table (the `[variables]` config
/// section).
#[derive(Debug, Clone, Default)]
pub struct MemoryVariables {
    values: HashMap<String, String>,
}

impl MemoryVariables {
    pub fn new(values: HashMap<String, String>) -> Self {
        Self { values }
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), value.into());
    }
}

impl VariableResolver for MemoryVariables {
    fn resolve(&self, name: &str) -> Option<String> {
        self.values.get(name).cloned()
    }
}

/// What happened to the placeholder while rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Substitution {
    /// The message carried no placeholder.
    None,
    /// The placeholder was replaced with the variable's value.
    Applied { name: String },
    /// The variable could not be resolved; the literal text is kept.
    Unresolved { name: String },
}

/// Outbound message after placeholder handling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMessage {
    pub text: String,
    pub substitution: Substitution,
}

/// Locate the first `%NAME%` placeholder.
///
/// Names are non-empty and contain no whitespace. Returns the byte range
/// covering both percent signs plus the name itself.
fn find_placeholder(template: &str) -> Option<(Range<usize>, &str)> {
    // Every `%` may open a placeholder; literal percents before it are skipped.
    template.match_indices('%').find_map(|(start, _)| {
        let rest = &template[start + 1..];
        let len = rest.find('%')?;
        let name = &rest[..len];
        if name.is_empty() || name.chars().any(char::is_whitespace) {
            return None;
        }
        Some((start..start + len + 2, name))
    })
}

/// Substitute the message's placeholder, if any.
///
/// Resolution failure is never fatal: the template is returned unchanged
/// and the outcome says which variable was missing.
pub fn render_message(template: &str, resolver: &dyn VariableResolver) -> RenderedMessage {
    let Some((range, name)) = find_placeholder(template) else {
        return RenderedMessage {
            text: template.to_string(),
            substitution: Substitution::None,
        };
    };

    match resolver.resolve(name) {
        Some(value) => {
            let mut text = String::with_capacity(template.len() + value.len());
            text.push_str(&template[..range.start]);
            text.push_str(&value);
            text.push_str(&template[range.end..]);
            RenderedMessage {
                text,
                substitution: Substitution::Applied {
                    name: name.to_string(),
                },
            }
        }
        None => RenderedMessage {
            text: template.to_string(),
            substitution: Substitution::Unresolved {
                name: name.to_string(),
            },
        },
    }
}

//! Replacement source for a glob directive.

use crate::classify::{js_string, LoadEntry};
use crate::directive::GlobDirective;
use serde::Serialize;

/// Generated output for one directive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GeneratedDirective {
    /// Import declarations to prepend to the module, in match order.
    pub hoisted: Vec<String>,
    /// Object literal replacing the call expression.
    pub expression: String,
}

impl GeneratedDirective {
    /// The directive's hoisted imports as one line (empty when there are none).
    #[must_use]
    pub fn hoisted_line(&self) -> String {
        self.hoisted.join(" ")
    }

    /// Hoisted line followed by the mapping expression.
    #[must_use]
    pub fn replacement_source(&self) -> String {
        if self.hoisted.is_empty() {
            self.expression.clone()
        } else {
            format!("{}\n{}", self.hoisted_line(), self.expression)
        }
    }
}

/// Build the mapping object and hoisted imports for `directive`.
///
/// Keys appear in entry order, which is the match set's specifier order.
#[must_use]
pub fn generate(directive: &GlobDirective, entries: &[LoadEntry]) -> GeneratedDirective {
    let hoisted = entries.iter().filter_map(|e| e.hoisted.clone()).collect();

    let expression = if entries.is_empty() {
        "{}".to_string()
    } else {
        let fields: Vec<String> = entries
            .iter()
            .map(|e| format!("{}: {}", js_string(&e.specifier), e.binding))
            .collect();
        format!("{{{}}}", fields.join(", "))
    };
    // A statement starting with `{` would parse as a block.
    let expression = if directive.side_effect_only {
        format!("({expression})")
    } else {
        expression
    };

    tracing::trace!(
        directive = %directive.id,
        entries = entries.len(),
        "Generated glob mapping"
    );

    GeneratedDirective {
        hoisted,
        expression,
    }
}

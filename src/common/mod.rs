//! Common utilities shared between the engine, the scenario runner and the CLI

pub mod config;
pub mod error;
pub mod logging;
pub mod paths;

pub use error::{Error, Result};

/// Join a list of items into one comma separated message fragment
///
/// Batch operations (a library unload disabling many breakpoints, say)
/// report a single line instead of one per breakpoint.
pub fn coalesce<T: std::fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(|item| item.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coalesce() {
        assert_eq!(coalesce(&[1, 2, 3]), "1, 2, 3");
        assert_eq!(coalesce::<u32>(&[]), "");
    }
}

//! Change classifier: raw CDC operation code → what to do with the row.

use std::fmt;

/// CDC operation codes as written by the capture process.
pub const OP_DELETE: i32 = 1;
pub const OP_INSERT: i32 = 2;
pub const OP_UPDATE: i32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Classification {
    Insert,
    Update,
    Delete,
    /// Intermediate images (e.g. code 3, "before update"). Dropped without
    /// being counted or pruned.
    Ignore,
}

pub fn classify(operation_code: i32) -> Classification {
    match operation_code {
        OP_DELETE => Classification::Delete,
        OP_INSERT => Classification::Insert,
        OP_UPDATE => Classification::Update,
        _ => Classification::Ignore,
    }
}

impl Classification {
    pub fn label(self) -> &'static str {
        match self {
            Classification::Insert => "insert",
            Classification::Update => "update",
            Classification::Delete => "delete",
            Classification::Ignore => "ignore",
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(1, Classification::Delete)]
    #[case(2, Classification::Insert)]
    #[case(3, Classification::Ignore)]
    #[case(4, Classification::Update)]
    #[case(0, Classification::Ignore)]
    #[case(5, Classification::Ignore)]
    #[case(-1, Classification::Ignore)]
    fn classifies_operation_codes(#[case] code: i32, #[case] expected: Classification) {
        assert_eq!(classify(code), expected);
    }

    #[test]
    fn labels_are_lowercase_operation_names() {
        assert_eq!(Classification::Update.to_string(), "update");
    }
}

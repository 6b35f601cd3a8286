use clap::ValueEnum;

use crate::scan::{FieldSpec, MatchResult};

/// Which target field gets translated when a table has both.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum FieldPrecedence {
    /// `COMMENT`, falling back to `_COMMENT`
    #[default]
    CommentFirst,
    /// `_COMMENT`, falling back to `COMMENT`
    UnderscoreFirst,
    /// every target field present
    Both,
}

impl FieldPrecedence {
    /// The target fields of `m` to translate, in catalog order.
    pub fn select<'a>(&self, m: &'a MatchResult) -> Vec<&'a FieldSpec> {
        let pick = |first: &str, second: &str| -> Vec<&'a FieldSpec> {
            m.target(first).or_else(|| m.target(second)).into_iter().collect()
        };
        match self {
            FieldPrecedence::CommentFirst => pick("COMMENT", "_COMMENT"),
            FieldPrecedence::UnderscoreFirst => pick("_COMMENT", "COMMENT"),
            FieldPrecedence::Both => m.target_fields().collect(),
        }
    }
}

/// What to do with values this tool already translated on an earlier run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum RerunPolicy {
    #[default]
    SkipTranslated,
    Retranslate,
}

//! Byte ranges of names within statement text.

/// Where a token or name sits in a statement, as byte offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    /// Exclusive.
    pub end: usize,
}

impl Span {
    /// Smallest span covering both, used to join the parts of `schema.name`.
    pub fn merge(self, other: Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }

    /// The text this span covers in `source`, quoting included.
    pub fn slice<'a>(&self, source: &'a str) -> &'a str {
        &source[self.start..self.end]
    }
}

impl From<std::ops::Range<usize>> for Span {
    fn from(range: std::ops::Range<usize>) -> Self {
        Span {
            start: range.start,
            end: range.end,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::{parse_qualified_name, significant_tokens};

    #[test]
    fn test_qualified_name_span_keeps_quoting() {
        let source = "DROP VIEW [rpt] . [Order Totals];";
        let tokens = significant_tokens(source);
        let name = parse_qualified_name(&tokens, 2).unwrap();
        assert_eq!(name.span.slice(source), "[rpt] . [Order Totals]");
    }

    #[test]
    fn test_merge_is_order_independent() {
        let a = Span::from(7..11);
        let b = Span::from(0..6);
        assert_eq!(a.merge(b), b.merge(a));
        assert_eq!(a.merge(b).slice("CREATE VIEW v"), "CREATE VIEW");
    }
}

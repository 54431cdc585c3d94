//! Parameter serialization strategy selection.
//!
//! [`StyleResolver::resolve`] first rejects combinations that cannot be
//! parsed, then walks [`RULES`] top to bottom; the first rule whose predicate
//! holds picks the strategy. The last rule always matches.

use super::value::{SchemaShape, Separator};
use crate::spec::{ParameterLocation, ParameterStyle};

/// How raw parameter values are turned into a JSON value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// `content` declared instead of `schema`: the value is a JSON document
    Content,
    /// `color[R]=100&color[G]=200`
    DeepObject,
    /// One array item per occurrence (`id=1&id=2`) or per separator
    ExplodedArray,
    /// `;id=1;id=2;id=3`
    ExplodedMatrixArray,
    /// One `key=value` per property (`R=100&G=200`, `;R=100;G=200`, `.R=100.G=200`)
    ExplodedObject,
    /// `R=100,G=200`
    ExplodedSimpleObject,
    /// Single value split on the given separator
    Delimited(Separator),
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Strategy::Content => write!(f, "content"),
            Strategy::DeepObject => write!(f, "deep-object"),
            Strategy::ExplodedArray => write!(f, "exploded-array"),
            Strategy::ExplodedMatrixArray => write!(f, "exploded-matrix-array"),
            Strategy::ExplodedObject => write!(f, "exploded-object"),
            Strategy::ExplodedSimpleObject => write!(f, "exploded-simple-object"),
            Strategy::Delimited(sep) => write!(f, "delimited '{}'", sep.as_char()),
        }
    }
}

/// Everything the rules look at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StyleQuery {
    pub location: ParameterLocation,
    pub style: ParameterStyle,
    pub explode: bool,
    pub shape: SchemaShape,
    pub has_content: bool,
    pub allow_reserved: bool,
}

pub struct Rule {
    pub name: &'static str,
    pub applies: fn(&StyleQuery) -> bool,
    pub strategy: fn(&StyleQuery) -> Strategy,
}

pub const RULES: &[Rule] = &[
    Rule {
        name: "content",
        applies: |q| q.has_content,
        strategy: |_| Strategy::Content,
    },
    Rule {
        name: "deep-object",
        applies: |q| q.style == ParameterStyle::DeepObject,
        strategy: |_| Strategy::DeepObject,
    },
    Rule {
        name: "exploded-array",
        applies: |q| {
            q.shape == SchemaShape::Array
                && q.explode
                && match q.style {
                    ParameterStyle::Form => true,
                    ParameterStyle::Simple => !matches!(
                        q.location,
                        ParameterLocation::Path | ParameterLocation::Header
                    ),
                    ParameterStyle::Label => q.location != ParameterLocation::Path,
                    _ => false,
                }
        },
        strategy: |_| Strategy::ExplodedArray,
    },
    Rule {
        name: "exploded-matrix-array",
        applies: |q| {
            q.style == ParameterStyle::Matrix && q.explode && q.shape == SchemaShape::Array
        },
        strategy: |_| Strategy::ExplodedMatrixArray,
    },
    Rule {
        name: "exploded-object",
        applies: |q| {
            q.shape == SchemaShape::ObjectOrCombinator
                && q.explode
                && matches!(
                    q.style,
                    ParameterStyle::Form | ParameterStyle::Matrix | ParameterStyle::Label
                )
        },
        strategy: |_| Strategy::ExplodedObject,
    },
    Rule {
        name: "exploded-simple-object",
        applies: |q| {
            q.style == ParameterStyle::Simple
                && q.explode
                && q.shape == SchemaShape::ObjectOrCombinator
        },
        strategy: |_| Strategy::ExplodedSimpleObject,
    },
    Rule {
        name: "default",
        applies: |q| !q.has_content,
        strategy: |q| Strategy::Delimited(default_separator(q.style)),
    },
];

fn default_separator(style: ParameterStyle) -> Separator {
    match style {
        ParameterStyle::Label => Separator::Dot,
        ParameterStyle::SpaceDelimited => Separator::Space,
        ParameterStyle::PipeDelimited => Separator::Pipe,
        ParameterStyle::Form
        | ParameterStyle::Simple
        | ParameterStyle::Matrix
        | ParameterStyle::DeepObject => Separator::Comma,
    }
}

fn style_allowed(style: ParameterStyle, location: ParameterLocation) -> bool {
    use ParameterLocation::*;
    match style {
        ParameterStyle::Matrix | ParameterStyle::Label => location == Path,
        ParameterStyle::Form => matches!(location, Query | Cookie),
        ParameterStyle::Simple => matches!(location, Path | Header),
        ParameterStyle::SpaceDelimited | ParameterStyle::PipeDelimited | ParameterStyle::DeepObject => {
            location == Query
        }
    }
}

pub struct StyleResolver;

impl StyleResolver {
    /// `Err` carries the reason the combination is unsupported.
    pub fn resolve(query: &StyleQuery) -> Result<Strategy, String> {
        if query.allow_reserved {
            return Err("allowReserved: true is not supported".to_string());
        }
        if !query.has_content {
            if !style_allowed(query.style, query.location) {
                return Err(format!(
                    "style '{}' is not allowed for {} parameters",
                    query.style, query.location
                ));
            }
            if query.style == ParameterStyle::DeepObject && query.shape != SchemaShape::ObjectOrCombinator {
                return Err("deepObject style requires an object schema".to_string());
            }
            if matches!(query.style, ParameterStyle::SpaceDelimited | ParameterStyle::PipeDelimited)
                && query.shape != SchemaShape::Array
            {
                return Err(format!("{} style requires an array schema", query.style));
            }
        }

        RULES
            .iter()
            .find(|rule| (rule.applies)(query))
            .map(|rule| {
                tracing::trace!(rule = rule.name, "parameter style rule matched");
                (rule.strategy)(query)
            })
            .ok_or_else(|| "no serialization strategy applies".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(location: ParameterLocation, style: ParameterStyle, explode: bool, shape: SchemaShape) -> StyleQuery {
        StyleQuery {
            location,
            style,
            explode,
            shape,
            has_content: false,
            allow_reserved: false,
        }
    }

    use ParameterLocation::*;
    use ParameterStyle::*;
    use SchemaShape::*;

    #[test]
    fn test_strategy_table() {
        let cases = [
            (query(Query, Form, false, Array), Strategy::Delimited(Separator::Comma)),
            (query(Query, Form, true, Array), Strategy::ExplodedArray),
            (query(Query, Form, true, ObjectOrCombinator), Strategy::ExplodedObject),
            (query(Query, Form, false, ObjectOrCombinator), Strategy::Delimited(Separator::Comma)),
            (query(Query, DeepObject, true, ObjectOrCombinator), Strategy::DeepObject),
            (query(Query, SpaceDelimited, false, Array), Strategy::Delimited(Separator::Space)),
            (query(Query, PipeDelimited, false, Array), Strategy::Delimited(Separator::Pipe)),
            (query(Path, Matrix, true, Array), Strategy::ExplodedMatrixArray),
            (query(Path, Matrix, false, Array), Strategy::Delimited(Separator::Comma)),
            (query(Path, Matrix, true, ObjectOrCombinator), Strategy::ExplodedObject),
            (query(Path, Label, true, Array), Strategy::Delimited(Separator::Dot)),
            (query(Path, Label, true, ObjectOrCombinator), Strategy::ExplodedObject),
            (query(Path, Simple, true, Array), Strategy::Delimited(Separator::Comma)),
            (query(Header, Simple, true, ObjectOrCombinator), Strategy::ExplodedSimpleObject),
            (query(Path, Simple, false, Primitive), Strategy::Delimited(Separator::Comma)),
            (query(Cookie, Form, true, Primitive), Strategy::Delimited(Separator::Comma)),
        ];
        for (q, expected) in cases {
            assert_eq!(StyleResolver::resolve(&q), Ok(expected), "{q:?}");
        }
    }

    #[test]
    fn test_content_wins() {
        let mut q = query(Query, Form, true, Array);
        q.has_content = true;
        assert_eq!(StyleResolver::resolve(&q), Ok(Strategy::Content));
    }

    #[test]
    fn test_rejections() {
        let mut reserved = query(Query, Form, true, Primitive);
        reserved.allow_reserved = true;
        assert!(StyleResolver::resolve(&reserved).unwrap_err().contains("allowReserved"));
        assert!(StyleResolver::resolve(&query(Query, Matrix, false, Primitive)).is_err());
        assert!(StyleResolver::resolve(&query(Header, Form, false, Primitive)).is_err());
        assert!(StyleResolver::resolve(&query(Query, Simple, false, Primitive)).is_err());
        assert!(StyleResolver::resolve(&query(Query, DeepObject, true, Array)).is_err());
        assert!(StyleResolver::resolve(&query(Path, DeepObject, true, ObjectOrCombinator)).is_err());
        assert!(StyleResolver::resolve(&query(Query, PipeDelimited, false, Primitive)).is_err());
    }
}

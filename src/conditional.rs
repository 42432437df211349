//! If-Match / If-None-Match evaluation.
//!
//! If-Match is evaluated first and, when present, decides the outcome on its
//! own. If-None-Match is consulted only when If-Match is absent. A matching
//! If-None-Match turns GET/HEAD into 304 and every other method into 412.

use axum::http::{HeaderMap, HeaderName, Method, header};

use crate::etag::ETag;

/// One entry of a conditional header list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityTag {
    pub weak: bool,
    pub opaque: String,
}

/// Parsed value of an If-Match or If-None-Match header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagList {
    /// `*`
    Any,
    Tags(Vec<EntityTag>),
}

impl TagList {
    /// Parse a header value such as `"a", W/"b"` or `*`.
    ///
    /// Unquoted tokens are accepted leniently. An empty or malformed value
    /// yields an empty list, which never matches.
    pub fn parse(raw: &str) -> Self {
        let mut tags = Vec::new();
        let mut rest = raw;

        loop {
            rest = rest.trim_start_matches(|c: char| c == ',' || c.is_whitespace());
            if rest.is_empty() {
                break;
            }

            let (weak, body) = match rest.strip_prefix("W/") {
                Some(stripped) => (true, stripped),
                None => (false, rest),
            };

            if let Some(quoted) = body.strip_prefix('"') {
                let end = quoted.find('"').unwrap_or(quoted.len());
                tags.push(EntityTag {
                    weak,
                    opaque: quoted[..end].to_string(),
                });
                rest = quoted.get(end + 1..).unwrap_or("");
            } else {
                let end = body.find(',').unwrap_or(body.len());
                let token = body[..end].trim();
                if token == "*" && !weak {
                    return TagList::Any;
                }
                tags.push(EntityTag {
                    weak,
                    opaque: token.to_string(),
                });
                rest = &body[end..];
            }
        }

        TagList::Tags(tags)
    }

    /// Strong comparison: both sides must be strong and byte-identical.
    pub fn matches_strong(&self, current: &ETag) -> bool {
        match self {
            TagList::Any => true,
            TagList::Tags(tags) => tags
                .iter()
                .any(|tag| !tag.weak && tag.opaque == current.opaque()),
        }
    }

    /// Weak comparison: the `W/` prefix is ignored.
    pub fn matches_weak(&self, current: &ETag) -> bool {
        match self {
            TagList::Any => true,
            TagList::Tags(tags) => tags.iter().any(|tag| tag.opaque == current.opaque()),
        }
    }
}

/// Result of evaluating the preconditions of one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Proceed,
    NotModified,
    PreconditionFailed,
}

/// The conditional headers carried by a request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Preconditions {
    pub if_match: Option<TagList>,
    pub if_none_match: Option<TagList>,
}

impl Preconditions {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self {
            if_match: collect_header(headers, header::IF_MATCH),
            if_none_match: collect_header(headers, header::IF_NONE_MATCH),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.if_match.is_none() && self.if_none_match.is_none()
    }

    /// Decide whether a request may proceed given the resource's current
    /// tag (`None` when the resource does not exist).
    pub fn evaluate(&self, method: &Method, current: Option<&ETag>) -> Outcome {
        if let Some(if_match) = &self.if_match {
            return match current {
                Some(tag) if if_match.matches_strong(tag) => Outcome::Proceed,
                _ => Outcome::PreconditionFailed,
            };
        }

        if let Some(if_none_match) = &self.if_none_match {
            let matched = current.is_some_and(|tag| if_none_match.matches_weak(tag));
            if matched {
                return if method == Method::GET || method == Method::HEAD {
                    Outcome::NotModified
                } else {
                    Outcome::PreconditionFailed
                };
            }
        }

        Outcome::Proceed
    }
}

/// Join every occurrence of a header into one list. Values that are not
/// valid visible ASCII are dropped.
fn collect_header(headers: &HeaderMap, name: HeaderName) -> Option<TagList> {
    let mut values = headers.get_all(name).iter().peekable();
    values.peek()?;

    let joined = values
        .filter_map(|value| value.to_str().ok())
        .collect::<Vec<_>>()
        .join(",");

    Some(TagList::parse(&joined))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::etag;
    use axum::http::HeaderValue;

    fn tags(raw: &str) -> Option<TagList> {
        Some(TagList::parse(raw))
    }

    fn if_match(raw: &str) -> Preconditions {
        Preconditions {
            if_match: tags(raw),
            if_none_match: None,
        }
    }

    fn if_none_match(raw: &str) -> Preconditions {
        Preconditions {
            if_match: None,
            if_none_match: tags(raw),
        }
    }

    #[test]
    fn test_parse_wildcard() {
        assert_eq!(TagList::parse("*"), TagList::Any);
        assert_eq!(TagList::parse("  * "), TagList::Any);
    }

    #[test]
    fn test_parse_list_with_weak_tags() {
        let parsed = TagList::parse(r#""abc", W/"def" ,"g,h""#);
        assert_eq!(
            parsed,
            TagList::Tags(vec![
                EntityTag {
                    weak: false,
                    opaque: "abc".into()
                },
                EntityTag {
                    weak: true,
                    opaque: "def".into()
                },
                EntityTag {
                    weak: false,
                    opaque: "g,h".into()
                },
            ])
        );
    }

    #[test]
    fn test_parse_unquoted_tokens() {
        let parsed = TagList::parse("abc, def");
        assert_eq!(
            parsed,
            TagList::Tags(vec![
                EntityTag {
                    weak: false,
                    opaque: "abc".into()
                },
                EntityTag {
                    weak: false,
                    opaque: "def".into()
                },
            ])
        );
    }

    #[test]
    fn test_parse_empty_never_matches() {
        let current = etag::compute(b"x");
        let parsed = TagList::parse("");
        assert_eq!(parsed, TagList::Tags(vec![]));
        assert!(!parsed.matches_weak(&current));
    }

    #[test]
    fn test_if_match_absent_resource_fails() {
        assert_eq!(
            if_match("*").evaluate(&Method::PUT, None),
            Outcome::PreconditionFailed
        );
        assert_eq!(
            if_match(r#""abc""#).evaluate(&Method::DELETE, None),
            Outcome::PreconditionFailed
        );
    }

    #[test]
    fn test_if_match_mismatch_fails() {
        let current = etag::compute(b"current");
        let stale = etag::compute(b"stale");
        assert_eq!(
            if_match(stale.as_str()).evaluate(&Method::PUT, Some(&current)),
            Outcome::PreconditionFailed
        );
    }

    #[test]
    fn test_if_match_hit_proceeds() {
        let current = etag::compute(b"current");
        let stale = etag::compute(b"stale");
        let header = format!("{}, {}", stale, current);
        assert_eq!(
            if_match(&header).evaluate(&Method::PUT, Some(&current)),
            Outcome::Proceed
        );
        assert_eq!(
            if_match("*").evaluate(&Method::DELETE, Some(&current)),
            Outcome::Proceed
        );
    }

    #[test]
    fn test_if_match_rejects_weak_tags() {
        let current = etag::compute(b"current");
        let weak = format!("W/{}", current);
        assert_eq!(
            if_match(&weak).evaluate(&Method::PUT, Some(&current)),
            Outcome::PreconditionFailed
        );
    }

    #[test]
    fn test_if_none_match_wildcard() {
        let current = etag::compute(b"current");
        assert_eq!(
            if_none_match("*").evaluate(&Method::PUT, Some(&current)),
            Outcome::PreconditionFailed
        );
        assert_eq!(
            if_none_match("*").evaluate(&Method::PUT, None),
            Outcome::Proceed
        );
        assert_eq!(
            if_none_match("*").evaluate(&Method::GET, Some(&current)),
            Outcome::NotModified
        );
    }

    #[test]
    fn test_if_none_match_hit_depends_on_method() {
        let current = etag::compute(b"current");
        let header = current.to_string();
        assert_eq!(
            if_none_match(&header).evaluate(&Method::GET, Some(&current)),
            Outcome::NotModified
        );
        assert_eq!(
            if_none_match(&header).evaluate(&Method::HEAD, Some(&current)),
            Outcome::NotModified
        );
        assert_eq!(
            if_none_match(&header).evaluate(&Method::PUT, Some(&current)),
            Outcome::PreconditionFailed
        );
        assert_eq!(
            if_none_match(&header).evaluate(&Method::DELETE, Some(&current)),
            Outcome::PreconditionFailed
        );
    }

    #[test]
    fn test_if_none_match_weak_comparison() {
        let current = etag::compute(b"current");
        let weak = format!("W/{}", current);
        assert_eq!(
            if_none_match(&weak).evaluate(&Method::GET, Some(&current)),
            Outcome::NotModified
        );
    }

    #[test]
    fn test_if_none_match_miss_proceeds() {
        let current = etag::compute(b"current");
        let stale = etag::compute(b"stale");
        assert_eq!(
            if_none_match(stale.as_str()).evaluate(&Method::GET, Some(&current)),
            Outcome::Proceed
        );
        assert_eq!(
            if_none_match(stale.as_str()).evaluate(&Method::GET, None),
            Outcome::Proceed
        );
    }

    #[test]
    fn test_no_headers_always_proceed() {
        let current = etag::compute(b"current");
        let none = Preconditions::default();
        assert!(none.is_empty());
        assert_eq!(none.evaluate(&Method::PUT, None), Outcome::Proceed);
        assert_eq!(
            none.evaluate(&Method::DELETE, Some(&current)),
            Outcome::Proceed
        );
    }

    #[test]
    fn test_from_headers_joins_repeated_lines() {
        let current = etag::compute(b"current");
        let mut headers = HeaderMap::new();
        headers.append(header::IF_MATCH, HeaderValue::from_static("\"nope\""));
        headers.append(
            header::IF_MATCH,
            HeaderValue::from_str(current.as_str()).unwrap(),
        );

        let pre = Preconditions::from_headers(&headers);
        assert!(pre.if_none_match.is_none());
        assert_eq!(pre.evaluate(&Method::PUT, Some(&current)), Outcome::Proceed);
    }
}

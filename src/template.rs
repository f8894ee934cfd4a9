//! `{{name}}` placeholder handling for prompt bodies.
//!
//! Both operations share one left-to-right scanner, so a placeholder that
//! [`extract_variables`] reports is exactly one that [`substitute`] can fill.
//! Empty placeholders (`{{}}`, `{{  }}`) and unterminated openers are kept as
//! literal text.

use std::collections::{HashMap, HashSet};

use nom::IResult;
use nom::Parser;
use nom::branch::alt;
use nom::bytes::complete::{tag, take_until};
use nom::combinator::{consumed, rest, verify};
use nom::sequence::delimited;

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Segment<'a> {
    Literal(&'a str),
    Placeholder { raw: &'a str, name: &'a str },
}

fn up_to_open(input: &str) -> IResult<&str, &str> {
    take_until(OPEN).parse(input)
}

/// Text before the next opener, or everything when there is none.
fn literal_text(input: &str) -> IResult<&str, &str> {
    verify(alt((up_to_open, rest)), |s: &&str| !s.is_empty()).parse(input)
}

/// A closed `{{...}}`, returned as the whole match and the text between the braces.
fn braced(input: &str) -> IResult<&str, (&str, &str)> {
    consumed(delimited(tag(OPEN), take_until(CLOSE), tag(CLOSE))).parse(input)
}

struct Scanner<'a> {
    rest: &'a str,
}

impl<'a> Scanner<'a> {
    fn new(body: &'a str) -> Self {
        Self { rest: body }
    }

    fn take_literal(&mut self, len: usize) -> Segment<'a> {
        let (lit, tail) = self.rest.split_at(len);
        self.rest = tail;
        Segment::Literal(lit)
    }
}

impl<'a> Iterator for Scanner<'a> {
    type Item = Segment<'a>;

    fn next(&mut self) -> Option<Segment<'a>> {
        if self.rest.is_empty() {
            return None;
        }

        if let Ok((tail, lit)) = literal_text(self.rest) {
            self.rest = tail;
            return Some(Segment::Literal(lit));
        }

        // rest starts with "{{"
        let Ok((tail, (raw, inner))) = braced(self.rest) else {
            return Some(self.take_literal(self.rest.len()));
        };

        // a later "{{" before the closer starts the real placeholder
        if let Ok((_, before)) = up_to_open(inner) {
            return Some(self.take_literal(OPEN.len() + before.len()));
        }

        self.rest = tail;
        let name = inner.trim();
        if name.is_empty() {
            Some(Segment::Literal(raw))
        } else {
            Some(Segment::Placeholder { raw, name })
        }
    }
}

/// Unique placeholder names in first-occurrence order.
pub fn extract_variables(body: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut names = Vec::new();
    for segment in Scanner::new(body) {
        if let Segment::Placeholder { name, .. } = segment {
            if seen.insert(name) {
                names.push(name.to_string());
            }
        }
    }
    names
}

/// Replaces every placeholder whose name has a value. Placeholders without a
/// value are left exactly as written.
pub fn substitute(body: &str, values: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(body.len());
    for segment in Scanner::new(body) {
        match segment {
            Segment::Literal(text) => out.push_str(text),
            Segment::Placeholder { raw, name } => match values.get(name) {
                Some(value) => out.push_str(value),
                None => out.push_str(raw),
            },
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn extract_dedupes_in_first_occurrence_order() {
        assert_eq!(extract_variables("{{b}}{{a}}{{b}}"), vec!["b", "a"]);
    }

    #[test]
    fn extract_is_idempotent() {
        let body = "Write a {{tone}} post about {{topic}} for {{audience}}. Keep it {{tone}}.";
        let first = extract_variables(body);
        assert_eq!(first, extract_variables(body));
        assert_eq!(first, vec!["tone", "topic", "audience"]);
    }

    #[test]
    fn empty_and_unterminated_placeholders_are_skipped() {
        assert!(extract_variables("nothing {{}} here {{   }}").is_empty());
        assert!(extract_variables("open {{name but never closed").is_empty());
        assert_eq!(extract_variables("{{}}{{x}}"), vec!["x"]);
    }

    #[test]
    fn nested_opener_starts_the_placeholder() {
        assert_eq!(extract_variables("{{a {{b}}"), vec!["b"]);
        assert_eq!(
            substitute("{{a {{b}}", &values(&[("b", "B")])),
            "{{a B"
        );
    }

    #[test]
    fn names_are_case_sensitive_and_trimmed() {
        assert_eq!(extract_variables("{{Name}} {{name}} {{ name }}"), vec!["Name", "name"]);
    }

    #[test]
    fn substitute_fills_known_names() {
        assert_eq!(
            substitute("Hello {{name}}", &values(&[("name", "World")])),
            "Hello World"
        );
    }

    #[test]
    fn substitute_leaves_missing_names_visible() {
        assert_eq!(substitute("Hello {{name}}", &HashMap::new()), "Hello {{name}}");
        assert_eq!(
            substitute("{{a}} and {{ b }}", &values(&[("a", "1")])),
            "1 and {{ b }}"
        );
    }

    #[test]
    fn substitute_replaces_every_occurrence() {
        assert_eq!(
            substitute("{{x}}-{{x}}-{{x}}", &values(&[("x", "y")])),
            "y-y-y"
        );
    }

    #[test]
    fn full_substitution_leaves_no_known_placeholder() {
        let bodies = [
            "Summarize {{doc}} in {{lang}}",
            "{{a}}{{b}}{{a}} tail {{}}",
            "no placeholders at all",
            "{{ spaced }} and {{unterminated",
        ];
        for body in bodies {
            let names = extract_variables(body);
            let full: HashMap<String, String> = names
                .iter()
                .map(|n| (n.clone(), format!("value-of-{n}")))
                .collect();
            let rendered = substitute(body, &full);
            let remaining = extract_variables(&rendered);
            assert!(
                remaining.iter().all(|r| !names.contains(r)),
                "{body:?} left {remaining:?}"
            );
        }
    }

    #[test]
    fn scanner_segments_cover_the_whole_body() {
        let body = "a {{x}} b {{}} {{y {{z}} tail {{open";
        let joined: String = Scanner::new(body)
            .map(|s| match s {
                Segment::Literal(t) => t,
                Segment::Placeholder { raw, .. } => raw,
            })
            .collect();
        assert_eq!(joined, body);
        assert_eq!(extract_variables(body), vec!["x", "z"]);
    }

    #[test]
    fn braced_parser_reports_inner_text() {
        assert_eq!(braced("{{ a }} rest"), Ok((" rest", ("{{ a }}", " a "))));
        assert!(braced("{{ a").is_err());
        assert!(literal_text("{{a}}").is_err());
        assert_eq!(literal_text("plain"), Ok(("", "plain")));
    }

    #[test]
    fn multibyte_text_is_preserved() {
        assert_eq!(
            substitute("héllo {{名前}} ✓", &values(&[("名前", "世界")])),
            "héllo 世界 ✓"
        );
    }
}

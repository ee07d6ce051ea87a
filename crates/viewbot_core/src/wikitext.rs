//! Just enough template parsing to read and rewrite argument values in place.

use std::ops::Range;

use anyhow::{Result, bail};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    pub name: String,
    pub span: Range<usize>,
    pub arguments: Vec<TemplateArgument>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateArgument {
    /// `None` for positional arguments.
    pub name: Option<String>,
    pub value: String,
    /// Byte range of the raw value (surrounding whitespace included).
    pub value_span: Range<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextEdit {
    pub span: Range<usize>,
    pub replacement: String,
}

impl Template {
    /// Last argument with a matching trimmed name, like MediaWiki's own lookup.
    pub fn get_arg(&self, name: &str) -> Option<&TemplateArgument> {
        self.arguments
            .iter()
            .rev()
            .find(|argument| argument.name.as_deref().map(str::trim) == Some(name.trim()))
    }

    pub fn first_argument(&self) -> Option<&TemplateArgument> {
        self.arguments.first()
    }

    pub fn normalized_name(&self) -> String {
        normalize_template_name(&self.name)
    }
}

pub fn normalize_template_name(name: &str) -> String {
    name.trim().to_lowercase().replace(' ', "_")
}

/// Every `{{...}}` template in `text`, nested ones included, ordered by start.
pub fn parse_templates(text: &str) -> Vec<Template> {
    let bytes = text.as_bytes();
    let mut open = Vec::new();
    let mut spans = Vec::new();
    let mut cursor = 0usize;

    while cursor + 1 < bytes.len() {
        if bytes[cursor] == b'{' && bytes[cursor + 1] == b'{' {
            open.push(cursor);
            cursor += 2;
            continue;
        }
        if bytes[cursor] == b'}' && bytes[cursor + 1] == b'}' {
            if let Some(start) = open.pop() {
                spans.push(start..cursor + 2);
            }
            cursor += 2;
            continue;
        }
        cursor += 1;
    }

    spans.sort_by_key(|span| span.start);
    spans
        .into_iter()
        .map(|span| parse_template(text, span))
        .collect()
}

pub fn find_templates(text: &str, name: &str) -> Vec<Template> {
    let wanted = normalize_template_name(name);
    parse_templates(text)
        .into_iter()
        .filter(|template| template.normalized_name() == wanted)
        .collect()
}

/// Applies non-overlapping edits and returns the new text.
pub fn apply_edits(text: &str, mut edits: Vec<TextEdit>) -> Result<String> {
    edits.sort_by_key(|edit| edit.span.start);
    let mut output = String::with_capacity(text.len());
    let mut cursor = 0usize;
    for edit in edits {
        if edit.span.start < cursor || edit.span.end > text.len() {
            bail!(
                "overlapping or out-of-range edit at {}..{}",
                edit.span.start,
                edit.span.end
            );
        }
        output.push_str(&text[cursor..edit.span.start]);
        output.push_str(&edit.replacement);
        cursor = edit.span.end;
    }
    output.push_str(&text[cursor..]);
    Ok(output)
}

fn parse_template(text: &str, span: Range<usize>) -> Template {
    let inner = (span.start + 2)..(span.end - 2);
    let parts = split_top_level(text, inner, b'|');
    let mut parts = parts.into_iter();
    let name = parts
        .next()
        .map(|part| text[part].to_string())
        .unwrap_or_default();

    let mut arguments = Vec::new();
    for part in parts {
        let argument = match split_top_level(text, part.clone(), b'=').first() {
            Some(head) if head.end < part.end => {
                let value_span = (head.end + 1)..part.end;
                TemplateArgument {
                    name: Some(text[head.clone()].to_string()),
                    value: text[value_span.clone()].to_string(),
                    value_span,
                }
            }
            _ => TemplateArgument {
                name: None,
                value: text[part.clone()].to_string(),
                value_span: part,
            },
        };
        arguments.push(argument);
    }

    Template {
        name,
        span,
        arguments,
    }
}

/// Splits `range` of `text` at `separator` bytes that are not inside a nested
/// template or wikilink. `=` only splits once, at its first top-level hit.
fn split_top_level(text: &str, range: Range<usize>, separator: u8) -> Vec<Range<usize>> {
    let bytes = text.as_bytes();
    let mut parts = Vec::new();
    let mut braces = 0usize;
    let mut brackets = 0usize;
    let mut start = range.start;
    let mut cursor = range.start;

    while cursor < range.end {
        let pair = if cursor + 1 < range.end {
            Some((bytes[cursor], bytes[cursor + 1]))
        } else {
            None
        };
        match pair {
            Some((b'{', b'{')) => {
                braces += 1;
                cursor += 2;
                continue;
            }
            Some((b'}', b'}')) if braces > 0 => {
                braces -= 1;
                cursor += 2;
                continue;
            }
            Some((b'[', b'[')) => {
                brackets += 1;
                cursor += 2;
                continue;
            }
            Some((b']', b']')) if brackets > 0 => {
                brackets -= 1;
                cursor += 2;
                continue;
            }
            _ => {}
        }
        if bytes[cursor] == separator && braces == 0 && brackets == 0 {
            parts.push(start..cursor);
            start = cursor + 1;
            if separator == b'=' {
                break;
            }
        }
        cursor += 1;
    }
    parts.push(start..range.end);
    parts
}

#[cfg(test)]
mod tests {
    use super::{TextEdit, apply_edits, find_templates, normalize_template_name, parse_templates};

    #[test]
    fn parses_named_and_positional_arguments() {
        let text = "{{Infobox Song|title=Alpha|Beta| #views = 1,230 (NN)\n}}";
        let templates = parse_templates(text);
        assert_eq!(templates.len(), 1);
        let template = &templates[0];
        assert_eq!(template.name, "Infobox Song");
        assert_eq!(template.arguments.len(), 3);
        assert_eq!(template.arguments[1].name, None);
        assert_eq!(template.arguments[1].value, "Beta");
        let views = template.get_arg("#views").expect("views arg");
        assert_eq!(views.value, " 1,230 (NN)\n");
        assert_eq!(&text[views.value_span.clone()], " 1,230 (NN)\n");
    }

    #[test]
    fn nested_templates_and_links_do_not_split_arguments() {
        let text = "{{Infobox Song|link={{#|https://a.example/x}} [[Page|label]]|#views=5}}";
        let templates = parse_templates(text);
        assert_eq!(templates.len(), 2);
        assert_eq!(templates[0].name, "Infobox Song");
        assert_eq!(templates[1].name, "#");
        let link = templates[0].get_arg("link").expect("link arg");
        assert_eq!(link.value, "{{#|https://a.example/x}} [[Page|label]]");
        assert_eq!(templates[0].get_arg("#views").expect("views").value, "5");
    }

    #[test]
    fn equals_inside_value_stays_in_value() {
        let templates = parse_templates("{{#|https://www.youtube.com/watch?v=S9EpjW70_fw}}");
        let argument = templates[0].first_argument().expect("argument");
        assert_eq!(
            argument.name.as_deref(),
            Some("https://www.youtube.com/watch?v")
        );
        assert_eq!(argument.value, "S9EpjW70_fw");
    }

    #[test]
    fn duplicate_names_resolve_to_last() {
        let templates = parse_templates("{{T|a=1|a=2}}");
        assert_eq!(templates[0].get_arg("a").expect("arg").value, "2");
    }

    #[test]
    fn find_templates_normalizes_names() {
        assert_eq!(normalize_template_name(" Infobox Song "), "infobox_song");
        let text = "{{infobox_song|x=1}} {{Infobox Song|x=2}} {{Other|x=3}}";
        assert_eq!(find_templates(text, "Infobox Song").len(), 2);
    }

    #[test]
    fn unbalanced_braces_are_ignored() {
        assert!(parse_templates("{{broken").is_empty());
        assert_eq!(parse_templates("}} {{ok}}").len(), 1);
    }

    #[test]
    fn apply_edits_replaces_spans_and_rejects_overlap() {
        let text = "one two three";
        let output = apply_edits(
            text,
            vec![
                TextEdit {
                    span: 8..13,
                    replacement: "3".to_string(),
                },
                TextEdit {
                    span: 0..3,
                    replacement: "1".to_string(),
                },
            ],
        )
        .expect("apply");
        assert_eq!(output, "1 two 3");

        let error = apply_edits(
            text,
            vec![
                TextEdit {
                    span: 0..5,
                    replacement: String::new(),
                },
                TextEdit {
                    span: 4..6,
                    replacement: String::new(),
                },
            ],
        )
        .expect_err("overlap");
        assert!(error.to_string().contains("overlapping"));
    }
}

// Copyright 2019 Guillaume Becquin
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::common::error::Bert4RsError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// # Closed set of entity categories
/// Maps category labels (e.g. `LOC`) to the index of their channel in the span grid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityCategories {
    labels: Vec<String>,
}

impl EntityCategories {
    pub fn new<S: AsRef<str>>(labels: &[S]) -> EntityCategories {
        EntityCategories {
            labels: labels
                .iter()
                .map(|label| label.as_ref().to_string())
                .collect(),
        }
    }

    pub fn id(&self, label: &str) -> Option<i64> {
        self.labels
            .iter()
            .position(|candidate| candidate == label)
            .map(|position| position as i64)
    }

    pub fn label(&self, id: i64) -> Option<&str> {
        if id < 0 {
            return None;
        }
        self.labels.get(id as usize).map(String::as_str)
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

impl Default for EntityCategories {
    /// People's Daily categories: locations, organizations and persons
    fn default() -> Self {
        EntityCategories::new(&["LOC", "ORG", "PER"])
    }
}

/// # Annotated entity span
/// `start` and `end` are inclusive token positions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SpanLabel {
    pub start: usize,
    pub end: usize,
    pub category: String,
}

/// # Annotated training example
#[derive(Debug, Clone, PartialEq)]
pub struct NerExample {
    /// Full text of the example (before truncation)
    pub text: String,
    /// One token per annotated line, truncated to the maximum length
    pub tokens: Vec<String>,
    /// Entity spans, in order of appearance
    pub spans: Vec<SpanLabel>,
}

fn corpus_error(line: usize, message: impl Into<String>) -> Bert4RsError {
    Bert4RsError::CorpusError {
        line,
        message: message.into(),
    }
}

/// Parses a BIO-tagged corpus.
///
/// Examples are blocks of lines separated by blank lines. Each line holds a character and its tag
/// separated by a space (`中 B-LOC`). A tag starting with `B` opens a new span of the category following
/// the `B-` prefix, a tag starting with `I` extends the end of the most recent span to the current
/// position, any other tag (`O`) is ignored.
///
/// # Arguments
///
/// * `content` - corpus text
/// * `categories` - allowed entity categories
/// * `max_len` - maximum number of tokens kept per example (spans are kept and truncated at batching time)
///
/// # Example
///
/// ```
/// use bert4rs::pipelines::span_ner::{parse_corpus, EntityCategories, SpanLabel};
///
/// let examples = parse_corpus("中 B-LOC\n国 I-LOC\n", &EntityCategories::default(), 512)?;
/// assert_eq!(
///     examples[0].spans,
///     vec![SpanLabel { start: 0, end: 1, category: "LOC".to_string() }]
/// );
/// # Ok::<(), bert4rs::Bert4RsError>(())
/// ```
pub fn parse_corpus(
    content: &str,
    categories: &EntityCategories,
    max_len: usize,
) -> Result<Vec<NerExample>, Bert4RsError> {
    let mut examples = Vec::new();
    let mut text = String::new();
    let mut tokens: Vec<String> = Vec::new();
    let mut spans: Vec<SpanLabel> = Vec::new();

    let mut flush = |text: &mut String, tokens: &mut Vec<String>, spans: &mut Vec<SpanLabel>| {
        if !tokens.is_empty() {
            let mut example_tokens = std::mem::take(tokens);
            example_tokens.truncate(max_len);
            examples.push(NerExample {
                text: std::mem::take(text),
                tokens: example_tokens,
                spans: std::mem::take(spans),
            });
        }
    };

    for (line_index, line) in content.lines().enumerate() {
        let line_number = line_index + 1;
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            flush(&mut text, &mut tokens, &mut spans);
            continue;
        }

        let (token, tag) = line
            .rsplit_once(' ')
            .filter(|(token, tag)| !token.is_empty() && !tag.is_empty())
            .ok_or_else(|| corpus_error(line_number, format!("expected `<char> <tag>`, got `{}`", line)))?;
        let position = tokens.len();

        if tag.starts_with('B') {
            let category = tag.get(2..).unwrap_or_default();
            if categories.id(category).is_none() {
                return Err(corpus_error(
                    line_number,
                    format!("unknown entity category `{}`", category),
                ));
            }
            spans.push(SpanLabel {
                start: position,
                end: position,
                category: category.to_string(),
            });
        } else if tag.starts_with('I') {
            match spans.last_mut() {
                Some(span) => span.end = position,
                None => {
                    return Err(corpus_error(
                        line_number,
                        format!("tag `{}` does not continue any entity", tag),
                    ))
                }
            }
        }

        text.push_str(token);
        tokens.push(token.to_string());
    }
    flush(&mut text, &mut tokens, &mut spans);

    Ok(examples)
}

/// Reads and parses a BIO-tagged corpus file (see `parse_corpus`).
pub fn load_corpus<P: AsRef<Path>>(
    path: P,
    categories: &EntityCategories,
    max_len: usize,
) -> Result<Vec<NerExample>, Bert4RsError> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)
        .map_err(|e| Bert4RsError::IOError(format!("{} ({})", e, path.to_string_lossy())))?;
    parse_corpus(&content, categories, max_len)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn begin_and_inside_tags_form_one_span() {
        let examples = parse_corpus("中 B-LOC\n国 I-LOC\n", &EntityCategories::default(), 512).unwrap();
        assert_eq!(examples.len(), 1);
        assert_eq!(examples[0].text, "中国");
        assert_eq!(examples[0].tokens, vec!["中", "国"]);
        assert_eq!(
            examples[0].spans,
            vec![SpanLabel {
                start: 0,
                end: 1,
                category: "LOC".to_string()
            }]
        );
    }

    #[test]
    fn blank_lines_separate_examples() {
        let corpus = "我 O\n在 O\n北 B-LOC\n京 I-LOC\n\n\n张 B-PER\n三 I-PER\n去 O\n联 B-ORG\n合 I-ORG\n国 I-ORG\n\n";
        let examples = parse_corpus(corpus, &EntityCategories::default(), 512).unwrap();
        assert_eq!(examples.len(), 2);
        assert_eq!(examples[0].spans[0].start, 2);
        assert_eq!(examples[0].spans[0].end, 3);
        let categories = examples[1]
            .spans
            .iter()
            .map(|span| (span.start, span.end, span.category.as_str()))
            .collect::<Vec<_>>();
        assert_eq!(categories, vec![(0, 1, "PER"), (3, 5, "ORG")]);
    }

    #[test]
    fn tokens_are_truncated_but_spans_kept() {
        let examples = parse_corpus("a O\nb B-PER\nc I-PER\n", &EntityCategories::default(), 2).unwrap();
        assert_eq!(examples[0].tokens, vec!["a", "b"]);
        assert_eq!(examples[0].spans[0].end, 2);
    }

    #[test]
    fn malformed_lines_are_reported() {
        let categories = EntityCategories::default();
        match parse_corpus("中 B-LOC\n国\n", &categories, 512) {
            Err(Bert4RsError::CorpusError { line, .. }) => assert_eq!(line, 2),
            other => panic!("unexpected result {:?}", other),
        }
        assert!(parse_corpus("中 I-LOC\n", &categories, 512).is_err());
        assert!(parse_corpus("中 B-GPE\n", &categories, 512).is_err());
    }

    #[test]
    fn corpus_file_is_read_and_parsed() {
        use std::io::Write;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "李 B-PER\n明 I-PER\n\n北 B-LOC\n京 I-LOC\n").unwrap();
        let examples = load_corpus(file.path(), &EntityCategories::default(), 512).unwrap();
        assert_eq!(examples.len(), 2);
        assert_eq!(examples[0].text, "李明");
        assert_eq!(examples[1].spans[0].category, "LOC");
    }

    #[test]
    fn missing_corpus_file_error_names_the_path() {
        let directory = tempfile::tempdir().unwrap();
        let path = directory.path().join("missing.char.bmes");
        match load_corpus(&path, &EntityCategories::default(), 512) {
            Err(Bert4RsError::IOError(message)) => {
                assert!(message.contains(path.to_string_lossy().as_ref()))
            }
            other => panic!("unexpected result {:?}", other),
        }
    }
}

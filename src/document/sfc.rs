//! Single-file component container format.
//!
//! A host file is a sequence of top-level blocks:
//!
//! ```text
//! <template lang="html"> ... </template>
//! <script lang="ts"> ... </script>
//! <style> ... </style>
//! <i18n> ... </i18n>
//! ```
//!
//! Each block becomes one virtual document. `{{ expr }}` interpolations in a
//! template additionally become a nested script document whose source side
//! is the template document.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use url::Url;

use super::generator::{BlockSlice, EmbeddedCode, GeneratedCode, VirtualCodeGenerator};
use super::mapping::{CodeInformation, Mapping, Span};
use super::virtual_doc::VirtualDocument;
use crate::error::{YosegiError, YosegiResult};

static OPEN_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^<([A-Za-z][\w-]*)(\s[^>]*)?>").expect("valid regex for block open tag")
});

static LANG_ATTR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\blang\s*=\s*["']([^"']+)["']"#).expect("valid regex for lang attribute")
});

static INTERPOLATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{(.*?)\}\}").expect("valid regex for template interpolation")
});

/// Capabilities of template interpolation expressions.
const EXPRESSION_INFO: CodeInformation = CodeInformation {
    formatting: false,
    folding: false,
    ..CodeInformation::all()
};

/// Normalize a `lang` attribute into an LSP language id.
fn normalize_language(lang: &str) -> String {
    match lang.to_ascii_lowercase().as_str() {
        "ts" => "typescript".to_string(),
        "js" => "javascript".to_string(),
        "tsx" => "typescriptreact".to_string(),
        "jsx" => "javascriptreact".to_string(),
        other => other.to_string(),
    }
}

/// Find the closing tag for `kind` starting at `from`, honoring nesting of
/// the same tag. Returns `(close_start, close_end)`.
fn find_close(text: &str, kind: &str, from: usize) -> Option<(usize, usize)> {
    let open = format!("<{kind}");
    let close = format!("</{kind}>");
    let mut depth = 0usize;
    let mut cursor = from;

    loop {
        let rest = text.get(cursor..)?;
        let next_close = rest.find(&close)?;
        let next_open = rest.find(&open).filter(|i| {
            *i < next_close
                && rest[i + open.len()..]
                    .chars()
                    .next()
                    .is_some_and(|c| c == '>' || c.is_whitespace())
        });
        match next_open {
            Some(i) => {
                depth += 1;
                cursor += i + open.len();
            }
            None if depth == 0 => {
                let start = cursor + next_close;
                return Some((start, start + close.len()));
            }
            None => {
                depth -= 1;
                cursor += next_close + close.len();
            }
        }
    }
}

/// Scan top-level blocks. Also used by plugins that inspect block structure.
pub fn scan_blocks(host_text: &str, languages: &HashMap<String, String>) -> Vec<BlockSlice> {
    let mut slices = Vec::new();
    let mut counts: HashMap<String, usize> = HashMap::new();
    let mut cursor = 0;

    while let Some(captures) = host_text.get(cursor..).and_then(|rest| OPEN_TAG.captures(rest)) {
        let Some(whole) = captures.get(0) else {
            break;
        };
        let kind = captures[1].to_string();
        let header = whole.as_str().to_string();
        let open_start = cursor + whole.start();
        let content_start = cursor + whole.end();

        let language_id = LANG_ATTR
            .captures(&header)
            .map(|c| normalize_language(&c[1]))
            .or_else(|| languages.get(&kind).cloned())
            .unwrap_or_else(|| default_language(&kind).to_string());

        let count = counts.entry(kind.clone()).or_default();
        let id = if *count == 0 {
            kind.clone()
        } else {
            format!("{kind}_{count}")
        };
        *count += 1;

        match find_close(host_text, &kind, content_start) {
            Some((close_start, close_end)) => {
                slices.push(BlockSlice {
                    id,
                    kind,
                    language_id,
                    outer: Span::new(open_start, close_end),
                    content: Span::new(content_start, close_start),
                    header,
                    terminated: true,
                });
                cursor = close_end;
            }
            None => {
                slices.push(BlockSlice {
                    id,
                    kind,
                    language_id,
                    outer: Span::new(open_start, host_text.len()),
                    content: Span::new(content_start, host_text.len()),
                    header,
                    terminated: false,
                });
                break;
            }
        }
    }
    slices
}

fn default_language(kind: &str) -> &'static str {
    match kind {
        "template" => "html",
        "script" => "javascript",
        "style" => "css",
        _ => "plaintext",
    }
}

/// Generator for `.vue`-style single-file components.
#[derive(Debug, Clone, Default)]
pub struct SfcLanguage {
    /// Block kind → language id, for blocks without a `lang` attribute
    languages: HashMap<String, String>,
    /// Language of template interpolation documents
    expression_language: Option<String>,
}

impl SfcLanguage {
    pub fn new(languages: HashMap<String, String>) -> Self {
        Self {
            languages,
            expression_language: None,
        }
    }

    pub fn with_expression_language(mut self, language: impl Into<String>) -> Self {
        self.expression_language = Some(language.into());
        self
    }

    fn template_expressions(&self, content: &str) -> Option<EmbeddedCode> {
        let mut text = String::new();
        let mut mappings = Vec::new();
        for captures in INTERPOLATION.captures_iter(content) {
            let Some(expr) = captures.get(1) else {
                continue;
            };
            text.push('(');
            mappings.push(Mapping::offset(
                expr.start(),
                text.len(),
                expr.len(),
                EXPRESSION_INFO,
            ));
            text.push_str(expr.as_str());
            text.push_str(");\n");
        }
        if mappings.is_empty() {
            return None;
        }
        Some(EmbeddedCode {
            id: "expressions".to_string(),
            language_id: self
                .expression_language
                .clone()
                .unwrap_or_else(|| "javascript".to_string()),
            code: GeneratedCode {
                text,
                mappings,
                ..Default::default()
            },
        })
    }
}

impl VirtualCodeGenerator for SfcLanguage {
    fn name(&self) -> &str {
        "sfc"
    }

    fn accepts(&self, language_id: &str, uri: &Url) -> bool {
        matches!(language_id, "vue" | "sfc") || uri.path().ends_with(".vue")
    }

    fn scan(&self, host_text: &str) -> Vec<BlockSlice> {
        scan_blocks(host_text, &self.languages)
    }

    fn generate(&self, slice: &BlockSlice, host_text: &str) -> YosegiResult<GeneratedCode> {
        if !slice.terminated {
            return Err(YosegiError::parse_failure(
                &slice.id,
                format!("missing </{}>", slice.kind),
            ));
        }
        let content = slice.content(host_text);
        let mut code = GeneratedCode::verbatim(content, slice.content, CodeInformation::all());
        if slice.kind == "template"
            && let Some(expressions) = self.template_expressions(content)
        {
            code.embedded.push(expressions);
        }
        Ok(code)
    }

    fn patch(
        &self,
        _previous: &VirtualDocument,
        slice: &BlockSlice,
        host_text: &str,
    ) -> Option<GeneratedCode> {
        // Templates own nested documents and are regenerated instead.
        if slice.kind == "template" || !slice.terminated {
            return None;
        }
        Some(GeneratedCode::verbatim(
            slice.content(host_text),
            slice.content,
            CodeInformation::all(),
        ))
    }
}

//! Semantic token remapping.
//!
//! Plugins encode tokens against [`LEGEND_TYPES`] / [`LEGEND_MODIFIERS`] in
//! the coordinates of their document. Tokens are decoded to absolute
//! positions, mapped one by one, and re-encoded relative to the host.

use tower_lsp_server::ls_types::{
    Position, Range, SemanticToken, SemanticTokenModifier, SemanticTokenType, SemanticTokens,
    SemanticTokensLegend,
};

use super::transform::ResultMapper;

pub const LEGEND_TYPES: &[SemanticTokenType] = &[
    SemanticTokenType::NAMESPACE,
    SemanticTokenType::TYPE,
    SemanticTokenType::CLASS,
    SemanticTokenType::ENUM,
    SemanticTokenType::INTERFACE,
    SemanticTokenType::STRUCT,
    SemanticTokenType::TYPE_PARAMETER,
    SemanticTokenType::PARAMETER,
    SemanticTokenType::VARIABLE,
    SemanticTokenType::PROPERTY,
    SemanticTokenType::ENUM_MEMBER,
    SemanticTokenType::EVENT,
    SemanticTokenType::FUNCTION,
    SemanticTokenType::METHOD,
    SemanticTokenType::MACRO,
    SemanticTokenType::KEYWORD,
    SemanticTokenType::MODIFIER,
    SemanticTokenType::COMMENT,
    SemanticTokenType::STRING,
    SemanticTokenType::NUMBER,
    SemanticTokenType::REGEXP,
    SemanticTokenType::OPERATOR,
    SemanticTokenType::DECORATOR,
];

pub const LEGEND_MODIFIERS: &[SemanticTokenModifier] = &[
    SemanticTokenModifier::DECLARATION,
    SemanticTokenModifier::DEFINITION,
    SemanticTokenModifier::READONLY,
    SemanticTokenModifier::STATIC,
    SemanticTokenModifier::DEPRECATED,
    SemanticTokenModifier::ABSTRACT,
    SemanticTokenModifier::ASYNC,
    SemanticTokenModifier::MODIFICATION,
    SemanticTokenModifier::DOCUMENTATION,
    SemanticTokenModifier::DEFAULT_LIBRARY,
];

pub fn legend() -> SemanticTokensLegend {
    SemanticTokensLegend {
        token_types: LEGEND_TYPES.to_vec(),
        token_modifiers: LEGEND_MODIFIERS.to_vec(),
    }
}

/// A token with an absolute position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AbsoluteToken {
    pub line: u32,
    pub start: u32,
    pub length: u32,
    pub token_type: u32,
    pub modifiers: u32,
}

pub fn decode(tokens: &[SemanticToken]) -> Vec<AbsoluteToken> {
    let mut line = 0;
    let mut start = 0;
    tokens
        .iter()
        .map(|t| {
            if t.delta_line > 0 {
                line += t.delta_line;
                start = t.delta_start;
            } else {
                start += t.delta_start;
            }
            AbsoluteToken {
                line,
                start,
                length: t.length,
                token_type: t.token_type,
                modifiers: t.token_modifiers_bitset,
            }
        })
        .collect()
}

/// Sort, drop tokens starting inside a previous one, and delta-encode.
pub fn encode(mut tokens: Vec<AbsoluteToken>) -> Vec<SemanticToken> {
    tokens.sort_by_key(|t| (t.line, t.start));
    let mut data = Vec::with_capacity(tokens.len());
    let mut previous: Option<AbsoluteToken> = None;
    for token in tokens {
        let (delta_line, delta_start) = match previous {
            Some(p) if p.line == token.line => {
                if token.start < p.start + p.length {
                    continue;
                }
                (0, token.start - p.start)
            }
            Some(p) => (token.line - p.line, token.start),
            None => (token.line, token.start),
        };
        data.push(SemanticToken {
            delta_line,
            delta_start,
            length: token.length,
            token_type: token.token_type,
            token_modifiers_bitset: token.modifiers,
        });
        previous = Some(token);
    }
    data
}

/// Map every token of a plugin's result into host coordinates.
///
/// Stops early when `cancelled` returns true and keeps what was mapped.
pub(crate) fn map_tokens(
    tokens: SemanticTokens,
    mapper: &ResultMapper<'_>,
    cancelled: impl Fn() -> bool,
) -> Vec<AbsoluteToken> {
    let mut mapped = Vec::new();
    for token in decode(&tokens.data) {
        if cancelled() {
            log::debug!(
                target: "yosegi::dispatch",
                "semantic token mapping cancelled after {} tokens",
                mapped.len()
            );
            break;
        }
        let range = Range {
            start: Position {
                line: token.line,
                character: token.start,
            },
            end: Position {
                line: token.line,
                character: token.start + token.length,
            },
        };
        let Some(host) = mapper.range(range) else {
            continue;
        };
        if host.start.line != host.end.line || host.end.character <= host.start.character {
            continue;
        }
        mapped.push(AbsoluteToken {
            line: host.start.line,
            start: host.start.character,
            length: host.end.character - host.start.character,
            ..token
        });
    }
    mapped
}

/// Merge two encoded token sets of the same document.
pub fn merge(acc: SemanticTokens, next: SemanticTokens) -> SemanticTokens {
    let mut tokens = decode(&acc.data);
    tokens.extend(decode(&next.data));
    SemanticTokens {
        result_id: None,
        data: encode(tokens),
    }
}

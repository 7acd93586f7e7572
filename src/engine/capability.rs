//! Capability predicates, one per request kind.
//!
//! Every mapping and teleport query of a request goes through the same
//! predicate, on the way in and on the way back.

use crate::document::CodeInformation;

pub fn completion(info: &CodeInformation) -> bool {
    info.completion
}

pub fn hover(info: &CodeInformation) -> bool {
    info.hover
}

pub fn signature_help(info: &CodeInformation) -> bool {
    info.signature_help
}

pub fn definition(info: &CodeInformation) -> bool {
    info.definition
}

pub fn references(info: &CodeInformation) -> bool {
    info.references
}

pub fn rename(info: &CodeInformation) -> bool {
    info.rename
}

pub fn diagnostics(info: &CodeInformation) -> bool {
    info.diagnostics
}

pub fn formatting(info: &CodeInformation) -> bool {
    info.formatting
}

pub fn folding(info: &CodeInformation) -> bool {
    info.folding
}

pub fn selection(info: &CodeInformation) -> bool {
    info.selection
}

pub fn semantic_tokens(info: &CodeInformation) -> bool {
    info.semantic_tokens
}

pub fn code_actions(info: &CodeInformation) -> bool {
    info.code_actions
}

pub fn code_lenses(info: &CodeInformation) -> bool {
    info.code_lenses
}

pub fn links(info: &CodeInformation) -> bool {
    info.links
}

pub fn symbols(info: &CodeInformation) -> bool {
    info.symbols
}

pub fn call_hierarchy(info: &CodeInformation) -> bool {
    info.call_hierarchy
}

//! Arguments handed to plugin handlers, always in the coordinates of the
//! document the handler runs against.

use tower_lsp_server::ls_types::{
    CodeActionContext, CompletionContext, FormattingOptions, Position, Range,
    SignatureHelpContext,
};

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionArgs {
    pub position: Position,
    pub context: Option<CompletionContext>,
}

impl CompletionArgs {
    pub fn trigger_character(&self) -> Option<&str> {
        self.context
            .as_ref()
            .and_then(|c| c.trigger_character.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SignatureHelpArgs {
    pub position: Position,
    pub context: Option<SignatureHelpContext>,
}

impl SignatureHelpArgs {
    pub fn trigger_character(&self) -> Option<&str> {
        self.context
            .as_ref()
            .and_then(|c| c.trigger_character.as_deref())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReferencesArgs {
    pub position: Position,
    pub include_declaration: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenameArgs {
    pub position: Position,
    pub new_name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RangeFormattingArgs {
    pub range: Range,
    pub options: FormattingOptions,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CodeActionArgs {
    pub range: Range,
    pub context: CodeActionContext,
}
